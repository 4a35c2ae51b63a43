//! Relocation of file offsets between the source and the destination layout of an image.

use crate::types::SectionHeader;

/// Map a file offset valid in the source layout to the same byte in the destination layout.
///
/// The offset is shifted by the distance the raw data of its owning section moved. Offsets in
/// a gap between sections move with the following section, offsets after all sections move with
/// the end of the last section that has raw data. Zero offsets mark unused fields and are
/// returned unchanged.
///
/// Both tables have the same sections in the same order. Only sections before the offset may
/// have changed size.
pub fn relocate_offset(
    offset: u64, source_sections: &[SectionHeader], destination_sections: &[SectionHeader],
) -> u64 {
    if offset == 0 {
        return 0;
    }

    for (source, destination) in source_sections.iter().zip(destination_sections) {
        if offset < source.raw_data_end() {
            return offset
                .wrapping_add(destination.pointer_to_raw_data as u64)
                .wrapping_sub(source.pointer_to_raw_data as u64);
        }
    }

    let source_end = last_raw_data_end(source_sections);
    let destination_end = last_raw_data_end(destination_sections);
    offset.wrapping_add(destination_end).wrapping_sub(source_end)
}

/// Relocate a 32-bit offset field, see [`relocate_offset`].
pub fn relocate_field(
    field: u32, source_sections: &[SectionHeader], destination_sections: &[SectionHeader],
) -> u32 {
    relocate_offset(field as u64, source_sections, destination_sections) as u32
}

/// Returns the end of the raw data of the last section that has a raw data area, or zero.
pub fn last_raw_data_end(sections: &[SectionHeader]) -> u64 {
    sections
        .iter()
        .rev()
        .find(|section| section.has_raw_data())
        .map(|section| section.raw_data_end())
        .unwrap_or(0)
}
