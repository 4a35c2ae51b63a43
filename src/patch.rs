//! Patching of the headers of a dumped image once all sections are in place.

use log::{debug, warn};
use zerocopy::IntoBytes;

use crate::{
    analysis::*, checksum::*, constants::*, errors::*, image::*, relocate::*, types::*, util::*,
};

/// Patch the destination headers and write them into `output`.
///
/// Recomputes the data size totals, relocates the file offsets that may point past grown
/// sections and stores the image checksum. `output` holds the copied image at its final size.
///
/// # Returns
/// Returns the headers as written, or an error if a debug directory entry lies outside the output.
pub fn patch_headers(
    output: &mut [u8], source: &Image, mut headers: Headers, options: &DumpOptions,
) -> Result<Headers, DumpError> {
    let file_alignment = headers.file_alignment() as u64;
    let destination_sections = headers.section_table.clone();
    let source_sections = source.section_table();

    let mut size_of_initialized_data = 0u64;
    let mut size_of_uninitialized_data = 0u64;
    for section in headers.section_table.iter_mut() {
        let size = aligned_to(section.virtual_size as u64, file_alignment);
        match section.content() {
            SectionContent::Initialized => size_of_initialized_data += size,
            SectionContent::Uninitialized => size_of_uninitialized_data += size,
            SectionContent::Other => {}
        }
        section.pointer_to_linenumbers =
            relocate_field(section.pointer_to_linenumbers, source_sections, &destination_sections);
    }
    headers.standard_header.size_of_initialized_data = size_of_initialized_data as u32;
    headers.standard_header.size_of_uninitialized_data = size_of_uninitialized_data as u32;
    debug!(
        "size of initialized data: {:#x?}, size of uninitialized data: {:#x?}",
        size_of_initialized_data, size_of_uninitialized_data
    );

    headers.coff_header.pointer_to_symbol_table = relocate_field(
        headers.coff_header.pointer_to_symbol_table,
        source_sections,
        &destination_sections,
    );
    debug!("pointer to symbol table: {:#x?}", { headers.coff_header.pointer_to_symbol_table });

    relocate_debug_directory(output, source, &destination_sections)?;

    headers.windows_header.set_check_sum(0);
    headers.write(output)?;

    if options.checksum {
        match checksum_facility() {
            Some(checksum) => {
                let check_sum = checksum(output);
                debug!("checksum: {:#x?}", check_sum);
                headers.windows_header.set_check_sum(check_sum);
                headers.write(output)?;
            }
            None => warn!("checksum facility unavailable, leaving checksum zero"),
        }
    }

    Ok(headers)
}

/// Relocate the raw data pointers of all entries in the debug directory, if there is one.
fn relocate_debug_directory(
    output: &mut [u8], source: &Image, destination_sections: &[SectionHeader],
) -> Result<(), DumpError> {
    let Some(debug_directory) = source.data_directory(DataDirectoryType::Debug).copied() else {
        return Ok(());
    };
    let virtual_address = debug_directory.virtual_address as u64;
    let Some(index) = section_for_data_directory(destination_sections, &debug_directory) else {
        debug!("no debug directory in any section: {:#x?}", debug_directory);
        return Ok(());
    };

    let directory_offset = destination_sections[index].rva_to_offset(virtual_address);
    let count = debug_directory.size as u64 / DEBUG_DIRECTORY_SIZE;
    for entry_index in 0..count {
        let offset = directory_offset + entry_index * DEBUG_DIRECTORY_SIZE;
        let mut entry =
            read_at::<DebugDirectory>(output, offset).map_err(|_| DumpError::OutputOverflow {
                offset,
                size: DEBUG_DIRECTORY_SIZE,
                len: output.len() as u64,
            })?;
        entry.pointer_to_raw_data = relocate_field(
            entry.pointer_to_raw_data,
            source.section_table(),
            destination_sections,
        );
        debug!("{:#x?}: {:#x?}", offset, entry);
        output[offset as usize..(offset + DEBUG_DIRECTORY_SIZE) as usize]
            .copy_from_slice(entry.as_bytes());
    }
    Ok(())
}
