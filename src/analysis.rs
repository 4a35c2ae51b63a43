//! Analysis of a source image against the memory image of the running program.
//!
//! The analysis maps every region to the section it lives in and computes how much the raw data
//! of each uninitialized data section grows once its live contents are stored in the file.
//! All preconditions of a dump are checked here, before any output exists.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use log::{debug, error, warn};

use crate::{constants::*, errors::*, image::*, memory::*, util::*};

/// Options controlling a dump.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DumpOptions {
    /// Section that holds the initialized data to dump, if the program arranged for one.
    /// The whole section is dumped when it exists; otherwise the data region of the memory
    /// image is used.
    pub data_section_name: Option<String>,
    /// Compute the image checksum of the output. Without the `checksum` feature the
    /// checksum is always left zero.
    pub checksum:          bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            data_section_name: Some(DEFAULT_DATA_SECTION_NAME.to_string()),
            checksum:          true,
        }
    }
}

/// A memory region resolved to the source section containing it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RegionPlacement {
    pub kind:           RegionKind,
    pub region:         Region,
    /// Index of the owning section in the section table.
    pub section:        usize,
    /// Offset of the region start from the virtual address of the section.
    pub section_offset: u64,
    /// Number of bytes the raw data of the section grows by to hold the region.
    pub growth:         u64,
}

impl RegionPlacement {
    /// Returns whether the raw data of the owning section is resized to hold the region.
    pub const fn is_growing(&self) -> bool {
        matches!(self.kind, RegionKind::Bss | RegionKind::StaticBss)
    }
}

/// Result of analyzing a source image, read-only once computed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Analysis {
    pub file_alignment: u32,
    pub image_base:     u64,
    pub data:           Option<RegionPlacement>,
    pub bss:            Option<RegionPlacement>,
    /// `None` if the region is empty or has been merged into `bss`.
    pub static_bss:     Option<RegionPlacement>,
    /// Size of the source image plus the growth of all resized sections.
    pub output_size:    u64,
}

impl Analysis {
    /// Analyze the source image for dumping the memory image into it.
    ///
    /// # Returns
    /// Returns an error if a region lies outside the image or spans more than one section, if
    /// overlapping bss regions lie in different sections, if the initialized data exceeds the raw
    /// data of its section, or if the data section and the data region disagree.
    pub fn analyze(
        image: &Image, memory: &dyn MemoryImage, options: &DumpOptions,
    ) -> Result<Self, DumpError> {
        let image_base = memory.image_base();
        let file_alignment = image.windows_header().file_alignment();
        debug!("image base: {:#x?}, file alignment: {:#x?}", image_base, file_alignment);

        let data = locate_data(image, memory, options)?;
        let mut bss =
            place_region(image, image_base, RegionKind::Bss, memory.region(RegionKind::Bss))?;
        let mut static_bss = place_region(
            image,
            image_base,
            RegionKind::StaticBss,
            memory.region(RegionKind::StaticBss),
        )?;

        // the two bss regions are dumped as one if their address ranges intersect
        if let (Some(public), Some(private)) = (bss, static_bss) {
            if public.region.overlaps(&private.region) {
                if public.section != private.section {
                    error!(
                        "bss regions overlap but lie in sections {} and {}",
                        public.section, private.section
                    );
                    return Err(DumpError::BssSectionsDiffer);
                }
                let region = public.region.union(&private.region);
                debug!("merging overlapping bss regions into {:#x?}", region);
                bss = Some(RegionPlacement {
                    region,
                    section_offset: public.section_offset.min(private.section_offset),
                    growth: public.growth.max(private.growth),
                    ..public
                });
                static_bss = None;
            }
        }

        let growth = match (bss, static_bss) {
            (Some(public), Some(private)) if public.section == private.section => {
                public.growth.max(private.growth)
            }
            (public, private) => {
                public.map(|placement| placement.growth).unwrap_or(0)
                    + private.map(|placement| placement.growth).unwrap_or(0)
            }
        };
        let output_size = image.data().len() as u64 + growth;

        let analysis = Self {
            file_alignment,
            image_base,
            data,
            bss,
            static_bss,
            output_size,
        };
        debug!("{:#x?}", analysis);
        Ok(analysis)
    }

    /// Returns all placed regions in processing order: data, bss, static bss.
    pub fn placements(&self) -> impl Iterator<Item = &RegionPlacement> {
        self.data.iter().chain(self.bss.iter()).chain(self.static_bss.iter())
    }

    /// Returns the placed regions owned by the section at the index.
    pub fn placements_in(&self, section: usize) -> Vec<RegionPlacement> {
        self.placements().filter(|placement| placement.section == section).copied().collect()
    }
}

fn locate_data(
    image: &Image, memory: &dyn MemoryImage, options: &DumpOptions,
) -> Result<Option<RegionPlacement>, DumpError> {
    let image_base = memory.image_base();
    let reported = memory.region(RegionKind::Data);

    let named = options
        .data_section_name
        .as_deref()
        .and_then(|name| image.find_section(name).map(|index| (name, index)));

    let Some((name, index)) = named else {
        return place_region(image, image_base, RegionKind::Data, reported);
    };

    let section = image.section_table()[index];
    debug!("found data section {}: {:#x?}", name, section);
    if !reported.is_empty() {
        let placement = place_region(image, image_base, RegionKind::Data, reported)?;
        if placement.map(|placement| placement.section) != Some(index) {
            error!("data region {:#x?} is not in data section {}", reported, name);
            return Err(DumpError::SectionMismatch(name.to_string()));
        }
    }

    // only the part of the section backed by raw data is persisted
    let size = section.virtual_size.min(section.size_of_raw_data) as u64;
    if size < section.virtual_size as u64 {
        debug!(
            "data section {} is larger than its raw data, dumping {:#x?} of {:#x?} bytes",
            name,
            size,
            { section.virtual_size }
        );
    }
    let region = Region::new(image_base + section.virtual_address as u64, size);
    place_region(image, image_base, RegionKind::Data, region)
}

fn place_region(
    image: &Image, image_base: u64, kind: RegionKind, region: Region,
) -> Result<Option<RegionPlacement>, DumpError> {
    if region.is_empty() {
        warn!("{} region is empty, skipping", kind);
        return Ok(None);
    }

    let outside = || {
        error!("{} region {:#x?} is outside the image", kind, region);
        DumpError::RegionOutsideImage(kind, region.start, region.size)
    };
    let end = region.end().ok_or_else(outside)?;
    let start_rva = region.start.checked_sub(image_base).ok_or_else(outside)?;
    let end_rva = end - image_base;

    let section_index = image.section_containing_rva(start_rva).ok_or_else(outside)?;
    let last_section_index = image.section_containing_rva(end_rva - 1).ok_or_else(outside)?;
    if section_index != last_section_index {
        error!("{} region {:#x?} is not in a single section", kind, region);
        return Err(DumpError::RegionSpansSections(kind));
    }

    let section = image.section_table()[section_index];
    let section_offset = start_rva - section.virtual_address as u64;
    let section_end = end_rva - section.virtual_address as u64;
    let file_alignment = image.windows_header().file_alignment() as u64;

    let growth = match kind {
        RegionKind::Data => {
            if section_end > section.size_of_raw_data as u64 {
                let name = section.name().unwrap_or("?".to_string());
                error!(
                    "{} region {:#x?} exceeds the raw data of section {}",
                    kind, region, name
                );
                return Err(DumpError::RegionExceedsSection(kind, name));
            }
            0
        }
        // the copied raw data already occupies its aligned size in the output
        RegionKind::Bss | RegionKind::StaticBss => aligned_to(section_end, file_alignment)
            .saturating_sub(aligned_to(section.size_of_raw_data as u64, file_alignment)),
    };

    let placement = RegionPlacement {
        kind,
        region,
        section: section_index,
        section_offset,
        growth,
    };
    debug!(
        "{} region in section {}: {:#x?}",
        kind,
        section.name().unwrap_or("?".to_string()),
        placement
    );
    Ok(Some(placement))
}
