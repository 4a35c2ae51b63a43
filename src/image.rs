//! Portable executable image representation.
//!
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format> for more information.

use alloc::{borrow::Cow, format, string::ToString, vec::Vec};

use ahash::RandomState;
use indexmap::IndexMap;
use log::debug;
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, types::*, util::*};

/// Image data directory type enumeration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DataDirectoryType {
    ExportTable,
    ImportTable,
    ResourceTable,
    ExceptionTable,
    CertificateTable,
    BaseRelocationTable,
    Debug,
    Architecture,
    GlobalPtr,
    TLSTable,
    LoadConfigTable,
    BoundImport,
    IAT,
    DelayImportDescriptor,
    CLRRuntimeHeader,
    Reserved,
}

/// Returns the index of the section with the given name.
///
/// The fixed-width name field is compared exactly, without case folding.
pub fn find_section(section_table: &[SectionHeader], name: &str) -> Option<usize> {
    section_table.iter().position(|section| section.has_name(name))
}

/// Returns the index of the first section whose virtual range contains the relative virtual address.
pub fn section_containing_rva(section_table: &[SectionHeader], rva: u64) -> Option<usize> {
    section_table.iter().position(|section| section.contains_rva(rva))
}

/// Returns the index of the section containing the data directory.
///
/// Directories with a zero virtual address are absent and belong to no section.
pub fn section_for_data_directory(
    section_table: &[SectionHeader], directory: &ImageDataDirectory,
) -> Option<usize> {
    match directory.virtual_address {
        0 => None,
        virtual_address => section_containing_rva(section_table, virtual_address as u64),
    }
}

/// File offsets of the headers that are rewritten in a dumped image.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct HeaderOffsets {
    pub coff_header:       u64,
    pub standard_header:   u64,
    pub windows_header:    u64,
    pub data_directory:    u64,
    pub section_table:     u64,
    pub section_table_end: u64,
}

/// The mutable headers of an image, detached from the image data.
///
/// The dumper patches a copy of the source headers and writes it back into the destination at
/// the same offsets.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Headers {
    pub coff_header:     CoffHeader,
    pub standard_header: StandardHeader,
    pub windows_header:  GenericWindowsHeader,
    pub section_table:   Vec<SectionHeader>,
    pub offsets:         HeaderOffsets,
}

impl Headers {
    /// Write the headers into `data` at their original offsets.
    ///
    /// # Returns
    /// Returns an error if `data` is too small to hold the headers.
    pub fn write(&self, data: &mut [u8]) -> Result<(), DumpError> {
        write_bytes(data, self.offsets.coff_header, self.coff_header.as_bytes())?;
        write_bytes(data, self.offsets.standard_header, self.standard_header.as_bytes())?;
        write_bytes(data, self.offsets.windows_header, self.windows_header.as_bytes())?;
        for (index, section_header) in self.section_table.iter().enumerate() {
            let offset = self.offsets.section_table + index as u64 * SECTION_HEADER_SIZE;
            write_bytes(data, offset, section_header.as_bytes())?;
        }
        Ok(())
    }

    /// Returns the file alignment of the image.
    pub const fn file_alignment(&self) -> u32 { self.windows_header.file_alignment() }
}

fn write_bytes(data: &mut [u8], offset: u64, bytes: &[u8]) -> Result<(), DumpError> {
    let len = data.len() as u64;
    let end = offset + bytes.len() as u64;
    if end > len {
        return Err(DumpError::OutputOverflow {
            offset,
            size: bytes.len() as u64,
            len,
        });
    }
    data[offset as usize..end as usize].copy_from_slice(bytes);
    Ok(())
}

/// Portable executable image representation.
///
/// Parses the headers needed to re-layout an image. Parsing validates every offset against the
/// image data, so any image returned by [`Image::parse`] can be indexed by its section table.
#[derive(Debug, Clone)]
pub struct Image<'a> {
    pub(crate) image: Cow<'a, [u8]>,

    pub(crate) coff_header:           CoffHeader,
    pub(crate) standard_header:       StandardHeader,
    pub(crate) windows_header:        GenericWindowsHeader,
    pub(crate) header_data_directory: IndexMap<DataDirectoryType, ImageDataDirectory, RandomState>,
    pub(crate) section_table:         Vec<SectionHeader>,

    offsets: HeaderOffsets,
}

impl PartialEq for Image<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.coff_header == other.coff_header
            && self.standard_header == other.standard_header
            && self.windows_header == other.windows_header
            && self.header_data_directory == other.header_data_directory
            && self.section_table == other.section_table
    }
}
impl Eq for Image<'_> {}

impl<'a> Image<'a> {
    /// Parse a portable executable image from a byte slice.
    ///
    /// # Returns
    /// Returns the `Image`, or an error if the byte slice is not a valid portable executable image,
    /// is missing required headers, or a section points outside the image.
    pub fn parse<R: Into<Cow<'a, [u8]>>>(image: R) -> Result<Self, ImageReadError> {
        let image = image.into();

        let pe_dos_magic = read_at::<u16>(&image, 0)?;
        debug!("pe_dos_magic: {:#x?}", pe_dos_magic);
        if pe_dos_magic != PE_DOS_MAGIC {
            return Err(ImageReadError::InvalidHeader(format!(
                "unknown exe header {:#x?}",
                pe_dos_magic
            )));
        }

        let pe_signature_offset = read_at::<u32>(&image, PE_PTR_OFFSET as u64)?;
        debug!("pe_signature_offset: {:#x?}", pe_signature_offset);

        let pe_signature = read_at::<u32>(&image, pe_signature_offset as u64)?;
        debug!("pe_signature: {:#x?}", pe_signature);
        if pe_signature != PE_NT_SIGNATURE {
            return Err(ImageReadError::InvalidHeader(format!(
                "invalid pe signature {:#x?}",
                pe_signature
            )));
        }

        let coff_header_offset = pe_signature_offset as u64 + PE_SIGNATURE_SIZE;
        let coff_header = read_at::<CoffHeader>(&image, coff_header_offset)?;
        debug!("{:#x?}: {:#x?}", coff_header_offset, coff_header);
        if coff_header.size_of_optional_header < 24 {
            return Err(ImageReadError::InvalidHeader("optional header too small".into()));
        }

        let standard_header_offset = coff_header_offset + COFF_HEADER_SIZE;
        let standard_header = read_at::<StandardHeader>(&image, standard_header_offset)?;
        debug!("{:#x?}: {:#x?}", standard_header_offset, standard_header);

        let (
            windows_header_offset,
            windows_header,
            number_of_rva_and_sizes,
            optional_header_dd_offset,
        ) = {
            if standard_header.magic == PE_32_MAGIC
                && coff_header.size_of_optional_header as u64 >= PE_32_DATA_DIRECTORY_OFFSET
            {
                let windows_header_offset = standard_header_offset + PE_32_WINDOWS_HEADER_OFFSET;
                let windows_header = read_at::<WindowsHeader<u32>>(&image, windows_header_offset)?;
                (
                    windows_header_offset,
                    GenericWindowsHeader::WindowsHeader32(windows_header),
                    windows_header.number_of_rva_and_sizes,
                    standard_header_offset + PE_32_DATA_DIRECTORY_OFFSET,
                )
            } else if standard_header.magic == PE_64_MAGIC
                && coff_header.size_of_optional_header as u64 >= PE_64_DATA_DIRECTORY_OFFSET
            {
                let windows_header_offset = standard_header_offset + PE_64_WINDOWS_HEADER_OFFSET;
                let windows_header = read_at::<WindowsHeader<u64>>(&image, windows_header_offset)?;
                (
                    windows_header_offset,
                    GenericWindowsHeader::WindowsHeader64(windows_header),
                    windows_header.number_of_rva_and_sizes,
                    standard_header_offset + PE_64_DATA_DIRECTORY_OFFSET,
                )
            } else {
                return Err(ImageReadError::InvalidHeader("invalid optional header".into()));
            }
        };
        debug!("{:#x?}: {:#x?}", windows_header_offset, windows_header);

        let file_alignment = windows_header.file_alignment();
        if !file_alignment.is_power_of_two() {
            return Err(ImageReadError::InvalidHeader(format!(
                "invalid file alignment {:#x?}",
                file_alignment
            )));
        }

        debug!("optional_header_dd_offset: {:#x?}", optional_header_dd_offset);
        let mut header_data_directory =
            IndexMap::<DataDirectoryType, ImageDataDirectory, _>::with_hasher(RandomState::new());
        use DataDirectoryType::*;
        for (index, &header) in [
            ExportTable,
            ImportTable,
            ResourceTable,
            ExceptionTable,
            CertificateTable,
            BaseRelocationTable,
            Debug,
            Architecture,
            GlobalPtr,
            TLSTable,
            LoadConfigTable,
            BoundImport,
            IAT,
            DelayImportDescriptor,
            CLRRuntimeHeader,
            Reserved,
        ]
        .iter()
        .enumerate()
        {
            if (index as u32) < number_of_rva_and_sizes {
                let offset = optional_header_dd_offset + index as u64 * DATA_DIRECTORY_SIZE;
                let data = read_at::<ImageDataDirectory>(&image, offset)?;
                header_data_directory.insert(header, data);
                debug!("{:#x?}: {:?}: {:#x?}", offset, header, data);
            }
        }

        let section_table_offset =
            standard_header_offset + coff_header.size_of_optional_header as u64;
        let mut section_table = Vec::with_capacity(coff_header.number_of_sections as usize);
        for index in 0..coff_header.number_of_sections as u64 {
            let section_header_offset = section_table_offset + index * SECTION_HEADER_SIZE;
            let section_header = read_at::<SectionHeader>(&image, section_header_offset)?;
            debug!(
                "{:#x?}: {}: {:#x?}",
                section_header_offset,
                section_header.name().unwrap_or("?".to_string()),
                section_header
            );
            section_table.push(section_header);
        }

        let section_table_end =
            section_table_offset + coff_header.number_of_sections as u64 * SECTION_HEADER_SIZE;

        validate_section_table(&section_table, image.len() as u64)?;

        Ok(Self {
            image,
            coff_header,
            standard_header,
            windows_header,
            header_data_directory,
            section_table,
            offsets: HeaderOffsets {
                coff_header: coff_header_offset,
                standard_header: standard_header_offset,
                windows_header: windows_header_offset,
                data_directory: optional_header_dd_offset,
                section_table: section_table_offset,
                section_table_end,
            },
        })
    }

    #[cfg(feature = "std")]
    /// Parse a portable executable image from a file.
    ///
    /// # Returns
    /// Returns the `Image`, or an error naming the file if it could not be read or is not a valid portable executable image.
    pub fn parse_file<P: AsRef<std::path::Path>>(path: P) -> Result<Image<'static>, DumpError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| DumpError::IOError {
            file: path.display().to_string(),
            source,
        })?;
        Image::parse(data)
            .map_err(|error| DumpError::invalid_image(path.display().to_string(), error))
    }

    /// Returns the raw image data.
    pub fn data(&self) -> &[u8] { &self.image }

    /// Returns the parsed coff header.
    pub fn coff_header(&self) -> &CoffHeader { &self.coff_header }

    /// Returns the parsed standard header.
    pub fn standard_header(&self) -> &StandardHeader { &self.standard_header }

    /// Returns the parsed windows header.
    pub fn windows_header(&self) -> &GenericWindowsHeader { &self.windows_header }

    /// Returns the file offsets of the parsed headers.
    pub fn header_offsets(&self) -> &HeaderOffsets { &self.offsets }

    /// Returns a detached copy of the headers that can be patched and written into another image.
    pub fn headers(&self) -> Headers {
        Headers {
            coff_header:     self.coff_header,
            standard_header: self.standard_header,
            windows_header:  self.windows_header,
            section_table:   self.section_table.clone(),
            offsets:         self.offsets,
        }
    }

    /// Returns the data directory for the requested header.
    pub fn data_directory(&self, directory: DataDirectoryType) -> Option<&ImageDataDirectory> {
        self.header_data_directory.get(&directory)
    }

    /// Returns the index of the section with the given name.
    pub fn find_section(&self, name: &str) -> Option<usize> {
        find_section(&self.section_table, name)
    }

    /// Returns the index of the section containing the relative virtual address.
    pub fn section_containing_rva(&self, rva: u64) -> Option<usize> {
        section_containing_rva(&self.section_table, rva)
    }

    /// Returns all section tables existing in the image.
    pub fn section_table(&self) -> &Vec<SectionHeader> { &self.section_table }
}

/// Sections with raw data have to be in ascending file order and inside the image.
fn validate_section_table(section_table: &[SectionHeader], len: u64) -> Result<(), ImageReadError> {
    let mut previous_end = 0;
    for section in section_table.iter().filter(|section| section.has_raw_data()) {
        let name = section.name().unwrap_or("?".to_string());
        if (section.pointer_to_raw_data as u64) < previous_end {
            return Err(ImageReadError::InvalidSection(format!(
                "{} at {:#x?} is out of file order",
                name,
                { section.pointer_to_raw_data }
            )));
        }
        if section.raw_data_end() > len {
            return Err(ImageReadError::InvalidSection(format!(
                "{} points outside image: {:#x?} > {:#x?}",
                name,
                section.raw_data_end(),
                len
            )));
        }
        previous_end = section.raw_data_end();
    }
    Ok(())
}
