//! Portable executable data types.
//!
//! These types are a one-to-one mapping of the data described in <https://docs.microsoft.com/en-us/windows/win32/debug/pe-format>

use alloc::string::{String, ToString};
use core::{mem, slice};

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::constants::*;

#[repr(C, packed(1))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct VersionU8 {
    pub major: u8,
    pub minor: u8,
}
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct VersionU16 {
    pub major: u16,
    pub minor: u16,
}
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct CoffHeader {
    pub machine:                 u16,
    pub number_of_sections:      u16,
    pub time_date_stamp:         u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols:       u32,
    pub size_of_optional_header: u16,
    pub characteristics:         u16,
}
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct StandardHeader {
    pub magic:                      u16,
    pub linker_version:             VersionU8,
    pub size_of_code:               u32,
    pub size_of_initialized_data:   u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point:     u32,
    pub base_of_code:               u32,
}
#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, Default)]
pub struct WindowsHeader<UXX> {
    pub image_base:               UXX,
    pub section_alignment:        u32,
    pub file_alignment:           u32,
    pub operating_system_version: VersionU16,
    pub image_version:            VersionU16,
    pub subsystem_version:        VersionU16,
    pub win32_version_value:      u32,
    pub size_of_image:            u32,
    pub size_of_headers:          u32,
    pub check_sum:                u32,
    pub subsystem:                u16,
    pub dll_characteristics:      u16,
    pub size_of_stack_reserve:    UXX,
    pub size_of_stack_commit:     UXX,
    pub size_of_heap_reserve:     UXX,
    pub size_of_heap_commit:      UXX,
    pub loader_flags:             u32,
    pub number_of_rva_and_sizes:  u32,
}
impl<UXX> WindowsHeader<UXX>
where
    UXX: IntoBytes,
{
    pub fn as_bytes(&self) -> &[u8] {
        // manually implement this here because zerocopy doesn't support derive for generic types
        unsafe {
            let len = mem::size_of_val(self);
            slice::from_raw_parts(self as *const Self as *const u8, len)
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum GenericWindowsHeader {
    WindowsHeader32(WindowsHeader<u32>),
    WindowsHeader64(WindowsHeader<u64>),
}
impl GenericWindowsHeader {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.as_bytes(),
            GenericWindowsHeader::WindowsHeader64(header) => header.as_bytes(),
        }
    }

    pub const fn image_base(&self) -> u64 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.image_base as u64,
            GenericWindowsHeader::WindowsHeader64(header) => header.image_base,
        }
    }

    pub const fn section_alignment(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.section_alignment,
            GenericWindowsHeader::WindowsHeader64(header) => header.section_alignment,
        }
    }

    pub const fn file_alignment(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.file_alignment,
            GenericWindowsHeader::WindowsHeader64(header) => header.file_alignment,
        }
    }

    pub const fn size_of_image(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.size_of_image,
            GenericWindowsHeader::WindowsHeader64(header) => header.size_of_image,
        }
    }

    pub const fn size_of_headers(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.size_of_headers,
            GenericWindowsHeader::WindowsHeader64(header) => header.size_of_headers,
        }
    }

    pub const fn check_sum(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.check_sum,
            GenericWindowsHeader::WindowsHeader64(header) => header.check_sum,
        }
    }

    pub const fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.number_of_rva_and_sizes,
            GenericWindowsHeader::WindowsHeader64(header) => header.number_of_rva_and_sizes,
        }
    }

    pub fn set_size_of_headers(&mut self, size_of_headers: u32) {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => {
                header.size_of_headers = size_of_headers
            }
            GenericWindowsHeader::WindowsHeader64(header) => {
                header.size_of_headers = size_of_headers
            }
        }
    }

    pub fn set_check_sum(&mut self, check_sum: u32) {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.check_sum = check_sum,
            GenericWindowsHeader::WindowsHeader64(header) => header.check_sum = check_sum,
        }
    }
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ImageDataDirectory {
    pub virtual_address: u32,
    pub size:            u32,
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct SectionHeader {
    pub name:                   [u8; 8],
    pub virtual_size:           u32,
    pub virtual_address:        u32,
    pub size_of_raw_data:       u32,
    pub pointer_to_raw_data:    u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations:  u16,
    pub number_of_linenumbers:  u16,
    pub characteristics:        u32,
}

impl SectionHeader {
    /// Returns the section name up to the first NUL byte, or `None` if it is not valid utf8.
    pub fn name(&self) -> Option<String> {
        let name = self.name;
        let name = core::str::from_utf8(
            &name[0..name.iter().position(|&c| c == b'\0').unwrap_or(name.len())],
        )
        .ok();
        name.map(|name| name.to_string())
    }

    /// Compares the fixed-width name field with `name` padded with NUL bytes.
    ///
    /// Names longer than the field never match.
    pub fn has_name(&self, name: &str) -> bool {
        let name = name.as_bytes();
        if name.len() > self.name.len() {
            return false;
        }
        let mut padded = [0u8; 8];
        padded[..name.len()].copy_from_slice(name);
        let field = self.name;
        field == padded
    }

    /// Returns whether the section has a raw data area in the file.
    pub const fn has_raw_data(&self) -> bool { self.pointer_to_raw_data != 0 }

    /// Returns the file offset one past the end of the section's raw data.
    pub const fn raw_data_end(&self) -> u64 {
        self.pointer_to_raw_data as u64 + self.size_of_raw_data as u64
    }

    /// Returns whether the relative virtual address lies in the section.
    ///
    /// Some linkers leave the virtual size at zero, so the extent is the larger of the virtual
    /// and the raw data size.
    pub const fn contains_rva(&self, rva: u64) -> bool {
        let size = if self.virtual_size > self.size_of_raw_data {
            self.virtual_size
        } else {
            self.size_of_raw_data
        };
        rva >= self.virtual_address as u64 && rva < self.virtual_address as u64 + size as u64
    }

    /// Returns the file offset of a relative virtual address inside the section.
    pub const fn rva_to_offset(&self, rva: u64) -> u64 {
        self.pointer_to_raw_data as u64 + (rva - self.virtual_address as u64)
    }

    /// Returns the content classification of the section.
    pub const fn content(&self) -> SectionContent { SectionContent::of(self.characteristics) }

    /// Reclassifies the section after live data has been written into its raw data area.
    pub fn mark_dumped(&mut self) {
        self.characteristics = self.content().dumped().apply(self.characteristics);
    }
}

/// Content classification of a section, derived from its characteristics.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SectionContent {
    /// Zero-filled at load time, no data stored in the file.
    Uninitialized,
    /// Data stored in the file.
    Initialized,
    /// Neither data flag is set, for example code sections.
    Other,
}

impl SectionContent {
    /// Classifies section characteristics.
    /// A section flagged as both initialized and uninitialized counts as initialized.
    pub const fn of(characteristics: u32) -> Self {
        if characteristics & IMAGE_SCN_CNT_INITIALIZED_DATA != 0 {
            SectionContent::Initialized
        } else if characteristics & IMAGE_SCN_CNT_UNINITIALIZED_DATA != 0 {
            SectionContent::Uninitialized
        } else {
            SectionContent::Other
        }
    }

    /// Returns the classification of a section once its live contents have been dumped.
    /// Dumped bytes are no longer zero-fill, so every section becomes initialized.
    pub const fn dumped(self) -> Self {
        match self {
            SectionContent::Uninitialized => SectionContent::Initialized,
            SectionContent::Initialized => SectionContent::Initialized,
            SectionContent::Other => SectionContent::Initialized,
        }
    }

    /// Applies the classification to section characteristics, keeping all unrelated flags.
    pub const fn apply(self, characteristics: u32) -> u32 {
        let cleared =
            characteristics & !(IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_CNT_UNINITIALIZED_DATA);
        match self {
            SectionContent::Initialized => cleared | IMAGE_SCN_CNT_INITIALIZED_DATA,
            SectionContent::Uninitialized => cleared | IMAGE_SCN_CNT_UNINITIALIZED_DATA,
            SectionContent::Other => cleared,
        }
    }
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct DebugDirectory {
    pub characteristics:     u32,
    pub time_date_stamp:     u32,
    pub version:             VersionU16,
    pub type_:               u32,
    pub size_of_data:        u32,
    pub address_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}
