//! Errors specific to reading, analyzing or dumping a PE image.

use alloc::string::String;

#[cfg(feature = "std")]
use std::io::Error as IOError;

use crate::memory::RegionKind;

/// Error that can occur when reading and parsing bytes.
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
#[cfg_attr(feature = "std", error("{0}"))]
pub struct ReadError(pub String);

/// Errors that can occur when reading a PE image.
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ImageReadError {
    #[cfg_attr(feature = "std", error("invalid bytes: {0}"))]
    InvalidBytes(ReadError),
    #[cfg_attr(feature = "std", error("invalid header: {0}"))]
    InvalidHeader(String),
    #[cfg_attr(feature = "std", error("invalid section: {0}"))]
    InvalidSection(String),
}
impl From<ReadError> for ImageReadError {
    fn from(error: ReadError) -> Self { ImageReadError::InvalidBytes(error) }
}

/// Errors that can occur when dumping a PE image.
///
/// Everything except output errors is detected while analyzing the source image,
/// before any output is created.
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum DumpError {
    #[cfg_attr(feature = "std", error("invalid image {file}: {source}"))]
    InvalidImage { file: String, source: ImageReadError },
    #[cfg_attr(
        feature = "std",
        error("{0} region at {1:#x?} ({2:#x?} bytes) is outside the image")
    )]
    RegionOutsideImage(RegionKind, u64, u64),
    #[cfg_attr(feature = "std", error("{0} region is not in a single section"))]
    RegionSpansSections(RegionKind),
    #[cfg_attr(feature = "std", error("{0} region exceeds the raw data of section {1}"))]
    RegionExceedsSection(RegionKind, String),
    #[cfg_attr(feature = "std", error("overlapping bss regions are not in a single section"))]
    BssSectionsDiffer,
    #[cfg_attr(feature = "std", error("data section {0} does not contain the data region"))]
    SectionMismatch(String),
    #[cfg_attr(feature = "std", error("memory at {0:#x?} ({1:#x?} bytes) is not available"))]
    MemoryUnavailable(u64, u64),
    #[cfg_attr(
        feature = "std",
        error("writing {size:#x?} bytes at {offset:#x?} exceeds output size {len:#x?}")
    )]
    OutputOverflow { offset: u64, size: u64, len: u64 },
    #[cfg_attr(
        feature = "std",
        error("reading {size:#x?} bytes at {offset:#x?} exceeds source size {len:#x?}")
    )]
    SourceOverflow { offset: u64, size: u64, len: u64 },
    #[cfg(feature = "std")]
    #[error("io error on {file}: {source}")]
    IOError { file: String, source: IOError },
}

/// Errors that can occur when loading a resource store.
#[cfg(feature = "std")]
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("io error on {file}: {source}")]
    IOError { file: String, source: IOError },
}

impl DumpError {
    /// Wraps a parse error of the named file.
    pub(crate) fn invalid_image<S: Into<String>>(file: S, source: ImageReadError) -> Self {
        DumpError::InvalidImage { file: file.into(), source }
    }
}
