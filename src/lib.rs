//! **Dump**er for **p**ortable **e**xecutables.
//!
//! Writes the live data and bss contents of a running program into a copy of its executable,
//! so that the copy starts with the memory image already initialized.
//!
//! Supports:
//! * Parsing and introspection of the headers and section table of portable executables
//! * Growing uninitialized data sections and relocating all later file offsets
//! * Recomputing the header totals and the image checksum of the dumped image
//! * Layered resource lookups with built-in defaults
//!
//! See [`dump_image`] and [`dump_file`] for the main entry points, and [`MemoryImage`] for the
//! interface to the memory of the running program.
//!
//! # Examples
//!
//! ### Dumping captured memory
//! ```
//! use dumpe::{dump_file, DumpOptions, RegionKind, Snapshot};
//!
//! // capture the bss contents of the running program
//! let snapshot = Snapshot::new(IMAGE_BASE).with_region(RegionKind::Bss, BSS_START, bss);
//!
//! // write a copy of the executable with the bss contents stored in it
//! let output = dump_file(SOURCE_PATH, OUTPUT_PATH, &snapshot, &DumpOptions::default())?;
//! ```
//!
//! ### Dumping the running program
//! ```
//! use dumpe::{dump_current_exe, DumpOptions};
//!
//! // `memory` implements `MemoryImage` for the current process
//! let output = dump_current_exe(OUTPUT_PATH, &memory, &DumpOptions::default())?;
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(doc)))]

extern crate alloc;

pub(crate) mod analysis;
pub(crate) mod checksum;
pub(crate) mod copier;
pub(crate) mod dump;
pub(crate) mod errors;
pub(crate) mod image;
pub(crate) mod memory;
pub(crate) mod patch;
pub(crate) mod relocate;
pub(crate) mod resource;
pub(crate) mod util;

#[cfg(feature = "std")]
pub(crate) mod file;

#[cfg(feature = "cli")]
pub mod config;
pub mod constants;
pub mod types;

pub use crate::{
    analysis::*, checksum::*, copier::*, dump::*, errors::*, image::*, memory::*, patch::*,
    relocate::*, resource::*,
};

#[cfg(feature = "std")]
pub use crate::file::*;
