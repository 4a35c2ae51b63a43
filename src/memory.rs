//! Live memory of the program whose image is dumped.

use alloc::vec::Vec;
use core::fmt;

use ahash::RandomState;
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;

/// The memory regions whose live contents are written into a dumped image.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RegionKind {
    /// Initialized data.
    Data,
    /// Uninitialized data.
    Bss,
    /// Uninitialized static data, which some linkers place apart from the other bss data.
    StaticBss,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Data => write!(f, "initialized data"),
            RegionKind::Bss => write!(f, "uninitialized data"),
            RegionKind::StaticBss => write!(f, "uninitialized static data"),
        }
    }
}

/// Range of virtual addresses in the running program.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Region {
    pub start: u64,
    pub size:  u64,
}

impl Region {
    pub const fn new(start: u64, size: u64) -> Self { Self { start, size } }

    pub const fn size(&self) -> u64 { self.size }

    pub const fn is_empty(&self) -> bool { self.size == 0 }

    /// Returns the address one past the region, or `None` if the region wraps around the
    /// address space.
    pub const fn end(&self) -> Option<u64> { self.start.checked_add(self.size) }

    const fn saturating_end(&self) -> u64 { self.start.saturating_add(self.size) }

    /// Returns whether the two regions share at least one address.
    pub const fn overlaps(&self, other: &Region) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if self.start < other.start {
            other.start < self.saturating_end()
        } else {
            self.start < other.saturating_end()
        }
    }

    /// Returns the smallest region covering both regions.
    pub fn union(&self, other: &Region) -> Region {
        let start = self.start.min(other.start);
        let end = self.saturating_end().max(other.saturating_end());
        Region::new(start, end - start)
    }
}

/// Access to the memory image of a running program.
///
/// Supplies the load address of the image, the boundaries of the regions to dump, and their
/// current contents. How the boundaries are established is up to the implementation.
pub trait MemoryImage {
    /// Address the image is loaded at.
    fn image_base(&self) -> u64;

    /// Boundaries of the region. An empty region is not dumped.
    fn region(&self, kind: RegionKind) -> Region;

    /// Returns `len` bytes of live memory starting at `address`, or `None` if unavailable.
    fn bytes(&self, address: u64, len: u64) -> Option<&[u8]>;
}

/// Captured copy of the memory regions of a program.
#[derive(Debug, Clone)]
pub struct Snapshot {
    image_base: u64,
    regions:    IndexMap<RegionKind, Region, RandomState>,
    chunks:     Vec<(u64, DebugIgnore<Vec<u8>>)>,
}

impl Snapshot {
    pub fn new(image_base: u64) -> Self {
        Self {
            image_base,
            regions: IndexMap::with_hasher(RandomState::new()),
            chunks: Vec::new(),
        }
    }

    /// Set the boundaries of the region to the captured bytes at `start`.
    pub fn set_region(&mut self, kind: RegionKind, start: u64, bytes: Vec<u8>) {
        self.regions.insert(kind, Region::new(start, bytes.len() as u64));
        self.capture(start, bytes);
    }

    /// Builder variant of [`Snapshot::set_region`].
    pub fn with_region(mut self, kind: RegionKind, start: u64, bytes: Vec<u8>) -> Self {
        self.set_region(kind, start, bytes);
        self
    }

    /// Add captured memory that is not the boundary of a region, such as a whole data section.
    /// Later captures shadow earlier ones where they overlap.
    pub fn capture(&mut self, address: u64, bytes: Vec<u8>) {
        self.chunks.push((address, DebugIgnore(bytes)));
    }
}

impl MemoryImage for Snapshot {
    fn image_base(&self) -> u64 { self.image_base }

    fn region(&self, kind: RegionKind) -> Region {
        self.regions.get(&kind).copied().unwrap_or_default()
    }

    fn bytes(&self, address: u64, len: u64) -> Option<&[u8]> {
        self.chunks.iter().rev().find_map(|(start, data)| {
            let offset = address.checked_sub(*start)?;
            let end = offset.checked_add(len)?;
            data.get(offset as usize..end as usize)
        })
    }
}
