//! Device memory management
//!
//! - [`FreeList`]: tag-keyed cache of released device blocks
//! - [`DeviceAllocator`]: reuse/evict policy on top of the backend's raw allocator
//! - [`DeviceBuffer`]: shared-ownership handle that returns its block to the
//!   allocator when the last holder drops
//! - [`MemoryStats`]: current/peak byte counters per memory space

pub mod allocator;
pub mod buffer;
pub mod free_list;

use std::fmt;

pub use allocator::{AllocatorStats, DeviceAllocator};
pub use buffer::DeviceBuffer;
pub use free_list::{FreeList, FreeListEntry};

/// Logical role of a device buffer, used as the free-list reuse key.
///
/// Tags name a role ("partials of the mean kernel"), not an instance, so that
/// repeated calls of the same pipeline land on the same cached block. Two tags
/// are equal when their names are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(&'static str);

impl Tag {
    /// Default role for arrays uploaded from the host
    pub const INPUT: Tag = Tag("input");
    /// Catch-all role for scratch buffers without a dedicated tag
    pub const SCRATCH: Tag = Tag("scratch");

    pub const fn new(name: &'static str) -> Self {
        Tag(name)
    }

    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Memory space a byte counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Device-global memory
    Device,
    /// On-chip memory shared by one work-group
    Local,
    /// Host staging memory used for readback
    Host,
}

impl MemorySpace {
    pub const ALL: [MemorySpace; 3] = [MemorySpace::Device, MemorySpace::Local, MemorySpace::Host];

    fn index(self) -> usize {
        match self {
            MemorySpace::Device => 0,
            MemorySpace::Local => 1,
            MemorySpace::Host => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MemorySpace::Device => "device",
            MemorySpace::Local => "local",
            MemorySpace::Host => "host",
        }
    }
}

/// Byte counters of one memory space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpaceUsage {
    /// Bytes currently held by live buffers
    pub current: usize,
    /// High-water mark of `current`
    pub peak: usize,
}

/// Per-space memory counters for one context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    spaces: [SpaceUsage; 3],
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `bytes` as in use in `space`
    pub fn record_alloc(&mut self, space: MemorySpace, bytes: usize) {
        let usage = &mut self.spaces[space.index()];
        usage.current += bytes;
        usage.peak = usage.peak.max(usage.current);
    }

    /// Count `bytes` as released from `space`
    pub fn record_free(&mut self, space: MemorySpace, bytes: usize) {
        let usage = &mut self.spaces[space.index()];
        debug_assert!(
            usage.current >= bytes,
            "{} space underflow: freeing {} of {} bytes",
            space.name(),
            bytes,
            usage.current
        );
        usage.current = usage.current.saturating_sub(bytes);
    }

    pub fn usage(&self, space: MemorySpace) -> SpaceUsage {
        self.spaces[space.index()]
    }

    pub fn current(&self, space: MemorySpace) -> usize {
        self.usage(space).current
    }

    pub fn peak(&self, space: MemorySpace) -> usize {
        self.usage(space).peak
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, space) in MemorySpace::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let usage = self.usage(*space);
            write!(
                f,
                "{}: {} bytes in use (peak {})",
                space.name(),
                usage.current,
                usage.peak
            )?;
        }
        Ok(())
    }
}
