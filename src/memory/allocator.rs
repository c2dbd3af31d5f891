//! Device allocator with warm reuse and out-of-memory eviction
//!
//! Released blocks stay in a [`FreeList`] keyed by tag. A request for a tag
//! that has a cached block large enough is served without touching the
//! driver. Under allocation pressure cached blocks are released one at a time
//! until the driver succeeds or nothing is left to evict.

use std::fmt;
use std::mem;

use crate::backend::{BackendError, BackendResult, ComputeBackend};
use crate::memory::free_list::FreeList;
use crate::memory::Tag;

/// Driver-facing counters of one allocator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Blocks obtained from the driver
    pub fresh_allocs: usize,
    /// Requests served from the free list
    pub reuses: usize,
    /// Blocks handed back to the driver, for any reason
    pub driver_releases: usize,
    /// Blocks released to relieve allocation pressure
    pub evictions: usize,
    /// Blocks currently cached
    pub cached_blocks: usize,
    /// Bytes currently cached
    pub cached_bytes: usize,
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fresh, {} reused, {} released, {} evicted, {} cached ({} bytes)",
            self.fresh_allocs,
            self.reuses,
            self.driver_releases,
            self.evictions,
            self.cached_blocks,
            self.cached_bytes
        )
    }
}

/// Reuse/evict policy on top of a backend's raw allocator.
///
/// The allocator does not own the backend; every operation borrows it so that
/// both can live behind the same context lock.
#[derive(Debug)]
pub struct DeviceAllocator<B: ComputeBackend> {
    free_list: FreeList<B::Buffer>,
    stats: AllocatorStats,
}

impl<B: ComputeBackend> Default for DeviceAllocator<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ComputeBackend> DeviceAllocator<B> {
    pub fn new() -> Self {
        Self::with_free_list(FreeList::new())
    }

    /// Start with a free list of `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_free_list(FreeList::with_capacity(capacity))
    }

    fn with_free_list(free_list: FreeList<B::Buffer>) -> Self {
        DeviceAllocator {
            free_list,
            stats: AllocatorStats::default(),
        }
    }

    pub fn free_list(&self) -> &FreeList<B::Buffer> {
        &self.free_list
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            cached_blocks: self.free_list.len(),
            cached_bytes: self.free_list.cached_bytes(),
            ..self.stats.clone()
        }
    }

    /// Obtain a block of at least `min_size` bytes for `tag`.
    ///
    /// Returns the block's actual size, which is larger than `min_size` when a
    /// cached block is reused. Fails with [`BackendError::OutOfMemory`] only
    /// after every cached block has been evicted.
    pub fn alloc(
        &mut self,
        backend: &mut B,
        min_size: usize,
        tag: Tag,
    ) -> BackendResult<(usize, B::Buffer)> {
        if let Some((size, handle)) = self.free_list.find(tag) {
            if size >= min_size {
                self.stats.reuses += 1;
                tracing::trace!(
                    "DeviceAllocator::alloc: reusing {} byte block for '{}' (requested {})",
                    size,
                    tag,
                    min_size
                );
                return Ok((size, handle));
            }
            tracing::debug!(
                "DeviceAllocator::alloc: cached '{}' block too small ({} < {}), releasing",
                tag,
                size,
                min_size
            );
            self.release(backend, handle)?;
        }

        let size = min_size.max(mem::size_of::<usize>());
        loop {
            match self.try_fresh(backend, size) {
                Ok(handle) => {
                    self.stats.fresh_allocs += 1;
                    tracing::trace!(
                        "DeviceAllocator::alloc: fresh {} byte block for '{}'",
                        size,
                        tag
                    );
                    return Ok((size, handle));
                }
                Err(e) if e.is_out_of_memory() => {
                    let Some((victim_size, victim)) = self.free_list.find_first() else {
                        tracing::warn!(
                            "DeviceAllocator::alloc: out of memory for {} bytes ('{}') with nothing left to evict",
                            size,
                            tag
                        );
                        return Err(e);
                    };
                    tracing::debug!(
                        "DeviceAllocator::alloc: out of memory for {} bytes, evicting {} byte block",
                        size,
                        victim_size
                    );
                    self.release(backend, victim)?;
                    self.stats.evictions += 1;
                }
                Err(e) => {
                    tracing::error!("DeviceAllocator::alloc: driver allocation failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Allocate from the driver and force backing with a one-byte write.
    ///
    /// An out-of-memory write means the driver could not back the block; it
    /// is released and reported as out of memory for `size`. Any other write
    /// failure is released and returned unchanged.
    fn try_fresh(&mut self, backend: &mut B, size: usize) -> BackendResult<B::Buffer> {
        let handle = backend.raw_alloc(size)?;
        if let Err(e) = backend.write(&handle, 0, &[0u8]) {
            self.release(backend, handle)?;
            if e.is_out_of_memory() {
                tracing::debug!(
                    "DeviceAllocator::alloc: {} byte block could not be materialized: {}",
                    size,
                    e
                );
                return Err(BackendError::OutOfMemory { requested: size });
            }
            tracing::error!("DeviceAllocator::alloc: touching fresh {} byte block failed: {}", size, e);
            return Err(e);
        }
        Ok(handle)
    }

    /// Keep `handle` warm under `tag`.
    ///
    /// A block already cached under the same tag is handed back to the driver
    /// first, so each tag caches at most one block.
    pub fn free(
        &mut self,
        backend: &mut B,
        handle: B::Buffer,
        size: usize,
        tag: Tag,
    ) -> BackendResult<()> {
        if let Some((old_size, old)) = self.free_list.find(tag) {
            tracing::trace!(
                "DeviceAllocator::free: replacing cached {} byte '{}' block",
                old_size,
                tag
            );
            if let Err(e) = self.release(backend, old) {
                // keep the new block cached so the caller's storage is not lost
                self.free_list.insert(size, handle, tag);
                return Err(e);
            }
        }
        self.free_list.insert(size, handle, tag);
        Ok(())
    }

    /// Release every cached block to the driver.
    ///
    /// Keeps going after a failed release and reports the first failure.
    pub fn free_all(&mut self, backend: &mut B) -> BackendResult<()> {
        self.free_list.pack();
        let cached = self.free_list.len();
        let mut first_error = None;
        while let Some((_, handle)) = self.free_list.find_first() {
            if let Err(e) = self.release(backend, handle) {
                first_error.get_or_insert(e);
            }
        }
        if cached > 0 {
            tracing::debug!("DeviceAllocator::free_all: released {} cached blocks", cached);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release the cache and tear the free list down
    pub fn destroy(mut self, backend: &mut B) -> BackendResult<()> {
        let result = self.free_all(backend);
        self.free_list.destroy();
        result
    }

    fn release(&mut self, backend: &mut B, handle: B::Buffer) -> BackendResult<()> {
        self.stats.driver_releases += 1;
        backend.raw_release(handle).map_err(|e| {
            tracing::error!("DeviceAllocator: driver release failed: {}", e);
            e
        })
    }
}
