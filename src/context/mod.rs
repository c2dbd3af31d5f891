//! Per-runtime device context
//!
//! A [`DeviceContext`] owns one backend together with everything the
//! reduction core keeps between calls: the caching allocator, memory
//! counters and resolved kernels. It is cheap to clone; clones share state.
//!
//! Two locks guard it:
//! - the pipeline lock, held for a whole statistic call so launch sequences
//!   from different threads never interleave
//! - the state lock, held only for a single allocator, copy or launch step
//!
//! [`DeviceBuffer`] drops take only the state lock, so a buffer may be dropped
//! from any thread, including one that holds the pipeline lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{ComputeBackend, DeviceLimits, KernelArg, KernelKind, LaunchConfig};
use crate::error::{StatError, StatResult};
use crate::memory::free_list::INITIAL_CAPACITY;
use crate::memory::{AllocatorStats, DeviceAllocator, DeviceBuffer, MemorySpace, MemoryStats, Tag};

/// Context configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Wait for every launch to complete before returning (diagnostics)
    pub sync_after_launch: bool,
    /// Initial slot count of the allocator's free list
    pub free_list_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            sync_after_launch: false,
            free_list_capacity: INITIAL_CAPACITY,
        }
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_after_launch(mut self, enabled: bool) -> Self {
        self.sync_after_launch = enabled;
        self
    }

    pub fn with_free_list_capacity(mut self, capacity: usize) -> Self {
        self.free_list_capacity = capacity;
        self
    }

    /// Defaults, with `ROCMSTAT_LAUNCH_BLOCKING=1` enabling synchronous launches
    pub fn from_env() -> Self {
        let sync_after_launch = std::env::var("ROCMSTAT_LAUNCH_BLOCKING")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if sync_after_launch {
            tracing::info!(
                "ROCMSTAT_LAUNCH_BLOCKING=1: synchronous kernel execution enabled for debugging"
            );
        }

        Self::default().with_sync_after_launch(sync_after_launch)
    }
}

/// Mutable state behind the short-held lock
pub(crate) struct ContextState<B: ComputeBackend> {
    pub(crate) backend: B,
    pub(crate) allocator: DeviceAllocator<B>,
    pub(crate) memory: MemoryStats,
    kernels: HashMap<KernelKind, B::Kernel>,
}

pub(crate) struct ContextInner<B: ComputeBackend> {
    state: Mutex<ContextState<B>>,
    pipeline: Mutex<()>,
    config: ContextConfig,
    limits: DeviceLimits,
    name: String,
}

impl<B: ComputeBackend> ContextInner<B> {
    pub(crate) fn lock_state(&self) -> StatResult<MutexGuard<'_, ContextState<B>>> {
        Ok(self.state.lock()?)
    }

    /// Lock the state, recovering it if a panicking thread poisoned the lock.
    ///
    /// Used from `Drop` paths where an error cannot be returned.
    pub(crate) fn lock_state_for_drop(&self) -> MutexGuard<'_, ContextState<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: ComputeBackend> Drop for ContextInner<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let allocator = mem::take(&mut state.allocator);
        if let Err(e) = allocator.destroy(&mut state.backend) {
            tracing::error!("DeviceContext '{}': releasing cached blocks failed: {}", self.name, e);
        }
        tracing::debug!("DeviceContext '{}' destroyed ({})", self.name, state.memory);
    }
}

/// Shared handle to one device runtime
pub struct DeviceContext<B: ComputeBackend> {
    inner: Arc<ContextInner<B>>,
}

impl<B: ComputeBackend> Clone for DeviceContext<B> {
    fn clone(&self) -> Self {
        DeviceContext {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ComputeBackend> std::fmt::Debug for DeviceContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<B: ComputeBackend> DeviceContext<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, ContextConfig::default())
    }

    /// Context configured from `ROCMSTAT_*` environment variables
    pub fn from_env(backend: B) -> Self {
        Self::with_config(backend, ContextConfig::from_env())
    }

    pub fn with_config(backend: B, config: ContextConfig) -> Self {
        let limits = backend.limits().clone();
        let name = backend.name().to_string();
        tracing::info!(
            "DeviceContext created on '{}' (max threads/block {}, shared mem {} bytes)",
            name,
            limits.max_threads_per_block,
            limits.shared_mem_per_block
        );

        let state = ContextState {
            backend,
            allocator: DeviceAllocator::with_capacity(config.free_list_capacity),
            memory: MemoryStats::new(),
            kernels: HashMap::new(),
        };

        DeviceContext {
            inner: Arc::new(ContextInner {
                state: Mutex::new(state),
                pipeline: Mutex::new(()),
                config,
                limits,
                name,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.inner.limits
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Allocate a device buffer of `size` bytes for `tag`
    pub fn alloc(&self, size: usize, tag: Tag) -> StatResult<DeviceBuffer<B>> {
        DeviceBuffer::new(self, size, tag)
    }

    /// Snapshot of the per-space byte counters
    pub fn memory_stats(&self) -> StatResult<MemoryStats> {
        Ok(self.lock_state()?.memory.clone())
    }

    /// Snapshot of the allocator's driver counters
    pub fn allocator_stats(&self) -> StatResult<AllocatorStats> {
        Ok(self.lock_state()?.allocator.stats())
    }

    /// Human-readable memory report
    pub fn report(&self) -> StatResult<String> {
        let state = self.lock_state()?;
        Ok(format!(
            "context '{}'\n  memory: {}\n  allocator: {}",
            self.inner.name,
            state.memory,
            state.allocator.stats()
        ))
    }

    /// Release every cached block back to the driver.
    ///
    /// Live buffers are unaffected and return to the (now empty) cache when
    /// dropped.
    pub fn clear_caches(&self) -> StatResult<()> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        state.allocator.free_all(&mut state.backend)?;
        Ok(())
    }

    /// Block until every enqueued command has completed
    pub fn finish(&self) -> StatResult<()> {
        self.lock_state()?.backend.finish()?;
        Ok(())
    }

    /// Run `f` with exclusive access to the backend (diagnostics and tests)
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> StatResult<R> {
        Ok(f(&mut self.lock_state()?.backend))
    }

    /// Resolve `kind`, validate the geometry and enqueue one launch
    pub(crate) fn launch(
        &self,
        kind: KernelKind,
        config: &LaunchConfig,
        args: &[KernelArg<B::Buffer>],
    ) -> StatResult<()> {
        if args.len() != kind.arg_count() {
            return Err(StatError::InternalError(format!(
                "{} expects {} arguments, got {}",
                kind.symbol(),
                kind.arg_count(),
                args.len()
            )));
        }
        self.inner.limits.validate(config)?;

        let mut guard = self.lock_state()?;
        let ContextState {
            backend,
            memory,
            kernels,
            ..
        } = &mut *guard;

        let kernel = match kernels.entry(kind) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                tracing::debug!("Resolving kernel '{}' on '{}'", kind.symbol(), self.inner.name);
                entry.insert(backend.kernel(kind)?)
            }
        };

        tracing::trace!(
            "Launching '{}': grid={:?}, block={:?}, shared_mem={}",
            kind.symbol(),
            config.grid,
            config.block,
            config.shared_mem_bytes
        );

        memory.record_alloc(MemorySpace::Local, config.shared_mem_bytes);
        let launched = backend.launch(kernel, config, args);
        memory.record_free(MemorySpace::Local, config.shared_mem_bytes);
        if let Err(e) = launched {
            tracing::error!("Kernel '{}' launch failed: {}", kind.symbol(), e);
            return Err(e.into());
        }

        if self.inner.config.sync_after_launch {
            backend.finish().map_err(|e| {
                tracing::error!("Synchronization failed after kernel '{}': {}", kind.symbol(), e);
                StatError::from(e)
            })?;
        }
        Ok(())
    }

    pub(crate) fn lock_state(&self) -> StatResult<MutexGuard<'_, ContextState<B>>> {
        self.inner.lock_state()
    }

    /// Serialise whole launch sequences across threads
    pub(crate) fn lock_pipeline(&self) -> StatResult<MutexGuard<'_, ()>> {
        Ok(self.inner.pipeline.lock()?)
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner<B>> {
        &self.inner
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner<B>>) -> Self {
        DeviceContext { inner }
    }

    /// True when both handles refer to the same runtime
    pub fn same_context(&self, other: &DeviceContext<B>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
