//! Software device
//!
//! An emulated accelerator implementing [`ComputeBackend`] on the host.
//!
//! # Model
//!
//! - **Memory**: a map of allocations with a byte capacity. With lazy backing,
//!   `raw_alloc` always succeeds and the block is backed on first touch, which
//!   fails with `OutOfMemory` if the capacity is exhausted by then.
//! - **Queue**: launches are validated and enqueued; `read`, `write` and
//!   `finish` drain the queue first, so copies observe every earlier launch.
//!   Execution errors surface at drain time. `raw_release` does not drain: a
//!   queued launch that still names a released block fails when it runs.
//! - **Kernels**: executed work-group by work-group with explicit barrier
//!   phases (see [`kernels`]).
//! - **Spying**: counters and a launch log, readable through a
//!   [`SimMonitor`] even after the backend moved into a context.

pub mod kernels;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{
    BackendError, BackendResult, ComputeBackend, DeviceClass, DeviceLimits, KernelArg, KernelKind,
    LaunchConfig,
};

/// Default capacity of the software device
pub const DEFAULT_CAPACITY: usize = 256 * 1024 * 1024;

/// Launch limits of the software device
pub fn sim_limits() -> DeviceLimits {
    DeviceLimits {
        max_threads_per_block: 256,
        max_grid_size: [65535, 65535, 65535],
        max_threads_dim: [256, 256, 64],
        shared_mem_per_block: 32 * 1024,
        warp_size: 1,
        class: DeviceClass::Cpu,
    }
}

/// Software device configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub name: String,
    /// Bytes the device can back at once
    pub capacity: usize,
    /// Back blocks on first touch instead of at allocation
    pub lazy_backing: bool,
    pub limits: DeviceLimits,
    /// Zero-based launch index that fails at enqueue (fault injection)
    pub fail_launch_at: Option<usize>,
    /// Zero-based launch index that enqueues fine but fails when executed
    pub fail_execute_at: Option<usize>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            name: "rocmstat-sim".to_string(),
            capacity: DEFAULT_CAPACITY,
            lazy_backing: false,
            limits: sim_limits(),
            fail_launch_at: None,
            fail_execute_at: None,
        }
    }
}

impl SimConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_lazy_backing(mut self, lazy: bool) -> Self {
        self.lazy_backing = lazy;
        self
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_fail_launch_at(mut self, index: usize) -> Self {
        self.fail_launch_at = Some(index);
        self
    }

    pub fn with_fail_execute_at(mut self, index: usize) -> Self {
        self.fail_execute_at = Some(index);
        self
    }
}

/// Buffer handle of the software device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimHandle(u64);

impl SimHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Resolved kernel of the software device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimKernel {
    kind: KernelKind,
}

impl SimKernel {
    pub fn kind(&self) -> KernelKind {
        self.kind
    }
}

/// One enqueued launch, as recorded in the launch log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kernel: String,
    pub grid: (u32, u32, u32),
    pub block: (u32, u32, u32),
    pub shared_mem_bytes: usize,
}

/// Counter snapshot of a software device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub raw_alloc_calls: usize,
    pub raw_release_calls: usize,
    pub writes: usize,
    pub reads: usize,
    pub launches: usize,
    pub finishes: usize,
    pub kernel_resolves: usize,
    /// Bytes currently backed
    pub bytes_in_use: usize,
    pub peak_bytes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    raw_alloc_calls: AtomicUsize,
    raw_release_calls: AtomicUsize,
    writes: AtomicUsize,
    reads: AtomicUsize,
    launches: AtomicUsize,
    finishes: AtomicUsize,
    kernel_resolves: AtomicUsize,
    bytes_in_use: AtomicUsize,
    peak_bytes: AtomicUsize,
    launch_log: Mutex<Vec<LaunchRecord>>,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SimStats {
        SimStats {
            raw_alloc_calls: self.raw_alloc_calls.load(Ordering::Relaxed),
            raw_release_calls: self.raw_release_calls.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            launches: self.launches.load(Ordering::Relaxed),
            finishes: self.finishes.load(Ordering::Relaxed),
            kernel_resolves: self.kernel_resolves.load(Ordering::Relaxed),
            bytes_in_use: self.bytes_in_use.load(Ordering::Relaxed),
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
        }
    }

    fn launch_log(&self) -> Vec<LaunchRecord> {
        self.launch_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Read-only view of a software device's counters
#[derive(Debug, Clone)]
pub struct SimMonitor {
    counters: Arc<Counters>,
}

impl SimMonitor {
    pub fn stats(&self) -> SimStats {
        self.counters.snapshot()
    }

    pub fn bytes_in_use(&self) -> usize {
        self.counters.bytes_in_use.load(Ordering::Relaxed)
    }

    pub fn launch_log(&self) -> Vec<LaunchRecord> {
        self.counters.launch_log()
    }

    /// Kernel symbols in launch order
    pub fn launched_kernels(&self) -> Vec<String> {
        self.launch_log().into_iter().map(|record| record.kernel).collect()
    }
}

struct Allocation {
    size: usize,
    // u64 words keep the storage 8-byte aligned for f64 views
    words: Vec<u64>,
    backed: bool,
}

/// Device memory of the software device
pub(crate) struct SimMemory {
    allocations: HashMap<u64, Allocation>,
    capacity: usize,
    backed_bytes: usize,
    counters: Arc<Counters>,
}

impl SimMemory {
    fn allocation(&self, handle: SimHandle) -> BackendResult<&Allocation> {
        self.allocations
            .get(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("sim buffer {}", handle.0)))
    }

    fn allocation_mut(&mut self, handle: SimHandle) -> BackendResult<&mut Allocation> {
        self.allocations
            .get_mut(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("sim buffer {}", handle.0)))
    }

    fn reserve(&mut self, bytes: usize) -> BackendResult<()> {
        if self.backed_bytes + bytes > self.capacity {
            return Err(BackendError::OutOfMemory { requested: bytes });
        }
        self.backed_bytes += bytes;
        let in_use = self.backed_bytes;
        self.counters.bytes_in_use.store(in_use, Ordering::Relaxed);
        self.counters.peak_bytes.fetch_max(in_use, Ordering::Relaxed);
        Ok(())
    }

    /// Back `handle` if it is not backed yet
    pub(crate) fn materialize(&mut self, handle: SimHandle) -> BackendResult<()> {
        let size = {
            let allocation = self.allocation(handle)?;
            if allocation.backed {
                return Ok(());
            }
            allocation.size
        };
        self.reserve(size)?;
        let allocation = self.allocation_mut(handle)?;
        allocation.words = vec![0u64; size.div_ceil(8)];
        allocation.backed = true;
        Ok(())
    }

    /// Backed contents of `handle` as `f64`s
    pub(crate) fn f64s(&self, handle: SimHandle) -> BackendResult<&[f64]> {
        let allocation = self.allocation(handle)?;
        if !allocation.backed {
            return Err(BackendError::MemoryCopyFailed(format!(
                "sim buffer {} is not backed",
                handle.0
            )));
        }
        Ok(bytemuck::cast_slice(&allocation.words))
    }

    pub(crate) fn f64s_mut(&mut self, handle: SimHandle) -> BackendResult<&mut [f64]> {
        let allocation = self.allocation_mut(handle)?;
        if !allocation.backed {
            return Err(BackendError::MemoryCopyFailed(format!(
                "sim buffer {} is not backed",
                handle.0
            )));
        }
        Ok(bytemuck::cast_slice_mut(&mut allocation.words))
    }

    fn bytes_mut(&mut self, handle: SimHandle, offset: usize, len: usize) -> BackendResult<&mut [u8]> {
        self.materialize(handle)?;
        let allocation = self.allocation_mut(handle)?;
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= allocation.size)
            .ok_or_else(|| {
                BackendError::MemoryCopyFailed(format!(
                    "copy of {} bytes at offset {} exceeds {} byte sim buffer {}",
                    len, offset, allocation.size, handle.0
                ))
            })?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut allocation.words);
        Ok(&mut bytes[offset..end])
    }
}

enum Command {
    Launch {
        index: usize,
        kind: KernelKind,
        config: LaunchConfig,
        args: Vec<KernelArg<SimHandle>>,
    },
}

/// Emulated accelerator
pub struct SimBackend {
    config: SimConfig,
    memory: SimMemory,
    queue: VecDeque<Command>,
    next_id: u64,
    enqueued: usize,
}

impl std::fmt::Debug for SimBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBackend")
            .field("config", &self.config)
            .field("allocations", &self.memory.allocations.len())
            .field("backed_bytes", &self.memory.backed_bytes)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimBackend {
    pub fn new(config: SimConfig) -> Self {
        tracing::debug!(
            "SimBackend '{}' created: capacity={} bytes, lazy_backing={}",
            config.name,
            config.capacity,
            config.lazy_backing
        );
        let memory = SimMemory {
            allocations: HashMap::new(),
            capacity: config.capacity,
            backed_bytes: 0,
            counters: Arc::new(Counters::default()),
        };
        SimBackend {
            config,
            memory,
            queue: VecDeque::new(),
            next_id: 1,
            enqueued: 0,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Counter view that stays valid after the backend is moved
    pub fn monitor(&self) -> SimMonitor {
        SimMonitor {
            counters: Arc::clone(&self.memory.counters),
        }
    }

    pub fn stats(&self) -> SimStats {
        self.memory.counters.snapshot()
    }

    pub fn launch_log(&self) -> Vec<LaunchRecord> {
        self.memory.counters.launch_log()
    }

    /// Bytes currently backed
    pub fn bytes_in_use(&self) -> usize {
        self.memory.backed_bytes
    }

    /// Number of live allocations, backed or not
    pub fn live_allocations(&self) -> usize {
        self.memory.allocations.len()
    }

    /// Commands waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn drain(&mut self) -> BackendResult<()> {
        while let Some(command) = self.queue.pop_front() {
            match command {
                Command::Launch { index, kind, config, args } => {
                    let executed = if self.config.fail_execute_at == Some(index) {
                        Err(BackendError::KernelLaunchFailed(format!(
                            "injected fault executing launch {} ('{}')",
                            index,
                            kind.symbol()
                        )))
                    } else {
                        kernels::execute(kind, &config, &args, &mut self.memory)
                    };
                    if let Err(e) = executed {
                        tracing::error!("SimBackend: kernel '{}' failed: {}", kind.symbol(), e);
                        self.queue.clear();
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }
}

impl ComputeBackend for SimBackend {
    type Buffer = SimHandle;
    type Kernel = SimKernel;

    fn name(&self) -> &str {
        &self.config.name
    }

    fn limits(&self) -> &DeviceLimits {
        &self.config.limits
    }

    fn raw_alloc(&mut self, bytes: usize) -> BackendResult<SimHandle> {
        Counters::bump(&self.memory.counters.raw_alloc_calls);
        if !self.config.lazy_backing {
            self.memory.reserve(bytes)?;
        }

        let handle = SimHandle(self.next_id);
        self.next_id += 1;
        let backed = !self.config.lazy_backing;
        let words = if backed { vec![0u64; bytes.div_ceil(8)] } else { Vec::new() };
        self.memory.allocations.insert(
            handle.0,
            Allocation {
                size: bytes,
                words,
                backed,
            },
        );
        tracing::trace!("SimBackend::raw_alloc: {} bytes -> buffer {}", bytes, handle.0);
        Ok(handle)
    }

    fn raw_release(&mut self, buffer: SimHandle) -> BackendResult<()> {
        Counters::bump(&self.memory.counters.raw_release_calls);
        let allocation = self
            .memory
            .allocations
            .remove(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("sim buffer {}", buffer.0)))?;
        if allocation.backed {
            self.memory.backed_bytes -= allocation.size;
            self.memory
                .counters
                .bytes_in_use
                .store(self.memory.backed_bytes, Ordering::Relaxed);
        }
        Ok(())
    }

    fn write(&mut self, dst: &SimHandle, offset: usize, data: &[u8]) -> BackendResult<()> {
        Counters::bump(&self.memory.counters.writes);
        self.drain()?;
        self.memory
            .bytes_mut(*dst, offset, data.len())?
            .copy_from_slice(data);
        Ok(())
    }

    fn read(&mut self, src: &SimHandle, offset: usize, out: &mut [u8]) -> BackendResult<()> {
        Counters::bump(&self.memory.counters.reads);
        self.drain()?;
        out.copy_from_slice(self.memory.bytes_mut(*src, offset, out.len())?);
        Ok(())
    }

    fn kernel(&mut self, kind: KernelKind) -> BackendResult<SimKernel> {
        Counters::bump(&self.memory.counters.kernel_resolves);
        Ok(SimKernel { kind })
    }

    fn launch(
        &mut self,
        kernel: &SimKernel,
        config: &LaunchConfig,
        args: &[KernelArg<SimHandle>],
    ) -> BackendResult<()> {
        let index = self.enqueued;
        self.enqueued += 1;
        if self.config.fail_launch_at == Some(index) {
            return Err(BackendError::KernelLaunchFailed(format!(
                "injected failure at launch {} ('{}')",
                index,
                kernel.kind.symbol()
            )));
        }

        self.config.limits.validate(config)?;
        for arg in args {
            if let KernelArg::Buffer(handle) = arg {
                self.memory.allocation(*handle)?;
            }
        }

        Counters::bump(&self.memory.counters.launches);
        self.memory
            .counters
            .launch_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LaunchRecord {
                kernel: kernel.kind.symbol(),
                grid: config.grid,
                block: config.block,
                shared_mem_bytes: config.shared_mem_bytes,
            });

        self.queue.push_back(Command::Launch {
            index,
            kind: kernel.kind,
            config: *config,
            args: args.to_vec(),
        });
        Ok(())
    }

    fn finish(&mut self) -> BackendResult<()> {
        Counters::bump(&self.memory.counters.finishes);
        self.drain()
    }
}
