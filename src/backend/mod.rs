//! Compute backend contract
//!
//! The reduction core needs three things from a device: raw buffer
//! allocation/release, ordered kernel launches with typed arguments, and a
//! queue it can drain. [`ComputeBackend`] is that contract. Two backends ship
//! with the crate:
//!
//! - [`SimBackend`]: a software device that executes launches work-group by
//!   work-group on the host. Used by the test suite and when no GPU is present.
//! - `HipBackend` (feature `rocm`): AMD GPUs through the HIP runtime.

pub mod error;
#[cfg(feature = "rocm")]
pub mod hip_backend;
pub mod sim;

use std::fmt;

pub use crate::reduction::kernels::KernelKind;
pub use error::{BackendError, BackendResult};
#[cfg(feature = "rocm")]
pub use hip_backend::{HipBackend, HipDevicePtr};
pub use sim::{SimBackend, SimConfig, SimHandle, SimMonitor};

/// Broad device class, used to derive default reduction tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceClass {
    /// Discrete or integrated GPU
    #[default]
    Gpu,
    /// Host-emulated device
    Cpu,
}

/// Cached device launch limits
///
/// Queried once when the backend is created and used both to validate launch
/// configurations and to clamp reduction tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum threads per block (e.g., 1024 for AMD GPUs)
    pub max_threads_per_block: u32,
    /// Maximum grid dimensions [x, y, z]
    pub max_grid_size: [u32; 3],
    /// Maximum threads per dimension [x, y, z]
    pub max_threads_dim: [u32; 3],
    /// Shared memory per block in bytes
    pub shared_mem_per_block: u32,
    /// Warp size (wavefront size: 32 for RDNA3, 64 for CDNA3)
    pub warp_size: u32,
    /// Device class for default tunables
    pub class: DeviceClass,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        DeviceLimits {
            max_threads_per_block: 1024,
            max_grid_size: [u32::MAX, 65535, 65535],
            max_threads_dim: [1024, 1024, 1024],
            shared_mem_per_block: 65536,
            warp_size: 32,
            class: DeviceClass::Gpu,
        }
    }
}

impl DeviceLimits {
    /// Largest usable work-group width along x
    pub fn max_group_width(&self) -> u32 {
        self.max_threads_per_block.min(self.max_threads_dim[0])
    }

    /// Validate kernel launch configuration against device limits
    ///
    /// Returns `KernelLaunchFailed` naming the first limit that is exceeded.
    pub fn validate(&self, config: &LaunchConfig) -> BackendResult<()> {
        let (grid, block) = (config.grid, config.block);

        let threads_per_block = block.0 as u64 * block.1 as u64 * block.2 as u64;
        if threads_per_block > self.max_threads_per_block as u64 {
            return Err(BackendError::KernelLaunchFailed(format!(
                "Threads per block {} exceeds limit {} (block={:?})",
                threads_per_block, self.max_threads_per_block, block
            )));
        }

        let block_dims = [block.0, block.1, block.2];
        for (axis, (&dim, &limit)) in block_dims.iter().zip(self.max_threads_dim.iter()).enumerate() {
            if dim == 0 || dim > limit {
                return Err(BackendError::KernelLaunchFailed(format!(
                    "block.{} {} invalid (limit: 1..{})",
                    axis_name(axis),
                    dim,
                    limit
                )));
            }
        }

        let grid_dims = [grid.0, grid.1, grid.2];
        for (axis, (&dim, &limit)) in grid_dims.iter().zip(self.max_grid_size.iter()).enumerate() {
            if dim == 0 || dim > limit {
                return Err(BackendError::KernelLaunchFailed(format!(
                    "grid.{} {} invalid (limit: 1..{})",
                    axis_name(axis),
                    dim,
                    limit
                )));
            }
        }

        if config.shared_mem_bytes > self.shared_mem_per_block as usize {
            return Err(BackendError::KernelLaunchFailed(format!(
                "Shared memory {} bytes exceeds limit {}",
                config.shared_mem_bytes, self.shared_mem_per_block
            )));
        }

        Ok(())
    }
}

fn axis_name(axis: usize) -> &'static str {
    match axis {
        0 => "x",
        1 => "y",
        _ => "z",
    }
}

/// Grid/block geometry of one launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of work-groups per axis
    pub grid: (u32, u32, u32),
    /// Work-group size per axis
    pub block: (u32, u32, u32),
    /// Total on-chip scratch requested through [`KernelArg::LocalScratch`]
    pub shared_mem_bytes: usize,
}

impl LaunchConfig {
    /// One-dimensional launch of `groups` work-groups of `group_size` workers
    pub fn linear(groups: usize, group_size: usize) -> Self {
        LaunchConfig {
            grid: (groups as u32, 1, 1),
            block: (group_size as u32, 1, 1),
            shared_mem_bytes: 0,
        }
    }

    /// Set the scratch total from the launch arguments
    pub fn with_scratch_from<H>(mut self, args: &[KernelArg<H>]) -> Self {
        self.shared_mem_bytes = args.iter().map(KernelArg::scratch_bytes).sum();
        self
    }

    /// Total number of workers in the launch
    pub fn total_threads(&self) -> u64 {
        let groups = self.grid.0 as u64 * self.grid.1 as u64 * self.grid.2 as u64;
        let group = self.block.0 as u64 * self.block.1 as u64 * self.block.2 as u64;
        groups * group
    }
}

/// A typed kernel argument
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArg<H> {
    /// Device buffer handle
    Buffer(H),
    /// Unsigned scalar (element counts, strides)
    U64(u64),
    /// Floating-point scalar (e.g. the centering shift of a second pass)
    F64(f64),
    /// Request for `bytes` of on-chip scratch shared by one work-group
    LocalScratch(usize),
}

impl<H> KernelArg<H> {
    /// Scratch bytes requested by this argument, zero for everything else
    pub fn scratch_bytes(&self) -> usize {
        match self {
            KernelArg::LocalScratch(bytes) => *bytes,
            _ => 0,
        }
    }
}

/// Device operations the reduction core depends on.
///
/// Launches and copies are ordered on a single queue. `launch` only enqueues;
/// `read` and `finish` block until every earlier command has completed.
pub trait ComputeBackend: Send + 'static {
    /// Opaque device buffer handle
    type Buffer: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    /// Compiled kernel handle
    type Kernel: fmt::Debug + Send + 'static;

    /// Human-readable device name for logs and reports
    fn name(&self) -> &str;

    /// Launch limits of the device
    fn limits(&self) -> &DeviceLimits;

    /// Allocate `bytes` of device memory.
    ///
    /// Returns [`BackendError::OutOfMemory`] under allocation pressure.
    fn raw_alloc(&mut self, bytes: usize) -> BackendResult<Self::Buffer>;

    /// Return a buffer to the driver
    fn raw_release(&mut self, buffer: Self::Buffer) -> BackendResult<()>;

    /// Copy host bytes into a device buffer at `offset`
    fn write(&mut self, dst: &Self::Buffer, offset: usize, data: &[u8]) -> BackendResult<()>;

    /// Copy device bytes at `offset` into `out`, blocking until queued work is done
    fn read(&mut self, src: &Self::Buffer, offset: usize, out: &mut [u8]) -> BackendResult<()>;

    /// Resolve a compiled kernel
    fn kernel(&mut self, kind: KernelKind) -> BackendResult<Self::Kernel>;

    /// Enqueue a kernel launch
    fn launch(
        &mut self,
        kernel: &Self::Kernel,
        config: &LaunchConfig,
        args: &[KernelArg<Self::Buffer>],
    ) -> BackendResult<()>;

    /// Block until all enqueued work has completed
    fn finish(&mut self) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_launch_config_within_limits() {
        let limits = DeviceLimits::default();
        let config = LaunchConfig::linear(128, 256);
        assert!(limits.validate(&config).is_ok());
    }

    #[test]
    fn test_validate_launch_config_exceeds_thread_limit() {
        let limits = DeviceLimits::default();
        let config = LaunchConfig::linear(1, 2048);
        let err = limits.validate(&config).unwrap_err();
        assert!(err.to_string().contains("Threads per block"));
    }

    #[test]
    fn test_validate_launch_config_zero_grid_dim() {
        let limits = DeviceLimits::default();
        let config = LaunchConfig::linear(0, 64);
        let err = limits.validate(&config).unwrap_err();
        assert!(err.to_string().contains("grid.x"));
    }

    #[test]
    fn test_validate_launch_config_exceeds_shared_memory() {
        let limits = DeviceLimits {
            shared_mem_per_block: 1024,
            ..DeviceLimits::default()
        };
        let args: Vec<KernelArg<u32>> = vec![KernelArg::U64(7), KernelArg::LocalScratch(2048)];
        let config = LaunchConfig::linear(1, 64).with_scratch_from(&args);
        assert_eq!(config.shared_mem_bytes, 2048);
        let err = limits.validate(&config).unwrap_err();
        assert!(err.to_string().contains("Shared memory"));
    }

    #[test]
    fn test_total_threads() {
        let config = LaunchConfig::linear(12, 64);
        assert_eq!(config.total_threads(), 768);
    }
}
