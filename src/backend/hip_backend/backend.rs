//! [`ComputeBackend`] over the HIP runtime

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use crate::backend::hip_backend::device::{check, HipDevice};
use crate::backend::hip_backend::ffi;
use crate::backend::hip_backend::memory::HipDevicePtr;
use crate::backend::hip_backend::module::{HipKernel, HipModule};
use crate::backend::hip_backend::stream::HipStream;
use crate::backend::{
    BackendError, BackendResult, ComputeBackend, DeviceLimits, KernelArg, KernelKind, LaunchConfig,
};

/// Environment variable naming the compiled statistics code object
pub const STATISTICS_HSACO_ENV: &str = "ROCMSTAT_STATISTICS_HSACO";

/// Code object path: runtime override first, then the one `build.rs` produced
pub fn statistics_hsaco_path() -> Option<String> {
    std::env::var(STATISTICS_HSACO_ENV)
        .ok()
        .or_else(|| option_env!("ROCMSTAT_STATISTICS_HSACO").map(str::to_string))
}

/// An AMD GPU driven through one HIP stream
#[derive(Debug)]
pub struct HipBackend {
    device: HipDevice,
    stream: HipStream,
    limits: DeviceLimits,
    module_path: Option<String>,
    module: Option<Arc<HipModule>>,
}

impl HipBackend {
    /// Initialize HIP and open the device with the most memory
    pub fn new() -> BackendResult<Self> {
        let result = unsafe { ffi::hipInit(0) };
        check(result, "hipInit").map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let device = HipDevice::detect()?;
        device.activate()?;
        let limits = device.props.limits();

        tracing::info!(
            "HipBackend: device {} ({}), maxThreadsPerBlock={}, maxThreadsDim={:?}, sharedMemPerBlock={} bytes, warpSize={}",
            device.device_id,
            device.name,
            limits.max_threads_per_block,
            limits.max_threads_dim,
            limits.shared_mem_per_block,
            limits.warp_size
        );

        let stream = HipStream::new()?;
        Ok(HipBackend {
            device,
            stream,
            limits,
            module_path: statistics_hsaco_path(),
            module: None,
        })
    }

    /// Load kernels from `path` instead of the default code object
    pub fn with_module_path(mut self, path: impl Into<String>) -> Self {
        self.module_path = Some(path.into());
        self.module = None;
        self
    }

    pub fn device(&self) -> &HipDevice {
        &self.device
    }

    fn module(&mut self) -> BackendResult<Arc<HipModule>> {
        if let Some(module) = &self.module {
            return Ok(Arc::clone(module));
        }
        let path = self.module_path.as_deref().ok_or_else(|| {
            BackendError::KernelLoadFailed(format!(
                "{} not set and crate built without the rocm kernels",
                STATISTICS_HSACO_ENV
            ))
        })?;
        let module = Arc::new(HipModule::load(path)?);
        self.module = Some(Arc::clone(&module));
        Ok(module)
    }

    fn copy_error(e: impl std::fmt::Display) -> BackendError {
        BackendError::MemoryCopyFailed(e.to_string())
    }

    fn range(buffer: &HipDevicePtr, offset: usize, len: usize) -> BackendResult<*mut c_void> {
        buffer.at(offset, len).ok_or_else(|| {
            BackendError::MemoryCopyFailed(format!(
                "range {}..{} outside {}-byte block",
                offset,
                offset.saturating_add(len),
                buffer.size()
            ))
        })
    }
}

/// Kernel parameter storage: every argument the kernels take is 8 bytes wide
fn pack_params(args: &[KernelArg<HipDevicePtr>]) -> Vec<u64> {
    args.iter()
        .filter_map(|arg| match arg {
            KernelArg::Buffer(ptr) => Some(ptr.param_bits()),
            KernelArg::U64(v) => Some(*v),
            KernelArg::F64(v) => Some(v.to_bits()),
            // dynamic shared memory, passed through the launch config
            KernelArg::LocalScratch(_) => None,
        })
        .collect()
}

impl ComputeBackend for HipBackend {
    type Buffer = HipDevicePtr;
    type Kernel = HipKernel;

    fn name(&self) -> &str {
        &self.device.name
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn raw_alloc(&mut self, bytes: usize) -> BackendResult<HipDevicePtr> {
        let mut ptr: *mut c_void = ptr::null_mut();
        let result = unsafe { ffi::hipMalloc(&mut ptr, bytes) };
        if result == ffi::HIP_ERROR_OUT_OF_MEMORY {
            tracing::debug!("hipMalloc: out of memory for {} bytes", bytes);
            return Err(BackendError::OutOfMemory { requested: bytes });
        }
        check(result, "hipMalloc")
            .map_err(|e| BackendError::MemoryAllocationFailed(format!("{} bytes: {}", bytes, e)))?;
        if ptr.is_null() {
            return Err(BackendError::MemoryAllocationFailed(format!(
                "hipMalloc returned null pointer for {} bytes",
                bytes
            )));
        }
        tracing::trace!("hipMalloc: {} bytes at {:?}", bytes, ptr);
        Ok(HipDevicePtr::new(ptr, bytes))
    }

    fn raw_release(&mut self, buffer: HipDevicePtr) -> BackendResult<()> {
        let result = unsafe { ffi::hipFree(buffer.as_ptr()) };
        check(result, "hipFree").map_err(|e| BackendError::DeviceError(e.to_string()))
    }

    fn write(&mut self, dst: &HipDevicePtr, offset: usize, data: &[u8]) -> BackendResult<()> {
        let target = Self::range(dst, offset, data.len())?;
        let result = unsafe {
            ffi::hipMemcpyAsync(
                target,
                data.as_ptr() as *const c_void,
                data.len(),
                ffi::HIP_MEMCPY_HOST_TO_DEVICE,
                self.stream.as_ptr(),
            )
        };
        check(result, "hipMemcpyAsync(HtoD)").map_err(Self::copy_error)?;
        // `data` is borrowed; the copy must land before returning
        self.stream.synchronize()
    }

    fn read(&mut self, src: &HipDevicePtr, offset: usize, out: &mut [u8]) -> BackendResult<()> {
        let source = Self::range(src, offset, out.len())?;
        let result = unsafe {
            ffi::hipMemcpyAsync(
                out.as_mut_ptr() as *mut c_void,
                source,
                out.len(),
                ffi::HIP_MEMCPY_DEVICE_TO_HOST,
                self.stream.as_ptr(),
            )
        };
        check(result, "hipMemcpyAsync(DtoH)").map_err(Self::copy_error)?;
        self.stream.synchronize()
    }

    fn kernel(&mut self, kind: KernelKind) -> BackendResult<HipKernel> {
        let module = self.module()?;
        let kernel = HipKernel::from_module(&module, &kind.symbol())?;
        tracing::debug!("Resolved kernel '{}' from {}", kernel.name(), module.path());
        Ok(kernel)
    }

    fn launch(
        &mut self,
        kernel: &HipKernel,
        config: &LaunchConfig,
        args: &[KernelArg<HipDevicePtr>],
    ) -> BackendResult<()> {
        self.limits.validate(config)?;
        let shared_mem_bytes = u32::try_from(config.shared_mem_bytes).map_err(|_| {
            BackendError::KernelLaunchFailed(format!(
                "Shared memory {} bytes does not fit a launch",
                config.shared_mem_bytes
            ))
        })?;

        let mut params = pack_params(args);
        let mut param_ptrs: Vec<*mut c_void> = params
            .iter_mut()
            .map(|p| p as *mut u64 as *mut c_void)
            .collect();

        tracing::trace!(
            "Launch: kernel={}, grid={:?}, block={:?}, shared={} bytes",
            kernel.name(),
            config.grid,
            config.block,
            shared_mem_bytes
        );

        let (grid, block) = (config.grid, config.block);
        let result = unsafe {
            ffi::hipModuleLaunchKernel(
                kernel.as_ptr(),
                grid.0,
                grid.1,
                grid.2,
                block.0,
                block.1,
                block.2,
                shared_mem_bytes,
                self.stream.as_ptr(),
                param_ptrs.as_mut_ptr(),
                ptr::null_mut(),
            )
        };
        if let Err(e) = check(result, "hipModuleLaunchKernel") {
            tracing::error!(
                "Kernel '{}' launch failed: {} (grid={:?}, block={:?})",
                kernel.name(),
                e,
                grid,
                block
            );
            return Err(BackendError::KernelLaunchFailed(format!(
                "Kernel '{}': {} (grid={:?}, block={:?})",
                kernel.name(),
                e,
                grid,
                block
            )));
        }

        let async_error = unsafe { ffi::hipGetLastError() };
        if let Err(e) = check(async_error, "hipGetLastError") {
            tracing::warn!("Async HIP error pending after '{}': {}", kernel.name(), e);
        }
        Ok(())
    }

    fn finish(&mut self) -> BackendResult<()> {
        self.stream.synchronize()
    }
}
