//! Code-object modules and kernel handles

use std::ffi::CString;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use crate::backend::hip_backend::device::check;
use crate::backend::hip_backend::ffi;
use crate::backend::{BackendError, BackendResult};

// SAFETY: module handles are immutable after load and HIP module calls are thread-safe
unsafe impl Send for HipModule {}
unsafe impl Sync for HipModule {}

/// A loaded HSACO code object
#[derive(Debug)]
pub struct HipModule {
    module: *mut std::ffi::c_void,
    path: String,
}

impl HipModule {
    /// Load a code object from disk
    pub fn load(path: &str) -> BackendResult<Self> {
        if !Path::new(path).exists() {
            return Err(BackendError::KernelLoadFailed(format!("HSACO not found: {}", path)));
        }
        let path_cstr = CString::new(path)
            .map_err(|e| BackendError::KernelLoadFailed(format!("Invalid path string: {}", e)))?;

        let mut module: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipModuleLoad(&mut module, path_cstr.as_ptr()) };
        check(result, "hipModuleLoad").map_err(|e| {
            BackendError::KernelLoadFailed(format!("Failed to load module '{}': {}", path, e))
        })?;

        tracing::debug!("Loaded statistics kernels from {}", path);
        Ok(HipModule {
            module,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.module
    }
}

impl Drop for HipModule {
    fn drop(&mut self) {
        if !self.module.is_null() {
            unsafe {
                ffi::hipModuleUnload(self.module);
            }
        }
    }
}

// SAFETY: function handles are immutable; the module they point into is kept alive by `_module`
unsafe impl Send for HipKernel {}
unsafe impl Sync for HipKernel {}

/// A kernel function resolved from a [`HipModule`]
#[derive(Debug)]
pub struct HipKernel {
    func: *mut std::ffi::c_void,
    name: String,
    _module: Arc<HipModule>,
}

impl HipKernel {
    pub fn from_module(module: &Arc<HipModule>, kernel_name: &str) -> BackendResult<Self> {
        let name_cstr = CString::new(kernel_name)
            .map_err(|e| BackendError::KernelLoadFailed(format!("Invalid kernel name: {}", e)))?;

        let mut func: *mut std::ffi::c_void = ptr::null_mut();
        let result =
            unsafe { ffi::hipModuleGetFunction(&mut func, module.as_ptr(), name_cstr.as_ptr()) };
        check(result, "hipModuleGetFunction").map_err(|e| {
            BackendError::KernelLoadFailed(format!("Failed to get kernel '{}': {}", kernel_name, e))
        })?;

        Ok(HipKernel {
            func,
            name: kernel_name.to_string(),
            _module: Arc::clone(module),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.func
    }
}
