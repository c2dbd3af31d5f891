//! HIP stream wrapper

use std::ptr;

use crate::backend::hip_backend::device::check;
use crate::backend::hip_backend::ffi;
use crate::backend::{BackendError, BackendResult};

// SAFETY: the stream pointer is only used behind the context's state lock
unsafe impl Send for HipStream {}
unsafe impl Sync for HipStream {}

/// The single in-order queue every copy and launch goes through
///
/// Not `Clone`: two owners would both destroy the stream.
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
}

impl HipStream {
    pub fn new() -> BackendResult<Self> {
        let mut stream: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        check(result, "hipStreamCreate")
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        if stream.is_null() {
            return Err(BackendError::InitializationFailed(
                "hipStreamCreate returned null pointer".to_string(),
            ));
        }
        tracing::debug!("HipStream::new: created stream {:?}", stream);
        Ok(HipStream { stream })
    }

    /// Block until all work queued on the stream has completed
    pub fn synchronize(&self) -> BackendResult<()> {
        let result = unsafe { ffi::hipStreamSynchronize(self.stream) };
        check(result, "hipStreamSynchronize").map_err(|e| BackendError::DeviceError(e.to_string()))
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
