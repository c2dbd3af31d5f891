//! Raw device pointers handed out by the HIP backend

use std::ffi::c_void;

// SAFETY: the pointer is an opaque device address; it is never dereferenced on the host
unsafe impl Send for HipDevicePtr {}
unsafe impl Sync for HipDevicePtr {}

/// A `hipMalloc` block
///
/// Plain handle with no ownership: the allocator decides when it is
/// returned to the driver through `raw_release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HipDevicePtr {
    ptr: *mut c_void,
    size: usize,
}

impl HipDevicePtr {
    pub(super) fn new(ptr: *mut c_void, size: usize) -> Self {
        HipDevicePtr { ptr, size }
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Address `offset` bytes into the block, if the range `offset..offset + len` fits
    pub(super) fn at(&self, offset: usize, len: usize) -> Option<*mut c_void> {
        let end = offset.checked_add(len)?;
        if end > self.size {
            return None;
        }
        Some((self.ptr as usize + offset) as *mut c_void)
    }

    /// Kernel parameter value: the device address as 64 bits
    pub(super) fn param_bits(&self) -> u64 {
        self.ptr as usize as u64
    }
}
