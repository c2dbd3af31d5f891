//! HIP FFI bindings
//!
//! Only the runtime entry points the statistics backend calls are declared.

use std::ffi::c_void;

#[link(name = "amdhip64")]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipGetDeviceProperties(props: *mut super::device::HipDeviceProp, deviceId: i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipMemcpyAsync(
        dst: *mut c_void,
        src: *const c_void,
        count: usize,
        kind: i32,
        stream: *mut c_void,
    ) -> i32;
    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
    pub fn hipModuleLoad(module: *mut *mut c_void, path: *const i8) -> i32;
    pub fn hipModuleUnload(module: *mut c_void) -> i32;
    pub fn hipModuleGetFunction(func: *mut *mut c_void, module: *mut c_void, name: *const i8) -> i32;
    pub fn hipModuleLaunchKernel(
        func: *mut c_void,
        gridDimX: u32,
        gridDimY: u32,
        gridDimZ: u32,
        blockDimX: u32,
        blockDimY: u32,
        blockDimZ: u32,
        sharedMemBytes: u32,
        stream: *mut c_void,
        kernelParams: *mut *mut c_void,
        extra: *mut *mut c_void,
    ) -> i32;
    pub fn hipGetLastError() -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
}

/// HIP memory copy kinds
pub const HIP_MEMCPY_HOST_TO_DEVICE: i32 = 1;
pub const HIP_MEMCPY_DEVICE_TO_HOST: i32 = 2;

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// `hipErrorOutOfMemory` (alias `hipErrorMemoryAllocation`)
pub const HIP_ERROR_OUT_OF_MEMORY: i32 = 2;
