//! HIP device properties and device selection

use std::ffi::CStr;

use crate::backend::hip_backend::ffi;
use crate::backend::{BackendError, BackendResult, DeviceClass, DeviceLimits};

/// Opaque `hipDeviceProp_t`, exactly `sizeof(hipDeviceProp_t)` bytes for ROCm 6.x/7.x
///
/// Fields are read at fixed offsets; only the ones needed for launch limits
/// and device selection are exposed.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct HipDeviceProp {
    buffer: [u8; 1472],
}

impl Default for HipDeviceProp {
    fn default() -> Self {
        HipDeviceProp { buffer: [0u8; 1472] }
    }
}

impl HipDeviceProp {
    const NAME_OFFSET: usize = 0;
    const NAME_LEN: usize = 256;
    // name[256], uuid(16), luid[8], luidDeviceNodeMask(4), 4 bytes padding
    const TOTAL_GLOBAL_MEM_OFFSET: usize = 288;
    const SHARED_MEM_PER_BLOCK_OFFSET: usize = 296;
    const WARP_SIZE_OFFSET: usize = 308;
    const MAX_THREADS_PER_BLOCK_OFFSET: usize = 320;
    const MAX_THREADS_DIM_OFFSET: usize = 324;
    const MAX_GRID_SIZE_OFFSET: usize = 336;

    fn read_i32(&self, offset: usize, fallback: i32) -> i32 {
        self.buffer[offset..offset + 4]
            .try_into()
            .map(i32::from_ne_bytes)
            .unwrap_or(fallback)
    }

    fn read_u64(&self, offset: usize, fallback: u64) -> u64 {
        self.buffer[offset..offset + 8]
            .try_into()
            .map(u64::from_ne_bytes)
            .unwrap_or(fallback)
    }

    fn read_i32x3(&self, offset: usize, fallback: i32) -> [i32; 3] {
        [0, 1, 2].map(|i| self.read_i32(offset + i * 4, fallback))
    }

    /// Device name (null-terminated C string)
    pub fn name(&self) -> String {
        let bytes = &self.buffer[Self::NAME_OFFSET..Self::NAME_OFFSET + Self::NAME_LEN];
        let len = bytes.iter().position(|&c| c == 0).unwrap_or(Self::NAME_LEN);
        String::from_utf8_lossy(&bytes[..len]).into_owned()
    }

    pub fn total_global_mem(&self) -> u64 {
        self.read_u64(Self::TOTAL_GLOBAL_MEM_OFFSET, 0)
    }

    pub fn shared_mem_per_block(&self) -> u64 {
        self.read_u64(Self::SHARED_MEM_PER_BLOCK_OFFSET, 65536)
    }

    /// Wavefront size: 32 for RDNA, 64 for CDNA
    pub fn warp_size(&self) -> i32 {
        self.read_i32(Self::WARP_SIZE_OFFSET, 32)
    }

    pub fn max_threads_per_block(&self) -> i32 {
        self.read_i32(Self::MAX_THREADS_PER_BLOCK_OFFSET, 1024)
    }

    pub fn max_threads_dim(&self) -> [i32; 3] {
        self.read_i32x3(Self::MAX_THREADS_DIM_OFFSET, 1024)
    }

    pub fn max_grid_size(&self) -> [i32; 3] {
        self.read_i32x3(Self::MAX_GRID_SIZE_OFFSET, 65535)
    }

    /// Launch limits as seen by the reduction core
    pub fn limits(&self) -> DeviceLimits {
        let to_u32 = |dims: [i32; 3]| dims.map(|d| d.max(0) as u32);
        DeviceLimits {
            max_threads_per_block: self.max_threads_per_block().max(0) as u32,
            max_grid_size: to_u32(self.max_grid_size()),
            max_threads_dim: to_u32(self.max_threads_dim()),
            shared_mem_per_block: self.shared_mem_per_block().min(u32::MAX as u64) as u32,
            warp_size: self.warp_size().max(1) as u32,
            class: DeviceClass::Gpu,
        }
    }
}

/// Selected HIP device
#[derive(Debug, Clone)]
pub struct HipDevice {
    pub device_id: i32,
    pub name: String,
    pub memory: usize,
    pub props: HipDeviceProp,
}

impl HipDevice {
    /// Pick the device with the most global memory (likely the discrete GPU)
    pub fn detect() -> BackendResult<Self> {
        let mut count: i32 = 0;
        let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        if result != ffi::HIP_SUCCESS || count == 0 {
            return Err(BackendError::DeviceNotFound);
        }

        let mut best: Option<(i32, HipDeviceProp)> = None;
        for device_id in 0..count {
            let props = match Self::properties(device_id) {
                Ok(props) => props,
                Err(e) => {
                    tracing::warn!("Skipping device {}: {}", device_id, e);
                    continue;
                }
            };
            tracing::debug!(
                "Device {}: {} - {}MB VRAM",
                device_id,
                props.name(),
                props.total_global_mem() / (1024 * 1024)
            );
            let better = best
                .as_ref()
                .map_or(true, |(_, b)| props.total_global_mem() > b.total_global_mem());
            if better {
                best = Some((device_id, props));
            }
        }

        let (device_id, props) = best.ok_or(BackendError::DeviceNotFound)?;
        Ok(HipDevice {
            device_id,
            name: props.name(),
            memory: props.total_global_mem() as usize,
            props,
        })
    }

    pub fn properties(device_id: i32) -> BackendResult<HipDeviceProp> {
        let mut props = HipDeviceProp::default();
        let result = unsafe { ffi::hipGetDeviceProperties(&mut props, device_id) };
        check(result, "hipGetDeviceProperties").map_err(|e| BackendError::DeviceError(e.to_string()))?;
        Ok(props)
    }

    /// Make this device current for the calling thread
    pub fn activate(&self) -> BackendResult<()> {
        let result = unsafe { ffi::hipSetDevice(self.device_id) };
        check(result, "hipSetDevice").map_err(|e| BackendError::DeviceError(e.to_string()))
    }
}

/// HIP error string for an error code
pub fn get_error_string(error: i32) -> String {
    unsafe {
        let error_ptr = ffi::hipGetErrorString(error);
        if error_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().into_owned()
        }
    }
}

/// Map a HIP status code to `Ok(())` or a described error
pub(super) fn check(code: i32, what: &str) -> Result<(), HipStatus> {
    if code == ffi::HIP_SUCCESS {
        Ok(())
    } else {
        Err(HipStatus {
            code,
            call: what.to_string(),
        })
    }
}

/// A failed HIP call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HipStatus {
    pub code: i32,
    pub call: String,
}

impl std::fmt::Display for HipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {} (code {})", self.call, get_error_string(self.code), self.code)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_prop_size() {
        assert_eq!(std::mem::size_of::<HipDeviceProp>(), 1472);
    }

    #[test]
    fn test_limits_from_raw_props() {
        let mut props = HipDeviceProp::default();
        props.buffer[..4].copy_from_slice(b"gfx\0");
        props.buffer[320..324].copy_from_slice(&1024i32.to_ne_bytes());
        props.buffer[308..312].copy_from_slice(&64i32.to_ne_bytes());
        props.buffer[296..304].copy_from_slice(&65536u64.to_ne_bytes());
        for i in 0..3 {
            let at = 324 + i * 4;
            props.buffer[at..at + 4].copy_from_slice(&1024i32.to_ne_bytes());
            let at = 336 + i * 4;
            props.buffer[at..at + 4].copy_from_slice(&65535i32.to_ne_bytes());
        }

        let limits = props.limits();
        assert_eq!(props.name(), "gfx");
        assert_eq!(limits.max_threads_per_block, 1024);
        assert_eq!(limits.warp_size, 64);
        assert_eq!(limits.shared_mem_per_block, 65536);
        assert_eq!(limits.max_grid_size, [65535; 3]);
        assert_eq!(limits.class, DeviceClass::Gpu);
    }
}
