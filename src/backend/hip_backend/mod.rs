//! ROCm/HIP backend for AMD GPUs
//!
//! Kernels come from `kernels/statistics.hip`, compiled to an HSACO by
//! `build.rs` and loaded lazily on first use.

mod backend;
mod device;
mod ffi;
mod memory;
mod module;
mod stream;

pub use backend::{statistics_hsaco_path, HipBackend, STATISTICS_HSACO_ENV};
pub use device::{get_error_string, HipDevice, HipDeviceProp, HipStatus};
pub use memory::HipDevicePtr;
pub use module::{HipKernel, HipModule};
pub use stream::HipStream;
