//! rocmstat - aggregate statistics on AMD GPUs
//!
//! Computes sum, mean, variance, standard deviation, skewness and kurtosis of
//! large one-dimensional `f64` arrays that live in device memory. Work is
//! split across many parallel workers whose partial moments are merged with
//! numerically stable pairwise formulas.
//!
//! The runtime is built from:
//! - a tagged, reference-counted device allocator that keeps released blocks
//!   warm for reuse and evicts them under memory pressure ([`memory`])
//! - a two-phase reduction pipeline: chunked partial reduction, then a
//!   single-group tree reduction ([`reduction`])
//! - a backend trait with a software device and, behind the `rocm` feature,
//!   a HIP device ([`backend`])
//!
//! ```rust
//! use rocmstat::{DeviceArray, DeviceContext, SimBackend, StatisticsEngine};
//!
//! let ctx = DeviceContext::new(SimBackend::default());
//! let engine = StatisticsEngine::new(ctx.clone())?;
//! let data = DeviceArray::from_host(&ctx, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])?;
//! assert_eq!(engine.mean(&data)?, 5.0);
//! # Ok::<(), rocmstat::StatError>(())
//! ```

#![allow(clippy::too_many_arguments)] // FFI launch signatures
#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod array;
pub mod backend;
pub mod context;
pub mod error;
pub mod logging;
pub mod memory;
pub mod reduction;

pub use array::DeviceArray;
pub use backend::{
    BackendError, ComputeBackend, DeviceClass, DeviceLimits, SimBackend, SimConfig, SimMonitor,
};
#[cfg(feature = "rocm")]
pub use backend::HipBackend;
pub use context::{ContextConfig, DeviceContext};
pub use error::{ErrorCategory, StatError, StatResult};
pub use logging::{init_logging_default, init_logging_from_env, LoggingConfig};
pub use memory::{DeviceBuffer, MemorySpace, MemoryStats, Tag};
pub use reduction::{MomentAccumulator, MomentOrder, ReductionTuning, Statistic, StatisticsEngine};
