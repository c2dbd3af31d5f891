//! Backend error types

use thiserror::Error;

/// Errors reported by a compute backend (driver, queue, or launch failures)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The driver could not satisfy an allocation of `requested` bytes.
    ///
    /// This is the only variant the allocator treats as allocation pressure:
    /// it triggers the evict-and-retry loop instead of propagating.
    #[error("Device out of memory: {requested} bytes requested")]
    OutOfMemory { requested: usize },
    #[error("Backend initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Kernel loading failed: {0}")]
    KernelLoadFailed(String),
    #[error("Memory allocation failed: {0}")]
    MemoryAllocationFailed(String),
    #[error("Memory copy failed: {0}")]
    MemoryCopyFailed(String),
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),
    #[error("Invalid buffer handle: {0}")]
    InvalidHandle(String),
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Device error: {0}")]
    DeviceError(String),
}

/// Backend result type
pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    /// True for driver out-of-memory signals
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, BackendError::OutOfMemory { .. })
    }

    /// Check if this error is recoverable (temporary condition)
    ///
    /// Only allocation pressure is recoverable; it is handled locally by
    /// evicting cached blocks. Everything else is a driver or launch fault
    /// that leaves the queue in an unknown state.
    pub fn is_recoverable(&self) -> bool {
        self.is_out_of_memory()
    }

    /// Check if this error is permanent (should never retry)
    pub fn is_permanent(&self) -> bool {
        !self.is_recoverable()
    }
}
