//! Unified error handling for rocmstat
//!
//! Errors fall into four categories:
//! - User errors (bad input or configuration)
//! - Recoverable errors (device memory pressure)
//! - Backend errors (driver, copy or launch failures)
//! - Internal errors (poisoned locks, broken invariants)
//!
//! Caller misuse that can only come from a bug (negative allocation sizes,
//! double frees, tearing down a non-empty cache) panics instead.

use std::fmt;

use crate::backend::BackendError;
use crate::reduction::Statistic;

/// Unified error type for rocmstat
#[derive(Debug, thiserror::Error)]
pub enum StatError {
    // ========== Backend Errors ==========
    /// Driver, copy or launch failure
    #[error("Backend error: {0}")]
    Backend(BackendError),

    /// Device memory exhausted after every cached block was evicted
    #[error("Device out of memory: {requested} bytes requested and nothing left to evict")]
    OutOfMemory { requested: usize },

    // ========== User Errors ==========
    /// Statistic undefined for this few samples
    #[error("{statistic} needs at least {required} samples, got {actual}")]
    InsufficientSamples {
        statistic: Statistic,
        required: usize,
        actual: usize,
    },

    /// Array was uploaded through a different context than the engine's
    #[error("Array belongs to a different device context")]
    ContextMismatch,

    /// Host-side copy outside a buffer's bounds
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Invalid tunable or context configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Internal Errors ==========
    /// Lock poisoned by a panic on another thread
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl StatError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            StatError::InsufficientSamples { .. }
            | StatError::ContextMismatch
            | StatError::OutOfBounds(_)
            | StatError::InvalidConfiguration(_) => ErrorCategory::User,

            StatError::OutOfMemory { .. } => ErrorCategory::Recoverable,

            StatError::Backend(_) => ErrorCategory::Backend,

            StatError::LockPoisoned(_) | StatError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error is recoverable (temporary condition)
    ///
    /// Out-of-memory clears once the caller drops device arrays; retrying
    /// after that can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Check if this is a user-facing error (actionable by users)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid input or configuration
    User,
    /// Recoverable error - temporary condition
    Recoverable,
    /// Backend error - driver or device failure
    Backend,
    /// Internal error - indicates a bug
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

// Out-of-memory keeps its own variant so callers can match on it without
// digging through the backend error.
impl From<BackendError> for StatError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::OutOfMemory { requested } => StatError::OutOfMemory { requested },
            other => StatError::Backend(other),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StatError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StatError::LockPoisoned(err.to_string())
    }
}

/// Result type for rocmstat operations
pub type StatResult<T> = std::result::Result<T, StatError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_backend_oom_maps_to_out_of_memory() {
        let err: StatError = BackendError::OutOfMemory { requested: 512 }.into();
        assert!(matches!(err, StatError::OutOfMemory { requested: 512 }));
        assert_eq!(err.category(), ErrorCategory::Recoverable);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_backend_failure_category() {
        let err: StatError = BackendError::KernelLaunchFailed("bad grid".to_string()).into();
        assert_eq!(err.category(), ErrorCategory::Backend);
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("bad grid"));
    }

    #[test]
    fn test_insufficient_samples_is_user_error() {
        let err = StatError::InsufficientSamples {
            statistic: Statistic::Variance,
            required: 2,
            actual: 1,
        };
        assert!(err.is_user_error());
        assert_eq!(err.to_string(), "variance needs at least 2 samples, got 1");
    }

    #[test]
    fn test_poison_error_conversion() {
        let lock = std::sync::Arc::new(Mutex::new(0));
        let clone = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();

        let err: StatError = lock.lock().unwrap_err().into();
        assert!(err.is_internal_error());
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Backend.to_string(), "Backend");
        assert_eq!(ErrorCategory::User.to_string(), "User");
    }
}
