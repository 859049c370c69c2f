//! HIP error types

use thiserror::Error;

/// Errors reported by device drivers, execution contexts and launch checks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HipError {
    #[error("HIP initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Device {0} not found")]
    DeviceNotFound(usize),
    #[error("Device error: {0}")]
    DeviceError(String),
    #[error("Device attribute query failed: {0}")]
    AttributeQueryFailed(String),
    #[error("Memory query failed: {0}")]
    MemoryQueryFailed(String),
    /// The driver ran out of device memory. Kept separate from
    /// `ContextCreationFailed` so callers can report memory stats.
    #[error("Out of device memory")]
    OutOfMemory,
    #[error("Context creation failed: {0}")]
    ContextCreationFailed(String),
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),
    /// One or more deferred calls failed during a flush.
    #[error("{failed} deferred call(s) failed during flush: {messages}")]
    FlushFailed { failed: usize, messages: String },
    #[error("Internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for HipError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        HipError::LockPoisoned(format!("Lock poisoned: {}", err))
    }
}

/// HIP result type
pub type HipResult<T> = Result<T, HipError>;

impl HipError {
    /// Folds a list of per-call errors into one `FlushFailed`.
    ///
    /// Returns `Ok(())` for an empty list.
    pub fn aggregate(errors: Vec<HipError>) -> HipResult<()> {
        if errors.is_empty() {
            return Ok(());
        }
        let messages = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(HipError::FlushFailed {
            failed: errors.len(),
            messages,
        })
    }

    /// Check if this error is recoverable (temporary condition)
    ///
    /// Recoverable errors may be retried:
    /// - Temporary device errors (GPU busy, driver resetting)
    /// - Memory exhaustion (may succeed once buffers are returned)
    /// - Failed flushes and launches
    ///
    /// Non-recoverable errors (should NOT be retried):
    /// - DeviceNotFound
    /// - InitializationFailed (HIP runtime broken)
    /// - LockPoisoned (data corruption bug)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HipError::DeviceError(_)
                | HipError::OutOfMemory
                | HipError::MemoryQueryFailed(_)
                | HipError::KernelLaunchFailed(_)
                | HipError::FlushFailed { .. }
        )
    }

    /// Check if this error is permanent (should never retry)
    pub fn is_permanent(&self) -> bool {
        !self.is_recoverable()
    }
}
