//! Fatal error kind for the reconciliation core.

use floatip_common::FipError;
use thiserror::Error;

/// A failure the daemon cannot recover from in-process.
///
/// The control loop stops, the chains are drained on a best-effort basis and
/// the process exits with a non-zero status.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct FatalError {
    /// What the core was doing, e.g. `"insert forward rule 10.0.0.5 -> 10.0.0.10"`
    pub operation: String,
    #[source]
    pub source: FipError,
}

impl FatalError {
    pub fn new(operation: impl Into<String>, source: FipError) -> Self {
        Self {
            operation: operation.into(),
            source,
        }
    }
}

/// Result type for core operations that abort the daemon on failure.
pub type FatalResult<T> = Result<T, FatalError>;

/// Attaches an operation name to a [`FipError`], making it fatal.
pub trait OrFatal<T> {
    fn or_fatal(self, operation: impl FnOnce() -> String) -> FatalResult<T>;
}

impl<T> OrFatal<T> for Result<T, FipError> {
    fn or_fatal(self, operation: impl FnOnce() -> String) -> FatalResult<T> {
        self.map_err(|source| FatalError::new(operation(), source))
    }
}
