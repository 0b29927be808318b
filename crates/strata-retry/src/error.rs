//! Error types for engine operations.

use thiserror::Error;

use crate::store::StoreError;

/// Primary error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The task store failed.
    #[error("task store operation failed")]
    Store {
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
    /// A synchronous execution failed.
    #[error("synchronous task execution failed")]
    Exec {
        /// Underlying executor failure.
        #[source]
        source: anyhow::Error,
    },
}

impl From<StoreError> for EngineError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;
