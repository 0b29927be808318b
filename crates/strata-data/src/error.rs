//! Error types for database setup.

use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for database setup.
#[derive(Debug, Error)]
pub enum DataError {
    /// The database could not be opened.
    #[error("failed to open task database at {path}")]
    Connect {
        /// Path that was being opened.
        path: PathBuf,
        /// Underlying connection failure.
        #[source]
        source: sqlx::Error,
    },
    /// Schema migrations failed to apply.
    #[error("failed to run task database migrations")]
    Migrate {
        /// Underlying migration failure.
        #[source]
        source: sqlx::migrate::MigrateError,
    },
}

/// Convenience alias for database setup results.
pub type DataResult<T> = Result<T, DataError>;
