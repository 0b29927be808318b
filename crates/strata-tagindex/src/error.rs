//! Error types for tag index operations.

use strata_core::{CoreError, Digest};
use strata_retry::EngineError;
use thiserror::Error;

/// Primary error type for tag index operations.
#[derive(Debug, Error)]
pub enum TagIndexError {
    /// Tag is not present on disk or in the backend.
    #[error("tag not found")]
    TagNotFound,
    /// A dependency of the tag is missing from the origin cluster.
    #[error("missing dependency {digest}")]
    MissingDependency {
        /// Digest the origin could not stat.
        digest: Digest,
    },
    /// A digest failed to parse.
    #[error("invalid digest")]
    InvalidDigest {
        /// Underlying parse failure.
        #[source]
        source: CoreError,
    },
    /// The on-disk cache failed.
    #[error("tag cache failure")]
    Cache {
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A cached entry could not be decoded.
    #[error("corrupt cache entry for tag {tag:?}")]
    CorruptEntry {
        /// Tag whose entry failed to decode.
        tag: String,
        /// Underlying decode failure.
        #[source]
        source: CoreError,
    },
    /// The backend failed for a reason other than absence.
    #[error("backend failure")]
    Backend {
        /// Underlying backend failure.
        #[source]
        source: anyhow::Error,
    },
    /// The origin cluster failed.
    #[error("origin cluster failure")]
    Origin {
        /// Underlying origin failure.
        #[source]
        source: anyhow::Error,
    },
    /// A manifest blob could not be parsed.
    #[error("invalid image manifest for tag {tag:?}")]
    InvalidManifest {
        /// Tag whose manifest failed to parse.
        tag: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// The retry engine rejected a submission.
    #[error("retry engine failure")]
    Engine {
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },
}

impl From<EngineError> for TagIndexError {
    fn from(source: EngineError) -> Self {
        Self::Engine { source }
    }
}

/// Convenience alias for tag index results.
pub type TagIndexResult<T> = Result<T, TagIndexError>;
