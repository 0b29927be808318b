//! Translation of core errors into HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::TagIndexError;

/// Status-plus-cause wrapper every handler returns on failure.
#[derive(Debug)]
pub struct HandlerError {
    status: StatusCode,
    cause: String,
}

impl HandlerError {
    /// Build an error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, cause: impl Into<String>) -> Self {
        Self {
            status,
            cause: cause.into(),
        }
    }

    /// 400 with a cause.
    #[must_use]
    pub fn bad_request(cause: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, cause)
    }

    /// 404 with a cause.
    #[must_use]
    pub fn not_found(cause: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, cause)
    }
}

impl From<TagIndexError> for HandlerError {
    fn from(err: TagIndexError) -> Self {
        let status = match err {
            TagIndexError::TagNotFound => StatusCode::NOT_FOUND,
            TagIndexError::MissingDependency { .. } | TagIndexError::InvalidDigest { .. } => {
                StatusCode::BAD_REQUEST
            }
            TagIndexError::Cache { .. }
            | TagIndexError::CorruptEntry { .. }
            | TagIndexError::Backend { .. }
            | TagIndexError::Origin { .. }
            | TagIndexError::InvalidManifest { .. }
            | TagIndexError::Engine { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.cause })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Digest;

    #[test]
    fn core_errors_map_to_expected_statuses() {
        let not_found: HandlerError = TagIndexError::TagNotFound.into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let missing: HandlerError = TagIndexError::MissingDependency {
            digest: Digest::compute(b"dep"),
        }
        .into();
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);

        let backend: HandlerError = TagIndexError::Backend {
            source: anyhow::anyhow!("boom"),
        }
        .into();
        assert_eq!(backend.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
