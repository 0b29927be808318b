//! Blob metadata returned by backend `stat` calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Size and optional metadata for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlobInfo {
    /// Blob size in bytes.
    pub size: u64,
    /// Optional backend-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl BlobInfo {
    /// Construct an entry carrying only a size.
    #[must_use]
    pub const fn sized(size: u64) -> Self {
        Self {
            size,
            metadata: None,
        }
    }
}
