//! Backend storage seam.
//!
//! Backends are durable remote stores (S3-like) reached through adapters the
//! outer services provide; the core only needs the three calls the tag store
//! and write-back executor make. Clients are bound to namespace patterns and
//! resolved first-match-wins.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use strata_core::BlobInfo;
use thiserror::Error;

/// Failures surfaced by backend adapters.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The named entry does not exist.
    #[error("backend entry not found")]
    NotFound,
    /// The backend could not be reached or failed the request.
    #[error("backend unavailable")]
    Unavailable {
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
}

impl BackendError {
    /// Wrap a transport-level failure.
    #[must_use]
    pub fn unavailable(source: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable {
            source: source.into(),
        }
    }
}

/// A durable remote tag/blob store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Report size information for an entry.
    ///
    /// # Errors
    ///
    /// `NotFound` if the entry is absent; `Unavailable` otherwise.
    async fn stat(&self, name: &str) -> Result<BlobInfo, BackendError>;

    /// Fetch an entry's content.
    ///
    /// # Errors
    ///
    /// `NotFound` if the entry is absent; `Unavailable` otherwise.
    async fn download(&self, name: &str) -> Result<Vec<u8>, BackendError>;

    /// Store an entry's content.
    ///
    /// # Errors
    ///
    /// `Unavailable` on failure. Overwrites are allowed.
    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<(), BackendError>;
}

/// Namespace-pattern routing to backend clients, immutable after startup.
#[derive(Default)]
pub struct BackendManager {
    bindings: Vec<(Regex, Arc<dyn Backend>)>,
}

impl BackendManager {
    /// An empty manager; every namespace is unconfigured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a namespace pattern to a backend client.
    ///
    /// # Errors
    ///
    /// Returns the regex compile failure for a bad pattern.
    pub fn bind(mut self, pattern: &str, backend: Arc<dyn Backend>) -> Result<Self, regex::Error> {
        let pattern = Regex::new(pattern)?;
        self.bindings.push((pattern, backend));
        Ok(self)
    }

    /// Resolve the backend for a namespace; first match wins.
    #[must_use]
    pub fn get(&self, namespace: &str) -> Option<Arc<dyn Backend>> {
        self.bindings
            .iter()
            .find(|(pattern, _)| pattern.is_match(namespace))
            .map(|(_, backend)| Arc::clone(backend))
    }
}
