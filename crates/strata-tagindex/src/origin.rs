//! Origin cluster seam.
//!
//! The origin is the cluster-local blob service. The tag index uses it to
//! verify dependencies before accepting a put, to fetch manifest blobs for
//! dependency resolution, and to push blobs toward a remote region's origin
//! during replication.

use async_trait::async_trait;
use strata_core::{BlobInfo, Digest};
use thiserror::Error;

/// Failures surfaced by origin clients.
#[derive(Debug, Error)]
pub enum OriginError {
    /// The blob is not present in the origin cluster.
    #[error("blob {digest} not found in origin")]
    BlobNotFound {
        /// Missing blob.
        digest: Digest,
    },
    /// The origin could not be reached or failed the request.
    #[error("origin unavailable")]
    Unavailable {
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
}

/// Client for the cluster-local blob service.
#[async_trait]
pub trait OriginCluster: Send + Sync {
    /// Report size information for a blob.
    ///
    /// # Errors
    ///
    /// `BlobNotFound` if absent; `Unavailable` otherwise.
    async fn stat(&self, namespace: &str, digest: &Digest) -> Result<BlobInfo, OriginError>;

    /// Fetch a blob's content.
    ///
    /// # Errors
    ///
    /// `BlobNotFound` if absent; `Unavailable` otherwise.
    async fn download_blob(&self, namespace: &str, digest: &Digest)
    -> Result<Vec<u8>, OriginError>;

    /// Push a blob to a remote region's origin cluster.
    ///
    /// # Errors
    ///
    /// `Unavailable` on failure; the replication task retries.
    async fn replicate_to_remote(
        &self,
        namespace: &str,
        digest: &Digest,
        remote_dns: &str,
    ) -> Result<(), OriginError>;
}
