//! HTTP clients for peer tag indexes.
//!
//! The same wire surface serves two roles: neighbors in the local cluster
//! (duplicate fan-out) and remote indexes in other regions (replication).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use strata_core::Digest;
use thiserror::Error;

use crate::tagpath;

/// Timeout for cheap lookups (has, origin, duplicates).
const SHORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a put-and-replicate, which fans out on the far side.
const LONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Failures surfaced by tag index clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request could not be sent or the response not read.
    #[error("tag index request failed")]
    Transport {
        /// Underlying transport failure.
        #[source]
        source: reqwest::Error,
    },
    /// The peer answered with an unexpected status.
    #[error("tag index peer answered {status}")]
    Status {
        /// HTTP status received.
        status: StatusCode,
    },
}

impl From<reqwest::Error> for ClientError {
    fn from(source: reqwest::Error) -> Self {
        Self::Transport { source }
    }
}

/// Body of `PUT /internal/duplicate/tags/{tag}/digest/{digest}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicatePutRequest {
    /// Write-back delay applied by the receiving neighbor.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

/// Body of `POST /internal/duplicate/remotes/tags/{tag}/digest/{digest}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicateReplicateRequest {
    /// Resolved dependencies forwarded with the duplicate.
    pub dependencies: Vec<Digest>,
    /// Submission delay applied to the duplicated tasks.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

/// Operations the core invokes on a peer tag index.
#[async_trait]
pub trait TagClient: Send + Sync {
    /// Whether the peer already has the tag.
    ///
    /// # Errors
    ///
    /// Transport failures and unexpected statuses.
    async fn has(&self, tag: &str) -> Result<bool, ClientError>;

    /// The peer's origin cluster DNS name.
    ///
    /// # Errors
    ///
    /// Transport failures and unexpected statuses.
    async fn origin(&self) -> Result<String, ClientError>;

    /// Write the tag on the peer and trigger its own replication fan-out.
    ///
    /// # Errors
    ///
    /// Transport failures and unexpected statuses.
    async fn put_and_replicate(&self, tag: &str, digest: Digest) -> Result<(), ClientError>;

    /// Neighbor fan-out of a local put.
    ///
    /// # Errors
    ///
    /// Transport failures and unexpected statuses.
    async fn duplicate_put(
        &self,
        tag: &str,
        digest: Digest,
        delay: Duration,
    ) -> Result<(), ClientError>;

    /// Neighbor fan-out of a local replicate.
    ///
    /// # Errors
    ///
    /// Transport failures and unexpected statuses.
    async fn duplicate_replicate(
        &self,
        tag: &str,
        digest: Digest,
        dependencies: &[Digest],
        delay: Duration,
    ) -> Result<(), ClientError>;
}

/// Hands out a client for a peer address.
pub trait ClientProvider: Send + Sync {
    /// Build or reuse a client for `addr`.
    fn provide(&self, addr: &str) -> Arc<dyn TagClient>;
}

/// `reqwest`-backed [`TagClient`].
pub struct HttpTagClient {
    base: String,
    http: reqwest::Client,
}

impl HttpTagClient {
    /// Client for a peer address, sharing the given transport.
    #[must_use]
    pub fn new(addr: &str, http: reqwest::Client) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        Self { base, http }
    }

    fn tag_url(&self, tag: &str) -> String {
        format!("{}/tags/{}", self.base, tagpath::encode(tag))
    }
}

#[async_trait]
impl TagClient for HttpTagClient {
    async fn has(&self, tag: &str) -> Result<bool, ClientError> {
        let response = self
            .http
            .get(self.tag_url(tag))
            .timeout(SHORT_TIMEOUT)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ClientError::Status { status }),
        }
    }

    async fn origin(&self) -> Result<String, ClientError> {
        let response = self
            .http
            .get(format!("{}/origin", self.base))
            .timeout(SHORT_TIMEOUT)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(ClientError::Status {
                status: response.status(),
            });
        }
        Ok(response.text().await?)
    }

    async fn put_and_replicate(&self, tag: &str, digest: Digest) -> Result<(), ClientError> {
        let response = self
            .http
            .put(format!(
                "{}/digest/{}?replicate=true",
                self.tag_url(tag),
                digest
            ))
            .timeout(LONG_TIMEOUT)
            .send()
            .await?;
        expect_ok(response.status())
    }

    async fn duplicate_put(
        &self,
        tag: &str,
        digest: Digest,
        delay: Duration,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .put(format!(
                "{}/internal/duplicate/tags/{}/digest/{}",
                self.base,
                tagpath::encode(tag),
                digest
            ))
            .timeout(SHORT_TIMEOUT)
            .json(&DuplicatePutRequest { delay })
            .send()
            .await?;
        expect_ok(response.status())
    }

    async fn duplicate_replicate(
        &self,
        tag: &str,
        digest: Digest,
        dependencies: &[Digest],
        delay: Duration,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!(
                "{}/internal/duplicate/remotes/tags/{}/digest/{}",
                self.base,
                tagpath::encode(tag),
                digest
            ))
            .timeout(SHORT_TIMEOUT)
            .json(&DuplicateReplicateRequest {
                dependencies: dependencies.to_vec(),
                delay,
            })
            .send()
            .await?;
        expect_ok(response.status())
    }
}

const fn expect_ok(status: StatusCode) -> Result<(), ClientError> {
    if matches!(status, StatusCode::OK) {
        Ok(())
    } else {
        Err(ClientError::Status { status })
    }
}

/// Provider that builds [`HttpTagClient`]s over one shared transport.
#[derive(Default)]
pub struct HttpClientProvider {
    http: reqwest::Client,
}

impl HttpClientProvider {
    /// Provider with a fresh transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientProvider for HttpClientProvider {
    fn provide(&self, addr: &str) -> Arc<dyn TagClient> {
        Arc::new(HttpTagClient::new(addr, self.http.clone()))
    }
}
