//! Dependency resolution: `(tag, digest)` to the blobs the tag requires.

use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use strata_config::{ResolverKind, ResolverRule};
use strata_core::Digest;

use crate::error::{TagIndexError, TagIndexResult};
use crate::origin::{OriginCluster, OriginError};

/// Image manifest subset the docker resolver reads (schema 2).
#[derive(Debug, Deserialize)]
struct Manifest {
    config: Descriptor,
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: Digest,
}

/// Ordered list of `(namespace pattern, resolver)` pairs; first match wins.
pub struct DependencyResolver {
    rules: Vec<(Regex, ResolverKind)>,
    origin: Arc<dyn OriginCluster>,
}

impl DependencyResolver {
    /// Compile the configured rules.
    ///
    /// # Errors
    ///
    /// Returns the regex compile failure for a bad pattern. Unknown resolver
    /// kinds are unrepresentable; configuration parsing already rejected
    /// them.
    pub fn new(
        rules: &[ResolverRule],
        origin: Arc<dyn OriginCluster>,
    ) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|rule| Ok((Regex::new(&rule.namespace)?, rule.kind)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules, origin })
    }

    /// Resolve a tag write into its ordered dependency list.
    ///
    /// Tags outside every configured namespace depend only on their own
    /// digest.
    ///
    /// # Errors
    ///
    /// Returns `MissingDependency` when the manifest blob is absent from the
    /// origin, `InvalidManifest` when it does not parse, and `Origin` on
    /// transport failures.
    pub async fn resolve(&self, tag: &str, digest: Digest) -> TagIndexResult<Vec<Digest>> {
        let kind = self
            .rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(tag))
            .map_or(ResolverKind::Default, |(_, kind)| *kind);

        match kind {
            ResolverKind::Default => Ok(vec![digest]),
            ResolverKind::Docker => self.resolve_docker(tag, digest).await,
        }
    }

    /// Layers first, then the config blob, then the manifest itself: the
    /// manifest must be uploaded last so everything it references already
    /// exists remotely.
    async fn resolve_docker(&self, tag: &str, digest: Digest) -> TagIndexResult<Vec<Digest>> {
        let raw = self
            .origin
            .download_blob(tag, &digest)
            .await
            .map_err(|err| match err {
                OriginError::BlobNotFound { digest } => TagIndexError::MissingDependency { digest },
                OriginError::Unavailable { source } => TagIndexError::Origin { source },
            })?;

        let manifest: Manifest =
            serde_json::from_slice(&raw).map_err(|source| TagIndexError::InvalidManifest {
                tag: tag.to_string(),
                source,
            })?;

        let mut deps: Vec<Digest> = manifest
            .layers
            .into_iter()
            .map(|layer| layer.digest)
            .collect();
        deps.push(manifest.config.digest);
        deps.push(digest);
        Ok(deps)
    }
}
