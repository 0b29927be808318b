#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Configuration model for the strata coordination core.
//!
//! Configuration is loaded once at process start from a JSON document,
//! validated eagerly, and treated as immutable afterwards. Anything that
//! fails validation is a startup error; nothing re-reads configuration at
//! runtime.

pub mod defaults;
pub mod error;
pub mod model;
pub mod validate;

use std::path::Path;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    BlacklistConfig, DatabaseConfig, LoggingSection, ResolverKind, ResolverRule,
    RetryEngineConfig, SchedulerConfig, StrataConfig, TagIndexConfig,
};

impl StrataConfig {
    /// Load and validate configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any
    /// section fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or fails validation.
    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }
}
