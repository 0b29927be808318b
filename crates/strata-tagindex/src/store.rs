//! The two-level tag store.

use std::sync::Arc;
use std::time::Duration;

use strata_core::Digest;
use strata_data::WriteBackTask;
use strata_retry::Engine;

use crate::backend::{BackendError, BackendManager};
use crate::cache::TagCache;
use crate::error::{TagIndexError, TagIndexResult};

/// Disk-plus-backend tag storage.
///
/// Writes always land on disk first and owe the backend a write-back; reads
/// resolve disk first and fall through to the backend. A backend hit is
/// deliberately not cached back: the disk cache records what this node
/// authored (and still owes the backend), it is not a read accelerator.
pub struct TagStore {
    cache: TagCache,
    backends: Arc<BackendManager>,
    write_back: Engine<WriteBackTask>,
    write_through: bool,
}

impl TagStore {
    /// Assemble the store over its collaborators.
    #[must_use]
    pub const fn new(
        cache: TagCache,
        backends: Arc<BackendManager>,
        write_back: Engine<WriteBackTask>,
        write_through: bool,
    ) -> Self {
        Self {
            cache,
            backends,
            write_back,
            write_through,
        }
    }

    /// Write a tag locally and schedule its backend write-back.
    ///
    /// `delay` defers the upload; neighbor duplicates use it so the
    /// authoritative node uploads first.
    ///
    /// # Errors
    ///
    /// Returns cache failures, write-through executor failures, or engine
    /// submission failures.
    pub async fn put(&self, tag: &str, digest: Digest, delay: Duration) -> TagIndexResult<()> {
        self.cache.write(tag, &digest)?;

        let task = WriteBackTask::new(tag, TagCache::key_for(tag), delay);
        if self.write_through {
            self.write_back.sync_exec(task).await?;
        } else {
            self.write_back.add(task).await?;
        }
        Ok(())
    }

    /// Resolve a tag: disk first, then backend.
    ///
    /// # Errors
    ///
    /// `TagNotFound` when neither level has the tag; decode and transport
    /// failures otherwise.
    pub async fn get(&self, tag: &str) -> TagIndexResult<Digest> {
        if let Some(digest) = self.cache.read(tag)? {
            return Ok(digest);
        }

        let Some(backend) = self.backends.get(tag) else {
            return Err(TagIndexError::TagNotFound);
        };
        match backend.download(tag).await {
            Ok(content) => {
                let text = String::from_utf8_lossy(&content);
                text.trim()
                    .parse()
                    .map_err(|source| TagIndexError::CorruptEntry {
                        tag: tag.to_string(),
                        source,
                    })
            }
            Err(BackendError::NotFound) => Err(TagIndexError::TagNotFound),
            Err(BackendError::Unavailable { source }) => Err(TagIndexError::Backend { source }),
        }
    }

    /// Whether the backend has the tag; the disk cache is not consulted.
    ///
    /// # Errors
    ///
    /// Returns transport failures; an unconfigured namespace reads as
    /// absent.
    pub async fn has(&self, tag: &str) -> TagIndexResult<bool> {
        let Some(backend) = self.backends.get(tag) else {
            return Ok(false);
        };
        match backend.stat(tag).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound) => Ok(false),
            Err(BackendError::Unavailable { source }) => Err(TagIndexError::Backend { source }),
        }
    }

    /// Locally cached tags under a prefix, sorted.
    ///
    /// # Errors
    ///
    /// Returns cache scan failures.
    pub fn list(&self, prefix: &str) -> TagIndexResult<Vec<String>> {
        self.cache.list(prefix)
    }

    /// The underlying disk cache.
    #[must_use]
    pub const fn cache(&self) -> &TagCache {
        &self.cache
    }
}
