//! The on-disk tag cache.
//!
//! One file per tag holding the digest's text form, plus a persist marker
//! that records "a write-back still owes this entry to the backend". Writes
//! go through a temp file and a rename so concurrent writers and readers
//! never observe a torn entry; a replacement write for the same tag simply
//! lands a new digest over the old one.

use std::io;
use std::path::{Path, PathBuf};

use rand::RngCore;
use strata_core::Digest;

use crate::error::{TagIndexError, TagIndexResult};
use crate::tagpath;

const ENTRY_SUFFIX: &str = ".tag";
const PERSIST_SUFFIX: &str = ".persist";

/// File-per-tag cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct TagCache {
    dir: PathBuf,
}

impl TagCache {
    /// Open the cache, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> TagIndexResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(cache_err)?;
        Ok(Self { dir })
    }

    /// Cache key for a tag; also the name carried by write-back tasks.
    #[must_use]
    pub fn key_for(tag: &str) -> String {
        tagpath::encode(tag)
    }

    /// Write a tag entry and set its persist marker.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn write(&self, tag: &str, digest: &Digest) -> TagIndexResult<()> {
        let key = Self::key_for(tag);
        let entry = self.entry_path(&key);
        let tmp = self.dir.join(format!("{key}.tmp{:016x}", rand::rng().next_u64()));

        std::fs::write(&tmp, digest.to_string()).map_err(cache_err)?;
        std::fs::rename(&tmp, &entry).map_err(cache_err)?;
        std::fs::write(self.persist_path(&key), b"").map_err(cache_err)?;
        Ok(())
    }

    /// Read a tag entry. A missing entry is `None`, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the entry does not decode.
    pub fn read(&self, tag: &str) -> TagIndexResult<Option<Digest>> {
        let key = Self::key_for(tag);
        match std::fs::read_to_string(self.entry_path(&key)) {
            Ok(content) => {
                let digest =
                    content
                        .trim()
                        .parse()
                        .map_err(|source| TagIndexError::CorruptEntry {
                            tag: tag.to_string(),
                            source,
                        })?;
                Ok(Some(digest))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(cache_err(err)),
        }
    }

    /// Read the raw entry bytes by cache key.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn read_raw(&self, key: &str) -> TagIndexResult<Option<Vec<u8>>> {
        match std::fs::read(self.entry_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(cache_err(err)),
        }
    }

    /// Whether the persist marker is still set for a cache key.
    #[must_use]
    pub fn has_persist(&self, key: &str) -> bool {
        self.persist_path(key).exists()
    }

    /// Clear the persist marker once the backend confirms durability.
    /// Clearing an absent marker is a success.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn clear_persist(&self, key: &str) -> TagIndexResult<()> {
        match std::fs::remove_file(self.persist_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(cache_err(err)),
        }
    }

    /// All cached tags starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned.
    pub fn list(&self, prefix: &str) -> TagIndexResult<Vec<String>> {
        let mut tags = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(cache_err)? {
            let entry = entry.map_err(cache_err)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(key) = name.strip_suffix(ENTRY_SUFFIX) else {
                continue;
            };
            let Ok(tag) = tagpath::decode(key) else {
                continue;
            };
            if tag.starts_with(prefix) {
                tags.push(tag);
            }
        }
        tags.sort();
        Ok(tags)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{ENTRY_SUFFIX}"))
    }

    fn persist_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{PERSIST_SUFFIX}"))
    }

    /// Root directory of the cache.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn cache_err(source: io::Error) -> TagIndexError {
    TagIndexError::Cache { source }
}
