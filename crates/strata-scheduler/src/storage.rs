//! Piece storage.
//!
//! The archive owns one [`Torrent`] per info hash. Every piece write is
//! verified against the metadata's per-piece SHA-1 before it touches disk;
//! an accepted piece can never fail re-verification.

use std::collections::HashMap;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use strata_core::{Bitfield, CoreError, InfoHash, MetaInfo, PieceHash};
use thiserror::Error;

/// Failures raised by piece storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Disk I/O failed.
    #[error("piece storage I/O failure")]
    Io {
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Piece arithmetic failed (bad index or geometry).
    #[error("piece geometry failure")]
    Core {
        /// Underlying metadata failure.
        #[source]
        source: CoreError,
    },
    /// Piece bytes did not hash to the expected value.
    #[error("piece {index} failed hash verification")]
    HashMismatch {
        /// Rejected piece.
        index: u32,
    },
    /// Piece body had the wrong length.
    #[error("piece {index} has length {got}, want {want}")]
    BadLength {
        /// Offending piece.
        index: u32,
        /// Received length.
        got: u64,
        /// Expected length.
        want: u64,
    },
    /// A read asked for a piece this host does not have.
    #[error("piece {index} not present")]
    MissingPiece {
        /// Requested piece.
        index: u32,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

impl From<CoreError> for StorageError {
    fn from(source: CoreError) -> Self {
        Self::Core { source }
    }
}

/// A content-addressed file divided into verified pieces.
pub trait Torrent: Send + Sync {
    /// Torrent metadata.
    fn meta(&self) -> &MetaInfo;

    /// Torrent identity.
    fn info_hash(&self) -> InfoHash;

    /// Snapshot of the pieces this host holds.
    fn bitfield(&self) -> Bitfield;

    /// Whether piece `index` is held.
    fn has_piece(&self, index: u32) -> bool;

    /// Whether every piece is held.
    fn is_complete(&self) -> bool;

    /// Bytes still missing.
    fn bytes_left(&self) -> u64;

    /// Verify and persist a piece. Writing a piece that is already held is
    /// a no-op success.
    ///
    /// # Errors
    ///
    /// `HashMismatch`/`BadLength` for bad bodies (nothing is written),
    /// `Core` for bad indexes, `Io` on disk failure.
    fn write_piece(&self, index: u32, data: &[u8]) -> Result<(), StorageError>;

    /// Read a held piece.
    ///
    /// # Errors
    ///
    /// `MissingPiece` if this host does not hold it, `Io` on disk failure.
    fn read_piece(&self, index: u32) -> Result<Vec<u8>, StorageError>;
}

/// Creates and caches torrents by info hash.
pub trait TorrentArchive: Send + Sync {
    /// Open-or-create the torrent for `meta`. Repeated calls return the same
    /// handle.
    ///
    /// # Errors
    ///
    /// `Io` when the data file cannot be created.
    fn create(&self, meta: MetaInfo) -> Result<Arc<dyn Torrent>, StorageError>;

    /// The torrent for a known info hash.
    fn get(&self, info_hash: InfoHash) -> Option<Arc<dyn Torrent>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// File-backed torrent with an in-memory verified-piece bitfield.
pub struct DiskTorrent {
    meta: MetaInfo,
    info_hash: InfoHash,
    file: std::fs::File,
    bitfield: Mutex<Bitfield>,
}

impl DiskTorrent {
    fn open(dir: &std::path::Path, meta: MetaInfo) -> Result<Self, StorageError> {
        let info_hash = meta.info_hash();
        let path = dir.join(format!("{info_hash}.data"));
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(meta.length())?;
        let bitfield = Bitfield::new(meta.num_pieces());
        Ok(Self {
            meta,
            info_hash,
            file,
            bitfield: Mutex::new(bitfield),
        })
    }

    fn piece_offset(&self, index: u32) -> u64 {
        u64::from(index) * self.meta.piece_length()
    }
}

impl Torrent for DiskTorrent {
    fn meta(&self) -> &MetaInfo {
        &self.meta
    }

    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn bitfield(&self) -> Bitfield {
        lock(&self.bitfield).clone()
    }

    fn has_piece(&self, index: u32) -> bool {
        lock(&self.bitfield).has(index)
    }

    fn is_complete(&self) -> bool {
        lock(&self.bitfield).is_complete()
    }

    fn bytes_left(&self) -> u64 {
        let bitfield = lock(&self.bitfield);
        let mut left = 0;
        for index in bitfield.missing() {
            left += self.meta.piece_length_at(index).unwrap_or(0);
        }
        left
    }

    fn write_piece(&self, index: u32, data: &[u8]) -> Result<(), StorageError> {
        let want = self.meta.piece_length_at(index)?;
        if data.len() as u64 != want {
            return Err(StorageError::BadLength {
                index,
                got: data.len() as u64,
                want,
            });
        }
        if PieceHash::compute(data) != self.meta.piece_hash(index)? {
            return Err(StorageError::HashMismatch { index });
        }

        {
            let bitfield = lock(&self.bitfield);
            if bitfield.has(index) {
                return Ok(());
            }
        }

        self.file.write_all_at(data, self.piece_offset(index))?;
        lock(&self.bitfield).set(index);
        Ok(())
    }

    fn read_piece(&self, index: u32) -> Result<Vec<u8>, StorageError> {
        let length = self.meta.piece_length_at(index)?;
        if !self.has_piece(index) {
            return Err(StorageError::MissingPiece { index });
        }
        let mut data = vec![0_u8; usize::try_from(length).unwrap_or(0)];
        self.file.read_exact_at(&mut data, self.piece_offset(index))?;
        Ok(data)
    }
}

/// Directory-backed archive.
pub struct DiskArchive {
    dir: PathBuf,
    torrents: Mutex<HashMap<InfoHash, Arc<dyn Torrent>>>,
}

impl DiskArchive {
    /// Open an archive rooted at `dir`.
    ///
    /// # Errors
    ///
    /// `Io` if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            torrents: Mutex::new(HashMap::new()),
        })
    }

    /// Register a torrent this host already holds in full.
    ///
    /// # Errors
    ///
    /// `Io` on disk failure; verification failures if `content` does not
    /// match `meta`.
    pub fn seed(&self, meta: MetaInfo, content: &[u8]) -> Result<Arc<dyn Torrent>, StorageError> {
        let torrent = self.create(meta)?;
        let piece_length = usize::try_from(torrent.meta().piece_length()).unwrap_or(usize::MAX);
        for (index, chunk) in content.chunks(piece_length).enumerate() {
            torrent.write_piece(u32::try_from(index).unwrap_or(u32::MAX), chunk)?;
        }
        Ok(torrent)
    }
}

impl TorrentArchive for DiskArchive {
    fn create(&self, meta: MetaInfo) -> Result<Arc<dyn Torrent>, StorageError> {
        let info_hash = meta.info_hash();
        let mut torrents = lock(&self.torrents);
        if let Some(existing) = torrents.get(&info_hash) {
            return Ok(Arc::clone(existing));
        }
        let torrent: Arc<dyn Torrent> = Arc::new(DiskTorrent::open(&self.dir, meta)?);
        torrents.insert(info_hash, Arc::clone(&torrent));
        Ok(torrent)
    }

    fn get(&self, info_hash: InfoHash) -> Option<Arc<dyn Torrent>> {
        lock(&self.torrents).get(&info_hash).cloned()
    }
}
