//! Error types for scheduler operations.

use std::time::Duration;

use strata_core::InfoHash;
use thiserror::Error;

use crate::storage::StorageError;
use crate::wire::WireError;

/// Primary error type for scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Peer is blacklisted for this torrent.
    #[error("peer blacklisted for {remaining:?} more")]
    Blacklisted {
        /// Time until the blacklist entry expires.
        remaining: Duration,
    },
    /// The torrent already has the maximum number of open connections.
    #[error("torrent at connection capacity")]
    AtCapacity,
    /// A pending connection already exists for this peer and torrent.
    #[error("connection already pending")]
    AlreadyPending,
    /// An active connection already exists for this peer and torrent.
    #[error("connection already active")]
    AlreadyActive,
    /// The connection was never pending; it cannot be activated.
    #[error("connection not pending")]
    NotPending,
    /// The handshake announced a different torrent than expected.
    #[error("info hash mismatch: expected {expected}, got {got}")]
    HandshakeMismatch {
        /// Info hash this side expected.
        expected: InfoHash,
        /// Info hash the peer announced.
        got: InfoHash,
    },
    /// The peer announced a torrent this host does not have.
    #[error("unknown torrent {info_hash}")]
    UnknownTorrent {
        /// Announced info hash.
        info_hash: InfoHash,
    },
    /// The peer sent something other than a handshake when one was expected.
    #[error("expected a handshake bitfield message")]
    UnexpectedMessage,
    /// The connection is closed.
    #[error("connection closed")]
    ConnClosed,
    /// The connection's outbound buffer is full.
    #[error("send buffer full")]
    SendBufferFull,
    /// The scheduler is shutting down.
    #[error("scheduler shut down")]
    Shutdown,
    /// A wire protocol failure.
    #[error("wire protocol failure")]
    Wire {
        /// Underlying codec failure.
        #[source]
        source: WireError,
    },
    /// A piece storage failure.
    #[error("piece storage failure")]
    Storage {
        /// Underlying storage failure.
        #[source]
        source: StorageError,
    },
    /// A socket-level failure.
    #[error("socket failure")]
    Io {
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Dial or handshake took longer than its deadline.
    #[error("handshake timed out")]
    Timeout,
}

impl From<WireError> for SchedulerError {
    fn from(source: WireError) -> Self {
        Self::Wire { source }
    }
}

impl From<StorageError> for SchedulerError {
    fn from(source: StorageError) -> Self {
        Self::Storage { source }
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

/// Convenience alias for scheduler results.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
