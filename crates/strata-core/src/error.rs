//! Error types for parsing and validating core identities.

use thiserror::Error;

/// Primary error type for core identity parsing and piece arithmetic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Digest string carried an algorithm tag other than `sha256`.
    #[error("unsupported digest algorithm")]
    UnsupportedAlgorithm {
        /// Algorithm tag found in the input.
        algorithm: String,
    },
    /// Hex payload decoded to an unexpected number of bytes.
    #[error("invalid identity length: got {got} bytes, want {want}")]
    InvalidLength {
        /// Number of bytes decoded from the input.
        got: usize,
        /// Number of bytes the identity requires.
        want: usize,
    },
    /// Input was not valid hex.
    #[error("invalid hex payload")]
    InvalidHex {
        /// Underlying decode failure.
        #[source]
        source: hex::FromHexError,
    },
    /// Piece index was outside the torrent's piece range.
    #[error("piece index {index} out of range ({pieces} pieces)")]
    PieceOutOfRange {
        /// Requested piece index.
        index: u32,
        /// Number of pieces in the torrent.
        pieces: u32,
    },
    /// Torrent metadata was internally inconsistent.
    #[error("invalid torrent metadata: {reason}")]
    InvalidMetaInfo {
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
}
