//! Torrent metadata and identities.
//!
//! A torrent is a content-addressed file divided into fixed-length pieces
//! with the possible exception of the last. [`MetaInfo`] carries everything a
//! peer needs to exchange pieces: the name, piece geometry, and the expected
//! SHA-1 hash of every piece. Its [`InfoHash`] is the torrent's primary
//! identity, computed over a canonical byte serialisation of the metadata so
//! that every host derives the same value.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest as _, Sha1};
use sha2::Sha256;

use crate::error::CoreError;

/// Number of raw bytes in a per-piece hash.
pub const PIECE_HASH_LEN: usize = 20;

/// Number of raw bytes in an info hash.
pub const INFO_HASH_LEN: usize = 32;

/// SHA-1 hash of a single piece.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PieceHash([u8; PIECE_HASH_LEN]);

impl PieceHash {
    /// Wrap raw piece hash bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PIECE_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Hash a piece body.
    #[must_use]
    pub fn compute(piece: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(piece);
        Self(hasher.finalize().into())
    }

    /// Raw hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PIECE_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for PieceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PieceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceHash({self})")
    }
}

impl Serialize for PieceHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PieceHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        let bytes: [u8; PIECE_HASH_LEN] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("piece hash must be 20 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Content address of a torrent's metadata; the torrent's primary identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    /// Wrap raw info hash bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; INFO_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw info hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({self})")
    }
}

impl FromStr for InfoHash {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(input).map_err(|source| CoreError::InvalidHex { source })?;
        let bytes: [u8; INFO_HASH_LEN] =
            bytes
                .try_into()
                .map_err(|rejected: Vec<u8>| CoreError::InvalidLength {
                    got: rejected.len(),
                    want: INFO_HASH_LEN,
                })?;
        Ok(Self(bytes))
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// Torrent metadata: name, piece geometry, and per-piece hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInfo {
    name: String,
    piece_length: u64,
    length: u64,
    piece_hashes: Vec<PieceHash>,
}

impl MetaInfo {
    /// Build metadata for a blob, hashing each piece.
    ///
    /// # Errors
    ///
    /// Returns an error if `piece_length` is zero or the piece hash count
    /// would not cover `blob`.
    pub fn from_blob(
        name: impl Into<String>,
        piece_length: u64,
        blob: &[u8],
    ) -> Result<Self, CoreError> {
        if piece_length == 0 {
            return Err(CoreError::InvalidMetaInfo {
                reason: "piece length must be positive",
            });
        }
        let piece_hashes = blob
            .chunks(usize::try_from(piece_length).map_err(|_| CoreError::InvalidMetaInfo {
                reason: "piece length does not fit in usize",
            })?)
            .map(PieceHash::compute)
            .collect();
        Ok(Self {
            name: name.into(),
            piece_length,
            length: blob.len() as u64,
            piece_hashes,
        })
    }

    /// Reassemble metadata from persisted parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the hash count disagrees with the piece geometry.
    pub fn from_parts(
        name: impl Into<String>,
        piece_length: u64,
        length: u64,
        piece_hashes: Vec<PieceHash>,
    ) -> Result<Self, CoreError> {
        if piece_length == 0 {
            return Err(CoreError::InvalidMetaInfo {
                reason: "piece length must be positive",
            });
        }
        let expected = length.div_ceil(piece_length);
        if expected != piece_hashes.len() as u64 {
            return Err(CoreError::InvalidMetaInfo {
                reason: "piece hash count does not match piece geometry",
            });
        }
        Ok(Self {
            name: name.into(),
            piece_length,
            length,
            piece_hashes,
        })
    }

    /// Torrent name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total payload length in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Nominal piece length in bytes.
    #[must_use]
    pub const fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Number of pieces.
    ///
    /// # Panics
    ///
    /// Panics if the piece count exceeds `u32::MAX`, which the constructors
    /// make unrepresentable for any realistic blob.
    #[must_use]
    pub fn num_pieces(&self) -> u32 {
        u32::try_from(self.piece_hashes.len()).expect("piece count bounded by constructors")
    }

    /// Length of an individual piece; only the last piece may be short.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is out of range.
    pub fn piece_length_at(&self, index: u32) -> Result<u64, CoreError> {
        let pieces = self.num_pieces();
        if index >= pieces {
            return Err(CoreError::PieceOutOfRange { index, pieces });
        }
        if index + 1 == pieces {
            let tail = self.length - u64::from(index) * self.piece_length;
            Ok(tail)
        } else {
            Ok(self.piece_length)
        }
    }

    /// Expected hash for a piece.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is out of range.
    pub fn piece_hash(&self, index: u32) -> Result<PieceHash, CoreError> {
        self.piece_hashes
            .get(index as usize)
            .copied()
            .ok_or(CoreError::PieceOutOfRange {
                index,
                pieces: self.num_pieces(),
            })
    }

    /// The torrent's identity, derived from a canonical serialisation of the
    /// metadata so every host computes the same value.
    #[must_use]
    pub fn info_hash(&self) -> InfoHash {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.piece_length.to_be_bytes());
        hasher.update(self.length.to_be_bytes());
        for piece in &self.piece_hashes {
            hasher.update(piece.as_bytes());
        }
        InfoHash(hasher.finalize().into())
    }
}
