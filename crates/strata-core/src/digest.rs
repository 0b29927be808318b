//! Content digests.
//!
//! A [`Digest`] is the address of an immutable blob: a fixed `sha256`
//! algorithm tag plus 32 raw bytes, rendered as `sha256:<64 hex chars>`.
//! Two digests are equal iff their bytes are equal.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::error::CoreError;

/// Algorithm tag accepted in the text form.
const ALGORITHM: &str = "sha256";

/// Number of raw bytes in a digest.
pub const DIGEST_LEN: usize = 32;

/// Content address of an immutable blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Compute the digest of a blob.
    #[must_use]
    pub fn compute(blob: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(blob);
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Hex payload without the algorithm tag.
    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ALGORITHM}:{}", self.hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl FromStr for Digest {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (algorithm, payload) = input.split_once(':').ok_or_else(|| {
            CoreError::UnsupportedAlgorithm {
                algorithm: input.to_string(),
            }
        })?;
        if algorithm != ALGORITHM {
            return Err(CoreError::UnsupportedAlgorithm {
                algorithm: algorithm.to_string(),
            });
        }
        let bytes = hex::decode(payload).map_err(|source| CoreError::InvalidHex { source })?;
        let bytes: [u8; DIGEST_LEN] =
            bytes
                .try_into()
                .map_err(|rejected: Vec<u8>| CoreError::InvalidLength {
                    got: rejected.len(),
                    want: DIGEST_LEN,
                })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_text_form() {
        let digest = Digest::compute(b"strata");
        let text = digest.to_string();
        assert!(text.starts_with("sha256:"));
        assert_eq!(text.len(), "sha256:".len() + 64);
        assert_eq!(text.parse::<Digest>().unwrap(), digest);
    }

    #[test]
    fn equality_is_byte_equality() {
        let a = Digest::compute(b"a");
        let b = Digest::compute(b"a");
        let c = Digest::compute(b"c");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rejects_foreign_algorithms() {
        let err = "md5:0000".parse::<Digest>().unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedAlgorithm { .. }));
    }

    #[test]
    fn rejects_short_payloads() {
        let err = "sha256:abcd".parse::<Digest>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidLength { got: 2, want: 32 }));
    }

    #[test]
    fn rejects_bad_hex() {
        let err = format!("sha256:{}", "zz".repeat(32))
            .parse::<Digest>()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidHex { .. }));
    }

    #[test]
    fn serde_uses_the_text_form() {
        let digest = Digest::compute(b"payload");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{digest}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
