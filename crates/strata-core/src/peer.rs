//! Peer identities.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Number of raw bytes in a peer id.
pub const PEER_ID_LEN: usize = 20;

/// Fixed 20-byte peer identifier.
///
/// The derived ordering is lexicographic over the raw bytes, which gives
/// every pair of peers a total order. Connection tie-breaking relies on both
/// sides of a simultaneous handshake computing the same winner from it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Wrap raw peer id bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a random peer id.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0_u8; PEER_ID_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw peer id bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl FromStr for PeerId {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(input).map_err(|source| CoreError::InvalidHex { source })?;
        let bytes: [u8; PEER_ID_LEN] =
            bytes
                .try_into()
                .map_err(|rejected: Vec<u8>| CoreError::InvalidLength {
                    got: rejected.len(),
                    want: PEER_ID_LEN,
                })?;
        Ok(Self(bytes))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}
