//! Piece bitfields.

use serde::{Deserialize, Serialize};

/// Boolean sequence indicating which pieces a peer holds.
///
/// One bitfield is owned by each torrent; copies travel in handshakes and are
/// mirrored in every connection's view of its peer. Out-of-range reads answer
/// `false` and out-of-range writes are ignored; callers that care bounds-check
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitfield(Vec<bool>);

impl Bitfield {
    /// An all-false bitfield of the given length.
    #[must_use]
    pub fn new(len: u32) -> Self {
        Self(vec![false; len as usize])
    }

    /// An all-true bitfield of the given length.
    #[must_use]
    pub fn complete_of(len: u32) -> Self {
        Self(vec![true; len as usize])
    }

    /// Wrap an explicit bit vector.
    #[must_use]
    pub const fn from_vec(bits: Vec<bool>) -> Self {
        Self(bits)
    }

    /// Number of pieces covered.
    ///
    /// # Panics
    ///
    /// Panics if the underlying length exceeds `u32::MAX`, which the
    /// constructors make unrepresentable.
    #[must_use]
    pub fn len(&self) -> u32 {
        u32::try_from(self.0.len()).expect("bitfield length bounded by constructors")
    }

    /// Whether the bitfield covers zero pieces.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether piece `index` is held.
    #[must_use]
    pub fn has(&self, index: u32) -> bool {
        self.0.get(index as usize).copied().unwrap_or(false)
    }

    /// Mark piece `index` as held.
    pub fn set(&mut self, index: u32) {
        if let Some(bit) = self.0.get_mut(index as usize) {
            *bit = true;
        }
    }

    /// Number of pieces held.
    #[must_use]
    pub fn count(&self) -> u32 {
        u32::try_from(self.0.iter().filter(|bit| **bit).count())
            .expect("bitfield length bounded by constructors")
    }

    /// Whether every piece is held.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.0.iter().all(|bit| *bit)
    }

    /// Indexes of pieces not held, in ascending order.
    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, bit)| !**bit)
            .map(|(index, _)| u32::try_from(index).expect("bitfield length bounded"))
    }
}
