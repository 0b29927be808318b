//! Deterministic content fixtures.

use strata_core::MetaInfo;
use tempfile::TempDir;

/// Deterministic pseudo-random blob; the same seed always yields the same
/// bytes, so fixtures can be recreated on both sides of a transfer test.
#[must_use]
pub fn blob(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state & 0xff) as u8
        })
        .collect()
}

/// Blob plus matching torrent metadata.
///
/// # Panics
///
/// Panics if `piece_length` is zero.
#[must_use]
pub fn torrent(name: &str, len: usize, piece_length: u64, seed: u64) -> (Vec<u8>, MetaInfo) {
    let content = blob(len, seed);
    let meta = MetaInfo::from_blob(name, piece_length, &content).expect("valid piece length");
    (content, meta)
}

/// Temp directory that lives for the duration of a test.
///
/// # Panics
///
/// Panics if the directory cannot be created.
#[must_use]
pub fn scratch_dir() -> TempDir {
    tempfile::tempdir().expect("create temp dir")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_is_deterministic_per_seed() {
        assert_eq!(blob(64, 7), blob(64, 7));
        assert_ne!(blob(64, 7), blob(64, 8));
    }

    #[test]
    fn torrent_metadata_matches_content() {
        let (content, meta) = torrent("fixture", 1000, 256, 42);
        assert_eq!(meta.length(), content.len() as u64);
        assert_eq!(meta.num_pieces(), 4);
    }
}
