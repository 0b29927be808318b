//! Percent-style encoding that turns arbitrary tags into safe path segments.
//!
//! Tags carry slashes and colons (`repo/name:version`); the cache needs flat
//! file names and the HTTP clients need single path segments. One encoding
//! serves both so a tag written on one node resolves on every other.

use std::fmt::Write as _;

use strata_core::CoreError;

const SAFE: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._-";

/// Encode a tag into a safe path segment.
#[must_use]
pub fn encode(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    for byte in tag.bytes() {
        if SAFE.contains(&byte) {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// Decode an encoded segment back into the original tag.
///
/// # Errors
///
/// Returns an error if a percent escape is malformed or the decoded bytes
/// are not UTF-8.
pub fn decode(encoded: &str) -> Result<String, CoreError> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut cursor = 0;
    while cursor < bytes.len() {
        if bytes[cursor] == b'%' {
            let escape =
                bytes
                    .get(cursor + 1..cursor + 3)
                    .ok_or(CoreError::InvalidMetaInfo {
                        reason: "truncated percent escape in tag segment",
                    })?;
            let decoded = hex::decode(escape).map_err(|source| CoreError::InvalidHex { source })?;
            out.extend_from_slice(&decoded);
            cursor += 3;
        } else {
            out.push(bytes[cursor]);
            cursor += 1;
        }
    }
    String::from_utf8(out).map_err(|_| CoreError::InvalidMetaInfo {
        reason: "tag segment decodes to invalid UTF-8",
    })
}
