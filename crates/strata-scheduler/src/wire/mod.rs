//! The peer wire protocol.
//!
//! Frames are a 4-byte big-endian length prefix followed by that many bytes
//! of serialized message, capped at 32 KiB. Piece payloads are not part of
//! the framed message: a `PiecePayload` frame is immediately followed on the
//! wire by the raw piece bytes, whose length is carried inside the message.

pub mod codec;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_core::{Bitfield, InfoHash, PeerId};
use thiserror::Error;

pub use codec::WireCodec;

/// Upper bound on a framed message body, excluding piece payload.
pub const MAX_FRAME_SIZE: usize = 32 * 1024;

/// Error codes carried by [`Message::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The receiving host does not have the announced torrent.
    UnknownTorrent,
    /// A piece request could not be served.
    PieceRequestFailed,
}

/// Messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Handshake. Sent exactly once per side, never on an established
    /// connection.
    Bitfield {
        /// Sender's peer id.
        peer_id: PeerId,
        /// Torrent name, informational.
        name: String,
        /// Torrent identity.
        info_hash: InfoHash,
        /// Pieces the sender holds.
        bitfield: Bitfield,
    },
    /// The sender now has piece `index`.
    AnnouncePiece {
        /// Piece the sender acquired.
        index: u32,
    },
    /// Ask for a whole piece. Chunked requests are unsupported.
    PieceRequest {
        /// Requested piece.
        index: u32,
        /// Byte offset within the piece; must be zero.
        offset: u64,
        /// Requested length; must equal the piece length.
        length: u64,
    },
    /// A piece follows this frame as raw bytes.
    PiecePayload {
        /// Piece being delivered.
        index: u32,
        /// Byte offset within the piece; always zero.
        offset: u64,
        /// Number of raw payload bytes following the frame.
        length: u64,
    },
    /// Withdraw an earlier request. Acknowledged and ignored: delivery is
    /// ordered per connection and piece reads are synchronous, so the
    /// payload is already queued by the time a cancel arrives.
    CancelPiece {
        /// Piece whose request is withdrawn.
        index: u32,
    },
    /// Something went wrong with a piece or the handshake.
    Error {
        /// Piece the error refers to, when applicable.
        index: u32,
        /// Machine-readable error kind.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

/// A message plus its raw payload (empty unless [`Message::PiecePayload`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Framed message.
    pub message: Message,
    /// Raw piece bytes following the frame on the wire.
    pub payload: Bytes,
}

impl Frame {
    /// Frame without payload.
    #[must_use]
    pub const fn from_message(message: Message) -> Self {
        Self {
            message,
            payload: Bytes::new(),
        }
    }

    /// Piece payload frame.
    #[must_use]
    pub fn piece(index: u32, payload: Bytes) -> Self {
        Self {
            message: Message::PiecePayload {
                index,
                offset: 0,
                length: payload.len() as u64,
            },
            payload,
        }
    }
}

/// Failures raised by the codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// A frame exceeded [`MAX_FRAME_SIZE`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte cap")]
    FrameTooLarge {
        /// Offending frame length.
        len: usize,
    },
    /// A frame body did not decode.
    #[error("malformed frame")]
    Malformed {
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// The underlying socket failed.
    #[error("wire transport failure")]
    Io {
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl From<std::io::Error> for WireError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}
