//! Frame encoder/decoder for the peer wire protocol.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, MAX_FRAME_SIZE, Message, WireError};

/// Length-prefixed codec with out-of-band piece payloads.
///
/// Decoding a `PiecePayload` frame is a two-step state machine: first the
/// framed message, then exactly `length` raw bytes that belong to it. The
/// decoder holds the parsed message across reads until the payload arrives.
#[derive(Debug, Default)]
pub struct WireCodec {
    pending_payload: Option<(Message, usize)>,
}

impl WireCodec {
    /// A fresh codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if let Some((message, length)) = self.pending_payload.take() {
            if src.len() < length {
                src.reserve(length - src.len());
                self.pending_payload = Some((message, length));
                return Ok(None);
            }
            let payload: Bytes = src.split_to(length).freeze();
            return Ok(Some(Frame { message, payload }));
        }

        if src.len() < 4 {
            return Ok(None);
        }
        let mut prefix = [0_u8; 4];
        prefix.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(prefix) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge { len: length });
        }
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let body = src.split_to(length);
        let message: Message =
            serde_json::from_slice(&body).map_err(|source| WireError::Malformed { source })?;

        if let Message::PiecePayload { length, .. } = &message {
            let length = usize::try_from(*length).map_err(|_| WireError::FrameTooLarge {
                len: usize::MAX,
            })?;
            self.pending_payload = Some((message, length));
            return self.decode(src);
        }

        Ok(Some(Frame::from_message(message)))
    }
}

impl Encoder<Frame> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let body =
            serde_json::to_vec(&frame.message).map_err(|source| WireError::Malformed { source })?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge { len: body.len() });
        }

        dst.reserve(4 + body.len() + frame.payload.len());
        dst.put_u32(u32::try_from(body.len()).unwrap_or(u32::MAX));
        dst.extend_from_slice(&body);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
