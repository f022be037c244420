//! Length-prefixed frame codec
//!
//! A frame is a 4-byte little-endian `i32` payload length followed by that
//! many bytes of UTF-8 JSON. The declared length must be in
//! `1..=MAX_FRAME_PAYLOAD`; anything else is a fatal framing error.
//!
//! A payload that frames correctly but does not parse into a [`Message`] is
//! logged and skipped. The frame is consumed exactly, so the stream stays
//! aligned on the next header.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::error::CodecError;
use crate::message::Message;
use crate::protocol::{HEADER_LEN, MAX_FRAME_PAYLOAD};

/// Serialize a message into one complete frame
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let payload = message.to_payload()?;
    let len = checked_payload_len(payload.len())?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one frame from the start of `buf`
///
/// `buf` holds only the bytes currently available. Returns `Ok(None)` when
/// the header or payload is incomplete, and also when a complete payload
/// fails to parse (logged). A declared length outside the allowed range is
/// an error.
pub fn decode(buf: &[u8]) -> Result<Option<Message>, CodecError> {
    let Some(len) = frame_length(buf)? else {
        return Ok(None);
    };
    let Some(payload) = buf.get(HEADER_LEN..HEADER_LEN + len) else {
        return Ok(None);
    };
    match Message::from_payload(payload) {
        Ok(message) => Ok(Some(message)),
        Err(e) => {
            warn!("Discarding unparsable frame ({} bytes): {}", len, e);
            Ok(None)
        }
    }
}

/// Read and validate the declared payload length, if the header is complete
fn frame_length(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    let Some(header) = buf.get(..HEADER_LEN) else {
        return Ok(None);
    };
    let declared = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    match usize::try_from(declared) {
        Ok(len) if (1..=MAX_FRAME_PAYLOAD).contains(&len) => Ok(Some(len)),
        _ => Err(CodecError::InvalidLength(declared)),
    }
}

fn checked_payload_len(len: usize) -> Result<i32, CodecError> {
    if len == 0 || len > MAX_FRAME_PAYLOAD {
        return Err(CodecError::FrameTooLarge(len));
    }
    i32::try_from(len).map_err(|_| CodecError::FrameTooLarge(len))
}

/// A tokio codec that frames a byte stream into [`Message`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChatCodec;

impl Decoder for ChatCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(len) = frame_length(src)? else {
                return Ok(None);
            };

            let frame_len = HEADER_LEN + len;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            let payload = src.split_to(len);

            match Message::from_payload(&payload) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!("Skipping unparsable frame ({} bytes): {}", len, e);
                    // Try the next frame in the buffer.
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None => {
                if !buf.is_empty() {
                    debug!("Peer closed mid-frame with {} bytes pending", buf.len());
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for ChatCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.to_payload()?;
        let len = checked_payload_len(payload.len())?;
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_i32_le(len);
        dst.put_slice(&payload);
        Ok(())
    }
}
