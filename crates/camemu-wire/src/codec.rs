use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Frame header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "CE" (0x43 0x45).
pub const MAGIC: [u8; 2] = [0x43, 0x45];

/// Default maximum payload size: 1 MiB. Envelopes are small JSON documents.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Encode one payload into the wire format.
///
/// ```text
/// ┌──────────────┬────────────┬─────────────────┐
/// │ Magic (2B)   │ Length     │ Payload         │
/// │ 0x43 0x45    │ (4B LE)    │ (Length bytes)  │
/// └──────────────┴────────────┴─────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(WireError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one payload from the front of `src`.
///
/// Returns `Ok(None)` until a whole frame is buffered; on success the frame
/// bytes are consumed from `src`.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(WireError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if payload_len > max_payload {
        return Err(WireError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration shared by [`FrameReader`](crate::FrameReader) and
/// [`FrameWriter`](crate::FrameWriter).
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Maximum payload size in bytes. Default: 1 MiB.
    pub max_payload_size: usize,
    /// Read timeout applied to the stream.
    pub read_timeout: Option<Duration>,
    /// Write timeout applied to the stream.
    pub write_timeout: Option<Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode() {
        let mut buf = BytesMut::new();
        encode_frame(br#"{"msg_type":"cmd"}"#, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 18);

        let payload = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(payload.as_ref(), br#"{"msg_type":"cmd"}"#);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_waits() {
        let mut buf = BytesMut::from(&[0x43, 0x45, 0x01][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), 3, "partial data must not be consumed");
    }

    #[test]
    fn incomplete_payload_waits() {
        let mut buf = BytesMut::new();
        encode_frame(b"status", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = BytesMut::from(&[0x49, 0x50, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(WireError::InvalidMagic)
        ));
    }

    #[test]
    fn oversized_length_rejected_before_payload_arrives() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(8 * 1024 * 1024);

        assert!(matches!(
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(WireError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = BytesMut::new();
        encode_frame(b"frame_ready", &mut buf).unwrap();
        encode_frame(b"", &mut buf).unwrap();
        encode_frame(b"frame_release", &mut buf).unwrap();

        let first = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        let empty = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        let last = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(first.as_ref(), b"frame_ready");
        assert!(empty.is_empty());
        assert_eq!(last.as_ref(), b"frame_release");
        assert!(buf.is_empty());
    }
}
