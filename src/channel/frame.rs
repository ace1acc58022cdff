//! Message Framing Codec
//!
//! Unix stream sockets do not preserve write boundaries, so the channel layer
//! frames every message with a 4-byte little-endian length prefix. Handlers
//! and clients only ever see whole messages; neither side needs to do its own
//! length accounting.
//!
//! ## How the Decoder Works
//!
//! The decoder reads from an accumulation buffer and returns either:
//! - `Ok(Some(payload))` - A complete frame was available; its bytes have been
//!   consumed from the buffer
//! - `Ok(None)` - Need more data, the frame is incomplete
//! - `Err(FrameError)` - The peer violated the framing contract
//!
//! This design allows the caller to:
//! 1. Append incoming socket data to a buffer
//! 2. Call `decode_frame()` to attempt extraction
//! 3. If incomplete, wait for more data
//! 4. If error, disconnect the peer
//!
//! ## Size Limits
//!
//! This is a message-oriented channel with a fixed maximum frame size, not a
//! stream multiplexer. An advertised length above the configured limit is a
//! contract violation and is rejected before any allocation happens, which
//! also protects the server from hostile length prefixes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Number of bytes in the frame header (the little-endian payload length).
pub const HEADER_SIZE: usize = 4;

/// Errors that can occur while framing or deframing messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The advertised payload length exceeds the configured limit
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The stream ended in the middle of a frame
    #[error("truncated frame: expected {expected} more bytes")]
    Truncated { expected: usize },
}

/// Result type for framing operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Appends one framed message to `buf`.
///
/// The caller is responsible for checking the payload against its outbound
/// limit before encoding; this function only writes the header and payload.
pub fn encode_frame(buf: &mut BytesMut, payload: &[u8]) {
    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
}

/// Attempts to extract one complete frame from `buf`.
///
/// On success the frame's bytes (header included) are consumed from `buf` and
/// the payload is returned without copying. Returns `Ok(None)` when the buffer
/// does not yet hold a whole frame.
pub fn decode_frame(buf: &mut BytesMut, max_len: usize) -> FrameResult<Option<Bytes>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > max_len {
        return Err(FrameError::MessageTooLarge {
            size: len,
            max: max_len,
        });
    }

    if buf.len() < HEADER_SIZE + len {
        return Ok(None);
    }

    buf.advance(HEADER_SIZE);
    Ok(Some(buf.split_to(len).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, b"hello");

        let frame = decode_frame(&mut buf, 4096).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, b"");

        let frame = decode_frame(&mut buf, 4096).unwrap().unwrap();
        assert!(frame.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_header() {
        let mut buf = BytesMut::from(&[0x05u8, 0x00][..]);
        assert_eq!(decode_frame(&mut buf, 4096).unwrap(), None);
        // Nothing consumed while waiting for more data
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, b"hello");
        let mut partial = buf.split_to(HEADER_SIZE + 3);

        assert_eq!(decode_frame(&mut partial, 4096).unwrap(), None);
        assert_eq!(partial.len(), HEADER_SIZE + 3);
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, b"first");
        encode_frame(&mut buf, b"second");

        let a = decode_frame(&mut buf, 4096).unwrap().unwrap();
        let b = decode_frame(&mut buf, 4096).unwrap().unwrap();
        assert_eq!(&a[..], b"first");
        assert_eq!(&b[..], b"second");
        assert_eq!(decode_frame(&mut buf, 4096).unwrap(), None);
    }

    #[test]
    fn test_oversized_rejected_before_payload_arrives() {
        // Header advertising 1 MB against a 4 KB limit; no payload bytes yet.
        let mut buf = BytesMut::new();
        buf.put_u32_le(1024 * 1024);

        let err = decode_frame(&mut buf, 4096).unwrap_err();
        assert_eq!(
            err,
            FrameError::MessageTooLarge {
                size: 1024 * 1024,
                max: 4096
            }
        );
    }

    #[test]
    fn test_frame_at_exact_limit() {
        let payload = vec![0xABu8; 64];
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, &payload);

        let frame = decode_frame(&mut buf, 64).unwrap().unwrap();
        assert_eq!(frame.len(), 64);
    }
}
