//! Envelope framing on a byte stream.
//!
//! TCP delivers a stream, not messages, so every envelope is prefixed with
//! enough header to find where it ends. All integers are big-endian:
//!
//! ```text
//! +--------+----------------+------------------+-------------------+
//! | kind   | session id     | payload length   | payload           |
//! | u8     | i32            | u32              | `length` bytes    |
//! +--------+----------------+------------------+-------------------+
//! ```
//!
//! [`decode`] works on an accumulating receive buffer: it returns
//! `Ok(None)` until a whole frame is present, so callers can keep
//! appending whatever `read` hands them.

use crate::{Message, MessageKind, ProtocolError, SessionId};

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 1 + 4 + 4;

/// Largest payload a single envelope may carry.
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

/// Encodes `message` into a freshly allocated frame.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + message.payload.len());
    encode_into(message, &mut out);
    out
}

/// Appends the frame for `message` to `out`.
///
/// Used by connections to queue several frames in one outbound buffer.
/// The payload must not exceed [`MAX_PAYLOAD_LEN`]; peers reject such a
/// frame, and the sending connection refuses it before getting here.
pub fn encode_into(message: &Message, out: &mut Vec<u8>) {
    debug_assert!(message.payload.len() <= MAX_PAYLOAD_LEN);
    out.push(message.kind.as_byte());
    out.extend_from_slice(&message.session_id.0.to_be_bytes());
    out.extend_from_slice(&(message.payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&message.payload);
}

/// Tries to decode one frame from the front of `buf`.
///
/// # Returns
/// - `Ok(Some((message, consumed)))`: a full frame was decoded; the caller
///   drops the first `consumed` bytes.
/// - `Ok(None)`: `buf` holds only part of a frame.
///
/// # Errors
/// - [`ProtocolError::UnknownKind`] for an unknown type tag.
/// - [`ProtocolError::PayloadTooLarge`] when the header announces more than
///   [`MAX_PAYLOAD_LEN`] bytes. This is checked before waiting for the
///   payload so a hostile length cannot make the buffer grow unbounded.
pub fn decode(buf: &[u8]) -> Result<Option<(Message, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    // Reject a bad tag as soon as the first byte is in.
    let kind = MessageKind::try_from(buf[0])?;

    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let session_id = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    let len = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;

    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }

    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }

    let message = Message {
        kind,
        session_id: SessionId(session_id),
        payload: buf[HEADER_LEN..total].to_vec(),
    };
    Ok(Some((message, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_layout_is_big_endian() {
        let frame = encode(&Message::application(SessionId(258), vec![9, 8, 7]));

        assert_eq!(frame[0], MessageKind::Application.as_byte());
        assert_eq!(&frame[1..5], &[0, 0, 1, 2]);
        assert_eq!(&frame[5..9], &[0, 0, 0, 3]);
        assert_eq!(&frame[9..], &[9, 8, 7]);
    }

    #[test]
    fn test_encode_none_session_keeps_negative_id() {
        let frame = encode(&Message::max_connections_reached());
        let (decoded, _) = decode(&frame).unwrap().unwrap();
        assert_eq!(decoded.session_id, SessionId::NONE);
        assert_eq!(decoded.kind, MessageKind::MaxConnectionsReached);
    }

    #[test]
    fn test_decode_partial_header_returns_none() {
        let frame = encode(&Message::application(SessionId(1), b"abc".to_vec()));
        assert!(decode(&frame[..4]).unwrap().is_none());
        assert!(decode(&[]).unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_payload_returns_none() {
        let frame = encode(&Message::application(SessionId(1), b"abcdef".to_vec()));
        assert!(decode(&frame[..frame.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn test_decode_two_frames_consumes_one_at_a_time() {
        let mut buf = Vec::new();
        encode_into(&Message::application(SessionId(1), b"A".to_vec()), &mut buf);
        encode_into(&Message::application(SessionId(1), b"B".to_vec()), &mut buf);

        let (first, used) = decode(&buf).unwrap().unwrap();
        assert_eq!(first.payload, b"A");
        let (second, used2) = decode(&buf[used..]).unwrap().unwrap();
        assert_eq!(second.payload, b"B");
        assert_eq!(used + used2, buf.len());
    }

    #[test]
    fn test_decode_unknown_kind_fails_on_first_byte() {
        assert!(matches!(decode(&[0xff]), Err(ProtocolError::UnknownKind(0xff))));
    }

    #[test]
    fn test_decode_oversized_length_fails_before_payload_arrives() {
        let mut buf = vec![MessageKind::Application.as_byte()];
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&((MAX_PAYLOAD_LEN as u32) + 1).to_be_bytes());

        assert!(matches!(
            decode(&buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }
}
