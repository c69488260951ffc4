//! Codec for encoding and decoding Huddle envelopes.
//!
//! Envelopes travel as one JSON document per WebSocket text frame, so the
//! codec does no framing of its own.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum encoded envelope size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode an envelope to bytes.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope).map_err(ProtocolError::Encode)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an envelope from bytes.
///
/// # Errors
///
/// Returns an error if the data is too large or is not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeKind, UserInfo};

    #[test]
    fn test_encode_decode_user_list() {
        let users = vec![
            UserInfo {
                user_id: 1,
                username: "alice".to_string(),
                is_online: true,
            },
            UserInfo {
                user_id: 2,
                username: "bob".to_string(),
                is_online: true,
            },
        ];
        let envelope = Envelope::user_list(7, users.clone());

        let decoded = decode(&encode(&envelope).unwrap()).unwrap();

        assert_eq!(decoded.kind, EnvelopeKind::UserList);
        assert_eq!(decoded.users, Some(users));
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not json"), Err(ProtocolError::Decode(_))));
        assert!(matches!(decode(b"{}"), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        match decode(br#"{"type":"image","room_id":1}"#) {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let envelope = Envelope::text(1, "x".repeat(MAX_FRAME_SIZE + 1));
        match encode(&envelope) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }

        let oversized = vec![b' '; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            decode(&oversized),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }
}
