//! Wire format for a state exchange.
//!
//! Each direction of an exchange carries exactly one JSON-encoded `f64`
//! with no length prefix. A single receive is expected to return the whole
//! message, which holds as long as the payload stays a lone scalar that fits
//! in one receive buffer. Richer payloads would need explicit framing.

use thiserror::Error;

/// Default receive buffer size. A JSON `f64` is at most ~25 bytes.
pub const DEFAULT_BUF_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Refusing to encode non-finite state {0}")]
    NonFinite(f64),

    #[error("Empty message")]
    Empty,

    #[error("Malformed state message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialize a state value to its UTF-8 JSON bytes.
///
/// JSON has no representation for NaN or infinities, so those are rejected
/// instead of being silently sent as `null`.
pub fn encode_state(value: f64) -> Result<Vec<u8>, MessageError> {
    if !value.is_finite() {
        return Err(MessageError::NonFinite(value));
    }
    Ok(serde_json::to_vec(&value)?)
}

/// Parse one complete message as a state value.
pub fn decode_state(data: &[u8]) -> Result<f64, MessageError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(MessageError::Empty);
    }
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_plain_json_number() {
        assert_eq!(encode_state(50.0).unwrap(), b"50.0");
        assert_eq!(encode_state(-0.125).unwrap(), b"-0.125");
    }

    #[test]
    fn test_decode_accepts_integers_and_floats() {
        assert_eq!(decode_state(b"100").unwrap(), 100.0);
        assert_eq!(decode_state(b"12.5").unwrap(), 12.5);
        assert_eq!(decode_state(b" 3.0\n").unwrap(), 3.0);
    }

    #[test]
    fn test_encoded_value_decodes_unchanged() {
        let value = 0.1 + 0.2;
        let bytes = encode_state(value).unwrap();
        assert_eq!(decode_state(&bytes).unwrap(), value);
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(matches!(encode_state(f64::NAN), Err(MessageError::NonFinite(_))));
        assert!(matches!(
            encode_state(f64::INFINITY),
            Err(MessageError::NonFinite(_))
        ));
    }

    #[test]
    fn test_empty_message() {
        assert!(matches!(decode_state(b""), Err(MessageError::Empty)));
        assert!(matches!(decode_state(b"  \n"), Err(MessageError::Empty)));
    }

    #[test]
    fn test_malformed_message() {
        assert!(matches!(
            decode_state(b"not json at all"),
            Err(MessageError::Malformed(_))
        ));
        // Two messages in one read are not one message
        assert!(matches!(decode_state(b"1.0 2.0"), Err(MessageError::Malformed(_))));
        // A JSON object is not a scalar
        assert!(matches!(
            decode_state(b"{\"state\": 1.0}"),
            Err(MessageError::Malformed(_))
        ));
    }
}
