//! Self-describing wire envelope shared by every technology registered with the
//! connection manager: `{ type_url, payload }`, where `type_url` names the concrete
//! message type carried in `payload`.

mod codec;

pub use codec::{CodecError, EnvelopeCodec};

use bytes::Bytes;

/// A frame as it travels over the wire: a type tag plus its encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub type_url: String,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(type_url: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            type_url: type_url.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope type mismatch: expected `{expected}`, got `{actual}`")]
    TypeMismatch { expected: String, actual: String },
}

/// Wraps `payload` tagged as `type_url`. A no-op in the sense that no inspection of
/// `payload` happens here: packing is purely attaching the tag.
pub fn pack(type_url: impl Into<String>, payload: impl Into<Bytes>) -> Envelope {
    Envelope::new(type_url, payload)
}

/// Unwraps `envelope`, checking that it is tagged `expected_type_url`.
///
/// Returns the inner payload unchanged on a match. A mismatched `type_url` is the
/// "ill-formed frame" case: the caller is expected to drop the frame and log it, not
/// to treat this as a fatal transport error.
pub fn unpack(envelope: Envelope, expected_type_url: &str) -> Result<Bytes, EnvelopeError> {
    if envelope.type_url == expected_type_url {
        Ok(envelope.payload)
    } else {
        Err(EnvelopeError::TypeMismatch {
            expected: expected_type_url.to_owned(),
            actual: envelope.type_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let envelope = pack("demo.Echo", Bytes::from_static(b"hello"));
        let payload = unpack(envelope, "demo.Echo").expect("type matches");
        assert_eq!(payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn unpack_rejects_mismatched_type() {
        let envelope = pack("demo.Echo", Bytes::from_static(b"hello"));
        let err = unpack(envelope, "demo.Other").unwrap_err();
        assert!(matches!(err, EnvelopeError::TypeMismatch { .. }));
    }
}
