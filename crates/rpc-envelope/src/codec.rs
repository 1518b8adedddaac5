use bytes::{Buf, BufMut, BytesMut};
#[cfg(test)]
use bytes::Bytes;
use tokio_util::codec::{Decoder, Encoder};

use crate::Envelope;

/// Frames `Envelope`s as `u32_be(type_url_len) ++ type_url ++ u32_be(payload_len) ++ payload`.
///
/// One `EnvelopeCodec` is shared by a single connection in one direction; the `tcp`
/// technology in `rpc-transport` pairs it with `tokio_util::codec::Framed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec {
    _priv: (),
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

const MAX_FIELD_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("envelope type_url is not valid utf-8")]
    InvalidTypeUrl,
    #[error("envelope field length {length} exceeds maximum of {max}")]
    FieldTooLarge { length: u32, max: u32 },
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = &src[..];

        if cursor.len() < 4 {
            return Ok(None);
        }
        let type_url_len = cursor.get_u32();
        if type_url_len > MAX_FIELD_LEN {
            return Err(CodecError::FieldTooLarge {
                length: type_url_len,
                max: MAX_FIELD_LEN,
            });
        }
        let type_url_len = type_url_len as usize;

        if cursor.len() < type_url_len + 4 {
            return Ok(None);
        }
        let type_url_bytes = &cursor[..type_url_len];
        let type_url = std::str::from_utf8(type_url_bytes)
            .map_err(|_| CodecError::InvalidTypeUrl)?
            .to_owned();
        cursor.advance(type_url_len);

        let payload_len = cursor.get_u32();
        if payload_len > MAX_FIELD_LEN {
            return Err(CodecError::FieldTooLarge {
                length: payload_len,
                max: MAX_FIELD_LEN,
            });
        }
        let payload_len = payload_len as usize;

        if cursor.len() < payload_len {
            return Ok(None);
        }

        let frame_len = 4 + type_url_len + 4 + payload_len;
        let mut frame = src.split_to(frame_len);
        frame.advance(4 + type_url_len + 4);
        let payload = frame.freeze();

        Ok(Some(Envelope { type_url, payload }))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let type_url_len: u32 = item.type_url.len().try_into().map_err(|_| CodecError::FieldTooLarge {
            length: u32::MAX,
            max: MAX_FIELD_LEN,
        })?;
        let payload_len: u32 = item.payload.len().try_into().map_err(|_| CodecError::FieldTooLarge {
            length: u32::MAX,
            max: MAX_FIELD_LEN,
        })?;

        dst.reserve(4 + item.type_url.len() + 4 + item.payload.len());
        dst.put_u32(type_url_len);
        dst.put_slice(item.type_url.as_bytes());
        dst.put_u32(payload_len);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

/// Test-only convenience for building a raw frame without going through `Envelope`.
#[cfg(test)]
pub(crate) fn encode_raw(type_url: &str, payload: &Bytes, dst: &mut BytesMut) {
    dst.put_u32(type_url.len() as u32);
    dst.put_slice(type_url.as_bytes());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        encode_raw("demo.Echo", &Bytes::from_static(b"hello"), &mut buf);

        let mut partial = buf.split_to(4);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut full = partial;
        full.unsplit(buf);
        let envelope = codec.decode(&mut full).unwrap().expect("frame complete");
        assert_eq!(envelope.type_url, "demo.Echo");
        assert_eq!(envelope.payload, Bytes::from_static(b"hello"));
        assert!(full.is_empty());
    }

    #[test]
    fn encode_then_decode_same_envelope() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        let envelope = Envelope::new("demo.Echo", Bytes::from_static(b"payload"));
        codec.encode(envelope.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().expect("frame complete");
        assert_eq!(decoded, envelope);
    }
}
