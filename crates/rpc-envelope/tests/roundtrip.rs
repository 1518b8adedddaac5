use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rpc_envelope::{pack, unpack, Envelope, EnvelopeCodec};
use tokio_util::codec::{Decoder, Encoder};

proptest! {
    /// `pack` followed by `unpack` of the same `type_url` returns the original bytes.
    #[test]
    fn pack_unpack_is_identity(type_url in "[a-zA-Z0-9._]{1,32}", payload in proptest::collection::vec(any::<u8>(), 0..256)) {
        let envelope = pack(type_url.clone(), Bytes::from(payload.clone()));
        let recovered = unpack(envelope, &type_url).expect("type_url matches by construction");
        prop_assert_eq!(recovered.as_ref(), payload.as_slice());
    }

    /// Encoding an envelope and decoding the resulting bytes reproduces it exactly,
    /// regardless of how the bytes are chunked before reaching the decoder.
    #[test]
    fn codec_roundtrip_survives_arbitrary_chunking(
        type_url in "[a-zA-Z0-9._]{1,32}",
        payload in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut codec = EnvelopeCodec::new();
        let envelope = Envelope::new(type_url, Bytes::from(payload));

        let mut wire = BytesMut::new();
        codec.encode(envelope.clone(), &mut wire).unwrap();

        let mut received = BytesMut::new();
        let mut decoded = None;
        while !wire.is_empty() {
            let chunk = wire.split_to(1);
            received.extend_from_slice(&chunk);
            if let Some(frame) = codec.decode(&mut received).unwrap() {
                decoded = Some(frame);
                break;
            }
        }

        prop_assert_eq!(decoded, Some(envelope));
    }
}
