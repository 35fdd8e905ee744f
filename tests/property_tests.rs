//! Property-based tests using proptest
//!
//! These tests check value codecs and frame decoding across a wide range of
//! randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{BufMut, BytesMut};
use pgwire_client::core::codec::{BackendFrame, PgCodec};
use pgwire_client::protocol::backend::BackendMessage;
use pgwire_client::types::{oid, CodecParams, Numeric, TypeRegistry};
use pgwire_client::{Format, Value};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

fn round_trip(oid: u32, value: &Value, format: Format) -> Value {
    let registry = TypeRegistry::shared();
    let params = CodecParams::default();
    let encoded = registry
        .encode(oid, value, format, &params)
        .expect("encode should not fail");
    registry
        .decode(oid, format, encoded.as_deref(), &params)
        .expect("decode should not fail")
}

fn raw_frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(tag);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_slice(body);
    buf.to_vec()
}

// Property: integers survive both wire formats
proptest! {
    #[test]
    fn prop_int8_roundtrip(v in any::<i64>()) {
        let value = Value::Int8(v);
        prop_assert_eq!(round_trip(oid::INT8, &value, Format::Binary), value.clone());
        prop_assert_eq!(round_trip(oid::INT8, &value, Format::Text), value);
    }

    #[test]
    fn prop_int4_text_is_decimal(v in any::<i32>()) {
        let registry = TypeRegistry::shared();
        let encoded = registry
            .encode(oid::INT4, &Value::Int4(v), Format::Text, &CodecParams::default())
            .unwrap()
            .unwrap();
        let expected = v.to_string();
        prop_assert_eq!(&encoded[..], expected.as_bytes());
    }
}

// Property: any UTF-8 text is carried unchanged
proptest! {
    #[test]
    fn prop_text_roundtrip(s in "\\PC*") {
        let value = Value::Text(s);
        prop_assert_eq!(round_trip(oid::TEXT, &value, Format::Binary), value.clone());
        prop_assert_eq!(round_trip(oid::TEXT, &value, Format::Text), value);
    }
}

// Property: canonical decimal literals render back to themselves and keep
// their scale through the base-10000 binary layout
proptest! {
    #[test]
    fn prop_numeric_roundtrip(literal in "-?(0|[1-9][0-9]{0,24})(\\.[0-9]{1,16})?") {
        // negative zero renders without its sign
        let is_zero = literal.bytes().all(|b| matches!(b, b'-' | b'0' | b'.'));
        prop_assume!(!(is_zero && literal.starts_with('-')));
        let n: Numeric = literal.parse().unwrap();
        prop_assert_eq!(n.to_string(), literal.clone());

        let value = Value::Numeric(n);
        prop_assert_eq!(round_trip(oid::NUMERIC, &value, Format::Binary), value.clone());
        prop_assert_eq!(round_trip(oid::NUMERIC, &value, Format::Text), value);
    }
}

// Property: one-dimensional arrays with nulls survive both formats
proptest! {
    #[test]
    fn prop_int4_array_roundtrip(items in prop::collection::vec(prop::option::of(any::<i32>()), 0..40)) {
        let value = Value::Array(
            items.into_iter().map(|v| v.map_or(Value::Null, Value::Int4)).collect(),
        );
        prop_assert_eq!(round_trip(oid::INT4_ARRAY, &value, Format::Binary), value.clone());
        prop_assert_eq!(round_trip(oid::INT4_ARRAY, &value, Format::Text), value);
    }

    #[test]
    fn prop_text_array_quoting(items in prop::collection::vec("[a-zA-Z0-9 ,\"\\\\{}]{0,12}", 1..10)) {
        let value = Value::Array(items.into_iter().map(Value::Text).collect());
        prop_assert_eq!(round_trip(oid::TEXT_ARRAY, &value, Format::Text), value);
    }
}

// Property: frames decode the same however the byte stream is split
proptest! {
    #[test]
    fn prop_frames_survive_arbitrary_splits(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..12),
        split in 1usize..64,
    ) {
        let stream: Vec<u8> = bodies.iter().flat_map(|b| raw_frame(b'd', b)).collect();

        let mut codec = PgCodec::default();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(split) {
            buf.extend_from_slice(chunk);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded.len(), bodies.len());
        for (frame, body) in decoded.iter().zip(&bodies) {
            match frame {
                BackendFrame::Full { tag, body: got } => {
                    prop_assert_eq!(*tag, b'd');
                    prop_assert_eq!(&got[..], &body[..]);
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn prop_skip_mode_consumes_exact_lengths(
        rows in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..500), 1..10),
        split in 1usize..32,
    ) {
        let mut stream: Vec<u8> = rows.iter().flat_map(|b| raw_frame(b'D', b)).collect();
        stream.extend(raw_frame(b'Z', b"I"));

        let mut codec = PgCodec::default();
        codec.set_skip_rows(true);
        let mut buf = BytesMut::new();
        let mut skipped = Vec::new();
        let mut last = None;
        for chunk in stream.chunks(split) {
            buf.extend_from_slice(chunk);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                match frame {
                    BackendFrame::Skipped { len, .. } => skipped.push(len),
                    full => last = Some(full),
                }
            }
        }

        prop_assert_eq!(skipped, rows.iter().map(Vec::len).collect::<Vec<_>>());
        let ready = BackendMessage::from_frame(last.expect("ReadyForQuery is never skipped")).unwrap();
        prop_assert!(matches!(ready, BackendMessage::ReadyForQuery(_)));
    }
}

// Property: arbitrary text never panics the date/time parsers
proptest! {
    #[test]
    fn prop_datetime_text_never_panics(
        raw in prop_oneof![
            "\\PC{0,40}",
            "[0-9+\\-:. ]{0,40}",
            "[0-9]{1,24}:[0-9]{1,24}(:[0-9]{1,24}(\\.[0-9]{0,12})?)?",
            "[0-9]{2}:[0-9]{2}:[0-9]{2}[+-][0-9]{1,12}(:[0-9]{1,12}){0,3}",
            "-?[0-9]{1,20}(\\.[0-9]{1,4})? (years|mons|weeks|days|hours|mins|secs)( ago)?",
        ]
    ) {
        let registry = TypeRegistry::shared();
        let params = CodecParams::default();
        for oid in [
            oid::DATE,
            oid::TIME,
            oid::TIMETZ,
            oid::TIMESTAMP,
            oid::TIMESTAMPTZ,
            oid::INTERVAL,
        ] {
            let _ = registry.decode(oid, Format::Text, Some(raw.as_bytes()), &params);
        }
    }
}

// Property: random bytes never panic the decoder
proptest! {
    #[test]
    fn prop_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut codec = PgCodec::new(64 * 1024);
        let mut buf = BytesMut::from(&data[..]);
        while let Ok(Some(frame)) = codec.decode(&mut buf) {
            let _ = BackendMessage::from_frame(frame);
        }
    }
}
