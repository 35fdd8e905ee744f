use bytes::{BufMut, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use pgwire_client::core::codec::PgCodec;
use pgwire_client::protocol::backend::BackendMessage;
use pgwire_client::protocol::frontend::FrontendMessage;
use pgwire_client::types::{oid, CodecParams, TypeRegistry};
use pgwire_client::{Format, Value};
use tokio_util::codec::Decoder;

fn data_rows(count: usize) -> BytesMut {
    let mut buf = BytesMut::new();
    for i in 0..count {
        let id = (i as i32).to_be_bytes();
        let name = format!("customer-{i:06}");
        buf.put_u8(b'D');
        buf.put_i32(4 + 2 + (4 + 4) + (4 + name.len() as i32));
        buf.put_i16(2);
        buf.put_i32(4);
        buf.put_slice(&id);
        buf.put_i32(name.len() as i32);
        buf.put_slice(name.as_bytes());
    }
    buf
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let rows = data_rows(1_000);

    group.bench_function("decode_1000_rows", |b| {
        b.iter_batched(
            || rows.clone(),
            |mut buf| {
                let mut codec = PgCodec::default();
                while let Some(frame) = codec.decode(&mut buf).unwrap() {
                    let _ = BackendMessage::from_frame(frame).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("skip_1000_rows", |b| {
        b.iter_batched(
            || rows.clone(),
            |mut buf| {
                let mut codec = PgCodec::default();
                codec.set_skip_rows(true);
                while codec.decode(&mut buf).unwrap().is_some() {}
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("encode_query", |b| {
        let msg = FrontendMessage::Query {
            sql: "SELECT id, name FROM customers WHERE region = 'emea'".into(),
        };
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(128);
            msg.encode(&mut buf).unwrap();
            buf
        })
    });

    group.finish();
}

fn bench_values(c: &mut Criterion) {
    let mut group = c.benchmark_group("values");
    let registry = TypeRegistry::shared();
    let params = CodecParams::default();

    let numeric = Value::Numeric("123456789.000123".parse().unwrap());
    group.bench_function("numeric_binary_encode", |b| {
        b.iter(|| {
            registry
                .encode(oid::NUMERIC, &numeric, Format::Binary, &params)
                .unwrap()
        })
    });

    let array = registry
        .encode(
            oid::INT4_ARRAY,
            &Value::Array((0..256).map(Value::Int4).collect()),
            Format::Text,
            &params,
        )
        .unwrap();
    group.bench_function("int4_array_text_decode", |b| {
        b.iter(|| {
            registry
                .decode(oid::INT4_ARRAY, Format::Text, array.as_deref(), &params)
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_values);
criterion_main!(benches);
