#![no_main]

use libfuzzer_sys::fuzz_target;
use pgwire_client::types::{oid, CodecParams, TypeRegistry};
use pgwire_client::Format;

const TYPES: &[u32] = &[
    oid::INT4_ARRAY,
    oid::TEXT_ARRAY,
    oid::NUMERIC,
    oid::INTERVAL,
    oid::TIMESTAMPTZ,
    oid::JSONB,
];

fuzz_target!(|data: &[u8]| {
    let registry = TypeRegistry::shared();
    let params = CodecParams::default();
    for &oid in TYPES {
        let _ = registry.decode(oid, Format::Text, Some(data), &params);
        let _ = registry.decode(oid, Format::Binary, Some(data), &params);
    }
});
