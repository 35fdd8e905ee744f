//! `json` and `jsonb`.
//!
//! Serialization goes through a [`JsonCodec`] held by the registry so callers
//! can swap in their own serializer. Text values are taken as pre-serialized
//! JSON and sent unchanged.

use std::fmt;

use bytes::{BufMut, BytesMut};

use super::registry::{CodecContext, ValueProcessor};
use super::{oid, Oid, Value};
use crate::error::CodecError;

const JSONB_VERSION: u8 = 1;

/// Injectable JSON serializer.
pub trait JsonCodec: Send + Sync + fmt::Debug {
    fn to_json(&self, value: &serde_json::Value) -> Result<String, String>;

    fn from_json(&self, text: &str) -> Result<serde_json::Value, String>;
}

/// Default serializer backed by `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerdeJsonCodec;

impl JsonCodec for SerdeJsonCodec {
    fn to_json(&self, value: &serde_json::Value) -> Result<String, String> {
        serde_json::to_string(value).map_err(|e| e.to_string())
    }

    fn from_json(&self, text: &str) -> Result<serde_json::Value, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

#[derive(Debug)]
pub struct JsonProcessor {
    jsonb: bool,
}

impl JsonProcessor {
    pub fn json() -> Self {
        Self { jsonb: false }
    }

    pub fn jsonb() -> Self {
        Self { jsonb: true }
    }

    fn type_oid(&self) -> Oid {
        if self.jsonb {
            oid::JSONB
        } else {
            oid::JSON
        }
    }
}

impl ValueProcessor for JsonProcessor {
    fn oid(&self) -> Oid {
        self.type_oid()
    }

    fn name(&self) -> &str {
        if self.jsonb {
            "jsonb"
        } else {
            "json"
        }
    }

    fn encode_binary(
        &self,
        value: &Value,
        ctx: &CodecContext<'_>,
        out: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let text = self.encode_text(value, ctx)?;
        if self.jsonb {
            out.put_u8(JSONB_VERSION);
        }
        out.put_slice(text.as_bytes());
        Ok(())
    }

    fn encode_text(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<String, CodecError> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Json(j) => ctx
                .registry
                .json()
                .to_json(j)
                .map_err(|e| CodecError::malformed(self.type_oid(), e, j)),
            other => Err(CodecError::wrong_value(self.type_oid(), other)),
        }
    }

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        let body = if self.jsonb {
            match raw.split_first() {
                Some((&JSONB_VERSION, rest)) => rest,
                Some((version, _)) => {
                    return Err(CodecError::unsupported(
                        oid::JSONB,
                        "this jsonb version",
                        version,
                    ))
                }
                None => return Err(CodecError::malformed(oid::JSONB, "empty jsonb value", raw)),
            }
        } else {
            raw
        };
        let text = std::str::from_utf8(body)
            .map_err(|_| CodecError::malformed(self.type_oid(), "invalid UTF-8", raw))?;
        self.decode_text(text, ctx)
    }

    fn decode_text(&self, raw: &str, ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        ctx.registry
            .json()
            .from_json(raw)
            .map(Value::Json)
            .map_err(|e| CodecError::malformed(self.type_oid(), e, raw))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CodecParams, TypeRegistry};
    use serde_json::json;

    #[test]
    fn jsonb_prefixes_version_byte() {
        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        let v = Value::Json(json!({"a": [1, 2, null]}));
        let mut buf = BytesMut::new();
        JsonProcessor::jsonb().encode_binary(&v, &ctx, &mut buf).unwrap();
        assert_eq!(buf[0], 1);
        assert_eq!(JsonProcessor::jsonb().decode_binary(&buf, &ctx).unwrap(), v);

        buf.clear();
        JsonProcessor::json().encode_binary(&v, &ctx, &mut buf).unwrap();
        assert_eq!(buf[0], b'{');
    }

    #[test]
    fn pre_serialized_text_passes_through() {
        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        let raw = r#"{"b":  2, "a": 1}"#;
        assert_eq!(
            JsonProcessor::json().encode_text(&Value::from(raw), &ctx).unwrap(),
            raw
        );
    }

    #[test]
    fn unknown_jsonb_version_is_unsupported() {
        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        assert!(matches!(
            JsonProcessor::jsonb().decode_binary(b"\x02{}", &ctx),
            Err(CodecError::Unsupported { .. })
        ));
    }

    #[derive(Debug)]
    struct Rejecting;

    impl JsonCodec for Rejecting {
        fn to_json(&self, _: &serde_json::Value) -> Result<String, String> {
            Err("nope".into())
        }

        fn from_json(&self, _: &str) -> Result<serde_json::Value, String> {
            Err("nope".into())
        }
    }

    #[test]
    fn injected_codec_is_used() {
        let reg = TypeRegistry::builder()
            .with_json_codec(std::sync::Arc::new(Rejecting))
            .build();
        let params = CodecParams::default();
        let ctx = CodecContext::new(&params, &reg);
        assert!(JsonProcessor::json().decode_text("{}", &ctx).is_err());
    }
}
