//! Extension types whose OIDs are only known after a catalog lookup.

use bytes::{BufMut, BytesMut};

use super::registry::{CodecContext, ValueProcessor};
use super::{Oid, Value};
use crate::core::wire::WireReader;
use crate::error::CodecError;

/// Kind of a catalog-supplied type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomType {
    /// `CREATE TYPE ... AS ENUM`: labels travel as text in both formats.
    Enum,
    /// pgvector `vector`.
    Vector,
}

/// pgvector: `[1,2.5,3]` as text, `{dim: u16, unused: u16, f32 * dim}` in binary.
#[derive(Debug)]
pub struct VectorProcessor {
    oid: Oid,
    name: String,
}

impl VectorProcessor {
    pub fn new(oid: Oid, name: &str) -> Self {
        Self {
            oid,
            name: name.to_string(),
        }
    }

    fn components<'v>(&self, value: &'v Value) -> Result<std::borrow::Cow<'v, [f32]>, CodecError> {
        match value {
            Value::Vector(v) => Ok(std::borrow::Cow::Borrowed(v.as_slice())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_f64()
                        .map(|f| f as f32)
                        .ok_or_else(|| CodecError::wrong_value(self.oid, item))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(std::borrow::Cow::Owned),
            other => Err(CodecError::wrong_value(self.oid, other)),
        }
    }
}

impl ValueProcessor for VectorProcessor {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode_binary(
        &self,
        value: &Value,
        _: &CodecContext<'_>,
        out: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let v = self.components(value)?;
        let dim = u16::try_from(v.len())
            .map_err(|_| CodecError::wrong_value(self.oid, "too many dimensions"))?;
        out.put_u16(dim);
        out.put_u16(0);
        for f in v.iter() {
            out.put_f32(*f);
        }
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        if let Value::Text(s) = value {
            return Ok(s.clone());
        }
        let parts: Vec<String> = self.components(value)?.iter().map(f32::to_string).collect();
        Ok(format!("[{}]", parts.join(",")))
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let bad = |_| CodecError::malformed(self.oid, "truncated vector", raw);
        let mut r = WireReader::new(raw);
        let dim = r.read_u16().map_err(bad)?;
        let _unused = r.read_u16().map_err(bad)?;
        let mut v = Vec::with_capacity(usize::from(dim));
        for _ in 0..dim {
            v.push(f32::from_bits(r.read_u32().map_err(bad)?));
        }
        r.finish().map_err(bad)?;
        Ok(Value::Vector(v))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let inner = raw
            .trim()
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| CodecError::malformed(self.oid, "expected [..]", raw))?;
        if inner.trim().is_empty() {
            return Ok(Value::Vector(Vec::new()));
        }
        inner
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f32>()
                    .map_err(|_| CodecError::malformed(self.oid, "invalid component", raw))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Vector)
    }
}
