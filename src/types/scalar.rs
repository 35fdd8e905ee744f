//! Processors for the fixed-width and string-like built-in types.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::registry::{CodecContext, ValueProcessor};
use super::{oid, Oid, Value};
use crate::error::CodecError;

fn exact<const N: usize>(oid: Oid, raw: &[u8]) -> Result<[u8; N], CodecError> {
    raw.try_into()
        .map_err(|_| CodecError::malformed(oid, format!("expected {N} bytes, got {}", raw.len()), raw))
}

#[derive(Debug)]
pub struct BoolProcessor;

impl ValueProcessor for BoolProcessor {
    fn oid(&self) -> Oid {
        oid::BOOL
    }

    fn name(&self) -> &str {
        "bool"
    }

    fn encode_binary(&self, value: &Value, _: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        let b = value.as_bool().ok_or_else(|| CodecError::wrong_value(oid::BOOL, value))?;
        out.put_u8(u8::from(b));
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        let b = value.as_bool().ok_or_else(|| CodecError::wrong_value(oid::BOOL, value))?;
        Ok(if b { "t" } else { "f" }.to_string())
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let [b] = exact::<1>(oid::BOOL, raw)?;
        Ok(Value::Bool(b != 0))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        match raw {
            "t" | "true" | "TRUE" => Ok(Value::Bool(true)),
            "f" | "false" | "FALSE" => Ok(Value::Bool(false)),
            _ => Err(CodecError::malformed(oid::BOOL, "not a boolean literal", raw)),
        }
    }
}

/// `int2`, `int4` and `int8`. Any integer value that fits the width is accepted.
#[derive(Debug)]
pub struct IntProcessor {
    oid: Oid,
    name: &'static str,
    width: usize,
}

impl IntProcessor {
    pub fn int2() -> Self {
        Self { oid: oid::INT2, name: "int2", width: 2 }
    }

    pub fn int4() -> Self {
        Self { oid: oid::INT4, name: "int4", width: 4 }
    }

    pub fn int8() -> Self {
        Self { oid: oid::INT8, name: "int8", width: 8 }
    }

    fn checked(&self, value: &Value) -> Result<i64, CodecError> {
        let v = value
            .as_i64()
            .ok_or_else(|| CodecError::wrong_value(self.oid, value))?;
        let fits = match self.width {
            2 => i16::try_from(v).is_ok(),
            4 => i32::try_from(v).is_ok(),
            _ => true,
        };
        if fits {
            Ok(v)
        } else {
            Err(CodecError::wrong_value(self.oid, value))
        }
    }

    fn wrap(&self, v: i64) -> Value {
        match self.width {
            2 => Value::Int2(v as i16),
            4 => Value::Int4(v as i32),
            _ => Value::Int8(v),
        }
    }
}

impl ValueProcessor for IntProcessor {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn name(&self) -> &str {
        self.name
    }

    fn encode_binary(&self, value: &Value, _: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        let v = self.checked(value)?;
        match self.width {
            2 => out.put_i16(v as i16),
            4 => out.put_i32(v as i32),
            _ => out.put_i64(v),
        }
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        Ok(self.checked(value)?.to_string())
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let v = match self.width {
            2 => i64::from(i16::from_be_bytes(exact(self.oid, raw)?)),
            4 => i64::from(i32::from_be_bytes(exact(self.oid, raw)?)),
            _ => i64::from_be_bytes(exact(self.oid, raw)?),
        };
        Ok(self.wrap(v))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let parsed = match self.width {
            2 => raw.parse::<i16>().map(i64::from).ok(),
            4 => raw.parse::<i32>().map(i64::from).ok(),
            _ => raw.parse::<i64>().ok(),
        };
        parsed
            .map(|v| self.wrap(v))
            .ok_or_else(|| CodecError::malformed(self.oid, "not an integer", raw))
    }
}

#[derive(Debug)]
pub struct OidProcessor;

impl OidProcessor {
    fn checked(value: &Value) -> Result<u32, CodecError> {
        value
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| CodecError::wrong_value(oid::OID, value))
    }
}

impl ValueProcessor for OidProcessor {
    fn oid(&self) -> Oid {
        oid::OID
    }

    fn name(&self) -> &str {
        "oid"
    }

    fn encode_binary(&self, value: &Value, _: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_u32(Self::checked(value)?);
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        Ok(Self::checked(value)?.to_string())
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Ok(Value::Oid(u32::from_be_bytes(exact(oid::OID, raw)?)))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        raw.parse()
            .map(Value::Oid)
            .map_err(|_| CodecError::malformed(oid::OID, "not an oid", raw))
    }
}

/// `float4` and `float8`, including `NaN` and the infinities.
#[derive(Debug)]
pub struct FloatProcessor {
    double: bool,
}

impl FloatProcessor {
    pub fn float4() -> Self {
        Self { double: false }
    }

    pub fn float8() -> Self {
        Self { double: true }
    }

    fn type_oid(&self) -> Oid {
        if self.double {
            oid::FLOAT8
        } else {
            oid::FLOAT4
        }
    }

    fn checked(&self, value: &Value) -> Result<f64, CodecError> {
        match value {
            Value::Float4(_) | Value::Float8(_) | Value::Int2(_) | Value::Int4(_) | Value::Int8(_) => {
                value.as_f64().ok_or_else(|| CodecError::wrong_value(self.type_oid(), value))
            }
            Value::Numeric(n) => Ok(n.to_f64()),
            other => Err(CodecError::wrong_value(self.type_oid(), other)),
        }
    }
}

fn special_float(v: f64) -> Option<&'static str> {
    if v.is_nan() {
        Some("NaN")
    } else if v == f64::INFINITY {
        Some("Infinity")
    } else if v == f64::NEG_INFINITY {
        Some("-Infinity")
    } else {
        None
    }
}

impl ValueProcessor for FloatProcessor {
    fn oid(&self) -> Oid {
        self.type_oid()
    }

    fn name(&self) -> &str {
        if self.double {
            "float8"
        } else {
            "float4"
        }
    }

    fn encode_binary(&self, value: &Value, _: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        let v = self.checked(value)?;
        if self.double {
            out.put_f64(v);
        } else {
            out.put_f32(v as f32);
        }
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        let v = self.checked(value)?;
        Ok(match special_float(v) {
            Some(s) => s.to_string(),
            None if self.double => v.to_string(),
            None => (v as f32).to_string(),
        })
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Ok(if self.double {
            Value::Float8(f64::from_be_bytes(exact(oid::FLOAT8, raw)?))
        } else {
            Value::Float4(f32::from_be_bytes(exact(oid::FLOAT4, raw)?))
        })
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let v: f64 = match raw {
            "NaN" => f64::NAN,
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            _ => raw
                .parse()
                .map_err(|_| CodecError::malformed(self.type_oid(), "not a float", raw))?,
        };
        Ok(if self.double {
            Value::Float8(v)
        } else {
            Value::Float4(v as f32)
        })
    }
}

/// Character types and text-like extension types (enums).
#[derive(Debug)]
pub struct TextProcessor {
    oid: Oid,
    name: String,
}

impl TextProcessor {
    pub fn new(oid: Oid, name: &str) -> Self {
        Self {
            oid,
            name: name.to_string(),
        }
    }
}

impl ValueProcessor for TextProcessor {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode_binary(&self, value: &Value, ctx: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_slice(self.encode_text(value, ctx)?.as_bytes());
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CodecError::wrong_value(self.oid, value))
    }

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        let text = ctx.text(self.oid, raw)?;
        self.decode_text(text, ctx)
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Ok(Value::Text(raw.to_string()))
    }
}

#[derive(Debug)]
pub struct ByteaProcessor;

impl ByteaProcessor {
    fn decode_escape(raw: &str) -> Result<Vec<u8>, CodecError> {
        let bytes = raw.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'\\' {
                out.push(bytes[i]);
                i += 1;
                continue;
            }
            match bytes.get(i + 1..i + 4) {
                _ if bytes.get(i + 1) == Some(&b'\\') => {
                    out.push(b'\\');
                    i += 2;
                }
                Some(oct) if oct.iter().all(|b| (b'0'..=b'7').contains(b)) => {
                    let v = oct.iter().fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                    let v = u8::try_from(v)
                        .map_err(|_| CodecError::malformed(oid::BYTEA, "octal escape out of range", raw))?;
                    out.push(v);
                    i += 4;
                }
                _ => return Err(CodecError::malformed(oid::BYTEA, "invalid escape", raw)),
            }
        }
        Ok(out)
    }
}

/// Hex digit pairs may be separated by whitespace.
fn hex_decode(oid: Oid, digits: &str) -> Result<Vec<u8>, CodecError> {
    let packed: String = digits.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(packed).map_err(|e| CodecError::malformed(oid, e.to_string(), digits))
}

impl ValueProcessor for ByteaProcessor {
    fn oid(&self) -> Oid {
        oid::BYTEA
    }

    fn name(&self) -> &str {
        "bytea"
    }

    fn encode_binary(&self, value: &Value, _: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        let bytes = value.as_bytes().ok_or_else(|| CodecError::wrong_value(oid::BYTEA, value))?;
        out.put_slice(bytes);
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        let bytes = value.as_bytes().ok_or_else(|| CodecError::wrong_value(oid::BYTEA, value))?;
        Ok(format!("\\x{}", hex::encode(bytes)))
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Ok(Value::Bytea(raw.to_vec()))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        let bytes = match raw.strip_prefix("\\x") {
            Some(hex) => hex_decode(oid::BYTEA, hex)?,
            None => Self::decode_escape(raw)?,
        };
        Ok(Value::Bytea(bytes))
    }
}

#[derive(Debug)]
pub struct UuidProcessor;

impl UuidProcessor {
    fn parse(raw: &str) -> Result<[u8; 16], CodecError> {
        Uuid::parse_str(raw)
            .map(Uuid::into_bytes)
            .map_err(|e| CodecError::malformed(oid::UUID, e.to_string(), raw))
    }

    fn checked(value: &Value) -> Result<[u8; 16], CodecError> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::Text(s) => Self::parse(s),
            other => Err(CodecError::wrong_value(oid::UUID, other)),
        }
    }

    pub fn format(u: &[u8; 16]) -> String {
        Uuid::from_bytes(*u).hyphenated().to_string()
    }
}

impl ValueProcessor for UuidProcessor {
    fn oid(&self) -> Oid {
        oid::UUID
    }

    fn name(&self) -> &str {
        "uuid"
    }

    fn encode_binary(&self, value: &Value, _: &CodecContext<'_>, out: &mut BytesMut) -> Result<(), CodecError> {
        out.put_slice(&Self::checked(value)?);
        Ok(())
    }

    fn encode_text(&self, value: &Value, _: &CodecContext<'_>) -> Result<String, CodecError> {
        Ok(Self::format(&Self::checked(value)?))
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Ok(Value::Uuid(exact(oid::UUID, raw)?))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Self::parse(raw).map(Value::Uuid)
    }
}

/// Fallback for OIDs without a registered processor.
///
/// Text travels unchanged; other values are rendered through the processor
/// of their natural type. There is no binary path.
#[derive(Debug)]
pub struct Passthrough {
    oid: Oid,
}

impl Passthrough {
    pub fn new(oid: Oid) -> Self {
        Self { oid }
    }
}

impl ValueProcessor for Passthrough {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn name(&self) -> &str {
        "unknown"
    }

    fn supports_binary(&self) -> bool {
        false
    }

    fn encode_binary(&self, value: &Value, _: &CodecContext<'_>, _: &mut BytesMut) -> Result<(), CodecError> {
        Err(CodecError::unsupported(self.oid, "binary encoding", value))
    }

    fn encode_text(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<String, CodecError> {
        if let Value::Text(s) = value {
            return Ok(s.clone());
        }
        let natural = value.natural_oid();
        match ctx.registry.get(natural) {
            Some(p) if natural != self.oid => p.encode_text(value, ctx),
            _ => Err(CodecError::wrong_value(self.oid, value)),
        }
    }

    fn decode_binary(&self, raw: &[u8], _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Err(CodecError::unsupported(self.oid, "binary decoding", raw))
    }

    fn decode_text(&self, raw: &str, _: &CodecContext<'_>) -> Result<Value, CodecError> {
        Ok(Value::Text(raw.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CodecParams, TypeRegistry};

    fn round_trip(p: &dyn ValueProcessor, v: Value) {
        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        let mut buf = BytesMut::new();
        p.encode_binary(&v, &ctx, &mut buf).unwrap();
        assert_eq!(p.decode_binary(&buf, &ctx).unwrap(), v, "binary {v:?}");
        let text = p.encode_text(&v, &ctx).unwrap();
        assert_eq!(p.decode_text(&text, &ctx).unwrap(), v, "text {v:?}");
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(&BoolProcessor, Value::Bool(true));
        round_trip(&IntProcessor::int2(), Value::Int2(-32768));
        round_trip(&IntProcessor::int4(), Value::Int4(i32::MAX));
        round_trip(&IntProcessor::int8(), Value::Int8(-1));
        round_trip(&OidProcessor, Value::Oid(4_000_000_000));
        round_trip(&FloatProcessor::float8(), Value::Float8(2.5e-3));
        round_trip(&FloatProcessor::float4(), Value::Float4(1.25));
        round_trip(&FloatProcessor::float8(), Value::Float8(f64::INFINITY));
        round_trip(&TextProcessor::new(oid::TEXT, "text"), Value::from("héllo, \"world\""));
        round_trip(&ByteaProcessor, Value::Bytea(vec![0, 1, 0xfe, b'\\']));
        round_trip(&UuidProcessor, Value::Uuid(*b"\x12\x34\x56\x78\x9a\xbc\xde\xf0\x12\x34\x56\x78\x9a\xbc\xde\xf0"));
    }

    #[test]
    fn int_width_is_checked() {
        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        let mut buf = BytesMut::new();
        let err = IntProcessor::int2()
            .encode_binary(&Value::Int4(70_000), &ctx, &mut buf)
            .unwrap_err();
        assert!(matches!(err, CodecError::WrongValue { oid: oid::INT2, .. }));
        let err = IntProcessor::int4()
            .encode_text(&Value::from("12"), &ctx)
            .unwrap_err();
        assert!(matches!(err, CodecError::WrongValue { .. }));
    }

    #[test]
    fn bytea_escape_format() {
        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        assert_eq!(
            ByteaProcessor.decode_text("a\\000\\\\b", &ctx).unwrap(),
            Value::Bytea(vec![b'a', 0, b'\\', b'b'])
        );
        assert!(ByteaProcessor.decode_text("\\xabc", &ctx).is_err());
    }

    #[test]
    fn bytea_hex_format() {
        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        assert_eq!(
            ByteaProcessor.decode_text("\\xDE ad\nbe ef", &ctx).unwrap(),
            Value::Bytea(vec![0xde, 0xad, 0xbe, 0xef])
        );
        // signs are not hex digits
        assert!(ByteaProcessor.decode_text("\\x+f", &ctx).is_err());
        assert!(ByteaProcessor.decode_text("\\x0g", &ctx).is_err());
    }

    #[test]
    fn uuid_text_form() {
        let u = [0xa0u8; 16];
        assert_eq!(UuidProcessor::format(&u), "a0a0a0a0-a0a0-a0a0-a0a0-a0a0a0a0a0a0");

        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        for accepted in [
            "A0A0A0A0-A0A0-A0A0-A0A0-A0A0A0A0A0A0",
            "{a0a0a0a0-a0a0-a0a0-a0a0-a0a0a0a0a0a0}",
            "a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0",
        ] {
            assert_eq!(UuidProcessor.decode_text(accepted, &ctx).unwrap(), Value::Uuid(u));
        }
        assert!(UuidProcessor.decode_text("a0a0a0a0-a0a0-a0a0-a0a0-a0a0a0a0a0a", &ctx).is_err());
        assert!(UuidProcessor.decode_text("+0a0a0a0-a0a0-a0a0-a0a0-a0a0a0a0a0a0", &ctx).is_err());
    }

    #[test]
    fn passthrough_renders_through_natural_type() {
        let params = CodecParams::default();
        let reg = TypeRegistry::shared();
        let ctx = CodecContext::new(&params, &reg);
        let p = Passthrough::new(77_777);
        assert_eq!(p.encode_text(&Value::Int4(5), &ctx).unwrap(), "5");
        assert!(!p.supports_binary());
        let mut buf = BytesMut::new();
        assert!(matches!(
            p.encode_binary(&Value::Int4(5), &ctx, &mut buf),
            Err(CodecError::Unsupported { .. })
        ));
    }
}
