//! OID-keyed registry of value processors.
//!
//! The registry is built once and never mutated afterwards; sessions hold it
//! behind an `Arc` and read it concurrently. [`TypeRegistry::shared`] returns a
//! process-wide instance with the built-in types, while
//! [`TypeRegistry::builder`] lets callers add catalog-supplied custom types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use once_cell::sync::Lazy;

use super::array::ArrayProcessor;
use super::custom::{CustomType, VectorProcessor};
use super::datetime::{
    DateProcessor, IntervalProcessor, TimeProcessor, TimeTzProcessor, TimestampProcessor,
    TimestampTzProcessor,
};
use super::json::{JsonCodec, JsonProcessor, SerdeJsonCodec};
use super::numeric::NumericProcessor;
use super::scalar::{
    BoolProcessor, ByteaProcessor, FloatProcessor, IntProcessor, OidProcessor, Passthrough,
    TextProcessor, UuidProcessor,
};
use super::{oid, Format, Oid, Value};
use crate::error::CodecError;

/// Session settings that influence value conversion, tracked from `ParameterStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParams {
    pub client_encoding: String,
    pub time_zone: String,
    pub date_style: String,
    pub integer_datetimes: bool,
}

impl Default for CodecParams {
    fn default() -> Self {
        Self {
            client_encoding: String::from("UTF8"),
            time_zone: String::from("UTC"),
            date_style: String::from("ISO, MDY"),
            integer_datetimes: true,
        }
    }
}

impl CodecParams {
    /// Apply a server parameter; returns whether it affected conversion.
    pub fn apply(&mut self, name: &str, value: &str) -> bool {
        match name {
            "client_encoding" => self.client_encoding = value.to_string(),
            "TimeZone" => self.time_zone = value.to_string(),
            "DateStyle" => self.date_style = value.to_string(),
            "integer_datetimes" => self.integer_datetimes = value == "on",
            _ => return false,
        }
        true
    }

    /// Whether text values arrive as UTF-8.
    pub fn is_utf8(&self) -> bool {
        let enc = self.client_encoding.to_ascii_uppercase();
        enc == "UTF8" || enc == "UTF-8" || enc == "UNICODE"
    }

    /// Whether date/time text uses the ISO output format.
    pub fn iso_dates(&self) -> bool {
        self.date_style.trim_start().to_ascii_uppercase().starts_with("ISO")
    }
}

/// Everything a processor may consult while converting one value.
#[derive(Clone, Copy)]
pub struct CodecContext<'a> {
    pub params: &'a CodecParams,
    pub registry: &'a TypeRegistry,
}

impl<'a> CodecContext<'a> {
    pub fn new(params: &'a CodecParams, registry: &'a TypeRegistry) -> Self {
        Self { params, registry }
    }

    /// Interpret raw text bytes according to the client encoding.
    pub fn text<'b>(&self, oid: Oid, raw: &'b [u8]) -> Result<&'b str, CodecError> {
        let ascii_only = self.params.client_encoding.eq_ignore_ascii_case("SQL_ASCII");
        if !self.params.is_utf8() && !(ascii_only && raw.is_ascii()) {
            return Err(CodecError::unsupported(
                oid,
                "text in a non-UTF-8 client encoding",
                &self.params.client_encoding,
            ));
        }
        std::str::from_utf8(raw).map_err(|_| CodecError::malformed(oid, "invalid UTF-8", raw))
    }
}

/// Conversion quartet for one type OID.
///
/// Processors are stateless; anything session-specific arrives through the
/// [`CodecContext`].
pub trait ValueProcessor: Send + Sync + fmt::Debug {
    fn oid(&self) -> Oid;

    fn name(&self) -> &str;

    /// Whether the binary encode/decode paths exist.
    fn supports_binary(&self) -> bool {
        true
    }

    fn encode_binary(
        &self,
        value: &Value,
        ctx: &CodecContext<'_>,
        out: &mut BytesMut,
    ) -> Result<(), CodecError>;

    fn encode_text(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<String, CodecError>;

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError>;

    fn decode_text(&self, raw: &str, ctx: &CodecContext<'_>) -> Result<Value, CodecError>;
}

/// Immutable OID to processor map.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    processors: HashMap<Oid, Arc<dyn ValueProcessor>>,
    json: Arc<dyn JsonCodec>,
}

static SHARED: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::builder().build()));

impl TypeRegistry {
    /// Start from the built-in types.
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::new()
    }

    /// Process-wide registry holding only the built-in types.
    pub fn shared() -> Arc<TypeRegistry> {
        SHARED.clone()
    }

    pub fn get(&self, oid: Oid) -> Option<&Arc<dyn ValueProcessor>> {
        self.processors.get(&oid)
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.processors.contains_key(&oid)
    }

    /// Processor for `oid`, or a text pass-through for unregistered types.
    pub fn resolve(&self, oid: Oid) -> Arc<dyn ValueProcessor> {
        match self.processors.get(&oid) {
            Some(p) => p.clone(),
            None => Arc::new(Passthrough::new(oid)),
        }
    }

    /// Whether values of `oid` can travel in binary format.
    pub fn binary_capable(&self, oid: Oid) -> bool {
        self.processors
            .get(&oid)
            .map(|p| p.supports_binary())
            .unwrap_or(false)
    }

    pub fn json(&self) -> &dyn JsonCodec {
        self.json.as_ref()
    }

    /// Encode one non-null value as `oid` in `format`. Null encodes to `None`.
    pub fn encode(
        &self,
        oid: Oid,
        value: &Value,
        format: Format,
        params: &CodecParams,
    ) -> Result<Option<Bytes>, CodecError> {
        if value.is_null() {
            return Ok(None);
        }
        let ctx = CodecContext::new(params, self);
        let processor = self.resolve(oid);
        match format {
            Format::Binary => {
                let mut out = BytesMut::new();
                processor.encode_binary(value, &ctx, &mut out)?;
                Ok(Some(out.freeze()))
            }
            Format::Text => Ok(Some(Bytes::from(processor.encode_text(value, &ctx)?))),
        }
    }

    /// Decode one column; `None` is SQL null.
    pub fn decode(
        &self,
        oid: Oid,
        format: Format,
        raw: Option<&[u8]>,
        params: &CodecParams,
    ) -> Result<Value, CodecError> {
        let processor = self.resolve(oid);
        decode_with(processor.as_ref(), format, raw, &CodecContext::new(params, self))
    }
}

/// Decode through an already-resolved processor.
pub fn decode_with(
    processor: &dyn ValueProcessor,
    format: Format,
    raw: Option<&[u8]>,
    ctx: &CodecContext<'_>,
) -> Result<Value, CodecError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    match format {
        Format::Binary => processor.decode_binary(raw, ctx),
        Format::Text => {
            let text = ctx.text(processor.oid(), raw)?;
            processor.decode_text(text, ctx)
        }
    }
}

/// Builder collecting processors before the registry is frozen.
pub struct TypeRegistryBuilder {
    processors: HashMap<Oid, Arc<dyn ValueProcessor>>,
    json: Arc<dyn JsonCodec>,
}

impl Default for TypeRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistryBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            processors: HashMap::new(),
            json: Arc::new(SerdeJsonCodec),
        };
        builder.register_builtins();
        builder
    }

    fn register_builtins(&mut self) {
        let builtins: Vec<Arc<dyn ValueProcessor>> = vec![
            Arc::new(BoolProcessor),
            Arc::new(IntProcessor::int2()),
            Arc::new(IntProcessor::int4()),
            Arc::new(IntProcessor::int8()),
            Arc::new(OidProcessor),
            Arc::new(FloatProcessor::float4()),
            Arc::new(FloatProcessor::float8()),
            Arc::new(TextProcessor::new(oid::TEXT, "text")),
            Arc::new(TextProcessor::new(oid::VARCHAR, "varchar")),
            Arc::new(TextProcessor::new(oid::BPCHAR, "bpchar")),
            Arc::new(TextProcessor::new(oid::NAME, "name")),
            Arc::new(TextProcessor::new(oid::CHAR, "char")),
            Arc::new(TextProcessor::new(oid::UNKNOWN, "unknown")),
            Arc::new(ByteaProcessor),
            Arc::new(UuidProcessor),
            Arc::new(NumericProcessor),
            Arc::new(DateProcessor),
            Arc::new(TimeProcessor),
            Arc::new(TimeTzProcessor),
            Arc::new(TimestampProcessor),
            Arc::new(TimestampTzProcessor),
            Arc::new(IntervalProcessor),
            Arc::new(JsonProcessor::json()),
            Arc::new(JsonProcessor::jsonb()),
        ];
        for p in builtins {
            self.processors.insert(p.oid(), p);
        }
        for &(array, element, name) in oid::ARRAYS {
            self.processors
                .insert(array, Arc::new(ArrayProcessor::new(array, element, name)));
        }
    }

    /// Add or replace a processor.
    pub fn register(mut self, processor: Arc<dyn ValueProcessor>) -> Self {
        self.processors.insert(processor.oid(), processor);
        self
    }

    /// Add an array type whose elements use the processor for `element`.
    pub fn register_array(mut self, array: Oid, element: Oid, name: &str) -> Self {
        self.processors
            .insert(array, Arc::new(ArrayProcessor::new(array, element, name)));
        self
    }

    /// Add a catalog-supplied extension type.
    pub fn register_custom(self, oid: Oid, name: &str, kind: CustomType) -> Self {
        let processor: Arc<dyn ValueProcessor> = match kind {
            CustomType::Enum => Arc::new(TextProcessor::new(oid, name)),
            CustomType::Vector => Arc::new(VectorProcessor::new(oid, name)),
        };
        self.register(processor)
    }

    /// Replace the JSON serializer used by `json`/`jsonb`.
    pub fn with_json_codec(mut self, codec: Arc<dyn JsonCodec>) -> Self {
        self.json = codec;
        self
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            processors: self.processors,
            json: self.json,
        }
    }
}
