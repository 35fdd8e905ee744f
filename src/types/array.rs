//! One- and multi-dimensional arrays.
//!
//! Binary layout:
//!
//! ```text
//! [ndim: i32] [has_nulls: i32] [element oid: u32]
//! ([size: i32] [lower bound: i32]) * ndim
//! ([len: i32] [bytes]) * product(sizes)     -- len -1 is null
//! ```
//!
//! Text layout is the brace-delimited literal, e.g. `{{1,2},{NULL,"a,b"}}`.

use bytes::{BufMut, BytesMut};

use super::registry::{decode_with, CodecContext, ValueProcessor};
use super::{Format, Oid, Value};
use crate::core::wire::WireReader;
use crate::error::CodecError;

/// Same limit as the server's `MAXDIM`.
const MAX_DIMENSIONS: usize = 6;

#[derive(Debug)]
pub struct ArrayProcessor {
    oid: Oid,
    element: Oid,
    name: String,
}

impl ArrayProcessor {
    pub fn new(oid: Oid, element: Oid, name: &str) -> Self {
        Self {
            oid,
            element,
            name: name.to_string(),
        }
    }

    pub fn element(&self) -> Oid {
        self.element
    }

    fn items<'v>(&self, value: &'v Value) -> Result<&'v [Value], CodecError> {
        value
            .as_array()
            .ok_or_else(|| CodecError::wrong_value(self.oid, value))
    }

    /// Dimension sizes of a rectangular nested array.
    fn shape(&self, items: &[Value]) -> Result<Vec<usize>, CodecError> {
        let mut dims = vec![items.len()];
        let mut probe = items;
        while let Some(Value::Array(inner)) = probe.first() {
            dims.push(inner.len());
            probe = inner.as_slice();
        }
        if dims.len() > MAX_DIMENSIONS {
            return Err(CodecError::wrong_value(self.oid, "too many dimensions"));
        }
        self.check_shape(items, &dims)?;
        Ok(dims)
    }

    fn check_shape(&self, items: &[Value], dims: &[usize]) -> Result<(), CodecError> {
        if items.len() != dims[0] {
            return Err(CodecError::wrong_value(self.oid, "ragged multi-dimensional array"));
        }
        for item in items {
            match (item, dims.len() > 1) {
                (Value::Array(inner), true) => self.check_shape(inner, &dims[1..])?,
                (Value::Array(_), false) | (_, true) => {
                    return Err(CodecError::wrong_value(self.oid, "ragged multi-dimensional array"))
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn leaves<'v>(items: &'v [Value], out: &mut Vec<&'v Value>) {
        for item in items {
            match item {
                Value::Array(inner) => Self::leaves(inner, out),
                leaf => out.push(leaf),
            }
        }
    }

    fn reshape(dims: &[usize], flat: &mut std::vec::IntoIter<Value>) -> Vec<Value> {
        match dims {
            [] => Vec::new(),
            [last] => flat.take(*last).collect(),
            [first, rest @ ..] => (0..*first)
                .map(|_| Value::Array(Self::reshape(rest, flat)))
                .collect(),
        }
    }

    fn write_text(
        &self,
        items: &[Value],
        element: &dyn ValueProcessor,
        ctx: &CodecContext<'_>,
        out: &mut String,
    ) -> Result<(), CodecError> {
        out.push('{');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            match item {
                Value::Null => out.push_str("NULL"),
                Value::Array(inner) => self.write_text(inner, element, ctx, out)?,
                leaf => push_element(out, &element.encode_text(leaf, ctx)?),
            }
        }
        out.push('}');
        Ok(())
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s.eq_ignore_ascii_case("NULL")
        || s.chars()
            .any(|c| matches!(c, '"' | '\\' | ',' | '{' | '}') || c.is_whitespace())
}

fn push_element(out: &mut String, s: &str) {
    if !needs_quotes(s) {
        out.push_str(s);
        return;
    }
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Recursive-descent parser for array literals.
struct TextParser<'a, 'c> {
    src: &'a str,
    pos: usize,
    oid: Oid,
    element: &'a dyn ValueProcessor,
    ctx: &'a CodecContext<'c>,
}

impl<'a, 'c> TextParser<'a, 'c> {
    fn error(&self, reason: &str) -> CodecError {
        CodecError::malformed(self.oid, format!("{reason} at offset {}", self.pos), self.src)
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), CodecError> {
        self.skip_ws();
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    /// Skip an explicit bounds decoration such as `[0:2]=`.
    fn skip_bounds(&mut self) -> Result<(), CodecError> {
        self.skip_ws();
        if self.peek() == Some(b'[') {
            let eq = self.src[self.pos..]
                .find('=')
                .ok_or_else(|| self.error("unterminated dimension decoration"))?;
            self.pos += eq + 1;
        }
        Ok(())
    }

    fn parse_array(&mut self, depth: usize) -> Result<Vec<Value>, CodecError> {
        if depth > MAX_DIMENSIONS {
            return Err(self.error("too many dimensions"));
        }
        self.expect(b'{')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            self.skip_ws();
            let item = match self.peek() {
                Some(b'{') => Value::Array(self.parse_array(depth + 1)?),
                Some(b'"') => {
                    let s = self.parse_quoted()?;
                    self.element.decode_text(&s, self.ctx)?
                }
                Some(_) => {
                    let (token, escaped) = self.parse_unquoted();
                    if token.is_empty() && !escaped {
                        return Err(self.error("empty element"));
                    }
                    if !escaped && token.eq_ignore_ascii_case("NULL") {
                        Value::Null
                    } else {
                        self.element.decode_text(&token, self.ctx)?
                    }
                }
                None => return Err(self.error("unexpected end of array")),
            };
            items.push(item);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn parse_quoted(&mut self) -> Result<String, CodecError> {
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(self.error("unterminated quoted element"))
    }

    /// Read up to the next unescaped `,` or `}`. Trailing whitespace is
    /// dropped unless escaped. The flag reports whether any escape was seen,
    /// because an escaped `NULL` is a string.
    fn parse_unquoted(&mut self) -> (String, bool) {
        let src = self.src;
        let mut out = String::new();
        let mut keep = 0;
        let mut escaped = false;
        let mut end = src.len();
        let mut chars = src[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                ',' | '}' => {
                    end = self.pos + i;
                    break;
                }
                '\\' => {
                    let Some((_, next)) = chars.next() else { break };
                    out.push(next);
                    keep = out.len();
                    escaped = true;
                }
                c => {
                    out.push(c);
                    if !c.is_whitespace() {
                        keep = out.len();
                    }
                }
            }
        }
        self.pos = end;
        out.truncate(keep);
        (out, escaped)
    }
}

impl ValueProcessor for ArrayProcessor {
    fn oid(&self) -> Oid {
        self.oid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode_binary(
        &self,
        value: &Value,
        ctx: &CodecContext<'_>,
        out: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let items = self.items(value)?;
        let element = ctx.registry.resolve(self.element);
        let dims = if items.is_empty() {
            Vec::new()
        } else {
            self.shape(items)?
        };
        let mut leaves = Vec::new();
        Self::leaves(items, &mut leaves);

        out.put_i32(dims.len() as i32);
        out.put_i32(i32::from(leaves.iter().any(|v| v.is_null())));
        out.put_u32(self.element);
        for size in &dims {
            let size = i32::try_from(*size)
                .map_err(|_| CodecError::wrong_value(self.oid, "dimension too large"))?;
            out.put_i32(size);
            out.put_i32(1);
        }
        for leaf in leaves {
            if leaf.is_null() {
                out.put_i32(-1);
                continue;
            }
            let start = out.len();
            out.put_i32(0);
            element.encode_binary(leaf, ctx, out)?;
            let len = i32::try_from(out.len() - start - 4)
                .map_err(|_| CodecError::wrong_value(self.oid, "element too large"))?;
            out[start..start + 4].copy_from_slice(&len.to_be_bytes());
        }
        Ok(())
    }

    fn encode_text(&self, value: &Value, ctx: &CodecContext<'_>) -> Result<String, CodecError> {
        let items = self.items(value)?;
        if !items.is_empty() {
            self.shape(items)?;
        }
        let element = ctx.registry.resolve(self.element);
        let mut out = String::new();
        self.write_text(items, element.as_ref(), ctx, &mut out)?;
        Ok(out)
    }

    fn decode_binary(&self, raw: &[u8], ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        let bad = |reason: &str| CodecError::malformed(self.oid, reason, raw);
        let mut r = WireReader::new(raw);
        let ndim = r.read_i32().map_err(|_| bad("truncated header"))?;
        let _has_nulls = r.read_i32().map_err(|_| bad("truncated header"))?;
        let element_oid = r.read_u32().map_err(|_| bad("truncated header"))?;
        if ndim < 0 || ndim as usize > MAX_DIMENSIONS {
            return Err(bad("invalid dimension count"));
        }

        let mut dims = Vec::with_capacity(ndim as usize);
        for _ in 0..ndim {
            let size = r.read_i32().map_err(|_| bad("truncated dimensions"))?;
            let _lower_bound = r.read_i32().map_err(|_| bad("truncated dimensions"))?;
            let size = usize::try_from(size).map_err(|_| bad("negative dimension size"))?;
            dims.push(size);
        }
        let total = if dims.is_empty() {
            0
        } else {
            dims.iter()
                .try_fold(1usize, |acc, d| acc.checked_mul(*d))
                .ok_or_else(|| bad("dimension product overflows"))?
        };
        // Each element needs at least its length word.
        if total > r.remaining() / 4 {
            return Err(bad("element count exceeds body"));
        }

        // One lookup for the whole array.
        let element = ctx.registry.resolve(element_oid);
        let mut flat = Vec::with_capacity(total);
        for _ in 0..total {
            let item = r.read_len_prefixed().map_err(|_| bad("truncated element"))?;
            flat.push(decode_with(element.as_ref(), Format::Binary, item, ctx)?);
        }
        if !r.is_empty() {
            return Err(bad("trailing bytes"));
        }
        Ok(Value::Array(Self::reshape(&dims, &mut flat.into_iter())))
    }

    fn decode_text(&self, raw: &str, ctx: &CodecContext<'_>) -> Result<Value, CodecError> {
        let element = ctx.registry.resolve(self.element);
        let mut parser = TextParser {
            src: raw,
            pos: 0,
            oid: self.oid,
            element: element.as_ref(),
            ctx,
        };
        parser.skip_bounds()?;
        let items = parser.parse_array(1)?;
        parser.skip_ws();
        if parser.pos != raw.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(Value::Array(items))
    }
}
