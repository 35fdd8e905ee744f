//! COPY data sources and row encoders.
//!
//! `COPY ... FROM STDIN` consumes either a raw byte stream or host rows that
//! a [`CopyEncoder`] renders as CSV, text or binary COPY data. Rows are
//! batched into `CopyData` chunks of roughly [`CHUNK_SIZE`] bytes.

use std::fmt;
use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::{CodecError, ProtocolError, Result};
use crate::types::registry::{CodecParams, TypeRegistry};
use crate::types::{oid, Format, Oid, Value};

/// Target size of one `CopyData` message built from rows.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// `PGCOPY\n\xFF\r\n\0`
pub const BINARY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xFF\r\n\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFormat {
    Text,
    Csv,
    Binary,
}

/// Renders host rows as COPY data.
#[derive(Debug, Clone)]
pub struct CopyEncoder {
    format: CopyFormat,
    /// Column types; missing or unspecified entries use the value's own type.
    column_types: Vec<Oid>,
}

impl CopyEncoder {
    pub fn new(format: CopyFormat) -> Self {
        Self {
            format,
            column_types: Vec::new(),
        }
    }

    pub fn csv() -> Self {
        Self::new(CopyFormat::Csv)
    }

    pub fn text() -> Self {
        Self::new(CopyFormat::Text)
    }

    pub fn binary(column_types: Vec<Oid>) -> Self {
        Self::new(CopyFormat::Binary).with_column_types(column_types)
    }

    pub fn with_column_types(mut self, column_types: Vec<Oid>) -> Self {
        self.column_types = column_types;
        self
    }

    pub fn format(&self) -> CopyFormat {
        self.format
    }

    fn column_oid(&self, index: usize, value: &Value) -> Oid {
        match self.column_types.get(index) {
            Some(&oid) if oid != oid::UNSPECIFIED => oid,
            _ => value.natural_oid(),
        }
    }

    /// Bytes that precede the first row.
    pub fn write_header(&self, out: &mut BytesMut) {
        if self.format == CopyFormat::Binary {
            out.put_slice(BINARY_SIGNATURE);
            out.put_i32(0);
            out.put_i32(0);
        }
    }

    /// Bytes that follow the last row.
    pub fn write_trailer(&self, out: &mut BytesMut) {
        if self.format == CopyFormat::Binary {
            out.put_i16(-1);
        }
    }

    pub fn encode_row(
        &self,
        row: &[Value],
        registry: &TypeRegistry,
        params: &CodecParams,
        out: &mut BytesMut,
    ) -> Result<()> {
        match self.format {
            CopyFormat::Binary => self.encode_binary(row, registry, params, out),
            CopyFormat::Csv => {
                for (i, value) in row.iter().enumerate() {
                    if i > 0 {
                        out.put_u8(b',');
                    }
                    if let Some(text) = self.text_cell(i, value, registry, params)? {
                        put_csv_cell(&text, out);
                    }
                }
                out.put_slice(b"\r\n");
                Ok(())
            }
            CopyFormat::Text => {
                for (i, value) in row.iter().enumerate() {
                    if i > 0 {
                        out.put_u8(b'\t');
                    }
                    match self.text_cell(i, value, registry, params)? {
                        Some(text) => put_text_cell(&text, out),
                        None => out.put_slice(b"\\N"),
                    }
                }
                out.put_u8(b'\n');
                Ok(())
            }
        }
    }

    fn text_cell(
        &self,
        index: usize,
        value: &Value,
        registry: &TypeRegistry,
        params: &CodecParams,
    ) -> Result<Option<String>> {
        let oid = self.column_oid(index, value);
        let Some(bytes) = registry.encode(oid, value, Format::Text, params)? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::malformed(oid, "text rendering is not UTF-8", ""))?;
        Ok(Some(text))
    }

    fn encode_binary(
        &self,
        row: &[Value],
        registry: &TypeRegistry,
        params: &CodecParams,
        out: &mut BytesMut,
    ) -> Result<()> {
        let count = i16::try_from(row.len())
            .map_err(|_| ProtocolError::CopyAborted(format!("{} columns in one row", row.len())))?;
        out.put_i16(count);
        for (i, value) in row.iter().enumerate() {
            let oid = self.column_oid(i, value);
            match registry.encode(oid, value, Format::Binary, params)? {
                Some(bytes) => {
                    let len = i32::try_from(bytes.len()).map_err(|_| {
                        ProtocolError::CopyAborted(format!("column {i} exceeds the field limit"))
                    })?;
                    out.put_i32(len);
                    out.put_slice(&bytes);
                }
                None => out.put_i32(-1),
            }
        }
        Ok(())
    }
}

fn put_csv_cell(text: &str, out: &mut BytesMut) {
    let needs_quotes = text.is_empty()
        || text == "\\."
        || text.bytes().any(|b| matches!(b, b',' | b'"' | b'\r' | b'\n'));
    if !needs_quotes {
        out.put_slice(text.as_bytes());
        return;
    }
    out.put_u8(b'"');
    for b in text.bytes() {
        if b == b'"' {
            out.put_u8(b'"');
        }
        out.put_u8(b);
    }
    out.put_u8(b'"');
}

fn put_text_cell(text: &str, out: &mut BytesMut) {
    for b in text.bytes() {
        match b {
            b'\\' => out.put_slice(b"\\\\"),
            b'\t' => out.put_slice(b"\\t"),
            b'\n' => out.put_slice(b"\\n"),
            b'\r' => out.put_slice(b"\\r"),
            other => out.put_u8(other),
        }
    }
}

/// Data fed to `COPY ... FROM STDIN`.
pub enum CopySource {
    /// Pre-formatted COPY data, forwarded chunk by chunk.
    Stream(BoxStream<'static, io::Result<Bytes>>),
    /// Host rows rendered by `encoder`.
    Rows {
        encoder: CopyEncoder,
        rows: Box<dyn Iterator<Item = Vec<Value>> + Send>,
    },
}

impl CopySource {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        CopySource::Stream(stream.boxed())
    }

    pub fn rows<I>(encoder: CopyEncoder, rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<Value>>,
        I::IntoIter: Send + 'static,
    {
        CopySource::Rows {
            encoder,
            rows: Box::new(rows.into_iter()),
        }
    }
}

impl fmt::Debug for CopySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopySource::Stream(_) => f.write_str("CopySource::Stream"),
            CopySource::Rows { encoder, .. } => f
                .debug_struct("CopySource::Rows")
                .field("encoder", encoder)
                .finish_non_exhaustive(),
        }
    }
}

/// Pulls `CopyData` payloads out of a [`CopySource`].
pub(crate) struct CopyPump {
    source: CopySource,
    started: bool,
    finished: bool,
}

impl CopyPump {
    pub(crate) fn new(source: CopySource) -> Self {
        Self {
            source,
            started: false,
            finished: false,
        }
    }

    /// Next chunk, `None` once the source is exhausted. Source failures are
    /// reported as [`ProtocolError::CopyAborted`] or codec errors, never as
    /// transport errors of the session.
    pub(crate) async fn next_chunk(
        &mut self,
        registry: &TypeRegistry,
        params: &CodecParams,
    ) -> Option<Result<Bytes>> {
        if self.finished {
            return None;
        }
        match &mut self.source {
            CopySource::Stream(stream) => match stream.next().await {
                Some(Ok(chunk)) => Some(Ok(chunk)),
                Some(Err(e)) => {
                    self.finished = true;
                    Some(Err(ProtocolError::CopyAborted(format!("source failed: {e}"))))
                }
                None => {
                    self.finished = true;
                    None
                }
            },
            CopySource::Rows { encoder, rows } => {
                let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
                if !self.started {
                    encoder.write_header(&mut buf);
                    self.started = true;
                }
                while buf.len() < CHUNK_SIZE {
                    let Some(row) = rows.next() else {
                        encoder.write_trailer(&mut buf);
                        self.finished = true;
                        break;
                    };
                    if let Err(e) = encoder.encode_row(&row, registry, params, &mut buf) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
                if buf.is_empty() {
                    None
                } else {
                    Some(Ok(buf.freeze()))
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode(encoder: &CopyEncoder, row: Vec<Value>) -> Vec<u8> {
        let mut out = BytesMut::new();
        encoder
            .encode_row(&row, &TypeRegistry::shared(), &CodecParams::default(), &mut out)
            .unwrap();
        out.to_vec()
    }

    #[test]
    fn csv_quotes_separators_and_leaves_null_empty() {
        let row = vec![Value::Int4(1), Value::Text("a,b".into()), Value::Null];
        assert_eq!(encode(&CopyEncoder::csv(), row), b"1,\"a,b\",\r\n");
    }

    #[test]
    fn csv_doubles_quotes_and_quotes_empty_strings() {
        let row = vec![Value::Text("say \"hi\"".into()), Value::Text(String::new())];
        assert_eq!(encode(&CopyEncoder::csv(), row), b"\"say \"\"hi\"\"\",\"\"\r\n");
    }

    #[test]
    fn text_escapes_control_characters() {
        let row = vec![Value::Text("a\tb\\c\n".into()), Value::Null];
        assert_eq!(encode(&CopyEncoder::text(), row), b"a\\tb\\\\c\\n\t\\N\n");
    }

    #[test]
    fn binary_row_is_length_prefixed() {
        let encoder = CopyEncoder::binary(vec![oid::INT4, oid::TEXT]);
        let bytes = encode(&encoder, vec![Value::Int4(5), Value::Null]);
        assert_eq!(bytes, [0, 2, 0, 0, 0, 4, 0, 0, 0, 5, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[tokio::test]
    async fn binary_pump_wraps_header_and_trailer() {
        let source = CopySource::rows(
            CopyEncoder::binary(vec![oid::INT2]),
            vec![vec![Value::Int2(7)]],
        );
        let mut pump = CopyPump::new(source);
        let registry = TypeRegistry::shared();
        let params = CodecParams::default();
        let chunk = pump.next_chunk(&registry, &params).await.unwrap().unwrap();
        assert!(chunk.starts_with(BINARY_SIGNATURE));
        assert_eq!(&chunk[11..19], &[0; 8]);
        assert_eq!(&chunk[19..], &[0, 1, 0, 0, 0, 2, 0, 7, 0xFF, 0xFF]);
        assert!(pump.next_chunk(&registry, &params).await.is_none());
    }

    #[tokio::test]
    async fn stream_error_becomes_copy_aborted() {
        let chunks = vec![
            Ok(Bytes::from_static(b"1\n")),
            Err(io::Error::new(io::ErrorKind::Other, "disk gone")),
        ];
        let mut pump = CopyPump::new(CopySource::stream(futures::stream::iter(chunks)));
        let registry = TypeRegistry::shared();
        let params = CodecParams::default();
        assert!(pump.next_chunk(&registry, &params).await.unwrap().is_ok());
        let err = pump.next_chunk(&registry, &params).await.unwrap().unwrap_err();
        assert!(matches!(err, ProtocolError::CopyAborted(_)));
        assert!(!err.is_fatal());
        assert!(pump.next_chunk(&registry, &params).await.is_none());
    }
}
