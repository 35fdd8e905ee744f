//! Server-to-client messages.
//!
//! Bodies are parsed eagerly only as far as their fixed structure. `DataRow`
//! keeps the frame bytes plus a per-column offset table; column values are
//! decoded later, on demand, by the row view.

use std::sync::Arc;

use bytes::Bytes;

use crate::core::codec::BackendFrame;
use crate::core::wire::WireReader;
use crate::error::{ProtocolError, Result};
use crate::protocol::fields::ServerError;
use crate::types::{Format, Oid};

/// Backend message tags.
pub mod tags {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const COPY_IN_RESPONSE: u8 = b'G';
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
    pub const DATA_ROW: u8 = b'D';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
    pub const NO_DATA: u8 = b'n';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// Authentication request codes.
pub mod auth_codes {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Body of an `Authentication*` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Sasl { mechanisms: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
    /// Kerberos, GSS, SSPI and anything newer.
    Unsupported { code: i32 },
}

/// Transaction state reported by `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    #[default]
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::InTransaction),
            b'E' => Ok(TransactionStatus::Failed),
            other => Err(ProtocolError::protocol(format!(
                "Unknown transaction status '{}'",
                other as char
            ))),
        }
    }
}

/// One result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub table_oid: Oid,
    pub column_id: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowDescription {
    columns: Vec<Column>,
}

impl RowDescription {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    fn parse(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let count = r.read_u16()?;
        let mut columns = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let name = r.read_cstr()?.to_string();
            let table_oid = r.read_u32()?;
            let column_id = r.read_i16()?;
            let type_oid = r.read_u32()?;
            let type_size = r.read_i16()?;
            let type_modifier = r.read_i32()?;
            let code = r.read_i16()?;
            let format = Format::from_code(code)
                .ok_or_else(|| ProtocolError::protocol(format!("Unknown format code {code}")))?;
            columns.push(Column {
                name,
                table_oid,
                column_id,
                type_oid,
                type_size,
                type_modifier,
                format,
            });
        }
        r.finish()?;
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Index of the first column called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Copy with every column switched to `format`, as the server would
    /// describe the portal after a Bind requesting it.
    pub fn with_format(&self, format: Format) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .cloned()
                .map(|c| Column { format, ..c })
                .collect(),
        }
    }
}

/// Raw row with a column offset table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    body: Bytes,
    ranges: Vec<Option<(usize, usize)>>,
}

impl DataRow {
    pub fn parse(body: Bytes) -> Result<Self> {
        let mut r = WireReader::new(&body);
        let count = r.read_u16()?;
        let mut ranges = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let len = r.read_i32()?;
            if len < 0 {
                ranges.push(None);
                continue;
            }
            let start = r.position();
            r.skip(len as usize)?;
            ranges.push(Some((start, len as usize)));
        }
        r.finish()?;
        Ok(Self { body, ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Raw bytes of column `index`; `Some(None)` is SQL null.
    pub fn get(&self, index: usize) -> Option<Option<&[u8]>> {
        self.ranges
            .get(index)
            .map(|range| range.map(|(start, len)| &self.body[start..start + len]))
    }

    /// Zero-copy slice of column `index`.
    pub fn get_bytes(&self, index: usize) -> Option<Option<Bytes>> {
        self.ranges
            .get(index)
            .map(|range| range.map(|(start, len)| self.body.slice(start..start + len)))
    }
}

/// Parsed `CommandComplete` tag such as `INSERT 0 3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag {
    raw: String,
}

impl CommandTag {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Leading command word(s), e.g. `INSERT` or `CREATE TABLE`.
    pub fn command(&self) -> &str {
        match self.raw.rfind(' ') {
            Some(idx) if self.raw[idx + 1..].bytes().all(|b| b.is_ascii_digit()) => {
                let head = &self.raw[..idx];
                if self.raw.starts_with("INSERT ") {
                    head.split(' ').next().unwrap_or(head)
                } else {
                    head
                }
            }
            _ => &self.raw,
        }
    }

    /// Rows affected or returned, for commands that report a count.
    pub fn rows(&self) -> Option<u64> {
        let (_, last) = self.raw.rsplit_once(' ')?;
        last.parse().ok()
    }

    /// OID of the inserted row for single-row `INSERT` into a table with OIDs.
    pub fn insert_oid(&self) -> Option<Oid> {
        let mut parts = self.raw.split(' ');
        if parts.next()? != "INSERT" {
            return None;
        }
        parts.next()?.parse().ok()
    }
}

/// Asynchronous `LISTEN`/`NOTIFY` delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub process_id: i32,
    pub channel: String,
    pub payload: String,
}

/// Body of `CopyInResponse`/`CopyOutResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    pub format: Format,
    pub column_formats: Vec<Format>,
}

impl CopyResponse {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let overall = r.read_u8()?;
        let format = Format::from_code(i16::from(overall))
            .ok_or_else(|| ProtocolError::protocol(format!("Unknown COPY format {overall}")))?;
        let count = r.read_u16()?;
        let mut column_formats = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let code = r.read_i16()?;
            column_formats.push(
                Format::from_code(code)
                    .ok_or_else(|| ProtocolError::protocol(format!("Unknown format code {code}")))?,
            );
        }
        r.finish()?;
        Ok(Self {
            format,
            column_formats,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    Authentication(AuthRequest),
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery(TransactionStatus),
    RowDescription(Arc<RowDescription>),
    DataRow(DataRow),
    CommandComplete(CommandTag),
    ErrorResponse(ServerError),
    NoticeResponse(ServerError),
    ParameterDescription(Vec<Oid>),
    ParseComplete,
    BindComplete,
    CloseComplete,
    CopyInResponse(CopyResponse),
    CopyOutResponse(CopyResponse),
    CopyBothResponse(CopyResponse),
    CopyData(Bytes),
    CopyDone,
    NotificationResponse(Notification),
    NegotiateProtocolVersion { newest_minor: i32, unrecognized: Vec<String> },
    PortalSuspended,
    EmptyQueryResponse,
    NoData,
    /// A `DataRow` or `CopyData` whose body was dropped in skip mode.
    Discarded { tag: u8, len: usize },
}

impl BackendMessage {
    pub fn from_frame(frame: BackendFrame) -> Result<Self> {
        match frame {
            BackendFrame::Full { tag, body } => Self::parse(tag, body),
            BackendFrame::Skipped { tag, len } => Ok(BackendMessage::Discarded { tag, len }),
        }
    }

    /// Parse one frame body by tag.
    pub fn parse(tag: u8, body: Bytes) -> Result<Self> {
        let msg = match tag {
            tags::AUTHENTICATION => BackendMessage::Authentication(parse_auth(&body)?),
            tags::PARAMETER_STATUS => {
                let mut r = WireReader::new(&body);
                let name = r.read_cstr()?.to_string();
                let value = r.read_cstr()?.to_string();
                r.finish()?;
                BackendMessage::ParameterStatus { name, value }
            }
            tags::BACKEND_KEY_DATA => {
                let mut r = WireReader::new(&body);
                let process_id = r.read_i32()?;
                let secret_key = r.read_i32()?;
                r.finish()?;
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                }
            }
            tags::READY_FOR_QUERY => {
                let mut r = WireReader::new(&body);
                let status = TransactionStatus::from_byte(r.read_u8()?)?;
                r.finish()?;
                BackendMessage::ReadyForQuery(status)
            }
            tags::ROW_DESCRIPTION => {
                BackendMessage::RowDescription(Arc::new(RowDescription::parse(&body)?))
            }
            tags::DATA_ROW => BackendMessage::DataRow(DataRow::parse(body)?),
            tags::COMMAND_COMPLETE => {
                let mut r = WireReader::new(&body);
                let tag = CommandTag::new(r.read_cstr()?);
                r.finish()?;
                BackendMessage::CommandComplete(tag)
            }
            tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(ServerError::parse(&body)?),
            tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(ServerError::parse(&body)?),
            tags::PARAMETER_DESCRIPTION => {
                let mut r = WireReader::new(&body);
                let count = r.read_u16()?;
                let oids = (0..count)
                    .map(|_| r.read_u32())
                    .collect::<Result<Vec<_>>>()?;
                r.finish()?;
                BackendMessage::ParameterDescription(oids)
            }
            tags::PARSE_COMPLETE => empty(body, BackendMessage::ParseComplete)?,
            tags::BIND_COMPLETE => empty(body, BackendMessage::BindComplete)?,
            tags::CLOSE_COMPLETE => empty(body, BackendMessage::CloseComplete)?,
            tags::COPY_IN_RESPONSE => BackendMessage::CopyInResponse(CopyResponse::parse(&body)?),
            tags::COPY_OUT_RESPONSE => {
                BackendMessage::CopyOutResponse(CopyResponse::parse(&body)?)
            }
            tags::COPY_BOTH_RESPONSE => {
                BackendMessage::CopyBothResponse(CopyResponse::parse(&body)?)
            }
            tags::COPY_DATA => BackendMessage::CopyData(body),
            tags::COPY_DONE => empty(body, BackendMessage::CopyDone)?,
            tags::NOTIFICATION_RESPONSE => {
                let mut r = WireReader::new(&body);
                let process_id = r.read_i32()?;
                let channel = r.read_cstr()?.to_string();
                let payload = r.read_cstr()?.to_string();
                r.finish()?;
                BackendMessage::NotificationResponse(Notification {
                    process_id,
                    channel,
                    payload,
                })
            }
            tags::NEGOTIATE_PROTOCOL_VERSION => {
                let mut r = WireReader::new(&body);
                let newest_minor = r.read_i32()?;
                let count = r.read_i32()?;
                let unrecognized = (0..count.max(0))
                    .map(|_| r.read_cstr().map(str::to_string))
                    .collect::<Result<Vec<_>>>()?;
                r.finish()?;
                BackendMessage::NegotiateProtocolVersion {
                    newest_minor,
                    unrecognized,
                }
            }
            tags::PORTAL_SUSPENDED => empty(body, BackendMessage::PortalSuspended)?,
            tags::EMPTY_QUERY_RESPONSE => empty(body, BackendMessage::EmptyQueryResponse)?,
            tags::NO_DATA => empty(body, BackendMessage::NoData)?,
            other => {
                return Err(ProtocolError::protocol(format!(
                    "Unknown backend message tag '{}' (0x{other:02x})",
                    other as char
                )))
            }
        };
        Ok(msg)
    }

    /// Wire tag of this message.
    pub fn tag(&self) -> u8 {
        match self {
            BackendMessage::Authentication(_) => tags::AUTHENTICATION,
            BackendMessage::ParameterStatus { .. } => tags::PARAMETER_STATUS,
            BackendMessage::BackendKeyData { .. } => tags::BACKEND_KEY_DATA,
            BackendMessage::ReadyForQuery(_) => tags::READY_FOR_QUERY,
            BackendMessage::RowDescription(_) => tags::ROW_DESCRIPTION,
            BackendMessage::DataRow(_) => tags::DATA_ROW,
            BackendMessage::CommandComplete(_) => tags::COMMAND_COMPLETE,
            BackendMessage::ErrorResponse(_) => tags::ERROR_RESPONSE,
            BackendMessage::NoticeResponse(_) => tags::NOTICE_RESPONSE,
            BackendMessage::ParameterDescription(_) => tags::PARAMETER_DESCRIPTION,
            BackendMessage::ParseComplete => tags::PARSE_COMPLETE,
            BackendMessage::BindComplete => tags::BIND_COMPLETE,
            BackendMessage::CloseComplete => tags::CLOSE_COMPLETE,
            BackendMessage::CopyInResponse(_) => tags::COPY_IN_RESPONSE,
            BackendMessage::CopyOutResponse(_) => tags::COPY_OUT_RESPONSE,
            BackendMessage::CopyBothResponse(_) => tags::COPY_BOTH_RESPONSE,
            BackendMessage::CopyData(_) => tags::COPY_DATA,
            BackendMessage::CopyDone => tags::COPY_DONE,
            BackendMessage::NotificationResponse(_) => tags::NOTIFICATION_RESPONSE,
            BackendMessage::NegotiateProtocolVersion { .. } => tags::NEGOTIATE_PROTOCOL_VERSION,
            BackendMessage::PortalSuspended => tags::PORTAL_SUSPENDED,
            BackendMessage::EmptyQueryResponse => tags::EMPTY_QUERY_RESPONSE,
            BackendMessage::NoData => tags::NO_DATA,
            BackendMessage::Discarded { tag, .. } => *tag,
        }
    }

    /// Messages the server may send at any time, outside the request/reply flow.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            BackendMessage::NoticeResponse(_)
                | BackendMessage::NotificationResponse(_)
                | BackendMessage::ParameterStatus { .. }
                | BackendMessage::NegotiateProtocolVersion { .. }
        )
    }
}

fn empty(body: Bytes, msg: BackendMessage) -> Result<BackendMessage> {
    if body.is_empty() {
        Ok(msg)
    } else {
        Err(ProtocolError::protocol(format!(
            "Message '{}' should have an empty body",
            msg.tag() as char
        )))
    }
}

fn parse_auth(body: &[u8]) -> Result<AuthRequest> {
    let mut r = WireReader::new(body);
    let code = r.read_i32()?;
    let req = match code {
        auth_codes::OK => AuthRequest::Ok,
        auth_codes::CLEARTEXT_PASSWORD => AuthRequest::CleartextPassword,
        auth_codes::MD5_PASSWORD => {
            let mut salt = [0u8; 4];
            salt.copy_from_slice(r.read_bytes(4)?);
            AuthRequest::Md5Password { salt }
        }
        auth_codes::SASL => {
            let mut mechanisms = Vec::new();
            loop {
                let name = r.read_cstr()?;
                if name.is_empty() {
                    break;
                }
                mechanisms.push(name.to_string());
            }
            AuthRequest::Sasl { mechanisms }
        }
        auth_codes::SASL_CONTINUE => AuthRequest::SaslContinue {
            data: Bytes::copy_from_slice(r.rest()),
        },
        auth_codes::SASL_FINAL => AuthRequest::SaslFinal {
            data: Bytes::copy_from_slice(r.rest()),
        },
        auth_codes::KERBEROS_V5
        | auth_codes::GSS
        | auth_codes::GSS_CONTINUE
        | auth_codes::SSPI => {
            r.rest();
            AuthRequest::Unsupported { code }
        }
        other => {
            return Err(ProtocolError::protocol(format!(
                "Unknown authentication request {other}"
            )))
        }
    };
    r.finish()?;
    Ok(req)
}
