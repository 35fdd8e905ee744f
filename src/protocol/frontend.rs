//! Client-to-server messages.
//!
//! Every message renders itself into a caller-owned buffer. Nothing is written
//! to the socket here: the session queues all messages of one operation and
//! flushes them together.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::wire::{
    put_count, put_cstr, put_cstr_bytes, put_frame, put_len_prefixed, put_row_limit,
};
use crate::error::Result;
use crate::types::{Format, Oid};

/// Protocol 3.0.
pub const PROTOCOL_VERSION: i32 = 196_608;
pub const SSL_REQUEST_CODE: i32 = 80_877_103;
pub const CANCEL_REQUEST_CODE: i32 = 80_877_102;

/// Frontend message tags.
pub mod tags {
    pub const BIND: u8 = b'B';
    pub const CLOSE: u8 = b'C';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const COPY_FAIL: u8 = b'f';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const FLUSH: u8 = b'H';
    pub const PARSE: u8 = b'P';
    /// Shared by PasswordMessage, SASLInitialResponse and SASLResponse.
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}

/// Object addressed by `Describe` and `Close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Statement,
    Portal,
}

impl TargetKind {
    fn byte(self) -> u8 {
        match self {
            TargetKind::Statement => b'S',
            TargetKind::Portal => b'P',
        }
    }
}

/// Parameter formats of a `Bind`, collapsed the way the protocol allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatCodes {
    /// Zero codes: everything is text.
    AllText,
    /// One code applied to every entry.
    Uniform(Format),
    /// One code per entry.
    Each(Vec<Format>),
}

impl FormatCodes {
    fn put(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            FormatCodes::AllText => put_count(buf, 0),
            FormatCodes::Uniform(f) => {
                put_count(buf, 1)?;
                buf.put_i16(f.code());
                Ok(())
            }
            FormatCodes::Each(formats) => {
                put_count(buf, formats.len())?;
                for f in formats {
                    buf.put_i16(f.code());
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// Untagged; `params` must include `user`.
    Startup { params: Vec<(String, String)> },
    /// Untagged TLS negotiation request.
    SslRequest,
    /// Untagged; sent alone on a fresh connection.
    CancelRequest { process_id: i32, secret_key: i32 },
    Query { sql: String },
    Parse {
        name: String,
        sql: String,
        param_types: Vec<Oid>,
    },
    Bind {
        portal: String,
        statement: String,
        param_formats: FormatCodes,
        params: Vec<Option<Bytes>>,
        result_formats: FormatCodes,
    },
    Describe { kind: TargetKind, name: String },
    Execute { portal: String, max_rows: u32 },
    Close { kind: TargetKind, name: String },
    Sync,
    Flush,
    Terminate,
    CopyData(Bytes),
    CopyDone,
    CopyFail { message: String },
    Password { password: Vec<u8> },
    SaslInitialResponse { mechanism: String, data: Bytes },
    SaslResponse { data: Bytes },
}

impl FrontendMessage {
    /// Append the framed message to `buf`. On error `buf` is left unchanged.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            FrontendMessage::Startup { params } => put_frame(buf, None, |b| {
                b.put_i32(PROTOCOL_VERSION);
                for (key, value) in params {
                    put_cstr(b, key)?;
                    put_cstr(b, value)?;
                }
                b.put_u8(0);
                Ok(())
            }),
            FrontendMessage::SslRequest => put_frame(buf, None, |b| {
                b.put_i32(SSL_REQUEST_CODE);
                Ok(())
            }),
            FrontendMessage::CancelRequest {
                process_id,
                secret_key,
            } => put_frame(buf, None, |b| {
                b.put_i32(CANCEL_REQUEST_CODE);
                b.put_i32(*process_id);
                b.put_i32(*secret_key);
                Ok(())
            }),
            FrontendMessage::Query { sql } => put_frame(buf, Some(tags::QUERY), |b| put_cstr(b, sql)),
            FrontendMessage::Parse {
                name,
                sql,
                param_types,
            } => put_frame(buf, Some(tags::PARSE), |b| {
                put_cstr(b, name)?;
                put_cstr(b, sql)?;
                put_count(b, param_types.len())?;
                for oid in param_types {
                    b.put_u32(*oid);
                }
                Ok(())
            }),
            FrontendMessage::Bind {
                portal,
                statement,
                param_formats,
                params,
                result_formats,
            } => put_frame(buf, Some(tags::BIND), |b| {
                put_cstr(b, portal)?;
                put_cstr(b, statement)?;
                param_formats.put(b)?;
                put_count(b, params.len())?;
                for p in params {
                    put_len_prefixed(b, p.as_deref())?;
                }
                result_formats.put(b)
            }),
            FrontendMessage::Describe { kind, name } => put_frame(buf, Some(tags::DESCRIBE), |b| {
                b.put_u8(kind.byte());
                put_cstr(b, name)
            }),
            FrontendMessage::Execute { portal, max_rows } => {
                put_frame(buf, Some(tags::EXECUTE), |b| {
                    put_cstr(b, portal)?;
                    put_row_limit(b, *max_rows);
                    Ok(())
                })
            }
            FrontendMessage::Close { kind, name } => put_frame(buf, Some(tags::CLOSE), |b| {
                b.put_u8(kind.byte());
                put_cstr(b, name)
            }),
            FrontendMessage::Sync => put_frame(buf, Some(tags::SYNC), |_| Ok(())),
            FrontendMessage::Flush => put_frame(buf, Some(tags::FLUSH), |_| Ok(())),
            FrontendMessage::Terminate => put_frame(buf, Some(tags::TERMINATE), |_| Ok(())),
            FrontendMessage::CopyData(data) => put_frame(buf, Some(tags::COPY_DATA), |b| {
                b.put_slice(data);
                Ok(())
            }),
            FrontendMessage::CopyDone => put_frame(buf, Some(tags::COPY_DONE), |_| Ok(())),
            FrontendMessage::CopyFail { message } => {
                put_frame(buf, Some(tags::COPY_FAIL), |b| put_cstr(b, message))
            }
            FrontendMessage::Password { password } => {
                put_frame(buf, Some(tags::PASSWORD), |b| put_cstr_bytes(b, password))
            }
            FrontendMessage::SaslInitialResponse { mechanism, data } => {
                put_frame(buf, Some(tags::PASSWORD), |b| {
                    put_cstr(b, mechanism)?;
                    put_len_prefixed(b, Some(&data[..]))
                })
            }
            FrontendMessage::SaslResponse { data } => put_frame(buf, Some(tags::PASSWORD), |b| {
                b.put_slice(data);
                Ok(())
            }),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Startup { .. } => "StartupMessage",
            FrontendMessage::SslRequest => "SSLRequest",
            FrontendMessage::CancelRequest { .. } => "CancelRequest",
            FrontendMessage::Query { .. } => "Query",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Bind { .. } => "Bind",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::Close { .. } => "Close",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Terminate => "Terminate",
            FrontendMessage::CopyData(_) => "CopyData",
            FrontendMessage::CopyDone => "CopyDone",
            FrontendMessage::CopyFail { .. } => "CopyFail",
            FrontendMessage::Password { .. } => "PasswordMessage",
            FrontendMessage::SaslInitialResponse { .. } => "SASLInitialResponse",
            FrontendMessage::SaslResponse { .. } => "SASLResponse",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::wire::WireReader;

    fn encode(msg: FrontendMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn startup_layout() {
        let buf = encode(FrontendMessage::Startup {
            params: vec![("user".into(), "ivan".into()), ("database".into(), "app".into())],
        });
        let mut r = WireReader::new(&buf);
        assert_eq!(r.read_i32().unwrap() as usize, buf.len());
        assert_eq!(r.read_i32().unwrap(), PROTOCOL_VERSION);
        assert_eq!(r.read_cstr().unwrap(), "user");
        assert_eq!(r.read_cstr().unwrap(), "ivan");
        assert_eq!(r.read_cstr().unwrap(), "database");
        assert_eq!(r.read_cstr().unwrap(), "app");
        assert_eq!(r.read_u8().unwrap(), 0);
        r.finish().unwrap();
    }

    #[test]
    fn execute_row_limit_stays_positive() {
        for (max_rows, wire) in [(0, 0), (25, 25), (i32::MAX as u32, i32::MAX), (u32::MAX, i32::MAX)] {
            let buf = encode(FrontendMessage::Execute {
                portal: String::new(),
                max_rows,
            });
            let mut r = WireReader::new(&buf);
            assert_eq!(r.read_u8().unwrap(), b'E');
            assert_eq!(r.read_i32().unwrap(), 9);
            assert_eq!(r.read_cstr().unwrap(), "");
            assert_eq!(r.read_i32().unwrap(), wire, "max_rows {max_rows}");
            r.finish().unwrap();
        }
    }

    #[test]
    fn cancel_request_is_sixteen_bytes() {
        let buf = encode(FrontendMessage::CancelRequest {
            process_id: 1234,
            secret_key: -5,
        });
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..8], &[0, 0, 0, 16, 0x04, 0xD2, 0x16, 0x2E]);
    }

    #[test]
    fn bind_layout() {
        let buf = encode(FrontendMessage::Bind {
            portal: String::new(),
            statement: "s1".into(),
            param_formats: FormatCodes::Uniform(Format::Binary),
            params: vec![Some(Bytes::from_static(&[0, 0, 0, 7])), None],
            result_formats: FormatCodes::AllText,
        });
        assert_eq!(buf[0], tags::BIND);
        let mut r = WireReader::new(&buf[5..]);
        assert_eq!(r.read_cstr().unwrap(), "");
        assert_eq!(r.read_cstr().unwrap(), "s1");
        assert_eq!(r.read_u16().unwrap(), 1);
        assert_eq!(r.read_i16().unwrap(), 1);
        assert_eq!(r.read_u16().unwrap(), 2);
        assert_eq!(r.read_len_prefixed().unwrap(), Some(&[0u8, 0, 0, 7][..]));
        assert_eq!(r.read_len_prefixed().unwrap(), None);
        assert_eq!(r.read_u16().unwrap(), 0);
        r.finish().unwrap();
    }

    #[test]
    fn parse_rejects_too_many_parameter_types() {
        let mut buf = BytesMut::new();
        let msg = FrontendMessage::Parse {
            name: String::new(),
            sql: "SELECT 1".into(),
            param_types: vec![0; 70_000],
        };
        assert!(msg.encode(&mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn sasl_initial_response_carries_length() {
        let buf = encode(FrontendMessage::SaslInitialResponse {
            mechanism: "SCRAM-SHA-256".into(),
            data: Bytes::from_static(b"n,,n=,r=abc"),
        });
        let mut r = WireReader::new(&buf[5..]);
        assert_eq!(r.read_cstr().unwrap(), "SCRAM-SHA-256");
        assert_eq!(r.read_len_prefixed().unwrap(), Some(&b"n,,n=,r=abc"[..]));
    }
}
