//! Scripted backend for driving a `Session` over an in-memory pipe.

#![allow(dead_code, clippy::unwrap_used)]

use pgwire_client::{ConnectionConfig, Session, SessionOptions};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const TEXT: i16 = 0;
pub const BINARY: i16 = 1;

pub fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

pub fn auth_ok() -> Vec<u8> {
    frame(b'R', &0i32.to_be_bytes())
}

pub fn auth_md5(salt: [u8; 4]) -> Vec<u8> {
    let mut body = 5i32.to_be_bytes().to_vec();
    body.extend(salt);
    frame(b'R', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, name);
    cstr(&mut body, value);
    frame(b'S', &body)
}

pub fn backend_key(pid: i32, secret: i32) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend(secret.to_be_bytes());
    frame(b'K', &body)
}

pub fn ready(status: u8) -> Vec<u8> {
    frame(b'Z', &[status])
}

/// `(name, type oid, format code)` per column.
pub fn row_description(columns: &[(&str, u32, i16)]) -> Vec<u8> {
    let mut body = (columns.len() as u16).to_be_bytes().to_vec();
    for (name, oid, format) in columns {
        cstr(&mut body, name);
        body.extend(0u32.to_be_bytes());
        body.extend(0i16.to_be_bytes());
        body.extend(oid.to_be_bytes());
        body.extend((-1i16).to_be_bytes());
        body.extend((-1i32).to_be_bytes());
        body.extend(format.to_be_bytes());
    }
    frame(b'T', &body)
}

pub fn data_row(cells: &[Option<&[u8]>]) -> Vec<u8> {
    let mut body = (cells.len() as u16).to_be_bytes().to_vec();
    for cell in cells {
        match cell {
            Some(bytes) => {
                body.extend((bytes.len() as i32).to_be_bytes());
                body.extend_from_slice(bytes);
            }
            None => body.extend((-1i32).to_be_bytes()),
        }
    }
    frame(b'D', &body)
}

pub fn text_row(cells: &[Option<&str>]) -> Vec<u8> {
    let cells: Vec<Option<&[u8]>> = cells.iter().map(|c| c.map(str::as_bytes)).collect();
    data_row(&cells)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = Vec::new();
    cstr(&mut body, tag);
    frame(b'C', &body)
}

pub fn error_response(code: &str, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', "ERROR"), (b'V', "ERROR"), (b'C', code), (b'M', message)] {
        body.push(field);
        cstr(&mut body, value);
    }
    body.push(0);
    frame(b'E', &body)
}

pub fn notice(message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', "NOTICE"), (b'C', "00000"), (b'M', message)] {
        body.push(field);
        cstr(&mut body, value);
    }
    body.push(0);
    frame(b'N', &body)
}

pub fn notification(pid: i32, channel: &str, payload: &str) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    cstr(&mut body, channel);
    cstr(&mut body, payload);
    frame(b'A', &body)
}

pub fn parameter_description(oids: &[u32]) -> Vec<u8> {
    let mut body = (oids.len() as u16).to_be_bytes().to_vec();
    for oid in oids {
        body.extend(oid.to_be_bytes());
    }
    frame(b't', &body)
}

pub fn parse_complete() -> Vec<u8> {
    frame(b'1', &[])
}

pub fn bind_complete() -> Vec<u8> {
    frame(b'2', &[])
}

pub fn close_complete() -> Vec<u8> {
    frame(b'3', &[])
}

pub fn no_data() -> Vec<u8> {
    frame(b'n', &[])
}

pub fn portal_suspended() -> Vec<u8> {
    frame(b's', &[])
}

pub fn empty_query() -> Vec<u8> {
    frame(b'I', &[])
}

fn copy_response(tag: u8, format: u8, columns: u16) -> Vec<u8> {
    let mut body = vec![format];
    body.extend(columns.to_be_bytes());
    for _ in 0..columns {
        body.extend(i16::from(format).to_be_bytes());
    }
    frame(tag, &body)
}

pub fn copy_in_response(format: u8, columns: u16) -> Vec<u8> {
    copy_response(b'G', format, columns)
}

pub fn copy_out_response(format: u8, columns: u16) -> Vec<u8> {
    copy_response(b'H', format, columns)
}

pub fn copy_data(data: &[u8]) -> Vec<u8> {
    frame(b'd', data)
}

pub fn copy_done() -> Vec<u8> {
    frame(b'c', &[])
}

/// Server end of the pipe.
pub struct FakeBackend {
    stream: DuplexStream,
}

impl FakeBackend {
    /// Untagged startup packet body (after the length).
    pub async fn read_startup(&mut self) -> Vec<u8> {
        let len = self.stream.read_i32().await.unwrap();
        let mut body = vec![0u8; len as usize - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        body
    }

    pub async fn read_message(&mut self) -> (u8, Vec<u8>) {
        let tag = self.stream.read_u8().await.unwrap();
        let len = self.stream.read_i32().await.unwrap();
        let mut body = vec![0u8; len as usize - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        (tag, body)
    }

    /// Read one message and assert its tag.
    pub async fn expect(&mut self, tag: u8) -> Vec<u8> {
        let (got, body) = self.read_message().await;
        assert_eq!(got as char, tag as char, "unexpected frontend message");
        body
    }

    /// Read messages up to and including the next one tagged `tag`.
    pub async fn read_until(&mut self, tag: u8) -> Vec<(u8, Vec<u8>)> {
        let mut seen = Vec::new();
        loop {
            let msg = self.read_message().await;
            let done = msg.0 == tag;
            seen.push(msg);
            if done {
                return seen;
            }
        }
    }

    pub async fn send(&mut self, frames: &[Vec<u8>]) {
        self.stream.write_all(&frames.concat()).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Everything the client writes until it closes its end.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).await.unwrap();
        rest
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        user: "ivan".into(),
        database: Some("shop".into()),
        ..Default::default()
    }
}

pub fn pipe() -> (DuplexStream, FakeBackend) {
    let (client, server) = duplex(256 * 1024);
    (client, FakeBackend { stream: server })
}

/// A session that completed a trust-auth handshake.
pub async fn connected(options: SessionOptions) -> (Session<DuplexStream>, FakeBackend) {
    let (client, mut backend) = pipe();
    let config = test_config();
    let server = async {
        backend.read_startup().await;
        backend
            .send(&[
                auth_ok(),
                parameter_status("server_version", "16.2"),
                parameter_status("TimeZone", "UTC"),
                backend_key(4242, 99),
                ready(b'I'),
            ])
            .await;
    };
    let (session, ()) = tokio::join!(Session::handshake(client, &config, options), server);
    (session.unwrap(), backend)
}
