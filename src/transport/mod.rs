//! # Transport Layer
//!
//! Opens the byte stream a session runs on.
//!
//! ## Flow
//! ```text
//! TCP connect ── SSLRequest ──┬── 'S' ── TLS handshake ── PgStream::Tls
//!                             └── 'N' ── (prefer) ──────── PgStream::Tcp
//! Unix socket ─────────────────────────────────────────── PgStream::Unix
//! ```

pub mod stream;
pub mod tls;

pub use stream::{PgStream, SslMode};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use crate::config::ConnectionConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::frontend::FrontendMessage;
use tls::TlsClientConfig;

/// Connect and negotiate TLS according to `config.ssl_mode`.
#[instrument(skip(config), fields(host = %config.host, port = config.port, ssl_mode = ?config.ssl_mode))]
pub async fn connect(config: &ConnectionConfig) -> Result<PgStream> {
    tokio::time::timeout(config.connect_timeout, open(config))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

async fn open(config: &ConnectionConfig) -> Result<PgStream> {
    if config.is_unix_socket() {
        return open_unix(config).await;
    }

    let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
    tcp.set_nodelay(true)?;
    debug!(peer = ?tcp.peer_addr().ok(), "TCP connected");

    if config.ssl_mode == SslMode::Disable {
        return Ok(PgStream::Tcp(tcp));
    }
    negotiate_tls(tcp, config).await
}

#[cfg(unix)]
async fn open_unix(config: &ConnectionConfig) -> Result<PgStream> {
    let path = config.unix_socket_path();
    let stream = tokio::net::UnixStream::connect(&path).await?;
    debug!(path = %path.display(), "Unix socket connected");
    Ok(PgStream::Unix(stream))
}

#[cfg(not(unix))]
async fn open_unix(config: &ConnectionConfig) -> Result<PgStream> {
    Err(ProtocolError::ConfigError(format!(
        "Unix socket host '{}' is not supported on this platform",
        config.host
    )))
}

/// Send `SSLRequest` and act on the single-byte answer.
async fn negotiate_tls(mut tcp: TcpStream, config: &ConnectionConfig) -> Result<PgStream> {
    let mut buf = BytesMut::with_capacity(8);
    FrontendMessage::SslRequest.encode(&mut buf)?;
    tcp.write_all(&buf).await?;
    tcp.flush().await?;

    match tcp.read_u8().await? {
        b'S' => {
            let mut tls_config = TlsClientConfig::new(config.host.clone());
            if let Some(root) = &config.ssl_root_cert {
                tls_config = tls_config.with_root_cert(root.clone());
            }
            if config.ssl_insecure {
                tls_config = tls_config.insecure();
            }
            let stream = tls::upgrade(tcp, &tls_config).await?;
            info!("Session transport upgraded to TLS");
            Ok(PgStream::Tls(Box::new(stream)))
        }
        b'N' if config.ssl_mode == SslMode::Require => {
            Err(ProtocolError::TlsError(constants::ERR_TLS_REFUSED.into()))
        }
        b'N' => {
            warn!("Server refused TLS, continuing in plaintext");
            Ok(PgStream::Tcp(tcp))
        }
        other => Err(ProtocolError::protocol(format!(
            "Unexpected SSLRequest response byte 0x{other:02x}"
        ))),
    }
}
