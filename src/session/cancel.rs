//! Out-of-band query cancellation.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::config::ConnectionConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::frontend::FrontendMessage;
use crate::transport;

/// Process id and secret from `BackendKeyData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    pub process_id: i32,
    pub secret_key: i32,
}

/// Sends a best-effort `CancelRequest` for one session's running query.
///
/// The request travels on a new, unauthenticated connection that is closed
/// right after writing. The server sends no reply; whether anything was
/// cancelled shows up only in the original session's result.
#[derive(Debug, Clone)]
pub struct CancelToken {
    key: BackendKey,
    config: Option<Arc<ConnectionConfig>>,
}

impl CancelToken {
    pub(crate) fn new(key: BackendKey, config: Option<Arc<ConnectionConfig>>) -> Self {
        Self { key, config }
    }

    pub fn backend_key(&self) -> BackendKey {
        self.key
    }

    /// Connect with the session's configuration and send the request.
    #[instrument(skip(self), fields(pid = self.key.process_id))]
    pub async fn cancel(&self) -> Result<()> {
        let config = self.config.as_ref().ok_or_else(|| {
            ProtocolError::ConfigError(
                "Session was not opened from a connection config; use cancel_on".into(),
            )
        })?;
        let stream = transport::connect(config).await?;
        self.cancel_on(stream).await
    }

    /// Send the request over an already opened stream, then close it.
    pub async fn cancel_on<W>(&self, mut stream: W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(16);
        FrontendMessage::CancelRequest {
            process_id: self.key.process_id,
            secret_key: self.key.secret_key,
        }
        .encode(&mut buf)?;
        stream.write_all(&buf).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        debug!(pid = self.key.process_id, "Cancel request sent");
        Ok(())
    }
}
