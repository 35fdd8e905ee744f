//! Framed transport plus per-connection protocol state.
//!
//! [`Connection`] knows nothing about queries. It writes batches of frontend
//! messages, reads backend messages, and absorbs the asynchronous ones
//! (parameter changes, notices, notifications) before handing the rest to
//! the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::core::codec::{BackendFrame, PgCodec};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::backend::{BackendMessage, TransactionStatus};
use crate::protocol::dispatcher::{AsyncMessage, Dispatcher};
use crate::protocol::frontend::FrontendMessage;
use crate::types::registry::CodecParams;
use crate::utils::metrics::SessionMetrics;

pub(crate) struct Connection<S> {
    framed: Framed<S, PgCodec>,
    server_params: HashMap<String, String>,
    codec_params: CodecParams,
    status: TransactionStatus,
    /// Bytes went out and `ReadyForQuery` has not been read yet.
    in_flight: bool,
    broken: bool,
    closed: bool,
    read_timeout: Option<Duration>,
    metrics: Arc<SessionMetrics>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        stream: S,
        max_frame_size: usize,
        read_timeout: Option<Duration>,
        metrics: Arc<SessionMetrics>,
        dispatcher: Option<Arc<Dispatcher>>,
    ) -> Self {
        Self {
            framed: Framed::new(stream, PgCodec::new(max_frame_size)),
            server_params: HashMap::new(),
            codec_params: CodecParams::default(),
            status: TransactionStatus::Idle,
            in_flight: false,
            broken: false,
            closed: false,
            read_timeout,
            metrics,
            dispatcher,
        }
    }

    /// Encode `messages` and write them with a single flush.
    ///
    /// Encoding happens before anything reaches the socket, so a message
    /// that cannot be rendered leaves the connection untouched.
    pub(crate) async fn send_all(&mut self, messages: &[FrontendMessage]) -> Result<()> {
        let mut buf = BytesMut::new();
        for msg in messages {
            msg.encode(&mut buf)?;
        }
        self.in_flight = true;
        let len = buf.len();
        self.framed.write_buffer_mut().extend_from_slice(&buf);
        SinkExt::<FrontendMessage>::flush(&mut self.framed).await?;
        self.metrics.messages_sent(messages.len() as u64, len as u64);
        trace!(
            messages = messages.len(),
            bytes = len,
            first = messages.first().map(FrontendMessage::name),
            "Flushed frontend messages"
        );
        Ok(())
    }

    pub(crate) async fn send(&mut self, msg: FrontendMessage) -> Result<()> {
        self.send_all(std::slice::from_ref(&msg)).await
    }

    async fn next_frame(&mut self) -> Result<BackendFrame> {
        let next = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.framed.next())
                .await
                .map_err(|_| ProtocolError::Timeout)?,
            None => self.framed.next().await,
        };
        let frame = next.ok_or(ProtocolError::ConnectionClosed)??;
        self.metrics.message_received(frame.wire_len() as u64);
        if matches!(frame, BackendFrame::Skipped { .. }) {
            self.metrics.frame_skipped();
        }
        Ok(frame)
    }

    /// Next message belonging to the request/reply flow.
    pub(crate) async fn recv(&mut self) -> Result<BackendMessage> {
        loop {
            let msg = BackendMessage::from_frame(self.next_frame().await?)?;
            if !msg.is_async() {
                trace!(tag = %(msg.tag() as char), "Backend message");
                return Ok(msg);
            }
            self.absorb(msg);
        }
    }

    fn absorb(&mut self, msg: BackendMessage) {
        match &msg {
            BackendMessage::ParameterStatus { name, value } => {
                debug!(%name, %value, "Server parameter");
                self.codec_params.apply(name, value);
                self.server_params.insert(name.clone(), value.clone());
            }
            BackendMessage::NoticeResponse(notice) => {
                debug!(
                    severity = notice.severity(),
                    code = notice.code(),
                    message = notice.message(),
                    "Server notice"
                );
            }
            BackendMessage::NotificationResponse(n) => {
                debug!(channel = %n.channel, pid = n.process_id, "Notification");
            }
            BackendMessage::NegotiateProtocolVersion {
                newest_minor,
                unrecognized,
            } => {
                warn!(
                    newest_minor,
                    ?unrecognized,
                    "Server negotiated an older protocol minor version"
                );
            }
            _ => {}
        }

        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        if let Ok(async_msg) = AsyncMessage::from_backend(msg) {
            self.metrics.async_message();
            if let Err(e) = dispatcher.dispatch(async_msg) {
                warn!(error = %e, "Failed to dispatch async message");
            }
        }
    }

    pub(crate) fn set_skip_rows(&mut self, skip: bool) {
        if skip && !self.framed.codec().skip_rows() {
            debug!("Entering skip mode");
        }
        self.framed.codec_mut().set_skip_rows(skip);
    }

    /// `ReadyForQuery` arrived: the connection is idle again.
    pub(crate) fn finish_interaction(&mut self, status: TransactionStatus) {
        self.framed.codec_mut().set_skip_rows(false);
        self.in_flight = false;
        self.status = status;
        self.metrics.interaction_completed();
    }

    /// Refuse work on a connection that cannot be trusted to be in sync.
    pub(crate) fn ensure_usable(&mut self) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        if self.in_flight && !self.broken {
            warn!("Previous interaction was abandoned before ReadyForQuery");
            self.broken = true;
        }
        if self.broken {
            return Err(ProtocolError::protocol(constants::ERR_SESSION_BROKEN));
        }
        Ok(())
    }

    /// Mark the connection broken if `result` failed fatally mid-interaction.
    pub(crate) fn settle<T>(&mut self, result: &Result<T>) {
        if let Err(err) = result {
            if err.is_fatal() && self.in_flight {
                warn!(error = %err, "Fatal error, session is now broken");
                self.broken = true;
            }
        }
    }

    pub(crate) fn codec_params(&self) -> &CodecParams {
        &self.codec_params
    }

    pub(crate) fn server_params(&self) -> &HashMap<String, String> {
        &self.server_params
    }

    pub(crate) fn status(&self) -> TransactionStatus {
        self.status
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send `Terminate` and close the write half.
    pub(crate) async fn terminate(&mut self) -> Result<()> {
        self.closed = true;
        let mut buf = BytesMut::new();
        FrontendMessage::Terminate.encode(&mut buf)?;
        self.framed.write_buffer_mut().extend_from_slice(&buf);
        SinkExt::<FrontendMessage>::flush(&mut self.framed).await?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::backend::tags;
    use bytes::BufMut;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(tag);
        buf.put_i32(body.len() as i32 + 4);
        buf.put_slice(body);
        buf.to_vec()
    }

    #[tokio::test]
    async fn absorbs_parameter_status() {
        let (client, mut server) = duplex(1024);
        let metrics = Arc::new(SessionMetrics::new());
        let mut conn = Connection::new(client, 1 << 20, None, metrics.clone(), None);

        let mut bytes = frame(tags::PARAMETER_STATUS, b"TimeZone\0UTC\0");
        bytes.extend(frame(tags::READY_FOR_QUERY, b"T"));
        server.write_all(&bytes).await.unwrap();

        let msg = conn.recv().await.unwrap();
        assert_eq!(
            msg,
            BackendMessage::ReadyForQuery(TransactionStatus::InTransaction)
        );
        assert_eq!(conn.server_params()["TimeZone"], "UTC");
        assert_eq!(metrics.snapshot().messages_received, 2);
    }

    #[tokio::test]
    async fn batch_is_written_in_one_flush() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(
            client,
            1 << 20,
            None,
            Arc::new(SessionMetrics::new()),
            None,
        );
        conn.send_all(&[FrontendMessage::Sync, FrontendMessage::Flush])
            .await
            .unwrap();
        let mut buf = [0u8; 10];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [b'S', 0, 0, 0, 4, b'H', 0, 0, 0, 4]);
        assert!(conn.in_flight);
    }

    #[tokio::test]
    async fn unencodable_message_sends_nothing() {
        let (client, _server) = duplex(1024);
        let mut conn = Connection::new(
            client,
            1 << 20,
            None,
            Arc::new(SessionMetrics::new()),
            None,
        );
        let result = conn
            .send(FrontendMessage::Query {
                sql: "select '\0'".into(),
            })
            .await;
        assert!(result.is_err());
        conn.settle(&result);
        assert!(!conn.in_flight);
        assert!(conn.ensure_usable().is_ok());
    }

    #[tokio::test]
    async fn eof_is_connection_closed() {
        let (client, server) = duplex(64);
        drop(server);
        let mut conn = Connection::new(
            client,
            1 << 20,
            None,
            Arc::new(SessionMetrics::new()),
            None,
        );
        assert!(matches!(
            conn.recv().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn read_timeout_is_reported() {
        let (client, _server) = duplex(64);
        let mut conn = Connection::new(
            client,
            1 << 20,
            Some(Duration::from_millis(20)),
            Arc::new(SessionMetrics::new()),
            None,
        );
        assert!(matches!(conn.recv().await, Err(ProtocolError::Timeout)));
    }
}
