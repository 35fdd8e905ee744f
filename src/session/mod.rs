//! # Protocol Session
//!
//! A [`Session`] owns one authenticated backend connection and runs one
//! interaction on it at a time.
//!
//! ## Lifecycle
//! ```text
//! connect ── (TLS) ── Startup ── authenticate ── BackendKeyData* ── ReadyForQuery
//!                                                                      │
//!        ┌─────────────────────────────────────────────────────────────┘
//!        ▼
//!   simple query │ prepare │ execute │ COPY in/out │ close statement ...
//!        │
//!        └── every interaction is read until ReadyForQuery
//! ```
//!
//! ## Interactions
//! Each public call takes the session gate (an async mutex), writes all of
//! its messages with one flush and reads until `ReadyForQuery`. Server
//! errors are recorded and raised only after the stream is back in sync. A
//! local failure, such as a value that cannot be decoded, switches the codec
//! into skip mode so the remaining row data is length-skipped.
//!
//! If a call is dropped mid-interaction, or fails with a transport or
//! protocol error, the session is marked broken and refuses further work.

pub mod accumulator;
pub mod cancel;
mod connection;
pub mod copy;
pub mod reducer;
pub mod row;
pub mod statement;

pub use accumulator::{Completion, QueryOutcome, StatementResult};
pub use cancel::{BackendKey, CancelToken};
pub use copy::{CopyEncoder, CopyFormat, CopySource};
pub use reducer::{CollectRows, CountRows, FirstRow, Fold, IndexBy, RowReducer};
pub use row::{Row, RowView};
pub use statement::{ExecuteOptions, Param, PreparedStatement};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::config::{ConnectionConfig, SessionOptions};
use crate::error::{ProtocolError, Result};
use crate::protocol::auth::Authenticator;
use crate::protocol::backend::{BackendMessage, CommandTag, TransactionStatus};
use crate::protocol::frontend::{FormatCodes, FrontendMessage, TargetKind};
use crate::transport::{self, PgStream};
use crate::types::registry::{CodecParams, TypeRegistry};
use crate::types::{oid, Format, Oid};
use crate::utils::metrics::{SessionMetrics, Timer};

use accumulator::{resolve_errors, ResultAccumulator, Step};
use connection::Connection;
use copy::CopyPump;

/// One authenticated connection to a PostgreSQL backend.
pub struct Session<S = PgStream> {
    conn: Mutex<Connection<S>>,
    registry: Arc<TypeRegistry>,
    metrics: Arc<SessionMetrics>,
    backend_key: Option<BackendKey>,
    config: Option<Arc<ConnectionConfig>>,
    binary: bool,
    next_statement: AtomicU64,
}

impl Session<PgStream> {
    /// Open a transport per `config`, then run startup and authentication.
    #[instrument(skip_all, fields(host = %config.host, port = config.port, user = %config.user))]
    pub async fn connect(config: ConnectionConfig, options: SessionOptions) -> Result<Self> {
        config.validate_strict()?;
        let _timer = Timer::start("connect");
        let stream = transport::connect(&config).await?;
        let tls = stream.is_tls();
        let config = Arc::new(config);
        let mut session = tokio::time::timeout(
            config.connect_timeout,
            Self::handshake(stream, &config, options),
        )
        .await
        .map_err(|_| ProtocolError::Timeout)??;
        session.config = Some(config);
        debug!(tls, "Connected");
        Ok(session)
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run startup and authentication over an already open stream.
    #[instrument(skip_all, fields(user = %config.user, database = %config.database()))]
    pub async fn handshake(
        stream: S,
        config: &ConnectionConfig,
        options: SessionOptions,
    ) -> Result<Self> {
        let SessionOptions {
            registry,
            dispatcher,
            metrics,
        } = options;
        let mut auth = Authenticator::new(
            &config.user,
            config.password.as_deref(),
            config.channel_binding,
        )?;
        let mut conn = Connection::new(
            stream,
            config.max_frame_size,
            config.read_timeout,
            metrics.clone(),
            dispatcher,
        );

        conn.send(FrontendMessage::Startup {
            params: config.startup_params(),
        })
        .await?;

        match authenticate(&mut conn, &mut auth).await {
            Ok(()) => metrics.auth_success(),
            Err(e) => {
                metrics.auth_failed();
                warn!(error = %e, "Authentication failed");
                return Err(e);
            }
        }
        let backend_key = await_ready(&mut conn).await?;

        info!(
            pid = backend_key.map(|k| k.process_id),
            server_version = conn.server_params().get("server_version").map(String::as_str),
            "Session ready"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            registry,
            metrics,
            backend_key,
            config: None,
            binary: config.binary,
            next_statement: AtomicU64::new(1),
        })
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Connection<S>>> {
        let mut conn = self.conn.lock().await;
        conn.ensure_usable()?;
        Ok(conn)
    }

    /// Read until `ReadyForQuery`, feeding `acc`. `extended` marks a
    /// Sync-terminated extended-protocol batch.
    async fn drive<R: RowReducer>(
        &self,
        conn: &mut Connection<S>,
        mut acc: ResultAccumulator<'_, R>,
        extended: bool,
    ) -> Result<QueryOutcome<R::Output>> {
        loop {
            let msg = conn.recv().await?;
            match &msg {
                BackendMessage::ReadyForQuery(status) => {
                    conn.finish_interaction(*status);
                    break;
                }
                BackendMessage::ErrorResponse(_) => self.metrics.server_error(),
                _ => {}
            }
            match acc.on_message(msg, conn.codec_params())? {
                Step::Continue => {}
                Step::Skip => {
                    self.metrics.codec_error();
                    conn.set_skip_rows(true);
                }
                Step::CopyIn(_) => {
                    acc.record_local(ProtocolError::CopyAborted(
                        "COPY FROM STDIN needs a data source, use copy_in".into(),
                    ));
                    let fail = FrontendMessage::CopyFail {
                        message: "no COPY data source supplied".into(),
                    };
                    if extended {
                        conn.send_all(&[fail, FrontendMessage::Sync]).await?;
                    } else {
                        conn.send(fail).await?;
                    }
                }
                Step::CopyOut(_) => debug!("Discarding COPY TO STDOUT data, use copy_out to keep it"),
            }
        }
        acc.finish()
    }

    /// Run `sql` through the simple query protocol, collecting every row.
    pub async fn simple_query(&self, sql: &str) -> Result<QueryOutcome<Vec<Row>>> {
        self.simple_query_with(sql, &CollectRows).await
    }

    /// Run `sql` (possibly several statements) with a custom reducer.
    #[instrument(skip_all, fields(sql_len = sql.len()))]
    pub async fn simple_query_with<R: RowReducer>(
        &self,
        sql: &str,
        reducer: &R,
    ) -> Result<QueryOutcome<R::Output>> {
        let mut conn = self.lock().await?;
        let result = async {
            conn.send(FrontendMessage::Query {
                sql: sql.to_string(),
            })
            .await?;
            self.drive(&mut conn, ResultAccumulator::new(reducer, &self.registry), false)
                .await
        }
        .await;
        conn.settle(&result);
        result
    }

    /// Execute statements that return no rows worth keeping; returns their tags.
    pub async fn batch_execute(&self, sql: &str) -> Result<Vec<CommandTag>> {
        let outcome = self.simple_query_with(sql, &CountRows).await?;
        Ok(outcome
            .into_vec()
            .into_iter()
            .filter_map(|r| match r.completion {
                Completion::Command(tag) => Some(tag),
                _ => None,
            })
            .collect())
    }

    pub async fn prepare(&self, sql: &str) -> Result<PreparedStatement> {
        self.prepare_typed(sql, &[]).await
    }

    /// Parse and describe a named statement. `param_types` may be shorter
    /// than the parameter list or contain `0`; the server infers the rest.
    #[instrument(skip_all, fields(sql_len = sql.len(), declared = param_types.len()))]
    pub async fn prepare_typed(&self, sql: &str, param_types: &[Oid]) -> Result<PreparedStatement> {
        let name = format!("s{}", self.next_statement.fetch_add(1, Ordering::Relaxed));
        let mut conn = self.lock().await?;
        let result = self.run_prepare(&mut conn, name, sql, param_types).await;
        conn.settle(&result);
        result
    }

    async fn run_prepare(
        &self,
        conn: &mut Connection<S>,
        name: String,
        sql: &str,
        param_types: &[Oid],
    ) -> Result<PreparedStatement> {
        conn.send_all(&[
            FrontendMessage::Parse {
                name: name.clone(),
                sql: sql.to_string(),
                param_types: param_types.to_vec(),
            },
            FrontendMessage::Describe {
                kind: TargetKind::Statement,
                name: name.clone(),
            },
            FrontendMessage::Sync,
            FrontendMessage::Flush,
        ])
        .await?;

        let mut declared = None;
        let mut columns = None;
        let mut server_error = None;
        loop {
            match conn.recv().await? {
                BackendMessage::ParseComplete | BackendMessage::NoData => {}
                BackendMessage::ParameterDescription(oids) => declared = Some(oids),
                BackendMessage::RowDescription(desc) => columns = Some(desc),
                BackendMessage::ErrorResponse(err) => {
                    self.metrics.server_error();
                    server_error.get_or_insert(err);
                }
                BackendMessage::ReadyForQuery(status) => {
                    conn.finish_interaction(status);
                    break;
                }
                other => {
                    return Err(ProtocolError::UnexpectedMessage {
                        tag: other.tag() as char,
                        phase: "prepare",
                    })
                }
            }
        }
        resolve_errors(None, server_error)?;

        let declared = declared.ok_or_else(|| {
            ProtocolError::protocol("Statement description carried no ParameterDescription")
        })?;
        debug!(
            statement = %name,
            params = declared.len(),
            columns = columns.as_ref().map(|c| c.len()),
            "Statement prepared"
        );
        Ok(PreparedStatement::new(name, sql.to_string(), declared, columns))
    }

    /// Execute a prepared statement, collecting every row.
    pub async fn query_prepared(
        &self,
        stmt: &PreparedStatement,
        params: &[Param],
    ) -> Result<QueryOutcome<Vec<Row>>> {
        self.query_prepared_with(stmt, params, ExecuteOptions::default(), &CollectRows)
            .await
    }

    /// Bind `params` to `stmt` and execute it with a custom reducer.
    ///
    /// A parameter count that differs from the statement's is rejected
    /// before anything is written.
    #[instrument(skip_all, fields(statement = %stmt.name(), params = params.len(), max_rows = options.max_rows))]
    pub async fn query_prepared_with<R: RowReducer>(
        &self,
        stmt: &PreparedStatement,
        params: &[Param],
        options: ExecuteOptions,
        reducer: &R,
    ) -> Result<QueryOutcome<R::Output>> {
        check_arity(stmt, params)?;
        let mut conn = self.lock().await?;
        let result = self
            .run_execute(&mut conn, stmt, params, options, reducer)
            .await;
        conn.settle(&result);
        result
    }

    /// One-shot extended query through the unnamed statement.
    pub async fn query(&self, sql: &str, params: &[Param]) -> Result<QueryOutcome<Vec<Row>>> {
        self.query_with(sql, params, ExecuteOptions::default(), &CollectRows)
            .await
    }

    #[instrument(skip_all, fields(sql_len = sql.len(), params = params.len()))]
    pub async fn query_with<R: RowReducer>(
        &self,
        sql: &str,
        params: &[Param],
        options: ExecuteOptions,
        reducer: &R,
    ) -> Result<QueryOutcome<R::Output>> {
        let types: Vec<Oid> = params
            .iter()
            .map(|p| p.oid.unwrap_or(oid::UNSPECIFIED))
            .collect();
        let mut conn = self.lock().await?;
        let result = async {
            let stmt = self
                .run_prepare(&mut conn, String::new(), sql, &types)
                .await?;
            check_arity(&stmt, params)?;
            self.run_execute(&mut conn, &stmt, params, options, reducer)
                .await
        }
        .await;
        conn.settle(&result);
        result
    }

    async fn run_execute<R: RowReducer>(
        &self,
        conn: &mut Connection<S>,
        stmt: &PreparedStatement,
        params: &[Param],
        options: ExecuteOptions,
        reducer: &R,
    ) -> Result<QueryOutcome<R::Output>> {
        let binary = options.binary.unwrap_or(self.binary);
        let bind = self
            .build_bind(stmt, params, binary, conn.codec_params())
            .inspect_err(|_| self.metrics.codec_error())?;
        conn.send_all(&[
            bind,
            FrontendMessage::Describe {
                kind: TargetKind::Portal,
                name: String::new(),
            },
            FrontendMessage::Execute {
                portal: String::new(),
                max_rows: options.max_rows,
            },
            FrontendMessage::Close {
                kind: TargetKind::Portal,
                name: String::new(),
            },
            FrontendMessage::Sync,
            FrontendMessage::Flush,
        ])
        .await?;
        self.drive(conn, ResultAccumulator::new(reducer, &self.registry), true)
            .await
    }

    fn build_bind(
        &self,
        stmt: &PreparedStatement,
        params: &[Param],
        binary: bool,
        codec_params: &CodecParams,
    ) -> Result<FrontendMessage> {
        let mut formats = Vec::with_capacity(params.len());
        let mut values = Vec::with_capacity(params.len());
        for (param, &declared) in params.iter().zip(stmt.param_types()) {
            let oid = resolve_param_oid(param, declared);
            let format = if binary && self.registry.binary_capable(oid) {
                Format::Binary
            } else {
                Format::Text
            };
            values.push(self.registry.encode(oid, &param.value, format, codec_params)?);
            formats.push(format);
        }

        let result_formats = match stmt.columns() {
            Some(columns) if binary => collapse_formats(
                columns
                    .columns()
                    .iter()
                    .map(|c| {
                        if self.registry.binary_capable(c.type_oid) {
                            Format::Binary
                        } else {
                            Format::Text
                        }
                    })
                    .collect(),
            ),
            _ => FormatCodes::AllText,
        };

        Ok(FrontendMessage::Bind {
            portal: String::new(),
            statement: stmt.name().to_string(),
            param_formats: collapse_formats(formats),
            params: values,
            result_formats,
        })
    }

    /// Release a prepared statement on the server.
    #[instrument(skip_all, fields(statement = %stmt.name()))]
    pub async fn close_statement(&self, stmt: &PreparedStatement) -> Result<()> {
        let mut conn = self.lock().await?;
        let result = async {
            conn.send_all(&[
                FrontendMessage::Close {
                    kind: TargetKind::Statement,
                    name: stmt.name().to_string(),
                },
                FrontendMessage::Sync,
                FrontendMessage::Flush,
            ])
            .await?;
            self.drive(&mut conn, ResultAccumulator::new(&CountRows, &self.registry), true)
                .await
                .map(|_| ())
        }
        .await;
        conn.settle(&result);
        result
    }

    /// Run a `COPY ... FROM STDIN` statement fed from `source`. Returns the
    /// row count reported by the server.
    ///
    /// A failing source aborts the copy with `CopyFail`; the server's
    /// resulting error is drained and attached to the reported failure.
    #[instrument(skip_all, fields(sql_len = sql.len()))]
    pub async fn copy_in(&self, sql: &str, source: CopySource) -> Result<u64> {
        let mut conn = self.lock().await?;
        let result = self.run_copy_in(&mut conn, sql, source).await;
        conn.settle(&result);
        result
    }

    async fn run_copy_in(
        &self,
        conn: &mut Connection<S>,
        sql: &str,
        source: CopySource,
    ) -> Result<u64> {
        conn.send(FrontendMessage::Query {
            sql: sql.to_string(),
        })
        .await?;

        let mut server_error = None;
        let started = loop {
            match conn.recv().await? {
                BackendMessage::CopyInResponse(response) => break Some(response),
                BackendMessage::ErrorResponse(err) => {
                    self.metrics.server_error();
                    server_error.get_or_insert(err);
                }
                BackendMessage::ReadyForQuery(status) => {
                    conn.finish_interaction(status);
                    break None;
                }
                // results of statements preceding the COPY
                _ => {}
            }
        };
        let Some(response) = started else {
            resolve_errors(None, server_error)?;
            return Err(ProtocolError::CopyAborted(
                "statement did not start COPY FROM STDIN".into(),
            ));
        };
        debug!(format = ?response.format, columns = response.column_formats.len(), "COPY FROM STDIN started");

        let params = conn.codec_params().clone();
        let mut pump = CopyPump::new(source);
        let mut local_error = None;
        let mut chunks = 0u64;
        while let Some(chunk) = pump.next_chunk(&self.registry, &params).await {
            match chunk {
                Ok(data) => {
                    conn.send(FrontendMessage::CopyData(data)).await?;
                    chunks += 1;
                }
                Err(err) => {
                    local_error = Some(err);
                    break;
                }
            }
        }
        match &local_error {
            None => conn.send(FrontendMessage::CopyDone).await?,
            Some(err) => {
                warn!(error = %err, chunks, "Aborting COPY FROM STDIN");
                if matches!(err, ProtocolError::Codec(_)) {
                    self.metrics.codec_error();
                }
                conn.send(FrontendMessage::CopyFail {
                    message: err.to_string().replace('\0', ""),
                })
                .await?;
            }
        }

        let mut rows = 0;
        loop {
            match conn.recv().await? {
                BackendMessage::CommandComplete(tag) => rows = tag.rows().unwrap_or(0),
                BackendMessage::ErrorResponse(err) => {
                    self.metrics.server_error();
                    server_error.get_or_insert(err);
                }
                BackendMessage::CopyInResponse(_) => {
                    local_error.get_or_insert(ProtocolError::CopyAborted(
                        "only one COPY FROM STDIN per call is supported".into(),
                    ));
                    conn.send(FrontendMessage::CopyFail {
                        message: "no COPY data source supplied".into(),
                    })
                    .await?;
                }
                BackendMessage::ReadyForQuery(status) => {
                    conn.finish_interaction(status);
                    break;
                }
                _ => {}
            }
        }
        resolve_errors(local_error, server_error)?;
        debug!(rows, chunks, "COPY FROM STDIN complete");
        Ok(rows)
    }

    /// Run a `COPY ... TO STDOUT` statement, writing its data into `sink`.
    /// Returns the row count reported by the server.
    #[instrument(skip_all, fields(sql_len = sql.len()))]
    pub async fn copy_out<W>(&self, sql: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut conn = self.lock().await?;
        let result = self.run_copy_out(&mut conn, sql, sink).await;
        conn.settle(&result);
        result
    }

    async fn run_copy_out<W>(
        &self,
        conn: &mut Connection<S>,
        sql: &str,
        sink: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        conn.send(FrontendMessage::Query {
            sql: sql.to_string(),
        })
        .await?;

        let mut started = false;
        let mut rows = 0;
        let mut local_error = None;
        let mut server_error = None;
        loop {
            match conn.recv().await? {
                BackendMessage::CopyOutResponse(response) => {
                    started = true;
                    debug!(format = ?response.format, "COPY TO STDOUT started");
                }
                BackendMessage::CopyData(data) => {
                    if local_error.is_none() {
                        if let Err(e) = sink.write_all(&data).await {
                            local_error =
                                Some(ProtocolError::CopyAborted(format!("sink failed: {e}")));
                            conn.set_skip_rows(true);
                        }
                    }
                }
                BackendMessage::CopyDone => {
                    if local_error.is_none() {
                        if let Err(e) = sink.flush().await {
                            local_error =
                                Some(ProtocolError::CopyAborted(format!("sink failed: {e}")));
                        }
                    }
                }
                BackendMessage::CommandComplete(tag) => rows = tag.rows().unwrap_or(0),
                BackendMessage::ErrorResponse(err) => {
                    self.metrics.server_error();
                    server_error.get_or_insert(err);
                }
                BackendMessage::CopyInResponse(_) => {
                    local_error.get_or_insert(ProtocolError::CopyAborted(
                        "COPY FROM STDIN needs a data source, use copy_in".into(),
                    ));
                    conn.send(FrontendMessage::CopyFail {
                        message: "no COPY data source supplied".into(),
                    })
                    .await?;
                }
                BackendMessage::ReadyForQuery(status) => {
                    conn.finish_interaction(status);
                    break;
                }
                _ => {}
            }
        }
        if !started && local_error.is_none() && server_error.is_none() {
            local_error = Some(ProtocolError::CopyAborted(
                "statement did not start COPY TO STDOUT".into(),
            ));
        }
        resolve_errors(local_error, server_error)?;
        Ok(rows)
    }

    /// Token that can cancel this session's running query from elsewhere.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.backend_key
            .map(|key| CancelToken::new(key, self.config.clone()))
    }

    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    /// Latest value the server reported for `name` via `ParameterStatus`.
    pub async fn server_parameter(&self, name: &str) -> Option<String> {
        self.conn.lock().await.server_params().get(name).cloned()
    }

    pub async fn server_parameters(&self) -> HashMap<String, String> {
        self.conn.lock().await.server_params().clone()
    }

    pub async fn transaction_status(&self) -> TransactionStatus {
        self.conn.lock().await.status()
    }

    pub async fn is_broken(&self) -> bool {
        let conn = self.conn.lock().await;
        conn.is_broken() || conn.is_closed()
    }

    /// Send `Terminate` and close the stream. Closing twice is a no-op.
    #[instrument(skip_all)]
    pub async fn close(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        if conn.is_closed() {
            return Ok(());
        }
        conn.terminate().await?;
        self.metrics.log_metrics();
        info!("Session closed");
        Ok(())
    }
}

async fn authenticate<S>(conn: &mut Connection<S>, auth: &mut Authenticator) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match conn.recv().await? {
            BackendMessage::Authentication(request) => {
                if let Some(reply) = auth.step(request)? {
                    conn.send(reply).await?;
                }
                if auth.is_authenticated() {
                    return Ok(());
                }
            }
            BackendMessage::ErrorResponse(err) => {
                return Err(ProtocolError::StartupRejected(Box::new(err)))
            }
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    tag: other.tag() as char,
                    phase: "authentication",
                })
            }
        }
    }
}

async fn await_ready<S>(conn: &mut Connection<S>) -> Result<Option<BackendKey>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut key = None;
    loop {
        match conn.recv().await? {
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                key = Some(BackendKey {
                    process_id,
                    secret_key,
                })
            }
            BackendMessage::ReadyForQuery(status) => {
                conn.finish_interaction(status);
                return Ok(key);
            }
            BackendMessage::ErrorResponse(err) => {
                return Err(ProtocolError::StartupRejected(Box::new(err)))
            }
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    tag: other.tag() as char,
                    phase: "startup",
                })
            }
        }
    }
}

fn check_arity(stmt: &PreparedStatement, params: &[Param]) -> Result<()> {
    let expected = stmt.param_types().len();
    if params.len() != expected {
        return Err(ProtocolError::ParameterCount {
            expected,
            actual: params.len(),
        });
    }
    Ok(())
}

/// Caller-supplied type, then the statement's declared type, then the
/// value's own type.
fn resolve_param_oid(param: &Param, declared: Oid) -> Oid {
    match param.oid {
        Some(oid) if oid != oid::UNSPECIFIED => oid,
        _ if declared != oid::UNSPECIFIED => declared,
        _ => param.value.natural_oid(),
    }
}

fn collapse_formats(formats: Vec<Format>) -> FormatCodes {
    match formats.first() {
        None => FormatCodes::AllText,
        Some(&first) if formats.iter().all(|f| *f == first) => match first {
            Format::Text => FormatCodes::AllText,
            Format::Binary => FormatCodes::Uniform(Format::Binary),
        },
        Some(_) => FormatCodes::Each(formats),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn formats_collapse() {
        assert_eq!(collapse_formats(vec![]), FormatCodes::AllText);
        assert_eq!(
            collapse_formats(vec![Format::Text, Format::Text]),
            FormatCodes::AllText
        );
        assert_eq!(
            collapse_formats(vec![Format::Binary, Format::Binary]),
            FormatCodes::Uniform(Format::Binary)
        );
        assert_eq!(
            collapse_formats(vec![Format::Binary, Format::Text]),
            FormatCodes::Each(vec![Format::Binary, Format::Text])
        );
    }

    #[test]
    fn param_oid_precedence() {
        let typed = Param::typed(Value::Int4(1), oid::INT8);
        assert_eq!(resolve_param_oid(&typed, oid::INT4), oid::INT8);
        let plain = Param::new(Value::Int4(1));
        assert_eq!(resolve_param_oid(&plain, oid::NUMERIC), oid::NUMERIC);
        assert_eq!(resolve_param_oid(&plain, oid::UNSPECIFIED), oid::INT4);
    }

    #[test]
    fn arity_mismatch_is_not_fatal() {
        let stmt = PreparedStatement::new("s1".into(), "select $1".into(), vec![oid::INT4], None);
        let err = check_arity(&stmt, &[]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ParameterCount {
                expected: 1,
                actual: 0
            }
        ));
        assert!(!err.is_fatal());
    }
}
