//! Per-interaction result collection.
//!
//! One [`ResultAccumulator`] lives for one interaction. It turns the backend
//! message stream into an ordered list of statement results, keeps the first
//! local failure and the first server error, and is finished only after the
//! session has seen `ReadyForQuery`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::backend::{BackendMessage, CommandTag, CopyResponse, RowDescription};
use crate::protocol::fields::ServerError;
use crate::types::registry::{CodecContext, CodecParams, TypeRegistry, ValueProcessor};

use super::reducer::RowReducer;
use super::row::RowView;

/// How one statement result ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Command(CommandTag),
    /// `Execute` hit its row limit; the portal has more rows.
    Suspended,
    /// The query string was empty.
    Empty,
}

/// Output of one statement within an interaction.
#[derive(Debug, Clone)]
pub struct StatementResult<T> {
    pub columns: Option<Arc<RowDescription>>,
    pub output: T,
    pub completion: Completion,
}

impl<T> StatementResult<T> {
    /// Row count reported by the command tag.
    pub fn rows_affected(&self) -> Option<u64> {
        match &self.completion {
            Completion::Command(tag) => tag.rows(),
            _ => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.completion == Completion::Suspended
    }
}

/// Results of one interaction: a single outcome when exactly one statement
/// ran, otherwise the ordered sequence.
#[derive(Debug, Clone)]
pub enum QueryOutcome<T> {
    Single(StatementResult<T>),
    Multiple(Vec<StatementResult<T>>),
}

impl<T> QueryOutcome<T> {
    fn from_results(mut results: Vec<StatementResult<T>>) -> Self {
        if results.len() == 1 {
            if let Some(only) = results.pop() {
                return QueryOutcome::Single(only);
            }
        }
        QueryOutcome::Multiple(results)
    }

    pub fn len(&self) -> usize {
        match self {
            QueryOutcome::Single(_) => 1,
            QueryOutcome::Multiple(results) => results.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_single(self) -> Option<StatementResult<T>> {
        match self {
            QueryOutcome::Single(result) => Some(result),
            QueryOutcome::Multiple(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<StatementResult<T>> {
        match self {
            QueryOutcome::Single(result) => vec![result],
            QueryOutcome::Multiple(results) => results,
        }
    }
}

/// What the session loop should do after a message was accumulated.
#[derive(Debug)]
pub(crate) enum Step {
    Continue,
    /// A local failure was recorded; row data can be length-skipped.
    Skip,
    CopyIn(CopyResponse),
    CopyOut(CopyResponse),
}

struct Pending<A> {
    columns: Option<Arc<RowDescription>>,
    processors: Vec<Arc<dyn ValueProcessor>>,
    acc: A,
}

pub(crate) struct ResultAccumulator<'r, R: RowReducer> {
    reducer: &'r R,
    registry: &'r TypeRegistry,
    results: Vec<StatementResult<R::Output>>,
    pending: Option<Pending<R::Acc>>,
    local_error: Option<ProtocolError>,
    server_error: Option<ServerError>,
    skipped: u64,
}

impl<'r, R: RowReducer> ResultAccumulator<'r, R> {
    pub(crate) fn new(reducer: &'r R, registry: &'r TypeRegistry) -> Self {
        Self {
            reducer,
            registry,
            results: Vec::new(),
            pending: None,
            local_error: None,
            server_error: None,
            skipped: 0,
        }
    }

    pub(crate) fn is_skipping(&self) -> bool {
        self.local_error.is_some()
    }

    /// Keep the first local failure; later ones are dropped.
    pub(crate) fn record_local(&mut self, err: ProtocolError) {
        if self.local_error.is_none() {
            warn!(error = %err, "Local failure recorded, skipping remaining row data");
            self.local_error = Some(err);
        } else {
            debug!(error = %err, "Further local failure ignored");
        }
    }

    pub(crate) fn record_server(&mut self, err: ServerError) {
        debug!(code = err.code(), message = err.message(), "Server error recorded");
        // the failed statement produces no result
        self.pending = None;
        if self.server_error.is_none() {
            self.server_error = Some(err);
        }
    }

    pub(crate) fn on_message(&mut self, msg: BackendMessage, params: &CodecParams) -> Result<Step> {
        match msg {
            BackendMessage::RowDescription(columns) => {
                let processors = columns
                    .columns()
                    .iter()
                    .map(|c| self.registry.resolve(c.type_oid))
                    .collect();
                let acc = self.reducer.init(Some(&columns));
                self.pending = Some(Pending {
                    columns: Some(columns),
                    processors,
                    acc,
                });
            }
            BackendMessage::DataRow(row) => {
                if self.is_skipping() {
                    self.skipped += 1;
                    return Ok(Step::Continue);
                }
                let Some(Pending {
                    columns: Some(columns),
                    processors,
                    acc,
                }) = self.pending.as_mut()
                else {
                    return Err(ProtocolError::protocol("DataRow without a RowDescription"));
                };
                let view = RowView::new(
                    &row,
                    columns,
                    processors,
                    CodecContext::new(params, self.registry),
                )?;
                let stepped = self.reducer.step(acc, &view);
                drop(view);
                if let Err(err) = stepped {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    self.record_local(err);
                    return Ok(Step::Skip);
                }
            }
            BackendMessage::Discarded { .. } => self.skipped += 1,
            BackendMessage::CommandComplete(tag) => self.complete(Completion::Command(tag)),
            BackendMessage::PortalSuspended => self.complete(Completion::Suspended),
            BackendMessage::EmptyQueryResponse => self.complete(Completion::Empty),
            BackendMessage::ErrorResponse(err) => self.record_server(err),
            BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::NoData
            | BackendMessage::CopyData(_)
            | BackendMessage::CopyDone => {}
            BackendMessage::CopyInResponse(response) => return Ok(Step::CopyIn(response)),
            BackendMessage::CopyOutResponse(response) => return Ok(Step::CopyOut(response)),
            BackendMessage::CopyBothResponse(_) => {
                return Err(ProtocolError::protocol(
                    "CopyBothResponse received; replication streams are not supported",
                ))
            }
            other => {
                return Err(ProtocolError::UnexpectedMessage {
                    tag: other.tag() as char,
                    phase: "query",
                })
            }
        }
        Ok(Step::Continue)
    }

    fn complete(&mut self, completion: Completion) {
        let (columns, output) = match self.pending.take() {
            Some(pending) => (pending.columns, self.reducer.finish(pending.acc)),
            None => (None, self.reducer.finish(self.reducer.init(None))),
        };
        self.results.push(StatementResult {
            columns,
            output,
            completion,
        });
    }

    /// Resolve the interaction once `ReadyForQuery` has been read.
    pub(crate) fn finish(self) -> Result<QueryOutcome<R::Output>> {
        if self.skipped > 0 {
            debug!(skipped = self.skipped, "Row frames skipped during interaction");
        }
        resolve_errors(self.local_error, self.server_error)?;
        Ok(QueryOutcome::from_results(self.results))
    }
}

/// Combine the local and server failures of one interaction. The local
/// failure is the reported cause; the server error stays attached.
pub(crate) fn resolve_errors(
    local: Option<ProtocolError>,
    server: Option<ServerError>,
) -> Result<()> {
    match (local, server) {
        (Some(cause), Some(server)) => Err(ProtocolError::Interaction {
            cause: Box::new(cause),
            server: Box::new(server),
        }),
        (Some(cause), None) => Err(cause),
        (None, Some(server)) => Err(server.into()),
        (None, None) => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::reducer::{CollectRows, CountRows};
    use crate::session::row::tests::{data_row, description};
    use crate::types::{oid, Value};

    fn server_error(message: &str) -> ServerError {
        ServerError::from_fields([(b'S', "ERROR"), (b'C', "42P01"), (b'M', message)])
    }

    #[test]
    fn single_statement_collapses() {
        let registry = TypeRegistry::shared();
        let params = CodecParams::default();
        let mut acc = ResultAccumulator::new(&CollectRows, &registry);
        acc.on_message(
            BackendMessage::RowDescription(description(&[("n", oid::INT4)])),
            &params,
        )
        .unwrap();
        acc.on_message(BackendMessage::DataRow(data_row(&[Some("1")])), &params)
            .unwrap();
        acc.on_message(
            BackendMessage::CommandComplete(CommandTag::new("SELECT 1")),
            &params,
        )
        .unwrap();

        let single = acc.finish().unwrap().into_single().unwrap();
        assert_eq!(single.output[0].get(0), Some(&Value::Int4(1)));
        assert_eq!(single.rows_affected(), Some(1));
    }

    #[test]
    fn statements_stay_ordered() {
        let registry = TypeRegistry::shared();
        let params = CodecParams::default();
        let mut acc = ResultAccumulator::new(&CountRows, &registry);
        for tag in ["CREATE TABLE", "INSERT 0 3"] {
            acc.on_message(BackendMessage::CommandComplete(CommandTag::new(tag)), &params)
                .unwrap();
        }
        acc.on_message(BackendMessage::EmptyQueryResponse, &params)
            .unwrap();

        let results = acc.finish().unwrap();
        assert!(matches!(results, QueryOutcome::Multiple(ref r) if r.len() == 3));
        let results = results.into_vec();
        assert_eq!(results[1].rows_affected(), Some(3));
        assert_eq!(results[2].completion, Completion::Empty);
    }

    #[test]
    fn codec_failure_enters_skip_and_wins_over_server_error() {
        let registry = TypeRegistry::shared();
        let params = CodecParams::default();
        let mut acc = ResultAccumulator::new(&CollectRows, &registry);
        acc.on_message(
            BackendMessage::RowDescription(description(&[("n", oid::INT4)])),
            &params,
        )
        .unwrap();
        let step = acc
            .on_message(BackendMessage::DataRow(data_row(&[Some("x")])), &params)
            .unwrap();
        assert!(matches!(step, Step::Skip));
        acc.on_message(BackendMessage::Discarded { tag: b'D', len: 9 }, &params)
            .unwrap();
        acc.on_message(BackendMessage::ErrorResponse(server_error("late")), &params)
            .unwrap();

        match acc.finish().unwrap_err() {
            ProtocolError::Interaction { cause, server } => {
                assert!(matches!(*cause, ProtocolError::Codec(_)));
                assert_eq!(server.message(), "late");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_error_alone_is_reported() {
        let registry = TypeRegistry::shared();
        let params = CodecParams::default();
        let mut acc = ResultAccumulator::new(&CountRows, &registry);
        acc.on_message(BackendMessage::ErrorResponse(server_error("missing")), &params)
            .unwrap();
        let err = acc.finish().unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.server_error().unwrap().code(), "42P01");
    }

    #[test]
    fn data_row_without_description_is_fatal() {
        let registry = TypeRegistry::shared();
        let params = CodecParams::default();
        let mut acc = ResultAccumulator::new(&CountRows, &registry);
        let err = acc
            .on_message(BackendMessage::DataRow(data_row(&[Some("1")])), &params)
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
