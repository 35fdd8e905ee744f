//! Off-read-path delivery of asynchronous server messages.
//!
//! Notices, notifications, parameter changes and protocol negotiation can
//! arrive in the middle of any interaction. The session hands them to
//! [`Dispatcher::dispatch`], which only enqueues; registered handlers run on a
//! worker task so a slow callback never stalls protocol reads.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::backend::{BackendMessage, Notification};
use crate::protocol::fields::ServerError;

/// Message kinds handlers can subscribe to.
pub mod kinds {
    pub const NOTIFICATION: &str = "notification";
    pub const NOTICE: &str = "notice";
    pub const PARAMETER: &str = "parameter";
    pub const PROTOCOL_NEGOTIATION: &str = "protocol-negotiation";
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsyncMessage {
    Notification(Notification),
    Notice(ServerError),
    Parameter { name: String, value: String },
    ProtocolNegotiation { newest_minor: i32, unrecognized: Vec<String> },
}

impl AsyncMessage {
    /// Convert an out-of-band backend message; anything else is returned unchanged.
    pub fn from_backend(msg: BackendMessage) -> std::result::Result<Self, BackendMessage> {
        match msg {
            BackendMessage::NotificationResponse(n) => Ok(AsyncMessage::Notification(n)),
            BackendMessage::NoticeResponse(e) => Ok(AsyncMessage::Notice(e)),
            BackendMessage::ParameterStatus { name, value } => {
                Ok(AsyncMessage::Parameter { name, value })
            }
            BackendMessage::NegotiateProtocolVersion {
                newest_minor,
                unrecognized,
            } => Ok(AsyncMessage::ProtocolNegotiation {
                newest_minor,
                unrecognized,
            }),
            other => Err(other),
        }
    }

    #[inline]
    pub fn kind(&self) -> Cow<'static, str> {
        match self {
            AsyncMessage::Notification(_) => Cow::Borrowed(kinds::NOTIFICATION),
            AsyncMessage::Notice(_) => Cow::Borrowed(kinds::NOTICE),
            AsyncMessage::Parameter { .. } => Cow::Borrowed(kinds::PARAMETER),
            AsyncMessage::ProtocolNegotiation { .. } => Cow::Borrowed(kinds::PROTOCOL_NEGOTIATION),
        }
    }
}

type HandlerFn = dyn Fn(&AsyncMessage) + Send + Sync + 'static;
type HandlerMap = HashMap<Cow<'static, str>, Vec<Box<HandlerFn>>>;

/// Registry of async-message handlers plus the worker that runs them.
///
/// The worker is spawned on the current Tokio runtime at the first
/// [`dispatch`](Self::dispatch) and stops once the dispatcher is dropped.
pub struct Dispatcher {
    handlers: Arc<RwLock<HandlerMap>>,
    sender: Mutex<Option<UnboundedSender<AsyncMessage>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<String> = self
            .handlers
            .read()
            .map(|h| h.keys().map(|k| k.to_string()).collect())
            .unwrap_or_default();
        f.debug_struct("Dispatcher").field("kinds", &kinds).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            sender: Mutex::new(None),
        }
    }

    /// Add a handler for one of the [`kinds`]. Several handlers per kind run in
    /// registration order.
    pub fn register<F>(&self, kind: &str, handler: F) -> Result<()>
    where
        F: Fn(&AsyncMessage) + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::protocol("Failed to acquire write lock on dispatcher"))?;
        handlers
            .entry(Cow::Owned(kind.to_string()))
            .or_default()
            .push(Box::new(handler));
        Ok(())
    }

    pub fn has_handlers(&self, kind: &str) -> bool {
        self.handlers
            .read()
            .map(|h| h.get(kind).is_some_and(|v| !v.is_empty()))
            .unwrap_or(false)
    }

    /// Queue a message for the worker. Never blocks.
    pub fn dispatch(&self, msg: AsyncMessage) -> Result<()> {
        let mut sender = self
            .sender
            .lock()
            .map_err(|_| ProtocolError::protocol("Dispatcher sender lock poisoned"))?;
        if sender.as_ref().map_or(true, UnboundedSender::is_closed) {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker(self.handlers.clone(), rx));
            debug!("Async message worker started");
            *sender = Some(tx);
        }
        let Some(tx) = sender.as_ref() else {
            return Err(ProtocolError::protocol("Async message worker has stopped"));
        };
        trace!(kind = %msg.kind(), "Queueing async message");
        tx.send(msg)
            .map_err(|_| ProtocolError::protocol("Async message worker has stopped"))
    }

    /// Run the handlers for `msg` on the calling thread.
    pub fn dispatch_now(&self, msg: &AsyncMessage) -> Result<()> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::protocol("Failed to acquire read lock on dispatcher"))?;
        invoke(&handlers, msg);
        Ok(())
    }
}

fn invoke(handlers: &HandlerMap, msg: &AsyncMessage) {
    match handlers.get(msg.kind().as_ref()) {
        Some(list) => list.iter().for_each(|handler| handler(msg)),
        None => trace!(kind = %msg.kind(), "No handler registered"),
    }
}

async fn run_worker(handlers: Arc<RwLock<HandlerMap>>, mut rx: UnboundedReceiver<AsyncMessage>) {
    while let Some(msg) = rx.recv().await {
        match handlers.read() {
            Ok(handlers) => invoke(&handlers, &msg),
            Err(_) => {
                warn!("Dispatcher lock poisoned, stopping async message worker");
                break;
            }
        }
    }
    debug!("Async message worker stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notification(payload: &str) -> AsyncMessage {
        AsyncMessage::Notification(Notification {
            process_id: 7,
            channel: "jobs".into(),
            payload: payload.into(),
        })
    }

    #[tokio::test]
    async fn handlers_run_on_worker_in_order() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher
            .register(kinds::NOTIFICATION, move |msg| {
                if let AsyncMessage::Notification(n) = msg {
                    let _ = tx.send(n.payload.clone());
                }
            })
            .unwrap();

        dispatcher.dispatch(notification("a")).unwrap();
        dispatcher.dispatch(notification("b")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap(), "b");
    }

    #[test]
    fn dispatch_now_routes_by_kind() {
        let dispatcher = Dispatcher::new();
        let notices = Arc::new(AtomicUsize::new(0));
        let counter = notices.clone();
        dispatcher
            .register(kinds::NOTICE, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        dispatcher.dispatch_now(&notification("ignored")).unwrap();
        dispatcher
            .dispatch_now(&AsyncMessage::Notice(ServerError::default()))
            .unwrap();
        assert_eq!(notices.load(Ordering::SeqCst), 1);
        assert!(dispatcher.has_handlers(kinds::NOTICE));
        assert!(!dispatcher.has_handlers(kinds::PARAMETER));
    }

    #[test]
    fn only_out_of_band_messages_convert() {
        let msg = BackendMessage::ParameterStatus {
            name: "TimeZone".into(),
            value: "UTC".into(),
        };
        assert_eq!(AsyncMessage::from_backend(msg).unwrap().kind(), kinds::PARAMETER);
        assert!(AsyncMessage::from_backend(BackendMessage::NoData).is_err());
    }
}
