//! JSON-RPC connection broker.
//!
//! A single broker task owns the write half of the stream, the table of
//! pending calls and the registered inbound handlers. Everything else talks
//! to it through a bounded action queue, so no lock guards the socket. A
//! separate reader task decodes inbound frames and feeds them into the same
//! queue.

use crate::error::ClientError;
use ovsdb_protocol::{Decoder, Encoder, Message, Notification, Request, Response};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Capacity of the broker action queue.
pub const ACTION_QUEUE_CAPACITY: usize = 200;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler for inbound method calls. Returns the `result` or the `error`
/// value of the response.
pub type CallHandler = Arc<dyn Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync>;

/// Handler for inbound notifications.
///
/// Handlers run on the broker task and must not block.
pub type NotificationHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// The request/notify surface of a JSON-RPC peer.
pub trait RpcTransport: Send + Sync {
    /// Sends a request and waits for its response.
    fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send;

    /// Sends a notification. Completes once it is written.
    fn notify(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Inbound handlers installed before the connection starts reading.
#[derive(Clone, Default)]
pub struct Handlers {
    calls: HashMap<String, CallHandler>,
    notifications: HashMap<String, NotificationHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_call<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync + 'static,
    {
        self.calls.insert(method.into(), Arc::new(handler));
        self
    }

    pub fn on_notification<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.notifications.insert(method.into(), Arc::new(handler));
        self
    }

    /// Answers server `echo` requests with their own params.
    pub fn with_echo(self) -> Self {
        self.on_call("echo", |params| Ok(Value::Array(params)))
    }
}

enum Action {
    Call {
        id: u64,
        method: String,
        params: Vec<Value>,
        reply: oneshot::Sender<Result<Value, ClientError>>,
    },
    Notify {
        method: String,
        params: Vec<Value>,
        done: Option<oneshot::Sender<Result<(), ClientError>>>,
    },
    DropPending {
        id: u64,
    },
    HandleCall {
        method: String,
        handler: CallHandler,
    },
    HandleNotification {
        method: String,
        handler: NotificationHandler,
    },
    Inbound(Message),
    ReadFailed(ClientError),
    Close,
}

/// A running JSON-RPC connection.
pub struct Connection {
    actions: mpsc::Sender<Action>,
    next_id: AtomicU64,
    done: watch::Receiver<bool>,
    request_timeout: Duration,
}

impl Connection {
    /// Starts the broker and reader tasks over `stream`.
    pub fn start<S>(stream: S, handlers: Handlers, request_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (actions_tx, actions_rx) = mpsc::channel(ACTION_QUEUE_CAPACITY);
        let (done_tx, done_rx) = watch::channel(false);

        let reader = tokio::spawn(read_loop(read_half, actions_tx.clone()));
        let broker = Broker {
            writer: write_half,
            pending: HashMap::new(),
            calls: handlers.calls,
            notifications: handlers.notifications,
        };
        tokio::spawn(broker.run(actions_rx, reader, done_tx));

        Self {
            actions: actions_tx,
            next_id: AtomicU64::new(1),
            done: done_rx,
            request_timeout,
        }
    }

    /// Sends a request that is canceled on the server if the caller gives
    /// up before the response arrives.
    ///
    /// On timeout, or when the returned future is dropped, the pending slot
    /// is released and a `cancel` notification carrying the request id is
    /// sent.
    pub async fn call_cancelable(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, ClientError> {
        self.request(method, params, self.request_timeout, true).await
    }

    /// Sends a request with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        self.request(method, params, timeout, false).await
    }

    async fn request(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
        cancel_remote: bool,
    ) -> Result<Value, ClientError> {
        if self.is_closed() {
            return Err(ClientError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        tracing::trace!("Sending request id={} method={}", id, method);
        self.actions
            .send(Action::Call {
                id,
                method: method.to_string(),
                params,
                reply: tx,
            })
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;

        let mut guard = PendingCall {
            id,
            actions: &self.actions,
            cancel_remote,
            armed: true,
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                guard.armed = false;
                result
            }
            Ok(Err(_)) => {
                guard.armed = false;
                Err(ClientError::ConnectionClosed)
            }
            Err(_) => {
                tracing::debug!("Request id={} method={} timed out", id, method);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Registers a handler for inbound calls of `method`.
    pub async fn handle_call<F>(&self, method: &str, handler: F) -> Result<(), ClientError>
    where
        F: Fn(Vec<Value>) -> Result<Value, Value> + Send + Sync + 'static,
    {
        self.actions
            .send(Action::HandleCall {
                method: method.to_string(),
                handler: Arc::new(handler),
            })
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Registers a handler for inbound notifications of `method`.
    pub async fn handle_notification<F>(&self, method: &str, handler: F) -> Result<(), ClientError>
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.actions
            .send(Action::HandleNotification {
                method: method.to_string(),
                handler: Arc::new(handler),
            })
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Returns whether the broker has stopped.
    pub fn is_closed(&self) -> bool {
        *self.done.borrow()
    }

    /// Waits until the broker has stopped.
    pub async fn closed(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|closed| *closed).await;
    }

    /// Closes the connection and waits for the broker to stop.
    ///
    /// Pending calls fail with [`ClientError::ConnectionClosed`].
    pub async fn close(&self) {
        tracing::debug!("Closing connection...");
        let _ = self.actions.send(Action::Close).await;
        self.closed().await;
    }
}

impl RpcTransport for Connection {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.request(method, params, self.request_timeout, false).await
    }

    async fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.actions
            .send(Action::Notify {
                method: method.to_string(),
                params,
                done: Some(tx),
            })
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }
}

/// Releases the pending slot of an abandoned call.
struct PendingCall<'a> {
    id: u64,
    actions: &'a mpsc::Sender<Action>,
    cancel_remote: bool,
    armed: bool,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.actions.try_send(Action::DropPending { id: self.id })
        {
            tracing::warn!(
                "Action queue full, request id={} stays pending until swept",
                self.id
            );
        }
        if self.cancel_remote {
            let _ = self.actions.try_send(Action::Notify {
                method: "cancel".to_string(),
                params: vec![json!(self.id)],
                done: None,
            });
        }
    }
}

struct Broker<W> {
    writer: W,
    pending: HashMap<u64, oneshot::Sender<Result<Value, ClientError>>>,
    calls: HashMap<String, CallHandler>,
    notifications: HashMap<String, NotificationHandler>,
}

impl<W: AsyncWrite + Unpin> Broker<W> {
    async fn run(
        mut self,
        mut actions: mpsc::Receiver<Action>,
        reader: JoinHandle<()>,
        done: watch::Sender<bool>,
    ) {
        let reason = loop {
            let Some(action) = actions.recv().await else {
                break ClientError::ConnectionClosed;
            };
            match self.handle(action).await {
                Ok(true) => {}
                Ok(false) => break ClientError::ConnectionClosed,
                Err(e) => break e,
            }
        };
        tracing::debug!(
            "Connection stopped ({}), failing {} pending calls",
            reason,
            self.pending.len()
        );

        reader.abort();
        // stop accepting work before draining, so nothing new lands in the queue
        actions.close();
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(ClientError::ConnectionClosed));
        }
        while let Ok(action) = actions.try_recv() {
            if let Action::Call { reply, .. } = action {
                let _ = reply.send(Err(ClientError::ConnectionClosed));
            }
        }
        let _ = self.writer.shutdown().await;
        done.send_replace(true);
    }

    /// Returns `Ok(false)` on an orderly close.
    async fn handle(&mut self, action: Action) -> Result<bool, ClientError> {
        match action {
            Action::Call {
                id,
                method,
                params,
                reply,
            } => {
                if reply.is_closed() {
                    return Ok(true);
                }
                if let Err(e) = self.send(&Request::new(id, method).with_params(params)).await {
                    let _ = reply.send(Err(ClientError::ConnectionClosed));
                    return Err(e);
                }
                self.track(id, reply);
            }
            Action::Notify {
                method,
                params,
                done,
            } => {
                let result = self.send(&Notification::new(method, params)).await;
                let failed = result.is_err();
                match done {
                    Some(done) => {
                        let _ = done.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            return Err(e);
                        }
                    }
                }
                if failed {
                    return Err(ClientError::ConnectionClosed);
                }
            }
            Action::DropPending { id } => {
                if self.pending.remove(&id).is_some() {
                    tracing::trace!("Dropped pending request id={}", id);
                }
            }
            Action::HandleCall { method, handler } => {
                self.calls.insert(method, handler);
            }
            Action::HandleNotification { method, handler } => {
                self.notifications.insert(method, handler);
            }
            Action::Inbound(message) => self.dispatch(message).await?,
            Action::ReadFailed(e) => return Err(e),
            Action::Close => return Ok(false),
        }
        Ok(true)
    }

    /// Registers a pending call. Once the table is large, slots whose caller
    /// has gone away are swept first; their `DropPending` may have been lost.
    fn track(&mut self, id: u64, reply: oneshot::Sender<Result<Value, ClientError>>) {
        if self.pending.len() >= ACTION_QUEUE_CAPACITY {
            let before = self.pending.len();
            self.pending.retain(|_, reply| !reply.is_closed());
            let swept = before - self.pending.len();
            if swept > 0 {
                tracing::debug!("Swept {} abandoned pending requests", swept);
            }
        }
        self.pending.insert(id, reply);
    }

    async fn dispatch(&mut self, message: Message) -> Result<(), ClientError> {
        match message {
            Message::Response(response) => {
                let slot = response.id.as_u64().and_then(|id| self.pending.remove(&id));
                match slot {
                    Some(reply) => {
                        let _ = reply.send(response.into_result().map_err(ClientError::Remote));
                    }
                    None => tracing::debug!("Discarding response with unknown id {}", response.id),
                }
            }
            Message::Request(request) => {
                let response = match self.calls.get(&request.method) {
                    Some(handler) => match handler(request.params) {
                        Ok(result) => Response::ok(request.id, result),
                        Err(error) => Response::error(request.id, error),
                    },
                    None => {
                        tracing::debug!("No handler for inbound call {}", request.method);
                        Response::error(
                            request.id,
                            json!({"error": "unknown method", "details": request.method}),
                        )
                    }
                };
                self.send(&response).await?;
            }
            Message::Notification(notification) => {
                match self.notifications.get(&notification.method) {
                    Some(handler) => handler(notification.params),
                    None => tracing::debug!(
                        "No handler for notification {}",
                        notification.method
                    ),
                }
            }
        }
        Ok(())
    }

    async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ClientError> {
        let encoded = Encoder::encode(message)?;
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, actions: mpsc::Sender<Action>) {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];

    let error = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break ClientError::ConnectionClosed,
            Ok(n) => n,
            Err(e) => break ClientError::Io(e),
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.decode() {
                Ok(Some(message)) => {
                    if actions.send(Action::Inbound(message)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_fatal() => {
                    let _ = actions.send(Action::ReadFailed(e.into())).await;
                    return;
                }
                Err(e) => tracing::warn!("Discarding malformed message: {}", e),
            }
        }
    };

    tracing::debug!("Read loop finished: {}", error);
    let _ = actions.send(Action::ReadFailed(error)).await;
}
