//! High-level client API.
//!
//! A [`Client`] owns one connection at a time. A supervisor task watches
//! it and, when it drops, reconnects with a fixed backoff, refreshes the
//! database list and schemas and re-establishes every subscription before
//! the new connection is handed to application calls.

use crate::connection::{Connection, Handlers, RpcTransport, DEFAULT_REQUEST_TIMEOUT};
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::stream::ClientStream;
use crate::subscription::{Delivery, SubscriptionManager, SubscriptionState, DEFAULT_SINK_CAPACITY};
use crate::tls::TlsClientConfig;
use dashmap::DashMap;
use ovsdb_core::{DbSchema, MonitorRequests, OperationResult, Replica, Transaction, Updates};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between reconnect attempts.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Interval between keep-alive echoes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Time a keep-alive echo may take before the connection is dropped.
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications routed to the subscription manager.
const UPDATE_METHODS: [&str; 3] = ["update", "update2", "update3"];

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// Required for `ssl:` endpoints.
    pub tls: Option<TlsClientConfig>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub reconnect_backoff: Duration,
    /// `None` disables keep-alive probing.
    pub keepalive_interval: Option<Duration>,
    pub keepalive_timeout: Duration,
    /// Capacity of each subscription sink.
    pub sink_capacity: usize,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            tls: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>, timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_timeout = timeout;
        self
    }

    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity;
        self
    }
}

struct Inner {
    config: ClientConfig,
    /// The connection application calls may use, `None` while reconnecting.
    current: watch::Sender<Option<Arc<Connection>>>,
    shutdown: watch::Sender<bool>,
    subscriptions: Arc<SubscriptionManager>,
    schemas: DashMap<String, Arc<DbSchema>>,
    databases: RwLock<Vec<String>>,
}

/// High-level OVSDB client.
///
/// Cloning is cheap; clones share the connection and subscriptions.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connects to the server, fetches the database list and schemas and
    /// starts the reconnect supervisor.
    ///
    /// The first connection attempt is not retried.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        if let Some(tls) = &config.tls {
            tls.validate()?;
        }
        let (current, _) = watch::channel(None);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            subscriptions: Arc::new(SubscriptionManager::new(config.sink_capacity)),
            config,
            current,
            shutdown,
            schemas: DashMap::new(),
            databases: RwLock::new(Vec::new()),
        });

        let connection = inner.open_session().await?;
        inner.current.send_replace(Some(connection.clone()));
        info!("Connected to {}", inner.config.endpoint);

        tokio::spawn(supervise(Arc::downgrade(&inner), connection, shutdown_rx));
        Ok(Self { inner })
    }

    /// Returns whether a usable connection is currently published.
    pub fn is_connected(&self) -> bool {
        self.inner
            .current
            .borrow()
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.config.endpoint
    }

    /// Stops reconnecting, cancels nothing remotely and closes the
    /// connection. Subscription sinks are closed.
    pub async fn close(&self) {
        debug!("Closing client for {}", self.inner.config.endpoint);
        self.inner.shutdown.send_replace(true);
        let connection = self.inner.current.send_replace(None);
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.inner.subscriptions.clear();
    }

    /// Waits for a usable connection, up to the request timeout.
    async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        if *self.inner.shutdown.borrow() {
            return Err(ClientError::NotConnected);
        }
        let mut current = self.inner.current.subscribe();
        let ready = async {
            current
                .wait_for(|c| c.as_ref().is_some_and(|c| !c.is_closed()))
                .await
                .ok()
                .and_then(|c| (*c).clone())
        };
        match tokio::time::timeout(self.inner.config.request_timeout, ready).await {
            Ok(Some(connection)) => Ok(connection),
            Ok(None) | Err(_) => Err(ClientError::NotConnected),
        }
    }

    // =========================================================================
    // Database discovery
    // =========================================================================

    /// Lists the databases served by the server.
    pub async fn list_dbs(&self) -> Result<Vec<String>, ClientError> {
        let connection = self.connection().await?;
        self.inner.fetch_databases(&connection).await
    }

    /// Database names seen by the last `list_dbs`.
    pub fn databases(&self) -> Vec<String> {
        self.inner.databases.read().clone()
    }

    /// Returns the schema of `database`, fetching it if it is not cached.
    pub async fn get_schema(&self, database: &str) -> Result<Arc<DbSchema>, ClientError> {
        if let Some(schema) = self.schema(database) {
            return Ok(schema);
        }
        let connection = self.connection().await?;
        self.inner.fetch_schema(&connection, database).await
    }

    /// Cached schema of `database`.
    pub fn schema(&self, database: &str) -> Option<Arc<DbSchema>> {
        self.inner.schemas.get(database).map(|s| s.clone())
    }

    /// Fetches the schema of `database` as the server sent it, uncached.
    pub async fn raw_schema(&self, database: &str) -> Result<Value, ClientError> {
        let connection = self.connection().await?;
        connection.call("get_schema", vec![json!(database)]).await
    }

    /// Sends `echo` and checks that the server returned the same params.
    pub async fn echo(&self, params: Vec<Value>) -> Result<Vec<Value>, ClientError> {
        let connection = self.connection().await?;
        let result = connection.call("echo", params.clone()).await?;
        match result {
            Value::Array(echoed) if echoed == params => Ok(echoed),
            other => Err(ClientError::UnexpectedResponse(format!(
                "echo returned {}",
                other
            ))),
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Runs raw `operations` against `database` and returns the raw result.
    ///
    /// If the call times out or the future is dropped, a `cancel`
    /// notification for the request is sent.
    pub async fn transact(
        &self,
        database: &str,
        operations: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let connection = self.connection().await?;
        let mut params = Vec::with_capacity(operations.len() + 1);
        params.push(json!(database));
        params.extend(operations);
        connection.call_cancelable("transact", params).await
    }

    /// Validates and runs `transaction`.
    ///
    /// Fails with [`ClientError::Transaction`] when any operation reported
    /// an error.
    pub async fn execute(
        &self,
        transaction: &Transaction,
    ) -> Result<Vec<OperationResult>, ClientError> {
        let operations = transaction.build()?;
        debug!(
            "Executing transaction of {} operations on {}",
            operations.len(),
            transaction.database()
        );
        let result = self.transact(transaction.database(), operations).await?;
        let results = transaction.decode_results(&result)?;
        match transaction.first_error(&results) {
            Some(error) => Err(ClientError::Transaction(error)),
            None => Ok(results),
        }
    }

    // =========================================================================
    // Monitors
    // =========================================================================

    /// Establishes subscription `name` and returns its initial batch and a
    /// sink receiving every later batch.
    ///
    /// The subscription survives reconnects until it is canceled.
    pub async fn monitor(
        &self,
        name: &str,
        requests: MonitorRequests,
    ) -> Result<(Updates, mpsc::Receiver<Delivery>), ClientError> {
        let connection = self.connection().await?;
        self.inner
            .subscriptions
            .establish(&*connection, name, requests, None)
            .await
    }

    /// Establishes subscription `name` feeding a replica of its database.
    ///
    /// The replica holds the initial contents when this returns and is kept
    /// in sync across reconnects. The sink receives each batch after it has
    /// been merged.
    pub async fn mirror(
        &self,
        name: &str,
        requests: MonitorRequests,
    ) -> Result<(Arc<Replica>, mpsc::Receiver<Delivery>), ClientError> {
        let replica = Arc::new(Replica::new(requests.schema().clone()));
        let connection = self.connection().await?;
        let (_, receiver) = self
            .inner
            .subscriptions
            .establish(&*connection, name, requests, Some(replica.clone()))
            .await?;
        Ok((replica, receiver))
    }

    /// Cancels subscription `name`.
    ///
    /// Local state is dropped even when the server reports an error. With
    /// no usable connection the subscription is only dropped locally, so it
    /// is not re-established after the next reconnect.
    pub async fn monitor_cancel(&self, name: &str) -> Result<(), ClientError> {
        match self.connection().await {
            Ok(connection) => self.inner.subscriptions.cancel(&*connection, name).await,
            Err(e) => {
                debug!("Canceling subscription {} locally: {}", name, e);
                if self.inner.subscriptions.forget(name) {
                    Ok(())
                } else {
                    Err(ClientError::UnknownSubscription(name.to_string()))
                }
            }
        }
    }

    pub fn subscription_state(&self, name: &str) -> Option<SubscriptionState> {
        self.inner.subscriptions.state(name)
    }

    /// Names of all registered subscriptions.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.names()
    }
}

impl Inner {
    /// Dials, installs handlers and brings the session up to date.
    async fn open_session(&self) -> Result<Arc<Connection>, ClientError> {
        let stream = ClientStream::connect(
            &self.config.endpoint,
            self.config.tls.as_ref(),
            self.config.connect_timeout,
        )
        .await?;

        let mut handlers = Handlers::new().with_echo();
        for method in UPDATE_METHODS {
            let subscriptions = self.subscriptions.clone();
            handlers =
                handlers.on_notification(method, move |params| subscriptions.deliver(method, params));
        }
        let connection = Arc::new(Connection::start(
            stream,
            handlers,
            self.config.request_timeout,
        ));

        if let Err(e) = self.prepare(&connection).await {
            connection.close().await;
            return Err(e);
        }

        if let Some(interval) = self.config.keepalive_interval {
            tokio::spawn(keep_alive(
                connection.clone(),
                interval,
                self.config.keepalive_timeout,
            ));
        }
        Ok(connection)
    }

    async fn prepare(&self, connection: &Connection) -> Result<(), ClientError> {
        let databases = self.fetch_databases(connection).await?;
        for database in &databases {
            self.fetch_schema(connection, database).await?;
        }
        self.subscriptions
            .reestablish_all(connection, |database| {
                self.schemas.get(database).map(|s| s.clone())
            })
            .await
    }

    async fn fetch_databases(&self, connection: &Connection) -> Result<Vec<String>, ClientError> {
        let result = connection.call("list_dbs", vec![]).await?;
        let databases: Vec<String> = serde_json::from_value(result)
            .map_err(|e| ClientError::UnexpectedResponse(format!("list_dbs: {}", e)))?;
        *self.databases.write() = databases.clone();
        Ok(databases)
    }

    async fn fetch_schema(
        &self,
        connection: &Connection,
        database: &str,
    ) -> Result<Arc<DbSchema>, ClientError> {
        let result = connection.call("get_schema", vec![json!(database)]).await?;
        let schema = Arc::new(DbSchema::from_json(result)?);
        if schema.name() != database {
            return Err(ClientError::UnexpectedResponse(format!(
                "get_schema({}) returned schema {}",
                database,
                schema.name()
            )));
        }
        debug!("Fetched schema {} {}", schema.name(), schema.version());
        self.schemas.insert(database.to_string(), schema.clone());
        Ok(schema)
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Watches the current connection and replaces it when it drops.
async fn supervise(
    inner: Weak<Inner>,
    mut connection: Arc<Connection>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = connection.closed() => {}
            _ = shutdown_requested(&mut shutdown) => {
                connection.close().await;
                return;
            }
        }

        let Some(client) = inner.upgrade() else {
            return;
        };
        client.current.send_replace(None);
        let endpoint = client.config.endpoint.clone();
        let backoff = client.config.reconnect_backoff;
        drop(client);
        warn!("Connection to {} lost, reconnecting", endpoint);

        connection = loop {
            if *shutdown.borrow() {
                return;
            }
            let Some(client) = inner.upgrade() else {
                return;
            };
            match client.open_session().await {
                Ok(connection) => {
                    client.current.send_replace(Some(connection.clone()));
                    info!("Reconnected to {}", endpoint);
                    break connection;
                }
                Err(e) => {
                    drop(client);
                    warn!("Reconnect to {} failed: {}", endpoint, e);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown_requested(&mut shutdown) => return,
                    }
                }
            }
        };
    }
}

/// Probes the server with `echo` and closes the connection if it stalls.
async fn keep_alive(connection: Arc<Connection>, interval: Duration, timeout: Duration) {
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            _ = connection.closed() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        seq += 1;
        let probe = json!(format!("keepalive-{}", seq));
        match connection
            .call_with_timeout("echo", vec![probe.clone()], timeout)
            .await
        {
            Ok(reply) if reply == json!([probe]) => trace!("Keep-alive {} answered", seq),
            Ok(reply) => {
                warn!("Keep-alive echo returned {}, closing connection", reply);
                connection.close().await;
                return;
            }
            Err(ClientError::NotConnected) | Err(ClientError::ConnectionClosed) => return,
            Err(e) => {
                warn!("Keep-alive failed: {}, closing connection", e);
                connection.close().await;
                return;
            }
        }
    }
}
