//! Monitor subscription lifecycle.
//!
//! Every live subscription has a record keyed by its name. The record is
//! registered before the establishing call is sent, so notifications that
//! race the reply find it and are held back until the reply's batch has
//! been delivered. After any awaited call the record is looked up again;
//! it may have been canceled or replaced in the meantime.

use crate::connection::RpcTransport;
use crate::error::ClientError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ovsdb_core::{DbSchema, Generation, MonitorRequests, Replica, Updates};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Default capacity of a subscription sink.
pub const DEFAULT_SINK_CAPACITY: usize = 10;

/// Transaction marker meaning "no transaction seen yet".
pub const ZERO_TXN_ID: &str = "00000000-0000-0000-0000-000000000000";

/// One change batch pushed to a subscription sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub subscription: String,
    /// Transaction marker carried by `update3`.
    pub txn_id: Option<String>,
    pub updates: Updates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Establishing,
    Active,
    Reestablishing,
    Failed,
}

struct Record {
    /// Distinguishes this record from later ones under the same name.
    id: u64,
    requests: MonitorRequests,
    /// Requests used when resuming with `monitor_cond_since`.
    renewal: MonitorRequests,
    last_txn_id: Option<String>,
    sink: mpsc::Sender<Delivery>,
    replica: Option<Arc<Replica>>,
    state: SubscriptionState,
    held: Vec<Delivery>,
}

impl Record {
    fn database(&self) -> &str {
        self.requests.schema().name()
    }

    /// Moves the requests and replica onto a newer schema of the database.
    fn rebind(&mut self, schema: &Arc<DbSchema>) -> Result<(), ClientError> {
        if **self.requests.schema() == **schema {
            return Ok(());
        }
        let requests = self.requests.with_schema(schema.clone())?;
        if let Some(replica) = &self.replica {
            replica.rebind(schema.clone())?;
        }
        self.renewal = requests.without_initial();
        self.requests = requests;
        debug!(
            "Rebound subscription to schema {} {}",
            schema.name(),
            schema.version()
        );
        Ok(())
    }

    /// Merges a batch into the replica and pushes it to the sink.
    fn forward(&mut self, delivery: Delivery) {
        if let Some(txn_id) = &delivery.txn_id {
            self.last_txn_id = Some(txn_id.clone());
        }
        if let Some(replica) = &self.replica {
            if let Err(e) = replica.apply(&delivery.updates) {
                warn!(
                    "Failed to apply batch of subscription {} to replica: {}",
                    delivery.subscription, e
                );
            }
        }
        self.push(delivery);
    }

    fn push(&self, delivery: Delivery) {
        let name = delivery.subscription.clone();
        match self.sink.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Sink of subscription {} is full, dropping batch", name)
            }
            Err(TrySendError::Closed(_)) => debug!("Sink of subscription {} is closed", name),
        }
    }

    fn release_held(&mut self) {
        for delivery in std::mem::take(&mut self.held) {
            self.forward(delivery);
        }
    }
}

/// Decoded reply of an establishing call.
struct Reply {
    found: bool,
    txn_id: Option<String>,
    updates: Updates,
}

fn establish_params(
    name: &str,
    requests: &MonitorRequests,
    last_txn_id: Option<&str>,
) -> Vec<Value> {
    let mut params = vec![
        json!(requests.schema().name()),
        json!(name),
        requests.to_json(),
    ];
    if requests.generation() == Generation::ConditionalSince {
        params.push(json!(last_txn_id.unwrap_or(ZERO_TXN_ID)));
    }
    params
}

fn decode_reply(requests: &MonitorRequests, result: &Value) -> Result<Reply, ClientError> {
    let schema = requests.schema();
    match requests.generation() {
        Generation::Plain => Ok(Reply {
            found: false,
            txn_id: None,
            updates: Updates::decode_update(schema, result)?,
        }),
        Generation::Conditional => Ok(Reply {
            found: false,
            txn_id: None,
            updates: Updates::decode_update2(schema, result)?,
        }),
        Generation::ConditionalSince => {
            let unexpected =
                || ClientError::UnexpectedResponse(format!("monitor_cond_since reply {}", result));
            let parts = result.as_array().filter(|a| a.len() == 3).ok_or_else(unexpected)?;
            let found = parts[0].as_bool().ok_or_else(unexpected)?;
            let txn_id = parts[1].as_str().ok_or_else(unexpected)?.to_string();
            Ok(Reply {
                found,
                txn_id: Some(txn_id),
                updates: Updates::decode_update2(schema, &parts[2])?,
            })
        }
    }
}

/// Registry of live subscriptions.
pub struct SubscriptionManager {
    records: DashMap<String, Record>,
    sink_capacity: usize,
    next_id: AtomicU64,
    /// Bumped at the start of every re-establish pass.
    sessions: AtomicU64,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SINK_CAPACITY)
    }
}

impl SubscriptionManager {
    pub fn new(sink_capacity: usize) -> Self {
        Self {
            records: DashMap::new(),
            sink_capacity: sink_capacity.max(1),
            next_id: AtomicU64::new(1),
            sessions: AtomicU64::new(0),
        }
    }

    /// Establishes subscription `name` and returns its initial batch and
    /// the receiving end of its sink.
    ///
    /// Requests are validated before anything is sent. When `replica` is
    /// given, every batch is merged into it before it reaches the sink.
    ///
    /// A reply that arrives after the client moved to a new connection is
    /// discarded: the subscription it set up is gone with the old session.
    pub async fn establish<T: RpcTransport>(
        &self,
        transport: &T,
        name: &str,
        requests: MonitorRequests,
        replica: Option<Arc<Replica>>,
    ) -> Result<(Updates, mpsc::Receiver<Delivery>), ClientError> {
        requests.validate()?;

        let (sink, receiver) = mpsc::channel(self.sink_capacity);
        let renewal = requests.without_initial();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = self.sessions.load(Ordering::Acquire);
        match self.records.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(ClientError::SubscriptionExists(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Record {
                    id,
                    requests: requests.clone(),
                    renewal,
                    last_txn_id: None,
                    sink,
                    replica,
                    state: SubscriptionState::Establishing,
                    held: Vec::new(),
                });
            }
        }

        let method = requests.generation().method();
        info!(
            "Establishing subscription {} on {} ({})",
            name,
            requests.schema().name(),
            method
        );
        let params = establish_params(name, &requests, None);
        let reply = match transport.call(method, params).await {
            Ok(result) => decode_reply(&requests, &result),
            Err(e) => Err(e),
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to establish subscription {}: {}", name, e);
                self.remove_record(name, id);
                return Err(e);
            }
        };

        let Some(mut record) = self.records.get_mut(name).filter(|r| r.id == id) else {
            debug!("Subscription {} was canceled while establishing", name);
            return Err(ClientError::Canceled);
        };
        if self.sessions.load(Ordering::Acquire) != session {
            drop(record);
            warn!("Connection changed while establishing subscription {}", name);
            self.remove_record(name, id);
            return Err(ClientError::ConnectionClosed);
        }
        let applied = match &record.replica {
            Some(replica) => replica.apply(&reply.updates).map(|_| ()),
            None => Ok(()),
        };
        if let Err(e) = applied {
            drop(record);
            self.remove_record(name, id);
            return Err(e.into());
        }
        if reply.txn_id.is_some() {
            record.last_txn_id = reply.txn_id;
        }
        record.state = SubscriptionState::Active;
        record.release_held();
        debug!(
            "Subscription {} active with {} initial rows",
            name,
            reply.updates.row_count()
        );

        Ok((reply.updates, receiver))
    }

    /// Routes an `update`, `update2` or `update3` notification to its
    /// subscription.
    ///
    /// Runs on the connection's broker task and never blocks. Notifications
    /// for unknown subscriptions or with undecodable payloads are dropped.
    pub fn deliver(&self, method: &str, params: Vec<Value>) {
        let mut params = params.into_iter();
        let name = match params.next() {
            Some(Value::String(name)) => name,
            other => {
                warn!("Dropping {} with invalid subscription name {:?}", method, other);
                return;
            }
        };
        let Some(mut record) = self.records.get_mut(&name) else {
            warn!("Dropping {} for unknown subscription {}", method, name);
            return;
        };

        let schema = record.requests.schema().clone();
        let decoded = match (method, params.next(), params.next()) {
            ("update", Some(updates), _) => {
                Updates::decode_update(&schema, &updates).map(|updates| (None, updates))
            }
            ("update2", Some(updates), _) => {
                Updates::decode_update2(&schema, &updates).map(|updates| (None, updates))
            }
            ("update3", Some(Value::String(txn_id)), Some(updates)) => {
                Updates::decode_update2(&schema, &updates).map(|updates| (Some(txn_id), updates))
            }
            _ => {
                warn!("Dropping malformed {} for subscription {}", method, name);
                return;
            }
        };
        let (txn_id, updates) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping {} for subscription {}: {}", method, name, e);
                return;
            }
        };

        let delivery = Delivery {
            subscription: name,
            txn_id,
            updates,
        };
        match record.state {
            SubscriptionState::Active => record.forward(delivery),
            _ => record.held.push(delivery),
        }
    }

    /// Removes record `name` only if it is still the one with `id`.
    fn remove_record(&self, name: &str, id: u64) {
        self.records.remove_if(name, |_, record| record.id == id);
    }

    /// Re-establishes every subscription on a fresh connection.
    ///
    /// `schemas` returns the schema the new server serves for a database;
    /// subscriptions and replicas are rebound to it before resending.
    /// `monitor_cond_since` subscriptions resume from their last marker with
    /// initial contents suppressed. The other generations resend their
    /// original request and replace the replica with the new snapshot.
    /// Subscriptions still waiting for their first reply are skipped; that
    /// reply belongs to the old connection.
    ///
    /// A transport failure aborts the pass. Any other failure marks the
    /// subscription failed and, once every subscription has been tried, the
    /// first such error is returned so the caller retries the whole pass.
    pub async fn reestablish_all<T, F>(&self, transport: &T, schemas: F) -> Result<(), ClientError>
    where
        T: RpcTransport,
        F: Fn(&str) -> Option<Arc<DbSchema>>,
    {
        self.sessions.fetch_add(1, Ordering::AcqRel);
        let names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        let mut failure = None;
        for name in names {
            match self.reestablish(transport, &name, &schemas).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Failed to re-establish subscription {}: {}", name, e);
                    if let Some(mut record) = self.records.get_mut(&name) {
                        record.state = SubscriptionState::Failed;
                    }
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn reestablish<T, F>(&self, transport: &T, name: &str, schemas: &F) -> Result<(), ClientError>
    where
        T: RpcTransport,
        F: Fn(&str) -> Option<Arc<DbSchema>>,
    {
        let (id, requests, params) = {
            let Some(mut record) = self.records.get_mut(name) else {
                return Ok(());
            };
            if record.state == SubscriptionState::Establishing {
                debug!("Subscription {} is still establishing, skipping", name);
                return Ok(());
            }
            record.state = SubscriptionState::Reestablishing;
            record.held.clear();
            if let Some(schema) = schemas(record.database()) {
                record.rebind(&schema)?;
            }
            let requests = match record.requests.generation() {
                Generation::ConditionalSince => record.renewal.clone(),
                _ => record.requests.clone(),
            };
            let params = establish_params(name, &requests, record.last_txn_id.as_deref());
            debug!(
                "Re-establishing subscription {} on {} from {}",
                name,
                record.database(),
                record.last_txn_id.as_deref().unwrap_or(ZERO_TXN_ID)
            );
            (record.id, requests, params)
        };

        let result = transport.call(requests.generation().method(), params).await?;
        let reply = decode_reply(&requests, &result)?;

        let Some(mut record) = self.records.get_mut(name).filter(|r| r.id == id) else {
            debug!("Subscription {} was canceled while re-establishing", name);
            return Ok(());
        };
        let delivery = Delivery {
            subscription: name.to_string(),
            txn_id: reply.txn_id.clone(),
            updates: reply.updates,
        };
        match requests.generation() {
            Generation::ConditionalSince => {
                if reply.found && delivery.updates.is_empty() {
                    debug!("Subscription {} is up to date", name);
                } else {
                    record.forward(delivery);
                }
                if let Some(txn_id) = reply.txn_id {
                    record.last_txn_id = Some(txn_id);
                }
            }
            Generation::Plain | Generation::Conditional => {
                if let Some(replica) = &record.replica {
                    replica.replace(&delivery.updates)?;
                }
                record.push(delivery);
            }
        }
        record.state = SubscriptionState::Active;
        record.release_held();
        info!("Re-established subscription {}", name);
        Ok(())
    }

    /// Cancels subscription `name`.
    ///
    /// The record is removed and its sink closed even when the server
    /// reports an error, which is still returned.
    pub async fn cancel<T: RpcTransport>(&self, transport: &T, name: &str) -> Result<(), ClientError> {
        if !self.records.contains_key(name) {
            return Err(ClientError::UnknownSubscription(name.to_string()));
        }
        let result = transport.call("monitor_cancel", vec![json!(name)]).await;
        self.records.remove(name);
        info!("Canceled subscription {}", name);
        result.map(|_| ())
    }

    /// Drops subscription `name` locally without telling the server.
    ///
    /// Returns false if there was no such subscription.
    pub fn forget(&self, name: &str) -> bool {
        let removed = self.records.remove(name).is_some();
        if removed {
            info!("Forgot subscription {}", name);
        }
        removed
    }

    /// Drops every record, closing all sinks.
    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn state(&self, name: &str) -> Option<SubscriptionState> {
        self.records.get(name).map(|r| r.state)
    }

    /// Last transaction marker seen by subscription `name`.
    pub fn last_txn_id(&self, name: &str) -> Option<String> {
        self.records.get(name).and_then(|r| r.last_txn_id.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
