//! In-memory replica of a remote database.
//!
//! Batches are applied under an exclusive lock and either apply completely
//! or not at all. After each batch the revision counter is bumped and every
//! subscriber is sent the new revision without blocking.

use crate::condition::Condition;
use crate::error::CoreError;
use crate::row::Row;
use crate::schema::{DbSchema, TableSchema, UUID_COLUMN};
use crate::update::{RowUpdate2, Updates};
use crate::value::{Reference, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of each revision subscriber.
pub const SUBSCRIBER_CAPACITY: usize = 10;

/// Rows of one table, keyed by row id.
#[derive(Debug, Clone)]
struct Table {
    schema: Arc<TableSchema>,
    rows: BTreeMap<String, Row>,
}

impl Table {
    fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }
}

/// A staged row write: the table, the row id and the new row or a removal.
type Staged<'a> = (&'a Arc<TableSchema>, &'a str, Option<Row>);

/// Local mirror of one database.
pub struct Replica {
    name: String,
    schema: RwLock<Arc<DbSchema>>,
    tables: RwLock<BTreeMap<String, Table>>,
    revision: AtomicU64,
    subscribers: Mutex<Vec<mpsc::Sender<u64>>>,
}

impl Replica {
    pub fn new(schema: Arc<DbSchema>) -> Self {
        Self {
            name: schema.name().to_string(),
            schema: RwLock::new(schema),
            tables: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Arc<DbSchema> {
        self.schema.read().clone()
    }

    /// Moves the replica onto a newer schema of the same database.
    ///
    /// Rows of tables the new schema lacks are dropped, as are stored values
    /// whose column is gone or no longer type-checks. The revision is not
    /// bumped.
    pub fn rebind(&self, schema: Arc<DbSchema>) -> Result<(), CoreError> {
        if schema.name() != self.name {
            return Err(CoreError::InvalidSchema {
                reason: format!(
                    "cannot rebind replica of {} to schema {}",
                    self.name,
                    schema.name()
                ),
            });
        }
        let mut tables = self.tables.write();
        let mut current = self.schema.write();
        if **current == *schema {
            return Ok(());
        }

        let mut rebound = BTreeMap::new();
        for (name, table) in std::mem::take(&mut *tables) {
            let Some(table_schema) = schema.get_table(&name) else {
                warn!("Table {} left schema {}, dropping its rows", name, self.name);
                continue;
            };
            let mut next = Table::new(table_schema.clone());
            for (uuid, row) in table.rows {
                next.rows.insert(uuid, row.rebind(table_schema.clone()));
            }
            rebound.insert(name, next);
        }
        *tables = rebound;
        *current = schema;
        debug!("Replica {} rebound to schema {}", self.name, current.version());
        Ok(())
    }

    /// Number of batches applied so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Applies one batch and returns the new revision.
    ///
    /// A `modify` for a row that is not present fails the whole batch.
    pub fn apply(&self, updates: &Updates) -> Result<u64, CoreError> {
        let mut tables = self.tables.write();
        self.apply_locked(&mut tables, updates)?;
        // notify before unlocking so revisions reach subscribers in order
        Ok(self.bump(updates.row_count()))
    }

    /// Drops every row, then applies `updates` as the new contents.
    ///
    /// Used when a subscription is re-established with a fresh snapshot, so
    /// rows deleted while disconnected do not linger.
    pub fn replace(&self, updates: &Updates) -> Result<u64, CoreError> {
        let mut tables = self.tables.write();
        let mut fresh = BTreeMap::new();
        self.apply_locked(&mut fresh, updates)?;
        *tables = fresh;
        Ok(self.bump(updates.row_count()))
    }

    fn apply_locked(
        &self,
        tables: &mut BTreeMap<String, Table>,
        updates: &Updates,
    ) -> Result<(), CoreError> {
        let db = self.schema.read().clone();
        let mut staged: Vec<Staged<'_>> = Vec::new();

        match updates {
            Updates::Update2(batch) => {
                for (table_name, rows) in batch {
                    let schema = db.table(table_name)?;
                    let existing = tables.get(table_name);
                    for (uuid, change) in rows {
                        let next = match change {
                            RowUpdate2::Initial(row) | RowUpdate2::Insert(row) => {
                                Some(with_uuid(row.clone(), uuid))
                            }
                            RowUpdate2::Delete => None,
                            RowUpdate2::Modify(delta) => {
                                let mut current = existing
                                    .and_then(|t| t.rows.get(uuid))
                                    .cloned()
                                    .ok_or_else(|| CoreError::RowNotFound {
                                        table: table_name.clone(),
                                        row: uuid.clone(),
                                    })?;
                                current.apply_delta(delta)?;
                                Some(current)
                            }
                        };
                        staged.push((schema, uuid.as_str(), next));
                    }
                }
            }
            Updates::Update(batch) => {
                for (table_name, rows) in batch {
                    let schema = db.table(table_name)?;
                    let existing = tables.get(table_name);
                    for (uuid, change) in rows {
                        let next = match &change.new {
                            Some(new) => match existing.and_then(|t| t.rows.get(uuid)) {
                                Some(current) => {
                                    let mut current = current.clone();
                                    current.overwrite(new)?;
                                    Some(current)
                                }
                                None => Some(with_uuid(new.clone(), uuid)),
                            },
                            None => None,
                        };
                        staged.push((schema, uuid.as_str(), next));
                    }
                }
            }
        }

        for (schema, uuid, next) in staged {
            let table = tables
                .entry(schema.name().to_string())
                .or_insert_with(|| Table::new(schema.clone()));
            match next {
                Some(row) => {
                    table.rows.insert(uuid.to_string(), row);
                }
                None => {
                    table.rows.remove(uuid);
                }
            }
        }
        Ok(())
    }

    fn bump(&self, changes: usize) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            "Replica {} applied {} row changes, revision {}",
            self.name, changes, revision
        );
        self.notify(revision);
        revision
    }

    fn notify(&self, revision: u64) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(revision) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Revision subscriber of {} is full, dropping revision {}",
                    self.name, revision
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Registers a revision subscriber. Dropping the receiver unregisters it
    /// on the next batch.
    pub fn subscribe(&self) -> mpsc::Receiver<u64> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns a copy of a row.
    pub fn row(&self, table: &str, uuid: &str) -> Option<Row> {
        self.tables.read().get(table)?.rows.get(uuid).cloned()
    }

    /// Returns one column of a row, or its default if not stored.
    pub fn get(&self, table: &str, uuid: &str, column: &str) -> Option<Value> {
        let tables = self.tables.read();
        let row = tables.get(table)?.rows.get(uuid)?;
        row.value(column).ok().map(|v| v.into_owned())
    }

    /// Ids of the rows matching every condition. Unknown tables have none.
    pub fn find_rows(&self, table: &str, conditions: &[Condition]) -> Vec<String> {
        let tables = self.tables.read();
        match tables.get(table) {
            Some(t) => t
                .rows
                .iter()
                .filter(|(_, row)| row.matches(conditions))
                .map(|(uuid, _)| uuid.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Copies of every row of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn table_len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    /// Names of the tables holding at least one row.
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .iter()
            .filter(|(_, t)| !t.rows.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.tables.read().values().map(|t| t.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until `predicate` holds, re-checking after every batch.
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> bool
    where
        F: Fn(&Replica) -> bool,
    {
        let mut revisions = self.subscribe();
        if predicate(self) {
            return true;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, revisions.recv()).await {
                Ok(Some(_)) => {
                    if predicate(self) {
                        return true;
                    }
                }
                Ok(None) | Err(_) => return predicate(self),
            }
        }
    }

    /// Waits until some row of `table` has an integer `column` of at least
    /// `threshold`, e.g. `Open_vSwitch.cur_cfg` catching up with a
    /// `next_cfg` bump.
    pub async fn await_revision(
        &self,
        table: &str,
        column: &str,
        threshold: i64,
        timeout: Duration,
    ) -> bool {
        let condition = [Condition::greater_equal(column, threshold)];
        self.wait_for(|r| !r.find_rows(table, &condition).is_empty(), timeout)
            .await
    }

    /// Drops every row without notifying.
    pub fn clear(&self) {
        self.tables.write().clear();
    }

    /// Tables known to the schema but not yet populated are reported empty.
    pub fn table_schema(&self, table: &str) -> Option<Arc<TableSchema>> {
        let tables = self.tables.read();
        match tables.get(table) {
            Some(t) => Some(t.schema.clone()),
            None => self.schema.read().get_table(table).cloned(),
        }
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("name", &self.name)
            .field("revision", &self.revision())
            .field("rows", &self.len())
            .finish()
    }
}

fn with_uuid(mut row: Row, uuid: &str) -> Row {
    row.store(UUID_COLUMN, Value::from(Reference::uuid(uuid)));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ovs_schema, upgraded_ovs_schema};
    use crate::value::{Map, Set};
    use serde_json::json;

    fn decode2(schema: &DbSchema, json: serde_json::Value) -> Updates {
        Updates::decode_update2(schema, &json).unwrap()
    }

    fn populated() -> Replica {
        let replica = Replica::new(ovs_schema());
        let batch = decode2(
            &replica.schema(),
            json!({
                "Bridge": {
                    "b1": {"initial": {"name": "br0", "ports": ["set", [["uuid", "uuid-123"], ["uuid", "uuid-456"]]],
                                       "other_config": ["map", [["foo", "1"], ["bar", "2"]]]}}
                },
                "Port": {
                    "p1": {"initial": {"name": "eth0", "tag": 65}},
                    "p2": {"initial": {"name": "eth1"}}
                }
            }),
        );
        replica.apply(&batch).unwrap();
        replica
    }

    #[test]
    fn test_apply_initial() {
        let replica = populated();
        assert_eq!(replica.revision(), 1);
        assert_eq!(replica.len(), 3);
        assert_eq!(replica.table_names(), vec!["Bridge", "Port"]);

        let row = replica.row("Port", "p1").unwrap();
        assert_eq!(row.uuid(), Some(&Reference::uuid("p1")));
        assert_eq!(
            replica.get("Port", "p2", "tag"),
            Some(Value::Set(Set::new()))
        );
    }

    #[test]
    fn test_apply_modify_merges() {
        let replica = populated();
        let batch = decode2(
            &replica.schema(),
            json!({
                "Bridge": {
                    "b1": {"modify": {"ports": ["set", [["uuid", "uuid-456"], ["uuid", "uuid-789"]]],
                                      "other_config": ["map", [["foo", "1"], ["bar", "4"], ["qux", "5"]]]}}
                }
            }),
        );
        assert_eq!(replica.apply(&batch).unwrap(), 2);

        let ports = Set::from_iter([Reference::uuid("uuid-123"), Reference::uuid("uuid-789")]);
        assert_eq!(replica.get("Bridge", "b1", "ports"), Some(Value::Set(ports)));
        let config = Map::from_iter([("bar", "4"), ("qux", "5")]);
        assert_eq!(
            replica.get("Bridge", "b1", "other_config"),
            Some(Value::Map(config))
        );
        assert_eq!(replica.get("Bridge", "b1", "name"), Some(Value::from("br0")));
    }

    #[test]
    fn test_apply_insert_delete() {
        let replica = populated();
        let batch = decode2(
            &replica.schema(),
            json!({"Port": {"p3": {"insert": {"name": "eth2"}}, "p2": {"delete": null}}}),
        );
        replica.apply(&batch).unwrap();
        assert!(replica.row("Port", "p2").is_none());
        assert!(replica.row("Port", "p3").is_some());
        assert_eq!(replica.table_len("Port"), 2);
    }

    #[test]
    fn test_modify_missing_row_is_atomic() {
        let replica = populated();
        let batch = decode2(
            &replica.schema(),
            json!({"Port": {"p1": {"delete": null}, "p9": {"modify": {"name": "x"}}}}),
        );
        assert!(matches!(
            replica.apply(&batch),
            Err(CoreError::RowNotFound { .. })
        ));
        assert!(replica.row("Port", "p1").is_some());
        assert_eq!(replica.revision(), 1);
    }

    #[test]
    fn test_apply_v1_updates() {
        let replica = Replica::new(ovs_schema());
        let insert = Updates::decode_update(
            &replica.schema(),
            &json!({"Bridge": {"b1": {"new": {"name": "br0", "datapath_type": "system"}}}}),
        )
        .unwrap();
        replica.apply(&insert).unwrap();

        let modify = Updates::decode_update(
            &replica.schema(),
            &json!({"Bridge": {"b1": {"old": {"datapath_type": "system"}, "new": {"datapath_type": "netdev"}}}}),
        )
        .unwrap();
        replica.apply(&modify).unwrap();
        assert_eq!(
            replica.get("Bridge", "b1", "datapath_type"),
            Some(Value::from("netdev"))
        );
        assert_eq!(replica.get("Bridge", "b1", "name"), Some(Value::from("br0")));

        let delete = Updates::decode_update(
            &replica.schema(),
            &json!({"Bridge": {"b1": {"old": {"name": "br0"}}}}),
        )
        .unwrap();
        replica.apply(&delete).unwrap();
        assert!(replica.is_empty());
    }

    #[test]
    fn test_replace_drops_stale_rows() {
        let replica = populated();
        let snapshot = decode2(
            &replica.schema(),
            json!({"Port": {"p1": {"initial": {"name": "eth0"}}}}),
        );
        replica.replace(&snapshot).unwrap();
        assert_eq!(replica.len(), 1);
        assert!(replica.row("Bridge", "b1").is_none());
    }

    #[test]
    fn test_find_rows() {
        let replica = populated();
        assert_eq!(
            replica.find_rows("Port", &[Condition::equal("tag", 65i64)]),
            vec!["p1".to_string()]
        );
        assert_eq!(replica.find_rows("Port", &[]).len(), 2);
        assert!(replica.find_rows("Nope", &[]).is_empty());
        assert!(replica
            .find_rows("Port", &[Condition::equal("nope", 1i64)])
            .is_empty());
    }

    #[test]
    fn test_subscribers_notified_and_pruned() {
        let replica = populated();
        let mut rx = replica.subscribe();
        let dropped = replica.subscribe();
        drop(dropped);
        assert_eq!(replica.subscriber_count(), 2);

        let batch = decode2(&replica.schema(), json!({"Port": {"p2": {"delete": null}}}));
        replica.apply(&batch).unwrap();
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(replica.subscriber_count(), 1);
    }

    #[test]
    fn test_rebind_to_upgraded_schema() {
        let replica = populated();
        let revision = replica.revision();
        replica.rebind(upgraded_ovs_schema()).unwrap();
        assert_eq!(replica.revision(), revision);
        assert_eq!(replica.schema().version(), "8.4.0");
        assert_eq!(replica.len(), 3);
        assert_eq!(replica.get("Port", "p1", "tag"), Some(Value::Set(Set::from_iter([65i64]))));

        // a column only the new schema knows
        let batch = decode2(
            &replica.schema(),
            json!({"Port": {"p1": {"modify": {"external_ids": ["map", [["owner", "ci"]]]}}}}),
        );
        replica.apply(&batch).unwrap();
        assert_eq!(
            replica.get("Port", "p1", "external_ids"),
            Some(Value::Map(Map::from_iter([("owner", "ci")])))
        );
        assert!(replica.table_schema("NetFlow").is_none());
    }

    #[test]
    fn test_rebind_rejects_other_database() {
        let replica = populated();
        let mut json: serde_json::Value = serde_json::from_str(crate::testing::OVS_SCHEMA).unwrap();
        json["name"] = json!("OVN_Northbound");
        let other = Arc::new(DbSchema::from_json(json).unwrap());
        assert!(replica.rebind(other).is_err());
        assert_eq!(replica.schema().name(), "Open_vSwitch");
    }

    #[test]
    fn test_concurrent_applies_notify_in_order() {
        let replica = Arc::new(Replica::new(ovs_schema()));
        let mut rx = replica.subscribe();
        let writers: Vec<_> = (0..2)
            .map(|_| {
                let replica = replica.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        replica.apply(&Updates::empty_update2()).unwrap();
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while writers.iter().any(|w| !w.is_finished()) {
            while let Ok(revision) = rx.try_recv() {
                seen.push(revision);
            }
            std::thread::yield_now();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        while let Ok(revision) = rx.try_recv() {
            seen.push(revision);
        }

        assert_eq!(replica.revision(), 400);
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", seen);
    }

    #[test]
    fn test_full_subscriber_drops() {
        let replica = Replica::new(ovs_schema());
        let mut rx = replica.subscribe();
        let empty = Updates::empty_update2();
        for _ in 0..SUBSCRIBER_CAPACITY + 5 {
            replica.apply(&empty).unwrap();
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CAPACITY);
        assert_eq!(replica.revision(), (SUBSCRIBER_CAPACITY + 5) as u64);
    }

    #[tokio::test]
    async fn test_await_revision() {
        let replica = Arc::new(Replica::new(ovs_schema()));
        let initial = decode2(
            &replica.schema(),
            json!({"Open_vSwitch": {"o1": {"initial": {"cur_cfg": 1, "next_cfg": 2}}}}),
        );
        replica.apply(&initial).unwrap();

        assert!(
            !replica
                .await_revision("Open_vSwitch", "cur_cfg", 2, Duration::from_millis(20))
                .await
        );

        let writer = replica.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let bump = decode2(
                &writer.schema(),
                json!({"Open_vSwitch": {"o1": {"modify": {"cur_cfg": 2}}}}),
            );
            writer.apply(&bump).unwrap();
        });

        assert!(
            replica
                .await_revision("Open_vSwitch", "cur_cfg", 2, Duration::from_secs(5))
                .await
        );
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_immediate() {
        let replica = populated();
        assert!(
            replica
                .wait_for(|r| r.table_len("Port") == 2, Duration::from_millis(1))
                .await
        );
    }
}
