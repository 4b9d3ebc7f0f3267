//! Transaction builder for the `transact` method.
//!
//! Operations are collected with chained calls and checked against the
//! schema in [`Transaction::build`], so a bad operation never reaches the
//! server.

use crate::condition::{Condition, Mutation};
use crate::error::CoreError;
use crate::row::Row;
use crate::schema::{DbSchema, TableSchema, UUID_COLUMN, VERSION_COLUMN};
use crate::value::Reference;
use serde::Deserialize;
use serde_json::{json, Map as JsonMap, Value as Json};
use std::sync::Arc;

/// Comparison a `wait` operation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Equal,
    NotEqual,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Equal => "==",
            WaitUntil::NotEqual => "!=",
        }
    }
}

/// A single transaction operation.
#[derive(Debug, Clone)]
pub enum Operation {
    Insert {
        row: Row,
        uuid_name: Option<String>,
    },
    Select {
        table: String,
        where_: Vec<Condition>,
        columns: Option<Vec<String>>,
    },
    Update {
        where_: Vec<Condition>,
        row: Row,
    },
    Mutate {
        table: String,
        where_: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    Delete {
        table: String,
        where_: Vec<Condition>,
    },
    Wait {
        table: String,
        timeout_ms: Option<u64>,
        where_: Vec<Condition>,
        columns: Vec<String>,
        until: WaitUntil,
        rows: Vec<Row>,
    },
    Commit {
        durable: bool,
    },
    Abort,
    Comment(String),
    Assert {
        lock: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Select { .. } => "select",
            Operation::Update { .. } => "update",
            Operation::Mutate { .. } => "mutate",
            Operation::Delete { .. } => "delete",
            Operation::Wait { .. } => "wait",
            Operation::Commit { .. } => "commit",
            Operation::Abort => "abort",
            Operation::Comment(_) => "comment",
            Operation::Assert { .. } => "assert",
        }
    }

    /// Table the operation works on, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::Insert { row, .. } | Operation::Update { row, .. } => Some(row.table_name()),
            Operation::Select { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Wait { table, .. } => Some(table.as_str()),
            _ => None,
        }
    }

    fn validate(&self, schema: &DbSchema) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidOperation {
            reason: format!("{}: {}", self.name(), reason),
        };

        match self {
            Operation::Insert { row, uuid_name } => {
                check_row_table(schema, row)?;
                if row.contains(UUID_COLUMN) || row.contains(VERSION_COLUMN) {
                    return Err(invalid("row may not set _uuid or _version".to_string()));
                }
                if let Some(name) = uuid_name {
                    check_id(name).map_err(invalid)?;
                }
                Ok(())
            }
            Operation::Select {
                table,
                where_,
                columns,
            } => {
                let table = schema.table(table)?;
                check_conditions(table, where_)?;
                check_columns(table, columns.iter().flatten())
            }
            Operation::Update { where_, row } => {
                let table = check_row_table(schema, row)?;
                check_conditions(table, where_)?;
                for (column, _) in row.columns() {
                    if column == VERSION_COLUMN || !table.column(column)?.is_mutable() {
                        return Err(invalid(format!("column {} cannot be updated", column)));
                    }
                }
                Ok(())
            }
            Operation::Mutate {
                table,
                where_,
                mutations,
            } => {
                let table = schema.table(table)?;
                check_conditions(table, where_)?;
                if mutations.is_empty() {
                    return Err(invalid("no mutations".to_string()));
                }
                mutations.iter().try_for_each(|m| m.validate(table))
            }
            Operation::Delete { table, where_ } => {
                let table = schema.table(table)?;
                check_conditions(table, where_)
            }
            Operation::Wait {
                table,
                where_,
                columns,
                rows,
                ..
            } => {
                let table_schema = schema.table(table)?;
                check_conditions(table_schema, where_)?;
                check_columns(table_schema, columns.iter())?;
                for row in rows {
                    if row.table_name() != table.as_str() {
                        return Err(invalid(format!(
                            "row of {} in a wait on {}",
                            row.table_name(),
                            table
                        )));
                    }
                    for (column, _) in row.columns() {
                        if !columns.iter().any(|c| c == column) {
                            return Err(invalid(format!(
                                "row column {} is not among the waited columns",
                                column
                            )));
                        }
                    }
                }
                Ok(())
            }
            Operation::Assert { lock } => check_id(lock).map_err(invalid),
            Operation::Commit { .. } | Operation::Abort | Operation::Comment(_) => Ok(()),
        }
    }

    pub fn to_json(&self) -> Json {
        let mut op = JsonMap::new();
        op.insert("op".to_string(), json!(self.name()));
        if let Some(table) = self.table() {
            op.insert("table".to_string(), json!(table));
        }

        match self {
            Operation::Insert { row, uuid_name } => {
                op.insert("row".to_string(), row.to_json());
                if let Some(name) = uuid_name {
                    op.insert("uuid-name".to_string(), json!(name));
                }
            }
            Operation::Select { where_, columns, .. } => {
                op.insert("where".to_string(), conditions_json(where_));
                if let Some(columns) = columns {
                    op.insert("columns".to_string(), json!(columns));
                }
            }
            Operation::Update { where_, row } => {
                op.insert("where".to_string(), conditions_json(where_));
                op.insert("row".to_string(), row.to_json());
            }
            Operation::Mutate {
                where_, mutations, ..
            } => {
                op.insert("where".to_string(), conditions_json(where_));
                let mutations: Vec<Json> = mutations.iter().map(Mutation::to_json).collect();
                op.insert("mutations".to_string(), Json::Array(mutations));
            }
            Operation::Delete { where_, .. } => {
                op.insert("where".to_string(), conditions_json(where_));
            }
            Operation::Wait {
                timeout_ms,
                where_,
                columns,
                until,
                rows,
                ..
            } => {
                if let Some(timeout) = timeout_ms {
                    op.insert("timeout".to_string(), json!(timeout));
                }
                op.insert("where".to_string(), conditions_json(where_));
                op.insert("columns".to_string(), json!(columns));
                op.insert("until".to_string(), json!(until.as_str()));
                let rows: Vec<Json> = rows.iter().map(Row::to_json).collect();
                op.insert("rows".to_string(), Json::Array(rows));
            }
            Operation::Commit { durable } => {
                op.insert("durable".to_string(), json!(durable));
            }
            Operation::Abort => {}
            Operation::Comment(comment) => {
                op.insert("comment".to_string(), json!(comment));
            }
            Operation::Assert { lock } => {
                op.insert("lock".to_string(), json!(lock));
            }
        }
        Json::Object(op)
    }
}

fn check_row_table<'a>(schema: &'a DbSchema, row: &Row) -> Result<&'a Arc<TableSchema>, CoreError> {
    let table = schema.table(row.table_name())?;
    if table.as_ref() != row.table().as_ref() {
        return Err(CoreError::InvalidOperation {
            reason: format!("row of {} was built against another schema", row.table_name()),
        });
    }
    Ok(table)
}

fn check_conditions(table: &TableSchema, conditions: &[Condition]) -> Result<(), CoreError> {
    conditions.iter().try_for_each(|c| c.validate(table))
}

fn check_columns<'a>(
    table: &TableSchema,
    mut columns: impl Iterator<Item = &'a String>,
) -> Result<(), CoreError> {
    columns.try_for_each(|c| table.column(c).map(|_| ()))
}

fn check_id(id: &str) -> Result<(), String> {
    let mut chars = id.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(format!("'{}' is not a valid id", id))
    }
}

fn conditions_json(conditions: &[Condition]) -> Json {
    Json::Array(conditions.iter().map(Condition::to_json).collect())
}

/// Ordered list of operations against one database.
#[derive(Debug, Clone)]
pub struct Transaction {
    schema: Arc<DbSchema>,
    operations: Vec<Operation>,
}

impl Transaction {
    pub fn new(schema: Arc<DbSchema>) -> Self {
        Self {
            schema,
            operations: Vec::new(),
        }
    }

    pub fn database(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<DbSchema> {
        &self.schema
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn push(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Inserts `row`. `uuid_name` lets later operations refer to it.
    pub fn insert(self, row: Row, uuid_name: Option<&str>) -> Self {
        self.push(Operation::Insert {
            row,
            uuid_name: uuid_name.map(str::to_string),
        })
    }

    /// Inserts `row` under a generated name and returns the reference to it.
    pub fn insert_named(self, row: Row) -> (Self, Reference) {
        let reference = Reference::generate_named();
        let txn = self.insert(row, Some(reference.id()));
        (txn, reference)
    }

    pub fn select(
        self,
        table: impl Into<String>,
        where_: Vec<Condition>,
        columns: Option<Vec<String>>,
    ) -> Self {
        self.push(Operation::Select {
            table: table.into(),
            where_,
            columns,
        })
    }

    pub fn update(self, where_: Vec<Condition>, row: Row) -> Self {
        self.push(Operation::Update { where_, row })
    }

    pub fn mutate(
        self,
        table: impl Into<String>,
        where_: Vec<Condition>,
        mutations: Vec<Mutation>,
    ) -> Self {
        self.push(Operation::Mutate {
            table: table.into(),
            where_,
            mutations,
        })
    }

    pub fn delete(self, table: impl Into<String>, where_: Vec<Condition>) -> Self {
        self.push(Operation::Delete {
            table: table.into(),
            where_,
        })
    }

    pub fn wait(
        self,
        table: impl Into<String>,
        timeout_ms: Option<u64>,
        where_: Vec<Condition>,
        columns: Vec<String>,
        until: WaitUntil,
        rows: Vec<Row>,
    ) -> Self {
        self.push(Operation::Wait {
            table: table.into(),
            timeout_ms,
            where_,
            columns,
            until,
            rows,
        })
    }

    pub fn commit(self, durable: bool) -> Self {
        self.push(Operation::Commit { durable })
    }

    pub fn abort(self) -> Self {
        self.push(Operation::Abort)
    }

    pub fn comment(self, comment: impl Into<String>) -> Self {
        self.push(Operation::Comment(comment.into()))
    }

    pub fn assert(self, lock: impl Into<String>) -> Self {
        self.push(Operation::Assert { lock: lock.into() })
    }

    /// Validates every operation and returns the `transact` params without
    /// the database name.
    pub fn build(&self) -> Result<Vec<Json>, CoreError> {
        if self.operations.is_empty() {
            return Err(CoreError::InvalidOperation {
                reason: "empty transaction".to_string(),
            });
        }
        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| {
                op.validate(&self.schema).map_err(|e| match e {
                    CoreError::InvalidOperation { reason } => CoreError::InvalidOperation {
                        reason: format!("operation #{}: {}", i, reason),
                    },
                    other => other,
                })?;
                Ok(op.to_json())
            })
            .collect()
    }

    /// Decodes a `transact` result array.
    ///
    /// Rows returned by `select` are decoded against the selected table. The
    /// server may append one extra element for a transaction-wide error.
    pub fn decode_results(&self, result: &Json) -> Result<Vec<OperationResult>, CoreError> {
        let items = result.as_array().ok_or_else(|| CoreError::InvalidOperation {
            reason: format!("transact result must be an array, got {}", result),
        })?;

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let table = match self.operations.get(i) {
                    Some(Operation::Select { table, .. }) => self.schema.get_table(table),
                    _ => None,
                };
                OperationResult::from_json(item, table)
            })
            .collect()
    }

    /// Returns the first error reported in `results`, naming the operation.
    pub fn first_error(&self, results: &[OperationResult]) -> Option<String> {
        results.iter().enumerate().find_map(|(i, r)| {
            let error = r.error.as_ref()?;
            let mut message = match self.operations.get(i) {
                Some(op) => format!("operation #{}({}): {}", i, op.name(), error),
                None => format!("transaction error: {}", error),
            };
            if let Some(details) = &r.details {
                message.push_str(&format!(" ({})", details));
            }
            Some(message)
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawResult {
    #[serde(default)]
    uuid: Option<Json>,
    #[serde(default)]
    rows: Option<Vec<Json>>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Outcome of one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationResult {
    pub uuid: Option<Reference>,
    pub rows: Vec<Row>,
    pub count: Option<u64>,
    pub error: Option<String>,
    pub details: Option<String>,
}

impl OperationResult {
    fn from_json(json: &Json, table: Option<&Arc<TableSchema>>) -> Result<Self, CoreError> {
        if json.is_null() {
            return Ok(Self::default());
        }
        let raw: RawResult = serde_json::from_value(json.clone())?;

        let uuid = raw
            .uuid
            .map(|u| Reference::from_json(&u))
            .transpose()
            .map_err(|reason| CoreError::InvalidOperation { reason })?;

        let rows = match (raw.rows, table) {
            (Some(rows), Some(table)) => rows
                .iter()
                .map(|r| Row::from_json(table.clone(), r))
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        Ok(Self {
            uuid,
            rows,
            count: raw.count,
            error: raw.error,
            details: raw.details,
        })
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
