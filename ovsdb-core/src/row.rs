//! Schema-bound rows.

use crate::condition::Condition;
use crate::error::CoreError;
use crate::schema::{TableSchema, UUID_COLUMN};
use crate::value::{Reference, Value};
use serde_json::{Map as JsonMap, Value as Json};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A row of one table.
///
/// Only stored columns are kept. Reading a column that was never stored
/// yields the column's default, and two rows compare equal when every
/// column reads the same, stored or not.
#[derive(Clone)]
pub struct Row {
    table: Arc<TableSchema>,
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(table: Arc<TableSchema>) -> Self {
        Self {
            table,
            values: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> &Arc<TableSchema> {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    /// Returns a column value, storing the default on first access.
    pub fn get(&mut self, column: &str) -> Result<&Value, CoreError> {
        let schema = self.table.column(column)?;
        Ok(self
            .values
            .entry(column.to_string())
            .or_insert_with(|| schema.default_value()))
    }

    /// Returns a column value without caching the default.
    pub fn value(&self, column: &str) -> Result<Cow<'_, Value>, CoreError> {
        let schema = self.table.column(column)?;
        Ok(match self.values.get(column) {
            Some(v) => Cow::Borrowed(v),
            None => Cow::Owned(schema.default_value()),
        })
    }

    /// Returns the stored value only.
    pub fn stored(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Validates and stores a column value.
    ///
    /// Fails on an unknown column or a value that violates the column type,
    /// cardinality or constraints. Nothing is coerced.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        let value = value.into();
        self.table.column(column)?.validate_value(&value, true)?;
        self.values.insert(column.to_string(), value);
        Ok(())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Iterates stored columns.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Row id, if `_uuid` was stored.
    pub fn uuid(&self) -> Option<&Reference> {
        self.values
            .get(UUID_COLUMN)
            .and_then(Value::as_atom)
            .and_then(|a| a.as_uuid())
    }

    /// Applies an update2 `modify` payload.
    ///
    /// 0/1 sets are replaced. Other sets toggle each delta element and maps
    /// merge key by key (see [`crate::value::Map::merge_delta`]). Atomic
    /// columns are replaced.
    pub fn apply_delta(&mut self, delta: &Row) -> Result<(), CoreError> {
        self.check_same_table(delta)?;
        for (column, diff) in &delta.values {
            let schema = self.table.column(column)?;
            schema.validate_value(diff, false)?;

            if schema.column_type().is_optional() {
                self.values.insert(column.clone(), diff.clone());
                continue;
            }

            let current = self
                .values
                .entry(column.clone())
                .or_insert_with(|| schema.default_value());
            match (current, diff) {
                (Value::Set(current), Value::Set(diff)) => current.toggle(diff),
                (Value::Map(current), Value::Map(diff)) => current.merge_delta(diff),
                (current, diff) => *current = diff.clone(),
            }
        }
        Ok(())
    }

    /// Copies this row onto another schema of the same table, keeping only
    /// stored values the new column types still accept.
    pub fn rebind(&self, table: Arc<TableSchema>) -> Row {
        let values = self
            .values
            .iter()
            .filter(|(column, value)| {
                table
                    .get_column(column)
                    .is_some_and(|c| c.validate_value(value, false).is_ok())
            })
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        Row { table, values }
    }

    /// Replaces every column present in `new`, as carried by a v1 update.
    pub fn overwrite(&mut self, new: &Row) -> Result<(), CoreError> {
        self.check_same_table(new)?;
        for (column, value) in &new.values {
            self.values.insert(column.clone(), value.clone());
        }
        Ok(())
    }

    /// Returns true when every condition is valid for this table and holds.
    pub fn matches(&self, conditions: &[Condition]) -> bool {
        conditions.iter().all(|condition| {
            condition.validate(&self.table).is_ok()
                && self
                    .value(&condition.column)
                    .map(|v| condition.check(&v))
                    .unwrap_or(false)
        })
    }

    /// Decodes a wire row object. Values are type-checked, not range-checked.
    pub fn from_json(table: Arc<TableSchema>, json: &Json) -> Result<Self, CoreError> {
        let object = json.as_object().ok_or_else(|| CoreError::Decode {
            table: table.name().to_string(),
            column: String::new(),
            reason: format!("row must be an object, got {}", json),
        })?;

        let mut values = BTreeMap::new();
        for (column, raw) in object {
            let value = table.decode_value(column, raw)?;
            values.insert(column.clone(), value);
        }
        Ok(Self { table, values })
    }

    /// Encodes the stored columns as a wire row object.
    pub fn to_json(&self) -> Json {
        let object: JsonMap<String, Json> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Json::Object(object)
    }

    pub(crate) fn store(&mut self, column: &str, value: Value) {
        self.values.insert(column.to_string(), value);
    }

    fn check_same_table(&self, other: &Row) -> Result<(), CoreError> {
        if other.table_name() != self.table_name() {
            return Err(CoreError::InvalidOperation {
                reason: format!(
                    "cannot apply a {} row to a {} row",
                    other.table_name(),
                    self.table_name()
                ),
            });
        }
        Ok(())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.table_name() == other.table_name()
            && self.table.columns().all(|c| {
                let a = self.value(c.name()).ok();
                let b = other.value(c.name()).ok();
                a == b
            })
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("table", &self.table_name())
            .field("values", &self.values)
            .finish()
    }
}
