//! Database schema parsing and value validation.
//!
//! A schema is parsed once into immutable descriptors and then shared by
//! `Arc`. Each column classifies itself as atomic, set or map at parse time;
//! everything downstream asks [`ColumnType::kind`] instead of looking at
//! cardinality again.

use crate::condition::{Function, Mutator};
use crate::error::CoreError;
use crate::value::{Atom, AtomicType, Map, Set, Value};
use serde::Deserialize;
use serde_json::Value as Json;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Row id column, present in every table.
pub const UUID_COLUMN: &str = "_uuid";

/// Row version column, present in every table.
pub const VERSION_COLUMN: &str = "_version";

/// Strength of a reference column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    #[default]
    Strong,
    Weak,
}

// ----------------------------------------------------------------------------
// Raw JSON forms
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawDbSchema {
    name: String,
    version: String,
    #[serde(default)]
    cksum: Option<String>,
    tables: BTreeMap<String, RawTableSchema>,
}

#[derive(Debug, Deserialize)]
struct RawTableSchema {
    columns: BTreeMap<String, RawColumnSchema>,
    #[serde(rename = "maxRows", default)]
    max_rows: Option<usize>,
    #[serde(rename = "isRoot", default)]
    is_root: bool,
    #[serde(default)]
    indexes: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawColumnSchema {
    #[serde(rename = "type")]
    ty: RawColumnType,
    #[serde(default)]
    ephemeral: bool,
    #[serde(default)]
    mutable: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawColumnType {
    Name(String),
    Full {
        key: RawBaseType,
        #[serde(default)]
        value: Option<RawBaseType>,
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<RawMax>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMax {
    Count(usize),
    Word(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBaseType {
    Name(String),
    Full(RawBaseTypeObject),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBaseTypeObject {
    #[serde(rename = "type")]
    ty: String,
    #[serde(rename = "enum", default)]
    enumeration: Option<Json>,
    #[serde(default)]
    min_integer: Option<i64>,
    #[serde(default)]
    max_integer: Option<i64>,
    #[serde(default)]
    min_real: Option<f64>,
    #[serde(default)]
    max_real: Option<f64>,
    #[serde(default)]
    min_length: Option<usize>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    ref_table: Option<String>,
    #[serde(default)]
    ref_type: Option<RefType>,
}

// ----------------------------------------------------------------------------
// Base type
// ----------------------------------------------------------------------------

/// Type of a single atom in a column: its atomic type plus constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseType {
    pub atomic: AtomicType,
    /// Closed set of allowed values. Supersedes the bounds when present.
    pub enumeration: Option<Set>,
    pub min_integer: Option<i64>,
    pub max_integer: Option<i64>,
    pub min_real: Option<f64>,
    pub max_real: Option<f64>,
    /// String length bounds, counted in characters.
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub ref_table: Option<String>,
    pub ref_type: RefType,
}

impl BaseType {
    pub fn new(atomic: AtomicType) -> Self {
        Self {
            atomic,
            enumeration: None,
            min_integer: None,
            max_integer: None,
            min_real: None,
            max_real: None,
            min_length: None,
            max_length: None,
            ref_table: None,
            ref_type: RefType::Strong,
        }
    }

    fn from_raw(raw: RawBaseType) -> Result<Self, String> {
        let raw = match raw {
            RawBaseType::Name(name) => return parse_atomic(&name).map(BaseType::new),
            RawBaseType::Full(raw) => raw,
        };

        let atomic = parse_atomic(&raw.ty)?;
        let enumeration = match raw.enumeration {
            Some(json) => {
                let set = Set::decode(atomic, &json).map_err(|e| format!("invalid enum: {}", e))?;
                if set.is_empty() {
                    return Err("enum must not be empty".to_string());
                }
                Some(set)
            }
            None => None,
        };

        if raw.ref_table.is_some() && atomic != AtomicType::Uuid {
            return Err(format!("refTable is only valid for uuid, not {}", atomic));
        }

        Ok(Self {
            atomic,
            enumeration,
            min_integer: raw.min_integer,
            max_integer: raw.max_integer,
            min_real: raw.min_real,
            max_real: raw.max_real,
            min_length: raw.min_length,
            max_length: raw.max_length,
            ref_table: raw.ref_table,
            ref_type: raw.ref_type.unwrap_or_default(),
        })
    }

    /// Checks an atom's type and, when `enforce` is set, its constraints.
    pub fn validate_atom(&self, atom: &Atom, enforce: bool) -> Result<(), String> {
        if atom.atomic_type() != self.atomic {
            return Err(format!(
                "expected {}, got {} ({})",
                self.atomic,
                atom.atomic_type(),
                atom
            ));
        }
        if !enforce {
            return Ok(());
        }

        if let Some(allowed) = &self.enumeration {
            if allowed.contains(atom) {
                return Ok(());
            }
            return Err(format!("{} is not one of {}", atom, allowed));
        }

        match atom {
            Atom::Integer(i) => {
                if let Some(min) = self.min_integer.filter(|min| i < min) {
                    return Err(format!("{} < minimum {}", i, min));
                }
                if let Some(max) = self.max_integer.filter(|max| i > max) {
                    return Err(format!("{} > maximum {}", i, max));
                }
            }
            Atom::Real(r) => {
                if let Some(min) = self.min_real.filter(|min| r < min) {
                    return Err(format!("{} < minimum {}", r, min));
                }
                if let Some(max) = self.max_real.filter(|max| r > max) {
                    return Err(format!("{} > maximum {}", r, max));
                }
            }
            Atom::String(s) => {
                let len = s.chars().count();
                if let Some(min) = self.min_length.filter(|min| len < *min) {
                    return Err(format!("length {} < minimum {}", len, min));
                }
                if let Some(max) = self.max_length.filter(|max| len > *max) {
                    return Err(format!("length {} > maximum {}", len, max));
                }
            }
            Atom::Boolean(_) | Atom::Uuid(_) => {}
        }
        Ok(())
    }
}

fn parse_atomic(name: &str) -> Result<AtomicType, String> {
    AtomicType::parse(name).ok_or_else(|| format!("unknown atomic type '{}'", name))
}

// ----------------------------------------------------------------------------
// Column type
// ----------------------------------------------------------------------------

/// Effective kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Atomic,
    Set,
    Map,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Atomic => write!(f, "atom"),
            Kind::Set => write!(f, "set"),
            Kind::Map => write!(f, "map"),
        }
    }
}

/// Key type, optional value type and cardinality of a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    key: BaseType,
    value: Option<BaseType>,
    min: usize,
    max: Option<usize>,
    kind: Kind,
}

impl ColumnType {
    /// Builds a column type. `max` of `None` means unlimited.
    ///
    /// A value type makes the column a map. Otherwise `min == max == 1` is an
    /// atomic column and anything wider is a set.
    pub fn new(
        key: BaseType,
        value: Option<BaseType>,
        min: usize,
        max: Option<usize>,
    ) -> Result<Self, String> {
        if min > 1 {
            return Err(format!("min must be 0 or 1, got {}", min));
        }
        match max {
            Some(0) => return Err("max must be at least 1".to_string()),
            Some(max) if max < min => {
                return Err(format!("max {} is less than min {}", max, min));
            }
            _ => {}
        }

        let kind = if value.is_some() {
            Kind::Map
        } else if min == 1 && max == Some(1) {
            Kind::Atomic
        } else {
            Kind::Set
        };

        Ok(Self {
            key,
            value,
            min,
            max,
            kind,
        })
    }

    /// A plain atomic column of the given type.
    pub fn atomic(ty: AtomicType) -> Self {
        Self {
            key: BaseType::new(ty),
            value: None,
            min: 1,
            max: Some(1),
            kind: Kind::Atomic,
        }
    }

    fn from_raw(raw: RawColumnType) -> Result<Self, String> {
        match raw {
            RawColumnType::Name(name) => parse_atomic(&name).map(ColumnType::atomic),
            RawColumnType::Full {
                key,
                value,
                min,
                max,
            } => {
                let key = BaseType::from_raw(key)?;
                let value = value.map(BaseType::from_raw).transpose()?;
                let max = match max {
                    None => Some(1),
                    Some(RawMax::Count(n)) => Some(n),
                    Some(RawMax::Word(w)) if w == "unlimited" => None,
                    Some(RawMax::Word(w)) => {
                        return Err(format!("max must be an integer or \"unlimited\", got '{}'", w))
                    }
                };
                ColumnType::new(key, value, min.unwrap_or(1), max)
            }
        }
    }

    pub fn key(&self) -> &BaseType {
        &self.key
    }

    pub fn value(&self) -> Option<&BaseType> {
        self.value.as_ref()
    }

    pub fn min(&self) -> usize {
        self.min
    }

    /// Maximum number of elements; `None` means unlimited.
    pub fn max(&self) -> Option<usize> {
        self.max
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// A set holding zero or one element.
    pub fn is_optional(&self) -> bool {
        self.kind == Kind::Set && self.min == 0 && self.max == Some(1)
    }

    /// Decodes a wire value according to the column kind.
    pub fn decode(&self, json: &Json) -> Result<Value, String> {
        match self.kind {
            Kind::Atomic => Atom::decode(self.key.atomic, json).map(Value::Atom),
            Kind::Set => Set::decode(self.key.atomic, json).map(Value::Set),
            Kind::Map => match &self.value {
                Some(value) => Map::decode(self.key.atomic, value.atomic, json).map(Value::Map),
                None => Err("map column without a value type".to_string()),
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Column
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Checks {
    min_len: bool,
    max_len: bool,
    atoms: bool,
}

impl Checks {
    fn all(enforce: bool) -> Self {
        Self {
            min_len: enforce,
            max_len: enforce,
            atoms: enforce,
        }
    }

    fn atoms_only(enforce: bool) -> Self {
        Self {
            min_len: false,
            max_len: false,
            atoms: enforce,
        }
    }
}

/// A column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    name: String,
    ty: ColumnType,
    ephemeral: bool,
    mutable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            ephemeral: false,
            mutable: true,
        }
    }

    pub fn with_mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.ty
    }

    pub fn kind(&self) -> Kind {
        self.ty.kind
    }

    /// Ephemeral columns are not persisted by the server.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Value a row reports for this column before anything was stored.
    pub fn default_value(&self) -> Value {
        match self.ty.kind {
            Kind::Atomic => {
                let key = &self.ty.key;
                let atom = key
                    .enumeration
                    .as_ref()
                    .and_then(|e| e.first().cloned())
                    .unwrap_or_else(|| key.atomic.default_atom());
                Value::Atom(atom)
            }
            Kind::Set => Value::Set(Set::new()),
            Kind::Map => Value::Map(Map::new()),
        }
    }

    /// Decodes a wire value for this column.
    pub fn decode(&self, json: &Json) -> Result<Value, String> {
        self.ty.decode(json)
    }

    /// Checks that `value` has this column's kind and atom types.
    ///
    /// With `enforce` set, cardinality, ranges, lengths and enumerations are
    /// checked too. Deltas and mutation operands are checked without it.
    pub fn validate_value(&self, value: &Value, enforce: bool) -> Result<(), CoreError> {
        self.check_value(value, Checks::all(enforce))
            .map_err(|reason| CoreError::violation(&self.name, reason))
    }

    fn check_value(&self, value: &Value, checks: Checks) -> Result<(), String> {
        match (self.ty.kind, value) {
            (Kind::Atomic, Value::Atom(atom)) => self.ty.key.validate_atom(atom, checks.atoms),
            (Kind::Set, Value::Set(set)) => {
                self.check_cardinality(set.len(), checks)?;
                set.iter()
                    .try_for_each(|atom| self.ty.key.validate_atom(atom, checks.atoms))
            }
            (Kind::Map, Value::Map(map)) => {
                self.check_cardinality(map.len(), checks)?;
                let value_type = self
                    .ty
                    .value
                    .as_ref()
                    .ok_or_else(|| "map column without a value type".to_string())?;
                map.iter().try_for_each(|(k, v)| {
                    self.ty.key.validate_atom(k, checks.atoms)?;
                    value_type.validate_atom(v, checks.atoms)
                })
            }
            (kind, value) => Err(format!("expected {}, got {}", kind, value.kind_name())),
        }
    }

    fn check_cardinality(&self, len: usize, checks: Checks) -> Result<(), String> {
        if checks.min_len && len < self.ty.min {
            return Err(format!("{} elements < minimum {}", len, self.ty.min));
        }
        if let Some(max) = self.ty.max.filter(|max| checks.max_len && len > *max) {
            return Err(format!("{} elements > maximum {}", len, max));
        }
        Ok(())
    }

    /// Checks that `function` may be applied to this column with `value`.
    ///
    /// Ordering operators need a numeric atomic column or a numeric 0/1 set
    /// compared against a single value. `includes` and `excludes` need a set
    /// or a map. A bare atom against a set column stands for a one-element
    /// set.
    pub fn validate_condition(&self, function: Function, value: &Value) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidCondition {
            column: self.name.clone(),
            reason,
        };
        let key = &self.ty.key;

        match self.ty.kind {
            Kind::Atomic => {
                if function.is_set_operator() {
                    return Err(invalid(format!(
                        "'{}' needs a set or map column, {} is {}",
                        function, self.name, key.atomic
                    )));
                }
                if function.is_ordering() && !key.atomic.is_numeric() {
                    return Err(invalid(format!(
                        "'{}' needs a numeric column, {} is {}",
                        function, self.name, key.atomic
                    )));
                }
                self.check_value(value, Checks::all(true)).map_err(invalid)
            }
            Kind::Set if function.is_ordering() => {
                if !(self.ty.is_optional() && key.atomic.is_numeric()) {
                    return Err(invalid(format!(
                        "'{}' is only valid on numeric atoms and optional numeric sets",
                        function
                    )));
                }
                let atom = value
                    .scalar()
                    .ok_or_else(|| invalid(format!("'{}' needs a single value", function)))?;
                key.validate_atom(atom, true).map_err(invalid)
            }
            Kind::Set => {
                let value = as_set_value(value);
                self.check_value(&value, condition_checks(function))
                    .map_err(invalid)
            }
            Kind::Map => {
                if function.is_ordering() {
                    return Err(invalid(format!("'{}' is not valid on a map", function)));
                }
                self.check_value(value, condition_checks(function))
                    .map_err(invalid)
            }
        }
    }

    /// Checks that `mutator` may be applied to this column with `value`.
    ///
    /// Arithmetic applies to numeric atoms and to every element of a numeric
    /// set, `%=` only to integers. `insert` and `delete` apply to sets and
    /// maps; a map `delete` also accepts a set of keys.
    pub fn validate_mutation(&self, mutator: Mutator, value: &Value) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidMutation {
            column: self.name.clone(),
            reason,
        };
        if !self.mutable {
            return Err(invalid(format!("column {} is immutable", self.name)));
        }
        let key = &self.ty.key;

        if mutator.is_arithmetic() {
            if self.ty.kind == Kind::Map {
                return Err(invalid(format!("'{}' is not valid on a map", mutator)));
            }
            if !key.atomic.is_numeric() {
                return Err(invalid(format!(
                    "'{}' needs a numeric column, {} is {}",
                    mutator, self.name, key.atomic
                )));
            }
            if mutator == Mutator::Modulo && key.atomic != AtomicType::Integer {
                return Err(invalid("'%=' needs an integer column".to_string()));
            }
            let atom = value
                .as_atom()
                .ok_or_else(|| invalid(format!("'{}' needs a scalar operand", mutator)))?;
            key.validate_atom(atom, false).map_err(invalid)?;
            if matches!(mutator, Mutator::Divide | Mutator::Modulo) && atom.as_f64() == Some(0.0) {
                return Err(invalid("division by zero".to_string()));
            }
            return Ok(());
        }

        let enforce_atoms = mutator == Mutator::Insert;
        match (self.ty.kind, value) {
            (Kind::Atomic, _) => Err(invalid(format!(
                "'{}' needs a set or map column",
                mutator
            ))),
            (Kind::Set, value) => self
                .check_value(&as_set_value(value), Checks::atoms_only(enforce_atoms))
                .map_err(invalid),
            (Kind::Map, Value::Map(_)) => self
                .check_value(value, Checks::atoms_only(enforce_atoms))
                .map_err(invalid),
            (Kind::Map, Value::Set(_) | Value::Atom(_)) if mutator == Mutator::Delete => {
                let keys = as_set_value(value);
                let result = keys
                    .as_set()
                    .into_iter()
                    .flat_map(Set::iter)
                    .try_for_each(|k| key.validate_atom(k, false));
                result.map_err(invalid)
            }
            (Kind::Map, other) => Err(invalid(format!(
                "'{}' on a map needs a map operand, got {}",
                mutator,
                other.kind_name()
            ))),
        }
    }
}

fn condition_checks(function: Function) -> Checks {
    if function.is_set_operator() {
        Checks::atoms_only(true)
    } else {
        Checks::all(true)
    }
}

fn as_set_value(value: &Value) -> Cow<'_, Value> {
    match value {
        Value::Atom(atom) => Cow::Owned(Value::Set(std::iter::once(atom.clone()).collect())),
        other => Cow::Borrowed(other),
    }
}

// ----------------------------------------------------------------------------
// Table and database
// ----------------------------------------------------------------------------

/// A table and its columns, including the synthesized `_uuid` and `_version`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: BTreeMap<String, ColumnSchema>,
    max_rows: Option<usize>,
    is_root: bool,
    indexes: Vec<Vec<String>>,
}

impl TableSchema {
    /// Builds a table, adding `_uuid` and `_version` unless already present.
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = ColumnSchema>) -> Self {
        let mut columns: BTreeMap<String, ColumnSchema> = columns
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        columns.entry(UUID_COLUMN.to_string()).or_insert_with(|| {
            ColumnSchema::new(UUID_COLUMN, ColumnType::atomic(AtomicType::Uuid)).with_mutable(false)
        });
        columns
            .entry(VERSION_COLUMN.to_string())
            .or_insert_with(|| ColumnSchema::new(VERSION_COLUMN, ColumnType::atomic(AtomicType::Uuid)));

        Self {
            name: name.into(),
            columns,
            max_rows: None,
            is_root: false,
            indexes: Vec::new(),
        }
    }

    fn from_raw(name: &str, raw: RawTableSchema) -> Result<Self, CoreError> {
        let mut columns = Vec::with_capacity(raw.columns.len());
        for (column_name, raw_column) in raw.columns {
            let ty = ColumnType::from_raw(raw_column.ty).map_err(|reason| CoreError::InvalidSchema {
                reason: format!("{}.{}: {}", name, column_name, reason),
            })?;
            columns.push(
                ColumnSchema::new(column_name, ty)
                    .with_ephemeral(raw_column.ephemeral)
                    .with_mutable(raw_column.mutable.unwrap_or(true)),
            );
        }

        let mut table = TableSchema::new(name, columns);
        table.max_rows = raw.max_rows;
        table.is_root = raw.is_root;
        table.indexes = raw.indexes;
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a column, failing with a schema error when absent.
    pub fn column(&self, name: &str) -> Result<&ColumnSchema, CoreError> {
        self.columns
            .get(name)
            .ok_or_else(|| CoreError::unknown_column(&self.name, name))
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values()
    }

    pub fn max_rows(&self) -> Option<usize> {
        self.max_rows
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn indexes(&self) -> &[Vec<String>] {
        &self.indexes
    }

    /// Decodes a wire value for one of this table's columns.
    pub fn decode_value(&self, column: &str, json: &Json) -> Result<Value, CoreError> {
        self.column(column)?
            .decode(json)
            .map_err(|reason| CoreError::Decode {
                table: self.name.clone(),
                column: column.to_string(),
                reason,
            })
    }
}

/// A parsed database schema.
#[derive(Debug, Clone, PartialEq)]
pub struct DbSchema {
    name: String,
    version: String,
    cksum: Option<String>,
    tables: BTreeMap<String, Arc<TableSchema>>,
}

impl DbSchema {
    /// Parses a schema from its JSON text.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let json: Json = serde_json::from_str(text)?;
        Self::from_json(json)
    }

    /// Parses a schema from a `get_schema` result.
    pub fn from_json(json: Json) -> Result<Self, CoreError> {
        let raw: RawDbSchema =
            serde_json::from_value(json).map_err(|e| CoreError::InvalidSchema {
                reason: e.to_string(),
            })?;

        let mut tables = BTreeMap::new();
        for (name, raw_table) in raw.tables {
            let table = TableSchema::from_raw(&name, raw_table)?;
            tables.insert(name, Arc::new(table));
        }

        for table in tables.values() {
            for column in table.columns() {
                let ty = column.column_type();
                let targets = std::iter::once(ty.key()).chain(ty.value());
                for base in targets {
                    if let Some(target) = &base.ref_table {
                        if !tables.contains_key(target) {
                            return Err(CoreError::InvalidSchema {
                                reason: format!(
                                    "{}.{} refers to unknown table {}",
                                    table.name(),
                                    column.name(),
                                    target
                                ),
                            });
                        }
                    }
                }
            }
        }

        tracing::debug!(
            "Parsed schema {} v{} with {} tables",
            raw.name,
            raw.version,
            tables.len()
        );

        Ok(Self {
            name: raw.name,
            version: raw.version,
            cksum: raw.cksum,
            tables,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn cksum(&self) -> Option<&str> {
        self.cksum.as_deref()
    }

    /// Looks up a table, failing with a schema error when absent.
    pub fn table(&self, name: &str) -> Result<&Arc<TableSchema>, CoreError> {
        self.tables.get(name).ok_or_else(|| CoreError::UnknownTable {
            table: name.to_string(),
        })
    }

    pub fn get_table(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ovs_schema;
    use crate::value::Reference;
    use serde_json::json;

    fn column<'a>(schema: &'a DbSchema, table: &str, column: &str) -> &'a ColumnSchema {
        schema.table(table).unwrap().column(column).unwrap()
    }

    #[test]
    fn test_parse_schema() {
        let schema = ovs_schema();
        assert_eq!(schema.name(), "Open_vSwitch");
        assert_eq!(schema.version(), "8.3.0");
        assert!(schema.table("Bridge").is_ok());
        assert!(matches!(
            schema.table("Nope"),
            Err(CoreError::UnknownTable { .. })
        ));

        let root = schema.table("Open_vSwitch").unwrap();
        assert!(root.is_root());
        assert_eq!(root.max_rows(), Some(1));
    }

    #[test]
    fn test_synthesized_columns() {
        let schema = ovs_schema();
        for table in schema.tables() {
            let uuid = table.column(UUID_COLUMN).unwrap();
            assert_eq!(uuid.kind(), Kind::Atomic);
            assert_eq!(uuid.column_type().key().atomic, AtomicType::Uuid);
            assert!(!uuid.is_mutable());

            let version = table.column(VERSION_COLUMN).unwrap();
            assert_eq!(version.kind(), Kind::Atomic);
            assert!(version.is_mutable());

            let count = table.columns().filter(|c| c.name() == UUID_COLUMN).count();
            assert_eq!(count, 1);
        }
    }

    #[test]
    fn test_column_kinds() {
        let schema = ovs_schema();
        assert_eq!(column(&schema, "Bridge", "name").kind(), Kind::Atomic);
        assert_eq!(column(&schema, "Bridge", "ports").kind(), Kind::Set);
        assert_eq!(column(&schema, "Bridge", "flow_tables").kind(), Kind::Map);

        let tag = column(&schema, "Port", "tag");
        assert_eq!(tag.kind(), Kind::Set);
        assert!(tag.column_type().is_optional());
        assert_eq!(tag.column_type().max(), Some(1));

        let ports = column(&schema, "Bridge", "ports");
        assert_eq!(ports.column_type().max(), None);
        assert_eq!(
            ports.column_type().key().ref_table.as_deref(),
            Some("Port")
        );
        assert_eq!(ports.column_type().key().ref_type, RefType::Strong);
    }

    #[test]
    fn test_column_flags() {
        let schema = ovs_schema();
        assert!(!column(&schema, "Bridge", "name").is_mutable());
        assert!(column(&schema, "Bridge", "ports").is_mutable());
        assert!(column(&schema, "Interface", "admin_state").is_ephemeral());
    }

    #[test]
    fn test_invalid_cardinality() {
        let key = BaseType::new(AtomicType::Integer);
        assert!(ColumnType::new(key.clone(), None, 2, Some(3)).is_err());
        assert!(ColumnType::new(key.clone(), None, 0, Some(0)).is_err());
        assert!(ColumnType::new(key.clone(), None, 1, None).is_ok());

        let bad = json!({
            "name": "x", "version": "1.0.0",
            "tables": {"T": {"columns": {"c": {"type": {"key": "integer", "max": "lots"}}}}}
        });
        assert!(matches!(
            DbSchema::from_json(bad),
            Err(CoreError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_unknown_ref_table_rejected() {
        let bad = json!({
            "name": "x", "version": "1.0.0",
            "tables": {"T": {"columns": {"c": {"type": {"key": {"type": "uuid", "refTable": "U"}}}}}}
        });
        assert!(DbSchema::from_json(bad).is_err());
    }

    #[test]
    fn test_enum_parse_single_value() {
        let schema = json!({
            "name": "x", "version": "1.0.0",
            "tables": {"T": {"columns": {"c": {"type": {"key": {"type": "string", "enum": "only"}}}}}}
        });
        let schema = DbSchema::from_json(schema).unwrap();
        let c = column(&schema, "T", "c");
        assert_eq!(c.column_type().key().enumeration.as_ref().unwrap().len(), 1);
        assert_eq!(c.default_value(), Value::from("only"));
    }

    #[test]
    fn test_validate_value_ranges() {
        let schema = ovs_schema();
        let tag = column(&schema, "Port", "tag");

        let ok: Set = [100i64].into_iter().collect();
        assert!(tag.validate_value(&Value::Set(ok), true).is_ok());

        let too_big: Set = [5000i64].into_iter().collect();
        assert!(tag.validate_value(&Value::Set(too_big.clone()), true).is_err());
        assert!(tag.validate_value(&Value::Set(too_big), false).is_ok());

        let two: Set = [1i64, 2].into_iter().collect();
        assert!(tag.validate_value(&Value::Set(two.clone()), true).is_err());
        assert!(tag.validate_value(&Value::Set(two), false).is_ok());

        assert!(tag.validate_value(&Value::from(1i64), false).is_err());
        assert!(tag.validate_value(&Value::Set(["x"].into_iter().collect()), false).is_err());
    }

    #[test]
    fn test_validate_enum_supersedes() {
        let schema = ovs_schema();
        let mode = column(&schema, "Bridge", "fail_mode");
        let secure: Set = ["secure"].into_iter().collect();
        assert!(mode.validate_value(&Value::Set(secure), true).is_ok());

        let other: Set = ["bogus"].into_iter().collect();
        assert!(mode.validate_value(&Value::Set(other.clone()), true).is_err());
        assert!(mode.validate_value(&Value::Set(other), false).is_ok());
    }

    #[test]
    fn test_validate_string_length_in_chars() {
        let schema = ovs_schema();
        let prefixes = column(&schema, "Flow_Table", "prefixes");
        let ok: Set = ["é".repeat(32)].into_iter().collect();
        assert!(prefixes.validate_value(&Value::Set(ok), true).is_ok());
        let long: Set = ["x".repeat(33)].into_iter().collect();
        assert!(prefixes.validate_value(&Value::Set(long), true).is_err());
    }

    #[test]
    fn test_validate_map_value() {
        let schema = ovs_schema();
        let flow_tables = column(&schema, "Bridge", "flow_tables");
        let ok: Map = [(1i64, Reference::uuid("u1"))].into_iter().collect();
        assert!(flow_tables.validate_value(&Value::Map(ok), true).is_ok());

        let out_of_range: Map = [(300i64, Reference::uuid("u1"))].into_iter().collect();
        assert!(flow_tables
            .validate_value(&Value::Map(out_of_range), true)
            .is_err());

        let wrong_value: Map = [(1i64, "u1")].into_iter().collect();
        assert!(flow_tables
            .validate_value(&Value::Map(wrong_value), false)
            .is_err());
    }

    #[test]
    fn test_condition_scalar_against_optional_set() {
        let schema = ovs_schema();
        let tag = column(&schema, "Port", "tag");
        for function in [
            Function::Equal,
            Function::NotEqual,
            Function::LessThan,
            Function::GreaterEqual,
            Function::Includes,
            Function::Excludes,
        ] {
            assert!(
                tag.validate_condition(function, &Value::from(65i64)).is_ok(),
                "{} rejected",
                function
            );
        }
    }

    #[test]
    fn test_condition_on_unbounded_int_set() {
        let schema = ovs_schema();
        let trunks = column(&schema, "Port", "trunks");
        for function in [
            Function::Equal,
            Function::NotEqual,
            Function::Includes,
            Function::Excludes,
        ] {
            assert!(trunks.validate_condition(function, &Value::from(65i64)).is_ok());
        }
        for function in [
            Function::LessThan,
            Function::LessEqual,
            Function::GreaterThan,
            Function::GreaterEqual,
        ] {
            assert!(matches!(
                trunks.validate_condition(function, &Value::from(65i64)),
                Err(CoreError::InvalidCondition { .. })
            ));
        }
    }

    #[test]
    fn test_condition_on_atomic_columns() {
        let schema = ovs_schema();
        let cur_cfg = column(&schema, "Open_vSwitch", "cur_cfg");
        assert!(cur_cfg
            .validate_condition(Function::GreaterEqual, &Value::from(3i64))
            .is_ok());
        assert!(cur_cfg
            .validate_condition(Function::Includes, &Value::from(3i64))
            .is_err());
        assert!(cur_cfg
            .validate_condition(Function::Equal, &Value::from("3"))
            .is_err());

        let name = column(&schema, "Bridge", "name");
        assert!(name
            .validate_condition(Function::LessThan, &Value::from("br0"))
            .is_err());
        assert!(name
            .validate_condition(Function::Equal, &Value::from("br0"))
            .is_ok());
    }

    #[test]
    fn test_condition_on_map() {
        let schema = ovs_schema();
        let ids = column(&schema, "Open_vSwitch", "external_ids");
        let subset: Map = [("system-id", "abc")].into_iter().collect();
        assert!(ids
            .validate_condition(Function::Includes, &Value::Map(subset.clone()))
            .is_ok());
        assert!(ids
            .validate_condition(Function::LessThan, &Value::Map(subset))
            .is_err());
        assert!(ids
            .validate_condition(Function::Equal, &Value::from("abc"))
            .is_err());
    }

    #[test]
    fn test_mutation_rules() {
        let schema = ovs_schema();
        let next_cfg = column(&schema, "Open_vSwitch", "next_cfg");
        assert!(next_cfg
            .validate_mutation(Mutator::Add, &Value::from(1i64))
            .is_ok());
        assert!(next_cfg
            .validate_mutation(Mutator::Modulo, &Value::from(0i64))
            .is_err());
        assert!(next_cfg
            .validate_mutation(Mutator::Insert, &Value::from(1i64))
            .is_err());

        let trunks = column(&schema, "Port", "trunks");
        assert!(trunks
            .validate_mutation(Mutator::Add, &Value::from(1i64))
            .is_ok());
        assert!(trunks
            .validate_mutation(Mutator::Insert, &Value::from(10i64))
            .is_ok());
        assert!(trunks
            .validate_mutation(Mutator::Insert, &Value::from(9000i64))
            .is_err());
        assert!(trunks
            .validate_mutation(Mutator::Delete, &Value::from(9000i64))
            .is_ok());

        let name = column(&schema, "Bridge", "name");
        assert!(name
            .validate_mutation(Mutator::Insert, &Value::from("x"))
            .is_err());

        let options = column(&schema, "Interface", "options");
        let keys: Set = ["remote_ip"].into_iter().collect();
        assert!(options
            .validate_mutation(Mutator::Delete, &Value::Set(keys.clone()))
            .is_ok());
        assert!(options
            .validate_mutation(Mutator::Insert, &Value::Set(keys))
            .is_err());
        let pairs: Map = [("remote_ip", "10.0.0.1")].into_iter().collect();
        assert!(options
            .validate_mutation(Mutator::Insert, &Value::Map(pairs))
            .is_ok());
        assert!(options
            .validate_mutation(Mutator::Add, &Value::from(1i64))
            .is_err());
    }

    #[test]
    fn test_default_values() {
        let schema = ovs_schema();
        assert_eq!(
            column(&schema, "Open_vSwitch", "cur_cfg").default_value(),
            Value::from(0i64)
        );
        assert_eq!(
            column(&schema, "Bridge", "ports").default_value(),
            Value::Set(Set::new())
        );
        assert_eq!(
            column(&schema, "Bridge", "flow_tables").default_value(),
            Value::Map(Map::new())
        );
        assert_eq!(
            column(&schema, "Bridge", UUID_COLUMN).default_value(),
            Value::from(Reference::zero())
        );
    }

    #[test]
    fn test_decode_value_reports_location() {
        let schema = ovs_schema();
        let bridge = schema.table("Bridge").unwrap();
        let err = bridge.decode_value("ports", &json!(["map", []])).unwrap_err();
        match err {
            CoreError::Decode { table, column, .. } => {
                assert_eq!(table, "Bridge");
                assert_eq!(column, "ports");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            bridge.decode_value("nope", &json!(1)),
            Err(CoreError::UnknownColumn { .. })
        ));
    }
}
