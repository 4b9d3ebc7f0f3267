//! Conditions and mutations.
//!
//! Both are `[column, operator, value]` triples on the wire. Conditions are
//! used in monitor filters, in transaction `where` clauses and to match rows
//! of a local replica.

use crate::error::CoreError;
use crate::schema::TableSchema;
use crate::value::{Atom, Set, Value};
use serde::{Serialize, Serializer};
use serde_json::{json, Value as Json};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Condition functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    LessThan,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    GreaterThan,
    Includes,
    Excludes,
}

impl Function {
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::LessThan => "<",
            Function::LessEqual => "<=",
            Function::Equal => "==",
            Function::NotEqual => "!=",
            Function::GreaterEqual => ">=",
            Function::GreaterThan => ">",
            Function::Includes => "includes",
            Function::Excludes => "excludes",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Function::LessThan | Function::LessEqual | Function::GreaterEqual | Function::GreaterThan
        )
    }

    pub fn is_set_operator(&self) -> bool {
        matches!(self, Function::Includes | Function::Excludes)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Function {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Function::LessThan),
            "<=" => Ok(Function::LessEqual),
            "==" => Ok(Function::Equal),
            "!=" => Ok(Function::NotEqual),
            ">=" => Ok(Function::GreaterEqual),
            ">" => Ok(Function::GreaterThan),
            "includes" => Ok(Function::Includes),
            "excludes" => Ok(Function::Excludes),
            other => Err(format!("unknown condition function '{}'", other)),
        }
    }
}

/// A `[column, function, value]` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub function: Function,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, function: Function, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            function,
            value: value.into(),
        }
    }

    pub fn equal(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::Equal, value)
    }

    pub fn not_equal(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::NotEqual, value)
    }

    pub fn less_than(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::LessThan, value)
    }

    pub fn less_equal(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::LessEqual, value)
    }

    pub fn greater_than(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::GreaterThan, value)
    }

    pub fn greater_equal(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::GreaterEqual, value)
    }

    pub fn includes(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::Includes, value)
    }

    pub fn excludes(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Function::Excludes, value)
    }

    /// Type-checks the condition against its column.
    pub fn validate(&self, table: &TableSchema) -> Result<(), CoreError> {
        table
            .column(&self.column)?
            .validate_condition(self.function, &self.value)
    }

    /// Evaluates the condition against a column value.
    pub fn check(&self, value: &Value) -> bool {
        if self.function.is_ordering() {
            return match (self.value.scalar(), value.scalar()) {
                (Some(expected), Some(actual)) => match compare_numbers(actual, expected) {
                    Some(ord) => match self.function {
                        Function::LessThan => ord == Ordering::Less,
                        Function::LessEqual => ord != Ordering::Greater,
                        Function::GreaterEqual => ord != Ordering::Less,
                        Function::GreaterThan => ord == Ordering::Greater,
                        _ => false,
                    },
                    None => false,
                },
                _ => false,
            };
        }

        let single;
        let expected = match (&self.value, value) {
            (Value::Atom(atom), Value::Set(_)) => {
                single = Value::Set(std::iter::once(atom.clone()).collect::<Set>());
                &single
            }
            (expected, _) => expected,
        };

        match (expected, value) {
            (Value::Atom(expected), Value::Atom(actual)) => match self.function {
                Function::Equal | Function::Includes => actual == expected,
                Function::NotEqual | Function::Excludes => actual != expected,
                _ => false,
            },
            (Value::Set(expected), Value::Set(actual)) => match self.function {
                Function::Equal => actual == expected,
                Function::NotEqual => actual != expected,
                Function::Includes => expected.is_subset(actual),
                Function::Excludes => expected.is_disjoint(actual),
                _ => false,
            },
            (Value::Map(expected), Value::Map(actual)) => match self.function {
                Function::Equal => actual == expected,
                Function::NotEqual => actual != expected,
                Function::Includes => actual.includes(expected),
                Function::Excludes => actual.excludes(expected),
                _ => false,
            },
            _ => false,
        }
    }

    pub fn to_json(&self) -> Json {
        json!([self.column, self.function.as_str(), self.value.to_json()])
    }

    /// Decodes a wire condition, typing its value by the column.
    pub fn from_json(json: &Json, table: &TableSchema) -> Result<Self, CoreError> {
        let (column, function, value) = split_triple(json, "condition")?;
        let function = function
            .parse::<Function>()
            .map_err(|reason| CoreError::InvalidCondition {
                column: column.to_string(),
                reason,
            })?;
        let value = table.decode_value(column, value)?;
        Ok(Self::new(column, function, value))
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn compare_numbers(a: &Atom, b: &Atom) -> Option<Ordering> {
    match (a, b) {
        (Atom::Integer(x), Atom::Integer(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn split_triple<'a>(json: &'a Json, what: &str) -> Result<(&'a str, &'a str, &'a Json), CoreError> {
    match json.as_array().map(Vec::as_slice) {
        Some([Json::String(column), Json::String(op), value]) => Ok((column, op, value)),
        _ => Err(CoreError::InvalidOperation {
            reason: format!("{} must be [column, operator, value], got {}", what, json),
        }),
    }
}

/// Mutators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Insert,
    Delete,
}

impl Mutator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutator::Add => "+=",
            Mutator::Subtract => "-=",
            Mutator::Multiply => "*=",
            Mutator::Divide => "/=",
            Mutator::Modulo => "%=",
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        !matches!(self, Mutator::Insert | Mutator::Delete)
    }
}

impl fmt::Display for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mutator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+=" => Ok(Mutator::Add),
            "-=" => Ok(Mutator::Subtract),
            "*=" => Ok(Mutator::Multiply),
            "/=" => Ok(Mutator::Divide),
            "%=" => Ok(Mutator::Modulo),
            "insert" => Ok(Mutator::Insert),
            "delete" => Ok(Mutator::Delete),
            other => Err(format!("unknown mutator '{}'", other)),
        }
    }
}

/// A `[column, mutator, value]` change applied by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub column: String,
    pub mutator: Mutator,
    pub value: Value,
}

impl Mutation {
    pub fn new(column: impl Into<String>, mutator: Mutator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            mutator,
            value: value.into(),
        }
    }

    pub fn add(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Mutator::Add, value)
    }

    pub fn subtract(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Mutator::Subtract, value)
    }

    pub fn multiply(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Mutator::Multiply, value)
    }

    pub fn divide(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Mutator::Divide, value)
    }

    pub fn modulo(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Mutator::Modulo, value)
    }

    pub fn insert(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Mutator::Insert, value)
    }

    pub fn delete(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Mutator::Delete, value)
    }

    /// Type-checks the mutation against its column.
    pub fn validate(&self, table: &TableSchema) -> Result<(), CoreError> {
        table
            .column(&self.column)?
            .validate_mutation(self.mutator, &self.value)
    }

    pub fn to_json(&self) -> Json {
        json!([self.column, self.mutator.as_str(), self.value.to_json()])
    }

    /// Decodes a wire mutation.
    ///
    /// Arithmetic operands are scalars of the key type. A `delete` on a map
    /// column may carry a set of keys instead of a map.
    pub fn from_json(json: &Json, table: &TableSchema) -> Result<Self, CoreError> {
        let (column, mutator, value) = split_triple(json, "mutation")?;
        let mutator = mutator
            .parse::<Mutator>()
            .map_err(|reason| CoreError::InvalidMutation {
                column: column.to_string(),
                reason,
            })?;
        let schema = table.column(column)?;
        let ty = schema.column_type();
        let decode_err = |reason: String| CoreError::Decode {
            table: table.name().to_string(),
            column: column.to_string(),
            reason,
        };

        let decoded = if mutator.is_arithmetic() {
            Atom::decode(ty.key().atomic, value)
                .map(Value::Atom)
                .map_err(decode_err)?
        } else {
            match schema.decode(value) {
                Ok(v) => v,
                Err(_) if mutator == Mutator::Delete && ty.value().is_some() => {
                    Set::decode(ty.key().atomic, value)
                        .map(Value::Set)
                        .map_err(decode_err)?
                }
                Err(reason) => return Err(decode_err(reason)),
            }
        };
        Ok(Self::new(column, mutator, decoded))
    }
}

impl Serialize for Mutation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ovs_schema;
    use crate::value::Map;

    #[test]
    fn test_function_parse() {
        for f in [
            Function::LessThan,
            Function::LessEqual,
            Function::Equal,
            Function::NotEqual,
            Function::GreaterEqual,
            Function::GreaterThan,
            Function::Includes,
            Function::Excludes,
        ] {
            assert_eq!(f.as_str().parse::<Function>().unwrap(), f);
        }
        assert!("~=".parse::<Function>().is_err());
    }

    #[test]
    fn test_check_scalars() {
        assert!(Condition::greater_equal("cur_cfg", 5i64).check(&Value::from(7i64)));
        assert!(!Condition::greater_than("cur_cfg", 7i64).check(&Value::from(7i64)));
        assert!(Condition::less_equal("x", 1.5).check(&Value::from(1.5)));
        assert!(Condition::equal("name", "br0").check(&Value::from("br0")));
        assert!(Condition::not_equal("name", "br0").check(&Value::from("br1")));
        assert!(!Condition::less_than("name", "b").check(&Value::from("a")));
    }

    #[test]
    fn test_check_optional_set_shorthand() {
        let tag: Value = Value::Set([65i64].into_iter().collect());
        assert!(Condition::equal("tag", 65i64).check(&tag));
        assert!(Condition::less_than("tag", 100i64).check(&tag));
        assert!(!Condition::not_equal("tag", 65i64).check(&tag));

        let empty = Value::Set(Set::new());
        assert!(!Condition::less_than("tag", 100i64).check(&empty));
        assert!(!Condition::equal("tag", 65i64).check(&empty));
        assert!(Condition::not_equal("tag", 65i64).check(&empty));
    }

    #[test]
    fn test_check_sets() {
        let ports: Value = Value::Set(["a", "b", "c"].into_iter().collect());
        let ab: Set = ["a", "b"].into_iter().collect();
        let xy: Set = ["x", "y"].into_iter().collect();
        assert!(Condition::includes("ports", ab.clone()).check(&ports));
        assert!(!Condition::excludes("ports", ab.clone()).check(&ports));
        assert!(Condition::excludes("ports", xy.clone()).check(&ports));
        assert!(!Condition::includes("ports", xy).check(&ports));
        assert!(!Condition::equal("ports", ab).check(&ports));
        assert!(Condition::includes("ports", "a").check(&ports));
    }

    #[test]
    fn test_check_maps() {
        let ids: Value = Value::Map([("a", "1"), ("b", "2")].into_iter().collect());
        let a1: Map = [("a", "1")].into_iter().collect();
        let a2: Map = [("a", "2")].into_iter().collect();
        assert!(Condition::includes("ids", a1.clone()).check(&ids));
        assert!(!Condition::excludes("ids", a1).check(&ids));
        assert!(!Condition::includes("ids", a2.clone()).check(&ids));
        assert!(Condition::excludes("ids", a2).check(&ids));
    }

    #[test]
    fn test_condition_json() {
        let schema = ovs_schema();
        let port = schema.table("Port").unwrap();

        let json = serde_json::json!(["tag", "==", 65]);
        let cond = Condition::from_json(&json, port).unwrap();
        assert_eq!(cond.function, Function::Equal);
        assert_eq!(cond.value, Value::Set([65i64].into_iter().collect()));
        assert_eq!(cond.to_json(), json);
        assert!(cond.validate(port).is_ok());

        assert!(Condition::from_json(&serde_json::json!(["tag", "=="]), port).is_err());
        assert!(Condition::from_json(&serde_json::json!(["tag", "like", 1]), port).is_err());
        assert!(Condition::from_json(&serde_json::json!(["nope", "==", 1]), port).is_err());
    }

    #[test]
    fn test_mutation_json() {
        let schema = ovs_schema();
        let iface = schema.table("Interface").unwrap();

        let json = serde_json::json!(["options", "delete", ["set", ["a", "b"]]]);
        let m = Mutation::from_json(&json, iface).unwrap();
        assert_eq!(m.mutator, Mutator::Delete);
        assert_eq!(m.value, Value::Set(["a", "b"].into_iter().collect()));
        assert!(m.validate(iface).is_ok());

        let json = serde_json::json!(["options", "insert", ["map", [["a", "1"]]]]);
        let m = Mutation::from_json(&json, iface).unwrap();
        assert!(m.validate(iface).is_ok());
        assert_eq!(m.to_json(), json);

        let root = schema.table("Open_vSwitch").unwrap();
        let m = Mutation::from_json(&serde_json::json!(["next_cfg", "+=", 1]), root).unwrap();
        assert_eq!(m, Mutation::add("next_cfg", 1i64));
        assert!(m.validate(root).is_ok());
    }
}
