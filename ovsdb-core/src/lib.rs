//! # ovsdb-core
//!
//! Data model for an OVSDB client.
//!
//! This crate provides:
//! - Typed values and their wire encoding
//! - Schema parsing and value, condition and mutation validation
//! - Schema-bound rows with delta merging
//! - Monitor request sets for the three monitor generations
//! - Update batch decoding and the replica cache they feed
//! - A validated transaction builder

pub mod condition;
pub mod error;
pub mod monitor;
pub mod replica;
pub mod row;
pub mod schema;
#[doc(hidden)]
pub mod testing;
pub mod transact;
pub mod update;
pub mod value;

pub use condition::{Condition, Function, Mutation, Mutator};
pub use error::CoreError;
pub use monitor::{Generation, MonitorRequest, MonitorRequests, Select};
pub use replica::Replica;
pub use row::Row;
pub use schema::{BaseType, ColumnSchema, ColumnType, DbSchema, Kind, RefType, TableSchema};
pub use transact::{Operation, OperationResult, Transaction, WaitUntil};
pub use update::{RowChange, RowUpdate2, TableUpdates, Updates};
pub use value::{Atom, AtomicType, Map, Reference, Set, Value};
