//! Monitor request sets.
//!
//! A request set maps each table to one or more requests naming the columns
//! to watch, which kinds of change to report and, for the conditional
//! generations, a server-side row filter.

use crate::condition::Condition;
use crate::error::CoreError;
use crate::schema::DbSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Which kinds of change a request reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Select {
    pub initial: bool,
    pub insert: bool,
    pub delete: bool,
    pub modify: bool,
}

impl Default for Select {
    fn default() -> Self {
        Self {
            initial: true,
            insert: true,
            delete: true,
            modify: true,
        }
    }
}

impl Select {
    /// No kinds selected.
    pub fn none() -> Self {
        Self {
            initial: false,
            insert: false,
            delete: false,
            modify: false,
        }
    }

    pub fn any(&self) -> bool {
        self.initial || self.insert || self.delete || self.modify
    }

    pub fn updates(&self) -> bool {
        self.insert || self.delete || self.modify
    }

    pub fn to_json(&self) -> Json {
        json!({
            "initial": self.initial,
            "insert": self.insert,
            "delete": self.delete,
            "modify": self.modify,
        })
    }
}

/// One request for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorRequest {
    /// Columns to report; empty means all.
    pub columns: Vec<String>,
    pub where_: Option<Vec<Condition>>,
    pub select: Option<Select>,
}

impl MonitorRequest {
    /// A request for every column and every kind of change.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_where(mut self, conditions: Vec<Condition>) -> Self {
        self.where_ = Some(conditions);
        self
    }

    pub fn with_select(mut self, select: Select) -> Self {
        self.select = Some(select);
        self
    }

    pub fn is_all_columns(&self) -> bool {
        self.columns.is_empty()
    }

    fn effective_select(&self) -> Select {
        self.select.unwrap_or_default()
    }

    pub fn to_json(&self) -> Json {
        let mut object = JsonMap::new();
        if !self.columns.is_empty() {
            object.insert("columns".to_string(), json!(self.columns));
        }
        if let Some(conditions) = &self.where_ {
            let conditions: Vec<Json> = conditions.iter().map(Condition::to_json).collect();
            object.insert("where".to_string(), Json::Array(conditions));
        }
        if let Some(select) = &self.select {
            object.insert("select".to_string(), select.to_json());
        }
        Json::Object(object)
    }
}

/// Protocol generation used to establish a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    /// `monitor`, updates arrive as `update`.
    Plain,
    /// `monitor_cond`, updates arrive as `update2`.
    Conditional,
    /// `monitor_cond_since`, updates arrive as `update3` with a txn id.
    #[default]
    ConditionalSince,
}

impl Generation {
    /// Method that establishes a subscription of this generation.
    pub fn method(&self) -> &'static str {
        match self {
            Generation::Plain => "monitor",
            Generation::Conditional => "monitor_cond",
            Generation::ConditionalSince => "monitor_cond_since",
        }
    }

    /// Notification that carries updates for this generation.
    pub fn notification(&self) -> &'static str {
        match self {
            Generation::Plain => "update",
            Generation::Conditional => "update2",
            Generation::ConditionalSince => "update3",
        }
    }

    pub fn is_conditional(&self) -> bool {
        !matches!(self, Generation::Plain)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plain" | "monitor" => Some(Generation::Plain),
            "conditional" | "monitor_cond" => Some(Generation::Conditional),
            "conditional_since" | "monitor_cond_since" => Some(Generation::ConditionalSince),
            _ => None,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// The full request set of one subscription.
#[derive(Debug, Clone)]
pub struct MonitorRequests {
    schema: Arc<DbSchema>,
    generation: Generation,
    tables: BTreeMap<String, Vec<MonitorRequest>>,
}

impl MonitorRequests {
    pub fn new(schema: Arc<DbSchema>, generation: Generation) -> Self {
        Self {
            schema,
            generation,
            tables: BTreeMap::new(),
        }
    }

    /// Adds a request for `table`. Validation is deferred to [`validate`].
    ///
    /// [`validate`]: MonitorRequests::validate
    pub fn add(mut self, table: impl Into<String>, request: MonitorRequest) -> Self {
        self.tables.entry(table.into()).or_default().push(request);
        self
    }

    pub fn schema(&self) -> &Arc<DbSchema> {
        &self.schema
    }

    /// The same requests bound to a newer schema of the same database,
    /// validated against it.
    pub fn with_schema(&self, schema: Arc<DbSchema>) -> Result<Self, CoreError> {
        if schema.name() != self.schema.name() {
            return Err(CoreError::invalid_request(format!(
                "requests for {} cannot move to schema {}",
                self.schema.name(),
                schema.name()
            )));
        }
        let rebound = Self {
            schema,
            generation: self.generation,
            tables: self.tables.clone(),
        };
        rebound.validate()?;
        Ok(rebound)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[MonitorRequest])> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Checks the request set against the schema.
    ///
    /// Every table and column must exist. A table may carry a single
    /// all-columns request or any number of explicit ones, and no column may
    /// be requested twice. A select block must enable something, and every
    /// filter condition must type-check. Filters need a conditional
    /// generation.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.tables.is_empty() {
            return Err(CoreError::invalid_request("no tables requested"));
        }

        for (table_name, requests) in &self.tables {
            let table = self.schema.table(table_name)?;
            if requests.is_empty() {
                return Err(CoreError::invalid_request(format!(
                    "table {} has no requests",
                    table_name
                )));
            }

            let all_columns = requests.iter().filter(|r| r.is_all_columns()).count();
            if all_columns > 1 {
                return Err(CoreError::invalid_request(format!(
                    "table {} has more than one all-columns request",
                    table_name
                )));
            }
            if all_columns == 1 && requests.len() > 1 {
                return Err(CoreError::invalid_request(format!(
                    "table {} mixes an all-columns request with explicit columns",
                    table_name
                )));
            }

            let mut seen = BTreeSet::new();
            for request in requests {
                for column in &request.columns {
                    table.column(column)?;
                    if !seen.insert(column.as_str()) {
                        return Err(CoreError::invalid_request(format!(
                            "column {}.{} requested more than once",
                            table_name, column
                        )));
                    }
                }

                if let Some(select) = &request.select {
                    if !select.any() {
                        return Err(CoreError::invalid_request(format!(
                            "select for table {} enables nothing",
                            table_name
                        )));
                    }
                }

                if let Some(conditions) = &request.where_ {
                    if !self.generation.is_conditional() {
                        return Err(CoreError::invalid_request(format!(
                            "table {} has a where clause but {} cannot filter",
                            table_name, self.generation
                        )));
                    }
                    for condition in conditions {
                        condition.validate(table)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns true if any request asks for the initial contents.
    pub fn has_initial(&self) -> bool {
        self.requests().any(|r| r.effective_select().initial)
    }

    /// Returns true if any request asks for ongoing changes.
    pub fn has_updates(&self) -> bool {
        self.requests().any(|r| r.effective_select().updates())
    }

    /// The same requests with initial contents suppressed everywhere.
    pub fn without_initial(&self) -> Self {
        let mut renewal = self.clone();
        for request in renewal.tables.values_mut().flatten() {
            let mut select = request.effective_select();
            select.initial = false;
            request.select = Some(select);
        }
        renewal
    }

    pub fn to_json(&self) -> Json {
        let object: JsonMap<String, Json> = self
            .tables
            .iter()
            .map(|(table, requests)| {
                let requests: Vec<Json> = requests.iter().map(MonitorRequest::to_json).collect();
                (table.clone(), Json::Array(requests))
            })
            .collect();
        Json::Object(object)
    }

    fn requests(&self) -> impl Iterator<Item = &MonitorRequest> {
        self.tables.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ovs_schema, upgraded_ovs_schema};

    fn requests(generation: Generation) -> MonitorRequests {
        MonitorRequests::new(ovs_schema(), generation)
    }

    #[test]
    fn test_valid_requests() {
        let reqs = requests(Generation::Conditional)
            .add("Bridge", MonitorRequest::all())
            .add(
                "Port",
                MonitorRequest::columns(["name", "tag"])
                    .with_where(vec![Condition::equal("tag", 65i64)]),
            )
            .add("Port", MonitorRequest::columns(["trunks"]));
        reqs.validate().unwrap();
        assert!(reqs.has_initial());
        assert!(reqs.has_updates());
        assert_eq!(reqs.table_names().collect::<Vec<_>>(), vec!["Bridge", "Port"]);
    }

    #[test]
    fn test_two_all_columns_requests_rejected() {
        let reqs = requests(Generation::Plain)
            .add("Bridge", MonitorRequest::all())
            .add("Bridge", MonitorRequest::all());
        assert!(matches!(
            reqs.validate(),
            Err(CoreError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_all_columns_mixed_with_explicit_rejected() {
        let reqs = requests(Generation::Plain)
            .add("Bridge", MonitorRequest::all())
            .add("Bridge", MonitorRequest::columns(["name"]));
        assert!(matches!(
            reqs.validate(),
            Err(CoreError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let reqs = requests(Generation::Plain).add("Bridge", MonitorRequest::columns(["name", "name"]));
        assert!(reqs.validate().is_err());

        let reqs = requests(Generation::Plain)
            .add("Bridge", MonitorRequest::columns(["name"]))
            .add("Bridge", MonitorRequest::columns(["ports", "name"]));
        assert!(reqs.validate().is_err());
    }

    #[test]
    fn test_unknown_table_and_column() {
        let reqs = requests(Generation::Plain).add("Nope", MonitorRequest::all());
        assert!(matches!(
            reqs.validate(),
            Err(CoreError::UnknownTable { .. })
        ));

        let reqs = requests(Generation::Plain).add("Bridge", MonitorRequest::columns(["nope"]));
        assert!(matches!(
            reqs.validate(),
            Err(CoreError::UnknownColumn { .. })
        ));

        assert!(requests(Generation::Plain).validate().is_err());
    }

    #[test]
    fn test_empty_select_rejected() {
        let reqs = requests(Generation::Plain)
            .add("Bridge", MonitorRequest::all().with_select(Select::none()));
        assert!(reqs.validate().is_err());
    }

    #[test]
    fn test_where_checked() {
        let reqs = requests(Generation::ConditionalSince).add(
            "Port",
            MonitorRequest::all().with_where(vec![Condition::less_than("trunks", 5i64)]),
        );
        assert!(matches!(
            reqs.validate(),
            Err(CoreError::InvalidCondition { .. })
        ));

        let reqs = requests(Generation::Plain).add(
            "Port",
            MonitorRequest::all().with_where(vec![Condition::equal("tag", 1i64)]),
        );
        assert!(matches!(
            reqs.validate(),
            Err(CoreError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_aggregate_flags() {
        let initial_only = Select {
            initial: true,
            ..Select::none()
        };
        let reqs = requests(Generation::Plain)
            .add("Bridge", MonitorRequest::all().with_select(initial_only));
        assert!(reqs.has_initial());
        assert!(!reqs.has_updates());

        let renewal = reqs.without_initial();
        assert!(!renewal.has_initial());
        assert!(renewal.validate().is_err());
    }

    #[test]
    fn test_without_initial_synthesizes_select() {
        let reqs = requests(Generation::Conditional)
            .add("Bridge", MonitorRequest::columns(["name"]))
            .add(
                "Port",
                MonitorRequest::all().with_select(Select {
                    modify: false,
                    ..Select::default()
                }),
            );

        let renewal = reqs.without_initial();
        renewal.validate().unwrap();
        assert!(!renewal.has_initial());
        assert!(renewal.has_updates());

        let json = renewal.to_json();
        assert_eq!(
            json["Bridge"][0],
            json!({
                "columns": ["name"],
                "select": {"initial": false, "insert": true, "delete": true, "modify": true}
            })
        );
        assert_eq!(json["Port"][0]["select"]["modify"], json!(false));

        // the original is untouched
        assert_eq!(reqs.to_json()["Bridge"][0], json!({"columns": ["name"]}));
    }

    #[test]
    fn test_request_json() {
        let reqs = requests(Generation::Conditional).add(
            "Interface",
            MonitorRequest::columns(["name"]).with_where(vec![Condition::equal("name", "eth0")]),
        );
        assert_eq!(
            reqs.to_json(),
            json!({"Interface": [{"columns": ["name"], "where": [["name", "==", "eth0"]]}]})
        );
    }

    #[test]
    fn test_generation_methods() {
        assert_eq!(Generation::Plain.method(), "monitor");
        assert_eq!(Generation::Conditional.notification(), "update2");
        assert_eq!(Generation::parse("conditional_since"), Some(Generation::ConditionalSince));
        assert_eq!(Generation::parse("monitor_cond"), Some(Generation::Conditional));
        assert_eq!(Generation::parse("x"), None);
    }

    #[test]
    fn test_with_schema_revalidates() {
        let stale = requests(Generation::Conditional)
            .add("Port", MonitorRequest::columns(["name", "tag"]))
            .add("NetFlow", MonitorRequest::all());
        // NetFlow is gone from the upgraded schema
        assert!(stale.with_schema(upgraded_ovs_schema()).is_err());

        let reqs = requests(Generation::Conditional)
            .add("Port", MonitorRequest::columns(["name", "tag"]));
        let rebound = reqs.with_schema(upgraded_ovs_schema()).unwrap();
        assert_eq!(rebound.schema().version(), "8.4.0");
        assert_eq!(rebound.generation(), Generation::Conditional);
        assert_eq!(rebound.to_json(), reqs.to_json());
    }
}
