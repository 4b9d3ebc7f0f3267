//! Change batches delivered by `update`, `update2` and `update3`.

use crate::error::CoreError;
use crate::row::Row;
use crate::schema::{DbSchema, TableSchema};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `table -> row id -> change`.
pub type TableUpdates<T> = BTreeMap<String, BTreeMap<String, T>>;

/// A v1 row change: `old` and `new` payloads, either may be absent.
///
/// Insert has only `new`, delete has only `old`, modify has both with `new`
/// carrying the changed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub old: Option<Row>,
    pub new: Option<Row>,
}

/// A v2 row change. Exactly one kind is present.
#[derive(Debug, Clone, PartialEq)]
pub enum RowUpdate2 {
    Initial(Row),
    Insert(Row),
    Delete,
    Modify(Row),
}

impl RowUpdate2 {
    pub fn kind(&self) -> &'static str {
        match self {
            RowUpdate2::Initial(_) => "initial",
            RowUpdate2::Insert(_) => "insert",
            RowUpdate2::Delete => "delete",
            RowUpdate2::Modify(_) => "modify",
        }
    }
}

/// One decoded batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Updates {
    Update(TableUpdates<RowChange>),
    Update2(TableUpdates<RowUpdate2>),
}

impl Updates {
    /// Decodes a `table-updates` object of a `monitor` reply or `update`.
    pub fn decode_update(schema: &DbSchema, json: &Json) -> Result<Self, CoreError> {
        decode_tables(schema, json, decode_row_change).map(Updates::Update)
    }

    /// Decodes a `table-updates2` object of a `monitor_cond*` reply, `update2`
    /// or `update3`.
    pub fn decode_update2(schema: &DbSchema, json: &Json) -> Result<Self, CoreError> {
        decode_tables(schema, json, decode_row_update2).map(Updates::Update2)
    }

    pub fn empty_update2() -> Self {
        Updates::Update2(TableUpdates::new())
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Number of row changes across all tables.
    pub fn row_count(&self) -> usize {
        match self {
            Updates::Update(tables) => tables.values().map(BTreeMap::len).sum(),
            Updates::Update2(tables) => tables.values().map(BTreeMap::len).sum(),
        }
    }

    pub fn table_names(&self) -> Vec<&str> {
        match self {
            Updates::Update(tables) => tables.keys().map(String::as_str).collect(),
            Updates::Update2(tables) => tables.keys().map(String::as_str).collect(),
        }
    }
}

fn decode_tables<T>(
    schema: &DbSchema,
    json: &Json,
    decode_row: fn(&Arc<TableSchema>, &Json) -> Result<T, CoreError>,
) -> Result<TableUpdates<T>, CoreError> {
    let tables = json
        .as_object()
        .ok_or_else(|| malformed("", format!("table updates must be an object, got {}", json)))?;

    let mut out = TableUpdates::new();
    for (table_name, rows) in tables {
        let table = schema.table(table_name)?;
        let rows = rows.as_object().ok_or_else(|| {
            malformed(table_name, format!("row updates must be an object, got {}", rows))
        })?;

        let mut decoded = BTreeMap::new();
        for (uuid, change) in rows {
            decoded.insert(uuid.clone(), decode_row(table, change)?);
        }
        out.insert(table_name.clone(), decoded);
    }
    Ok(out)
}

fn decode_row_change(table: &Arc<TableSchema>, json: &Json) -> Result<RowChange, CoreError> {
    let object = json
        .as_object()
        .ok_or_else(|| malformed(table.name(), format!("row update must be an object, got {}", json)))?;

    let payload = |key: &str| -> Result<Option<Row>, CoreError> {
        match object.get(key) {
            None | Some(Json::Null) => Ok(None),
            Some(row) => Row::from_json(table.clone(), row).map(Some),
        }
    };

    let change = RowChange {
        old: payload("old")?,
        new: payload("new")?,
    };
    if change.old.is_none() && change.new.is_none() {
        return Err(malformed(table.name(), "row update has neither old nor new".to_string()));
    }
    Ok(change)
}

fn decode_row_update2(table: &Arc<TableSchema>, json: &Json) -> Result<RowUpdate2, CoreError> {
    let object = json
        .as_object()
        .ok_or_else(|| malformed(table.name(), format!("row update2 must be an object, got {}", json)))?;
    let row = |raw: &Json| Row::from_json(table.clone(), raw).ok();

    if let Some(row) = object.get("insert").and_then(row) {
        return Ok(RowUpdate2::Insert(row));
    }
    if object.contains_key("delete") {
        return Ok(RowUpdate2::Delete);
    }
    if let Some(row) = object.get("modify").and_then(row) {
        return Ok(RowUpdate2::Modify(row));
    }
    if let Some(row) = object.get("initial").and_then(row) {
        return Ok(RowUpdate2::Initial(row));
    }

    // surface the real decode error of whatever was present
    for key in ["insert", "modify", "initial"] {
        if let Some(raw) = object.get(key) {
            Row::from_json(table.clone(), raw)?;
        }
    }
    Err(malformed(table.name(), format!("row update2 has no known kind: {}", json)))
}

fn malformed(table: &str, reason: String) -> CoreError {
    CoreError::Decode {
        table: table.to_string(),
        column: String::new(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ovs_schema;
    use crate::value::{Set, Value};
    use serde_json::json;

    #[test]
    fn test_decode_update2_kinds() {
        let schema = ovs_schema();
        let json = json!({
            "Port": {
                "p1": {"initial": {"name": "p1", "tag": 10}},
                "p2": {"insert": {"name": "p2"}},
                "p3": {"delete": null},
                "p4": {"modify": {"trunks": ["set", [1, 2]]}}
            }
        });
        let updates = Updates::decode_update2(&schema, &json).unwrap();
        assert_eq!(updates.row_count(), 4);
        assert_eq!(updates.table_names(), vec!["Port"]);

        let Updates::Update2(tables) = updates else {
            panic!("expected update2");
        };
        let port = &tables["Port"];
        assert_eq!(port["p1"].kind(), "initial");
        assert_eq!(port["p2"].kind(), "insert");
        assert_eq!(port["p3"], RowUpdate2::Delete);
        match &port["p4"] {
            RowUpdate2::Modify(row) => assert_eq!(
                row.stored("trunks"),
                Some(&Value::Set(Set::from_iter([1i64, 2])))
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_update2_precedence() {
        let schema = ovs_schema();
        let json = json!({"Port": {"p1": {"modify": {"name": "x"}, "insert": {"name": "y"}}}});
        let Updates::Update2(tables) = Updates::decode_update2(&schema, &json).unwrap() else {
            panic!("expected update2");
        };
        assert_eq!(tables["Port"]["p1"].kind(), "insert");

        // an unparseable insert falls through to the next kind
        let json = json!({"Port": {"p1": {"insert": {"tag": "bad"}, "delete": {}}}});
        let Updates::Update2(tables) = Updates::decode_update2(&schema, &json).unwrap() else {
            panic!("expected update2");
        };
        assert_eq!(tables["Port"]["p1"], RowUpdate2::Delete);

        // a valid insert wins over an unparseable modify
        let json = json!({"Port": {"p1": {"insert": {"name": "y", "tag": 3}, "modify": {"tag": "bad"}}}});
        let Updates::Update2(tables) = Updates::decode_update2(&schema, &json).unwrap() else {
            panic!("expected update2");
        };
        assert_eq!(tables["Port"]["p1"].kind(), "insert");

        // an unparseable modify falls through to initial
        let json = json!({"Port": {"p1": {"modify": {"tag": "bad"}, "initial": {"name": "z"}}}});
        let Updates::Update2(tables) = Updates::decode_update2(&schema, &json).unwrap() else {
            panic!("expected update2");
        };
        assert_eq!(tables["Port"]["p1"].kind(), "initial");
    }

    #[test]
    fn test_decode_update2_errors() {
        let schema = ovs_schema();
        assert!(matches!(
            Updates::decode_update2(&schema, &json!({"Nope": {}})),
            Err(CoreError::UnknownTable { .. })
        ));
        assert!(Updates::decode_update2(&schema, &json!({"Port": {"p1": {}}})).is_err());
        assert!(Updates::decode_update2(&schema, &json!({"Port": {"p1": {"insert": {"tag": "x"}}}})).is_err());
        assert!(Updates::decode_update2(&schema, &json!([])).is_err());
    }

    #[test]
    fn test_decode_update_v1() {
        let schema = ovs_schema();
        let json = json!({
            "Bridge": {
                "b1": {"new": {"name": "br0"}},
                "b2": {"old": {"name": "br1"}},
                "b3": {"old": {"ports": ["set", []]}, "new": {"ports": ["uuid", "p1"]}}
            }
        });
        let Updates::Update(tables) = Updates::decode_update(&schema, &json).unwrap() else {
            panic!("expected update");
        };
        let bridge = &tables["Bridge"];
        assert!(bridge["b1"].old.is_none() && bridge["b1"].new.is_some());
        assert!(bridge["b2"].old.is_some() && bridge["b2"].new.is_none());
        assert!(bridge["b3"].old.is_some() && bridge["b3"].new.is_some());

        assert!(Updates::decode_update(&schema, &json!({"Bridge": {"b1": {}}})).is_err());
    }

    #[test]
    fn test_empty_batch() {
        let schema = ovs_schema();
        let updates = Updates::decode_update2(&schema, &json!({})).unwrap();
        assert!(updates.is_empty());
        assert_eq!(updates, Updates::empty_update2());
    }
}
