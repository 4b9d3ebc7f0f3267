//! Shared fixtures for tests and benchmarks.

use crate::schema::DbSchema;
use std::sync::Arc;

/// A trimmed Open_vSwitch schema covering every column shape.
pub const OVS_SCHEMA: &str = r#"{
  "name": "Open_vSwitch",
  "version": "8.3.0",
  "cksum": "123 456",
  "tables": {
    "Open_vSwitch": {
      "isRoot": true,
      "maxRows": 1,
      "columns": {
        "bridges": {"type": {"key": {"type": "uuid", "refTable": "Bridge"}, "min": 0, "max": "unlimited"}},
        "cur_cfg": {"type": "integer"},
        "next_cfg": {"type": "integer"},
        "external_ids": {"type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}},
        "ovs_version": {"type": {"key": "string", "min": 0, "max": 1}}
      }
    },
    "Bridge": {
      "isRoot": true,
      "indexes": [["name"]],
      "columns": {
        "name": {"type": "string", "mutable": false},
        "ports": {"type": {"key": {"type": "uuid", "refTable": "Port"}, "min": 0, "max": "unlimited"}},
        "fail_mode": {"type": {"key": {"type": "string", "enum": ["set", ["secure", "standalone"]]}, "min": 0, "max": 1}},
        "stp_enable": {"type": "boolean"},
        "flow_tables": {"type": {"key": {"type": "integer", "minInteger": 0, "maxInteger": 254},
                                 "value": {"type": "uuid", "refTable": "Flow_Table"},
                                 "min": 0, "max": "unlimited"}},
        "other_config": {"type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}},
        "datapath_type": {"type": "string"}
      }
    },
    "Port": {
      "columns": {
        "name": {"type": "string", "mutable": false},
        "interfaces": {"type": {"key": {"type": "uuid", "refTable": "Interface"}, "min": 1, "max": "unlimited"}},
        "tag": {"type": {"key": {"type": "integer", "minInteger": 0, "maxInteger": 4095}, "min": 0, "max": 1}},
        "trunks": {"type": {"key": {"type": "integer", "minInteger": 0, "maxInteger": 4095}, "min": 0, "max": 4096}},
        "vlan_mode": {"type": {"key": {"type": "string",
                                       "enum": ["set", ["access", "native-tagged", "native-untagged", "trunk"]]},
                               "min": 0, "max": 1}},
        "statistics": {"type": {"key": "string", "value": "integer", "min": 0, "max": "unlimited"}, "ephemeral": true}
      }
    },
    "Interface": {
      "columns": {
        "name": {"type": "string", "mutable": false},
        "type": {"type": "string"},
        "admin_state": {"type": {"key": {"type": "string", "enum": ["set", ["down", "up"]]}, "min": 0, "max": 1}, "ephemeral": true},
        "mtu": {"type": {"key": "integer", "min": 0, "max": 1}, "ephemeral": true},
        "ofport": {"type": {"key": "integer", "min": 0, "max": 1}},
        "link_speed": {"type": {"key": "integer", "min": 0, "max": 1}, "ephemeral": true},
        "options": {"type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}}
      }
    },
    "NetFlow": {
      "columns": {
        "targets": {"type": {"key": {"type": "string"}, "min": 1, "max": "unlimited"}},
        "active_timeout": {"type": {"key": {"type": "integer", "minInteger": -1}}},
        "engine_id": {"type": {"key": {"type": "integer", "minInteger": 0, "maxInteger": 255}, "min": 0, "max": 1}}
      }
    },
    "Flow_Table": {
      "columns": {
        "name": {"type": {"key": "string", "min": 0, "max": 1}},
        "flow_limit": {"type": {"key": {"type": "integer", "minInteger": 0}, "min": 0, "max": 1}},
        "prefixes": {"type": {"key": {"type": "string", "maxLength": 32}, "min": 0, "max": 3}}
      }
    }
  }
}"#;

/// Parses [`OVS_SCHEMA`].
pub fn ovs_schema() -> Arc<DbSchema> {
    Arc::new(DbSchema::parse(OVS_SCHEMA).expect("fixture schema parses"))
}

/// [`OVS_SCHEMA`] one version later: `Port` gains `external_ids` and the
/// `NetFlow` table is gone.
pub fn upgraded_ovs_schema() -> Arc<DbSchema> {
    let mut json: serde_json::Value =
        serde_json::from_str(OVS_SCHEMA).expect("fixture schema is JSON");
    json["version"] = serde_json::json!("8.4.0");
    json["tables"]["Port"]["columns"]["external_ids"] = serde_json::json!({
        "type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}
    });
    if let Some(tables) = json["tables"].as_object_mut() {
        tables.remove("NetFlow");
    }
    Arc::new(DbSchema::from_json(json).expect("upgraded fixture schema parses"))
}
