//! Command execution.

use crate::Commands;
use colored::Colorize;
use ovsdb_client::{Client, Delivery};
use ovsdb_core::{
    Condition, DbSchema, Generation, MonitorRequest, MonitorRequests, RowUpdate2, Select, Updates,
};
use serde_json::Value;
use std::sync::Arc;

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Monitor { .. } => Err("monitor streams its output".into()),

        Commands::ListDbs => {
            let databases = client.list_dbs().await?;
            if databases.is_empty() {
                return Ok("No databases".yellow().to_string());
            }
            Ok(databases.join("\n"))
        }

        Commands::GetSchema { database, json } => {
            if json {
                let raw = client.raw_schema(&database).await?;
                return Ok(format_json(&raw));
            }
            let schema = client.get_schema(&database).await?;
            Ok(format_schema(&schema))
        }

        Commands::Echo { args } => {
            let params: Vec<Value> = args.iter().map(|arg| parse_echo_arg(arg)).collect();
            let reply = client.echo(params).await?;
            Ok(Value::Array(reply).to_string())
        }

        Commands::Transact {
            database,
            operations,
        } => {
            let operations = match parse_json_arg(&operations)? {
                Value::Array(ops) => ops,
                single @ Value::Object(_) => vec![single],
                other => return Err(format!("operations must be a JSON array, got {}", other).into()),
            };
            let result = client.transact(&database, operations).await?;
            Ok(format_transact_result(&result))
        }
    }
}

/// Runs a monitor until Ctrl-C, printing every batch.
pub async fn monitor(client: &Client, cmd: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let Commands::Monitor {
        database,
        tables,
        columns,
        where_,
        generation,
        no_initial,
        name,
    } = cmd
    else {
        return Err("not a monitor command".into());
    };

    let schema = client.get_schema(&database).await?;
    let conditions = where_.as_deref().map(parse_json_arg).transpose()?;
    let requests = build_requests(
        schema,
        &tables,
        &columns,
        conditions.as_ref(),
        generation,
        no_initial,
    )?;

    let (initial, mut sink) = client.monitor(&name, requests).await?;
    eprintln!(
        "{} {} on {} ({} initial rows, Ctrl-C to stop)",
        "Monitoring".green(),
        name.cyan(),
        client.endpoint(),
        initial.row_count()
    );
    for line in format_updates(&initial) {
        println!("{}", line);
    }

    loop {
        tokio::select! {
            delivery = sink.recv() => match delivery {
                Some(delivery) => print_delivery(&delivery),
                None => {
                    eprintln!("{}", "Subscription closed".yellow());
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = client.monitor_cancel(&name).await {
        eprintln!("{}: {}", "Cancel failed".yellow(), e);
    }
    Ok(())
}

fn print_delivery(delivery: &Delivery) {
    if let Some(txn) = &delivery.txn_id {
        println!("{}", format!("-- txn {}", txn).dimmed());
    }
    for line in format_updates(&delivery.updates) {
        println!("{}", line);
    }
}

/// Builds the request set for `tables` of `schema`.
///
/// `conditions` is a JSON array of `[column, function, value]` triples
/// applied to every table.
fn build_requests(
    schema: Arc<DbSchema>,
    tables: &[String],
    columns: &[String],
    conditions: Option<&Value>,
    generation: Generation,
    no_initial: bool,
) -> Result<MonitorRequests, Box<dyn std::error::Error>> {
    let mut requests = MonitorRequests::new(schema.clone(), generation);

    for table_name in tables {
        let table = schema.table(table_name)?;
        let mut request = if columns.is_empty() {
            MonitorRequest::all()
        } else {
            MonitorRequest::columns(columns.iter().filter(|c| table.has_column(c)).cloned())
        };

        if let Some(conditions) = conditions {
            let items = conditions
                .as_array()
                .ok_or("conditions must be a JSON array")?;
            let parsed = items
                .iter()
                .map(|c| Condition::from_json(c, table))
                .collect::<Result<Vec<_>, _>>()?;
            request = request.with_where(parsed);
        }

        if no_initial {
            request = request.with_select(Select {
                initial: false,
                ..Select::default()
            });
        }

        requests = requests.add(table_name.as_str(), request);
    }

    requests.validate()?;
    Ok(requests)
}

/// One line per row change.
fn format_updates(updates: &Updates) -> Vec<String> {
    let mut lines = Vec::new();
    match updates {
        Updates::Update(tables) => {
            for (table, rows) in tables {
                for (uuid, change) in rows {
                    let (kind, row) = match (&change.old, &change.new) {
                        (None, Some(new)) => ("insert", Some(new)),
                        (Some(_), None) => ("delete", None),
                        (_, new) => ("modify", new.as_ref()),
                    };
                    lines.push(format_row_line(kind, table, uuid, row.map(|r| r.to_json())));
                }
            }
        }
        Updates::Update2(tables) => {
            for (table, rows) in tables {
                for (uuid, update) in rows {
                    let row = match update {
                        RowUpdate2::Initial(row)
                        | RowUpdate2::Insert(row)
                        | RowUpdate2::Modify(row) => Some(row.to_json()),
                        RowUpdate2::Delete => None,
                    };
                    lines.push(format_row_line(update.kind(), table, uuid, row));
                }
            }
        }
    }
    lines
}

fn format_row_line(kind: &str, table: &str, uuid: &str, row: Option<Value>) -> String {
    let kind = match kind {
        "initial" | "insert" => kind.green(),
        "delete" => kind.red(),
        _ => kind.yellow(),
    };
    match row {
        Some(row) => format!("{:<8} {} {} {}", kind, table.cyan(), uuid, row),
        None => format!("{:<8} {} {}", kind, table.cyan(), uuid),
    }
}

fn format_schema(schema: &DbSchema) -> String {
    let mut output = format!("{} {}\n", schema.name().bold(), schema.version());
    for table in schema.tables() {
        let root = if table.is_root() { " (root)" } else { "" };
        output.push_str(&format!("\n{}{}\n", table.name().cyan(), root));
        for column in table.columns() {
            let mut flags = Vec::new();
            if !column.is_mutable() {
                flags.push("immutable");
            }
            if column.is_ephemeral() {
                flags.push("ephemeral");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            output.push_str(&format!(
                "  {:<24} {}{}\n",
                column.name(),
                format_column_type(column.column_type()),
                flags.dimmed()
            ));
        }
    }
    output
}

fn format_column_type(ty: &ovsdb_core::ColumnType) -> String {
    let max = ty
        .max()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "unlimited".to_string());
    match ty.value() {
        Some(value) => format!(
            "{} {}->{} [{}..{}]",
            ty.kind(),
            ty.key().atomic,
            value.atomic,
            ty.min(),
            max
        ),
        None => format!("{} {} [{}..{}]", ty.kind(), ty.key().atomic, ty.min(), max),
    }
}

/// Pretty-prints a transact reply, highlighting failed operations.
fn format_transact_result(result: &Value) -> String {
    let Some(results) = result.as_array() else {
        return format_json(result);
    };
    let mut output = String::new();
    for (i, entry) in results.iter().enumerate() {
        let line = format!("[{}] {}", i, entry);
        if entry.get("error").is_some() {
            output.push_str(&line.red().to_string());
        } else {
            output.push_str(&line);
        }
        output.push('\n');
    }
    output.trim_end().to_string()
}

/// Echo arguments are JSON when they parse, plain strings otherwise.
fn parse_echo_arg(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

/// Parses a JSON argument, supporting @file syntax.
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_core::testing::ovs_schema;
    use serde_json::json;

    #[test]
    fn test_parse_echo_arg() {
        assert_eq!(parse_echo_arg("ping"), json!("ping"));
        assert_eq!(parse_echo_arg("42"), json!(42));
        assert_eq!(parse_echo_arg("[1,2]"), json!([1, 2]));
    }

    #[test]
    fn test_parse_json_arg_from_file() {
        let path = std::env::temp_dir().join(format!("ovsdb-cli-{}.json", std::process::id()));
        std::fs::write(&path, r#"[{"op":"comment","comment":"x"}]"#).unwrap();

        let value = parse_json_arg(&format!("@{}", path.display())).unwrap();
        assert_eq!(value, json!([{"op": "comment", "comment": "x"}]));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_build_requests_with_conditions() {
        let conditions = json!([["name", "==", "br0"]]);
        let requests = build_requests(
            ovs_schema(),
            &["Bridge".to_string()],
            &[],
            Some(&conditions),
            Generation::ConditionalSince,
            true,
        )
        .unwrap();

        let wire = requests.to_json();
        assert_eq!(wire["Bridge"][0]["where"], json!([["name", "==", "br0"]]));
        assert_eq!(wire["Bridge"][0]["select"]["initial"], json!(false));
    }

    #[test]
    fn test_build_requests_rejects_unknown_table() {
        let result = build_requests(
            ovs_schema(),
            &["Nope".to_string()],
            &[],
            None,
            Generation::Conditional,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_format_updates_lists_each_row() {
        let schema = ovs_schema();
        let updates = Updates::decode_update2(
            &schema,
            &json!({"Bridge": {
                "b1": {"insert": {"name": "br0"}},
                "b2": {"delete": null}
            }}),
        )
        .unwrap();

        let lines = format_updates(&updates);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("b1"));
        assert!(lines[0].contains("br0"));
        assert!(lines[1].contains("b2"));
    }

    #[test]
    fn test_format_transact_result_marks_errors() {
        let output = format_transact_result(&json!([{}, {"error": "constraint violation"}]));
        assert!(output.contains("[0] {}"));
        assert!(output.contains("constraint violation"));
    }
}
