//! Output formatting

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn print<T: Serialize>(&self, data: &T) -> anyhow::Result<()> {
        match self {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(data)?),
            OutputFormat::Table => print!("{}", render_table(&serde_json::to_value(data)?)),
        }
        Ok(())
    }
}

/// Indented `key: value` lines; nulls and empty collections are dropped
pub fn render_table(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, 0);
    if out.is_empty() {
        out.push_str("(empty)\n");
    }
    out
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    let pad = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::Null => {}
                    Value::Array(items) if items.is_empty() => {}
                    Value::Object(inner) if inner.is_empty() => {}
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(&format!("{}{}:\n", pad, key));
                        write_value(out, v, depth + 1);
                    }
                    scalar => out.push_str(&format!("{}{}: {}\n", pad, key, scalar_text(scalar))),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(&format!("{}-\n", pad));
                        write_value(out, item, depth + 1);
                    }
                    scalar => out.push_str(&format!("{}- {}\n", pad, scalar_text(scalar))),
                }
            }
        }
        scalar => out.push_str(&format!("{}{}\n", pad, scalar_text(scalar))),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_layout() {
        let value = json!({
            "ok": false,
            "checkpoint_id": null,
            "errors": ["sysctl failed"],
            "history": [],
            "report": { "decision": "ROLLBACK", "score": -55 }
        });
        let text = render_table(&value);
        assert!(text.contains("ok: false\n"));
        assert!(text.contains("errors:\n  - sysctl failed\n"));
        assert!(text.contains("report:\n  decision: ROLLBACK\n  score: -55\n"));
        assert!(!text.contains("checkpoint_id"));
        assert!(!text.contains("history"));
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(render_table(&json!([])), "(empty)\n");
    }
}
