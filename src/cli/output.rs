use serde::Serialize;
use serde_json::{json, Value};

use crate::cli::OutputFormat;

/// Print `data` as a JSON envelope, or as indented `key: value` lines
pub fn output_success<T: Serialize>(output_format: OutputFormat, message: &str, data: &T) -> anyhow::Result<()> {
    let data = serde_json::to_value(data)?;
    match output_format {
        OutputFormat::Json => {
            let response = json!({
                "success": true,
                "message": message,
                "data": data
            });
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
            for line in text_lines(&data, 1) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

fn text_lines(value: &Value, depth: usize) -> Vec<String> {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => map
            .iter()
            .flat_map(|(key, value)| match value {
                Value::Object(_) => {
                    let mut lines = vec![format!("{}{}:", indent, key)];
                    lines.extend(text_lines(value, depth + 1));
                    lines
                }
                other => vec![format!("{}{}: {}", indent, key, scalar(other))],
            })
            .collect(),
        other => vec![format!("{}{}", indent, scalar(other))],
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_objects_indent() {
        let lines = text_lines(&json!({ "a": "x", "b": { "c": 1 } }), 0);
        assert_eq!(lines, vec!["a: x", "b:", "  c: 1"]);
    }
}
