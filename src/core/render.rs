//! CW-006: Output renderer: json, table, text.

use super::error::RenderError;
use super::types::OutputFormat;
use super::value::Value;
use std::io::Write;

/// Render `value` in `format` to `out`.
pub fn render(
    out: &mut dyn Write,
    format: OutputFormat,
    value: &Value,
    columns: &[String],
) -> Result<(), RenderError> {
    let text = match format {
        OutputFormat::Json => render_json(value)?,
        OutputFormat::Table => render_table(value, columns)?,
        OutputFormat::Text => render_text(value),
    };
    out.write_all(text.as_bytes())?;
    Ok(())
}

/// Two-space pretty JSON plus a trailing newline.
pub fn render_json(value: &Value) -> Result<String, RenderError> {
    let mut text = serde_json::to_string_pretty(&value.to_json())
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    text.push('\n');
    Ok(text)
}

/// Tab-separated table over a list of records.
///
/// Columns are the explicit list, else the first record's keys in
/// insertion order. Absent keys render as empty cells.
pub fn render_table(value: &Value, columns: &[String]) -> Result<String, RenderError> {
    let Value::List(rows) = value else {
        return Err(RenderError::NotAnArray);
    };

    let columns: Vec<String> = if columns.is_empty() {
        rows.first()
            .and_then(Value::as_map)
            .map(|first| first.keys().cloned().collect())
            .unwrap_or_default()
    } else {
        columns.to_vec()
    };

    let mut text = columns.join("\t");
    text.push('\n');
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|col| {
                row.as_map()
                    .and_then(|record| record.get(col))
                    .map(Value::to_string)
                    .unwrap_or_default()
            })
            .collect();
        text.push_str(&cells.join("\t"));
        text.push('\n');
    }
    Ok(text)
}

/// Default representation plus a newline.
pub fn render_text(value: &Value) -> String {
    format!("{}\n", value)
}
