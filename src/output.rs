//! Plain-text rendering of backend payloads.

use prettytable::{format::consts::FORMAT_CLEAN, row, Cell, Row, Table};
use serde::Serialize;
use serde_json::Value;

use crate::api::annotations::Column;

/// Widest a table cell may grow before it is truncated
const MAX_CELL_WIDTH: usize = 48;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
  /// Aligned columns
  #[default]
  Table,
  /// Pretty-printed JSON
  Json,
}

pub fn to_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
  serde_json::to_string_pretty(value)
}

/// Truncate to `max_len` characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Display text for a single JSON value.
pub fn cell_text(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Union of the object keys across `rows`, in first-seen order.
pub fn columns_from_rows(rows: &[Value]) -> Vec<String> {
  let mut columns: Vec<String> = Vec::new();
  for row in rows {
    if let Value::Object(map) = row {
      for key in map.keys() {
        if !columns.iter().any(|c| c == key) {
          columns.push(key.clone());
        }
      }
    }
  }
  columns
}

/// Render rows as aligned columns using the given `(key, header)` pairs.
pub fn render_table(columns: &[(&str, &str)], rows: &[Value]) -> String {
  if columns.is_empty() {
    return String::new();
  }

  let mut table = Table::new();
  table.set_format(*FORMAT_CLEAN);
  table.set_titles(Row::new(columns.iter().map(|(_, header)| Cell::new(header)).collect()));
  for row in rows {
    let cells = columns
      .iter()
      .map(|(key, _)| {
        let text = row.get(*key).map(cell_text).unwrap_or_default();
        Cell::new(&truncate(text.trim(), MAX_CELL_WIDTH))
      })
      .collect();
    table.add_row(Row::new(cells));
  }
  table.to_string()
}

/// Render rows with a fixed column set, as annotation categories declare.
pub fn render_columns(columns: &[Column], rows: &[Value]) -> String {
  let pairs: Vec<(&str, &str)> = columns.iter().map(|c| (c.key, c.header)).collect();
  render_table(&pairs, rows)
}

/// Render rows using their own keys as headers.
pub fn render_rows(rows: &[Value]) -> String {
  let columns = columns_from_rows(rows);
  let pairs: Vec<(&str, &str)> = columns.iter().map(|c| (c.as_str(), c.as_str())).collect();
  render_table(&pairs, rows)
}

/// Render a JSON document as key/value rows; nested values stay compact JSON.
pub fn render_document(value: &Value) -> String {
  match value {
    Value::Object(map) => {
      let mut table = Table::new();
      table.set_format(*FORMAT_CLEAN);
      for (key, value) in map {
        table.add_row(row![key, cell_text(value)]);
      }
      table.to_string()
    }
    Value::Array(rows) => render_rows(rows),
    other => format!("{}\n", cell_text(other)),
  }
}

/// "Showing 11-20 of 51" for rows starting at zero-based `offset`.
pub fn page_summary(offset: u64, shown: usize, total: u64) -> String {
  if shown == 0 {
    return format!("No rows (total {})", total);
  }
  let first = offset + 1;
  let last = first + shown as u64 - 1;
  format!("Showing {}-{} of {}", first, last, total)
}
