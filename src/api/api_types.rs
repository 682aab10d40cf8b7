//! Normalization of raw backend payloads.
//!
//! The backend is loose about shapes (rows under `results` or `data`, counts as
//! numbers or strings, ids under `resultid` or `id`), so responses are parsed as
//! JSON values and folded into the typed shapes here.

use serde_json::Value;
use std::collections::HashSet;

use super::types::{AnnotationBundle, DomainResults, PagedResponse, NETWORK_MAX_EDGES};

fn rows(raw: &Value, field: &str) -> Option<Vec<Value>> {
  raw.get(field).and_then(Value::as_array).cloned()
}

/// Read a count that may arrive as a number or a numeric string.
fn count(value: Option<&Value>) -> Option<u64> {
  match value? {
    Value::Number(n) => n
      .as_u64()
      .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn text(value: Option<&Value>) -> Option<String> {
  match value? {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Rows come from `results`, else `data`; a missing or zero `total` falls back
/// to the row count.
pub fn normalize_paged_response(raw: &Value) -> PagedResponse {
  let results = rows(raw, "results")
    .or_else(|| rows(raw, "data"))
    .unwrap_or_default();
  let total = count(raw.get("total"))
    .filter(|total| *total > 0)
    .unwrap_or(results.len() as u64);
  PagedResponse { results, total }
}

pub fn normalize_domain_results(raw: &Value) -> DomainResults {
  let page = normalize_paged_response(raw);
  DomainResults {
    results: page.results,
    total: page.total,
    hostcount: count(raw.get("hostcount")).unwrap_or(0),
    pathogencount: count(raw.get("pathogencount")).unwrap_or(0),
    resultid: text(raw.get("resultid")).unwrap_or_default(),
  }
}

pub fn normalize_annotation_bundle(raw: &Value) -> AnnotationBundle {
  let section = |field: &str| rows(raw, field).unwrap_or_default();
  AnnotationBundle {
    hgo: section("hgo"),
    pgo: section("pgo"),
    hkegg: section("hkegg"),
    pkegg: section("pkegg"),
    hlocal: section("hlocal"),
    plocal: section("plocal"),
    htf: section("htf"),
    peff: section("peff"),
    hint: section("hint"),
    pint: section("pint"),
  }
}

/// Job id from a submission response: `resultid`, then `id`, then the body
/// itself when the server answers with a bare string or number.
pub fn normalize_job_id(raw: &Value) -> String {
  text(raw.get("resultid"))
    .or_else(|| text(raw.get("id")))
    .or_else(|| text(Some(raw)))
    .unwrap_or_default()
}

/// Split user-entered lists on newlines, commas and tabs, dropping blanks.
pub fn split_list(input: &str) -> Vec<String> {
  input
    .split(['\n', '\r', ',', '\t'])
    .map(str::trim)
    .filter(|item| !item.is_empty())
    .map(String::from)
    .collect()
}

/// Identity of a network edge: its source plus the host and pathogen proteins.
pub fn edge_id(row: &Value, category: &str) -> String {
  let field = |name: &str| text(row.get(name)).unwrap_or_default();
  let host = field("Host_Protein");
  let pathogen = field("Pathogen_Protein");
  match category {
    "interolog" | "consensus" => format!("{}-{}-{}", field("intdb_x"), host, pathogen),
    "phylo" => format!("Phylo-{}-{}", host, pathogen),
    "go" | "gosim" => format!("GOsim-{}-{}", host, pathogen),
    _ => {
      let db = ["intdb", "intdb_x"]
        .iter()
        .map(|name| field(name).trim().to_string())
        .find(|db| !db.is_empty())
        .unwrap_or_else(|| "Domain".to_string());
      format!("{}-{}-{}", db, host, pathogen)
    }
  }
}

/// Network edges gathered across chunks, unique by edge and capped at
/// [`NETWORK_MAX_EDGES`].
#[derive(Debug, Default)]
pub struct EdgeSet {
  category: String,
  edges: Vec<Value>,
  seen: HashSet<String>,
}

impl EdgeSet {
  pub fn new(category: &str) -> Self {
    Self {
      category: category.to_string(),
      ..Self::default()
    }
  }

  /// Append the rows not seen before; returns how many were kept.
  pub fn extend(&mut self, rows: Vec<Value>) -> usize {
    let before = self.edges.len();
    for row in rows {
      if self.is_full() {
        break;
      }
      let field = |name: &str| text(row.get(name)).unwrap_or_default();
      let key = format!(
        "{}|{}|{}",
        edge_id(&row, &self.category),
        field("Host_Protein"),
        field("Pathogen_Protein")
      );
      if self.seen.insert(key) {
        self.edges.push(row);
      }
    }
    self.edges.len() - before
  }

  pub fn len(&self) -> usize {
    self.edges.len()
  }

  pub fn is_empty(&self) -> bool {
    self.edges.is_empty()
  }

  pub fn is_full(&self) -> bool {
    self.edges.len() >= NETWORK_MAX_EDGES
  }

  pub fn into_edges(self) -> Vec<Value> {
    self.edges
  }
}
