//! Request keys and normalized response shapes for the HPInet backend.

use serde::Serialize;
use serde_json::Value;

use super::annotations::AnnotationKind;

/// Default page size for result and annotation listings
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Edge chunk requested per network call
pub const NETWORK_CHUNK_SIZE: u32 = 5000;

/// Most edges kept when loading a whole network chunk by chunk
pub const NETWORK_MAX_EDGES: usize = 20_000;

/// Paged rows as returned by list endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PagedResponse {
  pub results: Vec<Value>,
  pub total: u64,
}

/// Interactome rows plus per-species hit counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DomainResults {
  pub results: Vec<Value>,
  pub total: u64,
  pub hostcount: u64,
  pub pathogencount: u64,
  pub resultid: String,
}

/// Every annotation category for one host/pathogen protein pair
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotationBundle {
  pub hgo: Vec<Value>,
  pub pgo: Vec<Value>,
  pub hkegg: Vec<Value>,
  pub pkegg: Vec<Value>,
  pub hlocal: Vec<Value>,
  pub plocal: Vec<Value>,
  pub htf: Vec<Value>,
  pub peff: Vec<Value>,
  pub hint: Vec<Value>,
  pub pint: Vec<Value>,
}

impl AnnotationBundle {
  /// Named sections in display order.
  pub fn sections(&self) -> [(&'static str, &[Value]); 10] {
    [
      ("Host GO", &self.hgo),
      ("Pathogen GO", &self.pgo),
      ("Host KEGG", &self.hkegg),
      ("Pathogen KEGG", &self.pkegg),
      ("Host localization", &self.hlocal),
      ("Pathogen localization", &self.plocal),
      ("Host transcription factors", &self.htf),
      ("Pathogen effectors", &self.peff),
      ("Host InterPro", &self.hint),
      ("Pathogen InterPro", &self.pint),
    ]
  }

  pub fn total_rows(&self) -> usize {
    self.sections().iter().map(|(_, rows)| rows.len()).sum()
  }
}

/// A page of a stored prediction result
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsQuery {
  pub result_id: String,
  pub category: String,
  pub page: u32,
  pub size: u32,
  /// Server-side text filter (`q`)
  pub filter: Option<String>,
}

impl ResultsQuery {
  pub fn new(result_id: impl Into<String>, category: impl Into<String>) -> Self {
    Self {
      result_id: result_id.into(),
      category: category.into(),
      page: 0,
      size: DEFAULT_PAGE_SIZE,
      filter: None,
    }
  }
}

/// A chunk of the interaction network for a stored result
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkQuery {
  pub result_id: String,
  pub category: String,
  pub limit: u32,
  pub offset: u32,
  pub sort: String,
}

impl NetworkQuery {
  pub fn new(result_id: impl Into<String>, category: impl Into<String>) -> Self {
    Self {
      result_id: result_id.into(),
      category: category.into(),
      limit: NETWORK_CHUNK_SIZE,
      offset: 0,
      sort: "confidence_desc".to_string(),
    }
  }
}

/// A page of one annotation category for one species
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationQuery {
  pub kind: &'static AnnotationKind,
  pub species: String,
  /// `host` or `pathogen`; ignored by kinds that are pathogen-only
  pub sptype: String,
  pub page: u32,
  pub size: u32,
}

impl AnnotationQuery {
  pub fn new(kind: &'static AnnotationKind, species: impl Into<String>) -> Self {
    Self {
      kind,
      species: species.into(),
      sptype: "host".to_string(),
      page: 0,
      size: DEFAULT_PAGE_SIZE,
    }
  }
}

/// A host/pathogen species combination
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesPair {
  pub host: String,
  pub pathogen: String,
}

/// One host protein and one pathogen protein
#[derive(Debug, Clone, PartialEq)]
pub struct ProteinPair {
  pub host: String,
  pub pathogen: String,
  pub hid: String,
  pub pid: String,
}

/// Protein pair for the sequence endpoint, which expects lower-case species.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencePair(ProteinPair);

impl SequencePair {
  pub fn new(pair: ProteinPair) -> Self {
    Self(ProteinPair {
      host: pair.host.to_lowercase(),
      pathogen: pair.pathogen.to_lowercase(),
      ..pair
    })
  }

  pub fn pair(&self) -> &ProteinPair {
    &self.0
  }
}

/// Body of an interactome (`/api/domain_results/`) search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainQuery {
  /// `{host}_{pathogen}`
  pub species: String,
  pub page: u32,
  pub size: u32,
  pub genes: Vec<String>,
  pub idt: String,
  /// Domain databases, upper-cased
  pub intdb: Vec<String>,
  pub keyword: String,
  #[serde(rename = "searchType")]
  pub search_type: String,
  pub q: String,
}

impl DomainQuery {
  pub fn new(host: &str, pathogen: &str) -> Self {
    Self {
      species: format!("{}_{}", host, pathogen),
      page: 0,
      size: DEFAULT_PAGE_SIZE,
      genes: Vec::new(),
      idt: String::new(),
      intdb: Vec::new(),
      keyword: String::new(),
      search_type: "protein".to_string(),
      q: String::new(),
    }
  }

  /// Set the domain databases, normalizing to upper case.
  pub fn with_databases<I, S>(mut self, databases: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self.intdb = databases
      .into_iter()
      .map(|db| db.as_ref().trim().to_uppercase())
      .filter(|db| !db.is_empty())
      .collect();
    self
  }
}

/// Long-running prediction jobs accepted by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SubmissionKind {
  /// Interolog / domain-based prediction (`/api/ppi/`)
  Interolog,
  /// GO semantic similarity (`/api/goppi/`)
  GoSimilarity,
  /// Phylogenetic profiling (`/api/phyloppi/`)
  Phylo,
}
