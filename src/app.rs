use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::QueryKey;
use crate::config::Config;
use crate::api::annotations::{self, AnnotationKind};
use crate::api::api_types::{split_list, EdgeSet};
use crate::api::types::{
  AnnotationQuery, DomainQuery, NetworkQuery, PagedResponse, ProteinPair, ResultsQuery,
  SequencePair, SpeciesPair, SubmissionKind, DEFAULT_PAGE_SIZE, NETWORK_CHUNK_SIZE, NETWORK_MAX_EDGES,
};
use crate::api::CachedHpinetClient;
use crate::output::{self, OutputFormat};
use crate::query::{Query, QueryState};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Show one page of a stored prediction result
  Results {
    /// Result id returned by a submission
    id: String,
    #[arg(long, default_value = "interolog")]
    category: String,
    #[arg(long, default_value_t = 0)]
    page: u32,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    size: u32,
    /// Server-side text filter
    #[arg(short = 'q', long)]
    filter: Option<String>,
  },

  /// Search the interactome of a host/pathogen pair
  Domain {
    host: String,
    pathogen: String,
    /// Seed genes, separated by commas, tabs, or newlines
    #[arg(long)]
    genes: Option<String>,
    /// Search by annotation keyword instead of genes
    #[arg(long, conflicts_with = "genes")]
    keyword: Option<String>,
    /// Which side the seed genes belong to (`host` or `pathogen`)
    #[arg(long, default_value = "host")]
    idt: String,
    /// Domain-interaction databases
    #[arg(long, value_delimiter = ',', default_value = "3did,iddi")]
    databases: Vec<String>,
    #[arg(short = 'q', long)]
    filter: Option<String>,
    #[arg(long, default_value_t = 0)]
    page: u32,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    size: u32,
  },

  /// Fetch interaction network edges for a stored result
  Network {
    id: String,
    #[arg(long, default_value = "interolog")]
    category: String,
    #[arg(long, default_value_t = NETWORK_CHUNK_SIZE)]
    limit: u32,
    #[arg(long, default_value_t = 0)]
    offset: u32,
    /// Keep requesting chunks until every edge is loaded
    #[arg(long)]
    all: bool,
  },

  /// List one annotation category for a species
  Annotations {
    /// Category name or alias (see `kinds`)
    kind: String,
    species: String,
    #[arg(long, default_value = "host")]
    sptype: String,
    #[arg(long, default_value_t = 0)]
    page: u32,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    size: u32,
  },

  /// List annotation categories, optionally matching a prefix
  Kinds { filter: Option<String> },

  /// Disease snapshot of a host/pathogen pair
  Snapshot { host: String, pathogen: String },

  /// Every annotation for one host protein and one pathogen protein
  Bundle {
    host: String,
    pathogen: String,
    hid: String,
    pid: String,
  },

  /// Sequences of one host protein and one pathogen protein
  Sequences {
    host: String,
    pathogen: String,
    hid: String,
    pid: String,
  },

  /// Submit a prediction job and print its result id
  Submit {
    #[arg(value_enum)]
    kind: SubmissionKind,
    /// JSON request body
    body: PathBuf,
  },
}

/// Runs one command against the backend and prints the outcome.
pub struct App {
  api: CachedHpinetClient,
  format: OutputFormat,
}

impl App {
  pub fn new(config: &Config, format: OutputFormat) -> Result<Self> {
    let api = CachedHpinetClient::new(config)?;
    debug!(base_url = %api.inner().base_url(), "Client ready");
    Ok(Self::from_client(api, format))
  }

  pub fn from_client(api: CachedHpinetClient, format: OutputFormat) -> Self {
    Self { api, format }
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Results {
        id,
        category,
        page,
        size,
        filter,
      } => {
        let key = ResultsQuery {
          result_id: id,
          category,
          page,
          size,
          filter,
        };
        let data = settle(self.api.results_query(), key).await?;
        self.print_page(&data, page as u64 * size as u64, None)
      }

      Command::Domain {
        host,
        pathogen,
        genes,
        keyword,
        idt,
        databases,
        filter,
        page,
        size,
      } => {
        let mut key = DomainQuery::new(&host, &pathogen).with_databases(&databases);
        key.idt = idt;
        key.page = page;
        key.size = size;
        key.q = filter.unwrap_or_default();
        match keyword {
          Some(keyword) => {
            key.search_type = "keyword".to_string();
            key.keyword = keyword.trim().to_string();
          }
          None => key.genes = split_list(genes.as_deref().unwrap_or_default()),
        }

        let data = settle(self.api.domain_results_query(), key).await?;
        match self.format {
          OutputFormat::Json => println!("{}", output::to_json(&data)?),
          OutputFormat::Table => {
            print!("{}", output::render_rows(&data.results));
            println!(
              "{} (host proteins {}, pathogen proteins {}, result {})",
              output::page_summary(page as u64 * size as u64, data.results.len(), data.total),
              data.hostcount,
              data.pathogencount,
              data.resultid
            );
          }
        }
        Ok(())
      }

      Command::Network {
        id,
        category,
        limit,
        offset,
        all,
      } => {
        let mut key = NetworkQuery::new(id, category);
        key.limit = limit;
        key.offset = offset;
        let data = if all {
          self.load_network(key).await?
        } else {
          settle(self.api.network_query(), key).await?
        };
        self.print_page(&data, offset as u64, None)
      }

      Command::Annotations {
        kind,
        species,
        sptype,
        page,
        size,
      } => {
        let kind = resolve_kind(&kind)?;
        let mut key = AnnotationQuery::new(kind, species);
        key.sptype = sptype;
        key.page = page;
        key.size = size;
        let data = settle(self.api.annotations_query(), key).await?;
        self.print_page(&data, page as u64 * size as u64, Some(kind))
      }

      Command::Kinds { filter } => {
        let kinds = annotations::get_suggestions(filter.as_deref().unwrap_or_default());
        let rows: Vec<Value> = kinds
          .iter()
          .map(|k| {
            serde_json::json!({
              "name": k.name,
              "title": k.title,
              "aliases": k.aliases.join(", "),
              "endpoint": k.endpoint,
            })
          })
          .collect();
        match self.format {
          OutputFormat::Json => println!("{}", output::to_json(&rows)?),
          OutputFormat::Table => print!(
            "{}",
            output::render_table(
              &[
                ("name", "Name"),
                ("title", "Title"),
                ("aliases", "Aliases"),
                ("endpoint", "Endpoint"),
              ],
              &rows,
            )
          ),
        }
        Ok(())
      }

      Command::Snapshot { host, pathogen } => {
        let data = settle(self.api.plant_snapshot_query(), SpeciesPair { host, pathogen }).await?;
        self.print_document(&data)
      }

      Command::Bundle {
        host,
        pathogen,
        hid,
        pid,
      } => {
        let key = ProteinPair {
          host,
          pathogen,
          hid,
          pid,
        };
        let data = settle(self.api.annotation_bundle_query(), key).await?;
        match self.format {
          OutputFormat::Json => println!("{}", output::to_json(&data)?),
          OutputFormat::Table => {
            for (title, rows) in data.sections() {
              if rows.is_empty() {
                continue;
              }
              println!("== {} ({})", title, rows.len());
              print!("{}", output::render_rows(rows));
              println!();
            }
            println!("{} annotation rows", data.total_rows());
          }
        }
        Ok(())
      }

      Command::Sequences {
        host,
        pathogen,
        hid,
        pid,
      } => {
        let key = SequencePair::new(ProteinPair {
          host,
          pathogen,
          hid,
          pid,
        });
        let data = settle(self.api.sequence_pair_query(), key).await?;
        self.print_document(&data)
      }

      Command::Submit { kind, body } => {
        let contents = std::fs::read_to_string(&body)
          .map_err(|e| eyre!("Failed to read request body {}: {}", body.display(), e))?;
        let body: Value = serde_json::from_str(&contents)
          .map_err(|e| eyre!("Request body is not valid JSON: {}", e))?;

        let signal = CancellationToken::new();
        let job_id = tokio::select! {
          result = self.api.submit(kind, body, signal.clone()) => result?,
          _ = tokio::signal::ctrl_c() => {
            signal.cancel();
            return Err(eyre!("Interrupted"));
          }
        };
        match self.format {
          OutputFormat::Json => println!("{}", output::to_json(&serde_json::json!({"resultid": job_id}))?),
          OutputFormat::Table => println!("{}", job_id),
        }
        Ok(())
      }
    }
  }

  /// Load every network chunk by rebinding one query to successive offsets.
  ///
  /// Stops on a short or empty chunk, once `total` rows have been requested,
  /// when a chunk adds no new edges, or at [`NETWORK_MAX_EDGES`].
  async fn load_network(&self, mut key: NetworkQuery) -> Result<PagedResponse> {
    let mut query = self.api.network_query();
    let mut edges = EdgeSet::new(&key.category);
    let mut total = 0;

    loop {
      let chunk = wait(&mut query, key.clone()).await?;
      let received = chunk.results.len();
      total = chunk.total;
      let added = edges.extend(chunk.results);
      info!(loaded = edges.len(), added, total, "Loaded network chunk");

      if edges.is_full() {
        warn!(max = NETWORK_MAX_EDGES, total, "Network edge limit reached");
        break;
      }
      let requested = key.offset as u64 + received as u64;
      if received == 0 || added == 0 || received < key.limit as usize || requested >= total {
        break;
      }
      key.offset += received as u32;
    }

    Ok(PagedResponse {
      results: edges.into_edges(),
      total,
    })
  }

  fn print_page(
    &self,
    data: &PagedResponse,
    offset: u64,
    kind: Option<&AnnotationKind>,
  ) -> Result<()> {
    match self.format {
      OutputFormat::Json => println!("{}", output::to_json(data)?),
      OutputFormat::Table => {
        let table = match kind {
          Some(kind) => output::render_columns(kind.columns, &data.results),
          None => output::render_rows(&data.results),
        };
        print!("{}", table);
        println!(
          "{}",
          output::page_summary(offset, data.results.len(), data.total)
        );
      }
    }
    Ok(())
  }

  fn print_document<T: Serialize>(&self, data: &T) -> Result<()> {
    match self.format {
      OutputFormat::Json => println!("{}", output::to_json(data)?),
      OutputFormat::Table => {
        let value = serde_json::to_value(data)?;
        print!("{}", output::render_document(&value));
      }
    }
    Ok(())
  }
}

fn resolve_kind(input: &str) -> Result<&'static AnnotationKind> {
  if let Some(kind) = annotations::find(input) {
    return Ok(kind);
  }
  let suggestions: Vec<&str> = annotations::get_suggestions(input)
    .iter()
    .map(|k| k.name)
    .collect();
  if suggestions.is_empty() {
    let all: Vec<&str> = annotations::ANNOTATION_KINDS.iter().map(|k| k.name).collect();
    Err(eyre!(
      "Unknown annotation kind '{}'. Available: {}",
      input,
      all.join(", ")
    ))
  } else {
    Err(eyre!(
      "Ambiguous annotation kind '{}'. Did you mean: {}",
      input,
      suggestions.join(", ")
    ))
  }
}

/// Bind a query to `key` and wait for it, giving up on Ctrl-C.
async fn settle<K, T>(mut query: Query<K, T>, key: K) -> Result<T>
where
  K: QueryKey + Clone + Send + Sync + 'static,
  T: Clone + Send + Sync + 'static,
{
  wait(&mut query, key).await
}

async fn wait<K, T>(query: &mut Query<K, T>, key: K) -> Result<T>
where
  K: QueryKey + Clone + Send + Sync + 'static,
  T: Clone + Send + Sync + 'static,
{
  debug!(query = %key.description(), "Requesting");
  query.bind(key, true);

  let state = tokio::select! {
    state = query.settled() => state.clone(),
    _ = tokio::signal::ctrl_c() => {
      return Err(eyre!("Interrupted"));
    }
  };

  into_result(state)
}

fn into_result<T>(state: QueryState<T>) -> Result<T> {
  match state {
    QueryState {
      error: Some(error), ..
    } => Err(error.into()),
    QueryState {
      data: Some(data), ..
    } => Ok(data),
    _ => Err(eyre!("Request was cancelled")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::ApiError;

  #[test]
  fn test_resolve_kind() {
    assert_eq!(resolve_kind("GO").map(|k| k.name).ok(), Some("go"));

    let err = resolve_kind("xyz").unwrap_err().to_string();
    assert!(err.contains("Available: go, kegg"));
  }

  #[test]
  fn test_into_result_prefers_error() {
    let state: QueryState<u32> = QueryState {
      data: None,
      is_loading: false,
      error: Some(ApiError::Cancelled),
    };
    assert!(into_result(state).is_err());

    let state = QueryState {
      data: Some(7),
      is_loading: false,
      error: None,
    };
    assert_eq!(into_result(state).unwrap(), 7);
  }

  mod network {
    use super::*;
    use crate::api::HpinetClient;
    use crate::config::ApiConfig;
    use httpmock::prelude::*;
    use serde_json::json;

    fn app_for(server: &MockServer) -> App {
      let config = ApiConfig {
        base_url: server.base_url(),
        retry_delay_ms: 1,
        ..ApiConfig::default()
      };
      let api = CachedHpinetClient::from_client(HpinetClient::new(&config).unwrap(), Some(16));
      App::from_client(api, OutputFormat::Json)
    }

    fn edges(from: usize, to: usize) -> Vec<Value> {
      (from..to)
        .map(|i| json!({"intdb_x": "HPIDB", "Host_Protein": format!("H{}", i), "Pathogen_Protein": "P1"}))
        .collect()
    }

    fn key(limit: u32) -> NetworkQuery {
      let mut key = NetworkQuery::new("hpinet-42", "interolog");
      key.limit = limit;
      key
    }

    #[tokio::test]
    async fn test_stops_on_short_chunk() {
      let server = MockServer::start_async().await;
      let first = server
        .mock_async(|when, then| {
          when.method(GET).path("/api/network/").query_param("offset", "0");
          then.status(200).json_body(json!({"results": edges(0, 2), "total": 100}));
        })
        .await;
      let second = server
        .mock_async(|when, then| {
          when.method(GET).path("/api/network/").query_param("offset", "2");
          then.status(200).json_body(json!({"results": edges(2, 3), "total": 100}));
        })
        .await;
      let third = server
        .mock_async(|when, then| {
          when.method(GET).path("/api/network/").query_param("offset", "3");
          then.status(200).json_body(json!({"results": edges(3, 5), "total": 100}));
        })
        .await;

      let data = app_for(&server).load_network(key(2)).await.unwrap();

      assert_eq!(data.results.len(), 3);
      assert_eq!(data.total, 100);
      first.assert_hits_async(1).await;
      second.assert_hits_async(1).await;
      third.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_stops_on_empty_chunk() {
      let server = MockServer::start_async().await;
      server
        .mock_async(|when, then| {
          when.method(GET).path("/api/network/").query_param("offset", "0");
          then.status(200).json_body(json!({"results": edges(0, 2), "total": 100}));
        })
        .await;
      let empty = server
        .mock_async(|when, then| {
          when.method(GET).path("/api/network/").query_param("offset", "2");
          then.status(200).json_body(json!({"results": [], "total": 100}));
        })
        .await;

      let data = app_for(&server).load_network(key(2)).await.unwrap();

      assert_eq!(data.results.len(), 2);
      empty.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_stops_once_total_is_requested() {
      let server = MockServer::start_async().await;
      for offset in [0, 2] {
        server
          .mock_async(|when, then| {
            when
              .method(GET)
              .path("/api/network/")
              .query_param("offset", offset.to_string().as_str());
            then
              .status(200)
              .json_body(json!({"results": edges(offset, offset + 2), "total": 4}));
          })
          .await;
      }
      let beyond = server
        .mock_async(|when, then| {
          when.method(GET).path("/api/network/").query_param("offset", "4");
          then.status(200).json_body(json!({"results": edges(4, 6), "total": 4}));
        })
        .await;

      let data = app_for(&server).load_network(key(2)).await.unwrap();

      assert_eq!(data.results.len(), 4);
      assert_eq!(data.total, 4);
      beyond.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_repeated_chunk_is_merged_once() {
      let server = MockServer::start_async().await;
      // Server that ignores the offset and always answers with the same rows.
      let mock = server
        .mock_async(|when, then| {
          when.method(GET).path("/api/network/");
          then.status(200).json_body(json!({"results": edges(0, 2), "total": 100}));
        })
        .await;

      let data = app_for(&server).load_network(key(2)).await.unwrap();

      assert_eq!(data.results, edges(0, 2));
      mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_stops_at_edge_limit() {
      let server = MockServer::start_async().await;
      let mock = server
        .mock_async(|when, then| {
          when.method(GET).path("/api/network/").query_param("offset", "0");
          then
            .status(200)
            .json_body(json!({"results": edges(0, NETWORK_MAX_EDGES + 10), "total": 50_000}));
        })
        .await;

      let data = app_for(&server)
        .load_network(key(NETWORK_MAX_EDGES as u32 + 10))
        .await
        .unwrap();

      assert_eq!(data.results.len(), NETWORK_MAX_EDGES);
      assert_eq!(data.total, 50_000);
      mock.assert_hits_async(1).await;
    }
  }
}
