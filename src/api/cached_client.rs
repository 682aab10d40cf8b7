//! Cached HPInet client that hands out bound queries over shared caches.

use color_eyre::Result;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::QueryCache;
use crate::config::Config;
use crate::http::ApiError;
use crate::query::Query;

use super::client::HpinetClient;
use super::types::{
  AnnotationBundle, AnnotationQuery, DomainQuery, DomainResults, NetworkQuery, PagedResponse,
  ProteinPair, ResultsQuery, SequencePair, SpeciesPair, SubmissionKind,
};

const RESULTS_STALE_TIME: Duration = Duration::from_secs(15);
const NETWORK_STALE_TIME: Duration = Duration::from_secs(60);
const ANNOTATIONS_STALE_TIME: Duration = Duration::from_secs(45);
const SNAPSHOT_STALE_TIME: Duration = Duration::from_secs(60);
const BUNDLE_STALE_TIME: Duration = Duration::from_secs(30);
const SEQUENCE_STALE_TIME: Duration = Duration::from_secs(60);

/// HPInet client with transparent caching.
///
/// Every read endpoint gets a [`Query`] factory; queries made from the same
/// client (or its clones) share caches and in-flight requests. Submissions are
/// never cached.
#[derive(Clone)]
pub struct CachedHpinetClient {
  inner: HpinetClient,
  pages: QueryCache<PagedResponse>,
  domains: QueryCache<DomainResults>,
  documents: QueryCache<Value>,
  bundles: QueryCache<AnnotationBundle>,
}

impl CachedHpinetClient {
  pub fn new(config: &Config) -> Result<Self> {
    let inner = HpinetClient::new(&config.api)?;
    Ok(Self::from_client(inner, config.cache.max_entries))
  }

  pub fn from_client(inner: HpinetClient, max_entries: Option<usize>) -> Self {
    Self {
      inner,
      pages: QueryCache::bounded(max_entries),
      domains: QueryCache::bounded(max_entries),
      documents: QueryCache::bounded(max_entries),
      bundles: QueryCache::bounded(max_entries),
    }
  }

  pub fn inner(&self) -> &HpinetClient {
    &self.inner
  }

  pub fn results_query(&self) -> Query<ResultsQuery, PagedResponse> {
    let inner = self.inner.clone();
    Query::new(self.pages.clone(), move |query: &ResultsQuery, signal| {
      let inner = inner.clone();
      let query = query.clone();
      async move { inner.get_results(&query, signal).await }
    })
    .with_stale_time(RESULTS_STALE_TIME)
  }

  pub fn network_query(&self) -> Query<NetworkQuery, PagedResponse> {
    let inner = self.inner.clone();
    Query::new(self.pages.clone(), move |query: &NetworkQuery, signal| {
      let inner = inner.clone();
      let query = query.clone();
      async move { inner.get_network(&query, signal).await }
    })
    .with_stale_time(NETWORK_STALE_TIME)
  }

  pub fn domain_results_query(&self) -> Query<DomainQuery, DomainResults> {
    let inner = self.inner.clone();
    Query::new(self.domains.clone(), move |query: &DomainQuery, signal| {
      let inner = inner.clone();
      let query = query.clone();
      async move { inner.post_domain_results(&query, signal).await }
    })
    .with_stale_time(RESULTS_STALE_TIME)
  }

  pub fn annotations_query(&self) -> Query<AnnotationQuery, PagedResponse> {
    let inner = self.inner.clone();
    Query::new(self.pages.clone(), move |query: &AnnotationQuery, signal| {
      let inner = inner.clone();
      let query = query.clone();
      async move { inner.get_annotations(&query, signal).await }
    })
    .with_stale_time(ANNOTATIONS_STALE_TIME)
  }

  pub fn plant_snapshot_query(&self) -> Query<SpeciesPair, Value> {
    let inner = self.inner.clone();
    Query::new(self.documents.clone(), move |pair: &SpeciesPair, signal| {
      let inner = inner.clone();
      let pair = pair.clone();
      async move { inner.get_plant_snapshot(&pair, signal).await }
    })
    .with_stale_time(SNAPSHOT_STALE_TIME)
  }

  pub fn annotation_bundle_query(&self) -> Query<ProteinPair, AnnotationBundle> {
    let inner = self.inner.clone();
    Query::new(self.bundles.clone(), move |pair: &ProteinPair, signal| {
      let inner = inner.clone();
      let pair = pair.clone();
      async move { inner.get_annotation_bundle(&pair, signal).await }
    })
    .with_stale_time(BUNDLE_STALE_TIME)
  }

  // Sequence pairs share the document cache with snapshots; the keys are
  // distinct types with distinct prefixes.
  pub fn sequence_pair_query(&self) -> Query<SequencePair, Value> {
    let inner = self.inner.clone();
    Query::new(self.documents.clone(), move |pair: &SequencePair, signal| {
      let inner = inner.clone();
      let pair = pair.clone();
      async move { inner.get_sequence_pair(&pair, signal).await }
    })
    .with_stale_time(SEQUENCE_STALE_TIME)
  }

  /// Submit a prediction job. Bypasses the caches.
  pub async fn submit(
    &self,
    kind: SubmissionKind,
    body: Value,
    signal: CancellationToken,
  ) -> Result<String, ApiError> {
    self.inner.submit(kind, body, signal).await
  }

  /// Drop every cached response.
  pub fn clear(&self) {
    self.pages.clear();
    self.domains.clear();
    self.documents.clear();
    self.bundles.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ApiConfig;
  use httpmock::prelude::*;
  use serde_json::json;

  fn client_for(server: &MockServer) -> CachedHpinetClient {
    let config = ApiConfig {
      base_url: server.base_url(),
      retry_delay_ms: 1,
      ..ApiConfig::default()
    };
    CachedHpinetClient::from_client(HpinetClient::new(&config).unwrap(), Some(16))
  }

  #[tokio::test]
  async fn test_queries_share_cached_results() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(GET).path("/api/results/");
        then
          .status(200)
          .json_body(json!({"results": [{"Host_Protein": "A"}], "total": 1}));
      })
      .await;

    let client = client_for(&server);
    let key = ResultsQuery::new("hpinet-1", "interolog");

    let mut first = client.results_query();
    first.bind(key.clone(), true);
    assert_eq!(first.settled().await.data().map(|p| p.total), Some(1));

    let mut second = client.clone().results_query();
    second.bind(key, true);
    assert_eq!(second.settled().await.data().map(|p| p.total), Some(1));

    mock.assert_hits_async(1).await;
  }

  #[tokio::test]
  async fn test_clear_forces_refetch() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(GET).path("/api/plant_snapshot/");
        then.status(200).json_body(json!({"pathogen": "tindica"}));
      })
      .await;

    let client = client_for(&server);
    let pair = SpeciesPair {
      host: "wheat".to_string(),
      pathogen: "tindica".to_string(),
    };

    let mut query = client.plant_snapshot_query();
    query.bind(pair.clone(), true);
    query.settled().await;

    client.clear();

    let mut again = client.plant_snapshot_query();
    again.bind(pair, true);
    assert_eq!(
      again.settled().await.data(),
      Some(&json!({"pathogen": "tindica"}))
    );

    mock.assert_hits_async(2).await;
  }

  #[tokio::test]
  async fn test_disabled_query_sends_nothing() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(GET).path("/api/annotation/");
        then.status(200).json_body(json!({}));
      })
      .await;

    let client = client_for(&server);
    let mut query = client.annotation_bundle_query();
    query.bind(
      ProteinPair {
        host: "wheat".to_string(),
        pathogen: "tindica".to_string(),
        hid: String::new(),
        pid: String::new(),
      },
      false,
    );

    assert!(!query.is_loading());
    assert!(query.data().is_none());
    mock.assert_hits_async(0).await;
  }

  #[tokio::test]
  async fn test_errors_are_not_cached() {
    let server = MockServer::start_async().await;
    let mut failing = server
      .mock_async(|when, then| {
        when.method(POST).path("/api/domain_results/");
        then.status(500);
      })
      .await;

    let client = client_for(&server);
    let key = DomainQuery::new("wheat", "tindica");

    let mut query = client.domain_results_query();
    query.bind(key.clone(), true);
    let state = query.settled().await;
    assert_eq!(state.error().and_then(|e| e.status()), Some(500));
    // Initial attempt plus two retries
    failing.assert_hits_async(3).await;
    failing.delete_async().await;

    server
      .mock_async(|when, then| {
        when.method(POST).path("/api/domain_results/");
        then.status(200).json_body(json!({"results": [], "hostcount": 2}));
      })
      .await;

    let mut retry = client.domain_results_query();
    retry.bind(key, true);
    assert_eq!(retry.settled().await.data().map(|d| d.hostcount), Some(2));
  }
}
