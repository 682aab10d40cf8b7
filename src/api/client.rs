use color_eyre::Result;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ApiConfig;
use crate::http::{ApiError, HttpClient, RequestOptions};

use super::api_types::{
  normalize_annotation_bundle, normalize_domain_results, normalize_job_id,
  normalize_paged_response,
};
use super::types::{
  AnnotationBundle, AnnotationQuery, DomainQuery, DomainResults, NetworkQuery, PagedResponse,
  ProteinPair, ResultsQuery, SequencePair, SpeciesPair, SubmissionKind,
};

impl SubmissionKind {
  pub fn endpoint(self) -> &'static str {
    match self {
      SubmissionKind::Interolog => "/api/ppi/",
      SubmissionKind::GoSimilarity => "/api/goppi/",
      SubmissionKind::Phylo => "/api/phyloppi/",
    }
  }

  /// Prediction jobs run server-side before answering, far past the default timeout.
  pub fn timeout(self) -> Duration {
    match self {
      SubmissionKind::Interolog | SubmissionKind::GoSimilarity => Duration::from_secs(600),
      SubmissionKind::Phylo => Duration::from_secs(3600),
    }
  }
}

/// HPInet API client
#[derive(Clone)]
pub struct HpinetClient {
  http: HttpClient,
}

impl HpinetClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    Ok(Self::with_http(HttpClient::new(config)?))
  }

  pub fn with_http(http: HttpClient) -> Self {
    Self { http }
  }

  pub fn base_url(&self) -> &str {
    self.http.base_url()
  }

  /// Get one page of a stored prediction result
  pub async fn get_results(
    &self,
    query: &ResultsQuery,
    signal: CancellationToken,
  ) -> Result<PagedResponse, ApiError> {
    let raw = self
      .http
      .request(
        "/api/results/",
        RequestOptions::get()
          .query("results", &query.result_id)
          .query("category", &query.category)
          .query("page", query.page)
          .query("size", query.size)
          .query_opt("q", query.filter.as_deref().map(str::trim))
          .signal(signal),
      )
      .await?;
    Ok(normalize_paged_response(&raw))
  }

  /// Get a chunk of network edges for a stored prediction result
  pub async fn get_network(
    &self,
    query: &NetworkQuery,
    signal: CancellationToken,
  ) -> Result<PagedResponse, ApiError> {
    let raw = self
      .http
      .request(
        "/api/network/",
        RequestOptions::get()
          .query("results", &query.result_id)
          .query("category", &query.category)
          .query("limit", query.limit)
          .query("offset", query.offset)
          .query("sort", &query.sort)
          .signal(signal),
      )
      .await?;
    Ok(normalize_paged_response(&raw))
  }

  /// Search the interactome of a species pair
  pub async fn post_domain_results(
    &self,
    query: &DomainQuery,
    signal: CancellationToken,
  ) -> Result<DomainResults, ApiError> {
    let body = serde_json::to_value(query).map_err(|e| ApiError::InvalidBody(e.to_string()))?;
    let raw = self
      .http
      .request(
        "/api/domain_results/",
        RequestOptions::post(body).signal(signal),
      )
      .await?;
    Ok(normalize_domain_results(&raw))
  }

  /// Get one page of an annotation category
  pub async fn get_annotations(
    &self,
    query: &AnnotationQuery,
    signal: CancellationToken,
  ) -> Result<PagedResponse, ApiError> {
    let sptype = query.kind.uses_sptype.then_some(query.sptype.as_str());
    let raw = self
      .http
      .request(
        query.kind.endpoint,
        RequestOptions::get()
          .query("species", &query.species)
          .query_opt("sptype", sptype)
          .query("page", query.page)
          .query("size", query.size)
          .signal(signal),
      )
      .await?;
    Ok(normalize_paged_response(&raw))
  }

  /// Get the disease snapshot for a species pair
  pub async fn get_plant_snapshot(
    &self,
    pair: &SpeciesPair,
    signal: CancellationToken,
  ) -> Result<Value, ApiError> {
    self
      .http
      .request(
        "/api/plant_snapshot/",
        RequestOptions::get()
          .query("host", &pair.host)
          .query("pathogen", &pair.pathogen)
          .signal(signal),
      )
      .await
  }

  /// Get every annotation category for a protein pair
  pub async fn get_annotation_bundle(
    &self,
    pair: &ProteinPair,
    signal: CancellationToken,
  ) -> Result<AnnotationBundle, ApiError> {
    let raw = self
      .http
      .request(
        "/api/annotation/",
        RequestOptions::get()
          .query("host", &pair.host)
          .query("pathogen", &pair.pathogen)
          .query("hid", &pair.hid)
          .query("pid", &pair.pid)
          .signal(signal),
      )
      .await?;
    Ok(normalize_annotation_bundle(&raw))
  }

  /// Get the sequences of a protein pair.
  pub async fn get_sequence_pair(
    &self,
    sequences: &SequencePair,
    signal: CancellationToken,
  ) -> Result<Value, ApiError> {
    let pair = sequences.pair();
    self
      .http
      .request(
        "/api/sequence_pair/",
        RequestOptions::get()
          .query("host", &pair.host)
          .query("hid", &pair.hid)
          .query("pathogen", &pair.pathogen)
          .query("pid", &pair.pid)
          .signal(signal),
      )
      .await
  }

  /// Submit a prediction job and return its result id
  pub async fn submit(
    &self,
    kind: SubmissionKind,
    body: Value,
    signal: CancellationToken,
  ) -> Result<String, ApiError> {
    let raw = self
      .http
      .request(
        kind.endpoint(),
        RequestOptions::post(body)
          .timeout(kind.timeout())
          .signal(signal),
      )
      .await?;
    let job_id = normalize_job_id(&raw);
    info!(endpoint = kind.endpoint(), job_id = %job_id, "Submitted prediction job");
    Ok(job_id)
  }
}
