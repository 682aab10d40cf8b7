use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::error::ApiError;
use super::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::config::ApiConfig;

/// Statuses that are worth another attempt.
const RETRIABLE_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// Per-client defaults applied when a request does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDefaults {
  pub retries: u32,
  /// Base delay, doubled on each subsequent attempt
  pub retry_delay: Duration,
  /// Per-attempt timeout; zero disables the timer
  pub timeout: Duration,
}

impl Default for RequestDefaults {
  fn default() -> Self {
    Self {
      retries: 2,
      retry_delay: Duration::from_millis(350),
      timeout: Duration::from_secs(20),
    }
  }
}

/// Options for a single [`HttpClient::request`] call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  pub method: Method,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub headers: HeaderMap,
  pub signal: CancellationToken,
  pub retries: Option<u32>,
  pub retry_delay: Option<Duration>,
  pub timeout: Option<Duration>,
}

impl RequestOptions {
  pub fn get() -> Self {
    Self::default()
  }

  pub fn post(body: Value) -> Self {
    Self {
      method: Method::POST,
      body: Some(body),
      ..Self::default()
    }
  }

  /// Add a query parameter. Empty values are dropped when the URL is built.
  pub fn query(mut self, name: &str, value: impl ToString) -> Self {
    self.query.push((name.to_string(), value.to_string()));
    self
  }

  /// Add a query parameter only if a value is present.
  pub fn query_opt<V: ToString>(self, name: &str, value: Option<V>) -> Self {
    match value {
      Some(value) => self.query(name, value),
      None => self,
    }
  }

  pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn signal(mut self, signal: CancellationToken) -> Self {
    self.signal = signal;
    self
  }

  pub fn retries(mut self, retries: u32) -> Self {
    self.retries = Some(retries);
    self
  }

  pub fn retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = Some(delay);
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// Outcome of one attempt that did not produce a response.
enum AttemptError {
  TimedOut,
  Cancelled,
  Failed(String),
}

/// JSON-over-HTTP client with retries, timeouts, and cancellation.
#[derive(Clone)]
pub struct HttpClient {
  transport: Arc<dyn Transport>,
  base_url: String,
  defaults: RequestDefaults,
}

impl HttpClient {
  /// Create a client that talks to the configured backend over `reqwest`.
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("hpinet/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self::with_transport(
      config.base_url.clone(),
      config.request_defaults(),
      Arc::new(ReqwestTransport::new(client)),
    ))
  }

  pub fn with_transport(
    base_url: impl Into<String>,
    defaults: RequestDefaults,
    transport: Arc<dyn Transport>,
  ) -> Self {
    Self {
      transport,
      base_url: base_url.into(),
      defaults,
    }
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  /// Join `path` onto the base URL and append the non-empty query parameters.
  ///
  /// Any sub-path on the base is kept, so `https://host/backend` + `/api/go/`
  /// becomes `https://host/backend/api/go/`. Repeated names keep the last value.
  pub fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, ApiError> {
    let base = self.base_url.trim().trim_end_matches('/');
    let raw = if path.starts_with('/') {
      format!("{}{}", base, path)
    } else {
      format!("{}/{}", base, path)
    };
    let mut url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;

    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for (name, value) in query {
      if value.is_empty() {
        continue;
      }
      match pairs.iter_mut().find(|(existing, _)| *existing == name.as_str()) {
        Some(pair) => pair.1 = value.as_str(),
        None => pairs.push((name.as_str(), value.as_str())),
      }
    }
    if !pairs.is_empty() {
      url.query_pairs_mut().extend_pairs(pairs);
    }

    Ok(url)
  }

  /// Perform a request and decode the response body.
  ///
  /// Empty bodies decode to `null`; bodies that are not JSON come back as
  /// `{"raw": text}`. Retriable statuses and connection failures are retried with
  /// exponential backoff. Timeouts and cancellation are never retried.
  pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, ApiError> {
    let url = self.build_url(path, &options.query)?;
    let retries = options.retries.unwrap_or(self.defaults.retries);
    let retry_delay = options.retry_delay.unwrap_or(self.defaults.retry_delay);
    let timeout = options.timeout.unwrap_or(self.defaults.timeout);
    let body = options
      .body
      .as_ref()
      .map(serde_json::to_vec)
      .transpose()
      .map_err(|e| ApiError::InvalidBody(e.to_string()))?;
    let headers = build_headers(&options.headers, body.is_some());
    let signal = &options.signal;

    let mut attempt = 0u32;
    loop {
      let request = HttpRequest {
        method: options.method.clone(),
        url: url.clone(),
        headers: headers.clone(),
        body: body.clone(),
      };
      debug!(method = %request.method, %url, attempt, "Sending request");

      match self.send_once(request, timeout, signal).await {
        Ok(response) if response.status.is_success() => return Ok(parse_body(&response.body)),
        Ok(response) => {
          let status = response.status.as_u16();
          if attempt < retries && RETRIABLE_STATUSES.contains(&status) {
            let delay = backoff_delay(retry_delay, attempt);
            warn!(%url, status, attempt, ?delay, "Retrying request after HTTP error");
            sleep_or_cancel(delay, signal).await?;
            attempt += 1;
            continue;
          }
          return Err(ApiError::Status {
            status,
            url: url.to_string(),
            payload: parse_body(&response.body),
          });
        }
        Err(AttemptError::TimedOut) => {
          return Err(ApiError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            url: url.to_string(),
          });
        }
        Err(AttemptError::Cancelled) => return Err(ApiError::Cancelled),
        Err(AttemptError::Failed(message)) => {
          if attempt >= retries {
            return Err(ApiError::Transport {
              url: url.to_string(),
              message,
            });
          }
          let delay = backoff_delay(retry_delay, attempt);
          warn!(%url, %message, attempt, ?delay, "Retrying request after network failure");
          sleep_or_cancel(delay, signal).await?;
          attempt += 1;
        }
      }
    }
  }

  /// Run one exchange, racing it against the timer and the caller's signal.
  async fn send_once(
    &self,
    request: HttpRequest,
    timeout: Duration,
    signal: &CancellationToken,
  ) -> Result<HttpResponse, AttemptError> {
    if signal.is_cancelled() {
      return Err(AttemptError::Cancelled);
    }

    let exchange = self.transport.send(request);
    let bounded = async {
      if timeout.is_zero() {
        return exchange.await.map_err(AttemptError::Failed);
      }
      match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result.map_err(AttemptError::Failed),
        Err(_) => Err(AttemptError::TimedOut),
      }
    };

    tokio::select! {
      biased;
      _ = signal.cancelled() => Err(AttemptError::Cancelled),
      result = bounded => result,
    }
  }
}

fn build_headers(overrides: &HeaderMap, has_body: bool) -> HeaderMap {
  let mut headers = HeaderMap::new();
  headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
  for (name, value) in overrides {
    headers.insert(name.clone(), value.clone());
  }
  if has_body && !headers.contains_key(CONTENT_TYPE) {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
  }
  headers
}

fn parse_body(text: &str) -> Value {
  if text.is_empty() {
    return Value::Null;
  }
  serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
  base.saturating_mul(2u32.saturating_pow(attempt))
}

async fn sleep_or_cancel(delay: Duration, signal: &CancellationToken) -> Result<(), ApiError> {
  tokio::select! {
    biased;
    _ = signal.cancelled() => Err(ApiError::Cancelled),
    _ = tokio::time::sleep(delay) => Ok(()),
  }
}
