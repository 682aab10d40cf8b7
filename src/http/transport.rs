use futures::future::{BoxFuture, FutureExt};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

/// A fully-built request, ready to go on the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub body: Option<Vec<u8>>,
}

/// Status and raw body text of a completed exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: StatusCode,
  pub body: String,
}

/// Performs a single network exchange. Retries and timeouts live above this.
///
/// Errors are connection-level failures rendered as text; HTTP error statuses are
/// successful exchanges and come back as `Ok`.
pub trait Transport: Send + Sync {
  fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, String>>;
}

/// Production transport backed by `reqwest`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(client: reqwest::Client) -> Self {
    Self { client }
  }
}

impl Transport for ReqwestTransport {
  fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, String>> {
    async move {
      let mut builder = self
        .client
        .request(request.method, request.url)
        .headers(request.headers);
      if let Some(body) = request.body {
        builder = builder.body(body);
      }

      let response = builder.send().await.map_err(|e| e.to_string())?;
      let status = response.status();
      let body = response.text().await.map_err(|e| e.to_string())?;

      Ok(HttpResponse { status, body })
    }
    .boxed()
  }
}
