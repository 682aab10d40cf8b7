use serde_json::Value;
use thiserror::Error;

/// Failure surfaced by the HTTP layer.
///
/// `Clone` so a single result can be handed to every caller joined on the same
/// in-flight request.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// Non-2xx response after retries (if any) were spent
  #[error("HTTP {status} for {url}")]
  Status {
    status: u16,
    url: String,
    payload: Value,
  },
  /// The per-attempt timer fired before a response arrived
  #[error("Request timed out after {timeout_ms}ms for {url}")]
  Timeout { timeout_ms: u64, url: String },
  /// The caller's cancellation signal fired
  #[error("Request was cancelled")]
  Cancelled,
  /// Connection-level failure after retries were spent
  #[error("Request to {url} failed: {message}")]
  Transport { url: String, message: String },
  #[error("Invalid request URL: {0}")]
  InvalidUrl(String),
  #[error("Invalid request body: {0}")]
  InvalidBody(String),
}

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Status,
  Timeout,
  Cancelled,
  Transport,
  Invalid,
}

impl ApiError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      ApiError::Status { .. } => ErrorKind::Status,
      ApiError::Timeout { .. } => ErrorKind::Timeout,
      ApiError::Cancelled => ErrorKind::Cancelled,
      ApiError::Transport { .. } => ErrorKind::Transport,
      ApiError::InvalidUrl(_) | ApiError::InvalidBody(_) => ErrorKind::Invalid,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, ApiError::Cancelled)
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, ApiError::Timeout { .. })
  }

  /// HTTP status code, if the failure came from a response.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Parsed error body returned by the server, if any.
  pub fn payload(&self) -> Option<&Value> {
    match self {
      ApiError::Status { payload, .. } => Some(payload),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_kind_classification() {
    let status = ApiError::Status {
      status: 404,
      url: "http://localhost/api/go/".to_string(),
      payload: json!({"detail": "not found"}),
    };
    assert_eq!(status.kind(), ErrorKind::Status);
    assert_eq!(status.status(), Some(404));
    assert_eq!(status.payload(), Some(&json!({"detail": "not found"})));

    let timeout = ApiError::Timeout {
      timeout_ms: 50,
      url: "http://localhost/api/go/".to_string(),
    };
    assert!(timeout.is_timeout());
    assert!(!timeout.is_cancelled());
    assert_eq!(timeout.status(), None);

    assert_eq!(ApiError::Cancelled.kind(), ErrorKind::Cancelled);
    assert_eq!(
      ApiError::InvalidUrl("nope".to_string()).kind(),
      ErrorKind::Invalid
    );
  }

  #[test]
  fn test_timeout_message_names_duration() {
    let err = ApiError::Timeout {
      timeout_ms: 20_000,
      url: "https://kaabil.net/hpinetbackend/api/results/".to_string(),
    };
    assert_eq!(
      err.to_string(),
      "Request timed out after 20000ms for https://kaabil.net/hpinetbackend/api/results/"
    );
  }
}
