//! HTTP transport for the HPInet backend.
//!
//! [`HttpClient`] builds URLs against the configured base, applies default headers,
//! and retries transient failures with exponential backoff. The actual network call
//! goes through a [`Transport`], so retry and timeout behavior can be exercised
//! without a server.

mod client;
mod error;
mod transport;

pub use client::{HttpClient, RequestDefaults, RequestOptions};
pub use error::{ApiError, ErrorKind};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
