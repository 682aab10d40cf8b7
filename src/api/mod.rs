//! HPInet backend: endpoints, response normalization, and cached queries.

pub mod annotations;
pub mod api_types;
mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

pub use cached_client::CachedHpinetClient;
pub use client::HpinetClient;
