//! In-memory query cache with staleness control and request deduplication.
//!
//! This module provides an API-agnostic caching mechanism that:
//! - Serves a stored value while it is younger than the caller's stale time
//! - Joins concurrent requests for the same key onto one underlying fetch
//! - Never caches failures, and never evicts a good entry because a refetch failed
//! - Aborts a shared fetch only once every caller waiting on it has gone away

mod layer;
mod traits;

pub use layer::QueryCache;
pub use traits::{hash_key, CacheEntry, FetchOptions, QueryKey};
