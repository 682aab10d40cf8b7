//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Trait for values that address a cache slot.
///
/// Implementors must fold every input that affects the fetched result into
/// `cache_hash`, so identical inputs always land on the same entry.
pub trait QueryKey {
  /// Stable, fixed-length identifier for this query
  fn cache_hash(&self) -> String;

  /// Human-readable description for logs
  fn description(&self) -> String;
}

impl QueryKey for String {
  fn cache_hash(&self) -> String {
    hash_key(self)
  }

  fn description(&self) -> String {
    self.clone()
  }
}

impl QueryKey for &str {
  fn cache_hash(&self) -> String {
    hash_key(self)
  }

  fn description(&self) -> String {
    self.to_string()
  }
}

/// SHA256 hash for stable, fixed-length keys.
pub fn hash_key(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// A stored value and the wall-clock time it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub data: T,
  pub timestamp: DateTime<Utc>,
}

/// Per-call fetch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
  /// How long a stored value is served without refetching
  pub stale_time: Duration,
  /// Join an in-flight request for the same key instead of starting another
  pub dedupe: bool,
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(30),
      dedupe: true,
    }
  }
}

impl FetchOptions {
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_dedupe(mut self, dedupe: bool) -> Self {
    self.dedupe = dedupe;
    self
  }
}
