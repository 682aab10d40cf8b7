//! Async query abstraction binding one consumer to the shared query cache.
//!
//! Inspired by TanStack Query, this module provides a `Query<K, T>` type that
//! turns "the result of this fetch, for this key, while enabled" into a live
//! `{data, is_loading, error}` state. The host decides when inputs change and
//! calls [`Query::bind`]; the query cancels whatever it had outstanding and
//! starts over through the [`QueryCache`].
//!
//! # Example
//!
//! ```ignore
//! let api = client.clone();
//! let mut query = Query::new(cache.clone(), move |key: &ResultsQuery, signal| {
//!     let api = api.clone();
//!     let key = key.clone();
//!     async move { api.get_results(&key, signal).await }
//! });
//!
//! // Inputs changed
//! query.bind(results_key, true);
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state().status() {
//!     QueryStatus::Loading => render_spinner(),
//!     QueryStatus::Success => render_data(query.data()),
//!     QueryStatus::Error => render_error(query.error()),
//!     QueryStatus::Idle => {}
//! }
//! ```

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{FetchOptions, QueryCache, QueryKey};
use crate::http::ApiError;

/// Which of the mutually exclusive outcomes a query is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Disabled, never started, or cancelled before any data arrived
  Idle,
  Loading,
  Success,
  Error,
}

/// What a query currently exposes to its consumer.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  pub data: Option<T>,
  pub is_loading: bool,
  pub error: Option<ApiError>,
}

impl<T> QueryState<T> {
  fn reset(enabled: bool) -> Self {
    Self {
      data: None,
      is_loading: enabled,
      error: None,
    }
  }

  pub fn status(&self) -> QueryStatus {
    if self.is_loading {
      QueryStatus::Loading
    } else if self.error.is_some() {
      QueryStatus::Error
    } else if self.data.is_some() {
      QueryStatus::Success
    } else {
      QueryStatus::Idle
    }
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }
}

/// A factory function that creates futures for fetching data
type FetcherFn<K, T> =
  Arc<dyn Fn(&K, CancellationToken) -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

/// The inputs the query is currently bound to.
struct Binding<K> {
  key: K,
  cache_key: String,
  enabled: bool,
}

/// A request this query started and has not yet applied.
struct Pending<T> {
  generation: u64,
  token: CancellationToken,
  receiver: mpsc::UnboundedReceiver<Settled<T>>,
}

struct Settled<T> {
  generation: u64,
  cache_key: String,
  result: Result<T, ApiError>,
}

/// One consumer's live subscription to a keyed fetch.
///
/// Query<K, T> encapsulates:
/// - The fetching logic (via a closure over the key)
/// - Loading/success/error state
/// - Cancellation of superseded requests
/// - Suppression of responses for keys the consumer has moved away from
pub struct Query<K, T> {
  state: QueryState<T>,
  cache: QueryCache<T>,
  fetcher: FetcherFn<K, T>,
  options: FetchOptions,
  binding: Option<Binding<K>>,
  pending: Option<Pending<T>>,
  generation: u64,
}

impl<K, T> Query<K, T>
where
  K: QueryKey + Clone + Send + Sync + 'static,
  T: Clone + Send + Sync + 'static,
{
  /// Create a new, unbound query.
  ///
  /// The fetcher receives the bound key and a cancellation signal, and is called
  /// each time a request actually has to go out. It may run more than once for
  /// the same key, so it must not have side effects beyond the request itself.
  pub fn new<F, Fut>(cache: QueryCache<T>, fetcher: F) -> Self
  where
    F: Fn(&K, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    Self {
      state: QueryState::reset(false),
      cache,
      fetcher: Arc::new(move |key: &K, signal: CancellationToken| fetcher(key, signal).boxed()),
      options: FetchOptions::default(),
      binding: None,
      pending: None,
      generation: 0,
    }
  }

  /// Set how long a cached value is served without refetching.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.options.stale_time = stale_time;
    self
  }

  /// Choose whether to join other consumers' in-flight requests for the same key.
  pub fn with_dedupe(mut self, dedupe: bool) -> Self {
    self.options.dedupe = dedupe;
    self
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.state.error()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading
  }

  /// Point the query at `key`, enabled or not.
  ///
  /// Does nothing if neither the canonical key nor `enabled` changed. Otherwise
  /// the outstanding request is cancelled, the state is reset, and (if enabled) a
  /// new request starts. Returns whether anything was restarted.
  pub fn bind(&mut self, key: K, enabled: bool) -> bool {
    let cache_key = key.cache_hash();
    if let Some(binding) = &self.binding {
      if binding.cache_key == cache_key && binding.enabled == enabled {
        return false;
      }
    }

    self.abandon_pending();
    self.state = QueryState::reset(enabled);
    debug!(query = %key.description(), enabled, "Query bound");
    self.binding = Some(Binding {
      key,
      cache_key,
      enabled,
    });
    if enabled {
      self.start();
    }
    true
  }

  /// Cancel the outstanding request, if any, and ask again for the bound key.
  ///
  /// Keeps the current data on screen while loading. A fresh cache entry still
  /// satisfies the request without network I/O.
  pub fn refetch(&mut self) {
    if !self.binding.as_ref().is_some_and(|binding| binding.enabled) {
      return;
    }
    self.abandon_pending();
    self.state.is_loading = true;
    self.state.error = None;
    self.start();
  }

  /// Cancel the outstanding request without reporting an error.
  pub fn cancel(&mut self) {
    if self.pending.is_some() {
      self.abandon_pending();
      self.state.is_loading = false;
    }
  }

  /// Poll for the result of the outstanding request.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let Some(pending) = &mut self.pending else {
      return false;
    };

    match pending.receiver.try_recv() {
      Ok(settled) => {
        self.pending = None;
        self.apply(settled)
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Task ended without reporting, treat like a cancellation
        self.pending = None;
        self.state.is_loading = false;
        true
      }
    }
  }

  /// Wait until the outstanding request settles, then return the state.
  ///
  /// Returns immediately when nothing is outstanding.
  pub async fn settled(&mut self) -> &QueryState<T> {
    if let Some(pending) = &mut self.pending {
      let received = pending.receiver.recv().await;
      self.pending = None;
      match received {
        Some(settled) => {
          self.apply(settled);
        }
        None => self.state.is_loading = false,
      }
    }
    &self.state
  }

  fn start(&mut self) {
    let Some(binding) = &self.binding else {
      return;
    };

    self.generation += 1;
    let generation = self.generation;
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel();

    let cache = self.cache.clone();
    let fetcher = Arc::clone(&self.fetcher);
    let options = self.options;
    let key = binding.key.clone();
    let cache_key = binding.cache_key.clone();
    let signal = token.clone();

    tokio::spawn(async move {
      let result = cache
        .fetch(&cache_key, options, &signal, move |operation_signal| {
          fetcher(&key, operation_signal)
        })
        .await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(Settled {
        generation,
        cache_key,
        result,
      });
    });

    self.pending = Some(Pending {
      generation,
      token,
      receiver: rx,
    });
  }

  fn abandon_pending(&mut self) {
    if let Some(pending) = self.pending.take() {
      debug!(generation = pending.generation, "Cancelling superseded request");
      pending.token.cancel();
    }
  }

  /// Apply a settled request if it is still the most recent one for the bound key.
  fn apply(&mut self, settled: Settled<T>) -> bool {
    let current = self
      .binding
      .as_ref()
      .is_some_and(|binding| binding.cache_key == settled.cache_key);
    if settled.generation != self.generation || !current {
      debug!(generation = settled.generation, "Discarding stale response");
      return false;
    }

    match settled.result {
      Ok(data) => {
        self.state = QueryState {
          data: Some(data),
          is_loading: false,
          error: None,
        };
      }
      Err(ApiError::Cancelled) => {
        self.state.is_loading = false;
      }
      Err(error) => {
        self.state = QueryState {
          data: None,
          is_loading: false,
          error: Some(error),
        };
      }
    }
    true
  }
}

impl<K, T> Drop for Query<K, T> {
  fn drop(&mut self) {
    if let Some(pending) = self.pending.take() {
      pending.token.cancel();
    }
  }
}

impl<K, T: std::fmt::Debug> std::fmt::Debug for Query<K, T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("options", &self.options)
      .field("generation", &self.generation)
      .finish_non_exhaustive()
  }
}
