//! Cache layer that orchestrates staleness, deduplication, and cancellation.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::traits::{CacheEntry, FetchOptions};
use crate::http::ApiError;

type InFlightChannel<T> = Shared<BoxFuture<'static, Result<T, ApiError>>>;

struct StoredEntry<T> {
  entry: CacheEntry<T>,
  stored_at: Instant,
  last_used: Instant,
}

/// A fetch that has started but not settled, shared by every caller of its key.
struct InFlight<T> {
  id: u64,
  channel: InFlightChannel<T>,
  waiters: usize,
  token: CancellationToken,
}

struct CacheState<T> {
  entries: HashMap<String, StoredEntry<T>>,
  in_flight: HashMap<String, InFlight<T>>,
  next_id: u64,
  /// Bumped by `clear`; fetches started under an older epoch do not store
  epoch: u64,
}

enum Lookup<T> {
  Hit(T),
  Joined(InFlightChannel<T>, WaiterGuard<T>),
  Started(Registration<T>),
}

/// A fetch registered under the lock whose operation has not been called yet.
struct Registration<T> {
  id: u64,
  epoch: u64,
  token: CancellationToken,
  sender: oneshot::Sender<Result<T, ApiError>>,
  channel: InFlightChannel<T>,
  guard: WaiterGuard<T>,
}

/// Query cache shared between independent consumers.
///
/// Cloning is cheap and every clone addresses the same entries. Mutations happen in
/// short critical sections that never span an `.await`.
pub struct QueryCache<T> {
  state: Arc<Mutex<CacheState<T>>>,
  /// Entry bound; the least recently used entry is evicted past it
  max_entries: Option<usize>,
}

impl<T> QueryCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Create an unbounded cache.
  pub fn new() -> Self {
    Self {
      state: Arc::new(Mutex::new(CacheState {
        entries: HashMap::new(),
        in_flight: HashMap::new(),
        next_id: 0,
        epoch: 0,
      })),
      max_entries: None,
    }
  }

  /// Create a cache holding at most `max_entries` values.
  pub fn with_capacity(max_entries: usize) -> Self {
    Self {
      max_entries: Some(max_entries.max(1)),
      ..Self::new()
    }
  }

  /// Create a cache with an optional bound, as read from configuration.
  pub fn bounded(max_entries: Option<usize>) -> Self {
    match max_entries {
      Some(max) => Self::with_capacity(max),
      None => Self::new(),
    }
  }

  /// Look up the stored entry for `key` without affecting it.
  pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
    self
      .state
      .lock()
      .entries
      .get(key)
      .map(|stored| stored.entry.clone())
  }

  /// Fetch `key`, serving a fresh stored value or joining an in-flight request
  /// before falling back to `operation`.
  ///
  /// With `dedupe` set, `operation` runs at most once per in-flight window no
  /// matter how many callers ask for the key. The token passed to `operation`
  /// fires only when every caller waiting on it has been cancelled or dropped.
  /// Firing `signal` makes this call return [`ApiError::Cancelled`] right away.
  ///
  /// Failures are returned to every joined caller and are never stored.
  pub async fn fetch<F, Fut>(
    &self,
    key: &str,
    options: FetchOptions,
    signal: &CancellationToken,
    operation: F,
  ) -> Result<T, ApiError>
  where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    if !options.dedupe {
      if let Some(data) = self.fresh(key, options.stale_time) {
        debug!(key, "Cache hit");
        return Ok(data);
      }
      return self.fetch_inline(key, signal, operation).await;
    }

    let (channel, _guard) = match self.join_or_register(key, options.stale_time) {
      Lookup::Hit(data) => return Ok(data),
      Lookup::Joined(channel, guard) => (channel, guard),
      Lookup::Started(registration) => {
        // The lock is released here, so the operation may use this cache.
        let future = operation(registration.token);
        self.spawn(key, registration.id, registration.epoch, registration.sender, future);
        (registration.channel, registration.guard)
      }
    };

    tokio::select! {
      biased;
      _ = signal.cancelled() => Err(ApiError::Cancelled),
      result = channel => result,
    }
  }

  /// Drop the stored value for `key`. An in-flight fetch is left alone.
  pub fn invalidate(&self, key: &str) -> bool {
    self.state.lock().entries.remove(key).is_some()
  }

  /// Forget every stored value and in-flight registration.
  ///
  /// Fetches already running keep going for their current callers, but their
  /// results are not stored.
  pub fn clear(&self) {
    let mut state = self.state.lock();
    state.entries.clear();
    state.in_flight.clear();
    state.epoch += 1;
  }

  pub fn len(&self) -> usize {
    self.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.state.lock().entries.is_empty()
  }

  pub fn in_flight_len(&self) -> usize {
    self.state.lock().in_flight.len()
  }

  fn fresh(&self, key: &str, stale_time: Duration) -> Option<T> {
    let mut state = self.state.lock();
    fresh_entry(&mut state, key, stale_time)
  }

  fn join_or_register(&self, key: &str, stale_time: Duration) -> Lookup<T> {
    let mut state = self.state.lock();

    if let Some(data) = fresh_entry(&mut state, key, stale_time) {
      debug!(key, "Cache hit");
      return Lookup::Hit(data);
    }

    if let Some(flight) = state.in_flight.get_mut(key) {
      flight.waiters += 1;
      debug!(key, waiters = flight.waiters, "Joining in-flight request");
      let channel = flight.channel.clone();
      let guard = WaiterGuard::new(&self.state, key, flight.id);
      return Lookup::Joined(channel, guard);
    }

    let id = state.next_id;
    state.next_id += 1;
    let token = CancellationToken::new();
    debug!(key, id, "Cache miss, starting request");

    let (sender, receiver) = oneshot::channel();
    let channel: InFlightChannel<T> = receiver
      .map(|received| received.unwrap_or(Err(ApiError::Cancelled)))
      .boxed()
      .shared();
    state.in_flight.insert(
      key.to_string(),
      InFlight {
        id,
        channel: channel.clone(),
        waiters: 1,
        token: token.clone(),
      },
    );

    Lookup::Started(Registration {
      id,
      epoch: state.epoch,
      token,
      sender,
      channel,
      guard: WaiterGuard::new(&self.state, key, id),
    })
  }

  /// Run the fetch as its own task so no single waiter owns it.
  fn spawn<Fut>(
    &self,
    key: &str,
    id: u64,
    epoch: u64,
    sender: oneshot::Sender<Result<T, ApiError>>,
    future: Fut,
  ) where
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let state = Arc::clone(&self.state);
    let max_entries = self.max_entries;
    let key = key.to_string();

    tokio::spawn(async move {
      let result = future.await;
      {
        // Settle before sending so a caller woken by the result either sees the
        // stored value or starts a new request, never the finished one.
        let mut state = state.lock();
        if state.in_flight.get(&key).is_some_and(|flight| flight.id == id) {
          state.in_flight.remove(&key);
        }
        if let Ok(data) = &result {
          if state.epoch == epoch {
            store_entry(&mut state, max_entries, &key, data.clone());
          }
        }
        debug!(key = %key, id, ok = result.is_ok(), "Request settled");
      }
      sender.send(result).ok();
    });
  }

  async fn fetch_inline<F, Fut>(
    &self,
    key: &str,
    signal: &CancellationToken,
    operation: F,
  ) -> Result<T, ApiError>
  where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    debug!(key, "Starting non-deduplicated request");
    let epoch = self.state.lock().epoch;
    let future = operation(signal.child_token());

    let result = tokio::select! {
      biased;
      _ = signal.cancelled() => Err(ApiError::Cancelled),
      result = future => result,
    };

    if let Ok(data) = &result {
      let mut state = self.state.lock();
      if state.epoch == epoch {
        store_entry(&mut state, self.max_entries, key, data.clone());
      }
    }
    result
  }
}

impl<T> Default for QueryCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for QueryCache<T> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
      max_entries: self.max_entries,
    }
  }
}

fn fresh_entry<T: Clone>(state: &mut CacheState<T>, key: &str, stale_time: Duration) -> Option<T> {
  let stored = state.entries.get_mut(key)?;
  if stored.stored_at.elapsed() >= stale_time {
    return None;
  }
  stored.last_used = Instant::now();
  Some(stored.entry.data.clone())
}

fn store_entry<T>(state: &mut CacheState<T>, max_entries: Option<usize>, key: &str, data: T) {
  let now = Instant::now();
  state.entries.insert(
    key.to_string(),
    StoredEntry {
      entry: CacheEntry {
        data,
        timestamp: Utc::now(),
      },
      stored_at: now,
      last_used: now,
    },
  );

  let Some(max) = max_entries else {
    return;
  };
  while state.entries.len() > max {
    let oldest = state
      .entries
      .iter()
      .filter(|(candidate, _)| candidate.as_str() != key)
      .min_by_key(|(_, stored)| stored.last_used)
      .map(|(candidate, _)| candidate.clone());
    match oldest {
      Some(evicted) => {
        trace!(key = %evicted, "Evicting least recently used entry");
        state.entries.remove(&evicted);
      }
      None => break,
    }
  }
}

/// Registration of one caller on an in-flight fetch.
///
/// Dropping the last guard for a fetch cancels it and unregisters it, so the
/// next caller starts over instead of joining an aborted request.
struct WaiterGuard<T> {
  state: Arc<Mutex<CacheState<T>>>,
  key: String,
  id: u64,
}

impl<T> WaiterGuard<T> {
  fn new(state: &Arc<Mutex<CacheState<T>>>, key: &str, id: u64) -> Self {
    Self {
      state: Arc::clone(state),
      key: key.to_string(),
      id,
    }
  }
}

impl<T> Drop for WaiterGuard<T> {
  fn drop(&mut self) {
    let mut state = self.state.lock();
    let abandoned = match state.in_flight.get_mut(&self.key) {
      Some(flight) if flight.id == self.id => {
        flight.waiters -= 1;
        flight.waiters == 0
      }
      _ => false,
    };
    if abandoned {
      if let Some(flight) = state.in_flight.remove(&self.key) {
        debug!(key = %self.key, id = self.id, "All waiters gone, cancelling request");
        flight.token.cancel();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
  }

  /// Operation that counts calls and resolves to the call number after `delay`.
  fn counted(
    calls: &Arc<AtomicU32>,
    delay: Duration,
  ) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, Result<u32, ApiError>> {
    let calls = calls.clone();
    move |token: CancellationToken| {
      async move {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::select! {
          _ = token.cancelled() => Err(ApiError::Cancelled),
          _ = tokio::time::sleep(delay) => Ok(n),
        }
      }
      .boxed()
    }
  }

  fn failing(calls: &Arc<AtomicU32>) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, Result<u32, ApiError>> {
    let calls = calls.clone();
    move |_token: CancellationToken| {
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(ApiError::Status {
          status: 500,
          url: "http://localhost/api/results/".to_string(),
          payload: serde_json::Value::Null,
        })
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_fetches_share_one_request() {
    let cache = QueryCache::new();
    let calls = counter();
    let signal = CancellationToken::new();

    let fetches = (0..5).map(|_| {
      cache.fetch(
        "q1",
        FetchOptions::default(),
        &signal,
        counted(&calls, Duration::from_millis(10)),
      )
    });
    let results = futures::future::join_all(fetches).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap(), 1);
    }
    assert_eq!(cache.in_flight_len(), 0);
    assert_eq!(cache.get("q1").map(|entry| entry.data), Some(1));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_operation_may_use_cache_while_starting() {
    let cache: QueryCache<usize> = QueryCache::new();
    let inner = cache.clone();
    let signal = CancellationToken::new();

    let fetch = async move {
      cache
        .fetch("q1", FetchOptions::default(), &signal, move |_token| {
          let seen = inner.len() + inner.in_flight_len();
          async move { Ok(seen) }
        })
        .await
    };
    let result = tokio::time::timeout(Duration::from_secs(5), tokio::spawn(fetch))
      .await
      .expect("operation blocked on the cache lock")
      .unwrap();

    // The request is already registered when its operation runs.
    assert_eq!(result.unwrap(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_entry_skips_second_operation() {
    let cache = QueryCache::new();
    let signal = CancellationToken::new();
    let options = FetchOptions::default().with_stale_time(Duration::from_secs(30));

    let fetch_b_called = std::sync::atomic::AtomicBool::new(false);

    let first = cache
      .fetch("q1", options, &signal, |_| async { Ok::<_, ApiError>("A") })
      .await
      .unwrap();
    let second = cache
      .fetch("q1", options, &signal, |_| {
        fetch_b_called.store(true, Ordering::SeqCst);
        async { Ok::<_, ApiError>("B") }
      })
      .await
      .unwrap();

    assert_eq!(first, "A");
    assert_eq!(second, "A");
    assert!(!fetch_b_called.load(Ordering::SeqCst));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_entry_is_refetched() {
    let cache = QueryCache::new();
    let calls = counter();
    let signal = CancellationToken::new();
    let options = FetchOptions::default().with_stale_time(Duration::from_secs(30));

    cache
      .fetch("q1", options, &signal, counted(&calls, Duration::ZERO))
      .await
      .unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    cache
      .fetch("q1", options, &signal, counted(&calls, Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    let value = cache
      .fetch("q1", options, &signal, counted(&calls, Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(value, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_is_not_cached_and_does_not_evict() {
    let cache = QueryCache::new();
    let calls = counter();
    let signal = CancellationToken::new();
    let options = FetchOptions::default().with_stale_time(Duration::from_secs(30));

    cache
      .fetch("q1", options, &signal, counted(&calls, Duration::ZERO))
      .await
      .unwrap();

    // A caller with a tighter stale time refetches and fails.
    let err = cache
      .fetch(
        "q1",
        options.with_stale_time(Duration::ZERO),
        &signal,
        failing(&calls),
      )
      .await
      .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(cache.in_flight_len(), 0);

    // The earlier value is still served within its window.
    assert_eq!(cache.get("q1").map(|entry| entry.data), Some(1));
    let value = cache
      .fetch("q1", options, &signal, failing(&calls))
      .await
      .unwrap();
    assert_eq!(value, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_lets_next_call_retry() {
    let cache: QueryCache<u32> = QueryCache::new();
    let calls = counter();
    let signal = CancellationToken::new();

    assert!(cache
      .fetch("q1", FetchOptions::default(), &signal, failing(&calls))
      .await
      .is_err());
    assert!(cache.get("q1").is_none());

    let value = cache
      .fetch(
        "q1",
        FetchOptions::default(),
        &signal,
        counted(&calls, Duration::ZERO),
      )
      .await
      .unwrap();
    assert_eq!(value, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_clear_forces_refetch() {
    let cache = QueryCache::new();
    let calls = counter();
    let signal = CancellationToken::new();

    cache
      .fetch(
        "q1",
        FetchOptions::default(),
        &signal,
        counted(&calls, Duration::ZERO),
      )
      .await
      .unwrap();
    cache.clear();
    assert!(cache.is_empty());

    cache
      .fetch(
        "q1",
        FetchOptions::default(),
        &signal,
        counted(&calls, Duration::ZERO),
      )
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_clear_discards_running_fetch_result() {
    let cache = QueryCache::new();
    let calls = counter();
    let signal = CancellationToken::new();

    let pending = cache.fetch(
      "q1",
      FetchOptions::default(),
      &signal,
      counted(&calls, Duration::from_millis(50)),
    );
    let clearer = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      cache.clear();
    };
    let (result, ()) = tokio::join!(pending, clearer);

    assert_eq!(result.unwrap(), 1);
    assert!(cache.get("q1").is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_one_waiter_cancelling_keeps_shared_request() {
    let cache = QueryCache::new();
    let calls = counter();
    let signal_a = CancellationToken::new();
    let signal_b = CancellationToken::new();

    let a = cache.fetch(
      "q1",
      FetchOptions::default(),
      &signal_a,
      counted(&calls, Duration::from_millis(100)),
    );
    let b = cache.fetch(
      "q1",
      FetchOptions::default(),
      &signal_b,
      counted(&calls, Duration::from_millis(100)),
    );
    let canceller = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      signal_a.cancel();
    };
    let (a, b, ()) = tokio::join!(a, b, canceller);

    assert!(a.unwrap_err().is_cancelled());
    assert_eq!(b.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("q1").map(|entry| entry.data), Some(1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_last_waiter_cancelling_aborts_request() {
    let cache: QueryCache<u32> = QueryCache::new();
    let signal = CancellationToken::new();
    let seen = Arc::new(Mutex::new(None::<CancellationToken>));

    let recorder = seen.clone();
    let pending = cache.fetch("q1", FetchOptions::default(), &signal, move |token| {
      *recorder.lock() = Some(token.clone());
      async move {
        token.cancelled().await;
        Err(ApiError::Cancelled)
      }
    });
    let canceller = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      signal.cancel();
    };
    let (result, ()) = tokio::join!(pending, canceller);

    assert!(result.unwrap_err().is_cancelled());
    let token = seen.lock().clone().unwrap();
    assert!(token.is_cancelled());
    assert_eq!(cache.in_flight_len(), 0);

    // A new caller starts a fresh request rather than joining the aborted one.
    let calls = counter();
    let value = cache
      .fetch(
        "q1",
        FetchOptions::default(),
        &CancellationToken::new(),
        counted(&calls, Duration::ZERO),
      )
      .await
      .unwrap();
    assert_eq!(value, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dedupe_opt_out_runs_every_operation() {
    let cache = QueryCache::new();
    let calls = counter();
    let signal = CancellationToken::new();
    let options = FetchOptions::default().with_dedupe(false);

    let (a, b) = tokio::join!(
      cache.fetch("q1", options, &signal, counted(&calls, Duration::from_millis(10))),
      cache.fetch("q1", options, &signal, counted(&calls, Duration::from_millis(10))),
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.in_flight_len(), 0);
    assert!(cache.get("q1").is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_dedupe_opt_out_leaves_shared_registration() {
    let cache = QueryCache::new();
    let calls = counter();
    let signal = CancellationToken::new();

    let shared = cache.fetch(
      "q1",
      FetchOptions::default(),
      &signal,
      counted(&calls, Duration::from_millis(100)),
    );
    let inline = async {
      cache
        .fetch(
          "q1",
          FetchOptions::default().with_dedupe(false),
          &signal,
          |_| async { Ok::<_, ApiError>(99) },
        )
        .await
        .unwrap();
      cache.in_flight_len()
    };
    let (shared, in_flight_after_inline) = tokio::join!(shared, inline);

    assert_eq!(shared.unwrap(), 1);
    assert_eq!(in_flight_after_inline, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_capacity_evicts_least_recently_used() {
    let cache = QueryCache::with_capacity(2);
    let signal = CancellationToken::new();
    let options = FetchOptions::default();

    for key in ["a", "b"] {
      cache
        .fetch(key, options, &signal, |_| async move { Ok::<_, ApiError>(key) })
        .await
        .unwrap();
      tokio::time::advance(Duration::from_millis(10)).await;
    }

    // Touch "a" so "b" becomes the eviction candidate.
    cache
      .fetch("a", options, &signal, |_| async { Ok::<_, ApiError>("refetched") })
      .await
      .unwrap();
    tokio::time::advance(Duration::from_millis(10)).await;

    cache
      .fetch("c", options, &signal, |_| async { Ok::<_, ApiError>("c") })
      .await
      .unwrap();

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("a").map(|entry| entry.data), Some("a"));
    assert!(cache.get("b").is_none());
    assert!(cache.get("c").is_some());
  }

  #[tokio::test]
  async fn test_invalidate_single_key() {
    let cache = QueryCache::new();
    let signal = CancellationToken::new();

    for key in ["a", "b"] {
      cache
        .fetch(key, FetchOptions::default(), &signal, |_| async move {
          Ok::<_, ApiError>(key.len())
        })
        .await
        .unwrap();
    }

    assert!(cache.invalidate("a"));
    assert!(!cache.invalidate("a"));
    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
  }
}
