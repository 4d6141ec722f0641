//! Query observers: keyed, cached, deduplicated reads.
//!
//! Inspired by TanStack Query, [`use_query`] binds a key, a fetcher and some
//! options to the shared [`QueryClient`] and returns a [`QueryObserver`] whose
//! result is always derived from the cache.
//!
//! # Example
//!
//! ```no_run
//! use qcache::{use_query, QueryClient, QueryError, QueryOptions};
//! use std::time::Duration;
//!
//! # async fn run() {
//! let client = QueryClient::new();
//! let mut users = use_query(
//!   &client,
//!   "users",
//!   || async { Ok::<_, QueryError>(vec!["Ann".to_string()]) },
//!   QueryOptions::new().stale_time(Duration::from_secs(5)),
//! );
//!
//! // Re-render loop
//! loop {
//!   let result = users.changed().await;
//!   if result.is_loading {
//!     continue;
//!   }
//!   println!("{:?}", result.data);
//!   break;
//! }
//!
//! // Force a new fetch
//! users.refetch().await;
//! # }
//! ```

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::QueryClient;
use crate::error::QueryError;
use crate::key::{CacheKey, QueryKey};
use crate::lock::mutex_lock;
use crate::options::QueryOptions;
use crate::state::{FetchStatus, QueryState, QueryStateUpdate, QueryStatus};
use crate::subscribers::Unsubscribe;

const SOURCE: &str = "query";

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;

/// What a consumer sees for one query.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  pub data: Option<T>,
  pub error: Option<QueryError>,
  pub status: QueryStatus,
  pub is_loading: bool,
  pub is_error: bool,
  pub is_fetching: bool,
  pub last_updated: DateTime<Utc>,
}

impl<T> QueryResult<T> {
  fn from_state(state: QueryState<T>) -> Self {
    Self {
      is_loading: state.status == QueryStatus::Loading,
      is_error: state.status == QueryStatus::Error,
      is_fetching: state.fetch_status == FetchStatus::Fetching,
      status: state.status,
      last_updated: state.last_updated,
      data: state.data,
      error: state.error,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_idle(&self) -> bool {
    self.status == QueryStatus::Idle
  }
}

/// Whether a query in `state` should be fetched automatically.
///
/// True when enabled and either never fetched or older than `stale_time`.
pub fn should_fetch<T>(
  state: &QueryState<T>,
  enabled: bool,
  stale_time: Duration,
  now: DateTime<Utc>,
) -> bool {
  if !enabled {
    return false;
  }
  if state.status == QueryStatus::Idle {
    return true;
  }
  // A timestamp in the future counts as age zero
  let age = (now - state.last_updated).to_std().unwrap_or(Duration::ZERO);
  age > stale_time
}

/// The fetch side of a query: shared between the observer and any fetch
/// futures it has handed out.
struct Lifecycle<T> {
  key: CacheKey,
  fetcher: FetcherFn<T>,
  client: QueryClient,
  options: Mutex<QueryOptions<T>>,
}

impl<T> Lifecycle<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn options(&self) -> QueryOptions<T> {
    mutex_lock(&self.options, SOURCE, "options").clone()
  }

  fn state(&self) -> QueryState<T> {
    self
      .client
      .state_for::<T>(&self.key)
      .unwrap_or_else(QueryState::idle)
  }

  /// Claim the in-flight slot and start the fetcher.
  ///
  /// The loading write happens before this returns; the returned future
  /// drives the fetch to completion and writes the outcome.
  fn fetch(self: &Arc<Self>) -> BoxFuture<'static, ()> {
    let fingerprint = self.key.fingerprint();
    if !self.client.begin_fetch_for(&self.key) {
      debug!(key = %fingerprint, "Fetch suppressed, already in flight");
      return future::ready(()).boxed();
    }
    debug!(key = %fingerprint, "Fetch started");

    let started = std::panic::catch_unwind(AssertUnwindSafe(|| (self.fetcher)()));
    let this = Arc::clone(self);
    async move {
      let outcome = match started {
        Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
          Ok(result) => result,
          Err(payload) => Err(QueryError::from_panic(payload)),
        },
        Err(payload) => Err(QueryError::from_panic(payload)),
      };
      this.settle(outcome);
    }
    .boxed()
  }

  fn settle(&self, outcome: Result<T, QueryError>) {
    let options = self.options();
    match outcome {
      Ok(data) => {
        self.client.write(
          self.key.clone(),
          QueryStateUpdate::new()
            .status(QueryStatus::Success)
            .data(data.clone())
            .fetch_status(FetchStatus::Idle)
            .clear_error(),
          "fetch_success",
        );
        debug!(key = %self.key.fingerprint(), status = ?QueryStatus::Success, "Fetch settled");
        if let Some(on_success) = options.on_success {
          on_success(&data);
        }
      }
      Err(error) => {
        self.client.write(
          self.key.clone(),
          QueryStateUpdate::new()
            .status(QueryStatus::Error)
            .error(error.clone())
            .fetch_status(FetchStatus::Idle),
          "fetch_error",
        );
        debug!(key = %self.key.fingerprint(), status = ?QueryStatus::Error, %error, "Fetch settled");
        if let Some(on_error) = options.on_error {
          on_error(&error);
        }
      }
    }
  }
}

/// An active query bound to one key.
///
/// The observer is subscribed to the client for as long as it lives; every
/// cache write wakes [`QueryObserver::changed`]. It fetches automatically at
/// most once, the first time it finds the cached state missing or stale, and
/// again whenever [`QueryObserver::refetch`] is called.
pub struct QueryObserver<T> {
  lifecycle: Arc<Lifecycle<T>>,
  auto_fetched: AtomicBool,
  notified: watch::Receiver<u64>,
  unsubscribe: Unsubscribe,
}

/// Activate a query.
///
/// Must be called from within a Tokio runtime: automatic fetches are spawned
/// onto it.
pub fn use_query<T, F, Fut, E>(
  client: &QueryClient,
  key: impl Into<QueryKey>,
  fetcher: F,
  options: QueryOptions<T>,
) -> QueryObserver<T>
where
  T: Clone + Send + Sync + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
  E: Into<QueryError> + 'static,
{
  QueryObserver::new(client, key, fetcher, options)
}

impl<T> QueryObserver<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new<F, Fut, E>(
    client: &QueryClient,
    key: impl Into<QueryKey>,
    fetcher: F,
    options: QueryOptions<T>,
  ) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<QueryError> + 'static,
  {
    let fetcher: FetcherFn<T> = Arc::new(move || {
      let fut = fetcher();
      async move {
        let result: Result<T, QueryError> = fut.await.map_err(Into::into);
        result
      }
      .boxed()
    });

    let (tx, notified) = watch::channel(0u64);
    let unsubscribe = client.subscribe(move || {
      tx.send_modify(|version| *version = version.wrapping_add(1));
    });

    let observer = Self {
      lifecycle: Arc::new(Lifecycle {
        key: key.into().cache_key(),
        fetcher,
        client: client.clone(),
        options: Mutex::new(options),
      }),
      auto_fetched: AtomicBool::new(false),
      notified,
      unsubscribe,
    };
    observer.evaluate();
    observer
  }

  pub fn key(&self) -> &CacheKey {
    &self.lifecycle.key
  }

  /// Current result, derived from the cache.
  pub fn result(&self) -> QueryResult<T> {
    QueryResult::from_state(self.lifecycle.state())
  }

  /// Wait for the next cache write, then re-derive the result.
  ///
  /// Writes that happened since the last call are coalesced into one wake-up.
  pub async fn changed(&mut self) -> QueryResult<T> {
    // The sender lives in our own subscription, which outlives this borrow
    let _ = self.notified.changed().await;
    self.evaluate();
    self.result()
  }

  /// Wait until no fetch is in flight for this key.
  pub async fn settled(&mut self) -> QueryResult<T> {
    let mut result = self.result();
    while result.is_fetching {
      result = self.changed().await;
    }
    result
  }

  /// Start a fetch regardless of staleness.
  ///
  /// The key moves to loading before this returns, unless a fetch is already
  /// in flight. The fetch runs on its own task, so it completes whether or not
  /// the returned future is awaited; awaiting it waits for the outcome to be
  /// written. Failures land in the cache, not in the return value.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn refetch(&self) -> BoxFuture<'static, ()> {
    let handle = tokio::spawn(self.lifecycle.fetch());
    async move {
      if let Err(e) = handle.await {
        warn!(error = %e, "Fetch task did not complete");
      }
    }
    .boxed()
  }

  /// Replace the options and re-run the automatic fetch check.
  ///
  /// Must be called from within a Tokio runtime: a fetch may be spawned.
  pub fn set_options(&self, options: QueryOptions<T>) {
    *mutex_lock(&self.lifecycle.options, SOURCE, "set_options") = options;
    self.evaluate();
  }

  /// Toggle automatic fetching. Same runtime requirement as
  /// [`QueryObserver::set_options`].
  pub fn set_enabled(&self, enabled: bool) {
    mutex_lock(&self.lifecycle.options, SOURCE, "set_enabled").enabled = enabled;
    self.evaluate();
  }

  fn evaluate(&self) {
    if self.auto_fetched.load(Ordering::Acquire) {
      return;
    }

    let options = self.lifecycle.options();
    let client = &self.lifecycle.client;
    let stale_time = options.effective_stale_time(client.config());
    let state = self.lifecycle.state();
    if !should_fetch(&state, options.enabled, stale_time, client.now()) {
      return;
    }

    if self
      .auto_fetched
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      tokio::spawn(self.lifecycle.fetch());
    }
  }
}

impl<T> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    self.unsubscribe.unsubscribe();
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.lifecycle.key)
      .field("auto_fetched", &self.auto_fetched)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::config::QueryConfig;
  use std::sync::atomic::AtomicU32;
  use tokio::sync::Notify;

  fn counting_fetcher(
    counter: Arc<AtomicU32>,
    value: i32,
  ) -> impl Fn() -> BoxFuture<'static, Result<i32, QueryError>> + Send + Sync + 'static {
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async move { Ok(value) }.boxed()
    }
  }

  fn manual_client() -> (QueryClient, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let client = QueryClient::with_clock(QueryConfig::default(), clock.clone());
    (client, clock)
  }

  #[test]
  fn test_should_fetch_rules() {
    let now = Utc::now();
    let mut state: QueryState<i32> = QueryState::idle();
    assert!(should_fetch(&state, true, Duration::from_secs(60), now));
    assert!(!should_fetch(&state, false, Duration::ZERO, now));

    state.status = QueryStatus::Success;
    state.last_updated = now - chrono::Duration::milliseconds(3000);
    assert!(!should_fetch(&state, true, Duration::from_millis(5000), now));

    state.last_updated = now - chrono::Duration::milliseconds(6000);
    assert!(should_fetch(&state, true, Duration::from_millis(5000), now));
    assert!(!should_fetch(&state, false, Duration::from_millis(5000), now));
  }

  #[tokio::test]
  async fn test_query_success() {
    let client = QueryClient::new();
    let mut query = use_query(
      &client,
      "numbers",
      || async { Ok::<_, QueryError>(vec![1, 2, 3]) },
      QueryOptions::new(),
    );

    let result = query.result();
    assert!(result.is_loading);
    assert!(result.is_fetching);

    let result = query.settled().await;
    assert!(result.is_success());
    assert!(!result.is_loading);
    assert_eq!(result.data, Some(vec![1, 2, 3]));
    assert_eq!(result.error, None);
  }

  #[tokio::test]
  async fn test_query_error_keeps_previous_data() {
    let client = QueryClient::new();
    client.set_query_data("flaky", 7i32);
    client.invalidate_queries("flaky");

    let errors = Arc::new(AtomicU32::new(0));
    let errors_clone = errors.clone();
    let mut query = use_query(
      &client,
      "flaky",
      || async { Err::<i32, _>("Something went wrong") },
      QueryOptions::new().on_error(move |e| {
        assert_eq!(e.to_string(), "Something went wrong");
        errors_clone.fetch_add(1, Ordering::SeqCst);
      }),
    );

    let result = query.settled().await;
    assert!(result.is_error);
    assert_eq!(result.error, Some(QueryError::new("Something went wrong")));
    assert_eq!(result.data, Some(7));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_on_success_receives_data() {
    let client = QueryClient::new();
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    let mut query = use_query(
      &client,
      "answer",
      || async { Ok::<_, QueryError>(42) },
      QueryOptions::new().on_success(move |d: &i32| {
        *seen_clone.lock().unwrap() = Some(*d);
      }),
    );

    query.settled().await;
    assert_eq!(*seen.lock().unwrap(), Some(42));
  }

  #[tokio::test]
  async fn test_concurrent_fetch_is_deduplicated() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Notify::new());

    let calls_clone = calls.clone();
    let gate_clone = gate.clone();
    let query = use_query(
      &client,
      "slow",
      move || {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        let gate = gate_clone.clone();
        async move {
          gate.notified().await;
          Ok::<_, QueryError>(1)
        }
      },
      QueryOptions::new().enabled(false),
    );

    let first = query.refetch();
    let second = query.refetch();
    assert!(query.result().is_fetching);

    let first = tokio::spawn(first);
    second.await;
    gate.notify_one();
    first.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.get_query_data::<i32>("slow"), Some(1));
  }

  #[tokio::test]
  async fn test_second_observer_does_not_refetch_in_flight_key() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Notify::new());

    let make_fetcher = || {
      let calls = calls.clone();
      let gate = gate.clone();
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let gate = gate.clone();
        async move {
          gate.notified().await;
          Ok::<_, QueryError>("done")
        }
      }
    };

    let mut a = use_query(&client, "shared", make_fetcher(), QueryOptions::new());
    let _b = use_query(&client, "shared", make_fetcher(), QueryOptions::new());

    // Let the spawned fetch reach the gate
    tokio::task::yield_now().await;
    gate.notify_one();
    let result = a.settled().await;

    assert_eq!(result.data, Some("done"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_fresh_data_is_not_refetched() {
    let (client, clock) = manual_client();
    client.set_query_data("cached", 1i32);
    clock.advance(chrono::Duration::milliseconds(3000));

    let calls = Arc::new(AtomicU32::new(0));
    let query = use_query(
      &client,
      "cached",
      counting_fetcher(calls.clone(), 2),
      QueryOptions::new().stale_time(Duration::from_millis(5000)),
    );

    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!query.result().is_fetching);
    assert_eq!(query.result().data, Some(1));
  }

  #[tokio::test]
  async fn test_stale_data_is_refetched() {
    let (client, clock) = manual_client();
    client.set_query_data("cached", 1i32);
    clock.advance(chrono::Duration::milliseconds(6000));

    let calls = Arc::new(AtomicU32::new(0));
    let mut query = use_query(
      &client,
      "cached",
      counting_fetcher(calls.clone(), 2),
      QueryOptions::new().stale_time(Duration::from_millis(5000)),
    );

    // Stale data stays visible while refetching
    let result = query.result();
    assert!(result.is_fetching);
    assert_eq!(result.data, Some(1));

    let result = query.settled().await;
    assert_eq!(result.data, Some(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_disabled_query_only_fetches_on_refetch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let query = use_query(
      &client,
      "manual",
      counting_fetcher(calls.clone(), 5),
      QueryOptions::new().enabled(false),
    );

    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(query.result().is_idle());

    query.refetch().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(query.result().data, Some(5));
  }

  #[tokio::test]
  async fn test_enabling_later_triggers_fetch() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = use_query(
      &client,
      "dependent",
      counting_fetcher(calls.clone(), 9),
      QueryOptions::new().enabled(false),
    );

    query.set_enabled(true);
    let result = query.settled().await;
    assert_eq!(result.data, Some(9));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_auto_fetch_happens_once_per_observer() {
    let (client, clock) = manual_client();
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = use_query(
      &client,
      "once",
      counting_fetcher(calls.clone(), 1),
      QueryOptions::new(),
    );
    query.settled().await;

    // Stale again, but this observer already used its automatic fetch
    clock.advance(chrono::Duration::seconds(10));
    client.invalidate_queries("once");
    query.changed().await;
    tokio::task::yield_now().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidation_reaches_observer_that_never_fetched() {
    let (client, _clock) = manual_client();
    client.set_query_data("fresh", 1i32);

    let calls = Arc::new(AtomicU32::new(0));
    let mut query = use_query(
      &client,
      "fresh",
      counting_fetcher(calls.clone(), 2),
      QueryOptions::new().stale_time(Duration::from_secs(60)),
    );
    assert!(!query.result().is_fetching);

    client.invalidate_queries("fresh");
    query.changed().await;
    let result = query.settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.data, Some(2));
  }

  #[tokio::test]
  async fn test_panicking_fetcher_is_normalized() {
    let client = QueryClient::new();
    let query = use_query(
      &client,
      "panics",
      || async {
        if true {
          std::panic::panic_any(404u16);
        }
        Ok::<i32, QueryError>(0)
      },
      QueryOptions::new().enabled(false),
    );

    query.refetch().await;
    let result = query.result();
    assert!(result.is_error);
    assert!(!result.is_fetching);
    assert_eq!(result.error, Some(QueryError::Unknown));
  }

  #[tokio::test]
  async fn test_success_after_error_clears_error() {
    let client = QueryClient::new();
    let fail = Arc::new(AtomicBool::new(true));
    let fail_clone = fail.clone();
    let query = use_query(
      &client,
      "recovering",
      move || {
        let fail = fail_clone.load(Ordering::SeqCst);
        async move {
          if fail {
            Err(QueryError::new("down"))
          } else {
            Ok(3)
          }
        }
      },
      QueryOptions::new().enabled(false),
    );

    query.refetch().await;
    assert!(query.result().is_error);

    fail.store(false, Ordering::SeqCst);
    query.refetch().await;
    let result = query.result();
    assert!(result.is_success());
    assert_eq!(result.error, None);
    assert_eq!(result.data, Some(3));
  }

  #[tokio::test]
  async fn test_drop_unsubscribes() {
    let client = QueryClient::new();
    let query = use_query(
      &client,
      "dropped",
      || async { Ok::<_, QueryError>(()) },
      QueryOptions::new().enabled(false),
    );
    assert_eq!(client.subscriber_count(), 1);
    drop(query);
    assert_eq!(client.subscriber_count(), 0);
  }

  #[tokio::test]
  async fn test_dropped_refetch_still_settles() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut query = use_query(
      &client,
      "users",
      counting_fetcher(calls.clone(), 1),
      QueryOptions::new().enabled(false),
    );

    drop(query.refetch());
    assert!(query.result().is_fetching);

    let result = query.settled().await;
    assert!(!result.is_fetching);
    assert_eq!(result.data, Some(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    query.refetch().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let other = use_query(
      &client,
      "users",
      counting_fetcher(calls.clone(), 2),
      QueryOptions::new().stale_time(Duration::from_secs(60)),
    );
    assert!(!other.result().is_fetching);
    assert_eq!(other.result().data, Some(1));
  }
}
