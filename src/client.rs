//! The shared query cache.
//!
//! [`QueryClient`] owns the mapping from canonical key to query state and the
//! set of change listeners. All writes go through its setters; each one stamps
//! `last_updated` and notifies every listener once the store lock is released.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::QueryConfig;
use crate::key::{CacheKey, QueryKey};
use crate::lock::mutex_lock;
use crate::state::{Entry, FetchStatus, QueryState, QueryStateUpdate, QueryStatus};
use crate::subscribers::{SubscriberRegistry, Unsubscribe};

const SOURCE: &str = "client";

struct Inner {
  cache: Mutex<HashMap<CacheKey, Entry>>,
  subscribers: SubscriberRegistry,
  clock: Arc<dyn Clock>,
  config: QueryConfig,
}

/// A handle to the query cache. Cloning is cheap and every clone shares the
/// same entries and listeners.
///
/// # Example
///
/// ```
/// use qcache::QueryClient;
///
/// let client = QueryClient::new();
/// client.set_query_data("greeting", String::from("hello"));
/// assert_eq!(client.get_query_data::<String>("greeting").as_deref(), Some("hello"));
/// ```
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl QueryClient {
  /// Creates a client with default configuration and the system clock.
  #[must_use]
  pub fn new() -> Self {
    Self::with_config(QueryConfig::default())
  }

  #[must_use]
  pub fn with_config(config: QueryConfig) -> Self {
    Self::with_clock(config, Arc::new(SystemClock))
  }

  #[must_use]
  pub fn with_clock(config: QueryConfig, clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Arc::new(Inner {
        cache: Mutex::new(HashMap::new()),
        subscribers: SubscriberRegistry::new(),
        clock,
        config,
      }),
    }
  }

  pub fn config(&self) -> &QueryConfig {
    &self.inner.config
  }

  pub fn clock(&self) -> &dyn Clock {
    self.inner.clock.as_ref()
  }

  pub(crate) fn now(&self) -> DateTime<Utc> {
    self.inner.clock.now()
  }

  /// Last known data for the key, regardless of status or error.
  pub fn get_query_data<T>(&self, key: impl Into<QueryKey>) -> Option<T>
  where
    T: Clone + Send + Sync + 'static,
  {
    let key = key.into().cache_key();
    let cache = mutex_lock(&self.inner.cache, SOURCE, "get_query_data");
    let entry = cache.get(&key)?;
    downcast_data(&key, entry)
  }

  /// Force the key into a successful state holding `data`.
  pub fn set_query_data<T>(&self, key: impl Into<QueryKey>, data: T)
  where
    T: Send + Sync + 'static,
  {
    let update = QueryStateUpdate::new()
      .data(data)
      .status(QueryStatus::Success)
      .fetch_status(FetchStatus::Idle)
      .clear_error();
    self.write(key.into().cache_key(), update, "set_query_data");
  }

  /// Mark the key as stale by resetting `last_updated` to the epoch.
  ///
  /// Data and status are untouched. Keys that were never written are ignored
  /// and nobody is notified.
  pub fn invalidate_queries(&self, key: impl Into<QueryKey>) {
    let key = key.into().cache_key();
    {
      let mut cache = mutex_lock(&self.inner.cache, SOURCE, "invalidate_queries");
      match cache.get_mut(&key) {
        Some(entry) => entry.last_updated = DateTime::<Utc>::UNIX_EPOCH,
        None => {
          debug!(key = %key.fingerprint(), "Invalidate skipped, no entry");
          return;
        }
      }
    }
    debug!(key = %key.fingerprint(), "Query invalidated");
    self.inner.subscribers.notify();
  }

  /// Full record for the key with data downcast to `T`.
  pub fn get_query_state<T>(&self, key: impl Into<QueryKey>) -> Option<QueryState<T>>
  where
    T: Clone + Send + Sync + 'static,
  {
    let key = key.into().cache_key();
    self.state_for(&key)
  }

  /// Merge a partial update onto the key's record, creating an idle record
  /// first if needed.
  pub fn set_query_state(&self, key: impl Into<QueryKey>, update: QueryStateUpdate) {
    self.write(key.into().cache_key(), update, "set_query_state");
  }

  /// Register a listener that is called after every write.
  pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
  where
    F: Fn() + Send + Sync + 'static,
  {
    self.inner.subscribers.subscribe(callback)
  }

  /// Number of registered listeners.
  pub fn subscriber_count(&self) -> usize {
    self.inner.subscribers.len()
  }

  /// Atomically claim the in-flight slot for a key.
  ///
  /// Returns `false` without writing anything if a fetch is already in flight.
  /// Otherwise moves the key to loading/fetching, notifies, and returns `true`.
  pub fn begin_fetch(&self, key: impl Into<QueryKey>) -> bool {
    let key = key.into().cache_key();
    self.begin_fetch_for(&key)
  }

  /// Number of keys with a fetch in flight.
  pub fn is_fetching(&self) -> usize {
    mutex_lock(&self.inner.cache, SOURCE, "is_fetching")
      .values()
      .filter(|entry| entry.fetch_status == FetchStatus::Fetching)
      .count()
  }

  pub(crate) fn begin_fetch_for(&self, key: &CacheKey) -> bool {
    let now = self.now();
    {
      let mut cache = mutex_lock(&self.inner.cache, SOURCE, "begin_fetch");
      let entry = cache.entry(key.clone()).or_insert_with(Entry::idle);
      if entry.fetch_status == FetchStatus::Fetching {
        return false;
      }
      entry.merge(
        QueryStateUpdate::new()
          .status(QueryStatus::Loading)
          .fetch_status(FetchStatus::Fetching),
        now,
      );
    }
    self.inner.subscribers.notify();
    true
  }

  pub(crate) fn write(&self, key: CacheKey, update: QueryStateUpdate, op: &'static str) {
    let now = self.now();
    {
      let mut cache = mutex_lock(&self.inner.cache, SOURCE, op);
      cache.entry(key).or_insert_with(Entry::idle).merge(update, now);
    }
    self.inner.subscribers.notify();
  }

  pub(crate) fn state_for<T>(&self, key: &CacheKey) -> Option<QueryState<T>>
  where
    T: Clone + Send + Sync + 'static,
  {
    let cache = mutex_lock(&self.inner.cache, SOURCE, "get_query_state");
    let entry = cache.get(key)?;
    Some(QueryState {
      data: downcast_data(key, entry),
      error: entry.error.clone(),
      status: entry.status,
      fetch_status: entry.fetch_status,
      last_updated: entry.last_updated,
    })
  }
}

fn downcast_data<T>(key: &CacheKey, entry: &Entry) -> Option<T>
where
  T: Clone + Send + Sync + 'static,
{
  let data = entry.data.as_ref()?;
  match data.downcast_ref::<T>() {
    Some(value) => Some(value.clone()),
    None => {
      warn!(
        key = %key.fingerprint(),
        expected = std::any::type_name::<T>(),
        "Cached data has a different type, treating as absent"
      );
      None
    }
  }
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let entries = mutex_lock(&self.inner.cache, SOURCE, "debug").len();
    f.debug_struct("QueryClient")
      .field("entries", &entries)
      .field("subscribers", &self.inner.subscribers)
      .field("config", &self.inner.config)
      .finish_non_exhaustive()
  }
}
