//! Per-call-site options for queries and mutations.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{QueryConfig, Retry};
use crate::error::QueryError;

pub(crate) type SuccessFn<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub(crate) type ErrorFn = Arc<dyn Fn(&QueryError) + Send + Sync>;

/// Options for [`crate::use_query`].
///
/// `cache_time`, `retry` and `retry_delay` are stored so callers can pass the
/// usual set of options, but nothing acts on them: entries are never evicted and
/// failed fetches are never retried.
pub struct QueryOptions<T> {
  pub enabled: bool,
  /// Falls back to the client's configured stale time when unset.
  pub stale_time: Option<Duration>,
  pub cache_time: Option<Duration>,
  pub retry: Option<Retry>,
  pub retry_delay: Option<Duration>,
  pub(crate) on_success: Option<SuccessFn<T>>,
  pub(crate) on_error: Option<ErrorFn>,
}

impl<T> QueryOptions<T> {
  pub fn new() -> Self {
    Self {
      enabled: true,
      stale_time: None,
      cache_time: None,
      retry: None,
      retry_delay: None,
      on_success: None,
      on_error: None,
    }
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  pub fn cache_time(mut self, cache_time: Duration) -> Self {
    self.cache_time = Some(cache_time);
    self
  }

  pub fn retry(mut self, retry: Retry) -> Self {
    self.retry = Some(retry);
    self
  }

  pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
    self.retry_delay = Some(retry_delay);
    self
  }

  pub fn on_success<F>(mut self, f: F) -> Self
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(f));
    self
  }

  pub fn on_error<F>(mut self, f: F) -> Self
  where
    F: Fn(&QueryError) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(f));
    self
  }

  pub(crate) fn effective_stale_time(&self, config: &QueryConfig) -> Duration {
    self.stale_time.unwrap_or_else(|| config.stale_time())
  }
}

impl<T> Default for QueryOptions<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for QueryOptions<T> {
  fn clone(&self) -> Self {
    Self {
      enabled: self.enabled,
      stale_time: self.stale_time,
      cache_time: self.cache_time,
      retry: self.retry,
      retry_delay: self.retry_delay,
      on_success: self.on_success.clone(),
      on_error: self.on_error.clone(),
    }
  }
}

impl<T> std::fmt::Debug for QueryOptions<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryOptions")
      .field("enabled", &self.enabled)
      .field("stale_time", &self.stale_time)
      .field("cache_time", &self.cache_time)
      .field("retry", &self.retry)
      .field("retry_delay", &self.retry_delay)
      .finish_non_exhaustive()
  }
}

pub(crate) type MutationSuccessFn<T, V> = Arc<dyn Fn(&T, &V) + Send + Sync>;
pub(crate) type MutationErrorFn<V> = Arc<dyn Fn(&QueryError, &V) + Send + Sync>;
pub(crate) type MutationSettledFn<T, V> =
  Arc<dyn Fn(Option<&T>, Option<&QueryError>, &V) + Send + Sync>;

/// Callbacks for [`crate::use_mutation`].
pub struct MutationOptions<T, V> {
  pub(crate) on_success: Option<MutationSuccessFn<T, V>>,
  pub(crate) on_error: Option<MutationErrorFn<V>>,
  pub(crate) on_settled: Option<MutationSettledFn<T, V>>,
}

impl<T, V> MutationOptions<T, V> {
  pub fn new() -> Self {
    Self {
      on_success: None,
      on_error: None,
      on_settled: None,
    }
  }

  pub fn on_success<F>(mut self, f: F) -> Self
  where
    F: Fn(&T, &V) + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(f));
    self
  }

  pub fn on_error<F>(mut self, f: F) -> Self
  where
    F: Fn(&QueryError, &V) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(f));
    self
  }

  /// Called exactly once per `mutate`, after `on_success` or `on_error`.
  pub fn on_settled<F>(mut self, f: F) -> Self
  where
    F: Fn(Option<&T>, Option<&QueryError>, &V) + Send + Sync + 'static,
  {
    self.on_settled = Some(Arc::new(f));
    self
  }
}

impl<T, V> Default for MutationOptions<T, V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T, V> Clone for MutationOptions<T, V> {
  fn clone(&self) -> Self {
    Self {
      on_success: self.on_success.clone(),
      on_error: self.on_error.clone(),
      on_settled: self.on_settled.clone(),
    }
  }
}
