//! Per-key query state and partial updates.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;

use crate::error::QueryError;

/// Coarse lifecycle of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryStatus {
  /// Never fetched or set
  #[default]
  Idle,
  Loading,
  Error,
  Success,
}

/// Whether a fetch is in flight for the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchStatus {
  #[default]
  Idle,
  Fetching,
}

/// The full record for one cached query, with data downcast to `T`.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  /// Last known good data. Survives errors.
  pub data: Option<T>,
  pub error: Option<QueryError>,
  pub status: QueryStatus,
  pub fetch_status: FetchStatus,
  /// Unix epoch means invalidated or never written.
  pub last_updated: DateTime<Utc>,
}

impl<T> QueryState<T> {
  /// The state assumed for a key that has no entry yet.
  pub fn idle() -> Self {
    Self {
      data: None,
      error: None,
      status: QueryStatus::Idle,
      fetch_status: FetchStatus::Idle,
      last_updated: DateTime::<Utc>::UNIX_EPOCH,
    }
  }

  pub fn is_fetching(&self) -> bool {
    self.fetch_status == FetchStatus::Fetching
  }
}

impl<T> Default for QueryState<T> {
  fn default() -> Self {
    Self::idle()
  }
}

pub(crate) type ErasedData = Arc<dyn Any + Send + Sync>;

/// Type-erased record as held by the store.
#[derive(Clone)]
pub(crate) struct Entry {
  pub data: Option<ErasedData>,
  pub error: Option<QueryError>,
  pub status: QueryStatus,
  pub fetch_status: FetchStatus,
  pub last_updated: DateTime<Utc>,
}

impl Entry {
  pub fn idle() -> Self {
    Self {
      data: None,
      error: None,
      status: QueryStatus::Idle,
      fetch_status: FetchStatus::Idle,
      last_updated: DateTime::<Utc>::UNIX_EPOCH,
    }
  }

  /// Merge a partial update onto this record. Data is only replaced when the
  /// update carries some.
  pub fn merge(&mut self, update: QueryStateUpdate, now: DateTime<Utc>) {
    if let Some(status) = update.status {
      self.status = status;
    }
    if let Some(fetch_status) = update.fetch_status {
      self.fetch_status = fetch_status;
    }
    if let Some(error) = update.error {
      self.error = error;
    }
    if let Some(data) = update.data {
      self.data = Some(data);
    }
    self.last_updated = now;
  }
}

impl std::fmt::Debug for Entry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Entry")
      .field("has_data", &self.data.is_some())
      .field("error", &self.error)
      .field("status", &self.status)
      .field("fetch_status", &self.fetch_status)
      .field("last_updated", &self.last_updated)
      .finish()
  }
}

/// A partial write for [`crate::QueryClient::set_query_state`].
///
/// Fields left unset keep their current value.
///
/// ```
/// use qcache::{FetchStatus, QueryStateUpdate, QueryStatus};
///
/// let update = QueryStateUpdate::new()
///   .status(QueryStatus::Loading)
///   .fetch_status(FetchStatus::Fetching);
/// ```
#[derive(Default, Clone)]
pub struct QueryStateUpdate {
  pub(crate) data: Option<ErasedData>,
  pub(crate) error: Option<Option<QueryError>>,
  pub(crate) status: Option<QueryStatus>,
  pub(crate) fetch_status: Option<FetchStatus>,
}

impl QueryStateUpdate {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn status(mut self, status: QueryStatus) -> Self {
    self.status = Some(status);
    self
  }

  pub fn fetch_status(mut self, fetch_status: FetchStatus) -> Self {
    self.fetch_status = Some(fetch_status);
    self
  }

  pub fn data<T: Send + Sync + 'static>(mut self, data: T) -> Self {
    self.data = Some(Arc::new(data));
    self
  }

  pub fn error(mut self, error: QueryError) -> Self {
    self.error = Some(Some(error));
    self
  }

  pub fn clear_error(mut self) -> Self {
    self.error = Some(None);
    self
  }
}

impl std::fmt::Debug for QueryStateUpdate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryStateUpdate")
      .field("has_data", &self.data.is_some())
      .field("error", &self.error)
      .field("status", &self.status)
      .field("fetch_status", &self.fetch_status)
      .finish()
  }
}
