//! Error types for queries and mutations.

use std::any::Any;
use thiserror::Error;

/// The single failure kind produced by a fetcher or mutation function.
///
/// Whatever a fetcher fails with is normalized into this type before it is
/// stored in the cache or handed to callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
  #[error("{0}")]
  Failed(String),

  /// The failure carried nothing usable as a message (e.g. a non-string panic payload).
  #[error("An error occurred")]
  Unknown,
}

impl QueryError {
  pub fn new(message: impl Into<String>) -> Self {
    QueryError::Failed(message.into())
  }

  /// Normalize any standard error.
  pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
    QueryError::Failed(error.to_string())
  }

  /// Normalize a panic payload caught while awaiting a fetcher.
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    if let Some(s) = payload.downcast_ref::<&str>() {
      QueryError::Failed((*s).to_string())
    } else if let Some(s) = payload.downcast_ref::<String>() {
      QueryError::Failed(s.clone())
    } else {
      QueryError::Unknown
    }
  }

  pub fn message(&self) -> String {
    self.to_string()
  }
}

impl From<String> for QueryError {
  fn from(message: String) -> Self {
    QueryError::Failed(message)
  }
}

impl From<&str> for QueryError {
  fn from(message: &str) -> Self {
    QueryError::Failed(message.to_string())
  }
}

impl From<std::io::Error> for QueryError {
  fn from(e: std::io::Error) -> Self {
    QueryError::from_error(&e)
  }
}

impl From<serde_json::Error> for QueryError {
  fn from(e: serde_json::Error) -> Self {
    QueryError::from_error(&e)
  }
}

impl From<color_eyre::Report> for QueryError {
  fn from(e: color_eyre::Report) -> Self {
    QueryError::Failed(e.to_string())
  }
}

/// Returned by [`crate::query_client`] outside of a provider scope.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("query_client() must be called within a QueryClientProvider scope")]
pub struct MissingClientError;
