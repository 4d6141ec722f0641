//! Scoped access to a shared [`QueryClient`].
//!
//! One client is created at startup and handed to [`QueryClientProvider::scope`];
//! anything running inside that future can reach it with [`query_client`]
//! instead of threading it through every call.

use std::future::Future;

use crate::client::QueryClient;
use crate::error::MissingClientError;

tokio::task_local! {
  static CLIENT: QueryClient;
}

pub struct QueryClientProvider;

impl QueryClientProvider {
  /// Run `f` with `client` available to [`query_client`].
  ///
  /// Scopes nest; the innermost client wins. Tasks spawned from inside the
  /// scope do not inherit it.
  pub async fn scope<F, R>(client: QueryClient, f: F) -> R
  where
    F: Future<Output = R>,
  {
    CLIENT.scope(client, f).await
  }

  /// Synchronous counterpart of [`QueryClientProvider::scope`].
  pub fn sync_scope<F, R>(client: QueryClient, f: F) -> R
  where
    F: FnOnce() -> R,
  {
    CLIENT.sync_scope(client, f)
  }
}

/// The client of the enclosing provider scope.
pub fn query_client() -> Result<QueryClient, MissingClientError> {
  CLIENT.try_with(QueryClient::clone).map_err(|_| MissingClientError)
}

/// Like [`query_client`], but `None` outside of a scope.
pub fn try_query_client() -> Option<QueryClient> {
  CLIENT.try_with(QueryClient::clone).ok()
}
