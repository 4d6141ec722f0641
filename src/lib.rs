//! # qcache
//!
//! A small async data-fetching cache, inspired by TanStack Query.
//!
//! - [`QueryClient`]: the shared cache. Maps canonical keys to query state and
//!   notifies listeners after every write.
//! - [`use_query`]: binds a key and a fetcher to the cache. Deduplicates
//!   in-flight fetches and refetches stale data.
//! - [`use_mutation`]: one-shot writes with their own local state.
//! - [`QueryClientProvider`]: makes one client reachable from anywhere inside a
//!   task.
//!
//! Fetchers and mutation functions are plain async closures supplied by the
//! caller; this crate never does I/O of its own.
//!
//! ## Example
//!
//! ```no_run
//! use qcache::{use_query, QueryClient, QueryError, QueryOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!   let client = QueryClient::new();
//!   let mut todos = use_query(
//!     &client,
//!     "todos",
//!     || async { Ok::<_, QueryError>(vec!["write docs"]) },
//!     QueryOptions::new(),
//!   );
//!
//!   let result = todos.settled().await;
//!   assert_eq!(result.data, Some(vec!["write docs"]));
//! }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod key;
mod lock;
pub mod mutation;
pub mod options;
pub mod provider;
pub mod query;
pub mod state;
pub mod subscribers;

pub use client::QueryClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{QueryConfig, Retry};
pub use error::{MissingClientError, QueryError};
pub use key::{canonicalize, CacheKey, KeyPart, QueryKey};
pub use mutation::{use_mutation, Mutation, MutationState};
pub use options::{MutationOptions, QueryOptions};
pub use provider::{query_client, try_query_client, QueryClientProvider};
pub use query::{should_fetch, use_query, QueryObserver, QueryResult};
pub use state::{FetchStatus, QueryState, QueryStateUpdate, QueryStatus};
pub use subscribers::{SubscriberRegistry, Unsubscribe};
