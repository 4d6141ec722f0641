//! Mutations: one-shot writes with local, uncached state.
//!
//! Unlike queries, a mutation never touches the cache by itself. Its state lives
//! in the [`Mutation`] handle and is reset at the start of every attempt. To keep
//! queries in sync, invalidate them from `on_success`.
//!
//! # Example
//!
//! ```no_run
//! use qcache::{use_mutation, MutationOptions, QueryClient, QueryError};
//!
//! # async fn run() -> Result<(), QueryError> {
//! let client = QueryClient::new();
//! let invalidate = client.clone();
//! let create_user = use_mutation(
//!   |name: String| async move { Ok::<_, QueryError>(format!("created {name}")) },
//!   MutationOptions::new().on_success(move |_, _| invalidate.invalidate_queries("users")),
//! );
//!
//! let created = create_user.mutate("Ann".to_string()).await?;
//! assert!(!create_user.state().is_loading);
//! # Ok(())
//! # }
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::QueryError;
use crate::options::MutationOptions;

type MutationFn<T, V> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;

/// Local state of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationState<T> {
  pub is_loading: bool,
  pub is_error: bool,
  pub error: Option<QueryError>,
  pub data: Option<T>,
}

impl<T> MutationState<T> {
  pub fn idle() -> Self {
    Self {
      is_loading: false,
      is_error: false,
      error: None,
      data: None,
    }
  }

  fn loading() -> Self {
    Self {
      is_loading: true,
      ..Self::idle()
    }
  }

  fn success(data: T) -> Self {
    Self {
      data: Some(data),
      ..Self::idle()
    }
  }

  fn failure(error: QueryError) -> Self {
    Self {
      is_error: true,
      error: Some(error),
      ..Self::idle()
    }
  }

  pub fn is_success(&self) -> bool {
    !self.is_loading && !self.is_error && self.data.is_some()
  }
}

impl<T> Default for MutationState<T> {
  fn default() -> Self {
    Self::idle()
  }
}

struct Inner<T, V> {
  mutation_fn: MutationFn<T, V>,
  options: MutationOptions<T, V>,
  state: watch::Sender<MutationState<T>>,
}

/// A mutation handle. Clones share the same state.
pub struct Mutation<T, V> {
  inner: Arc<Inner<T, V>>,
  updates: watch::Receiver<MutationState<T>>,
}

/// Create a mutation bound to `mutation_fn`.
pub fn use_mutation<T, V, F, Fut, E>(mutation_fn: F, options: MutationOptions<T, V>) -> Mutation<T, V>
where
  T: Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
  F: Fn(V) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
  E: Into<QueryError> + 'static,
{
  Mutation::new(mutation_fn, options)
}

impl<T, V> Mutation<T, V>
where
  T: Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  pub fn new<F, Fut, E>(mutation_fn: F, options: MutationOptions<T, V>) -> Self
  where
    F: Fn(V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<QueryError> + 'static,
  {
    let mutation_fn: MutationFn<T, V> = Arc::new(move |variables| {
      let fut = mutation_fn(variables);
      async move {
        let result: Result<T, QueryError> = fut.await.map_err(Into::into);
        result
      }
      .boxed()
    });
    let (state, updates) = watch::channel(MutationState::idle());

    Self {
      inner: Arc::new(Inner {
        mutation_fn,
        options,
        state,
      }),
      updates,
    }
  }

  /// Run the mutation.
  ///
  /// Failures are recorded in the state and also returned, so callers can
  /// react through either channel. The attempt runs on its own task once
  /// started: dropping this future stops the wait, not the mutation, and the
  /// callbacks still fire exactly once.
  ///
  /// Must be called from within a Tokio runtime.
  pub async fn mutate(&self, variables: V) -> Result<T, QueryError> {
    self.inner.state.send_replace(MutationState::loading());
    debug!("Mutation started");

    let attempt = tokio::spawn(Arc::clone(&self.inner).run(variables));
    match attempt.await {
      Ok(outcome) => outcome,
      Err(e) => Err(QueryError::new(format!("Mutation task failed: {}", e))),
    }
  }

  /// Back to the initial state. Does not cancel a mutation in flight; its
  /// outcome will still be written when it resolves.
  pub fn reset(&self) {
    self.inner.state.send_replace(MutationState::idle());
  }

  pub fn state(&self) -> MutationState<T> {
    self.inner.state.borrow().clone()
  }

  /// Wait for the next state change.
  pub async fn changed(&mut self) -> MutationState<T> {
    // The sender is owned by `inner`, which this handle keeps alive
    let _ = self.updates.changed().await;
    self.updates.borrow_and_update().clone()
  }
}

impl<T, V> Inner<T, V>
where
  T: Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  async fn run(self: Arc<Self>, variables: V) -> Result<T, QueryError> {
    let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
      (self.mutation_fn)(variables.clone())
    }));
    let outcome = match started {
      Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(QueryError::from_panic(payload)),
      },
      Err(payload) => Err(QueryError::from_panic(payload)),
    };

    let options = &self.options;
    match outcome {
      Ok(data) => {
        self.state.send_replace(MutationState::success(data.clone()));
        debug!("Mutation succeeded");
        if let Some(on_success) = &options.on_success {
          on_success(&data, &variables);
        }
        if let Some(on_settled) = &options.on_settled {
          on_settled(Some(&data), None, &variables);
        }
        Ok(data)
      }
      Err(error) => {
        self.state.send_replace(MutationState::failure(error.clone()));
        debug!(%error, "Mutation failed");
        if let Some(on_error) = &options.on_error {
          on_error(&error, &variables);
        }
        if let Some(on_settled) = &options.on_settled {
          on_settled(None, Some(&error), &variables);
        }
        Err(error)
      }
    }
  }
}

impl<T, V> Clone for Mutation<T, V> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      updates: self.updates.clone(),
    }
  }
}

impl<T: std::fmt::Debug, V> std::fmt::Debug for Mutation<T, V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mutation")
      .field("state", &*self.inner.state.borrow())
      .finish_non_exhaustive()
  }
}
