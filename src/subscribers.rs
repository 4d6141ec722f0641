//! Change listeners for the query cache.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::lock::mutex_lock;

const SOURCE: &str = "subscribers";

pub(crate) type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
  listeners: Mutex<BTreeMap<u64, Listener>>,
  next_id: AtomicU64,
}

/// The set of callbacks told to "re-read the store now" after every write.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
  inner: Arc<Inner>,
}

impl SubscriberRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a listener. The returned handle removes exactly this registration.
  pub fn subscribe<F>(&self, callback: F) -> Unsubscribe
  where
    F: Fn() + Send + Sync + 'static,
  {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    mutex_lock(&self.inner.listeners, SOURCE, "subscribe").insert(id, Arc::new(callback));

    Unsubscribe {
      id,
      registry: Arc::downgrade(&self.inner),
      done: AtomicBool::new(false),
    }
  }

  /// Call every listener registered at the time of the call.
  ///
  /// Listeners run on a snapshot taken before the first call, with no lock held,
  /// so they may subscribe, unsubscribe or write to the store.
  pub fn notify(&self) {
    let snapshot: Vec<Listener> = mutex_lock(&self.inner.listeners, SOURCE, "notify")
      .values()
      .cloned()
      .collect();

    for listener in snapshot {
      listener();
    }
  }

  pub fn len(&self) -> usize {
    mutex_lock(&self.inner.listeners, SOURCE, "len").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl std::fmt::Debug for SubscriberRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SubscriberRegistry")
      .field("listeners", &self.len())
      .finish()
  }
}

/// Disposer returned by [`SubscriberRegistry::subscribe`].
///
/// Calling [`Unsubscribe::unsubscribe`] more than once is a no-op. Dropping the
/// handle does not unsubscribe.
#[derive(Debug)]
pub struct Unsubscribe {
  id: u64,
  registry: Weak<Inner>,
  done: AtomicBool,
}

impl Unsubscribe {
  pub fn unsubscribe(&self) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(inner) = self.registry.upgrade() {
      mutex_lock(&inner.listeners, SOURCE, "unsubscribe").remove(&self.id);
    }
  }

  pub fn is_active(&self) -> bool {
    !self.done.load(Ordering::Acquire) && self.registry.strong_count() > 0
  }
}

impl std::fmt::Debug for Inner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Inner").finish_non_exhaustive()
  }
}
