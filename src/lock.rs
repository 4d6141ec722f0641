use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Callbacks run outside of every lock, so a poisoned lock only means a panic
/// inside the store's own bookkeeping; the data is still a valid map.
pub(crate) fn mutex_lock<'a, T>(
  lock: &'a Mutex<T>,
  target: &'static str,
  op: &'static str,
) -> MutexGuard<'a, T> {
  match lock.lock() {
    Ok(guard) => guard,
    Err(poisoned) => {
      warn!(
        op,
        target_module = target,
        result = "poisoned_recovered",
        "Recovered from poisoned lock"
      );
      poisoned.into_inner()
    }
  }
}
