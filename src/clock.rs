//! Time source for `last_updated` stamps and staleness checks.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

use crate::lock::mutex_lock;

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to. Useful for staleness tests.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = mutex_lock(&self.now, "clock", "advance");
    *now += by;
  }

  pub fn set(&self, to: DateTime<Utc>) {
    *mutex_lock(&self.now, "clock", "set") = to;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *mutex_lock(&self.now, "clock", "now")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let start = Utc::now();
    let clock = ManualClock::new(start);
    assert_eq!(clock.now(), start);

    clock.advance(Duration::milliseconds(1500));
    assert_eq!(clock.now() - start, Duration::milliseconds(1500));

    clock.set(start);
    assert_eq!(clock.now(), start);
  }
}
