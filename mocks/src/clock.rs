//! A virtual clock for deterministic lease-expiry and scheduling tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use marcus_core::collaborators::Clock;
use parking_lot::Mutex;

/// A clock whose `now()` is fixed until explicitly advanced. Tests drive
/// lease expiry and reconciliation without real sleeps.
pub struct VirtualClock {
    now: Mutex<DateTime<Utc>>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(start) })
    }

    pub fn starting_now() -> Arc<Self> {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
