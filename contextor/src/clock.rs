//! Time source for TTL bookkeeping.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Monotonic clock used by the response cache.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Tokio's clock; follows `tokio::time::pause` in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut off = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *off += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = *self.offset.lock().unwrap_or_else(|p| p.into_inner());
        self.base + off
    }
}
