//! Clock abstraction for testable time handling.
//!
//! All coordination timestamps are Unix epoch milliseconds so they can be
//! stored and compared across processes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Real system clock
#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Fake clock for testing with controllable time
#[derive(Clone, Debug)]
pub struct FakeClock {
    current: Arc<Mutex<u64>>,
}

impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            current: Arc::new(Mutex::new(start_ms)),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += duration_ms(duration);
    }

    pub fn set(&self, now_ms: u64) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = now_ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
