//! Injectable clocks used to stamp state updates.

use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

/// A source of the current time.
pub trait QueryClock: Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> SystemTime;
}

/// The wall clock. This is the default clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl QueryClock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```ignore
/// let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH));
/// let context = QueryContext::new().with_clock(clock.clone());
/// clock.advance(Duration::from_secs(5));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Set the current time. Moving backwards is allowed.
    pub fn set(&self, now: SystemTime) {
        *self.now.lock() = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl QueryClock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}
