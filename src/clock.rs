//! Time source and fixed-window arithmetic

use chrono::{DateTime, Duration, Utc};
#[cfg(test)]
use parking_lot::Mutex;

/// Wall-clock source, swappable so window and time-limit math can be tested
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Earliest start a window may have and still be active at `now`
pub fn window_floor(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now - window
}

/// A window is expired once strictly more than `window` has passed since it opened
pub fn is_expired(started_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now - started_at > window
}

/// Whole seconds until the window opened at `started_at` closes, rounded up, never negative
pub fn seconds_until_close(started_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> i64 {
    let remaining_ms = (started_at + window - now).num_milliseconds();
    if remaining_ms <= 0 {
        0
    } else {
        (remaining_ms + 999) / 1000
    }
}

/// Whole seconds elapsed between two instants, floored at zero
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i32 {
    (to - from).num_seconds().max(0) as i32
}
