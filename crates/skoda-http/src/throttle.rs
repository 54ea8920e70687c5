//! Rate-limit backoff window
//!
//! The vendor answers 429 when polled too fast. Once observed, operations
//! gated on the throttle are suppressed for `THROTTLE_WINDOW` from the
//! observation time.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Backoff applied after a 429.
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Earliest time a rate-limited operation may be retried.
#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    until: Mutex<Option<Instant>>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(THROTTLE_WINDOW)
    }
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            until: Mutex::new(None),
        }
    }

    /// Start a new backoff window at `now`. Returns the end of the window.
    pub fn engage_at(&self, now: Instant) -> Instant {
        let until = now + self.window;
        *self.until.lock().unwrap_or_else(PoisonError::into_inner) = Some(until);
        until
    }

    /// Start a new backoff window now.
    pub fn engage(&self) -> Instant {
        self.engage_at(Instant::now())
    }

    /// End of the current window, if one was ever engaged.
    pub fn until(&self) -> Option<Instant> {
        *self.until.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active_at(&self, now: Instant) -> bool {
        self.until().is_some_and(|until| now < until)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Instant::now())
    }

    /// Time left in the current window (zero once elapsed).
    pub fn remaining(&self) -> Option<Duration> {
        self.until()
            .map(|until| until.saturating_duration_since(Instant::now()))
    }
}
