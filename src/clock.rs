//! Clock abstraction: monotonic milliseconds used for timestamps and deadlines.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Supplies the current time in milliseconds, for slot timestamps and acquire deadlines.
///
/// Readings must be monotonic: a later call must never return a value smaller than an
/// earlier one, even across NTP steps or manual clock changes. Deadlines and idle-time
/// computations throughout the pool assume this holds.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since an arbitrary but fixed epoch.
    fn millis(&self) -> i64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn millis(&self) -> i64 {
        (**self).millis()
    }
}

/// A [`Clock`] backed by [`Instant`], so readings can never regress the way a wall clock
/// can under an NTP step or a manual time change.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }
}

/// A [`Clock`] test double whose reading is set directly by the test driving it.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Construct a manual clock starting at `millis`.
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Set the clock's reading.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::Release);
    }

    /// Advance the clock's reading by `delta` milliseconds.
    pub fn advance(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> i64 {
        self.millis.load(Ordering::Acquire)
    }
}
