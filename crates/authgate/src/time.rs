//! Wall-clock abstraction for testability.
//!
//! Every expiry decision in the engine (token `exp`, refresh windows, store
//! TTLs) reads time through a [`Clock`], so tests can pin and advance it.
//!
//! # Example
//!
//! ```
//! use authgate::time::{Clock, MockClock};
//! use chrono::Duration;
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::seconds(5));
//! assert_eq!(clock.now() - start, Duration::seconds(5));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

/// Abstraction over wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current time as epoch milliseconds.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// System clock that uses real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A mock clock for testing time-dependent code.
///
/// Starts at the instant it was created and only moves when told to.
#[derive(Debug)]
pub struct MockClock {
    base: DateTime<Utc>,
    offset_millis: AtomicI64,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Creates a mock clock frozen at the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Creates a mock clock frozen at `base`.
    #[must_use]
    pub const fn at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            offset_millis: AtomicI64::new(0),
        }
    }

    /// Creates a mock clock that can be shared across components.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advances the clock (negative durations move it back).
    pub fn advance(&self, duration: Duration) {
        self.offset_millis
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }

    /// Resets the clock to its base time.
    pub fn reset(&self) {
        self.offset_millis.store(0, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + Duration::milliseconds(self.offset_millis.load(Ordering::SeqCst))
    }
}

impl Clock for Arc<MockClock> {
    fn now(&self) -> DateTime<Utc> {
        self.as_ref().now()
    }
}
