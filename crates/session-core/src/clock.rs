//! Injectable time source.
//!
//! The JWKS cache measures freshness and rate limits against a monotonic
//! [`Instant`], while token `iat`/`exp` and dynamic key rotation are based on
//! wall-clock unix time. Both come from a single [`Clock`] so tests can move
//! them together without sleeping.

use std::fmt;
use std::time::Instant;

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic instant used for cache bookkeeping.
    fn now(&self) -> Instant;

    /// Milliseconds since the unix epoch.
    fn unix_millis(&self) -> i64;

    /// Seconds since the unix epoch (JWT `iat`/`exp` granularity).
    fn unix_seconds(&self) -> i64 {
        self.unix_millis().div_euclid(1000)
    }
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-utils"))]
mod manual {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    /// Clock that only moves when told to.
    ///
    /// Starts at the real current time; [`ManualClock::advance`] moves the
    /// monotonic and wall-clock readings forward by the same amount.
    #[derive(Debug)]
    pub struct ManualClock {
        origin: Instant,
        origin_unix_ms: i64,
        offset_ms: AtomicU64,
    }

    impl ManualClock {
        /// Create a clock anchored at the current system time.
        #[must_use]
        pub fn new() -> Self {
            Self::starting_at(chrono::Utc::now().timestamp_millis())
        }

        /// Create a clock whose wall-clock reading starts at `unix_ms`.
        #[must_use]
        pub fn starting_at(unix_ms: i64) -> Self {
            Self {
                origin: Instant::now(),
                origin_unix_ms: unix_ms,
                offset_ms: AtomicU64::new(0),
            }
        }

        /// Move time forward.
        pub fn advance(&self, by: Duration) {
            let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
            self.offset_ms.fetch_add(ms, Ordering::SeqCst);
        }

        fn offset(&self) -> u64 {
            self.offset_ms.load(Ordering::SeqCst)
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + Duration::from_millis(self.offset())
        }

        fn unix_millis(&self) -> i64 {
            let offset = i64::try_from(self.offset()).unwrap_or(i64::MAX);
            self.origin_unix_ms.saturating_add(offset)
        }
    }
}
