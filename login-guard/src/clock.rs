//! Wall-clock port
//!
//! Window cutoffs and event timestamps are taken from a [`Clock`] so tests
//! can move time explicitly. Production code uses [`SystemClock`].

use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Port for obtaining the current time.
pub trait Clock: Send + Sync + Debug {
    /// Get the current UTC instant.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation using `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use super::Clock;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::{Arc, Mutex};

    /// Controllable clock for tests.
    ///
    /// All clones share the same underlying time value, so advancing one
    /// clone advances every component holding it.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current_time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        /// Create a mock clock starting at a specific instant.
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                current_time: Arc::new(Mutex::new(start)),
            }
        }

        /// Advance the clock by a duration.
        pub fn advance(&self, duration: Duration) {
            let mut time = self
                .current_time
                .lock()
                .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
            *time += duration;
        }

        /// Set the clock to a specific instant.
        pub fn set(&self, instant: DateTime<Utc>) {
            let mut time = self
                .current_time
                .lock()
                .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
            *time = instant;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .current_time
                .lock()
                .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.now() >= t1);
    }

    #[test]
    fn test_mock_clock_shared_between_clones() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let clock = MockClock::new(start);
        let other = clock.clone();

        other.advance(Duration::seconds(10));
        assert_eq!(clock.now(), start + Duration::seconds(10));

        clock.set(start);
        assert_eq!(other.now(), start);
    }
}
