//! Time source used by the limiter.
//!
//! Every decision reads "now" from a [`Clock`], so window expiry and tier escalation can
//! be driven deterministically in tests with `MockClock` (available in test builds and
//! with the `test-helpers` feature).

use std::time::Instant;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use std::{
        sync::{Arc, Mutex, PoisonError},
        time::{Duration, Instant},
    };

    use super::Clock;

    /// Manually advanced clock. Clones share the same instant.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        /// Create a clock frozen at `start`.
        pub fn new(start: Instant) -> Self {
            Self {
                current: Arc::new(Mutex::new(start)),
            }
        }

        /// Move the clock forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            *self.current.lock().unwrap_or_else(PoisonError::into_inner) += duration;
        }

        /// Set the clock to `instant`.
        pub fn set(&self, instant: Instant) {
            *self.current.lock().unwrap_or_else(PoisonError::into_inner) = instant;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
