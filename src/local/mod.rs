//! In-process rate limiting with escalating tiers.
//!
//! State lives in the current process, in thread-safe data structures
//! ([`DashMap`](dashmap::DashMap) and atomics):
//!
//! - a **counter store** holding each identifier's current window (quota, remaining
//!   count, expiry)
//! - an **escalation tracker** holding, for multi-tier identifiers, the tier in effect and
//!   how long that choice is remembered
//!
//! # Key Characteristics
//!
//! - **Thread-safe:** Safe for concurrent use across multiple threads
//! - **No I/O:** Every decision is a map lookup and an atomic operation
//! - **Process-scoped:** State is neither persisted nor shared across processes
//!
//! # Escalation
//!
//! With tiers `[(3, 30s), (2, 60s)]`, an identifier starts on tier 1. A new window opened
//! within 60 s (twice tier 1's window) of the previous tier selection moves it to tier 2,
//! where it stays while it keeps coming back within 120 s. After a longer pause it starts
//! over on tier 1.
//!
//! # Examples
//!
//! ```
//! use tierlimit::{RateLimiter, RateLimiterOptions};
//!
//! let rl = RateLimiter::new(RateLimiterOptions::default());
//!
//! let decision = rl.local().decide("user_123", &[3, 30_000, 2, 60_000]).unwrap();
//! assert!(decision.is_allowed());
//! assert_eq!(decision.tier, 1);
//! ```

mod counter_store;
pub(crate) use counter_store::*;

mod escalation_tracker;
pub(crate) use escalation_tracker::*;

mod escalating_local_rate_limiter;
pub use escalating_local_rate_limiter::*;
