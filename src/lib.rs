#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod rate_limiter;
pub use rate_limiter::*;

pub mod local;
pub use local::EscalatingLocalRateLimiter;

mod clock;
pub use clock::*;

mod runtime;

mod error;
pub use error::*;

mod common;
pub use common::{
    KeyPrefix, Quota, RateLimitDecision, SweepIntervalMs, Tier, TierPolicy, WindowMs,
};

#[cfg(test)]
mod tests;
