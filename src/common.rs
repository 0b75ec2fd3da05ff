use std::{
    ops::Deref,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::TierLimitError;

/// Maximum number of requests admitted in one window of a [`Tier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quota(u32);

impl Deref for Quota {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u32> for Quota {
    type Error = TierLimitError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(TierLimitError::InvalidPolicy(
                "Quota must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<i64> for Quota {
    type Error = TierLimitError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            return Err(TierLimitError::InvalidPolicy(
                "Quota must be greater than 0".to_string(),
            ));
        }

        u32::try_from(value).map(Self).map_err(|_| {
            TierLimitError::InvalidPolicy(format!("Quota must not exceed {}", u32::MAX))
        })
    }
}

/// Length of one window of a [`Tier`], in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowMs(u64);

impl WindowMs {
    /// The window as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Deref for WindowMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for WindowMs {
    type Error = TierLimitError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(TierLimitError::InvalidPolicy(
                "Window must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<i64> for WindowMs {
    type Error = TierLimitError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        // Negative values fail the conversion, zero fails the u64 check.
        u64::try_from(value)
            .map_err(|_| TierLimitError::InvalidPolicy("Window must be greater than 0".to_string()))
            .and_then(<Self as TryFrom<u64>>::try_from)
    }
}

/// A (quota, window) pair: at most `quota` requests per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tier {
    /// Requests admitted per window.
    pub quota: Quota,
    /// Window length.
    pub window_ms: WindowMs,
}

impl Tier {
    /// Build a tier from raw values, validating both.
    pub fn new(quota: i64, window_ms: i64) -> Result<Self, TierLimitError> {
        Ok(Self {
            quota: Quota::try_from(quota)?,
            window_ms: WindowMs::try_from(window_ms)?,
        })
    }

    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        self.window_ms.as_duration()
    }
}

impl Default for Tier {
    /// 1000 requests per 60 seconds.
    fn default() -> Self {
        Self {
            quota: Quota(1000),
            window_ms: WindowMs(60_000),
        }
    }
}

/// Ordered, non-empty list of tiers.
///
/// Tier 1 (the first entry) is the most lenient and is used for a fresh identifier.
/// Later tiers are entered one step at a time while the identifier keeps opening new
/// windows before its escalation state expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy(Vec<Tier>);

impl TierPolicy {
    /// A policy with a single tier. It never escalates.
    pub fn single(tier: Tier) -> Self {
        Self(vec![tier])
    }

    /// All tiers in order.
    pub fn tiers(&self) -> &[Tier] {
        &self.0
    }

    /// Number of tiers; always at least 1.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the policy has no tiers. Never true for a constructed policy.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tier by 1-based index, clamped into `[1, len]`.
    pub(crate) fn tier(&self, index: usize) -> (usize, Tier) {
        let index = index.clamp(1, self.0.len());
        (index, self.0[index - 1])
    }
}

impl TryFrom<Vec<Tier>> for TierPolicy {
    type Error = TierLimitError;

    fn try_from(tiers: Vec<Tier>) -> Result<Self, Self::Error> {
        if tiers.is_empty() {
            Err(TierLimitError::InvalidPolicy(
                "Policy must contain at least one tier".to_string(),
            ))
        } else {
            Ok(Self(tiers))
        }
    }
}

/// Parses a flat `[quota, window_ms, quota, window_ms, ...]` sequence.
impl TryFrom<&[i64]> for TierPolicy {
    type Error = TierLimitError;

    fn try_from(raw: &[i64]) -> Result<Self, Self::Error> {
        if raw.len() % 2 == 1 {
            return Err(TierLimitError::InvalidPolicy(
                "Tier arguments must be (quota, window_ms) pairs".to_string(),
            ));
        }

        raw.chunks_exact(2)
            .map(|pair| Tier::new(pair[0], pair[1]))
            .collect::<Result<Vec<_>, _>>()
            .and_then(<Self as TryFrom<Vec<Tier>>>::try_from)
    }
}

/// Namespace prepended to every identifier before it is used as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix(Arc<str>);

impl KeyPrefix {
    /// Build the counter key for `identifier`.
    pub(crate) fn key_for(&self, identifier: &str) -> String {
        let mut key = String::with_capacity(self.0.len() + identifier.len());
        key.push_str(&self.0);
        key.push_str(identifier);
        key
    }
}

impl Default for KeyPrefix {
    /// Returns `"limit:"`.
    fn default() -> Self {
        Self(Arc::from("limit:"))
    }
}

impl Deref for KeyPrefix {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = TierLimitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(TierLimitError::InvalidOption(
                "Key prefix must not be empty".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for KeyPrefix {
    type Error = TierLimitError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// Period of the background cleanup loop, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SweepIntervalMs(u64);

impl Default for SweepIntervalMs {
    /// Returns a sweep interval of 5 seconds.
    fn default() -> Self {
        Self(5_000)
    }
}

impl Deref for SweepIntervalMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for SweepIntervalMs {
    type Error = TierLimitError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(TierLimitError::InvalidOption(
                "Sweep interval must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Outcome of a single admission check.
///
/// `remaining` is `-1` once the window's quota is used up; callers should reject the
/// request and retry after [`reset_at`](Self::reset_at).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Quota of the window in effect.
    pub total: u32,
    /// Requests left in the window after this one, or `-1` when over quota.
    pub remaining: i64,
    /// Length of the window in effect.
    pub window: Duration,
    /// Instant the window in effect ends.
    pub reset_at: Instant,
    /// 1-based index of the tier the window was opened with.
    pub tier: usize,
}

impl RateLimitDecision {
    /// Whether the request is within quota.
    pub fn is_allowed(&self) -> bool {
        self.remaining >= 0
    }

    /// How long a rejected caller should wait. Zero when allowed or already reset.
    pub fn retry_after(&self, now: Instant) -> Duration {
        if self.is_allowed() {
            Duration::ZERO
        } else {
            self.reset_at.saturating_duration_since(now)
        }
    }
}
