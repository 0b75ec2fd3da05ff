/// Error type for this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TierLimitError {
    /// Tier arguments are malformed: odd length, a non-positive quota or window, or an
    /// empty typed policy.
    ///
    /// Returned before any state is touched, so the caller can fix the arguments and retry.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    /// A configuration value was rejected while building [`RateLimiterOptions`](crate::RateLimiterOptions).
    #[error("invalid option: {0}")]
    InvalidOption(String),
}
