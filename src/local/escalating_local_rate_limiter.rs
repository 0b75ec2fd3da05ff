use crate::{
    Clock, RateLimiterOptions, SystemClock, TierLimitError,
    common::{KeyPrefix, RateLimitDecision, Tier, TierPolicy},
    local::{CounterStore, EscalationTracker},
};

/// Fixed-window rate limiter with escalating tiers, for in-process use.
///
/// Every identifier gets a window of `quota` requests per `window`. With a multi-tier
/// policy, each fresh window opened while the identifier's escalation state is alive
/// uses the next (stricter) tier; the state outlives a tier's selection by twice that
/// tier's window, after which the identifier starts over at tier 1.
///
/// # Algorithm
///
/// 1. **Live window:** decrement `remaining`, never below `-1`
/// 2. **No window / window ended:** pick a tier (tier 1 for single-tier policies,
///    otherwise ask the escalation tracker), open a window with `remaining = quota - 1`
/// 3. **Decision:** `remaining >= 0` admits the request, `-1` rejects it until `reset_at`
///
/// Escalation is only evaluated at window boundaries, never in the middle of a window.
///
/// # Thread Safety
///
/// - Uses [`DashMap`](dashmap::DashMap) for both the counters and the escalation state
/// - Decrements are lock-free CAS operations on an atomic counter
/// - Opening a window is serialized per key, so an initial burst admits exactly `quota`
///
/// # Memory growth
///
/// - Counter entries stay until their window ends and [`cleanup`](Self::cleanup) runs
/// - Escalation entries of multi-tier identifiers are never swept; they are dropped by
///   [`remove`](Self::remove) only
///
/// # Examples
///
/// ```
/// use tierlimit::{RateLimiter, RateLimiterOptions};
///
/// let rl = RateLimiter::new(RateLimiterOptions::default());
/// let limiter = rl.local();
///
/// // 3 requests per 100 ms.
/// assert_eq!(limiter.decide("10.0.0.1", &[3, 100]).unwrap().remaining, 2);
/// assert_eq!(limiter.decide("10.0.0.1", &[3, 100]).unwrap().remaining, 1);
/// assert_eq!(limiter.decide("10.0.0.1", &[3, 100]).unwrap().remaining, 0);
///
/// let decision = limiter.decide("10.0.0.1", &[3, 100]).unwrap();
/// assert!(!decision.is_allowed());
/// assert_eq!(decision.remaining, -1);
/// ```
pub struct EscalatingLocalRateLimiter<C = SystemClock> {
    key_prefix: KeyPrefix,
    default_tier: Tier,
    counters: CounterStore,
    escalations: EscalationTracker,
    clock: C,
}

impl<C: Clock> EscalatingLocalRateLimiter<C> {
    pub(crate) fn new(options: RateLimiterOptions, clock: C) -> Self {
        Self {
            key_prefix: options.key_prefix,
            default_tier: options.default_tier,
            counters: CounterStore::new(),
            escalations: EscalationTracker::new(),
            clock,
        }
    } // end constructor

    #[cfg(test)]
    pub(crate) fn counters(&self) -> &CounterStore {
        &self.counters
    }

    #[cfg(test)]
    pub(crate) fn escalations(&self) -> &EscalationTracker {
        &self.escalations
    }

    pub(crate) fn key_for(&self, identifier: &str) -> String {
        self.key_prefix.key_for(identifier)
    }

    /// Admit or reject one request for `identifier`.
    ///
    /// # Arguments
    ///
    /// - `identifier`: the rate-limited subject (client IP, API key, ...)
    /// - `tier_args`: flat `[quota, window_ms, quota, window_ms, ...]` pairs, most lenient
    ///   first. Empty means the configured default tier.
    ///
    /// # Errors
    ///
    /// [`TierLimitError::InvalidPolicy`] for an odd number of values or a non-positive
    /// quota or window. Nothing is recorded for `identifier` in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use tierlimit::{RateLimiter, RateLimiterOptions, TierLimitError};
    ///
    /// let rl = RateLimiter::new(RateLimiterOptions::default());
    ///
    /// // 3 per 30 s, then 2 per 60 s for repeat offenders.
    /// let decision = rl.local().decide("/login", &[3, 30_000, 2, 60_000]).unwrap();
    /// assert_eq!((decision.total, decision.remaining, decision.tier), (3, 2, 1));
    ///
    /// // Defaults: 1000 per minute.
    /// let decision = rl.local().decide("/search", &[]).unwrap();
    /// assert_eq!((decision.total, decision.remaining), (1000, 999));
    ///
    /// assert!(matches!(
    ///     rl.local().decide("/login", &[10, 1000, 1]),
    ///     Err(TierLimitError::InvalidPolicy(_))
    /// ));
    /// ```
    pub fn decide(
        &self,
        identifier: &str,
        tier_args: &[i64],
    ) -> Result<RateLimitDecision, TierLimitError> {
        if tier_args.is_empty() {
            return Ok(self.decide_single(identifier, &self.default_tier));
        }

        let policy = TierPolicy::try_from(tier_args)?;

        Ok(self.decide_with_policy(identifier, &policy))
    } // end method decide

    /// Admit or reject one request for `identifier` under an already validated policy.
    pub fn decide_with_policy(&self, identifier: &str, policy: &TierPolicy) -> RateLimitDecision {
        match policy.tiers() {
            [tier] => self.decide_single(identifier, tier),
            _ => {
                let key = self.key_for(identifier);
                let now = self.clock.now();

                self.counters.check_and_decrement_with(&key, now, || {
                    self.escalations.select_tier(&key, policy, now)
                })
            }
        }
    } // end method decide_with_policy

    fn decide_single(&self, identifier: &str, tier: &Tier) -> RateLimitDecision {
        let key = self.key_for(identifier);

        self.counters.check_and_decrement(&key, tier, self.clock.now())
    }

    /// Forget everything about `identifier`: its window and its escalation state.
    ///
    /// The next request is treated as the identifier's first.
    pub fn remove(&self, identifier: &str) {
        let key = self.key_for(identifier);

        self.counters.remove(&key);
        self.escalations.remove(&key);
    }

    /// Number of identifiers with a window, including ended windows not yet cleaned up.
    pub fn count(&self) -> usize {
        self.counters.len()
    }

    /// Number of identifiers with recorded escalation state, expired or not.
    pub fn escalation_count(&self) -> usize {
        self.escalations.len()
    }

    /// Drop every window that ended before now. Returns how many were removed.
    ///
    /// Called by the cleanup loop on each tick; safe to call directly.
    pub fn cleanup(&self) -> usize {
        let removed = self.counters.sweep_expired(self.clock.now());

        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.counters.len(),
                "expired windows swept"
            );
        }

        removed
    } // end method cleanup
} // end of impl
