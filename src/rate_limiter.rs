//! Top-level entrypoint that wires the limiter and its cleanup loop.
//!
//! [`RateLimiter`] owns the in-process [`EscalatingLocalRateLimiter`] (exposed via
//! [`RateLimiter::local`]) together with the background loop that sweeps ended windows.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{
    Clock, EscalatingLocalRateLimiter, RateLimitDecision, SystemClock, TierLimitError,
    common::{KeyPrefix, SweepIntervalMs, Tier, TierPolicy},
    runtime::CleanupLoop,
};

/// Top-level configuration for [`RateLimiter`].
#[derive(Clone, Debug, Default)]
pub struct RateLimiterOptions {
    /// Namespace prepended to every identifier. Defaults to `"limit:"`.
    pub key_prefix: KeyPrefix,
    /// Tier used when a call passes no tier arguments. Defaults to 1000 per 60 s.
    pub default_tier: Tier,
    /// Period of the cleanup loop. Defaults to 5 s.
    pub sweep_interval_ms: SweepIntervalMs,
}

/// Rate limiter entrypoint.
///
/// Dropping the rate limiter stops its cleanup loop.
///
/// # Examples
///
/// ```
/// use tierlimit::{RateLimiter, RateLimiterOptions};
///
/// let rl = RateLimiter::new(RateLimiterOptions::default());
/// rl.run_cleanup_loop();
///
/// let decision = rl.decide("203.0.113.9", &[100, 60_000]).unwrap();
/// assert_eq!(decision.remaining, 99);
///
/// rl.stop_cleanup_loop();
/// ```
pub struct RateLimiter<C: Clock + 'static = SystemClock> {
    local: Arc<EscalatingLocalRateLimiter<C>>,
    sweep_interval_ms: SweepIntervalMs,
    cleanup_loop: Mutex<Option<CleanupLoop>>,
}

impl RateLimiter {
    /// Create a new [`RateLimiter`] on the system clock.
    pub fn new(options: RateLimiterOptions) -> Self {
        Self::with_clock(options, SystemClock)
    }
}

impl<C: Clock + 'static> RateLimiter<C> {
    /// Create a new [`RateLimiter`] reading time from `clock`.
    pub fn with_clock(options: RateLimiterOptions, clock: C) -> Self {
        Self {
            sweep_interval_ms: options.sweep_interval_ms,
            local: Arc::new(EscalatingLocalRateLimiter::new(options, clock)),
            cleanup_loop: Mutex::new(None),
        }
    }

    /// Access the local limiter.
    pub fn local(&self) -> &EscalatingLocalRateLimiter<C> {
        &self.local
    }

    #[cfg(test)]
    pub(crate) fn downgrade_local(&self) -> std::sync::Weak<EscalatingLocalRateLimiter<C>> {
        Arc::downgrade(&self.local)
    }

    /// See [`EscalatingLocalRateLimiter::decide`].
    pub fn decide(
        &self,
        identifier: &str,
        tier_args: &[i64],
    ) -> Result<RateLimitDecision, TierLimitError> {
        self.local.decide(identifier, tier_args)
    }

    /// See [`EscalatingLocalRateLimiter::decide_with_policy`].
    pub fn decide_with_policy(&self, identifier: &str, policy: &TierPolicy) -> RateLimitDecision {
        self.local.decide_with_policy(identifier, policy)
    }

    /// See [`EscalatingLocalRateLimiter::remove`].
    pub fn remove(&self, identifier: &str) {
        self.local.remove(identifier);
    }

    /// See [`EscalatingLocalRateLimiter::count`].
    pub fn count(&self) -> usize {
        self.local.count()
    }

    /// See [`EscalatingLocalRateLimiter::cleanup`].
    pub fn cleanup(&self) -> usize {
        self.local.cleanup()
    }

    /// Start the cleanup loop with the configured sweep interval.
    ///
    /// See [`run_cleanup_loop_with_config`](Self::run_cleanup_loop_with_config).
    pub fn run_cleanup_loop(&self) {
        self.run_cleanup_loop_with_config(*self.sweep_interval_ms);
    }

    /// Start the cleanup loop, sweeping every `interval_ms`.
    ///
    /// The first sweep runs immediately. Calling this while a loop is running does
    /// nothing, even with a different interval; stop the loop first to reconfigure it.
    /// A loop that ended on its own (its Tokio runtime shut down) is replaced.
    ///
    /// An `interval_ms` of 0 is raised to 1 ms.
    ///
    /// With the `tokio` feature, the loop is spawned on the current Tokio runtime when
    /// called from within one, and on a dedicated thread otherwise.
    pub fn run_cleanup_loop_with_config(&self, interval_ms: u64) {
        let mut cleanup_loop = self.cleanup_loop();

        match cleanup_loop.take() {
            Some(running) if !running.is_finished() => {
                *cleanup_loop = Some(running);
                return;
            }
            Some(_) => tracing::debug!("replacing finished cleanup loop"),
            None => {}
        }

        *cleanup_loop = CleanupLoop::spawn(
            Arc::downgrade(&self.local),
            Duration::from_millis(interval_ms),
        );

        if cleanup_loop.is_some() {
            tracing::debug!(interval_ms, "cleanup loop started");
        }
    } // end method run_cleanup_loop_with_config

    /// Stop the cleanup loop. Does nothing if it is not running.
    pub fn stop_cleanup_loop(&self) {
        if let Some(cleanup_loop) = self.cleanup_loop().take() {
            cleanup_loop.stop();
        }
    }

    /// Whether the cleanup loop is running.
    pub fn is_cleanup_loop_running(&self) -> bool {
        self.cleanup_loop()
            .as_ref()
            .is_some_and(|cleanup_loop| !cleanup_loop.is_finished())
    }

    fn cleanup_loop(&self) -> MutexGuard<'_, Option<CleanupLoop>> {
        self.cleanup_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock + 'static> Drop for RateLimiter<C> {
    fn drop(&mut self) {
        self.stop_cleanup_loop();
    }
}
