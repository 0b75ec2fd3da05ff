use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::common::{RateLimitDecision, Tier};

/// State of one identifier's current window.
///
/// Once published in the store an entry is never replaced in place; only `remaining`
/// changes, and only through atomic operations.
#[derive(Debug)]
pub(crate) struct CounterEntry {
    pub total: u32,
    pub remaining: AtomicI64,
    pub window: Duration,
    pub expire_at: Instant,
    pub tier: usize,
}

impl CounterEntry {
    /// Open a window for `tier`, consuming the first unit immediately.
    fn open(tier_index: usize, tier: &Tier, now: Instant) -> Self {
        let window = tier.window();

        Self {
            total: *tier.quota,
            remaining: AtomicI64::new(i64::from(*tier.quota) - 1),
            window,
            expire_at: now + window,
            tier: tier_index,
        }
    }

    /// Stale at or after `expire_at`.
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expire_at
    }

    /// Take one unit and report the post-decrement state.
    ///
    /// `remaining` stops at `-1`: once exhausted, further calls leave it untouched.
    fn consume(&self) -> RateLimitDecision {
        let remaining = match self.remaining.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |remaining| (remaining >= 0).then(|| remaining - 1),
        ) {
            Ok(previous) => previous - 1,
            Err(current) => current,
        };

        self.decision(remaining)
    }

    fn decision(&self, remaining: i64) -> RateLimitDecision {
        RateLimitDecision {
            total: self.total,
            remaining,
            window: self.window,
            reset_at: self.expire_at,
            tier: self.tier,
        }
    }
}

/// Per-identifier window counters.
///
/// # Concurrency
///
/// - Live windows are served from a read guard that is released before the decrement;
///   the decrement itself is a lock-free CAS on the entry's `remaining` field.
/// - Opening a window re-checks the key under the shard's write guard, so concurrent
///   first requests for one identifier share a single entry instead of each publishing
///   their own.
/// - A caller that fetched the previous window just before it was replaced may still
///   decrement the retired entry. That decrement is lost with the entry.
#[derive(Debug, Default)]
pub(crate) struct CounterStore {
    entries: DashMap<String, Arc<CounterEntry>>,
}

impl CounterStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Admit one request for `key` under `tier`.
    ///
    /// Starts a fresh window when `key` has none or its window has ended, otherwise
    /// decrements the live one.
    pub(crate) fn check_and_decrement(
        &self,
        key: &str,
        tier: &Tier,
        now: Instant,
    ) -> RateLimitDecision {
        self.check_and_decrement_with(key, now, || (1, *tier))
    }

    /// Like [`check_and_decrement`](Self::check_and_decrement), with the tier of a fresh
    /// window chosen by `select`.
    ///
    /// `select` returns `(tier_index, tier)` and runs only when a new window is opened,
    /// while the write guard for `key` is held. It must not touch this store.
    pub(crate) fn check_and_decrement_with<F>(
        &self,
        key: &str,
        now: Instant,
        select: F,
    ) -> RateLimitDecision
    where
        F: FnOnce() -> (usize, Tier),
    {
        if let Some(entry) = self.live(key, now) {
            return entry.consume();
        }

        let entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) if !occupied.get().is_expired(now) => {
                // Another caller opened the window between our read and the write guard.
                let entry = Arc::clone(occupied.get());
                drop(occupied);
                return entry.consume();
            }
            Entry::Occupied(mut occupied) => {
                let entry = Self::open(key, now, select);
                occupied.insert(Arc::clone(&entry));
                entry
            }
            Entry::Vacant(vacant) => {
                let entry = Self::open(key, now, select);
                vacant.insert(Arc::clone(&entry));
                entry
            }
        };

        entry.decision(i64::from(entry.total) - 1)
    } // end method check_and_decrement_with

    fn open<F>(key: &str, now: Instant, select: F) -> Arc<CounterEntry>
    where
        F: FnOnce() -> (usize, Tier),
    {
        let (tier_index, tier) = select();

        tracing::trace!(
            key,
            tier = tier_index,
            quota = *tier.quota,
            window_ms = *tier.window_ms,
            "window opened"
        );

        Arc::new(CounterEntry::open(tier_index, &tier, now))
    }

    /// Clone out the entry for `key` if its window is still open.
    pub(crate) fn live(&self, key: &str, now: Instant) -> Option<Arc<CounterEntry>> {
        let entry = self.entries.get(key)?;

        (!entry.is_expired(now)).then(|| Arc::clone(entry.value()))
    }

    /// Drop `key`'s window, if any.
    pub(crate) fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry whose window ended before `now`. Returns how many were removed.
    pub(crate) fn sweep_expired(&self, now: Instant) -> usize {
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            let keep = entry.expire_at >= now;
            if !keep {
                removed += 1;
            }
            keep
        });

        removed
    } // end method sweep_expired

    /// Number of tracked keys, including expired ones not yet swept.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
