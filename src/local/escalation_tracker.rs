use std::time::Instant;

use dashmap::DashMap;

use crate::common::{Tier, TierPolicy};

/// Tier currently selected for one identifier.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EscalationEntry {
    /// 1-based index into the policy.
    pub tier: usize,
    /// Selection instant plus twice the selected tier's window.
    pub expire_at: Instant,
}

impl EscalationEntry {
    fn new(tier_index: usize, tier: &Tier, now: Instant) -> Self {
        Self {
            tier: tier_index,
            expire_at: now + tier.window() * 2,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expire_at < now
    }
}

/// Remembers which tier each multi-tier identifier is on.
///
/// A fresh window opened while the identifier's entry is alive moves one tier further
/// (and stays on the last tier once there). An entry that outlived twice its tier's
/// window is ignored, which sends the identifier back to tier 1.
///
/// Expired entries are never swept; they are overwritten on the identifier's next
/// fresh window or dropped by [`remove`](Self::remove).
#[derive(Debug, Default)]
pub(crate) struct EscalationTracker {
    entries: DashMap<String, EscalationEntry>,
}

impl EscalationTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Choose the tier for a window about to be opened for `counter_key`, and record it.
    ///
    /// Returns the 1-based tier index together with the tier.
    pub(crate) fn select_tier(
        &self,
        counter_key: &str,
        policy: &TierPolicy,
        now: Instant,
    ) -> (usize, Tier) {
        let key = escalation_key(counter_key);

        let previous = self
            .entries
            .get(&key)
            .map(|entry| *entry)
            .filter(|entry| !entry.is_expired(now));

        let (tier_index, tier) = match previous {
            None => policy.tier(1),
            Some(entry) => policy.tier(entry.tier.saturating_add(1)),
        };

        match previous {
            Some(entry) if entry.tier != tier_index => {
                tracing::debug!(
                    key = counter_key,
                    from = entry.tier,
                    to = tier_index,
                    "tier escalated"
                );
            }
            None => {
                tracing::debug!(key = counter_key, "tier 1 selected");
            }
            _ => {}
        }

        self.entries.insert(key, EscalationEntry::new(tier_index, &tier, now));

        (tier_index, tier)
    } // end method select_tier

    /// Forget `counter_key`'s escalation state.
    pub(crate) fn remove(&self, counter_key: &str) {
        self.entries.remove(&escalation_key(counter_key));
    }

    /// Number of recorded entries, expired ones included.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Recorded entry for `counter_key`, if any, expired or not.
    #[cfg(test)]
    pub(crate) fn get(&self, counter_key: &str) -> Option<EscalationEntry> {
        self.entries.get(&escalation_key(counter_key)).map(|entry| *entry)
    }
}

/// Key of the escalation entry belonging to `counter_key`.
pub(crate) fn escalation_key(counter_key: &str) -> String {
    format!("{{{counter_key}}}:escalation")
}
