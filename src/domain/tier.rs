use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel for "no limit" in the tier table.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub messages_per_day: i64,
    pub threads_per_day: i64,
    pub max_message_length: i64,
}

impl TierLimits {
    #[must_use]
    pub const fn allows_messages(&self, sent_today: i64) -> bool {
        self.messages_per_day == UNLIMITED || sent_today < self.messages_per_day
    }

    #[must_use]
    pub const fn allows_threads(&self, created_today: i64) -> bool {
        self.threads_per_day == UNLIMITED || created_today < self.threads_per_day
    }

    #[must_use]
    pub fn allows_length(&self, content: &str) -> bool {
        self.max_message_length == UNLIMITED || content.chars().count() as i64 <= self.max_message_length
    }
}

/// Static subscription-tier limit table, injected into the service at
/// construction rather than read from ambient state.
#[derive(Debug, Clone)]
pub struct TierTable {
    limits: HashMap<Tier, TierLimits>,
}

impl TierTable {
    #[must_use]
    pub fn new(limits: HashMap<Tier, TierLimits>) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits_for(&self, tier: Tier) -> TierLimits {
        self.limits.get(&tier).copied().unwrap_or_else(|| Self::default_limits(Tier::Free))
    }

    const fn default_limits(tier: Tier) -> TierLimits {
        match tier {
            Tier::Free => TierLimits { messages_per_day: 50, threads_per_day: 10, max_message_length: 1_000 },
            Tier::Basic => TierLimits { messages_per_day: 200, threads_per_day: 50, max_message_length: 2_000 },
            Tier::Pro => TierLimits { messages_per_day: 1_000, threads_per_day: 200, max_message_length: 5_000 },
            Tier::Enterprise => {
                TierLimits { messages_per_day: UNLIMITED, threads_per_day: UNLIMITED, max_message_length: 10_000 }
            }
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        let limits = [Tier::Free, Tier::Basic, Tier::Pro, Tier::Enterprise]
            .into_iter()
            .map(|t| (t, Self::default_limits(t)))
            .collect();
        Self { limits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_tier_never_blocks() {
        let limits = TierTable::default().limits_for(Tier::Enterprise);
        assert!(limits.allows_messages(1_000_000));
        assert!(limits.allows_threads(1_000_000));
    }

    #[test]
    fn free_tier_blocks_at_limit() {
        let limits = TierTable::default().limits_for(Tier::Free);
        assert!(limits.allows_messages(49));
        assert!(!limits.allows_messages(50));
    }

    #[test]
    fn length_limit_counts_chars() {
        let limits = TierLimits { messages_per_day: UNLIMITED, threads_per_day: UNLIMITED, max_message_length: 3 };
        assert!(limits.allows_length("héé"));
        assert!(!limits.allows_length("hééé"));
    }
}
