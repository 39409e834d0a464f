use crate::models::{ItemStatus, Tier};
use crate::queue::{QueueCounters, TieredQueue};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub tiers: BTreeMap<Tier, usize>,
    /// Items waiting in a ready tier (queued or retry scheduled).
    pub total_queued: usize,
    pub processing: usize,
    pub pending_capability: usize,
    pub retrying: usize,
    pub processed: usize,
    pub failed: usize,
    /// Completions per minute over the rate window.
    pub rate_per_minute: f64,
    /// `None` while the rate is zero.
    pub eta_minutes: Option<f64>,
    pub counters: QueueCounters,
}

impl StatsSnapshot {
    pub fn collect(queue: &TieredQueue, now: DateTime<Utc>, rate_window: Duration) -> Self {
        let mut stats = StatsSnapshot {
            counters: queue.counters().clone(),
            processing: queue.in_flight().count(),
            processed: queue.completed().count(),
            ..StatsSnapshot::default()
        };
        for tier in Tier::ALL {
            stats.tiers.insert(tier, queue.tier_len(tier));
        }
        for item in queue.tiered() {
            match item.status {
                ItemStatus::Queued => stats.total_queued += 1,
                ItemStatus::RetryScheduled => {
                    stats.total_queued += 1;
                    stats.retrying += 1;
                }
                ItemStatus::PendingCapability => stats.pending_capability += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Processing | ItemStatus::Completed => {}
            }
        }

        let window_minutes = rate_window.num_minutes().max(1);
        let completions = queue.history().completions_since(now - rate_window).len();
        stats.rate_per_minute = completions as f64 / window_minutes as f64;
        stats.eta_minutes = if stats.rate_per_minute > 0.0 {
            Some(stats.total_queued as f64 / stats.rate_per_minute)
        } else {
            None
        };
        stats
    }

    pub fn tier(&self, tier: Tier) -> usize {
        self.tiers.get(&tier).copied().unwrap_or(0)
    }
}
