//! Promotes long-waiting low and medium items one tier per sweep.

use crate::config::QueueConfig;
use crate::models::{HistoryEntry, QueueItemId, Tier};
use crate::queue::TieredQueue;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct AgingPolicy {
    pub threshold: Duration,
    pub boost: f64,
}

impl AgingPolicy {
    pub fn from_config(cfg: &QueueConfig) -> Self {
        Self {
            threshold: cfg.aging_threshold(),
            boost: cfg.aging_boost,
        }
    }
}

impl Default for AgingPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgingReport {
    pub scanned: usize,
    pub promoted: Vec<Promotion>,
    pub anomalies: Vec<String>,
    /// Items whose priority score changed when the scores were refreshed.
    pub reprioritized: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Promotion {
    pub id: QueueItemId,
    pub from: Tier,
    pub to: Tier,
    pub boost_count: u32,
}

/// Every aged item is lifted out of both tiers before any is placed, so an item
/// promoted low → medium is not promoted again to high in the same sweep.
pub fn sweep(queue: &mut TieredQueue, policy: AgingPolicy, now: DateTime<Utc>) -> AgingReport {
    let mut report = AgingReport {
        scanned: queue.tier_len(Tier::Medium) + queue.tier_len(Tier::Low),
        ..AgingReport::default()
    };
    let mut aged = Vec::new();
    for tier in [Tier::Medium, Tier::Low] {
        let (items, anomalies) = queue.take_aged(tier, now, policy.threshold);
        aged.extend(items);
        report.anomalies.extend(anomalies);
    }

    for mut item in aged {
        let from = item.tier;
        let Some(to) = from.promoted() else {
            report
                .anomalies
                .push(format!("{}: tier {from} cannot be promoted", item.id));
            queue.place(item);
            continue;
        };
        item.tier = to;
        item.meta.original_tier = Some(to);
        item.meta.boost_count += 1;
        item.priority_score += policy.boost;
        queue.record(
            &item.id,
            HistoryEntry {
                at: now,
                from: Some(item.status),
                to: item.status,
                tier: Some(to),
                note: Some(format!("aged {from} -> {to}")),
            },
        );
        debug!(id = %item.id, %from, %to, boosts = item.meta.boost_count, "promoted aged item");
        report.promoted.push(Promotion {
            id: item.id.clone(),
            from,
            to,
            boost_count: item.meta.boost_count,
        });
        queue.counters_mut().boosted += 1;
        queue.place(item);
    }

    for anomaly in &report.anomalies {
        warn!(%anomaly, "aging sweep skipped item");
    }
    report
}
