//! Five priority-ordered tiers plus the in-flight set and terminal records.
//!
//! All mutation goes through `&mut TieredQueue`; the scheduler keeps it behind a
//! single async mutex, so the queue itself carries no locking.

use crate::error::{EnqueueError, QueueError};
use crate::lifecycle::ProcessingHistory;
use crate::models::{ErrorRecord, HistoryEntry, ItemStatus, QueueItem, QueueItemId, Tier};
use crate::scorer::ScoreVector;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueCounters {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub deferred: u64,
    pub retried: u64,
    pub cancelled: u64,
    pub boosted: u64,
    pub unlocked: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

#[derive(Debug, Default)]
pub struct TieredQueue {
    tiers: [Vec<QueueItem>; 5],
    in_flight: HashMap<QueueItemId, QueueItem>,
    completed: HashMap<QueueItemId, QueueItem>,
    history: ProcessingHistory,
    counters: QueueCounters,
}

impl TieredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: QueueItem) -> Result<(), EnqueueError> {
        if self.contains(&item.id) {
            return Err(EnqueueError::Duplicate(item.id));
        }
        self.history.record(
            &item.id,
            HistoryEntry {
                at: item.enqueued_at,
                from: None,
                to: item.status,
                tier: Some(item.tier),
                note: None,
            },
        );
        self.counters.enqueued += 1;
        self.place(item);
        Ok(())
    }

    /// Sorted insert, descending by priority score. Equal scores keep arrival order.
    pub(crate) fn place(&mut self, item: QueueItem) {
        let tier = &mut self.tiers[item.tier.index()];
        let at = tier.partition_point(|x| x.priority_score >= item.priority_score);
        tier.insert(at, item);
    }

    /// Pushes into `tier` regardless of the item's own tag.
    #[cfg(test)]
    pub(crate) fn push_raw(&mut self, tier: Tier, item: QueueItem) {
        self.tiers[tier.index()].push(item);
    }

    pub fn contains(&self, id: &QueueItemId) -> bool {
        self.in_flight.contains_key(id)
            || self.completed.contains_key(id)
            || self.tiers.iter().flatten().any(|i| &i.id == id)
    }

    pub fn get(&self, id: &QueueItemId) -> Option<&QueueItem> {
        self.in_flight
            .get(id)
            .or_else(|| self.completed.get(id))
            .or_else(|| self.tiers.iter().flatten().find(|i| &i.id == id))
    }

    pub fn items(&self, tier: Tier) -> &[QueueItem] {
        &self.tiers[tier.index()]
    }

    pub fn tier_len(&self, tier: Tier) -> usize {
        self.tiers[tier.index()].len()
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &QueueItem> {
        self.in_flight.values()
    }

    pub fn completed(&self) -> impl Iterator<Item = &QueueItem> {
        self.completed.values()
    }

    pub fn tiered(&self) -> impl Iterator<Item = &QueueItem> {
        self.tiers.iter().flatten()
    }

    pub fn history(&self) -> &ProcessingHistory {
        &self.history
    }

    pub fn counters(&self) -> &QueueCounters {
        &self.counters
    }

    pub(crate) fn record(&mut self, id: &QueueItemId, entry: HistoryEntry) {
        self.history.record(id, entry);
    }

    pub(crate) fn counters_mut(&mut self) -> &mut QueueCounters {
        &mut self.counters
    }

    /// Siblings in the same folder that were completed or scored at or above
    /// `threshold`.
    pub fn relevant_siblings(&self, path: &Path, threshold: u32) -> usize {
        let Some(folder) = path.parent() else {
            return 0;
        };
        self.tiered()
            .chain(self.completed.values())
            .chain(self.in_flight.values())
            .filter(|i| i.file.path != path && i.file.path.parent() == Some(folder))
            .filter(|i| i.status == ItemStatus::Completed || i.scores.composite >= threshold)
            .count()
    }

    /// Scans critical → reprocess and hands out the first eligible item, moving it
    /// to the in-flight set as `processing`.
    pub fn dequeue_next(&mut self, now: DateTime<Utc>) -> Option<QueueItem> {
        let (tier_idx, pos) = self.tiers.iter().enumerate().find_map(|(t, items)| {
            items
                .iter()
                .position(|i| i.is_eligible(now))
                .map(|pos| (t, pos))
        })?;
        let mut item = self.tiers[tier_idx].remove(pos);
        let from = item.status;
        item.status = ItemStatus::Processing;
        item.attempts += 1;
        item.last_attempt_at = Some(now);
        self.history.record(
            &item.id,
            HistoryEntry {
                at: now,
                from: Some(from),
                to: ItemStatus::Processing,
                tier: Some(item.tier),
                note: Some(format!("attempt {}", item.attempts)),
            },
        );
        self.in_flight.insert(item.id.clone(), item.clone());
        Some(item)
    }

    fn take_in_flight(&mut self, id: &QueueItemId, to: ItemStatus) -> Result<QueueItem, QueueError> {
        let item = self
            .in_flight
            .get(id)
            .ok_or_else(|| QueueError::UnknownItem(id.clone()))?;
        if !item.status.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                id: id.clone(),
                from: item.status,
                to,
            });
        }
        self.in_flight
            .remove(id)
            .ok_or_else(|| QueueError::UnknownItem(id.clone()))
    }

    fn set_status(&mut self, item: &mut QueueItem, to: ItemStatus, now: DateTime<Utc>, note: Option<String>) {
        let from = item.status;
        item.status = to;
        self.history.record(
            &item.id,
            HistoryEntry {
                at: now,
                from: Some(from),
                to,
                tier: Some(item.tier),
                note,
            },
        );
    }

    /// Extraction succeeded: the item leaves the tiers for good.
    pub fn complete(
        &mut self,
        id: &QueueItemId,
        scores: ScoreVector,
        now: DateTime<Utc>,
    ) -> Result<QueueItem, QueueError> {
        let mut item = self.take_in_flight(id, ItemStatus::Completed)?;
        item.scores = scores;
        item.tier = item.home_tier();
        item.completed_at = Some(now);
        item.next_attempt_at = None;
        self.set_status(&mut item, ItemStatus::Completed, now, None);
        self.counters.completed += 1;
        self.completed.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    /// No extractor yet: park in the reprocess tier until the estimate (or the
    /// recheck interval) passes, or the type is unlocked. A deferral does not use
    /// up an attempt.
    pub fn defer(
        &mut self,
        id: &QueueItemId,
        estimated_ready_at: Option<DateTime<Utc>>,
        technique: Option<String>,
        recheck: Duration,
        now: DateTime<Utc>,
    ) -> Result<QueueItem, QueueError> {
        let mut item = self.take_in_flight(id, ItemStatus::PendingCapability)?;
        // The dequeue is tracked in `deferrals` instead.
        item.attempts = item.attempts.saturating_sub(1);
        item.meta.deferrals += 1;
        if item.tier.is_ready() {
            item.meta.original_tier = Some(item.tier);
        }
        item.tier = Tier::Reprocess;
        item.meta.estimated_ready_at = estimated_ready_at;
        item.meta.future_technique = technique.clone();
        item.next_attempt_at = Some(match estimated_ready_at {
            Some(t) if t > now => t,
            _ => now + recheck,
        });
        let note = technique.map(|t| format!("awaiting {t}"));
        self.set_status(&mut item, ItemStatus::PendingCapability, now, note);
        self.counters.deferred += 1;
        self.place(item.clone());
        Ok(item)
    }

    /// Extraction failed: schedule a linear-backoff retry in the item's home tier,
    /// or fail it for good once attempts are exhausted or the error is permanent.
    pub fn fail_attempt(
        &mut self,
        id: &QueueItemId,
        message: String,
        permanent: bool,
        policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<QueueItem, QueueError> {
        let exhausted = self
            .in_flight
            .get(id)
            .map(|i| permanent || i.attempts >= policy.max_attempts)
            .unwrap_or(false);
        let to = if exhausted {
            ItemStatus::Failed
        } else {
            ItemStatus::RetryScheduled
        };
        let mut item = self.take_in_flight(id, to)?;
        item.errors.push(ErrorRecord {
            at: now,
            attempt: item.attempts,
            message: message.clone(),
            permanent,
        });
        item.tier = item.home_tier();
        if exhausted {
            item.failed_at = Some(now);
            item.next_attempt_at = None;
            self.set_status(&mut item, ItemStatus::Failed, now, Some(message));
            self.counters.failed += 1;
        } else {
            let backoff = policy.backoff * i32::try_from(item.attempts).unwrap_or(i32::MAX);
            item.next_attempt_at = Some(now + backoff);
            self.set_status(&mut item, ItemStatus::RetryScheduled, now, Some(message));
            self.counters.retried += 1;
        }
        self.place(item.clone());
        Ok(item)
    }

    /// Cancelled mid-extraction: due again immediately, attempt not consumed.
    pub fn cancel(&mut self, id: &QueueItemId, now: DateTime<Utc>) -> Result<QueueItem, QueueError> {
        let mut item = self.take_in_flight(id, ItemStatus::RetryScheduled)?;
        item.attempts = item.attempts.saturating_sub(1);
        item.tier = item.home_tier();
        item.next_attempt_at = Some(now);
        self.set_status(&mut item, ItemStatus::RetryScheduled, now, Some("cancelled".into()));
        self.counters.cancelled += 1;
        self.place(item.clone());
        Ok(item)
    }

    /// Back to `queued` in the home tier with a fresh attempt budget.
    pub fn requeue(&mut self, id: &QueueItemId, now: DateTime<Utc>, note: &str) -> Result<QueueItem, QueueError> {
        let mut item = self.take_in_flight(id, ItemStatus::Queued)?;
        Self::reset_for_unlock(&mut item);
        self.set_status(&mut item, ItemStatus::Queued, now, Some(note.to_string()));
        self.counters.unlocked += 1;
        self.place(item.clone());
        Ok(item)
    }

    /// Pulls every deferred item of `file_type` out of the reprocess tier. Items of
    /// that type in any other state are left alone and reported.
    pub fn take_pending(&mut self, file_type: &str) -> (Vec<QueueItem>, Vec<String>) {
        let reprocess = std::mem::take(&mut self.tiers[Tier::Reprocess.index()]);
        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(reprocess.len());
        let mut anomalies = Vec::new();
        for item in reprocess {
            if item.file.file_type != file_type {
                kept.push(item);
            } else if item.status == ItemStatus::PendingCapability && item.tier == Tier::Reprocess {
                taken.push(item);
            } else {
                anomalies.push(format!(
                    "{}: {} item with tier {} sits in reprocess",
                    item.id, item.status, item.tier
                ));
                kept.push(item);
            }
        }
        self.tiers[Tier::Reprocess.index()] = kept;
        (taken, anomalies)
    }

    /// Re-homes an item taken by [`take_pending`](Self::take_pending). On error the
    /// item goes back to the reprocess tier untouched.
    pub fn requeue_unlocked(&mut self, mut item: QueueItem, now: DateTime<Utc>) -> Result<QueueItemId, QueueError> {
        if !item.status.can_transition_to(ItemStatus::Queued) {
            let err = QueueError::InvalidTransition {
                id: item.id.clone(),
                from: item.status,
                to: ItemStatus::Queued,
            };
            self.place(item);
            return Err(err);
        }
        Self::reset_for_unlock(&mut item);
        self.set_status(&mut item, ItemStatus::Queued, now, Some("capability unlocked".into()));
        self.counters.unlocked += 1;
        let id = item.id.clone();
        self.place(item);
        Ok(id)
    }

    fn reset_for_unlock(item: &mut QueueItem) {
        item.tier = item.home_tier();
        item.attempts = 0;
        item.next_attempt_at = None;
        item.meta.reprocess_count += 1;
        item.meta.estimated_ready_at = None;
        item.meta.future_technique = None;
    }

    /// Removes waiting items in `tier` that have been queued longer than
    /// `threshold`. Items whose tier tag disagrees with the collection are left in
    /// place and reported.
    pub(crate) fn take_aged(
        &mut self,
        tier: Tier,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> (Vec<QueueItem>, Vec<String>) {
        let items = std::mem::take(&mut self.tiers[tier.index()]);
        let mut aged = Vec::new();
        let mut kept = Vec::with_capacity(items.len());
        let mut anomalies = Vec::new();
        for item in items {
            if item.tier != tier {
                anomalies.push(format!(
                    "{}: tagged {} but stored in {}",
                    item.id, item.tier, tier
                ));
                kept.push(item);
            } else if item.status.is_waiting() && now - item.enqueued_at > threshold {
                aged.push(item);
            } else {
                kept.push(item);
            }
        }
        self.tiers[tier.index()] = kept;
        (aged, anomalies)
    }

    /// Recomputes the priority score of every non-failed item in the tiers and
    /// restores each tier's order. Returns how many scores changed.
    pub(crate) fn reprioritize(&mut self, mut priority: impl FnMut(&QueueItem) -> f64) -> usize {
        let mut changed = 0;
        for tier in self.tiers.iter_mut() {
            for item in tier.iter_mut().filter(|i| i.status != ItemStatus::Failed) {
                let next = priority(item);
                if next != item.priority_score {
                    item.priority_score = next;
                    changed += 1;
                }
            }
            tier.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
        }
        changed
    }

    /// Drops failed items from the tiers and completed records, with their history.
    pub fn cleanup(&mut self) -> usize {
        let mut removed: Vec<QueueItemId> = self.completed.drain().map(|(id, _)| id).collect();
        for tier in self.tiers.iter_mut() {
            tier.retain(|i| {
                if i.status == ItemStatus::Failed {
                    removed.push(i.id.clone());
                    false
                } else {
                    true
                }
            });
        }
        for id in &removed {
            self.history.remove(id);
        }
        removed.len()
    }

    /// In-flight items become due retries so a restored queue picks them up again.
    pub(crate) fn export_parts(
        &self,
        now: DateTime<Utc>,
    ) -> (Vec<QueueItem>, Vec<QueueItem>, ProcessingHistory, QueueCounters) {
        let mut items: Vec<QueueItem> = self.tiered().cloned().collect();
        for item in self.in_flight.values() {
            let mut item = item.clone();
            item.status = ItemStatus::RetryScheduled;
            item.attempts = item.attempts.saturating_sub(1);
            item.tier = item.home_tier();
            item.next_attempt_at = Some(now);
            items.push(item);
        }
        let mut completed: Vec<QueueItem> = self.completed.values().cloned().collect();
        completed.sort_by(|a, b| a.completed_at.cmp(&b.completed_at).then(a.id.cmp(&b.id)));
        (items, completed, self.history.clone(), self.counters.clone())
    }

    pub(crate) fn from_parts(
        items: Vec<QueueItem>,
        completed: Vec<QueueItem>,
        history: ProcessingHistory,
        counters: QueueCounters,
    ) -> Result<Self, QueueItemId> {
        let mut queue = Self {
            history,
            counters,
            ..Self::default()
        };
        for item in completed {
            if queue.contains(&item.id) {
                return Err(item.id);
            }
            queue.completed.insert(item.id.clone(), item);
        }
        for item in items {
            if queue.contains(&item.id) {
                return Err(item.id);
            }
            queue.place(item);
        }
        Ok(queue)
    }
}
