//! Item state machine and the per-item audit trail.

use crate::models::{HistoryEntry, ItemStatus, QueueItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    /// Waiting in a tier for a worker, as opposed to deferred or terminal.
    pub fn is_waiting(self) -> bool {
        matches!(self, ItemStatus::Queued | ItemStatus::RetryScheduled)
    }

    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, next) {
            (Queued | RetryScheduled | PendingCapability, Processing) => true,
            (Processing, Completed | Failed | PendingCapability | RetryScheduled | Queued) => true,
            // capability unlock sweep
            (PendingCapability, Queued) => true,
            _ => false,
        }
    }
}

/// Append-only transition log keyed by item id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingHistory {
    entries: BTreeMap<QueueItemId, Vec<HistoryEntry>>,
}

impl ProcessingHistory {
    pub fn record(&mut self, id: &QueueItemId, entry: HistoryEntry) {
        self.entries.entry(id.clone()).or_default().push(entry);
    }

    pub fn entries(&self, id: &QueueItemId) -> &[HistoryEntry] {
        self.entries.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remove(&mut self, id: &QueueItemId) -> usize {
        self.entries.remove(id).map(|v| v.len()).unwrap_or(0)
    }

    pub fn tracked_items(&self) -> usize {
        self.entries.len()
    }

    /// Total number of entries across all items.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Completion timestamps at or after `since`.
    pub fn completions_since(&self, since: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut times: Vec<DateTime<Utc>> = self
            .entries
            .values()
            .flatten()
            .filter(|e| e.to == ItemStatus::Completed && e.at >= since)
            .map(|e| e.at)
            .collect();
        times.sort();
        times
    }
}
