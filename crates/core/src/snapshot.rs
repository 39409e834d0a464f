//! Versioned JSON snapshot of the whole queue.

use crate::capability::CapabilityOverride;
use crate::error::SnapshotError;
use crate::lifecycle::ProcessingHistory;
use crate::models::QueueItem;
use crate::queue::{QueueCounters, TieredQueue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueState {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    /// Everything held in tiers, including in-flight items rewritten as due retries.
    pub items: Vec<QueueItem>,
    #[serde(default)]
    pub completed: Vec<QueueItem>,
    #[serde(default)]
    pub history: ProcessingHistory,
    #[serde(default)]
    pub counters: QueueCounters,
    #[serde(default)]
    pub capability_overrides: Vec<CapabilityOverride>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub items: usize,
    pub completed: usize,
    pub history_entries: usize,
    /// Registrations whose extractor is not available in this process.
    pub unbound_overrides: Vec<CapabilityOverride>,
}

impl QueueState {
    pub fn capture(
        queue: &TieredQueue,
        overrides: Vec<CapabilityOverride>,
        now: DateTime<Utc>,
    ) -> Self {
        let (items, completed, history, counters) = queue.export_parts(now);
        Self {
            version: SNAPSHOT_VERSION,
            exported_at: now,
            items,
            completed,
            history,
            counters,
            capability_overrides: overrides,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(blob: &[u8]) -> Result<Self, SnapshotError> {
        let state: QueueState = serde_json::from_slice(blob)?;
        if state.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(state.version));
        }
        Ok(state)
    }

    /// Rebuilds a queue. Overrides are returned untouched for the caller to bind.
    pub fn into_queue(self) -> Result<(TieredQueue, Vec<CapabilityOverride>), SnapshotError> {
        let queue = TieredQueue::from_parts(self.items, self.completed, self.history, self.counters)
            .map_err(SnapshotError::Duplicate)?;
        Ok((queue, self.capability_overrides))
    }
}
