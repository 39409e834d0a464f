use crate::error::EnqueueError;
use crate::scorer::ScoreVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Immutable identity of a discovered file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub file_type: String,
    /// Content already held by the discovery side. Not persisted; restored items
    /// are read from `path` again.
    #[serde(skip)]
    pub content: Option<Arc<Vec<u8>>>,
}

impl FileDescriptor {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified_at: DateTime<Utc>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_type = file_type_token(&name);
        Self {
            path,
            name,
            size,
            modified_at,
            file_type,
            content: None,
        }
    }

    pub fn with_content(mut self, bytes: Vec<u8>) -> Self {
        self.content = Some(Arc::new(bytes));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.file_type = file_type_token(&self.name);
        self
    }

    pub fn folder(&self) -> Option<&Path> {
        self.path.parent()
    }

    pub fn validate(&self) -> Result<(), EnqueueError> {
        if self.path.as_os_str().is_empty() {
            return Err(EnqueueError::InvalidDescriptor("path is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(EnqueueError::InvalidDescriptor(format!(
                "{}: name is empty",
                self.path.display()
            )));
        }
        if self.file_type != normalize_token(&self.file_type) {
            return Err(EnqueueError::InvalidDescriptor(format!(
                "{}: file type token {:?} is not normalized",
                self.path.display(),
                self.file_type
            )));
        }
        Ok(())
    }
}

/// Lowercased suffix after the last dot, without the dot. Dotfiles and names
/// without a suffix yield an empty token.
pub fn file_type_token(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => normalize_token(ext),
        _ => String::new(),
    }
}

/// Accepts ".PST", "pst" or " Pst " and yields "pst".
pub fn normalize_token(token: &str) -> String {
    token.trim().trim_start_matches('.').to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(String);

impl QueueItemId {
    /// Stable id from path plus discovery time, so re-discovering the same path
    /// later yields a distinct item.
    pub fn derive(path: &Path, discovered_at: DateTime<Utc>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b"|");
        hasher.update(
            discovered_at
                .timestamp_nanos_opt()
                .unwrap_or_else(|| discovered_at.timestamp_micros())
                .to_le_bytes()
                .as_slice(),
        );
        let hex = hasher.finalize().to_hex();
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Critical,
    High,
    Medium,
    Low,
    Reprocess,
}

impl Tier {
    /// Dequeue scan order.
    pub const ALL: [Tier; 5] = [
        Tier::Critical,
        Tier::High,
        Tier::Medium,
        Tier::Low,
        Tier::Reprocess,
    ];

    pub fn index(self) -> usize {
        match self {
            Tier::Critical => 0,
            Tier::High => 1,
            Tier::Medium => 2,
            Tier::Low => 3,
            Tier::Reprocess => 4,
        }
    }

    /// One step up for aging. Only `low` and `medium` age.
    pub fn promoted(self) -> Option<Tier> {
        match self {
            Tier::Low => Some(Tier::Medium),
            Tier::Medium => Some(Tier::High),
            _ => None,
        }
    }

    pub fn is_ready(self) -> bool {
        !matches!(self, Tier::Reprocess)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Critical => "critical",
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
            Tier::Reprocess => "reprocess",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Tier::Critical),
            "high" => Ok(Tier::High),
            "medium" => Ok(Tier::Medium),
            "low" => Ok(Tier::Low),
            "reprocess" => Ok(Tier::Reprocess),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    PendingCapability,
    RetryScheduled,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::PendingCapability => "pending_capability",
            ItemStatus::RetryScheduled => "retry_scheduled",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub attempt: u32,
    pub message: String,
    pub permanent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMeta {
    pub original_tier: Option<Tier>,
    pub boost_count: u32,
    pub reprocess_count: u32,
    pub estimated_ready_at: Option<DateTime<Utc>>,
    pub future_technique: Option<String>,
    /// Enqueue-time bonus, re-applied whenever the priority score is recomputed.
    #[serde(default)]
    pub priority_bonus: f64,
    /// Times the item was dequeued and parked for lack of an extractor. These
    /// dequeues are not counted in `attempts`.
    #[serde(default)]
    pub deferrals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub file: FileDescriptor,
    pub scores: ScoreVector,
    pub tier: Tier,
    pub priority_score: f64,
    pub status: ItemStatus,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub meta: ItemMeta,
}

impl QueueItem {
    /// Whether `dequeue_next` may hand this item out at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ItemStatus::Queued => true,
            ItemStatus::RetryScheduled | ItemStatus::PendingCapability => {
                self.next_attempt_at.map(|t| t <= now).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Tier the item returns to after a retry or a capability unlock.
    pub fn home_tier(&self) -> Tier {
        self.meta.original_tier.unwrap_or(self.tier)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub from: Option<ItemStatus>,
    pub to: ItemStatus,
    pub tier: Option<Tier>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueHints {
    /// Skip the classifier and place the item in this tier.
    pub force_tier: Option<Tier>,
    /// Flat bonus added to the computed priority score.
    pub priority_bonus: f64,
    /// Defaults to the scheduler clock.
    pub discovered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Completed,
    Deferred {
        estimated_ready_at: Option<DateTime<Utc>>,
    },
    RetryScheduled {
        next_attempt_at: DateTime<Utc>,
    },
    Failed,
    Cancelled,
    /// Capability appeared while the item was in flight; back in its ready tier.
    Requeued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub id: QueueItemId,
    pub path: PathBuf,
    pub file_type: String,
    pub outcome: ProcessingOutcome,
    pub status: ItemStatus,
    pub tier: Tier,
    pub attempts: u32,
    pub deferrals: u32,
    pub scores: ScoreVector,
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn from_item(item: &QueueItem, outcome: ProcessingOutcome) -> Self {
        Self {
            id: item.id.clone(),
            path: item.file.path.clone(),
            file_type: item.file.file_type.clone(),
            outcome,
            status: item.status,
            tier: item.tier,
            attempts: item.attempts,
            deferrals: item.meta.deferrals,
            scores: item.scores,
            error: item.errors.last().map(|e| e.message.clone()),
        }
    }
}
