use crate::models::{ItemStatus, QueueItemId};
use thiserror::Error;

/// Rejections at `enqueue` time. Rejected descriptors never enter the queue.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("item {0} is already tracked")]
    Duplicate(QueueItemId),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown item {0}")]
    UnknownItem(QueueItemId),
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: QueueItemId,
        from: ItemStatus,
        to: ItemStatus,
    },
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    Version(u32),
    #[error("snapshot contains item {0} more than once")]
    Duplicate(QueueItemId),
    #[error("store error: {0}")]
    Store(#[from] storage::StoreError),
}
