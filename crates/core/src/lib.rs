//! Core library: scoring, capability gating, tiered scheduling and persistence of
//! a file processing queue.

pub mod aging;
pub mod capability;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod scanner;
pub mod scheduler;
pub mod scorer;
pub mod sink;
pub mod snapshot;
pub mod stats;

pub use capability::{CapabilityRegistry, PriorityClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EnqueueError, QueueError, SnapshotError};
pub use models::{
    EnqueueHints, FileDescriptor, ItemStatus, ProcessingOutcome, ProcessingResult, QueueItem,
    QueueItemId, Tier,
};
pub use scheduler::{Scheduler, UnlockReport};
pub use stats::StatsSnapshot;
