//! Host-owned loops around a [`Scheduler`]: discovery, worker polling and the
//! aging ticker. The scheduler itself never spawns timers.

use crate::models::{EnqueueHints, ProcessingOutcome, ProcessingResult, QueueItemId};
use crate::scanner;
use crate::scheduler::Scheduler;
use crate::error::EnqueueError;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnqueueSummary {
    pub discovered: usize,
    pub enqueued: Vec<QueueItemId>,
    pub rejected: Vec<String>,
}

/// Discovers files under `roots` and enqueues each one. Rejections are collected,
/// not fatal.
pub async fn enqueue_paths(
    scheduler: &Scheduler,
    roots: &[PathBuf],
    excludes: &[String],
) -> anyhow::Result<EnqueueSummary> {
    let files = scanner::discover(roots, excludes).await?;
    let mut summary = EnqueueSummary {
        discovered: files.len(),
        ..EnqueueSummary::default()
    };
    for file in files {
        let path = file.path.display().to_string();
        match scheduler.enqueue(file, EnqueueHints::default()).await {
            Ok(id) => summary.enqueued.push(id),
            Err(EnqueueError::Duplicate(id)) => {
                debug!(%id, %path, "already queued");
            }
            Err(e) => {
                warn!(%path, error = %e, "rejected");
                summary.rejected.push(format!("{path}: {e}"));
            }
        }
    }
    info!(
        discovered = summary.discovered,
        enqueued = summary.enqueued.len(),
        "enqueue complete"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub workers: usize,
    pub poll_interval: Duration,
    /// Stop once a worker finds nothing eligible instead of polling forever.
    pub until_idle: bool,
}

impl WorkerOptions {
    pub fn from_scheduler(scheduler: &Scheduler) -> Self {
        let cfg = scheduler.config();
        Self {
            workers: cfg.workers.max(1),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            until_idle: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub attempts: usize,
    pub completed: usize,
    pub deferred: usize,
    pub retried: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub requeued: usize,
}

impl RunSummary {
    pub fn record(&mut self, result: &ProcessingResult) {
        self.attempts += 1;
        match result.outcome {
            ProcessingOutcome::Completed => self.completed += 1,
            ProcessingOutcome::Deferred { .. } => self.deferred += 1,
            ProcessingOutcome::RetryScheduled { .. } => self.retried += 1,
            ProcessingOutcome::Failed => self.failed += 1,
            ProcessingOutcome::Cancelled => self.cancelled += 1,
            ProcessingOutcome::Requeued => self.requeued += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.attempts += other.attempts;
        self.completed += other.completed;
        self.deferred += other.deferred;
        self.retried += other.retried;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.requeued += other.requeued;
    }
}

/// Spawns `workers` polling loops and waits for all of them. Loops end when the
/// scheduler's token is cancelled, or, with `until_idle`, when nothing is
/// eligible.
pub async fn run_workers(scheduler: Scheduler, opts: WorkerOptions) -> RunSummary {
    let token = scheduler.cancellation_token();
    let mut set = JoinSet::new();
    for worker in 0..opts.workers.max(1) {
        let scheduler = scheduler.clone();
        let token = token.clone();
        set.spawn(async move { worker_loop(worker, scheduler, token, opts).await });
    }

    let mut summary = RunSummary::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(part) => summary.merge(part),
            Err(e) => warn!(error = %e, "worker task ended abnormally"),
        }
    }
    info!(
        attempts = summary.attempts,
        completed = summary.completed,
        deferred = summary.deferred,
        failed = summary.failed,
        "workers stopped"
    );
    summary
}

async fn worker_loop(
    worker: usize,
    scheduler: Scheduler,
    token: CancellationToken,
    opts: WorkerOptions,
) -> RunSummary {
    let mut summary = RunSummary::default();
    debug!(worker, "worker started");
    loop {
        if token.is_cancelled() {
            break;
        }
        match scheduler.process_next().await {
            Some(result) => summary.record(&result),
            None if opts.until_idle => break,
            None => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(opts.poll_interval) => {}
                }
            }
        }
    }
    debug!(worker, attempts = summary.attempts, "worker stopped");
    summary
}

/// Runs an aging sweep every `interval` until `token` is cancelled.
pub fn spawn_aging_ticker(
    scheduler: Scheduler,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = scheduler.run_aging_sweep().await;
                    debug!(promoted = report.promoted.len(), "aging tick");
                }
            }
        }
    })
}
