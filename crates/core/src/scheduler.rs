//! The queue's public face. A `Scheduler` owns the tiers, the capability registry
//! and the worker bound; clones share all of it.
//!
//! Locks are always taken queue first, registry second. No lock is held while an
//! extractor runs or while the completion sink is called.

use crate::aging::{self, AgingPolicy, AgingReport};
use crate::capability::{CapabilityDescriptor, CapabilityRegistry};
use crate::classifier::{self, PriorityInputs};
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, QueueConfig};
use crate::error::{EnqueueError, QueueError, SnapshotError};
use crate::models::{
    EnqueueHints, FileDescriptor, HistoryEntry, ItemMeta, ItemStatus, ProcessingOutcome,
    ProcessingResult, QueueItem, QueueItemId,
};
use crate::queue::{RetryPolicy, TieredQueue};
use crate::scorer::{ScoreVector, Scorer, ScoringContext};
use crate::sink::{CompletionSink, NoopSink};
use crate::snapshot::{ImportReport, QueueState};
use crate::stats::StatsSnapshot;
use anyhow::Context;
use chrono::{DateTime, Utc};
use extractors::plaintext::PlainTextExtractor;
use extractors::{ExtractError, ExtractInput, Extractor};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use storage::Store;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of registering an extractor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnlockReport {
    pub file_type: String,
    pub newly_supported: bool,
    pub requeued: Vec<QueueItemId>,
    pub anomalies: Vec<String>,
}

#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<Mutex<TieredQueue>>,
    registry: Arc<RwLock<CapabilityRegistry>>,
    scorer: Arc<Scorer>,
    config: Arc<QueueConfig>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn CompletionSink>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(config: QueueConfig, scorer: Scorer, registry: CapabilityRegistry) -> Self {
        let workers = config.workers.max(1);
        Self {
            queue: Arc::new(Mutex::new(TieredQueue::new())),
            registry: Arc::new(RwLock::new(registry)),
            scorer: Arc::new(scorer),
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NoopSink),
            permits: Arc::new(Semaphore::new(workers)),
            cancel: CancellationToken::new(),
        }
    }

    /// Default registry plus any future-capability files named in the config.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let mut registry = CapabilityRegistry::with_text_extractor(PlainTextExtractor::new(
            config.queue.max_content_bytes,
        ));
        if let Some(dir) = &config.capabilities.path {
            let merged = registry
                .load_future_from_dir(Path::new(dir))
                .with_context(|| format!("load capability files from {dir}"))?;
            info!(merged, dir = %dir, "loaded future capabilities");
        }
        Ok(Self::new(
            config.queue.clone(),
            Scorer::new(config.scoring.clone()),
            registry,
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.max_attempts.max(1),
            backoff: self.config.retry_backoff(),
        }
    }

    fn prioritize(
        &self,
        scores: &ScoreVector,
        file: &FileDescriptor,
        capability: &CapabilityDescriptor,
        queued_for: chrono::Duration,
        bonus: f64,
    ) -> f64 {
        let inputs = PriorityInputs::new(
            scores,
            file,
            capability,
            queued_for,
            self.config.aging_threshold(),
        );
        classifier::priority_score(&inputs) + bonus
    }

    /// Priority of a queued item as of `now`: time in queue, its enqueue bonus and
    /// one aging boost per promotion it has had.
    fn current_priority(&self, item: &QueueItem, capability: &CapabilityDescriptor, now: DateTime<Utc>) -> f64 {
        self.prioritize(
            &item.scores,
            &item.file,
            capability,
            now - item.enqueued_at,
            item.meta.priority_bonus,
        ) + f64::from(item.meta.boost_count) * self.config.aging_boost
    }

    fn scoring_context(&self, queue: &TieredQueue, file: &FileDescriptor, now: DateTime<Utc>) -> ScoringContext {
        ScoringContext {
            now,
            relevant_siblings: queue
                .relevant_siblings(&file.path, self.scorer.config().relevance_threshold),
        }
    }

    /// Scores, classifies and inserts a file. Content is not read here; the
    /// content dimension stays 0 until extraction.
    pub async fn enqueue(
        &self,
        file: FileDescriptor,
        hints: EnqueueHints,
    ) -> Result<QueueItemId, EnqueueError> {
        file.validate()?;
        let now = self.clock.now();
        let id = QueueItemId::derive(&file.path, hints.discovered_at.unwrap_or(now));

        let mut queue = self.queue.lock().await;
        let registry = self.registry.read().await;
        let ctx = self.scoring_context(&queue, &file, now);
        let scores = self.scorer.score(&file, None, &ctx);
        let capability = registry.descriptor(&file.file_type);
        let (tier, reason) = match hints.force_tier {
            Some(t) => (t, format!("forced to {t}")),
            None => {
                let c = classifier::classify(
                    &scores,
                    &file.file_type,
                    capability.future_priority(),
                    self.scorer.is_urgent(&file),
                );
                (c.tier, c.reason)
            }
        };
        let priority_score = self.prioritize(
            &scores,
            &file,
            &capability,
            chrono::Duration::zero(),
            hints.priority_bonus,
        );
        drop(registry);

        let item = QueueItem {
            id: id.clone(),
            file,
            scores,
            tier,
            priority_score,
            status: ItemStatus::Queued,
            attempts: 0,
            enqueued_at: now,
            last_attempt_at: None,
            next_attempt_at: None,
            completed_at: None,
            failed_at: None,
            errors: Vec::new(),
            meta: ItemMeta {
                original_tier: Some(tier),
                priority_bonus: hints.priority_bonus,
                ..ItemMeta::default()
            },
        };
        debug!(
            id = %id,
            path = %item.file.path.display(),
            %tier,
            composite = scores.composite,
            composite_potential = scores.composite_potential,
            priority = priority_score,
            %reason,
            "enqueue"
        );
        queue.insert(item)?;
        Ok(id)
    }

    /// Binds `extractor` to `file_type` and moves every deferred item of that type
    /// back to its ready tier in the same critical section.
    pub async fn register_extractor(
        &self,
        file_type: &str,
        extractor: Arc<dyn Extractor>,
        confidence: f32,
    ) -> UnlockReport {
        let now = self.clock.now();
        let mut queue = self.queue.lock().await;
        let mut registry = self.registry.write().await;
        let key = crate::models::normalize_token(file_type);
        let newly_supported = registry.register(&key, extractor.clone(), confidence, now);
        let capability = registry.descriptor(&key);

        let (pending, anomalies) = queue.take_pending(&key);
        let mut report = UnlockReport {
            file_type: key.clone(),
            newly_supported,
            requeued: Vec::with_capacity(pending.len()),
            anomalies,
        };
        for mut item in pending {
            let ctx = self.scoring_context(&queue, &item.file, now);
            item.scores = self.scorer.score(&item.file, None, &ctx);
            item.priority_score = self.current_priority(&item, &capability, now);
            match queue.requeue_unlocked(item, now) {
                Ok(id) => report.requeued.push(id),
                Err(e) => report.anomalies.push(e.to_string()),
            }
        }
        info!(
            file_type = %key,
            extractor = extractor.name(),
            newly_supported,
            requeued = report.requeued.len(),
            anomalies = report.anomalies.len(),
            "registered extractor"
        );
        report
    }

    /// Takes the next eligible item through one processing attempt. Returns `None`
    /// when nothing is eligible or the scheduler is shut down.
    pub async fn process_next(&self) -> Option<ProcessingResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let _permit = self.permits.clone().acquire_owned().await.ok()?;
        if self.cancel.is_cancelled() {
            return None;
        }

        let item = {
            let mut queue = self.queue.lock().await;
            queue.dequeue_next(self.clock.now())?
        };
        let check = self.registry.read().await.check(&item.file.file_type);
        let extractor = match check.extractor {
            Some(ex) if check.capable => ex,
            _ => return self.settle_without_extractor(&item).await,
        };

        debug!(id = %item.id, extractor = extractor.name(), attempt = item.attempts, "extracting");
        let input = ExtractInput {
            path: &item.file.path,
            file_type: &item.file.file_type,
            bytes: item.file.content.as_deref().map(Vec::as_slice),
        };
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(ExtractError::Cancelled),
            r = extractor.extract(input) => r,
        };

        let now = self.clock.now();
        match result {
            Ok(extracted) => {
                let done = {
                    let mut queue = self.queue.lock().await;
                    let ctx = self.scoring_context(&queue, &item.file, now);
                    let scores = self.scorer.score(&item.file, Some(&extracted.text), &ctx);
                    queue.complete(&item.id, scores, now)
                };
                let done = self.settled(&item, done)?;
                if let Err(e) = self.sink.accept(&done, &extracted).await {
                    warn!(id = %done.id, error = %e, "completion sink rejected item");
                }
                info!(id = %done.id, composite = done.scores.composite, "completed");
                Some(ProcessingResult::from_item(&done, ProcessingOutcome::Completed))
            }
            Err(ExtractError::Cancelled) => {
                let res = self.queue.lock().await.cancel(&item.id, now);
                let back = self.settled(&item, res)?;
                info!(id = %back.id, "extraction cancelled");
                Some(ProcessingResult::from_item(&back, ProcessingOutcome::Cancelled))
            }
            Err(e) => {
                let permanent = e.is_permanent();
                let res = self.queue.lock().await.fail_attempt(
                    &item.id,
                    e.to_string(),
                    permanent,
                    self.retry_policy(),
                    now,
                );
                let after = self.settled(&item, res)?;
                let outcome = match (after.status, after.next_attempt_at) {
                    (ItemStatus::RetryScheduled, Some(next_attempt_at)) => {
                        warn!(id = %after.id, attempt = after.attempts, error = %e, "retry scheduled");
                        ProcessingOutcome::RetryScheduled { next_attempt_at }
                    }
                    _ => {
                        error!(id = %after.id, attempts = after.attempts, permanent, error = %e, "failed");
                        ProcessingOutcome::Failed
                    }
                };
                Some(ProcessingResult::from_item(&after, outcome))
            }
        }
    }

    /// Defers an item whose type has no extractor, unless one was registered
    /// since the check, in which case it goes straight back to its ready tier.
    async fn settle_without_extractor(&self, item: &QueueItem) -> Option<ProcessingResult> {
        let now = self.clock.now();
        let mut queue = self.queue.lock().await;
        let registry = self.registry.read().await;
        let check = registry.check(&item.file.file_type);
        if check.capable {
            let res = queue.requeue(&item.id, now, "capability appeared while in flight");
            drop(registry);
            drop(queue);
            let back = self.settled(item, res)?;
            return Some(ProcessingResult::from_item(&back, ProcessingOutcome::Requeued));
        }
        let res = queue.defer(
            &item.id,
            check.estimated_ready_at,
            check.technique.clone(),
            self.config.capability_recheck(),
            now,
        );
        drop(registry);
        drop(queue);
        let deferred = self.settled(item, res)?;
        info!(
            id = %deferred.id,
            file_type = %deferred.file.file_type,
            reason = %check.reason,
            next_check = ?deferred.next_attempt_at,
            "deferred until capability is available"
        );
        Some(ProcessingResult::from_item(
            &deferred,
            ProcessingOutcome::Deferred {
                estimated_ready_at: check.estimated_ready_at,
            },
        ))
    }

    /// Logs a transition the queue refused, e.g. because state was imported
    /// while the item was in flight.
    fn settled(&self, item: &QueueItem, res: Result<QueueItem, QueueError>) -> Option<QueueItem> {
        match res {
            Ok(item) => Some(item),
            Err(e) => {
                error!(id = %item.id, error = %e, "dropping processing result");
                None
            }
        }
    }

    /// Runs up to `n` attempts concurrently, bounded by the worker count.
    pub async fn process_batch(&self, n: usize) -> Vec<ProcessingResult> {
        let mut set = JoinSet::new();
        for _ in 0..n {
            let this = self.clone();
            set.spawn(async move { this.process_next().await });
        }
        let mut results = Vec::with_capacity(n);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(r)) => results.push(r),
                Ok(None) => {}
                Err(e) => error!(error = %e, "processing task panicked"),
            }
        }
        results
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let queue = self.queue.lock().await;
        StatsSnapshot::collect(
            &queue,
            self.clock.now(),
            chrono::Duration::minutes(self.config.rate_window_minutes),
        )
    }

    /// Promotes aged items, then refreshes every queued item's priority so time
    /// spent waiting counts within its tier too.
    pub async fn run_aging_sweep(&self) -> AgingReport {
        let now = self.clock.now();
        let mut queue = self.queue.lock().await;
        let registry = self.registry.read().await;
        let mut report = aging::sweep(&mut queue, AgingPolicy::from_config(&self.config), now);
        report.reprioritized = queue.reprioritize(|item| {
            self.current_priority(item, &registry.descriptor(&item.file.file_type), now)
        });
        if !report.promoted.is_empty() || report.reprioritized > 0 {
            info!(
                promoted = report.promoted.len(),
                reprioritized = report.reprioritized,
                scanned = report.scanned,
                "aging sweep"
            );
        }
        report
    }

    pub async fn cleanup(&self) -> usize {
        let removed = self.queue.lock().await.cleanup();
        info!(removed, "cleanup");
        removed
    }

    pub async fn item(&self, id: &QueueItemId) -> Option<QueueItem> {
        self.queue.lock().await.get(id).cloned()
    }

    pub async fn history(&self, id: &QueueItemId) -> Vec<HistoryEntry> {
        self.queue.lock().await.history().entries(id).to_vec()
    }

    pub async fn unsupported_types(&self) -> Vec<String> {
        self.registry.read().await.unsupported_types()
    }

    /// Copies queue and registry overrides under both locks.
    pub async fn export_state(&self) -> Result<Vec<u8>, SnapshotError> {
        let queue = self.queue.lock().await;
        let registry = self.registry.read().await;
        QueueState::capture(&queue, registry.overrides(), self.clock.now()).to_bytes()
    }

    /// Replaces the current queue with a snapshot and re-binds persisted extractor
    /// registrations that this process can satisfy.
    pub async fn import_state(&self, blob: &[u8]) -> Result<ImportReport, SnapshotError> {
        let state = QueueState::from_bytes(blob)?;
        let (restored, overrides) = state.into_queue()?;
        let mut queue = self.queue.lock().await;
        let mut registry = self.registry.write().await;
        let unbound_overrides = registry.restore_overrides(&overrides);
        for o in &unbound_overrides {
            warn!(file_type = %o.file_type, extractor = %o.extractor, "no extractor to restore registration");
        }
        let report = ImportReport {
            items: restored.tiered().count(),
            completed: restored.completed().count(),
            history_entries: restored.history().len(),
            unbound_overrides,
        };
        *queue = restored;
        info!(items = report.items, completed = report.completed, "imported queue state");
        Ok(report)
    }

    pub async fn save(&self, store: &dyn Store) -> Result<(), SnapshotError> {
        let blob = self.export_state().await?;
        store.save(&blob).await?;
        debug!(bytes = blob.len(), "saved queue state");
        Ok(())
    }

    /// `Ok(None)` when the store holds nothing yet.
    pub async fn load(&self, store: &dyn Store) -> Result<Option<ImportReport>, SnapshotError> {
        match store.load().await? {
            Some(blob) => Ok(Some(self.import_state(&blob).await?)),
            None => Ok(None),
        }
    }

    /// Cancels in-flight extraction and waits for every worker slot to drain.
    /// Cancelled items are back in their tiers as due retries when this returns.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers = u32::try_from(self.config.workers.max(1)).unwrap_or(u32::MAX);
        if let Ok(all) = self.permits.acquire_many(workers).await {
            drop(all);
        }
        self.permits.close();
        info!("scheduler shut down");
    }
}
