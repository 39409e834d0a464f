mod common;

use chrono::Duration;
use common::*;
use extractors::{ExtractError, ExtractInput, Extracted, Extractor};
use intake_core::capability::{CapabilityDescriptor, CapabilityRegistry, FutureCapability};
use intake_core::config::QueueConfig;
use intake_core::sink::MemorySink;
use intake_core::{
    EnqueueError, EnqueueHints, ItemStatus, PriorityClass, ProcessingOutcome, Tier,
};
use std::sync::Arc;
use tokio::sync::Notify;

#[tokio::test]
async fn test_unsupported_types_are_deferred_not_failed() {
    let (s, _clock) = scheduler();
    let pst = s
        .enqueue(file("/data/mail/mailbox.pst", 50 * MB, 10), EnqueueHints::default())
        .await
        .unwrap();
    let odd = s
        .enqueue(file("/data/misc/blob.qqq", 10, 3), EnqueueHints::default())
        .await
        .unwrap();

    let results = s.process_batch(4).await;
    assert_eq!(results.len(), 2);
    for r in &results {
        assert!(matches!(r.outcome, ProcessingOutcome::Deferred { .. }));
        assert_eq!(r.status, ItemStatus::PendingCapability);
        assert_eq!(r.tier, Tier::Reprocess);
        assert_eq!((r.attempts, r.deferrals), (0, 1));
    }

    let pst = s.item(&pst).await.unwrap();
    assert_eq!(pst.meta.future_technique.as_deref(), Some("pst-mailbox-parser"));
    assert!(pst.meta.estimated_ready_at.is_some());
    assert_eq!(pst.attempts, 0);
    // Unknown types have no estimate and wait for the recheck interval.
    let odd = s.item(&odd).await.unwrap();
    assert_eq!(odd.next_attempt_at, Some(start() + Duration::days(1)));

    let stats = s.stats().await;
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.pending_capability, 2);
    assert_eq!(stats.tier(Tier::Reprocess), 2);
    assert!(s.process_next().await.is_none());
}

#[tokio::test]
async fn test_critical_dequeues_before_high() {
    let (s, _clock) = scheduler();
    let high = s
        .enqueue(
            text_file("/data/a/plain.txt", "hello", 1),
            EnqueueHints {
                force_tier: Some(Tier::High),
                ..EnqueueHints::default()
            },
        )
        .await
        .unwrap();
    let urgent = s
        .enqueue(text_file("/data/a/URGENT-call-back.txt", "call back", 1), EnqueueHints::default())
        .await
        .unwrap();
    assert_eq!(s.item(&urgent).await.unwrap().tier, Tier::Critical);

    let first = s.process_next().await.unwrap();
    let second = s.process_next().await.unwrap();
    assert_eq!(first.id, urgent);
    assert_eq!(second.id, high);
    assert_eq!(first.outcome, ProcessingOutcome::Completed);
}

#[tokio::test]
async fn test_priority_orders_within_a_tier() {
    let (s, _clock) = scheduler();
    let plain = s
        .enqueue(text_file("/data/b/one.txt", "x", 1), EnqueueHints::default())
        .await
        .unwrap();
    let boosted = s
        .enqueue(
            text_file("/data/b/two.txt", "y", 1),
            EnqueueHints {
                priority_bonus: 100.0,
                ..EnqueueHints::default()
            },
        )
        .await
        .unwrap();
    let a = s.item(&plain).await.unwrap();
    let b = s.item(&boosted).await.unwrap();
    assert_eq!(a.tier, b.tier);
    assert!(b.priority_score > a.priority_score);
    assert_eq!(s.process_next().await.unwrap().id, boosted);
}

#[tokio::test]
async fn test_register_extractor_unlocks_every_pending_item() {
    let (s, _clock) = scheduler();
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let id = s
            .enqueue(file(&format!("/data/mail/{name}.pst"), 5 * MB, 20), EnqueueHints::default())
            .await
            .unwrap();
        ids.push(id);
    }
    let other = s
        .enqueue(file("/data/docs/spec.pdf", MB, 20), EnqueueHints::default())
        .await
        .unwrap();
    s.process_batch(4).await;
    assert_eq!(s.stats().await.pending_capability, 4);

    let report = s.register_extractor(".PST", ok_extractor("pst-parser"), 0.9).await;
    assert!(report.newly_supported);
    assert_eq!(report.file_type, "pst");
    assert_eq!(report.requeued.len(), 3);
    assert!(report.anomalies.is_empty());

    for id in &ids {
        let item = s.item(id).await.unwrap();
        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.meta.reprocess_count, 1);
        assert!(item.tier.is_ready());
        assert_eq!(Some(item.tier), item.meta.original_tier);
    }
    assert_eq!(
        s.item(&other).await.unwrap().status,
        ItemStatus::PendingCapability
    );

    let sink = Arc::new(MemorySink::new());
    let s = s.with_sink(sink.clone());
    let done = s.process_batch(3).await;
    assert_eq!(done.len(), 3);
    assert!(done.iter().all(|r| r.outcome == ProcessingOutcome::Completed));
    assert_eq!(sink.len(), 3);
    assert_eq!(s.stats().await.tier(Tier::Reprocess), 1);
}

#[tokio::test]
async fn test_retries_back_off_then_fail() {
    let (s, clock) = scheduler();
    s.register_extractor("log", failing_extractor("flaky", false), 0.5)
        .await;
    let id = s
        .enqueue(text_file("/var/app/run.log", "line", 1), EnqueueHints::default())
        .await
        .unwrap();

    let r = s.process_next().await.unwrap();
    assert_eq!(
        r.outcome,
        ProcessingOutcome::RetryScheduled {
            next_attempt_at: start() + Duration::seconds(60)
        }
    );
    assert!(s.process_next().await.is_none());

    clock.advance(Duration::seconds(61));
    let r = s.process_next().await.unwrap();
    assert_eq!(r.status, ItemStatus::RetryScheduled);
    assert_eq!(r.attempts, 2);
    let item = s.item(&id).await.unwrap();
    assert_eq!(
        item.next_attempt_at,
        Some(s.now() + Duration::seconds(120))
    );

    clock.advance(Duration::seconds(121));
    let r = s.process_next().await.unwrap();
    assert_eq!(r.outcome, ProcessingOutcome::Failed);
    assert_eq!(r.status, ItemStatus::Failed);

    clock.advance(Duration::days(30));
    assert!(s.process_next().await.is_none());
    let item = s.item(&id).await.unwrap();
    assert_eq!(item.errors.len(), 3);
    assert!(item.failed_at.is_some());
    let stats = s.stats().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_queued, 0);
}

#[tokio::test]
async fn test_permanent_errors_skip_retries() {
    let (s, _clock) = scheduler();
    s.register_extractor("log", failing_extractor("broken", true), 0.5)
        .await;
    let id = s
        .enqueue(text_file("/var/app/bad.log", "x", 1), EnqueueHints::default())
        .await
        .unwrap();
    let r = s.process_next().await.unwrap();
    assert_eq!(r.outcome, ProcessingOutcome::Failed);
    let item = s.item(&id).await.unwrap();
    assert_eq!(item.attempts, 1);
    assert!(item.errors[0].permanent);
}

#[tokio::test]
async fn test_binary_content_in_text_type_fails_permanently() {
    let (s, _clock) = scheduler();
    let f = intake_core::FileDescriptor::new("/data/x/blob.txt", 4, start())
        .with_content(vec![0, 1, 2, 3]);
    s.enqueue(f, EnqueueHints::default()).await.unwrap();
    let r = s.process_next().await.unwrap();
    assert_eq!(r.outcome, ProcessingOutcome::Failed);
    assert!(r.error.unwrap().contains("binary"));
}

#[tokio::test]
async fn test_completion_rescores_with_content() {
    let (s, _clock) = scheduler();
    let body = "The board reached a decision on the budget and the roadmap.\n".repeat(20);
    let id = s
        .enqueue(text_file("/data/c/minutes.txt", &body, 2), EnqueueHints::default())
        .await
        .unwrap();
    let before = s.item(&id).await.unwrap().scores;
    assert_eq!(before.content, 0.0);
    let r = s.process_next().await.unwrap();
    assert_eq!(r.status, ItemStatus::Completed);
    assert!(r.scores.content > 50.0);
    assert!(r.scores.composite > before.composite);
}

#[tokio::test]
async fn test_invalid_descriptor_is_rejected() {
    let (s, _clock) = scheduler();
    let bad = file("/data/d/x.txt", 1, 1).with_name("  ");
    assert!(matches!(
        s.enqueue(bad, EnqueueHints::default()).await,
        Err(EnqueueError::InvalidDescriptor(_))
    ));
    let good = file("/data/d/x.txt", 1, 1);
    s.enqueue(good.clone(), EnqueueHints::default()).await.unwrap();
    assert!(matches!(
        s.enqueue(good, EnqueueHints::default()).await,
        Err(EnqueueError::Duplicate(_))
    ));
    assert_eq!(s.stats().await.total_queued, 1);
}

#[tokio::test]
async fn test_pending_items_recheck_after_estimate() {
    let registry = CapabilityRegistry::new().with_entry(CapabilityDescriptor::future(
        "nsf",
        FutureCapability {
            technique: "notes-export".to_string(),
            estimated_ready_at: Some(start() + Duration::days(2)),
            priority: PriorityClass::Critical,
        },
    ));
    let (s, clock) = scheduler_with(QueueConfig::default(), registry);
    let id = s
        .enqueue(file("/data/notes/db.nsf", MB, 5), EnqueueHints::default())
        .await
        .unwrap();
    assert_eq!(s.item(&id).await.unwrap().tier, Tier::Critical);

    s.process_next().await.unwrap();
    assert_eq!(
        s.item(&id).await.unwrap().next_attempt_at,
        Some(start() + Duration::days(2))
    );
    clock.advance(Duration::days(1));
    assert!(s.process_next().await.is_none());

    clock.advance(Duration::days(2));
    let r = s.process_next().await.unwrap();
    assert!(matches!(r.outcome, ProcessingOutcome::Deferred { .. }));
    let item = s.item(&id).await.unwrap();
    assert_eq!(item.meta.original_tier, Some(Tier::Critical));
    assert_eq!(
        item.next_attempt_at,
        Some(start() + Duration::days(3) + Duration::days(1))
    );
    assert_eq!(s.history(&id).await.len(), 5);
}

#[tokio::test]
async fn test_aging_promotes_one_tier_per_sweep() {
    let (s, clock) = scheduler();
    let id = s
        .enqueue(
            text_file("/data/e/old.md", "nothing here", 400),
            EnqueueHints {
                force_tier: Some(Tier::Low),
                ..EnqueueHints::default()
            },
        )
        .await
        .unwrap();
    let before = s.item(&id).await.unwrap().priority_score;

    assert!(s.run_aging_sweep().await.promoted.is_empty());
    clock.advance(Duration::days(31));
    let report = s.run_aging_sweep().await;
    assert_eq!(report.promoted.len(), 1);
    let item = s.item(&id).await.unwrap();
    assert_eq!(item.tier, Tier::Medium);
    assert_eq!(item.meta.boost_count, 1);
    // aging boost plus two points for one day past the threshold
    assert_eq!(item.priority_score, before + 25.0 + 2.0);

    s.run_aging_sweep().await;
    let item = s.item(&id).await.unwrap();
    assert_eq!(item.tier, Tier::High);
    assert_eq!(item.meta.boost_count, 2);
    assert_eq!(s.stats().await.counters.boosted, 2);
}

#[tokio::test]
async fn test_waiting_time_raises_priority_within_a_tier() {
    // 1. Two identical logs, the second arriving 60 days later with a small bonus
    let (s, clock) = scheduler();
    let high = |bonus| EnqueueHints {
        force_tier: Some(Tier::High),
        priority_bonus: bonus,
        ..EnqueueHints::default()
    };
    let old = s
        .enqueue(text_file("/data/a/report.log", "same body", 1), high(0.0))
        .await
        .unwrap();
    clock.advance(Duration::days(60));
    let fresh = s
        .enqueue(text_file("/data/b/report.log", "same body", -59), high(10.0))
        .await
        .unwrap();
    let old_before = s.item(&old).await.unwrap().priority_score;
    let fresh_before = s.item(&fresh).await.unwrap().priority_score;
    assert_eq!(fresh_before, old_before + 10.0);

    // 2. The sweep folds in 30 days past the threshold, capped at +50
    let report = s.run_aging_sweep().await;
    assert!(report.promoted.is_empty());
    assert_eq!(report.reprioritized, 1);
    assert_eq!(s.item(&old).await.unwrap().priority_score, old_before + 50.0);
    assert_eq!(s.item(&fresh).await.unwrap().priority_score, fresh_before);

    // 3. The long-waiting item now goes first
    let first = s.process_next().await.unwrap();
    assert_eq!(first.id, old);
    assert_eq!(first.tier, Tier::High);
}

#[tokio::test]
async fn test_cleanup_drops_terminal_items() {
    let (s, _clock) = scheduler();
    s.register_extractor("log", failing_extractor("broken", true), 0.5)
        .await;
    let done = s
        .enqueue(text_file("/data/f/a.txt", "fine", 1), EnqueueHints::default())
        .await
        .unwrap();
    let bad = s
        .enqueue(text_file("/data/f/b.log", "bad", 1), EnqueueHints::default())
        .await
        .unwrap();
    let waiting = s
        .enqueue(file("/data/f/c.pdf", 10, 1), EnqueueHints::default())
        .await
        .unwrap();
    s.process_batch(3).await;
    assert_eq!(s.cleanup().await, 2);
    assert!(s.item(&done).await.is_none());
    assert!(s.item(&bad).await.is_none());
    assert!(s.history(&bad).await.is_empty());
    assert!(s.item(&waiting).await.is_some());
}

/// Blocks until cancelled, signalling once extraction has started.
struct StallingExtractor {
    started: Arc<Notify>,
}

#[async_trait::async_trait]
impl Extractor for StallingExtractor {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn extract(&self, _input: ExtractInput<'_>) -> Result<Extracted, ExtractError> {
        self.started.notify_one();
        std::future::pending::<()>().await;
        Ok(Extracted::default())
    }
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_extraction() {
    let (s, _clock) = scheduler();
    let started = Arc::new(Notify::new());
    s.register_extractor(
        "bin",
        Arc::new(StallingExtractor {
            started: started.clone(),
        }),
        0.5,
    )
    .await;
    let id = s
        .enqueue(file("/data/g/slow.bin", 10, 1), EnqueueHints::default())
        .await
        .unwrap();

    let worker = s.clone();
    let handle = tokio::spawn(async move { worker.process_next().await });
    started.notified().await;
    assert_eq!(s.stats().await.processing, 1);

    s.shutdown().await;
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.outcome, ProcessingOutcome::Cancelled);
    let item = s.item(&id).await.unwrap();
    assert_eq!(item.status, ItemStatus::RetryScheduled);
    assert_eq!(item.attempts, 0);
    assert_eq!(item.next_attempt_at, Some(start()));
    assert!(s.process_next().await.is_none());
}
