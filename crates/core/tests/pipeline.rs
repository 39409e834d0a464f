mod common;

use chrono::Duration;
use common::*;
use intake_core::pipeline::{self, WorkerOptions};
use intake_core::{EnqueueHints, ItemStatus, Tier};
use std::fs;

#[tokio::test]
async fn test_enqueue_paths_then_drain() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("inbox");
    fs::create_dir_all(root.join("mail")).unwrap();
    fs::write(root.join("todo.txt"), "call the bank").unwrap();
    fs::write(root.join("readme.md"), "# readme").unwrap();
    fs::write(root.join("mail/archive.pst"), vec![7u8; 64]).unwrap();
    fs::write(root.join(".secret.txt"), "hidden").unwrap();

    let (s, _clock) = scheduler();
    let summary = pipeline::enqueue_paths(&s, &[root.clone()], &[]).await.unwrap();
    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.enqueued.len(), 3);
    assert!(summary.rejected.is_empty());

    // Same instant, same paths: nothing new.
    let again = pipeline::enqueue_paths(&s, &[root], &[]).await.unwrap();
    assert!(again.enqueued.is_empty());

    let opts = WorkerOptions {
        workers: 2,
        until_idle: true,
        ..WorkerOptions::from_scheduler(&s)
    };
    let run = pipeline::run_workers(s.clone(), opts).await;
    assert_eq!(run.attempts, 3);
    assert_eq!(run.completed, 2);
    assert_eq!(run.deferred, 1);

    let stats = s.stats().await;
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.pending_capability, 1);
    assert_eq!(stats.processing, 0);
}

#[tokio::test]
async fn test_workers_stop_on_cancellation() {
    let (s, _clock) = scheduler();
    let opts = WorkerOptions {
        workers: 3,
        poll_interval: std::time::Duration::from_millis(5),
        until_idle: false,
    };
    let handle = tokio::spawn(pipeline::run_workers(s.clone(), opts));
    s.enqueue(text_file("/data/w/late.txt", "late arrival", 1), EnqueueHints::default())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    s.shutdown().await;
    let run = handle.await.unwrap();
    assert_eq!(run.completed, 1);
}

#[tokio::test]
async fn test_aging_ticker_promotes_until_cancelled() {
    let (s, clock) = scheduler();
    let id = s
        .enqueue(
            text_file("/data/t/old.txt", "x", 1),
            EnqueueHints {
                force_tier: Some(Tier::Low),
                ..EnqueueHints::default()
            },
        )
        .await
        .unwrap();
    clock.advance(Duration::days(31));

    let token = tokio_util::sync::CancellationToken::new();
    let ticker = pipeline::spawn_aging_ticker(
        s.clone(),
        std::time::Duration::from_millis(10),
        token.clone(),
    );
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    token.cancel();
    ticker.await.unwrap();

    let item = s.item(&id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Queued);
    assert_eq!(item.tier, Tier::High);
    assert_eq!(item.meta.boost_count, 2);
}
