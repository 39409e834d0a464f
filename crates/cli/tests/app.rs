use cli::app::{builtin_extractor, open_store, App};
use cli::watch::{changed_files, enqueue_changed};
use intake_core::config::{AppConfig, StorageConfig};
use intake_core::pipeline;
use intake_core::{ItemStatus, Tier};
use notify::event::{AccessKind, CreateKind, EventKind};
use std::fs;
use tempfile::tempdir;

fn config_for(state: &std::path::Path, kind: &str) -> AppConfig {
    AppConfig {
        storage: StorageConfig {
            kind: kind.to_string(),
            path: state.to_string_lossy().into_owned(),
            key: "queue".to_string(),
        },
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn test_state_survives_between_invocations() {
    // 1. Setup a small inbox and a file-backed store
    let temp = tempdir().unwrap();
    let inbox = temp.path().join("inbox");
    fs::create_dir_all(&inbox).unwrap();
    fs::write(inbox.join("notes.txt"), "call the accountant about the budget").unwrap();
    fs::write(inbox.join("mailbox.pst"), vec![1u8; 128]).unwrap();
    let cfg = config_for(&temp.path().join("state/queue.json"), "file");

    // 2. First invocation: enqueue and persist
    let app = App::open(cfg.clone()).await.unwrap();
    let summary = pipeline::enqueue_paths(&app.scheduler, &[inbox.clone()], &[])
        .await
        .unwrap();
    assert_eq!(summary.enqueued.len(), 2);
    app.persist().await.unwrap();

    // 3. Second invocation: process everything eligible
    let app = App::open(cfg.clone()).await.unwrap();
    assert_eq!(app.scheduler.stats().await.total_queued, 2);
    let results = app.scheduler.process_batch(2).await;
    assert_eq!(results.len(), 2);
    app.persist().await.unwrap();

    // 4. Third invocation: text done, mailbox waiting on a capability
    let app = App::open(cfg.clone()).await.unwrap();
    let stats = app.scheduler.stats().await;
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.pending_capability, 1);
    assert_eq!(stats.tier(Tier::Reprocess), 1);

    // 5. Unlock the mailbox type with a built-in extractor
    let ex = builtin_extractor("noop", 1024).unwrap();
    let report = app.scheduler.register_extractor("pst", ex, 0.5).await;
    assert_eq!(report.requeued.len(), 1);
    app.persist().await.unwrap();

    // 6. The binding is restored on the next invocation and the mailbox completes
    let app = App::open(cfg).await.unwrap();
    assert!(!app.scheduler.unsupported_types().await.contains(&"pst".to_string()));
    let r = app.scheduler.process_next().await.unwrap();
    assert_eq!(r.status, ItemStatus::Completed);
}

#[tokio::test]
async fn test_sqlite_store_backs_the_app() {
    let temp = tempdir().unwrap();
    let cfg = config_for(&temp.path().join("intake.db"), "sqlite");
    let app = App::open(cfg.clone()).await.unwrap();
    let file = temp.path().join("a.md");
    fs::write(&file, "# heading").unwrap();
    assert_eq!(enqueue_changed(&app.scheduler, &[file]).await, 1);
    app.persist().await.unwrap();

    let again = App::open(cfg).await.unwrap();
    assert_eq!(again.scheduler.stats().await.total_queued, 1);
}

#[tokio::test]
async fn test_unknown_store_kind_is_an_error() {
    let bad = StorageConfig {
        kind: "s3".to_string(),
        ..StorageConfig::default()
    };
    assert!(open_store(&bad).await.is_err());
    assert!(builtin_extractor("ocr", 1024).is_none());
}

#[test]
fn test_watch_events_filter_to_changed_files() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("new.txt");
    let hidden = temp.path().join(".swp");
    fs::write(&file, "x").unwrap();
    fs::write(&hidden, "x").unwrap();

    let created = notify::Event::new(EventKind::Create(CreateKind::File))
        .add_path(file.clone())
        .add_path(hidden)
        .add_path(temp.path().to_path_buf());
    assert_eq!(changed_files(&created), vec![file.clone()]);

    let accessed = notify::Event::new(EventKind::Access(AccessKind::Any)).add_path(file);
    assert!(changed_files(&accessed).is_empty());
}
