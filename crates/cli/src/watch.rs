use anyhow::Result;
use intake_core::pipeline::{self, WorkerOptions};
use intake_core::scanner;
use intake_core::{EnqueueError, EnqueueHints, Scheduler};
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Files an event says were created or whose contents changed. Hidden files are
/// ignored.
pub fn changed_files(event: &notify::Event) -> Vec<PathBuf> {
    let relevant = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Name(_)) => true,
        _ => false,
    };
    if !relevant {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| p.is_file() && !scanner::is_hidden(p))
        .cloned()
        .collect()
}

/// Enqueues each path, discovered at the scheduler's current time. Paths already
/// queued at that instant are skipped.
pub async fn enqueue_changed(scheduler: &Scheduler, paths: &[PathBuf]) -> usize {
    let mut enqueued = 0;
    for path in paths {
        let file = match scanner::describe(path) {
            Ok(f) => f,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skip");
                continue;
            }
        };
        match scheduler.enqueue(file, EnqueueHints::default()).await {
            Ok(id) => {
                info!(%id, path = %path.display(), "enqueued from watch");
                enqueued += 1;
            }
            Err(EnqueueError::Duplicate(_)) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "rejected"),
        }
    }
    enqueued
}

/// Watches `roots`, enqueueing changed files while workers and the aging ticker
/// run, until ctrl-c.
pub async fn watch_paths(scheduler: Scheduler, roots: Vec<PathBuf>, aging_every: Duration) -> Result<usize> {
    let (tx, mut rx) = mpsc::channel::<notify::Result<notify::Event>>(256);
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.blocking_send(res);
    })?;
    for p in &roots {
        let mode = if p.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(p, mode)?;
    }
    info!(paths = roots.len(), "watching");

    let token = scheduler.cancellation_token();
    let workers = tokio::spawn(pipeline::run_workers(
        scheduler.clone(),
        WorkerOptions::from_scheduler(&scheduler),
    ));
    let ticker = pipeline::spawn_aging_ticker(scheduler.clone(), aging_every, token.clone());

    let mut total = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(Ok(ev)) => {
                    let paths = changed_files(&ev);
                    if !paths.is_empty() {
                        total += enqueue_changed(&scheduler, &paths).await;
                    }
                }
                Some(Err(e)) => warn!(error = %e, "watch error"),
                None => break,
            },
        }
    }

    drop(watcher);
    scheduler.shutdown().await;
    let summary = workers.await?;
    ticker.await?;
    info!(enqueued = total, completed = summary.completed, "watch stopped");
    Ok(total)
}
