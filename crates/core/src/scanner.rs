//! Walks directory trees and turns regular files into descriptors for enqueueing.

use crate::models::FileDescriptor;
use anyhow::Context;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task;
use tracing::debug;
use walkdir::WalkDir;

/// Every non-hidden, non-excluded regular file under `roots`, in walk order.
pub async fn discover(roots: &[PathBuf], excludes: &[String]) -> anyhow::Result<Vec<FileDescriptor>> {
    let (tx, mut rx) = mpsc::channel(100);
    let exclude_set = build_globset(excludes)?;
    let roots = roots.to_vec();

    let walker_handle = task::spawn_blocking(move || {
        for root in roots {
            for entry in WalkDir::new(&root)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), &exclude_set))
            {
                let entry = match entry {
                    Ok(e) => e,
                    Err(err) => {
                        debug!(error = %err, "skipping unreadable entry");
                        continue;
                    }
                };
                let path = entry.path();
                if !entry.file_type().is_file() && !path.is_file() {
                    continue;
                }
                if is_excluded(path, &exclude_set) || is_hidden(path) {
                    continue;
                }
                let Ok(file) = describe(path) else {
                    continue;
                };
                if tx.blocking_send(file).is_err() {
                    // Receiver dropped, stop walking.
                    return;
                }
            }
        }
    });

    let mut files = Vec::new();
    while let Some(file) = rx.recv().await {
        files.push(file);
    }
    walker_handle.await.context("walker task")?;
    Ok(files)
}

/// Descriptor for a single path from its filesystem metadata.
pub fn describe(path: &Path) -> anyhow::Result<FileDescriptor> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("{} is not a regular file", path.display());
    }
    let modified_at = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let path = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    Ok(FileDescriptor::new(path, meta.len(), modified_at))
}

pub fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("bad exclude pattern {pat:?}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, excludes: &GlobSet) -> bool {
    !is_excluded(path, excludes) && !is_hidden(path)
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

pub fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
}
