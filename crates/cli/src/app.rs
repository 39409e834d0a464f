//! Wiring shared by every command: config → scheduler, plus the state store the
//! queue is loaded from and saved back to.

use anyhow::{Context, Result};
use extractors::{Extractor, ExtractorCatalog};
use intake_core::config::{AppConfig, StorageConfig};
use intake_core::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use storage::{FileStore, MemoryStore, SqliteStore, Store};
use tracing::{debug, info};

pub async fn open_store(cfg: &StorageConfig) -> Result<Box<dyn Store>> {
    let store: Box<dyn Store> = match cfg.kind.as_str() {
        "sqlite" => Box::new(
            SqliteStore::open(&cfg.path, &cfg.key)
                .await
                .with_context(|| format!("open sqlite store {}", cfg.path))?,
        ),
        "file" => Box::new(FileStore::new(PathBuf::from(&cfg.path))),
        "memory" => Box::new(MemoryStore::new()),
        other => anyhow::bail!("unknown storage kind {other:?} (expected sqlite, file or memory)"),
    };
    debug!(kind = %cfg.kind, path = %cfg.path, "opened store");
    Ok(store)
}

/// Extractors the CLI can bind by name with `unlock --extractor`. The scheduler's
/// registry catalogues the same set, so a binding made here is restored on load.
pub fn builtin_extractor(name: &str, max_bytes: usize) -> Option<Arc<dyn Extractor>> {
    ExtractorCatalog::builtin(max_bytes).get(name)
}

pub struct App {
    pub config: AppConfig,
    pub scheduler: Scheduler,
    store: Box<dyn Store>,
}

impl App {
    /// Builds the scheduler and restores whatever the store holds.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let scheduler = Scheduler::from_config(&config)?;
        let store = open_store(&config.storage).await?;
        if let Some(report) = scheduler.load(store.as_ref()).await.context("load queue state")? {
            info!(
                items = report.items,
                completed = report.completed,
                "restored queue state"
            );
        }
        Ok(Self {
            config,
            scheduler,
            store,
        })
    }

    pub async fn persist(&self) -> Result<()> {
        self.scheduler
            .save(self.store.as_ref())
            .await
            .context("save queue state")
    }
}
