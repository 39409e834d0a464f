//! Storage layer: durable blob stores for queue snapshots.
//!
//! Holds DB pool setup, the migration runner, and the `Store` implementations.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A single durable slot holding the latest snapshot blob.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn save(&self, blob: &[u8]) -> Result<(), StoreError>;
    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn save(&self, blob: &[u8]) -> Result<(), StoreError> {
        *self.slot.lock().await = Some(blob.to_vec());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.slot.lock().await.clone())
    }
}

/// Writes the blob next to the target and renames it into place.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Store for FileStore {
    async fn save(&self, blob: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, blob).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), bytes = blob.len(), "snapshot written");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keyed snapshot rows in SQLite; several schedulers can share one database.
pub struct SqliteStore {
    pool: SqlitePool,
    key: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    pub async fn open(database_url: &str, key: &str) -> anyhow::Result<Self> {
        let pool = connect(database_url).await?;
        migrate(&pool).await?;
        Ok(Self::new(pool, key))
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn save(&self, blob: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (key, blob, saved_at)
            VALUES (?1, ?2, strftime('%s','now'))
            ON CONFLICT(key) DO UPDATE SET
                blob = excluded.blob,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(&self.key)
        .bind(blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT blob FROM snapshots WHERE key = ?1")
            .bind(&self.key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>(0)))
    }
}

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
    }
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        opts = opts.max_connections(1);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect_with(options).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
