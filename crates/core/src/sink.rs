use crate::models::QueueItem;
use extractors::Extracted;
use std::sync::Mutex;

/// Receives successfully processed items. Downstream indexing lives behind this.
#[async_trait::async_trait]
pub trait CompletionSink: Send + Sync {
    async fn accept(&self, item: &QueueItem, extracted: &Extracted) -> anyhow::Result<()>;
}

/// Discards completions.
pub struct NoopSink;

#[async_trait::async_trait]
impl CompletionSink for NoopSink {
    async fn accept(&self, _item: &QueueItem, _extracted: &Extracted) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub item: QueueItem,
    pub text_len: usize,
    pub chunks: usize,
}

/// Keeps every completion in memory; used by tests and the CLI's report output.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SinkRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl CompletionSink for MemorySink {
    async fn accept(&self, item: &QueueItem, extracted: &Extracted) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SinkRecord {
                item: item.clone(),
                text_len: extracted.text.chars().count(),
                chunks: extracted.chunks.len(),
            });
        Ok(())
    }
}
