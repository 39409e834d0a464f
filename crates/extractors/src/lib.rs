//! Extractor abstractions: pluggable content extraction keyed by file type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod func;
pub mod noop;
pub mod plaintext;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("transient extraction failure: {0}")]
    Transient(String),
    #[error("permanent extraction failure: {0}")]
    Permanent(String),
    #[error("extraction cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Errors that retrying can never fix.
    pub fn is_permanent(&self) -> bool {
        match self {
            ExtractError::Permanent(_) => true,
            ExtractError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            ExtractError::Transient(_) | ExtractError::Cancelled => false,
        }
    }
}

/// What an extractor gets to look at. `bytes` is set when the caller already holds
/// the content in memory; otherwise the extractor reads `path` itself.
#[derive(Debug, Clone, Copy)]
pub struct ExtractInput<'a> {
    pub path: &'a Path,
    pub file_type: &'a str,
    pub bytes: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extracted {
    pub text: String,
    pub chunks: Vec<Chunk>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub hash: String,
}

impl Extracted {
    pub fn from_text(text: String, chunk_size: usize, confidence: f32) -> Self {
        let chunks = chunk_text(&text, chunk_size);
        Self {
            text,
            chunks,
            confidence,
        }
    }
}

#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extracted, ExtractError>;
}

/// Splits text into fixed-size chunks on char boundaries, each tagged with a blake3 hash.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        let slice = text[start..end].to_string();
        let hash = blake3::hash(slice.as_bytes()).to_hex().to_string();
        chunks.push(Chunk {
            start,
            end,
            text: slice,
            hash,
        });
        start = end;
    }
    chunks
}

/// Named extractors the host makes available, so persisted registrations can be
/// re-bound to a live handle after a restart.
#[derive(Default, Clone)]
pub struct ExtractorCatalog {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every extractor shipped in this crate, keyed by name. Plain text reads at
    /// most `max_bytes`.
    pub fn builtin(max_bytes: usize) -> Self {
        Self::new()
            .with_extractor(Arc::new(plaintext::PlainTextExtractor::new(max_bytes)))
            .with_extractor(Arc::new(noop::NoopExtractor))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.insert(extractor);
        self
    }

    pub fn insert(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors
            .insert(extractor.name().to_string(), extractor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.extractors.keys().cloned().collect();
        names.sort();
        names
    }
}
