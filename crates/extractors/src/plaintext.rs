use crate::{ExtractError, ExtractInput, Extracted, Extractor};
use tokio::io::AsyncReadExt;

const DEFAULT_MAX_BYTES: usize = 64 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Reads UTF-8 (lossy) text, either from the provided bytes or from disk.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    pub max_bytes: usize,
    pub chunk_size: usize,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PlainTextExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    async fn read_prefix(&self, input: &ExtractInput<'_>) -> Result<Vec<u8>, ExtractError> {
        if let Some(bytes) = input.bytes {
            let n = bytes.len().min(self.max_bytes);
            return Ok(bytes[..n].to_vec());
        }
        let file = tokio::fs::File::open(input.path).await?;
        let mut buf = Vec::with_capacity(self.max_bytes.min(DEFAULT_MAX_BYTES));
        file.take(self.max_bytes as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl Extractor for PlainTextExtractor {
    fn name(&self) -> &str {
        "plaintext"
    }

    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extracted, ExtractError> {
        let buf = self.read_prefix(&input).await?;
        if buf.iter().take(1024).any(|b| *b == 0) {
            return Err(ExtractError::Permanent(format!(
                "{} looks binary, not text",
                input.path.display()
            )));
        }
        let text = String::from_utf8_lossy(&buf).to_string();
        tracing::debug!(path = %input.path.display(), bytes = buf.len(), "plaintext extracted");
        Ok(Extracted::from_text(text, self.chunk_size, 0.9))
    }
}
