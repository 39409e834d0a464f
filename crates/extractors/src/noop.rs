use crate::{ExtractError, ExtractInput, Extracted, Extractor};

/// Accepts anything and extracts nothing. Useful to mark a type as handled when only
/// its metadata matters.
#[derive(Debug, Default)]
pub struct NoopExtractor;

#[async_trait::async_trait]
impl Extractor for NoopExtractor {
    fn name(&self) -> &str {
        "noop"
    }

    async fn extract(&self, _input: ExtractInput<'_>) -> Result<Extracted, ExtractError> {
        Ok(Extracted::default())
    }
}
