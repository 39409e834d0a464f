use crate::{ExtractError, ExtractInput, Extracted, Extractor};
use std::sync::Arc;

type ExtractFn = dyn Fn(ExtractInput<'_>) -> Result<Extracted, ExtractError> + Send + Sync;

/// Wraps a plain function as an extractor, for hosts that register extraction
/// callbacks rather than full types.
#[derive(Clone)]
pub struct FnExtractor {
    name: String,
    func: Arc<ExtractFn>,
}

impl FnExtractor {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(ExtractInput<'_>) -> Result<Extracted, ExtractError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for FnExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExtractor").field("name", &self.name).finish()
    }
}

#[async_trait::async_trait]
impl Extractor for FnExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extracted, ExtractError> {
        (self.func)(input)
    }
}
