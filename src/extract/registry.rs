//! Extension-keyed registry of text extractors.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ExtractError, PlainTextExtractor, TextExtractor};

/// Maps file extensions to the extractor responsible for that format.
///
/// Resolution happens at ingestion time and fails closed: an extension with no
/// registered extractor aborts that document with
/// [`ExtractError::UnsupportedFormat`] without touching the index.
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Create a registry with the built-in plain-text extractors installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let text = Arc::new(PlainTextExtractor::new());
        registry.register("txt", text.clone());
        registry.register("md", text);
        registry
    }

    /// Register an extractor for an extension, replacing any existing binding.
    pub fn register(&mut self, extension: &str, extractor: Arc<dyn TextExtractor>) {
        self.extractors
            .insert(extension.trim().to_lowercase(), extractor);
    }

    /// Extract text from raw bytes using the extractor registered for `extension`.
    pub fn extract(&self, extension: &str, raw: &[u8]) -> Result<String, ExtractError> {
        let key = extension.trim().to_lowercase();
        let extractor =
            self.extractors
                .get(&key)
                .ok_or_else(|| ExtractError::UnsupportedFormat {
                    extension: key.clone(),
                })?;
        tracing::debug!(extension = %key, bytes = raw.len(), "Extracting document text");
        extractor.extract(raw)
    }

    /// Enumerate the registered extensions, sorted for stable output.
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.extractors.keys().cloned().collect();
        extensions.sort();
        extensions
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
