//! Built-in extractor for plain-text formats.

use anyhow::anyhow;

use super::{ExtractError, TextExtractor, clean_text};

/// Extractor for UTF-8 text formats (`txt`, `md`).
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    /// Construct a plain-text extractor.
    pub const fn new() -> Self {
        Self
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, raw: &[u8]) -> Result<String, ExtractError> {
        let text = std::str::from_utf8(raw).map_err(|err| ExtractError::CorruptFile {
            source: anyhow!("invalid UTF-8 at byte {}", err.valid_up_to()),
        })?;
        Ok(clean_text(text))
    }
}
