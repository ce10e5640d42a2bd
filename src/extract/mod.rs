//! Text extraction capability and per-extension dispatch.
//!
//! Concrete binary-format readers (PDF, spreadsheets, slides) live outside this
//! crate; they plug in through [`TextExtractor`] and [`ExtractorRegistry`]. The
//! registry resolves extractors by lowercased file extension and fails closed
//! with [`ExtractError::UnsupportedFormat`] for anything unregistered.

mod registry;
mod text;

pub use registry::ExtractorRegistry;
pub use text::PlainTextExtractor;

use thiserror::Error;

/// Errors raised while turning raw document bytes into plain text.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No extractor is registered for the file extension.
    #[error("unsupported file format: '{extension}'")]
    UnsupportedFormat {
        /// Extension the caller tried to ingest.
        extension: String,
    },
    /// The file matched a registered format but could not be decoded.
    #[error("corrupt or unreadable file: {source}")]
    CorruptFile {
        /// Underlying error raised by the format reader.
        #[source]
        source: anyhow::Error,
    },
}

/// Capability implemented by per-format text extractors.
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from raw document bytes.
    fn extract(&self, raw: &[u8]) -> Result<String, ExtractError>;
}

/// Collapse runs of whitespace and normalize newlines, preserving paragraph breaks.
///
/// Mirrors the cleanup applied before chunking so that chunk boundaries land on
/// meaningful sentence and paragraph edges rather than formatting artifacts.
pub fn clean_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut cleaned = String::with_capacity(normalized.len());
    for (index, paragraph) in normalized.split("\n\n").enumerate() {
        let squeezed = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
        if squeezed.is_empty() {
            continue;
        }
        if index > 0 && !cleaned.is_empty() {
            cleaned.push_str("\n\n");
        }
        cleaned.push_str(&squeezed);
    }
    cleaned
}
