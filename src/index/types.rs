//! Shared records kept consistent between the vector index and the metadata store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::processing::chunking::ByteSpan;

/// Lifecycle state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Ingestion has started but chunks are not yet published.
    Processing,
    /// All chunks are live in the vector index.
    Indexed,
    /// Ingestion failed; no chunks are recorded for this document.
    Failed,
}

/// Bookkeeping record for an uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable unique identifier.
    pub id: Uuid,
    /// Original filename supplied at upload.
    pub filename: String,
    /// Lowercased file extension used for parser dispatch.
    pub extension: String,
    /// RFC3339 upload timestamp.
    pub uploaded_at: String,
    /// Number of live chunks; zero until ingestion finishes.
    pub chunk_count: usize,
    /// Current lifecycle state.
    pub status: DocumentStatus,
}

/// A chunk owned by exactly one document, referencing its vector slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Unique chunk identifier.
    pub id: Uuid,
    /// Owning document.
    pub document_id: Uuid,
    /// Position within the document; defines reading order.
    pub sequence_no: u32,
    /// Chunk text content.
    pub text: String,
    /// Byte offsets into the extracted source text, for citation.
    pub span: ByteSpan,
    /// Vector-index slot holding this chunk's embedding.
    pub slot: usize,
}

/// A chunk resolved from a vector-index hit, with provenance.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The chunk record backing the hit.
    pub chunk: ChunkRecord,
    /// Filename of the owning document.
    pub filename: String,
    /// Similarity score; comparable within one index generation only.
    pub score: f32,
}

/// Current UTC time rendered as RFC3339.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
