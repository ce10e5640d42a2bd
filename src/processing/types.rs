//! Shared types for the document pipeline surfaces.

use serde::Serialize;
use thiserror::Error;

use crate::index::{DocumentStatus, IndexError, IngestError};
use crate::retrieval::RetrieveError;
use uuid::Uuid;

/// Errors emitted by the document service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Ingestion failed for the uploaded document.
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// Index bookkeeping failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Question retrieval failed.
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
}

/// Result summary for a completed upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    /// Identifier assigned to the stored document.
    pub document_id: Uuid,
    /// Number of chunks indexed for the document.
    pub chunk_count: usize,
    /// Target chunk size the ingestion used, in characters.
    pub chunk_size: usize,
    /// Final document status.
    pub status: DocumentStatus,
}
