//! Document service coordinating ingestion, retrieval, and answer composition.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::answer::{Answer, AnswerComposer};
use crate::extract::ExtractError;
use crate::index::{Document, IndexManager, IngestError};
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::retrieval::RetrievalEngine;

use super::types::{ServiceError, UploadOutcome};

/// Coordinates the full question-answering pipeline over one index.
///
/// Owns long-lived handles to the index manager, retrieval engine, answer
/// composer, and metrics registry so every surface reuses the same
/// components. Construct once near process start and share through an `Arc`.
pub struct DocumentService {
    index: Arc<IndexManager>,
    retrieval: RetrievalEngine,
    composer: AnswerComposer,
    metrics: Arc<ServiceMetrics>,
    chunk_size: usize,
    default_top_k: usize,
    per_document_cap: Option<usize>,
}

/// Abstraction over the pipeline used by external surfaces, mainly HTTP.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Extract, chunk, embed, and index an uploaded file.
    async fn upload(&self, filename: &str, raw: &[u8]) -> Result<UploadOutcome, ServiceError>;

    /// List all stored documents, including failed ones.
    async fn list_documents(&self) -> Vec<Document>;

    /// Remove a document and its vectors.
    async fn delete_document(&self, document_id: Uuid) -> Result<(), ServiceError>;

    /// Answer a question from the indexed documents.
    async fn ask(&self, question: &str, top_k: Option<usize>) -> Result<Answer, ServiceError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl DocumentService {
    /// Assemble the service from its already-constructed components.
    pub fn new(
        index: Arc<IndexManager>,
        retrieval: RetrievalEngine,
        composer: AnswerComposer,
        metrics: Arc<ServiceMetrics>,
        chunk_size: usize,
        default_top_k: usize,
        per_document_cap: Option<usize>,
    ) -> Self {
        Self {
            index,
            retrieval,
            composer,
            metrics,
            chunk_size,
            default_top_k,
            per_document_cap,
        }
    }
}

/// Pull the lowercase extension out of a filename.
fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

#[async_trait]
impl DocumentApi for DocumentService {
    async fn upload(&self, filename: &str, raw: &[u8]) -> Result<UploadOutcome, ServiceError> {
        let Some(extension) = extension_of(filename) else {
            self.metrics.record_failure();
            return Err(IngestError::Extract(ExtractError::UnsupportedFormat {
                extension: String::new(),
            })
            .into());
        };
        match self.index.ingest(filename, &extension, raw).await {
            Ok(document) => {
                self.metrics.record_document(document.chunk_count as u64);
                Ok(UploadOutcome {
                    document_id: document.id,
                    chunk_count: document.chunk_count,
                    chunk_size: self.chunk_size,
                    status: document.status,
                })
            }
            Err(error) => {
                self.metrics.record_failure();
                Err(error.into())
            }
        }
    }

    async fn list_documents(&self) -> Vec<Document> {
        self.index.documents().await
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<(), ServiceError> {
        self.index.delete(document_id).await?;
        self.metrics.record_deletion();
        Ok(())
    }

    async fn ask(&self, question: &str, top_k: Option<usize>) -> Result<Answer, ServiceError> {
        let k = top_k.unwrap_or(self.default_top_k);
        let retrieved = self
            .retrieval
            .retrieve(question, k, self.per_document_cap)
            .await?;
        tracing::info!(passages = retrieved.len(), k, "Composing answer");
        let answer = self.composer.compose(question, &retrieved).await;
        self.metrics.record_question();
        Ok(answer)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of("Report.TXT"), Some("txt".to_string()));
        assert_eq!(extension_of("notes.md"), Some("md".to_string()));
    }

    #[test]
    fn missing_extension_is_detected() {
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of(""), None);
    }
}
