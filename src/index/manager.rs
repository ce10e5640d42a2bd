//! Ingestion and deletion orchestration over the vector index and metadata store.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::extract::{ExtractError, ExtractorRegistry};
use crate::processing::chunking::{self, ChunkingError};

use super::store::{IndexInconsistency, MetadataStore, StoreError};
use super::types::{ChunkRecord, Document, DocumentStatus, ScoredChunk, current_timestamp_rfc3339};
use super::vector::{VectorIndex, VectorIndexError};

/// Errors raised by index bookkeeping and persistence.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The referenced document is not in the index.
    #[error("document not found: {0}")]
    NotFound(Uuid),
    /// The invariant between vector index and metadata store is broken.
    #[error(transparent)]
    Inconsistency(#[from] IndexInconsistency),
    /// Vector index operation failed.
    #[error(transparent)]
    Vector(#[from] VectorIndexError),
    /// Metadata store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Filesystem failure while preparing the data directory.
    #[error("index storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while ingesting a single document.
///
/// A failure only ever affects the document being ingested; sibling documents
/// in a batch are untouched.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Text extraction failed for this document's format.
    #[error("failed to extract document text: {0}")]
    Extract(#[from] ExtractError),
    /// Extraction produced no indexable text.
    #[error("document produced no indexable content")]
    EmptyContent,
    /// Chunking parameters were invalid.
    #[error("failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// The embedding service failed after retries.
    #[error("failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Vector/metadata bookkeeping failed; any partial writes were rolled back.
    #[error("index update failed: {0}")]
    Index(#[from] IndexError),
}

/// Construction-time settings for [`IndexManager`].
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Directory holding `vectors.bin` and `metadata.json`.
    pub data_dir: PathBuf,
    /// Embedding dimension the index is created with.
    pub dimension: usize,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Tombstone count that triggers compaction (`0` compacts on every delete).
    pub compact_threshold: usize,
    /// Repair inconsistent state on load instead of refusing to serve.
    pub auto_repair: bool,
}

struct IndexState {
    vectors: VectorIndex,
    store: MetadataStore,
}

/// Owns the vector index and metadata store and keeps them consistent.
///
/// All dependencies are injected at construction; there is no process-wide
/// index singleton. Mutations are serialized by a single writer lock while
/// searches share a read lock, so readers observe either the pre- or
/// post-state of a transaction, never an intermediate one. Every mutation is
/// flushed to the data directory before it returns.
pub struct IndexManager {
    state: RwLock<IndexState>,
    registry: ExtractorRegistry,
    embedder: Arc<dyn EmbeddingClient>,
    settings: IndexSettings,
    index_path: PathBuf,
    metadata_path: PathBuf,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("settings", &self.settings)
            .field("index_path", &self.index_path)
            .field("metadata_path", &self.metadata_path)
            .finish_non_exhaustive()
    }
}

impl IndexManager {
    /// Open (or create) the index pair in the configured data directory.
    ///
    /// Both files are loaded together and the global invariant is checked
    /// before any query is served. On violation the manager either repairs
    /// (dropping orphaned vectors/chunks and demoting affected documents) or
    /// refuses to start, depending on `auto_repair`.
    pub fn open(
        settings: IndexSettings,
        registry: ExtractorRegistry,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, IndexError> {
        std::fs::create_dir_all(&settings.data_dir)?;
        let index_path = settings.data_dir.join("vectors.bin");
        let metadata_path = settings.data_dir.join("metadata.json");

        let mut vectors = if index_path.exists() {
            VectorIndex::load(&index_path)?
        } else {
            VectorIndex::new(settings.dimension)
        };
        if vectors.dimension() != settings.dimension {
            return Err(IndexInconsistency(format!(
                "index file has dimension {} but configuration expects {}",
                vectors.dimension(),
                settings.dimension
            ))
            .into());
        }
        let mut store = if metadata_path.exists() {
            MetadataStore::load(&metadata_path)?
        } else {
            MetadataStore::new()
        };

        if let Err(violation) = store.verify(&vectors) {
            if !settings.auto_repair {
                tracing::error!(error = %violation, "Refusing to serve inconsistent index");
                return Err(violation.into());
            }
            tracing::error!(error = %violation, "Index inconsistent on load; repairing");
            let summary = store.repair(&mut vectors);
            let remap = vectors.compact();
            store.apply_slot_remap(&remap)?;
            store.verify(&vectors)?;
            tracing::warn!(
                dropped_vectors = summary.dropped_vectors,
                dropped_chunks = summary.dropped_chunks,
                demoted_documents = summary.demoted_documents,
                "Repaired index state"
            );
            vectors.save(&index_path)?;
            store.save(&metadata_path)?;
        }

        tracing::info!(
            documents = store.document_count(),
            chunks = store.chunk_count(),
            data_dir = %settings.data_dir.display(),
            "Index opened"
        );

        Ok(Self {
            state: RwLock::new(IndexState { vectors, store }),
            registry,
            embedder,
            settings,
            index_path,
            metadata_path,
        })
    }

    /// Ingest one document: extract, chunk, embed, and publish atomically.
    ///
    /// The document record is created up front with `Processing` status so a
    /// failure at any stage leaves a visible `Failed` record with zero chunks
    /// and the vector index untouched. Embedding happens outside the writer
    /// lock; the insert transaction rolls back fully (tombstoning any vectors
    /// it already placed) if a late step fails.
    pub async fn ingest(
        &self,
        filename: &str,
        extension: &str,
        raw: &[u8],
    ) -> Result<Document, IngestError> {
        let document_id = Uuid::new_v4();
        let mut document = Document {
            id: document_id,
            filename: filename.to_string(),
            extension: extension.trim().to_lowercase(),
            uploaded_at: current_timestamp_rfc3339(),
            chunk_count: 0,
            status: DocumentStatus::Processing,
        };
        {
            let mut state = self.state.write().await;
            state.store.put_document(document.clone());
            self.flush(&state)?;
        }
        tracing::info!(document = %document_id, filename, "Ingesting document");

        let text = match self.registry.extract(&document.extension, raw) {
            Ok(text) => text,
            Err(error) => {
                self.mark_failed(document_id).await;
                return Err(error.into());
            }
        };

        let pieces =
            match chunking::chunk(&text, self.settings.chunk_size, self.settings.chunk_overlap) {
                Ok(pieces) if pieces.is_empty() => {
                    self.mark_failed(document_id).await;
                    return Err(IngestError::EmptyContent);
                }
                Ok(pieces) => pieces,
                Err(error) => {
                    self.mark_failed(document_id).await;
                    return Err(error.into());
                }
            };

        let texts: Vec<String> = pieces.iter().map(|piece| piece.text.clone()).collect();
        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == pieces.len() => vectors,
            Ok(vectors) => {
                self.mark_failed(document_id).await;
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} vectors, got {}",
                    pieces.len(),
                    vectors.len()
                ))
                .into());
            }
            Err(error) => {
                self.mark_failed(document_id).await;
                return Err(error.into());
            }
        };

        let mut state = self.state.write().await;
        let mut inserted_slots = Vec::with_capacity(pieces.len());
        let mut records = Vec::with_capacity(pieces.len());
        for (sequence_no, (piece, vector)) in pieces.into_iter().zip(vectors).enumerate() {
            let chunk_id = Uuid::new_v4();
            match state.vectors.insert(vector, chunk_id) {
                Ok(slot) => {
                    inserted_slots.push(slot);
                    records.push(ChunkRecord {
                        id: chunk_id,
                        document_id,
                        sequence_no: sequence_no as u32,
                        text: piece.text,
                        span: piece.span,
                        slot,
                    });
                }
                Err(error) => {
                    Self::roll_back(&mut state, &inserted_slots, document_id);
                    self.flush(&state).map_err(IngestError::Index)?;
                    return Err(IndexError::from(error).into());
                }
            }
        }
        let chunk_count = records.len();
        if let Err(error) = state.store.put_chunks(document_id, records) {
            Self::roll_back(&mut state, &inserted_slots, document_id);
            self.flush(&state).map_err(IngestError::Index)?;
            return Err(IndexError::from(error).into());
        }

        document.status = DocumentStatus::Indexed;
        document.chunk_count = chunk_count;
        state.store.put_document(document.clone());
        debug_assert!(state.store.verify(&state.vectors).is_ok());
        self.flush(&state).map_err(IngestError::Index)?;
        tracing::info!(
            document = %document_id,
            filename,
            chunks = chunk_count,
            "Document indexed"
        );
        Ok(document)
    }

    /// Delete a document: tombstone its vectors, drop its records, maybe compact.
    ///
    /// Returns [`IndexError::NotFound`] for unknown or already-deleted ids;
    /// a repeated delete has no side effects.
    pub async fn delete(&self, document_id: Uuid) -> Result<(), IndexError> {
        let mut state = self.state.write().await;
        let chunks = match state.store.delete_document(document_id) {
            Ok(chunks) => chunks,
            Err(StoreError::NotFound(id)) => return Err(IndexError::NotFound(id)),
            Err(error) => return Err(error.into()),
        };
        for chunk in &chunks {
            state.vectors.mark_deleted(chunk.slot)?;
        }

        let tombstones = state.vectors.tombstone_count();
        if tombstones > 0 && tombstones >= self.settings.compact_threshold {
            let remap = state.vectors.compact();
            state.store.apply_slot_remap(&remap)?;
        }
        self.flush(&state)?;
        tracing::info!(
            document = %document_id,
            chunks = chunks.len(),
            tombstones = state.vectors.tombstone_count(),
            "Document deleted"
        );
        Ok(())
    }

    /// Rank live chunks against a query vector, resolving provenance.
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let state = self.state.read().await;
        let hits = state.vectors.search(query, k)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk) = state.store.get_chunk(hit.chunk_id) else {
                return Err(IndexInconsistency(format!(
                    "live slot {} resolved to unknown chunk {}",
                    hit.slot, hit.chunk_id
                ))
                .into());
            };
            let filename = state
                .store
                .get_document(chunk.document_id)
                .map(|document| document.filename.clone())
                .unwrap_or_default();
            results.push(ScoredChunk {
                chunk: chunk.clone(),
                filename,
                score: hit.score,
            });
        }
        Ok(results)
    }

    /// List all documents, including failed ones.
    pub async fn documents(&self) -> Vec<Document> {
        self.state.read().await.store.list_documents()
    }

    /// Look up one document.
    pub async fn document(&self, id: Uuid) -> Option<Document> {
        self.state.read().await.store.get_document(id).cloned()
    }

    /// Number of recorded documents, whatever their status.
    pub async fn document_count(&self) -> usize {
        self.state.read().await.store.document_count()
    }

    /// Number of live chunks across all documents.
    pub async fn live_chunk_count(&self) -> usize {
        self.state.read().await.vectors.live_len()
    }

    /// Number of tombstones awaiting compaction.
    pub async fn tombstone_count(&self) -> usize {
        self.state.read().await.vectors.tombstone_count()
    }

    /// Re-check the global invariant.
    pub async fn verify(&self) -> Result<(), IndexError> {
        let state = self.state.read().await;
        state.store.verify(&state.vectors)?;
        Ok(())
    }

    fn roll_back(state: &mut IndexState, inserted_slots: &[usize], document_id: Uuid) {
        for &slot in inserted_slots {
            if let Err(error) = state.vectors.mark_deleted(slot) {
                tracing::error!(slot, error = %error, "Rollback failed to tombstone slot");
            }
        }
        if let Err(error) = state
            .store
            .update_status(document_id, DocumentStatus::Failed, 0)
        {
            tracing::error!(document = %document_id, error = %error, "Rollback failed to mark document");
        }
        tracing::warn!(
            document = %document_id,
            vectors = inserted_slots.len(),
            "Rolled back partial ingestion"
        );
    }

    async fn mark_failed(&self, document_id: Uuid) {
        let mut state = self.state.write().await;
        if let Err(error) = state
            .store
            .update_status(document_id, DocumentStatus::Failed, 0)
        {
            tracing::error!(document = %document_id, error = %error, "Failed to record ingestion failure");
            return;
        }
        if let Err(error) = self.flush(&state) {
            tracing::error!(document = %document_id, error = %error, "Failed to flush after ingestion failure");
        }
    }

    fn flush(&self, state: &IndexState) -> Result<(), IndexError> {
        state.vectors.save(&self.index_path)?;
        state.store.save(&self.metadata_path)?;
        Ok(())
    }
}
