//! Document and chunk bookkeeping, persisted as JSON beside the vector-index file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use super::types::{ChunkRecord, Document, DocumentStatus};
use super::vector::VectorIndex;

/// Errors raised by the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced document is not recorded.
    #[error("document not found: {0}")]
    NotFound(Uuid),
    /// A chunk batch referenced a different or missing document.
    #[error("chunk {chunk} does not belong to document {document}")]
    ForeignChunk {
        /// Offending chunk id.
        chunk: Uuid,
        /// Document the batch was inserted for.
        document: Uuid,
    },
    /// A chunk id collided with one already recorded.
    #[error("duplicate chunk id {0}")]
    DuplicateChunk(Uuid),
    /// Filesystem failure while saving or loading.
    #[error("metadata file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The metadata file could not be encoded or decoded.
    #[error("metadata file codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Violation of the index/metadata consistency invariant.
///
/// Raised when live vectors, live chunks, and recorded chunk counts disagree.
/// A store reporting this must not serve queries until repaired.
#[derive(Debug, Error)]
#[error("index inconsistency: {0}")]
pub struct IndexInconsistency(pub String);

/// Outcome of [`MetadataStore::repair`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RepairSummary {
    /// Vectors tombstoned because nothing referenced them.
    pub dropped_vectors: usize,
    /// Chunks removed because their vector or document was gone.
    pub dropped_chunks: usize,
    /// Documents demoted to `Failed` during repair.
    pub demoted_documents: usize,
}

/// In-memory document/chunk bookkeeping with JSON persistence.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataStore {
    documents: BTreeMap<Uuid, Document>,
    chunks: BTreeMap<Uuid, ChunkRecord>,
}

impl MetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or replace a document.
    pub fn put_document(&mut self, document: Document) {
        self.documents.insert(document.id, document);
    }

    /// Look up a document by id.
    pub fn get_document(&self, id: Uuid) -> Option<&Document> {
        self.documents.get(&id)
    }

    /// Update a document's status and chunk count.
    pub fn update_status(
        &mut self,
        id: Uuid,
        status: DocumentStatus,
        chunk_count: usize,
    ) -> Result<(), StoreError> {
        let document = self.documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        document.status = status;
        document.chunk_count = chunk_count;
        Ok(())
    }

    /// List all documents, sorted by upload time then id for stable output.
    pub fn list_documents(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self.documents.values().cloned().collect();
        documents.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        documents
    }

    /// Number of recorded documents.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Number of recorded chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Remove a document and all its chunks, returning the removed chunks.
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids so deletion stays
    /// idempotent at the caller: a second delete reports "not found" instead of
    /// silently succeeding.
    pub fn delete_document(&mut self, id: Uuid) -> Result<Vec<ChunkRecord>, StoreError> {
        if self.documents.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        let removed_ids: Vec<Uuid> = self
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == id)
            .map(|chunk| chunk.id)
            .collect();
        let mut removed = Vec::with_capacity(removed_ids.len());
        for chunk_id in removed_ids {
            if let Some(chunk) = self.chunks.remove(&chunk_id) {
                removed.push(chunk);
            }
        }
        removed.sort_by_key(|chunk| chunk.sequence_no);
        Ok(removed)
    }

    /// Record all chunks of a document atomically.
    ///
    /// The batch is validated in full before any insertion: either every chunk
    /// is recorded or none is, so a failure can never leave a partial document.
    pub fn put_chunks(&mut self, document_id: Uuid, chunks: Vec<ChunkRecord>) -> Result<(), StoreError> {
        if !self.documents.contains_key(&document_id) {
            return Err(StoreError::NotFound(document_id));
        }
        for chunk in &chunks {
            if chunk.document_id != document_id {
                return Err(StoreError::ForeignChunk {
                    chunk: chunk.id,
                    document: document_id,
                });
            }
            if self.chunks.contains_key(&chunk.id) {
                return Err(StoreError::DuplicateChunk(chunk.id));
            }
        }
        for chunk in chunks {
            self.chunks.insert(chunk.id, chunk);
        }
        Ok(())
    }

    /// Look up a chunk by id.
    pub fn get_chunk(&self, id: Uuid) -> Option<&ChunkRecord> {
        self.chunks.get(&id)
    }

    /// All chunks of a document, ordered by `sequence_no`.
    pub fn chunks_for_document(&self, document_id: Uuid) -> Vec<ChunkRecord> {
        let mut chunks: Vec<ChunkRecord> = self
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|chunk| chunk.sequence_no);
        chunks
    }

    /// Apply the slot remapping produced by [`VectorIndex::compact`].
    pub fn apply_slot_remap(&mut self, remap: &[(Uuid, usize)]) -> Result<(), IndexInconsistency> {
        let map: BTreeMap<Uuid, usize> = remap.iter().copied().collect();
        for chunk in self.chunks.values_mut() {
            let slot = map.get(&chunk.id).ok_or_else(|| {
                IndexInconsistency(format!("chunk {} missing from compaction remap", chunk.id))
            })?;
            chunk.slot = *slot;
        }
        Ok(())
    }

    /// Verify the global invariant against the vector index.
    ///
    /// Checks that live vector slots and recorded chunks form a bijection and
    /// that per-document chunk counts sum to the live totals. Flags mismatches
    /// instead of trusting stale state.
    pub fn verify(&self, index: &VectorIndex) -> Result<(), IndexInconsistency> {
        let live = index.live_len();
        if live != self.chunks.len() {
            return Err(IndexInconsistency(format!(
                "{live} live vectors but {} recorded chunks",
                self.chunks.len()
            )));
        }

        let counted: usize = self
            .documents
            .values()
            .filter(|document| document.status == DocumentStatus::Indexed)
            .map(|document| document.chunk_count)
            .sum();
        if counted != self.chunks.len() {
            return Err(IndexInconsistency(format!(
                "documents record {counted} chunks but {} are stored",
                self.chunks.len()
            )));
        }

        for (slot, chunk_id) in index.live_entries() {
            match self.chunks.get(&chunk_id) {
                None => {
                    return Err(IndexInconsistency(format!(
                        "vector slot {slot} references unknown chunk {chunk_id}"
                    )));
                }
                Some(chunk) if chunk.slot != slot => {
                    return Err(IndexInconsistency(format!(
                        "chunk {chunk_id} records slot {} but lives in slot {slot}",
                        chunk.slot
                    )));
                }
                Some(_) => {}
            }
        }

        for chunk in self.chunks.values() {
            match index.chunk_id_at(chunk.slot) {
                Some(id) if id == chunk.id => {}
                _ => {
                    return Err(IndexInconsistency(format!(
                        "chunk {} references slot {} which is dead or foreign",
                        chunk.id, chunk.slot
                    )));
                }
            }
            match self.documents.get(&chunk.document_id) {
                Some(document) if document.status == DocumentStatus::Indexed => {}
                Some(document) => {
                    return Err(IndexInconsistency(format!(
                        "chunk {} belongs to document {} with status {:?}",
                        chunk.id, document.id, document.status
                    )));
                }
                None => {
                    return Err(IndexInconsistency(format!(
                        "chunk {} belongs to unknown document {}",
                        chunk.id, chunk.document_id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Drop orphaned vectors and chunks so [`MetadataStore::verify`] passes again.
    ///
    /// Every document touched by an orphan (dead slot, missing counterpart, or
    /// a chunk count that disagrees with the stored chunks) is demoted to
    /// `Failed` with all its chunks removed and their vectors tombstoned, so
    /// repair never serves a partially recovered document. The caller should
    /// compact and flush afterwards.
    pub fn repair(&mut self, index: &mut VectorIndex) -> RepairSummary {
        let mut summary = RepairSummary::default();
        let mut unhealthy: std::collections::BTreeSet<Uuid> = std::collections::BTreeSet::new();

        for chunk in self.chunks.values() {
            let slot_ok = index.chunk_id_at(chunk.slot) == Some(chunk.id);
            let document_ok = matches!(
                self.documents.get(&chunk.document_id),
                Some(document) if document.status == DocumentStatus::Indexed
            );
            if !slot_ok || !document_ok {
                unhealthy.insert(chunk.document_id);
            }
        }

        for document in self.documents.values() {
            if document.status != DocumentStatus::Indexed {
                continue;
            }
            let actual = self
                .chunks
                .values()
                .filter(|chunk| chunk.document_id == document.id)
                .count();
            if actual != document.chunk_count {
                unhealthy.insert(document.id);
            }
        }

        let orphan_slots: Vec<usize> = index
            .live_entries()
            .filter(|(slot, chunk_id)| {
                !matches!(self.chunks.get(chunk_id), Some(chunk) if chunk.slot == *slot)
            })
            .map(|(slot, _)| slot)
            .collect();
        for slot in orphan_slots {
            if index.mark_deleted(slot).is_ok() {
                summary.dropped_vectors += 1;
            }
        }

        for document_id in unhealthy {
            let owned: Vec<ChunkRecord> = self
                .chunks
                .values()
                .filter(|chunk| chunk.document_id == document_id)
                .cloned()
                .collect();
            for chunk in owned {
                if index.chunk_id_at(chunk.slot) == Some(chunk.id)
                    && index.mark_deleted(chunk.slot).is_ok()
                {
                    summary.dropped_vectors += 1;
                }
                self.chunks.remove(&chunk.id);
                summary.dropped_chunks += 1;
            }
            if let Some(document) = self.documents.get_mut(&document_id) {
                document.status = DocumentStatus::Failed;
                document.chunk_count = 0;
                summary.demoted_documents += 1;
            }
        }

        summary
    }

    /// Persist the store to `path`, atomically replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            serde_json::to_writer(BufWriter::new(file), self)?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a store previously written by [`MetadataStore::save`].
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        let store: Self = serde_json::from_reader(BufReader::new(file))?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::current_timestamp_rfc3339;
    use crate::processing::chunking::ByteSpan;

    fn document(status: DocumentStatus, chunk_count: usize) -> Document {
        Document {
            id: Uuid::new_v4(),
            filename: "report.txt".into(),
            extension: "txt".into(),
            uploaded_at: current_timestamp_rfc3339(),
            chunk_count,
            status,
        }
    }

    fn chunk(document_id: Uuid, sequence_no: u32, slot: usize) -> ChunkRecord {
        ChunkRecord {
            id: Uuid::new_v4(),
            document_id,
            sequence_no,
            text: format!("chunk {sequence_no}"),
            span: ByteSpan { start: 0, end: 7 },
            slot,
        }
    }

    #[test]
    fn put_chunks_is_atomic_on_validation_failure() {
        let mut store = MetadataStore::new();
        let doc = document(DocumentStatus::Processing, 0);
        let doc_id = doc.id;
        store.put_document(doc);

        let good = chunk(doc_id, 0, 0);
        let foreign = chunk(Uuid::new_v4(), 1, 1);
        let error = store.put_chunks(doc_id, vec![good, foreign]).unwrap_err();
        assert!(matches!(error, StoreError::ForeignChunk { .. }));
        assert_eq!(store.chunk_count(), 0, "no partial batch recorded");
    }

    #[test]
    fn delete_document_reports_not_found_for_unknown_id() {
        let mut store = MetadataStore::new();
        let error = store.delete_document(Uuid::new_v4()).unwrap_err();
        assert!(matches!(error, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_document_removes_all_owned_chunks() {
        let mut store = MetadataStore::new();
        let doc = document(DocumentStatus::Indexed, 2);
        let doc_id = doc.id;
        store.put_document(doc);
        store
            .put_chunks(doc_id, vec![chunk(doc_id, 1, 1), chunk(doc_id, 0, 0)])
            .expect("chunks stored");

        let removed = store.delete_document(doc_id).expect("deleted");
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].sequence_no, 0);
        assert_eq!(removed[1].sequence_no, 1);
        assert_eq!(store.chunk_count(), 0);
        assert_eq!(store.document_count(), 0);
    }

    #[test]
    fn verify_accepts_a_consistent_pair() {
        let mut store = MetadataStore::new();
        let mut index = VectorIndex::new(2);
        let mut doc = document(DocumentStatus::Processing, 0);
        let doc_id = doc.id;
        store.put_document(doc.clone());

        let mut record = chunk(doc_id, 0, 0);
        record.slot = index.insert(vec![1.0, 0.0], record.id).expect("inserted");
        store.put_chunks(doc_id, vec![record]).expect("chunks stored");
        doc.status = DocumentStatus::Indexed;
        doc.chunk_count = 1;
        store.put_document(doc);

        store.verify(&index).expect("consistent");
    }

    #[test]
    fn verify_flags_orphaned_vectors() {
        let store = MetadataStore::new();
        let mut index = VectorIndex::new(2);
        index
            .insert(vec![1.0, 0.0], Uuid::new_v4())
            .expect("inserted");

        let error = store.verify(&index).unwrap_err();
        assert!(error.to_string().contains("live vectors"));
    }

    #[test]
    fn verify_flags_count_drift() {
        let mut store = MetadataStore::new();
        let mut index = VectorIndex::new(2);
        let mut doc = document(DocumentStatus::Processing, 0);
        let doc_id = doc.id;
        store.put_document(doc.clone());

        let mut record = chunk(doc_id, 0, 0);
        record.slot = index.insert(vec![1.0, 0.0], record.id).expect("inserted");
        store.put_chunks(doc_id, vec![record]).expect("chunks stored");
        doc.status = DocumentStatus::Indexed;
        doc.chunk_count = 5; // lies about its chunk count
        store.put_document(doc);

        let error = store.verify(&index).unwrap_err();
        assert!(error.to_string().contains("documents record"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metadata.json");

        let mut store = MetadataStore::new();
        let doc = document(DocumentStatus::Indexed, 1);
        let doc_id = doc.id;
        store.put_document(doc);
        store
            .put_chunks(doc_id, vec![chunk(doc_id, 0, 0)])
            .expect("chunks stored");
        store.save(&path).expect("saved");

        let loaded = MetadataStore::load(&path).expect("loaded");
        assert_eq!(loaded.document_count(), 1);
        assert_eq!(loaded.chunk_count(), 1);
        assert_eq!(loaded.chunks_for_document(doc_id).len(), 1);
    }

    #[test]
    fn repair_drops_orphans_and_demotes_their_documents() {
        let mut store = MetadataStore::new();
        let mut index = VectorIndex::new(2);

        // Healthy document with one chunk.
        let mut healthy = document(DocumentStatus::Processing, 0);
        let healthy_id = healthy.id;
        store.put_document(healthy.clone());
        let mut kept = chunk(healthy_id, 0, 0);
        kept.slot = index.insert(vec![1.0, 0.0], kept.id).expect("inserted");
        store.put_chunks(healthy_id, vec![kept]).expect("stored");
        healthy.status = DocumentStatus::Indexed;
        healthy.chunk_count = 1;
        store.put_document(healthy);

        // Orphaned vector left behind by a crashed transaction.
        index
            .insert(vec![0.0, 1.0], Uuid::new_v4())
            .expect("inserted");
        // Document whose chunk never made it into the index.
        let mut broken = document(DocumentStatus::Indexed, 1);
        broken.chunk_count = 1;
        let broken_id = broken.id;
        store.put_document(broken);
        store
            .put_chunks(broken_id, vec![chunk(broken_id, 0, 7)])
            .expect("stored");

        assert!(store.verify(&index).is_err());
        let summary = store.repair(&mut index);
        assert_eq!(summary.dropped_vectors, 1);
        assert_eq!(summary.dropped_chunks, 1);
        assert_eq!(summary.demoted_documents, 1);

        let remap = index.compact();
        store.apply_slot_remap(&remap).expect("remapped");
        store.verify(&index).expect("consistent after repair");
        assert_eq!(
            store.get_document(broken_id).expect("still listed").status,
            DocumentStatus::Failed
        );
        assert_eq!(store.chunks_for_document(healthy_id).len(), 1);
    }
}
