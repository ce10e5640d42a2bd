//! Flat similarity index with logical deletion.
//!
//! Vectors are normalized on insert and query, so the inner product used for
//! ranking is cosine similarity. Deletion is two-phase: [`VectorIndex::mark_deleted`]
//! tombstones a slot immediately (the entry is never returned from search but
//! still occupies memory), and [`VectorIndex::compact`] physically rebuilds the
//! slot table from live entries. The index persists to a single opaque binary
//! file written atomically via a temp file and rename.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the vector index.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    /// Vector length does not match the configured dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was created with.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// Vector contains NaN or infinite components.
    #[error("vector contains non-finite values")]
    NonFinite,
    /// Slot is outside the entry table.
    #[error("unknown vector slot {0}")]
    UnknownSlot(usize),
    /// Filesystem failure while saving or loading.
    #[error("index file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The index file could not be encoded or decoded.
    #[error("index file codec failed: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk_id: Uuid,
    vector: Vec<f32>,
    deleted: bool,
}

/// A live search hit: slot, owning chunk, and cosine score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotHit {
    /// Slot the vector occupies.
    pub slot: usize,
    /// Chunk the slot maps to.
    pub chunk_id: Uuid,
    /// Cosine similarity against the query.
    pub score: f32,
}

/// Flat cosine index over normalized vectors with tombstone deletion.
#[derive(Debug, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
    tombstones: usize,
}

impl VectorIndex {
    /// Create an empty index for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            tombstones: 0,
        }
    }

    /// Dimension the index was created with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Total slots including tombstones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no slots at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live (non-tombstoned) entries.
    pub fn live_len(&self) -> usize {
        self.entries.len() - self.tombstones
    }

    /// Number of tombstoned entries awaiting compaction.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    /// Iterate live `(slot, chunk_id)` pairs.
    pub fn live_entries(&self) -> impl Iterator<Item = (usize, Uuid)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.deleted)
            .map(|(slot, entry)| (slot, entry.chunk_id))
    }

    /// Chunk id stored at a live slot.
    pub fn chunk_id_at(&self, slot: usize) -> Option<Uuid> {
        self.entries
            .get(slot)
            .filter(|entry| !entry.deleted)
            .map(|entry| entry.chunk_id)
    }

    /// Insert a vector for a chunk, returning its slot.
    ///
    /// The vector is validated for dimension and finiteness, then normalized.
    pub fn insert(&mut self, vector: Vec<f32>, chunk_id: Uuid) -> Result<usize, VectorIndexError> {
        let normalized = self.prepare(vector)?;
        let slot = self.entries.len();
        self.entries.push(IndexEntry {
            chunk_id,
            vector: normalized,
            deleted: false,
        });
        Ok(slot)
    }

    /// Rank live entries against the query, best first.
    ///
    /// An empty index yields an empty result. `k` greater than the live entry
    /// count returns every live entry. Score ties break by ascending slot so
    /// results are stable.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SlotHit>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if query.iter().any(|value| !value.is_finite()) {
            return Err(VectorIndexError::NonFinite);
        }
        if k == 0 || self.live_len() == 0 {
            return Ok(Vec::new());
        }

        let query = normalize(query.to_vec());
        let mut hits: Vec<SlotHit> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.deleted)
            .map(|(slot, entry)| SlotHit {
                slot,
                chunk_id: entry.chunk_id,
                score: dot(&query, &entry.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.slot.cmp(&b.slot))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Tombstone a slot so it never appears in search results again.
    ///
    /// Marking an already-tombstoned slot is a no-op.
    pub fn mark_deleted(&mut self, slot: usize) -> Result<(), VectorIndexError> {
        let entry = self
            .entries
            .get_mut(slot)
            .ok_or(VectorIndexError::UnknownSlot(slot))?;
        if !entry.deleted {
            entry.deleted = true;
            self.tombstones += 1;
        }
        Ok(())
    }

    /// Physically rebuild the slot table from live entries.
    ///
    /// Returns the `chunk_id -> new slot` remapping callers must apply to
    /// their bookkeeping.
    pub fn compact(&mut self) -> Vec<(Uuid, usize)> {
        let reclaimed = self.tombstones;
        self.entries.retain(|entry| !entry.deleted);
        self.tombstones = 0;
        let remap: Vec<(Uuid, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(slot, entry)| (entry.chunk_id, slot))
            .collect();
        tracing::info!(
            reclaimed,
            live = self.entries.len(),
            "Compacted vector index"
        );
        remap
    }

    /// Persist the index to `path`, atomically replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<(), VectorIndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("bin.tmp");
        {
            let file = File::create(&tmp)?;
            bincode::serialize_into(BufWriter::new(file), self)?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load an index previously written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self, VectorIndexError> {
        let file = File::open(path)?;
        let index: Self = bincode::deserialize_from(BufReader::new(file))?;
        Ok(index)
    }

    fn prepare(&self, vector: Vec<f32>) -> Result<Vec<f32>, VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(VectorIndexError::NonFinite);
        }
        Ok(normalize(vector))
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
