//! Persistent document index: vectors, metadata, and the manager tying them together.
//!
//! The module maintains one invariant across restarts: every live vector slot
//! maps to exactly one chunk record, every chunk record points at a live slot,
//! and per-document chunk counts agree with the records. [`IndexManager`]
//! checks it on load and after every mutation in debug builds.

mod manager;
mod store;
mod types;
mod vector;

pub use manager::{IndexError, IndexManager, IndexSettings, IngestError};
pub use store::{IndexInconsistency, MetadataStore, RepairSummary, StoreError};
pub use types::{ChunkRecord, Document, DocumentStatus, ScoredChunk};
pub use vector::{VectorIndex, VectorIndexError};
