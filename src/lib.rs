#![deny(missing_docs)]

//! Core library for the document question-answering service.

/// Answer composition over retrieved passages.
pub mod answer;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and HTTP adapter.
pub mod embedding;
/// Text extraction registry and format extractors.
pub mod extract;
/// Language-model client abstraction and HTTP adapter.
pub mod generation;
/// Persistent vector index and document metadata store.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and question metrics helpers.
pub mod metrics;
/// Document processing pipeline utilities.
pub mod processing;
/// Query-side retrieval over the index.
pub mod retrieval;
