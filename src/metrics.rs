use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_indexed: AtomicU64,
    documents_failed: AtomicU64,
    documents_deleted: AtomicU64,
    chunks_indexed: AtomicU64,
    questions_answered: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully indexed document and the number of chunks produced for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record an ingestion that failed before any chunk was indexed.
    pub fn record_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document removal.
    pub fn record_deletion(&self) {
        self.documents_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered question.
    pub fn record_question(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            documents_deleted: self.documents_deleted.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents indexed since startup.
    pub documents_indexed: u64,
    /// Number of ingestions that failed since startup.
    pub documents_failed: u64,
    /// Number of documents deleted since startup.
    pub documents_deleted: u64,
    /// Total chunk count produced across all indexed documents.
    pub chunks_indexed: u64,
    /// Number of questions answered since startup.
    pub questions_answered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = ServiceMetrics::new();
        metrics.record_document(2);
        metrics.record_document(3);
        metrics.record_failure();
        metrics.record_deletion();
        metrics.record_question();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_indexed, 2);
        assert_eq!(snapshot.chunks_indexed, 5);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.documents_deleted, 1);
        assert_eq!(snapshot.questions_answered, 1);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        let metrics = ServiceMetrics::new();
        assert_eq!(metrics.snapshot().documents_indexed, 0);
        assert_eq!(metrics.snapshot().chunks_indexed, 0);
    }
}
