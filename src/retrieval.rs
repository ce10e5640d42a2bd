//! Query-side retrieval: embed, oversample, cap, and merge neighboring chunks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::index::{IndexError, IndexManager, ScoredChunk};
use crate::processing::chunking::ByteSpan;

/// Errors raised while answering a retrieval request.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// The query could not be embedded.
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    /// The index could not be searched.
    #[error("failed to search index: {0}")]
    Index(#[from] IndexError),
}

/// One ranked passage handed to answer composition.
///
/// May cover several consecutive chunks of the same document; `sequence_no`
/// is the first chunk of the run and `span` the merged extent.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Document the passage belongs to.
    pub document_id: Uuid,
    /// Stored filename, for citations.
    pub filename: String,
    /// Sequence number of the first chunk in the passage.
    pub sequence_no: u32,
    /// Passage text with inter-chunk overlap removed.
    pub text: String,
    /// Byte extent of the passage within the extracted text.
    pub span: ByteSpan,
    /// Best similarity score among the merged chunks.
    pub score: f32,
}

/// Embeds questions and turns raw index hits into ranked passages.
///
/// Searches `k * oversample_factor` candidates so that per-document capping
/// and merging still leave `k` results to return. Output is deterministic for
/// an unchanged index: ties are broken by document id, then sequence number.
pub struct RetrievalEngine {
    index: Arc<IndexManager>,
    embedder: Arc<dyn EmbeddingClient>,
    oversample_factor: usize,
}

impl RetrievalEngine {
    /// Build an engine over an opened index.
    pub fn new(
        index: Arc<IndexManager>,
        embedder: Arc<dyn EmbeddingClient>,
        oversample_factor: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            oversample_factor: oversample_factor.max(1),
        }
    }

    /// Retrieve the best `k` passages for a question.
    pub async fn retrieve(
        &self,
        query_text: &str,
        k: usize,
        per_document_cap: Option<usize>,
    ) -> Result<Vec<RetrievedChunk>, RetrieveError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(query_text).await?;
        let candidates = self
            .index
            .search(&query, k.saturating_mul(self.oversample_factor))
            .await?;
        tracing::debug!(
            candidates = candidates.len(),
            k,
            "Retrieved candidate chunks"
        );

        let capped = apply_document_cap(candidates, per_document_cap);
        let mut passages = merge_contiguous(capped);
        passages.sort_by(rank_order);
        passages.truncate(k);
        Ok(passages)
    }
}

/// Keep at most `cap` hits per document, preferring the better-scored ones.
///
/// Input is already sorted by descending score, so a first-come counter
/// keeps exactly the best hits.
fn apply_document_cap(hits: Vec<ScoredChunk>, cap: Option<usize>) -> Vec<ScoredChunk> {
    let Some(cap) = cap else {
        return hits;
    };
    let mut kept_per_document: HashMap<Uuid, usize> = HashMap::new();
    hits.into_iter()
        .filter(|hit| {
            let kept = kept_per_document.entry(hit.chunk.document_id).or_insert(0);
            if *kept < cap {
                *kept += 1;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Merge hits from the same document with consecutive sequence numbers.
///
/// Consecutive chunks share overlap text; the merged passage drops the
/// duplicated prefix using the chunks' character spans and keeps the best
/// score of the run.
fn merge_contiguous(hits: Vec<ScoredChunk>) -> Vec<RetrievedChunk> {
    let mut by_document: HashMap<Uuid, Vec<ScoredChunk>> = HashMap::new();
    for hit in hits {
        by_document.entry(hit.chunk.document_id).or_default().push(hit);
    }

    let mut passages = Vec::new();
    for (_, mut group) in by_document {
        group.sort_by_key(|hit| hit.chunk.sequence_no);
        let mut run: Option<RetrievedChunk> = None;
        let mut last_sequence_no = 0_u32;
        for hit in group {
            match run.as_mut() {
                Some(current) if hit.chunk.sequence_no == last_sequence_no + 1 => {
                    let overlap = current.span.end.saturating_sub(hit.chunk.span.start);
                    if overlap < hit.chunk.text.len() {
                        current.text.push_str(&hit.chunk.text[overlap..]);
                    }
                    current.span.end = current.span.end.max(hit.chunk.span.end);
                    if hit.score > current.score {
                        current.score = hit.score;
                    }
                    last_sequence_no = hit.chunk.sequence_no;
                }
                _ => {
                    if let Some(finished) = run.take() {
                        passages.push(finished);
                    }
                    last_sequence_no = hit.chunk.sequence_no;
                    run = Some(RetrievedChunk {
                        document_id: hit.chunk.document_id,
                        filename: hit.filename,
                        sequence_no: hit.chunk.sequence_no,
                        text: hit.chunk.text,
                        span: hit.chunk.span,
                        score: hit.score,
                    });
                }
            }
        }
        if let Some(finished) = run {
            passages.push(finished);
        }
    }
    passages
}

fn rank_order(a: &RetrievedChunk, b: &RetrievedChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.sequence_no.cmp(&b.sequence_no))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkRecord;

    fn hit(document_id: Uuid, sequence_no: u32, text: &str, span: ByteSpan, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: ChunkRecord {
                id: Uuid::new_v4(),
                document_id,
                sequence_no,
                text: text.to_string(),
                span,
                slot: sequence_no as usize,
            },
            filename: "doc.txt".to_string(),
            score,
        }
    }

    fn span(start: usize, end: usize) -> ByteSpan {
        ByteSpan { start, end }
    }

    #[test]
    fn document_cap_keeps_the_best_hits() {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let hits = vec![
            hit(doc_a, 0, "a0", span(0, 2), 0.9),
            hit(doc_a, 5, "a5", span(10, 12), 0.8),
            hit(doc_b, 0, "b0", span(0, 2), 0.7),
            hit(doc_a, 9, "a9", span(20, 22), 0.6),
        ];

        let capped = apply_document_cap(hits, Some(2));
        assert_eq!(capped.len(), 3);
        assert!(capped.iter().all(|h| h.chunk.sequence_no != 9));
    }

    #[test]
    fn contiguous_chunks_merge_without_duplicated_overlap() {
        let doc = Uuid::new_v4();
        // Chunks over "one two three four" with a shared " three" overlap.
        let hits = vec![
            hit(doc, 0, "one two three", span(0, 13), 0.5),
            hit(doc, 1, "three four", span(8, 18), 0.9),
        ];

        let merged = merge_contiguous(hits);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "one two three four");
        assert_eq!(merged[0].sequence_no, 0);
        assert_eq!(merged[0].span, span(0, 18));
        assert!((merged[0].score - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn non_adjacent_chunks_stay_separate() {
        let doc = Uuid::new_v4();
        let hits = vec![
            hit(doc, 0, "first", span(0, 5), 0.5),
            hit(doc, 2, "third", span(12, 17), 0.4),
        ];

        let merged = merge_contiguous(hits);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn ranking_is_deterministic_under_score_ties() {
        let doc_a = Uuid::from_u128(1);
        let doc_b = Uuid::from_u128(2);
        let mut passages = merge_contiguous(vec![
            hit(doc_b, 0, "b", span(0, 1), 0.5),
            hit(doc_a, 3, "a3", span(30, 32), 0.5),
            hit(doc_a, 0, "a0", span(0, 2), 0.5),
        ]);
        passages.sort_by(rank_order);

        assert_eq!(passages[0].document_id, doc_a);
        assert_eq!(passages[0].sequence_no, 0);
        assert_eq!(passages[1].document_id, doc_a);
        assert_eq!(passages[1].sequence_no, 3);
        assert_eq!(passages[2].document_id, doc_b);
    }
}
