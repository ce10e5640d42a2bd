//! Deterministic text chunking with provenance spans.
//!
//! The chunker walks the cleaned document text with a character budget,
//! preferring sentence and paragraph boundaries near the budget and falling
//! back to a hard cut when none lands inside the tolerance window. Consecutive
//! chunks share `overlap` trailing/leading bytes so that meaning spanning a cut
//! stays visible to retrieval. Chunking is pure: the same input and parameters
//! always produce the same sequence, which re-indexing and the test suite rely
//! on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while splitting text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunking was configured with a zero character budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for fresh content in every chunk.
    #[error("chunk overlap {overlap} must be smaller than chunk size {size}")]
    InvalidOverlap {
        /// Configured overlap.
        overlap: usize,
        /// Configured chunk size.
        size: usize,
    },
}

/// Byte range into the cleaned source text, used for citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSpan {
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

/// A contiguous fragment of document text together with its source span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Fragment text, exactly `text[span.start..span.end]` of the source.
    pub text: String,
    /// Source location of the fragment.
    pub span: ByteSpan,
}

/// Fraction of the chunk size used as the boundary search window.
const TOLERANCE_DIVISOR: usize = 4;

/// Split `text` into overlapping chunks of roughly `target_size` bytes.
///
/// Cuts always land on UTF-8 character boundaries. Whitespace-only input yields
/// zero chunks; any other input yields at least one. Each chunk after the first
/// starts `overlap` bytes before the previous chunk's end (adjusted to the
/// nearest character boundary), so concatenating spans covers every byte of the
/// source.
pub fn chunk(
    text: &str,
    target_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkPiece>, ChunkingError> {
    if target_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if overlap >= target_size {
        return Err(ChunkingError::InvalidOverlap {
            overlap,
            size: target_size,
        });
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let len = text.len();
    let tolerance = (target_size / TOLERANCE_DIVISOR).max(1);
    let mut pieces = Vec::new();
    let mut start = 0usize;

    loop {
        let ideal_end = start.saturating_add(target_size);
        let end = if ideal_end >= len {
            len
        } else {
            sentence_boundary_before(text, ideal_end, tolerance, start)
                .unwrap_or_else(|| floor_char_boundary(text, ideal_end))
        };
        let end = if end <= start {
            next_char_boundary(text, start + 1)
        } else {
            end
        };

        pieces.push(ChunkPiece {
            text: text[start..end].to_string(),
            span: ByteSpan { start, end },
        });

        if end >= len {
            break;
        }

        let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
        if next <= start {
            // Overlap would repeat the whole previous chunk; step forward instead.
            next = end;
        }
        start = next;
    }

    Ok(pieces)
}

/// Find the rightmost sentence or paragraph boundary in `(limit - tolerance, limit]`.
///
/// A cut position qualifies when the character before it ends a sentence
/// (`.`, `!`, `?`, or a newline) and the character after it is whitespace or
/// the end of input. Positions at or before `start` never qualify.
fn sentence_boundary_before(
    text: &str,
    limit: usize,
    tolerance: usize,
    start: usize,
) -> Option<usize> {
    let floor = limit.saturating_sub(tolerance).max(start + 1);
    let mut candidate = floor_char_boundary(text, limit);
    while candidate > floor {
        if is_sentence_boundary(text, candidate) {
            return Some(candidate);
        }
        candidate = prev_char_boundary(text, candidate);
    }
    None
}

fn is_sentence_boundary(text: &str, position: usize) -> bool {
    let Some(before) = text[..position].chars().next_back() else {
        return false;
    };
    if !matches!(before, '.' | '!' | '?' | '\n') {
        return false;
    }
    match text[position..].chars().next() {
        None => true,
        Some(after) => after.is_whitespace(),
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn next_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

fn prev_char_boundary(text: &str, index: usize) -> usize {
    debug_assert!(index > 0);
    let mut index = index - 1;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_input_yield_zero_chunks() {
        assert!(chunk("", 100, 10).expect("valid params").is_empty());
        assert!(chunk("   \n\t  ", 100, 10).expect("valid params").is_empty());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(matches!(
            chunk("hello", 0, 0).unwrap_err(),
            ChunkingError::InvalidChunkSize
        ));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        assert!(matches!(
            chunk("hello", 10, 10).unwrap_err(),
            ChunkingError::InvalidOverlap { overlap: 10, size: 10 }
        ));
    }

    #[test]
    fn short_input_yields_single_chunk() {
        let pieces = chunk("just one sentence.", 1000, 100).expect("chunked");
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].span, ByteSpan { start: 0, end: 18 });
        assert_eq!(pieces[0].text, "just one sentence.");
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "First sentence. Second sentence. Third sentence. ".repeat(40);
        let first = chunk(&text, 300, 50).expect("chunked");
        let second = chunk(&text, 300, 50).expect("chunked");
        assert_eq!(first, second);
    }

    #[test]
    fn spans_cover_every_byte_of_the_source() {
        let text = "Alpha beta gamma. Delta epsilon zeta. ".repeat(60);
        let pieces = chunk(&text, 250, 40).expect("chunked");
        assert_eq!(pieces[0].span.start, 0);
        assert_eq!(pieces.last().expect("non-empty").span.end, text.len());
        for window in pieces.windows(2) {
            assert!(
                window[1].span.start <= window[0].span.end,
                "gap between {:?} and {:?}",
                window[0].span,
                window[1].span
            );
        }
    }

    #[test]
    fn chunk_text_matches_span_slice() {
        let text = "One sentence here. Another one there. And a third. ".repeat(30);
        for piece in chunk(&text, 200, 30).expect("chunked") {
            assert_eq!(piece.text, &text[piece.span.start..piece.span.end]);
        }
    }

    #[test]
    fn prefers_sentence_boundaries_near_the_budget() {
        let text = format!("{} Tail words follow here.", "word ".repeat(30).trim_end().to_owned() + ".");
        // Budget lands mid-tail; the cut should snap back to the period.
        let pieces = chunk(&text, 160, 0).expect("chunked");
        assert!(pieces[0].text.ends_with('.'), "chunk was {:?}", pieces[0].text);
    }

    #[test]
    fn hard_cuts_apply_when_no_boundary_is_near() {
        let text = "x".repeat(500);
        let pieces = chunk(&text, 200, 0).expect("chunked");
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].span, ByteSpan { start: 0, end: 200 });
        assert_eq!(pieces[1].span, ByteSpan { start: 200, end: 400 });
        assert_eq!(pieces[2].span, ByteSpan { start: 400, end: 500 });
    }

    #[test]
    fn cuts_never_split_multibyte_characters() {
        let text = "é".repeat(300);
        let pieces = chunk(&text, 101, 10).expect("chunked");
        for piece in &pieces {
            assert!(text.is_char_boundary(piece.span.start));
            assert!(text.is_char_boundary(piece.span.end));
        }
    }

    #[test]
    fn three_thousand_chars_with_overlap_yield_three_to_four_chunks() {
        let text = "a".repeat(3000);
        let pieces = chunk(&text, 1000, 100).expect("chunked");
        assert!(
            (3..=4).contains(&pieces.len()),
            "expected 3-4 chunks, got {}",
            pieces.len()
        );
        for window in pieces.windows(2) {
            let shared = window[0].span.end.saturating_sub(window[1].span.start);
            assert!(shared >= 100, "overlap was {shared}");
        }
    }
}
