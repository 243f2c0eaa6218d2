//! Ingestion and retrieval value types.

use serde::{Deserialize, Serialize};

/// Decimal places kept in a presented distance score.
const SCORE_PRECISION: i32 = 4;

/// A unit of ingested text.
///
/// Chunks are immutable once embedded: the store is append-only and never
/// rewrites a row after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Text that gets embedded and returned by searches.
    pub content: String,
    /// Identifier or path of the source document.
    pub filepath: String,
}

impl DocumentChunk {
    /// Creates a chunk from its content and source path.
    pub fn new(content: impl Into<String>, filepath: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            filepath: filepath.into(),
        }
    }
}

/// A ranked match returned by a nearest-neighbour search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Content of the matching chunk.
    pub content: String,
    /// Euclidean distance to the query; lower means more similar.
    pub similarity_score: f64,
}

impl SearchResult {
    /// Builds a result from a raw distance, rounding it for presentation.
    pub fn from_distance(content: impl Into<String>, distance: f64) -> Self {
        let scale = 10f64.powi(SCORE_PRECISION);
        Self {
            content: content.into(),
            similarity_score: (distance * scale).round() / scale,
        }
    }
}

/// Splits a document into chunks of at most `max_chars` characters.
///
/// Paragraphs (blank-line separated) are packed greedily into a chunk; a
/// paragraph longer than `max_chars` is cut on character boundaries.
/// Whitespace-only input yields no chunks.
pub fn split_into_chunks(text: &str, filepath: &str, max_chars: usize) -> Vec<DocumentChunk> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String| {
        if !current.trim().is_empty() {
            chunks.push(DocumentChunk::new(current.trim().to_string(), filepath));
        }
        current.clear();
    };

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let paragraph_len = paragraph.chars().count();

        if paragraph_len > max_chars {
            flush(&mut current);
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(max_chars) {
                let mut piece: String = piece.iter().collect();
                flush(&mut piece);
            }
            continue;
        }

        let current_len = current.chars().count();
        let separator = if current.is_empty() { 0 } else { 2 };
        if current_len + separator + paragraph_len > max_chars {
            flush(&mut current);
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    flush(&mut current);

    chunks
}
