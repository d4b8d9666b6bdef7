//! Paragraph-boundary text splitter used by the built-in plain-text parser.
//!
//! Splits document text into [`DocumentChunk`]s that respect a character
//! budget. Splitting occurs on paragraph boundaries (`\n\n`) so each chunk
//! keeps semantic coherence; oversized paragraphs are hard-split at the
//! nearest newline or space below the budget.
//!
//! Each chunk carries metadata with its knowledge base, document id,
//! ordinal index, and a SHA-256 hash of its text.

use sha2::{Digest, Sha256};

use crate::models::{ChunkMetadata, DocumentChunk};

/// Split text into chunks of at most `max_chars` characters.
/// Returns chunks with contiguous indices starting at 0. Empty input
/// produces no chunks.
pub fn split_text(kb_id: &str, document_id: &str, text: &str, max_chars: usize) -> Vec<DocumentChunk> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut index: i64 = 0;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current.is_empty() {
            trimmed.chars().count()
        } else {
            current.chars().count() + 2 + trimmed.chars().count()
        };

        if would_be > max_chars && !current.is_empty() {
            chunks.push(make_chunk(kb_id, document_id, index, &current));
            index += 1;
            current.clear();
        }

        if trimmed.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(make_chunk(kb_id, document_id, index, &current));
                index += 1;
                current.clear();
            }
            for piece in hard_split(trimmed, max_chars) {
                chunks.push(make_chunk(kb_id, document_id, index, piece.trim()));
                index += 1;
            }
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        chunks.push(make_chunk(kb_id, document_id, index, &current));
    }

    chunks
}

/// Hard-split an oversized paragraph at newline/space boundaries where
/// possible, at the character budget otherwise.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let budget_end = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let split_at = if budget_end < remaining.len() {
            remaining[..budget_end]
                .rfind('\n')
                .or_else(|| remaining[..budget_end].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(budget_end)
        } else {
            budget_end
        };
        pieces.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    pieces
}

fn make_chunk(kb_id: &str, document_id: &str, index: i64, text: &str) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        text: text.to_string(),
        metadata: ChunkMetadata {
            kb_id: kb_id.to_string(),
            document_id: document_id.to_string(),
            chunk_index: index,
            hash,
        },
    }
}
