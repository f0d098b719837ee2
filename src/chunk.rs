//! Paragraph-boundary text chunker.
//!
//! Splits document text into [`Passage`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! to keep each passage coherent; oversized paragraphs are hard-split on
//! whitespace. Consecutive passages share up to `overlap_tokens` of trailing
//! text so a retrieval hit keeps some surrounding context.
//!
//! Passage IDs are `{document_id}:{index}`, so re-chunking the same document
//! yields the same IDs and the same SHA-256 hashes.

use sha2::{Digest, Sha256};

use crate::models::Passage;

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token estimate used for chunking and conversation budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split text into passages on paragraph boundaries, respecting max_tokens.
/// Returns passages with contiguous indices starting at 0; empty input yields none.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Passage> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars);
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .filter(|pos| *pos > 0)
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    let mut passages = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let text = if i > 0 && overlap_chars > 0 {
            let tail = overlap_tail(&pieces[i - 1], overlap_chars);
            if tail.is_empty() {
                piece.clone()
            } else {
                format!("{} {}", tail, piece)
            }
        } else {
            piece.clone()
        };
        passages.push(make_passage(document_id, i as i64, &text));
    }

    passages
}

/// Last `max_chars` bytes of `text`, starting on a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let start = ceil_char_boundary(text, text.len() - max_chars);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => tail,
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    if index == 0 {
        // A single multi-byte char wider than the limit; take it whole.
        index = s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len());
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

fn make_passage(document_id: &str, index: i64, text: &str) -> Passage {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Passage {
        id: format!("{}:{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].id, "doc1:0");
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunk_text("doc1", "", 700, 0).is_empty());
        assert!(chunk_text("doc1", "\n\n  \n\n", 700, 0).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("doc1", text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 10, 2);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.id, format!("doc1:{}", i));
        }
    }

    #[test]
    fn test_overlap_carries_previous_tail() {
        // max_tokens=5 => 20 chars per piece; overlap 2 tokens => 8 chars
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = chunk_text("doc1", text, 5, 2);
        assert!(chunks.len() >= 2);
        let second = &chunks[1].text;
        assert!(
            second.starts_with("delta") || second.starts_with("gamma"),
            "expected overlap from first passage, got {:?}",
            second
        );
    }

    #[test]
    fn test_long_paragraph_hard_split_keeps_all_words() {
        let words: Vec<String> = (0..200).map(|i| format!("w{}", i)).collect();
        let text = words.join(" ");
        let chunks = chunk_text("doc1", &text, 10, 0);
        let rejoined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rejoined.split_whitespace().count(), 200);
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "é".repeat(500);
        let chunks = chunk_text("doc1", &text, 10, 3);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, 2, 0);
        let c2 = chunk_text("doc1", text, 2, 0);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
