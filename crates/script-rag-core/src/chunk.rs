//! Fixed-size sliding-window text chunker.
//!
//! Splits document text into overlapping windows measured in characters
//! (Unicode scalar values, never bytes), so offsets are stable regardless of
//! encoding and every slice lands on a UTF-8 boundary.
//!
//! # Algorithm
//!
//! 1. Reject `chunk_size == 0` and `overlap >= chunk_size`.
//! 2. `stride = chunk_size - overlap`.
//! 3. Windows start at `0, stride, 2 × stride, …` and end at
//!    `min(start + chunk_size, len)`.
//! 4. Stop after the first window that reaches the end of the text. The
//!    final window may be shorter than `chunk_size`; it is never padded.
//!
//! Consecutive windows therefore overlap by exactly `overlap` characters,
//! and identical inputs always produce identical boundaries.
//!
//! # Example
//!
//! ```rust
//! use script_rag_core::chunk::chunk_text;
//!
//! let spans = chunk_text("abcdefghij", 4, 1).unwrap();
//! let starts: Vec<usize> = spans.iter().map(|s| s.start).collect();
//! assert_eq!(starts, vec![0, 3, 6]);
//! assert_eq!(spans[2].text, "ghij");
//! ```

use crate::error::{RagError, RagResult};

/// One window of the source text, with character offsets `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Check a `(chunk_size, overlap)` pair without chunking anything.
pub fn validate_window(chunk_size: usize, overlap: usize) -> RagResult<()> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(RagError::InvalidChunkConfig {
            chunk_size,
            overlap,
        });
    }
    Ok(())
}

/// Split `text` into overlapping windows of `chunk_size` characters.
///
/// Returns an empty vector for empty text.
///
/// # Errors
///
/// [`RagError::InvalidChunkConfig`] when `overlap >= chunk_size`
/// (which includes `chunk_size == 0`).
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> RagResult<Vec<TextSpan>> {
    validate_window(chunk_size, overlap)?;

    // Byte offset of every char, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let stride = chunk_size - overlap;
    let mut spans = Vec::with_capacity(char_len.div_ceil(stride));
    let mut start = 0;

    while start < char_len {
        let end = (start + chunk_size).min(char_len);
        spans.push(TextSpan {
            start,
            end,
            text: text[boundaries[start]..boundaries[end]].to_string(),
        });
        if end == char_len {
            break;
        }
        start += stride;
    }

    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_thousand_chars_gives_thirteen_chunks() {
        let text = sample(1000);
        let spans = chunk_text(&text, 100, 20).unwrap();
        assert_eq!(spans.len(), 13);
        for (i, span) in spans.iter().enumerate() {
            assert_eq!(span.start, i * 80);
        }
        assert_eq!(spans.last().unwrap().end, 1000);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 20);
        }
    }

    #[test]
    fn test_spans_tile_the_text() {
        let text = sample(537);
        let (size, overlap) = (64, 16);
        let spans = chunk_text(&text, size, overlap).unwrap();

        let mut rebuilt = spans[0].text.clone();
        for pair in spans.windows(2) {
            assert_eq!(pair[1].start - pair[0].start, size - overlap);
            let fresh: String = pair[1].text.chars().skip(overlap).collect();
            rebuilt.push_str(&fresh);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let spans = chunk_text("INT. ROOFTOP - DUSK", 512, 50).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, 19);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunk_text("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        let err = chunk_text("abc", 10, 10).unwrap_err();
        assert!(matches!(
            err,
            RagError::InvalidChunkConfig {
                chunk_size: 10,
                overlap: 10
            }
        ));
        assert!(chunk_text("abc", 0, 0).is_err());
    }

    #[test]
    fn test_last_chunk_is_not_padded() {
        let spans = chunk_text("abcdefghijk", 4, 1).unwrap();
        let last = spans.last().unwrap();
        assert_eq!(last.text, "jk");
        assert_eq!(last.end - last.start, 2);
    }

    #[test]
    fn test_multibyte_offsets_are_chars() {
        let text = "桜の木の下で、ナルトは待っていた。";
        let spans = chunk_text(text, 5, 2).unwrap();
        assert_eq!(spans[0].text, "桜の木の下");
        assert_eq!(spans[1].start, 3);
        assert_eq!(spans[1].text, "の下で、ナ");
        assert_eq!(spans.last().unwrap().end, text.chars().count());
    }

    #[test]
    fn test_deterministic() {
        let text = sample(333);
        assert_eq!(
            chunk_text(&text, 50, 7).unwrap(),
            chunk_text(&text, 50, 7).unwrap()
        );
    }

    #[test]
    fn test_zero_overlap_is_partition() {
        let spans = chunk_text("abcdefgh", 3, 0).unwrap();
        let texts: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["abc", "def", "gh"]);
    }
}
