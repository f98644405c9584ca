//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`]: breaks at paragraph, line, then word boundaries,
//!   cutting hard at the character level only when a single word is too long
//! - [`FixedSizeChunker`]: hard character windows with a fixed overlap
//!
//! Sizes are counted in characters (Unicode scalar values), never bytes, so
//! multi-byte text is never cut inside a code point.

use std::collections::VecDeque;

use crate::config::{ChunkingStrategy, validate_chunking};
use crate::document::Chunk;
use crate::error::Result;

/// A strategy for splitting extracted document text into chunks.
pub trait Chunker: Send + Sync {
    /// Split `text` taken from the document named `source`.
    ///
    /// Returns an empty `Vec` for empty or whitespace-only text. Chunks are
    /// numbered from zero in document order.
    fn chunk(&self, source: &str, text: &str) -> Vec<Chunk>;
}

/// Split `text` with the default [`RecursiveChunker`] strategy.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`](crate::RagError::ConfigError) unless
/// `chunk_size > chunk_overlap`.
pub fn split(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<Chunk>> {
    Ok(RecursiveChunker::new(chunk_size, chunk_overlap)?.chunk("", text))
}

/// Build the chunker selected by `strategy`.
pub fn chunker_for(
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Box<dyn Chunker>> {
    Ok(match strategy {
        ChunkingStrategy::Recursive => Box::new(RecursiveChunker::new(chunk_size, chunk_overlap)?),
        ChunkingStrategy::Fixed => Box::new(FixedSizeChunker::new(chunk_size, chunk_overlap)?),
    })
}

/// Splits text into fixed-size character windows with a fixed overlap.
///
/// Consecutive windows share exactly `chunk_overlap` characters. The last
/// window may be shorter and is the first one that reaches the end of the
/// text.
///
/// # Example
///
/// ```rust,ignore
/// use pdfchat_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(20, 5)?;
/// let chunks = chunker.chunk("notes.pdf", "The sky is blue. Grass is green.");
/// assert_eq!(chunks[0].text, "The sky is blue. Gra");
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`](crate::RagError::ConfigError) unless
    /// `chunk_size > chunk_overlap`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, source: &str, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every character plus the end of the text.
        let offsets: Vec<usize> =
            text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let char_count = offsets.len() - 1;
        let step = self.chunk_size - self.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(char_count);
            let window = &text[offsets[start]..offsets[end]];
            if !window.trim().is_empty() {
                chunks.push(Chunk::new(window, source, chunks.len(), start));
            }
            if end == char_count {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// Splits text hierarchically: paragraphs → lines → words → characters.
///
/// The text is cut at the first separator (`"\n\n"`, `"\n"`, `" "`) it
/// contains, with each separator kept on the preceding piece. Pieces longer
/// than `chunk_size` are cut again with the next separator, down to single
/// characters. Pieces are then merged greedily into chunks of at most
/// `chunk_size` characters; when a chunk is emitted, its trailing pieces
/// totalling at most `chunk_overlap` characters are carried into the next one.
///
/// Chunks are trimmed of surrounding whitespace and whitespace-only chunks are
/// dropped, so the overlap between neighbours is at most `chunk_overlap`.
///
/// # Example
///
/// ```rust,ignore
/// use pdfchat_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 200)?;
/// let chunks = chunker.chunk("report.pdf", &text);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    const SEPARATORS: [&'static str; 3] = ["\n\n", "\n", " "];

    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: maximum number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`](crate::RagError::ConfigError) unless
    /// `chunk_size > chunk_overlap`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

/// A contiguous span of the source text.
#[derive(Debug, Clone, Copy)]
struct Piece {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_len: usize,
}

/// Cut `text[byte_start..byte_end]` into pieces no longer than `chunk_size`,
/// appending them to `out` in text order.
fn collect_pieces(
    text: &str,
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    separators: &[&str],
    chunk_size: usize,
    out: &mut Vec<Piece>,
) {
    let span = &text[byte_start..byte_end];
    let char_len = span.chars().count();
    if char_len <= chunk_size {
        out.push(Piece { byte_start, byte_end, char_start, char_len });
        return;
    }

    let Some(level) = separators.iter().position(|sep| span.contains(sep)) else {
        // No natural boundary left: one piece per character.
        for (offset, (i, c)) in span.char_indices().enumerate() {
            let start = byte_start + i;
            out.push(Piece {
                byte_start: start,
                byte_end: start + c.len_utf8(),
                char_start: char_start + offset,
                char_len: 1,
            });
        }
        return;
    };

    let separator = separators[level];
    let finer = &separators[level + 1..];
    let mut seg_start = 0;
    let mut seg_char_start = char_start;
    for segment in split_keeping_separator(span, separator) {
        let seg_end = seg_start + segment.len();
        collect_pieces(
            text,
            byte_start + seg_start,
            byte_start + seg_end,
            seg_char_start,
            finer,
            chunk_size,
            out,
        );
        seg_char_start += segment.chars().count();
        seg_start = seg_end;
    }
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

impl RecursiveChunker {
    /// Turn the pieces in `window` into a trimmed chunk, if any text remains.
    fn emit(&self, source: &str, text: &str, window: &VecDeque<Piece>, chunks: &mut Vec<Chunk>) {
        let (Some(first), Some(last)) = (window.front(), window.back()) else {
            return;
        };
        let raw = &text[first.byte_start..last.byte_end];
        let trimmed_start = raw.trim_start();
        let trimmed = trimmed_start.trim_end();
        if trimmed.is_empty() {
            return;
        }
        let leading = raw[..raw.len() - trimmed_start.len()].chars().count();
        chunks.push(Chunk::new(trimmed, source, chunks.len(), first.char_start + leading));
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, source: &str, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        collect_pieces(text, 0, text.len(), 0, &Self::SEPARATORS, self.chunk_size, &mut pieces);

        let mut chunks = Vec::new();
        let mut window: VecDeque<Piece> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            if total + piece.char_len > self.chunk_size && !window.is_empty() {
                self.emit(source, text, &window, &mut chunks);
                // Keep at most `chunk_overlap` trailing characters, and only as
                // many as still leave room for the incoming piece.
                while total > self.chunk_overlap
                    || (total > 0 && total + piece.char_len > self.chunk_size)
                {
                    let Some(dropped) = window.pop_front() else {
                        break;
                    };
                    total -= dropped.char_len;
                }
            }
            window.push_back(piece);
            total += piece.char_len;
        }
        self.emit(source, text, &window, &mut chunks);

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;

    const SKY: &str = "The sky is blue. Grass is green.";

    fn substring(text: &str, start: usize, len: usize) -> String {
        text.chars().skip(start).take(len).collect()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split("", 20, 5).unwrap().is_empty());
        assert!(split("   \n\n  ", 20, 5).unwrap().is_empty());
        assert!(FixedSizeChunker::new(20, 5).unwrap().chunk("a", "").is_empty());
    }

    #[test]
    fn invalid_parameters_are_config_errors() {
        assert!(matches!(split(SKY, 5, 5), Err(RagError::ConfigError(_))));
        assert!(matches!(split(SKY, 0, 0), Err(RagError::ConfigError(_))));
        assert!(matches!(FixedSizeChunker::new(4, 9), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split("Hello world", 100, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello world");
        assert_eq!(chunks[0].start, 0);
    }

    #[test]
    fn recursive_breaks_at_word_boundaries() {
        let chunks = split(SKY, 20, 5).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["The sky is blue.", "Grass is green."]);
        assert_eq!(chunks[1].start, 17);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn recursive_prefers_paragraphs() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = split(text, 30, 0).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph here.");
        assert_eq!(chunks[1].text, "Second paragraph here.");
    }

    #[test]
    fn recursive_carries_overlap() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = split(text, 20, 10).unwrap();
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let prev_end = pair[0].start + pair[0].char_len();
            assert!(pair[1].start < prev_end, "{:?} and {:?} do not overlap", pair[0], pair[1]);
            assert!(prev_end - pair[1].start <= 10);
        }
    }

    #[test]
    fn recursive_cuts_long_words_hard() {
        let text = "a".repeat(25);
        let chunks = split(&text, 10, 2).unwrap();
        assert!(chunks.iter().all(|c| c.char_len() <= 10));
        assert_eq!(chunks[0].char_len(), 10);
        assert_eq!(chunks[1].start, 8);
    }

    #[test]
    fn fixed_windows_overlap_exactly() {
        let chunks = FixedSizeChunker::new(20, 5).unwrap().chunk("sky.pdf", SKY);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["The sky is blue. Gra", ". Grass is green."]);
        assert_eq!(chunks[1].start, 15);
        assert!(chunks.iter().all(|c| c.source == "sky.pdf"));
    }

    #[test]
    fn chunks_are_substrings_at_their_offsets() {
        let text = "Ünïcödé wörds çan bé lông.\nSecond line with more words.\n\nA new paragraph.";
        for chunks in [
            split(text, 12, 4).unwrap(),
            FixedSizeChunker::new(12, 4).unwrap().chunk("u", text),
        ] {
            for chunk in &chunks {
                assert!(chunk.char_len() <= 12);
                assert_eq!(chunk.text, substring(text, chunk.start, chunk.char_len()));
            }
        }
    }

    #[test]
    fn chunker_for_selects_strategy() {
        let fixed = chunker_for(ChunkingStrategy::Fixed, 20, 5).unwrap();
        assert_eq!(fixed.chunk("s", SKY).len(), 2);
        assert!(chunker_for(ChunkingStrategy::Recursive, 5, 6).is_err());
    }
}
