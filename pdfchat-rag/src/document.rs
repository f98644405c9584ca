//! Data types for uploaded documents, chunks, search results, and answers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An uploaded document: a name and its raw bytes.
///
/// Documents are consumed once by extraction and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// File name as supplied by the uploader (e.g. `report.pdf`).
    pub name: String,
    /// The raw file contents.
    pub bytes: Vec<u8>,
}

impl Document {
    /// Create a document from a name and its bytes.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), bytes: bytes.into() }
    }

    /// Lower-cased file extension, if the name has one.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// A contiguous span of a document's extracted text used as a retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Content hash of the chunk text (first 16 hex digits of SHA-256).
    pub id: String,
    /// The chunk text.
    pub text: String,
    /// Name of the document the chunk came from.
    pub source: String,
    /// Position of the chunk within its document.
    pub index: usize,
    /// Character offset of the chunk within its document's text.
    pub start: usize,
}

impl Chunk {
    /// Create a chunk, deriving its id from the text.
    pub fn new(text: impl Into<String>, source: impl Into<String>, index: usize, start: usize) -> Self {
        let text = text.into();
        Self { id: content_id(&text), text, source: source.into(), index, start }
    }

    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Stable identifier for a piece of text.
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}").chars().take(16).collect()
}

/// A retrieved [`Chunk`] paired with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
}

/// A generated answer together with the chunks it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// The question as asked.
    pub question: String,
    /// Text returned by the completion service, unmodified.
    pub text: String,
    /// The chunks supplied as context, in retrieval order.
    pub sources: Vec<SearchResult>,
    /// Identifier of the model that produced the text.
    pub model: String,
}

impl Answer {
    /// Fraction of the answer's content words that also occur in its sources.
    ///
    /// This is a lexical heuristic only; it does not prove the answer is
    /// grounded. Returns `1.0` for answers with no content words.
    pub fn lexical_support(&self) -> f32 {
        let context: HashSet<String> =
            self.sources.iter().flat_map(|s| content_words(&s.chunk.text)).collect();
        let words = content_words(&self.text);
        if words.is_empty() {
            return 1.0;
        }
        let supported = words.iter().filter(|w| context.contains(*w)).count();
        supported as f32 / words.len() as f32
    }
}

/// Lower-cased alphanumeric words longer than three characters.
fn content_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_a_content_hash() {
        let a = Chunk::new("The sky is blue.", "a.pdf", 0, 0);
        let b = Chunk::new("The sky is blue.", "b.pdf", 3, 40);
        let c = Chunk::new("Grass is green.", "a.pdf", 1, 17);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 16);
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(Document::new("Report.PDF", b"".to_vec()).extension().as_deref(), Some("pdf"));
        assert_eq!(Document::new("notes", b"".to_vec()).extension(), None);
    }

    #[test]
    fn lexical_support_counts_context_words() {
        let answer = Answer {
            question: "What color is the sky?".into(),
            text: "The sky appears blue during daytime.".into(),
            sources: vec![SearchResult {
                chunk: Chunk::new("The sky is blue during the daytime.", "a.pdf", 0, 0),
                score: 0.9,
            }],
            model: "test".into(),
        };
        // Counted words: appears, blue, during, daytime. Only "appears" is unsupported.
        assert!((answer.lexical_support() - 0.75).abs() < 1e-6);
    }
}
