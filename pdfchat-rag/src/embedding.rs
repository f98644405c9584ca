//! The embedding seam between chunks and the vector index.

use async_trait::async_trait;

use crate::error::Result;

/// Turns chunk text and questions into vectors in one fixed vector space.
///
/// [`model_id`](EmbeddingProvider::model_id) and
/// [`dimensions`](EmbeddingProvider::dimensions) name that space. They are
/// written into every persisted index, and a query under a different pair
/// is rejected as a format mismatch.
///
/// ```rust,ignore
/// use pdfchat_rag::{EmbeddingProvider, HashingEmbedder};
///
/// let embedder = HashingEmbedder::new(384);
/// let vector = embedder.embed_query("What color is the sky?").await?;
/// assert_eq!(vector.len(), embedder.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one chunk of document text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a user question. Same as [`embed`](EmbeddingProvider::embed)
    /// unless the backend has a separate query mode.
    async fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        self.embed(question).await
    }

    /// Embed several chunks, returning one vector per input in input order.
    ///
    /// Falls back to one [`embed`](EmbeddingProvider::embed) call per text;
    /// remote backends override it with their batch endpoint.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Stable name of the vector space, e.g. `gemini:gemini-embedding-001`.
    fn model_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embeds text as `[char count, 1.0]`.
    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.chars().count() as f32, 1.0])
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_id(&self) -> &str {
            "length"
        }
    }

    #[tokio::test]
    async fn default_batch_keeps_input_order() {
        let vectors = LengthEmbedder.embed_batch(&["a", "abc", "ab"]).await.unwrap();
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 3.0, 2.0]);
    }

    #[tokio::test]
    async fn default_query_embedding_matches_document_embedding() {
        let query = LengthEmbedder.embed_query("sky").await.unwrap();
        assert_eq!(query, LengthEmbedder.embed("sky").await.unwrap());
    }
}
