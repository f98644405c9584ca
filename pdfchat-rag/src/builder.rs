//! Index construction: embed every chunk and collect the pairs into a fresh index.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, error, info};

use crate::document::Chunk;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, ServiceErrorKind};
use crate::index::VectorIndex;

/// Embeds chunks and assembles them into a [`VectorIndex`].
///
/// Chunks are sent to the embedding provider in batches of `batch_size`, with
/// up to `concurrency` batches in flight. Results are reassembled in chunk
/// order, so the index holds chunks in the order they were produced.
///
/// # Example
///
/// ```rust,ignore
/// let builder = IndexBuilder::new(Arc::new(HashingEmbedder::default()));
/// let index = builder.build(chunks).await?;
/// store.persist(&index).await?;
/// ```
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    concurrency: usize,
}

impl IndexBuilder {
    /// Create a builder using `embedder` with a batch size of 32 and four
    /// concurrent requests.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder, batch_size: 32, concurrency: 4 }
    }

    /// Set the number of chunks per embedding request (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the number of embedding requests in flight (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// The embedding provider used for every chunk.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embed each chunk exactly once and return a fresh index.
    ///
    /// Nothing is persisted here; a failure anywhere discards all vectors
    /// computed so far.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyCorpus`] if `chunks` is empty
    /// - [`RagError::EmbeddingError`] if the provider fails, or returns the
    ///   wrong number of vectors or vectors of the wrong length
    pub async fn build(&self, chunks: Vec<Chunk>) -> Result<VectorIndex> {
        if chunks.is_empty() {
            return Err(RagError::EmptyCorpus("no chunks to index".to_string()));
        }

        let model = self.embedder.model_id().to_string();
        let dimensions = self.embedder.dimensions();
        // Batches are owned; the returned future must stay `Send`.
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.batch_size)
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();
        debug!(
            model = %model,
            chunk_count = chunks.len(),
            batch_size = self.batch_size,
            "embedding chunks"
        );

        let embedder = Arc::clone(&self.embedder);
        let embedded: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(move |batch| {
                let embedder = Arc::clone(&embedder);
                async move {
                    let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
                    embedder.embed_batch(&texts).await
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
            .map_err(|e| {
                error!(model = %model, error = %e, "embedding failed during index build");
                e
            })?;
        let vectors: Vec<Vec<f32>> = embedded.into_iter().flatten().collect();

        if vectors.len() != chunks.len() {
            return Err(RagError::embedding(
                model,
                format!("returned {} vectors for {} chunks", vectors.len(), chunks.len()),
                ServiceErrorKind::Permanent,
            ));
        }

        let mut index = VectorIndex::new(model.clone(), dimensions);
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            if vector.len() != dimensions {
                return Err(RagError::embedding(
                    model,
                    format!(
                        "returned a {}-dimensional vector, expected {dimensions}",
                        vector.len()
                    ),
                    ServiceErrorKind::Permanent,
                ));
            }
            index.insert(chunk, vector)?;
        }

        info!(model = %model, chunk_count = index.len(), dimensions, "built index");
        Ok(index)
    }
}
