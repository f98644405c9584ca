//! Query-time lookup against the persisted index.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::{IndexStamp, IndexStore, VectorIndex};

struct CachedIndex {
    stamp: IndexStamp,
    index: Arc<VectorIndex>,
}

/// Embeds questions and finds the most similar stored chunks.
///
/// The loaded index is cached in memory and reloaded whenever the file on
/// disk changes, so a retriever picks up a replaced index without being
/// rebuilt. Concurrent queries share one loaded snapshot.
pub struct Retriever {
    store: IndexStore,
    embedder: Arc<dyn EmbeddingProvider>,
    similarity_threshold: Option<f32>,
    cache: RwLock<Option<CachedIndex>>,
}

impl Retriever {
    /// Create a retriever reading from `store` and embedding with `embedder`.
    pub fn new(store: IndexStore, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder, similarity_threshold: None, cache: RwLock::new(None) }
    }

    /// Drop results scoring below `threshold`.
    pub fn with_similarity_threshold(mut self, threshold: Option<f32>) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// The store this retriever reads from.
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Forget the cached index; the next query reloads from disk.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// The current index, loading it if the persisted file changed.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexNotFound`] when nothing has been persisted
    /// - [`RagError::IndexFormatMismatch`] when the index was built with a
    ///   different embedding model or dimensionality
    pub async fn load_index(&self) -> Result<Arc<VectorIndex>> {
        let stamp = self.store.stamp().await?;
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.stamp == stamp {
                    return Ok(Arc::clone(&cached.index));
                }
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.stamp == stamp {
                return Ok(Arc::clone(&cached.index));
            }
        }

        let index = self.store.load().await?;
        index.check_compatible(self.embedder.model_id(), self.embedder.dimensions())?;
        info!(
            path = %self.store.path().display(),
            chunk_count = index.len(),
            model = %index.embedding_model(),
            "loaded index"
        );
        let index = Arc::new(index);
        *cache = Some(CachedIndex { stamp, index: Arc::clone(&index) });
        Ok(index)
    }

    /// Return up to `k` chunks most similar to `question`, best first.
    ///
    /// Returns fewer than `k` results when the index is smaller, or when a
    /// similarity threshold filters some out.
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] if `k` is zero
    /// - [`RagError::IndexNotFound`] / [`RagError::IndexFormatMismatch`] from
    ///   [`load_index`](Self::load_index)
    /// - [`RagError::EmbeddingError`] if the question cannot be embedded
    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(RagError::ConfigError("top_k must be at least 1".to_string()));
        }
        let index = self.load_index().await?;
        let query = self.embedder.embed_query(question).await?;
        let mut results = index.search(&query, k)?;
        if let Some(threshold) = self.similarity_threshold {
            results.retain(|r| r.score >= threshold);
        }
        debug!(top_k = k, result_count = results.len(), "retrieved chunks");
        Ok(results)
    }
}
