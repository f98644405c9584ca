//! Exact cosine-similarity index and its on-disk store.
//!
//! [`VectorIndex`] keeps `(Chunk, vector)` entries in insertion order and
//! answers top-k queries by scoring every entry, so results are exact and
//! ties resolve to the earlier insertion. [`IndexStore`] persists one index
//! per directory as JSON, replacing the previous file atomically.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};

/// Version of the on-disk layout written by [`IndexStore::persist`].
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// File name of the persisted index inside the index directory.
pub const INDEX_FILE_NAME: &str = "index.json";

/// A stored chunk and its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The chunk.
    pub chunk: Chunk,
    /// Its embedding vector.
    pub vector: Vec<f32>,
}

/// An in-memory similarity index over chunk embeddings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    format_version: u32,
    embedding_model: String,
    dimensions: usize,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex {
    /// Create an empty index for vectors from `embedding_model` of length `dimensions`.
    pub fn new(embedding_model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: embedding_model.into(),
            dimensions,
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Append a chunk and its vector.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexFormatMismatch`] if the vector length differs
    /// from the index dimensionality.
    pub fn insert(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(RagError::IndexFormatMismatch(format!(
                "vector for chunk '{}' has {} dimensions, index expects {}",
                chunk.id,
                vector.len(),
                self.dimensions
            )));
        }
        self.entries.push(IndexEntry { chunk, vector });
        Ok(())
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored entries in insertion order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Identifier of the embedding model the vectors came from.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Length of every stored vector.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// When the index was built.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Return the `top_k` entries most similar to `query`, best first.
    ///
    /// Returns every entry when `top_k` exceeds the index size. Equal scores
    /// keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexFormatMismatch`] if `query` has the wrong length.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimensions {
            return Err(RagError::IndexFormatMismatch(format!(
                "query vector has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(&entry.vector, query)))
            .collect();

        // `sort_by` is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { chunk: self.entries[i].chunk.clone(), score })
            .collect())
    }

    /// Fail unless this index was built by `embedding_model` with `dimensions`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexFormatMismatch`] naming both identities.
    pub fn check_compatible(&self, embedding_model: &str, dimensions: usize) -> Result<()> {
        if self.embedding_model != embedding_model || self.dimensions != dimensions {
            return Err(RagError::IndexFormatMismatch(format!(
                "index was built with '{}' ({} dimensions) but the active embedder is '{}' ({} dimensions)",
                self.embedding_model, self.dimensions, embedding_model, dimensions
            )));
        }
        Ok(())
    }

    /// Check internal consistency of a decoded index.
    fn validate(&self) -> Result<()> {
        if self.format_version != INDEX_FORMAT_VERSION {
            return Err(RagError::IndexFormatMismatch(format!(
                "unsupported index format version {} (expected {INDEX_FORMAT_VERSION})",
                self.format_version
            )));
        }
        if let Some(entry) = self.entries.iter().find(|e| e.vector.len() != self.dimensions) {
            return Err(RagError::IndexFormatMismatch(format!(
                "stored vector for chunk '{}' has {} dimensions, header says {}",
                entry.chunk.id,
                entry.vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

/// Identity of the persisted file at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// The single persisted index of a deployment, stored under one directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    /// Create a store rooted at `dir`. Nothing is touched on disk until
    /// [`persist`](Self::persist).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The index directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the persisted index file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE_NAME)
    }

    /// Whether an index has been persisted.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(self.path()).await.unwrap_or(false)
    }

    /// Modification time and size of the persisted file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexNotFound`] when nothing has been persisted.
    pub async fn stamp(&self) -> Result<IndexStamp> {
        let path = self.path();
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(IndexStamp { modified: meta.modified().ok(), len: meta.len() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RagError::IndexNotFound { path }),
            Err(e) => Err(RagError::StorageError { path, message: e.to_string() }),
        }
    }

    /// Write `index` to disk, atomically replacing any previous index.
    ///
    /// The index is written to a temporary file in the same directory, synced,
    /// and renamed over the old file. If this future is dropped before the
    /// rename, the previous index stays in place.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::StorageError`] if the directory or file cannot be written.
    pub async fn persist(&self, index: &VectorIndex) -> Result<()> {
        let path = self.path();
        let bytes = serde_json::to_vec(index).map_err(|e| RagError::StorageError {
            path: path.clone(),
            message: format!("failed to encode index: {e}"),
        })?;
        let size = bytes.len();

        let dir = self.dir.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(|e| RagError::PipelineError(format!("index writer task failed: {e}")))?
            .map_err(|e| {
                error!(path = %path.display(), error = %e, "failed to persist index");
                RagError::StorageError { path: path.clone(), message: e.to_string() }
            })?;

        info!(path = %path.display(), bytes = size, chunk_count = index.len(), "persisted index");
        Ok(())
    }

    /// Read the persisted index.
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexNotFound`] when nothing has been persisted
    /// - [`RagError::IndexFormatMismatch`] when the file cannot be decoded or
    ///   is internally inconsistent
    /// - [`RagError::StorageError`] for other I/O failures
    pub async fn load(&self) -> Result<VectorIndex> {
        let path = self.path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::IndexNotFound { path });
            }
            Err(e) => return Err(RagError::StorageError { path, message: e.to_string() }),
        };

        let index: VectorIndex = serde_json::from_slice(&bytes).map_err(|e| {
            RagError::IndexFormatMismatch(format!("cannot decode {}: {e}", path.display()))
        })?;
        index.validate()?;

        debug!(path = %path.display(), chunk_count = index.len(), model = %index.embedding_model, "loaded index");
        Ok(index)
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, index: usize) -> Chunk {
        Chunk::new(text, "doc.pdf", index, 0)
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new("test:3", 3);
        index.insert(chunk("x axis", 0), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(chunk("y axis", 1), vec![0.0, 1.0, 0.0]).unwrap();
        index.insert(chunk("xy diagonal", 2), vec![1.0, 1.0, 0.0]).unwrap();
        index
    }

    #[test]
    fn cosine_of_orthogonal_and_zero_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_orders_by_similarity() {
        let results = sample_index().search(&[1.0, 0.1, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.text, "x axis");
        assert_eq!(results[1].chunk.text, "xy diagonal");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn search_with_large_k_returns_everything_once() {
        let results = sample_index().search(&[0.0, 0.0, 1.0], 10).unwrap();
        assert_eq!(results.len(), 3);
        // All scores tie at zero, so insertion order is kept.
        let order: Vec<usize> = results.iter().map(|r| r.chunk.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn dimension_mismatches_are_rejected() {
        let mut index = sample_index();
        assert!(matches!(
            index.insert(chunk("bad", 3), vec![1.0]),
            Err(RagError::IndexFormatMismatch(_))
        ));
        assert!(matches!(index.search(&[1.0, 0.0], 1), Err(RagError::IndexFormatMismatch(_))));
        assert!(index.check_compatible("test:3", 3).is_ok());
        assert!(index.check_compatible("other", 3).is_err());
        assert!(index.check_compatible("test:3", 4).is_err());
    }

    #[tokio::test]
    async fn persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("nested"));
        assert!(!store.exists().await);

        let index = sample_index();
        store.persist(&index).await.unwrap();
        assert!(store.exists().await);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, index);

        // Only the index file is left behind, no temporaries.
        let names: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![INDEX_FILE_NAME.to_string()]);
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        assert!(matches!(store.load().await, Err(RagError::IndexNotFound { .. })));
        assert!(matches!(store.stamp().await, Err(RagError::IndexNotFound { .. })));
    }

    #[tokio::test]
    async fn corrupt_index_is_a_format_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        std::fs::write(store.path(), b"{ not json").unwrap();
        assert!(matches!(store.load().await, Err(RagError::IndexFormatMismatch(_))));
    }

    #[tokio::test]
    async fn wrong_version_is_a_format_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let mut index = sample_index();
        index.format_version = 99;
        store.persist(&index).await.unwrap();
        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("version 99"));
    }
}
