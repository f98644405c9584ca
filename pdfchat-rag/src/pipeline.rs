//! Pipeline orchestrator.
//!
//! The [`Pipeline`] runs two independent flows over the single persisted
//! index of a deployment:
//!
//! - **ingest**: extract → chunk → embed → persist, replacing the index
//!   wholesale
//! - **ask**: retrieve → synthesize, reading whatever index is on disk
//!
//! Ingests through one `Pipeline` are serialized. Queries run freely: a query
//! racing an ingest sees either the old or the new index file, never a
//! partially written one, but it may answer from the old one. Ingests from
//! separate processes sharing an index directory are not coordinated; the
//! last rename wins.
//!
//! Cancelling either flow means dropping its future. An ingest dropped before
//! its final rename leaves the previous index in place.
//!
//! # Example
//!
//! ```rust,ignore
//! use pdfchat_rag::{Pipeline, RagConfig, HashingEmbedder};
//!
//! let pipeline = Pipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbedder::default()))
//!     .completion_service(Arc::new(my_llm))
//!     .build()?;
//!
//! pipeline.ingest(&[Document::new("notes.pdf", bytes)]).await?;
//! let answer = pipeline.ask("What color is the sky?").await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::builder::IndexBuilder;
use crate::chunking::{Chunker, chunker_for};
use crate::completion::CompletionService;
use crate::config::RagConfig;
use crate::document::{Answer, Document, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extractor::{DefaultExtractor, TextExtractor};
use crate::index::IndexStore;
use crate::retriever::Retriever;
use crate::synthesizer::AnswerSynthesizer;

/// Warning returned when `ingest` is called without documents.
pub const NO_DOCUMENTS_WARNING: &str = "Please upload at least one PDF.";

/// Outcome of an ingest call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    /// Documents received.
    pub documents: usize,
    /// Pages extracted across all documents.
    pub pages: usize,
    /// Pages that yielded no text.
    pub empty_pages: usize,
    /// Chunks stored in the new index. Zero when nothing was indexed.
    pub chunks: usize,
    /// Dimensionality of the stored vectors.
    pub dimensions: usize,
    /// Non-fatal problems worth showing to the user.
    pub warnings: Vec<String>,
}

impl IngestReport {
    /// Whether this ingest replaced the persisted index.
    pub fn indexed(&self) -> bool {
        self.chunks > 0
    }
}

/// The question-answering pipeline. Construct one via [`Pipeline::builder()`]
/// and share it by reference.
pub struct Pipeline {
    config: RagConfig,
    extractor: Arc<dyn TextExtractor>,
    chunker: Box<dyn Chunker>,
    index_builder: IndexBuilder,
    store: IndexStore,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    ingest_lock: Mutex<()>,
}

impl Pipeline {
    /// Create a new [`PipelineBuilder`].
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The store holding the persisted index.
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Whether an index has been persisted.
    pub async fn has_index(&self) -> bool {
        self.store.exists().await
    }

    /// Build a fresh index from `documents` and replace the persisted one.
    ///
    /// With no documents this is a no-op returning a report that carries
    /// [`NO_DOCUMENTS_WARNING`]. Pages without text are skipped and reported
    /// as warnings.
    ///
    /// # Errors
    ///
    /// Fails fast at the first failing stage, leaving the previous index
    /// untouched:
    ///
    /// - [`RagError::ExtractionError`] if a document cannot be parsed at all
    /// - [`RagError::EmptyCorpus`] if no document yields any text
    /// - [`RagError::EmbeddingError`] if embedding fails
    /// - [`RagError::StorageError`] if the index cannot be written
    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestReport> {
        let mut report = IngestReport { documents: documents.len(), ..Default::default() };
        if documents.is_empty() {
            warn!("ingest called without documents");
            report.warnings.push(NO_DOCUMENTS_WARNING.to_string());
            return Ok(report);
        }

        let _guard = self.ingest_lock.lock().await;

        info!(stage = "extracting", document_count = documents.len(), "ingest stage");
        let mut texts = Vec::with_capacity(documents.len());
        for document in documents {
            let extracted = self.extractor.extract(document).await?;
            report.pages += extracted.page_count();
            let empty = extracted.empty_pages();
            report.empty_pages += empty;
            let text = extracted.text();
            if text.trim().is_empty() {
                report.warnings.push(format!("{}: no extractable text", document.name));
            } else if empty > 0 {
                report
                    .warnings
                    .push(format!("{}: {empty} page(s) had no extractable text", document.name));
            }
            texts.push((document.name.as_str(), text));
        }

        info!(stage = "chunking", "ingest stage");
        let chunks: Vec<_> =
            texts.iter().flat_map(|(name, text)| self.chunker.chunk(name, text)).collect();
        if chunks.is_empty() {
            error!(document_count = documents.len(), "no extractable text in any document");
            return Err(RagError::EmptyCorpus(format!(
                "no extractable text in {} document(s)",
                documents.len()
            )));
        }

        info!(stage = "embedding", chunk_count = chunks.len(), "ingest stage");
        let index = self.index_builder.build(chunks).await?;

        info!(stage = "indexing", chunk_count = index.len(), "ingest stage");
        self.store.persist(&index).await?;
        self.retriever.invalidate().await;

        report.chunks = index.len();
        report.dimensions = index.dimensions();
        info!(
            documents = report.documents,
            pages = report.pages,
            chunk_count = report.chunks,
            dimensions = report.dimensions,
            "ingest complete"
        );
        Ok(report)
    }

    /// Return the configured number of chunks most similar to `question`.
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] for an empty question
    /// - [`RagError::IndexNotFound`] before the first successful ingest
    /// - [`RagError::IndexFormatMismatch`] if the index was built with another
    ///   embedding model
    /// - [`RagError::EmbeddingError`] if the question cannot be embedded
    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchResult>> {
        self.retrieve_top_k(question, self.config.top_k).await
    }

    async fn retrieve_top_k(&self, question: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::ConfigError("question must not be empty".to_string()));
        }
        info!(stage = "retrieving", top_k, "query stage");
        self.retriever.query(question, top_k).await
    }

    /// Answer `question` from the persisted index.
    ///
    /// # Errors
    ///
    /// Everything [`retrieve`](Self::retrieve) returns, plus
    /// [`RagError::GenerationError`] if the completion service fails.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        self.ask_with_top_k(question, self.config.top_k).await
    }

    /// Like [`ask`](Self::ask) with `top_k` chunks instead of the configured
    /// number.
    pub async fn ask_with_top_k(&self, question: &str, top_k: usize) -> Result<Answer> {
        let retrieved = self.retrieve_top_k(question, top_k).await?;
        info!(stage = "synthesizing", source_count = retrieved.len(), "query stage");
        self.synthesizer.answer(question.trim(), retrieved).await
    }
}

/// Builder for constructing a [`Pipeline`].
///
/// The embedding provider and completion service are required. The config
/// defaults to [`RagConfig::default()`] and the extractor to
/// [`DefaultExtractor`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<RagConfig>,
    extractor: Option<Arc<dyn TextExtractor>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    completion: Option<Arc<dyn CompletionService>>,
}

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the document text extractor.
    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set the embedding provider used for both chunks and questions.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the completion service that writes answers.
    pub fn completion_service(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Build the [`Pipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required collaborator is missing
    /// or the config is invalid.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedder = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let completion = self
            .completion
            .ok_or_else(|| RagError::ConfigError("completion_service is required".to_string()))?;
        let extractor = self.extractor.unwrap_or_else(|| Arc::new(DefaultExtractor::default()));

        let chunker = chunker_for(config.chunking, config.chunk_size, config.chunk_overlap)?;
        let index_builder = IndexBuilder::new(Arc::clone(&embedder))
            .with_batch_size(config.embed_batch_size)
            .with_concurrency(config.embed_concurrency);
        let store = IndexStore::new(config.index_dir.clone());
        let retriever = Retriever::new(store.clone(), embedder)
            .with_similarity_threshold(config.similarity_threshold);

        Ok(Pipeline {
            config,
            extractor,
            chunker,
            index_builder,
            store,
            retriever,
            synthesizer: AnswerSynthesizer::new(completion),
            ingest_lock: Mutex::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::hashing::HashingEmbedder;

    struct Echo;

    #[async_trait]
    impl CompletionService for Echo {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("echo".to_string())
        }

        fn model_id(&self) -> &str {
            "echo"
        }
    }

    fn pipeline(dir: &std::path::Path) -> Pipeline {
        Pipeline::builder()
            .config(RagConfig::builder().index_dir(dir).chunk_size(50).chunk_overlap(10).build().unwrap())
            .embedding_provider(Arc::new(HashingEmbedder::new(64)))
            .completion_service(Arc::new(Echo))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_collaborators() {
        let err = Pipeline::builder().completion_service(Arc::new(Echo)).build().err().unwrap();
        assert!(err.to_string().contains("embedding_provider"));
        let err = Pipeline::builder()
            .embedding_provider(Arc::new(HashingEmbedder::new(8)))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("completion_service"));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = RagConfig { chunk_overlap: 2000, ..RagConfig::default() };
        let result = Pipeline::builder()
            .config(config)
            .embedding_provider(Arc::new(HashingEmbedder::new(8)))
            .completion_service(Arc::new(Echo))
            .build();
        assert!(matches!(result, Err(RagError::ConfigError(_))));
    }

    #[tokio::test]
    async fn no_documents_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let report = pipeline.ingest(&[]).await.unwrap();
        assert!(!report.indexed());
        assert_eq!(report.warnings, vec![NO_DOCUMENTS_WARNING.to_string()]);
        assert!(!pipeline.has_index().await);
    }

    #[tokio::test]
    async fn blank_documents_are_an_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let err = pipeline.ingest(&[Document::new("blank.txt", "   \n ")]).await.unwrap_err();
        assert!(matches!(err, RagError::EmptyCorpus(_)));
        assert!(!pipeline.has_index().await);
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        assert!(matches!(pipeline.ask("   ").await, Err(RagError::ConfigError(_))));
    }

    #[tokio::test]
    async fn report_counts_documents_and_warns_about_blank_ones() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let report = pipeline
            .ingest(&[
                Document::new("a.txt", "The sky is blue. Grass is green."),
                Document::new("b.txt", ""),
            ])
            .await
            .unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.pages, 2);
        assert_eq!(report.empty_pages, 1);
        assert_eq!(report.dimensions, 64);
        assert!(report.indexed());
        assert_eq!(report.warnings, vec!["b.txt: no extractable text".to_string()]);
    }
}
