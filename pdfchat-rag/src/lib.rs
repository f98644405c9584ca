//! Retrieval-augmented question answering over uploaded documents.
//!
//! This crate provides:
//! - Page-wise text extraction from PDFs and plain-text files
//! - Recursive and fixed-size chunking with overlap
//! - Index building through pluggable embedding providers (Gemini, OpenAI,
//!   offline feature hashing)
//! - A single persisted, atomically replaced cosine-similarity index
//! - Top-k retrieval and grounded answer synthesis through a completion service
//! - The [`Pipeline`] that sequences ingest and question answering

mod builder;
mod chunking;
mod completion;
mod config;
mod document;
mod embedding;
mod error;
mod extractor;
pub mod gemini;
mod hashing;
mod http;
mod index;
pub mod openai;
mod pipeline;
mod retriever;
mod retry;
mod synthesizer;

pub use builder::IndexBuilder;
pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker, chunker_for, split};
pub use completion::CompletionService;
pub use config::{ChunkingStrategy, RagConfig, RagConfigBuilder};
pub use document::{Answer, Chunk, Document, SearchResult, content_id};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result, ServiceErrorKind};
pub use extractor::{
    DefaultExtractor, ExtractedText, PdfTextExtractor, PlainTextExtractor, TextExtractor,
};
pub use gemini::{GeminiClient, GeminiCompletionService, GeminiEmbeddingProvider, ModelInfo};
pub use hashing::HashingEmbedder;
pub use index::{
    INDEX_FILE_NAME, INDEX_FORMAT_VERSION, IndexEntry, IndexStamp, IndexStore, VectorIndex,
    cosine_similarity,
};
pub use openai::OpenAIEmbeddingProvider;
pub use pipeline::{IngestReport, NO_DOCUMENTS_WARNING, Pipeline, PipelineBuilder};
pub use retriever::Retriever;
pub use retry::RetryPolicy;
pub use synthesizer::{AnswerSynthesizer, FALLBACK_ANSWER, build_context, build_prompt};
