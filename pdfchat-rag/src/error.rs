//! Error types for the `pdfchat-rag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Whether a failed call to an external service is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Timeouts, connection failures, HTTP 5xx and HTTP 429.
    Transient,
    /// Authentication failures, malformed requests, undecodable responses.
    Permanent,
}

impl ServiceErrorKind {
    /// Classify an HTTP status code returned by a remote service.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::Transient
        } else {
            Self::Permanent
        }
    }

    /// Classify a transport-level failure reported by `reqwest`.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return Self::Transient;
        }
        match err.status() {
            Some(status) => Self::from_status(status),
            None => Self::Permanent,
        }
    }
}

/// Errors that can occur while ingesting documents or answering questions.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunking or pipeline parameters.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An ingest produced no text to index.
    #[error("Nothing to index: {0}")]
    EmptyCorpus(String),

    /// A document could not be parsed at all.
    #[error("Extraction error ({document}): {message}")]
    ExtractionError {
        /// Name of the offending document.
        document: String,
        /// A description of the failure.
        message: String,
    },

    /// The embedding service failed or returned unusable output.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
        /// Transient failures are retried, permanent ones surface immediately.
        kind: ServiceErrorKind,
    },

    /// The completion service failed or returned no text.
    #[error("Generation error ({provider}): {message}")]
    GenerationError {
        /// The completion service that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
        /// Transient failures are retried, permanent ones surface immediately.
        kind: ServiceErrorKind,
    },

    /// No persisted index exists yet.
    #[error("No index found at {}: process documents first", path.display())]
    IndexNotFound {
        /// Location that was probed.
        path: PathBuf,
    },

    /// The persisted index cannot be used with the current embedding setup.
    #[error("Index format mismatch: {0}")]
    IndexFormatMismatch(String),

    /// Reading or writing the persisted index failed.
    #[error("Index storage error ({}): {message}", path.display())]
    StorageError {
        /// Location being read or written.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// An error in the pipeline orchestration itself.
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RagError {
    /// Build a transient or permanent [`RagError::EmbeddingError`].
    pub fn embedding(
        provider: impl Into<String>,
        message: impl Into<String>,
        kind: ServiceErrorKind,
    ) -> Self {
        Self::EmbeddingError { provider: provider.into(), message: message.into(), kind }
    }

    /// Build a transient or permanent [`RagError::GenerationError`].
    pub fn generation(
        provider: impl Into<String>,
        message: impl Into<String>,
        kind: ServiceErrorKind,
    ) -> Self {
        Self::GenerationError { provider: provider.into(), message: message.into(), kind }
    }

    /// Returns `true` when repeating the failed call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingError { kind: ServiceErrorKind::Transient, .. }
                | Self::GenerationError { kind: ServiceErrorKind::Transient, .. }
        )
    }

    /// Text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConfigError(message) => format!("Invalid settings: {message}"),
            Self::EmptyCorpus(_) => {
                "No text could be extracted from the uploaded documents; nothing was indexed."
                    .to_string()
            }
            Self::ExtractionError { document, .. } => {
                format!("Could not read '{document}'. Is it a valid PDF?")
            }
            Self::EmbeddingError { message, .. } => {
                format!("The embedding service is unavailable: {message}")
            }
            Self::GenerationError { message, .. } => {
                format!("The answer could not be generated: {message}")
            }
            Self::IndexNotFound { .. } => {
                "No documents have been processed yet. Process documents first.".to_string()
            }
            Self::IndexFormatMismatch(_) => {
                "The stored index was built with a different embedding model. \
                 Process the documents again."
                    .to_string()
            }
            Self::StorageError { message, .. } => format!("Could not access the index: {message}"),
            Self::PipelineError(message) => format!("Internal error: {message}"),
        }
    }
}

/// A convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;
