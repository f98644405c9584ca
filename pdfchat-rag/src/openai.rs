//! Alternative embedding backend on OpenAI's `/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, ServiceErrorKind};
use crate::http;
use crate::retry::RetryPolicy;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Vector length of `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

/// Embeds chunks with an OpenAI (or OpenAI-compatible) embeddings model.
///
/// Vectors are identified as `openai:<model>`, so an index built with this
/// provider only answers queries embedded by the same model and size.
///
/// ```rust,ignore
/// let embedder = OpenAIEmbeddingProvider::from_env(Duration::from_secs(60))?
///     .with_model("text-embedding-3-large")
///     .with_dimensions(1024);
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    model_id: String,
    dimensions: usize,
    /// Sent as `dimensions` when set.
    request_dimensions: Option<usize>,
    retry: RetryPolicy,
}

impl OpenAIEmbeddingProvider {
    /// A provider for `text-embedding-3-small` at 1536 dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for an empty key.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("OpenAI API key must not be empty".into()));
        }
        let client = http::client(timeout).map_err(|e| RagError::ConfigError(e.message))?;

        Ok(Self {
            client,
            api_key,
            base_url: OPENAI_API_BASE.into(),
            model: DEFAULT_MODEL.into(),
            model_id: format!("openai:{DEFAULT_MODEL}"),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Like [`new`](Self::new) with the key from `OPENAI_API_KEY`.
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::ConfigError("OPENAI_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key, timeout)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.model_id = format!("openai:{}", self.model);
        self
    }

    /// Ask the API for vectors truncated to `dims`.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Point the provider at an OpenAI-compatible API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the retry policy for transient failures.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = "openai", text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| {
            RagError::embedding(&self.model_id, "API returned empty response", ServiceErrorKind::Permanent)
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = "openai",
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let url = format!("{}/embeddings", self.base_url);
        let request_body = &EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: self.request_dimensions,
        };

        let response: EmbeddingResponse = self
            .retry
            .run("openai.embed", || {
                let url = url.as_str();
                async move {
                    http::send_json(
                        self.client.post(url).bearer_auth(&self.api_key).json(request_body),
                    )
                    .await
                    .map_err(|e| RagError::embedding(&self.model_id, e.message, e.kind))
                }
            })
            .await
            .map_err(|e| {
                error!(provider = "openai", error = %e, "embedding request failed");
                e
            })?;

        let mut data = response.data;
        if data.len() != texts.len() {
            return Err(RagError::embedding(
                &self.model_id,
                format!("returned {} embeddings for {} texts", data.len(), texts.len()),
                ServiceErrorKind::Permanent,
            ));
        }
        data.sort_by_key(|d| d.index);

        data.into_iter()
            .map(|d| {
                if d.embedding.len() == self.dimensions {
                    Ok(d.embedding)
                } else {
                    Err(RagError::embedding(
                        &self.model_id,
                        format!(
                            "returned a {}-dimensional vector, expected {}",
                            d.embedding.len(),
                            self.dimensions
                        ),
                        ServiceErrorKind::Permanent,
                    ))
                }
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
