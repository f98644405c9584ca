//! Gemini embedding and completion backends over the Generative Language REST API.
//!
//! A single [`GeminiClient`] carries the API key, HTTP timeout and retry
//! policy. It is shared by [`GeminiEmbeddingProvider`] and
//! [`GeminiCompletionService`] and also lists the models available to the key.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::completion::CompletionService;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, ServiceErrorKind};
use crate::http::{self, CallError};
use crate::retry::RetryPolicy;

/// Base URL of the Generative Language API.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// Default completion model.
pub const DEFAULT_COMPLETION_MODEL: &str = "gemini-2.5-flash";

/// `batchEmbedContents` accepts at most this many requests per call.
const MAX_BATCH_SIZE: usize = 100;

const TASK_RETRIEVAL_DOCUMENT: &str = "RETRIEVAL_DOCUMENT";
const TASK_RETRIEVAL_QUERY: &str = "RETRIEVAL_QUERY";

/// Authenticated access to the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiClient {
    /// Create a client with the given API key and per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the key is empty or the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
        }
        let http = http::client(timeout).map_err(|e| RagError::ConfigError(e.message))?;
        Ok(Self { http, api_key, base_url: GEMINI_API_BASE.to_string(), retry: RetryPolicy::default() })
    }

    /// Create a client from the `GOOGLE_API_KEY` environment variable.
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY").map_err(|_| {
            RagError::ConfigError("GOOGLE_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key, timeout)
    }

    /// Point the client at a different API root (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the retry policy for transient failures.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url, model_name(model))
    }

    async fn post<B, T>(&self, url: &str, body: &B) -> std::result::Result<T, CallError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        http::send_json(self.http.post(url).header("x-goog-api-key", &self.api_key).json(body))
            .await
    }

    /// List the models available to this API key, following pagination.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = page_token.as_deref();
            let page: ModelPage = self
                .retry
                .run("gemini.list_models", || {
                    let url = url.as_str();
                    async move {
                        let mut request = self
                            .http
                            .get(url)
                            .header("x-goog-api-key", &self.api_key)
                            .query(&[("pageSize", "100")]);
                        if let Some(token) = token {
                            request = request.query(&[("pageToken", token)]);
                        }
                        http::send_json(request)
                            .await
                            .map_err(|e| RagError::generation("gemini", e.message, e.kind))
                    }
                })
                .await
                .map_err(|e| {
                    error!(error = %e, "failed to list Gemini models");
                    e
                })?;

            models.extend(page.models);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(model_count = models.len(), "listed Gemini models");
        Ok(models)
    }
}

/// Strip the optional `models/` prefix from a model name.
fn model_name(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

/// A model available through the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_token_limit: u64,
    #[serde(default)]
    pub output_token_limit: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelPage {
    #[serde(default)]
    models: Vec<ModelInfo>,
    next_page_token: Option<String>,
}

// ── Request/response types ─────────────────────────────────────────

#[derive(Serialize)]
struct RequestContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: RequestContent<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Concatenated text of the first candidate, or why there is none.
fn response_text(response: GenerateContentResponse) -> std::result::Result<String, String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(format!("prompt was blocked ({reason})"));
    }
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err("response contained no candidates".to_string());
    };
    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.thought)
        .filter_map(|p| p.text)
        .collect();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
        return Err(format!("response contained no text (finish reason {reason})"));
    }
    Ok(text)
}

// ── Embeddings ─────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// Documents are embedded with the `RETRIEVAL_DOCUMENT` task type and
/// questions with `RETRIEVAL_QUERY`. Vectors are requested at a fixed output
/// dimensionality (768 by default).
///
/// # Example
///
/// ```rust,ignore
/// let client = GeminiClient::from_env(Duration::from_secs(60))?;
/// let provider = GeminiEmbeddingProvider::new(client);
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: GeminiClient,
    model: String,
    model_id: String,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Default output dimensionality.
    pub const DEFAULT_DIMENSIONS: usize = 768;

    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            model_id: format!("gemini:{DEFAULT_EMBEDDING_MODEL}"),
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }

    /// Set the embedding model (e.g. `text-embedding-004`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model_id = format!("gemini:{}", model_name(&model));
        self.model = model;
        self
    }

    /// Set the output dimensionality of returned vectors.
    pub fn with_output_dimensionality(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    fn request<'a>(&self, text: &'a str, task_type: &'static str) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: format!("models/{}", model_name(&self.model)),
            content: RequestContent { role: None, parts: vec![RequestPart { text }] },
            task_type,
            output_dimensionality: Some(self.dimensions),
        }
    }

    fn check_dimensions(&self, vector: Vec<f32>) -> Result<Vec<f32>> {
        if vector.len() != self.dimensions {
            return Err(RagError::embedding(
                &self.model_id,
                format!("returned a {}-dimensional vector, expected {}", vector.len(), self.dimensions),
                ServiceErrorKind::Permanent,
            ));
        }
        Ok(vector)
    }

    async fn embed_one(&self, text: &str, task_type: &'static str) -> Result<Vec<f32>> {
        debug!(provider = "gemini", text_len = text.len(), task_type, "embedding single text");
        let url = self.client.model_url(&self.model, "embedContent");
        let body = &self.request(text, task_type);
        let response: EmbedContentResponse = self
            .client
            .retry
            .run("gemini.embed", || {
                let url = url.as_str();
                async move {
                    self.client
                        .post(url, body)
                        .await
                        .map_err(|e| RagError::embedding(&self.model_id, e.message, e.kind))
                }
            })
            .await
            .map_err(|e| {
                error!(provider = "gemini", error = %e, "embedding request failed");
                e
            })?;
        self.check_dimensions(response.embedding.values)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, TASK_RETRIEVAL_DOCUMENT).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, TASK_RETRIEVAL_QUERY).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = "gemini", batch_size = texts.len(), model = %self.model, "embedding batch");
        let url = self.client.model_url(&self.model, "batchEmbedContents");
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH_SIZE) {
            let body = &BatchEmbedRequest {
                requests: batch.iter().map(|t| self.request(t, TASK_RETRIEVAL_DOCUMENT)).collect(),
            };
            let response: BatchEmbedResponse = self
                .client
                .retry
                .run("gemini.embed_batch", || {
                    let url = url.as_str();
                    async move {
                        self.client
                            .post(url, body)
                            .await
                            .map_err(|e| RagError::embedding(&self.model_id, e.message, e.kind))
                    }
                })
                .await
                .map_err(|e| {
                    error!(provider = "gemini", error = %e, "batch embedding request failed");
                    e
                })?;

            if response.embeddings.len() != batch.len() {
                return Err(RagError::embedding(
                    &self.model_id,
                    format!(
                        "returned {} embeddings for {} texts",
                        response.embeddings.len(),
                        batch.len()
                    ),
                    ServiceErrorKind::Permanent,
                ));
            }
            for embedding in response.embeddings {
                vectors.push(self.check_dimensions(embedding.values)?);
            }
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ── Completion ─────────────────────────────────────────────────────

/// A [`CompletionService`] backed by `generateContent`.
///
/// Each prompt is sent as a single user turn without streaming.
pub struct GeminiCompletionService {
    client: GeminiClient,
    model: String,
}

impl GeminiCompletionService {
    /// Use `model`, or [`DEFAULT_COMPLETION_MODEL`] when `None`.
    pub fn new(client: GeminiClient, model: Option<String>) -> Self {
        let model = model
            .map(|m| model_name(&m).to_string())
            .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string());
        Self { client, model }
    }
}

#[async_trait]
impl CompletionService for GeminiCompletionService {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(provider = "gemini", model = %self.model, prompt_len = prompt.len(), "generating");
        let url = self.client.model_url(&self.model, "generateContent");
        let body = &GenerateContentRequest {
            contents: vec![RequestContent { role: Some("user"), parts: vec![RequestPart { text: prompt }] }],
        };

        let response: GenerateContentResponse = self
            .client
            .retry
            .run("gemini.generate", || {
                let url = url.as_str();
                async move {
                    self.client
                        .post(url, body)
                        .await
                        .map_err(|e| RagError::generation(&self.model, e.message, e.kind))
                }
            })
            .await
            .map_err(|e| {
                error!(provider = "gemini", model = %self.model, error = %e, "generation request failed");
                e
            })?;

        response_text(response).map_err(|message| {
            error!(provider = "gemini", model = %self.model, %message, "no answer text");
            RagError::generation(&self.model, message, ServiceErrorKind::Permanent)
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
