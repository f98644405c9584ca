//! Configuration for the question-answering pipeline.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// How document text is cut into chunks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Break at paragraph, line, then word boundaries before cutting hard.
    #[default]
    Recursive,
    /// Hard character windows.
    Fixed,
}

impl FromStr for ChunkingStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "fixed" => Ok(Self::Fixed),
            other => Err(RagError::ConfigError(format!(
                "unknown chunking strategy '{other}' (expected 'recursive' or 'fixed')"
            ))),
        }
    }
}

/// Configuration parameters for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunking strategy.
    pub chunking: ChunkingStrategy,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Results scoring below this similarity are dropped. `None` keeps all.
    pub similarity_threshold: Option<f32>,
    /// Directory holding the persisted index.
    pub index_dir: PathBuf,
    /// Number of chunks sent per embedding request.
    pub embed_batch_size: usize,
    /// Number of embedding requests in flight at once.
    pub embed_concurrency: usize,
    /// Timeout applied to every request to an external service.
    pub request_timeout: Duration,
    /// Maximum number of retries for transient service failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub initial_backoff: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            chunking: ChunkingStrategy::Recursive,
            top_k: 4,
            similarity_threshold: None,
            index_dir: PathBuf::from("pdf_index"),
            embed_batch_size: 32,
            embed_concurrency: 4,
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Defaults overlaid with `PDFCHAT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a variable cannot be parsed or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Self::builder().env_lookup(lookup)?.build()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `embed_batch_size == 0` or `embed_concurrency == 0`
    pub fn validate(&self) -> Result<()> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.embed_concurrency == 0 {
            return Err(RagError::ConfigError(
                "embed_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The retry policy for calls to external services.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: self.initial_backoff,
            ..RetryPolicy::default()
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| RagError::ConfigError(format!("{key}='{raw}': {e}")))
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunking(mut self, strategy: ChunkingStrategy) -> Self {
        self.config.chunking = strategy;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Set the directory holding the persisted index.
    pub fn index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.index_dir = dir.into();
        self
    }

    /// Set the number of chunks per embedding request.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the number of concurrent embedding requests.
    pub fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embed_concurrency = concurrency;
        self
    }

    /// Set the per-request timeout for external services.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the retry budget for transient service failures.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    /// Overlay the `PDFCHAT_*` environment variables.
    ///
    /// Only parsing happens here; consistency is checked by
    /// [`build`](Self::build), so later setters can still correct a value.
    pub fn env(self) -> Result<Self> {
        self.env_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`env`](Self::env) but reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] naming the variable that fails to parse.
    pub fn env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = parse_var::<usize>(&lookup, "PDFCHAT_CHUNK_SIZE")? {
            self = self.chunk_size(v);
        }
        if let Some(v) = parse_var::<usize>(&lookup, "PDFCHAT_CHUNK_OVERLAP")? {
            self = self.chunk_overlap(v);
        }
        if let Some(v) = parse_var::<ChunkingStrategy>(&lookup, "PDFCHAT_CHUNKING")? {
            self = self.chunking(v);
        }
        if let Some(v) = parse_var::<usize>(&lookup, "PDFCHAT_TOP_K")? {
            self = self.top_k(v);
        }
        if let Some(v) = lookup("PDFCHAT_INDEX_DIR").filter(|v| !v.trim().is_empty()) {
            self = self.index_dir(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "PDFCHAT_TIMEOUT_SECS")? {
            self = self.request_timeout(Duration::from_secs(v));
        }
        if let Some(v) = parse_var::<u32>(&lookup, "PDFCHAT_MAX_RETRIES")? {
            self = self.max_retries(v);
        }
        Ok(self)
    }

    /// Build the [`RagConfig`], validating it with [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Check `chunk_size > chunk_overlap >= 0`.
pub(crate) fn validate_chunking(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::ConfigError(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::builder().build().unwrap();
        assert_eq!(config, RagConfig::default());
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 4);
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
        assert!(RagConfig::builder().chunk_size(0).chunk_overlap(0).build().is_err());
        assert!(RagConfig::builder().chunk_size(10).chunk_overlap(0).build().is_ok());
    }

    #[test]
    fn rejects_zero_top_k_and_batch() {
        assert!(RagConfig::builder().top_k(0).build().is_err());
        assert!(RagConfig::builder().embed_batch_size(0).build().is_err());
        assert!(RagConfig::builder().embed_concurrency(0).build().is_err());
    }

    #[test]
    fn env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PDFCHAT_CHUNK_SIZE", "20"),
            ("PDFCHAT_CHUNK_OVERLAP", "5"),
            ("PDFCHAT_CHUNKING", "Fixed"),
            ("PDFCHAT_TOP_K", "2"),
            ("PDFCHAT_INDEX_DIR", "/tmp/idx"),
            ("PDFCHAT_TIMEOUT_SECS", "5"),
        ]);
        let config =
            RagConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.chunk_size, 20);
        assert_eq!(config.chunk_overlap, 5);
        assert_eq!(config.chunking, ChunkingStrategy::Fixed);
        assert_eq!(config.top_k, 2);
        assert_eq!(config.index_dir, PathBuf::from("/tmp/idx"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn later_setters_correct_the_environment() {
        let vars: HashMap<&str, &str> = HashMap::from([("PDFCHAT_CHUNK_SIZE", "100")]);
        let lookup = |k: &str| vars.get(k).map(|v| v.to_string());

        // Default overlap (200) is not below 100 until it is overridden.
        assert!(RagConfig::from_lookup(lookup).is_err());
        let config =
            RagConfig::builder().env_lookup(lookup).unwrap().chunk_overlap(10).build().unwrap();
        assert_eq!((config.chunk_size, config.chunk_overlap), (100, 10));
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        let err = RagConfig::from_lookup(|k| (k == "PDFCHAT_TOP_K").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PDFCHAT_TOP_K"));
    }
}
