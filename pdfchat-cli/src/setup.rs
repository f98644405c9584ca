//! Assembling a [`Pipeline`] from command-line flags and the environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, ValueEnum};
use pdfchat_rag::{
    CompletionService, Document, EmbeddingProvider, GeminiClient, GeminiCompletionService,
    GeminiEmbeddingProvider, HashingEmbedder, OpenAIEmbeddingProvider, Pipeline, RagConfig,
    RagError,
};
use tracing::{info, warn};

/// Which embedding backend builds and queries the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    Gemini,
    Openai,
    /// Offline feature hashing; needs no API key.
    Hashing,
}

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Directory holding the persisted index
    #[arg(long, global = true)]
    pub index_dir: Option<PathBuf>,

    /// Embedding backend [default: gemini when GOOGLE_API_KEY is set, else hashing]
    #[arg(long, global = true, env = "PDFCHAT_EMBEDDER", value_enum)]
    pub embedder: Option<EmbedderKind>,

    /// Gemini model that writes answers
    #[arg(long, global = true, env = "PDFCHAT_MODEL")]
    pub model: Option<String>,

    /// Maximum chunk size in characters
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Overlap between consecutive chunks in characters
    #[arg(long, global = true)]
    pub chunk_overlap: Option<usize>,
}

/// Environment defaults overlaid with the command-line flags.
pub fn load_config(args: &GlobalArgs) -> anyhow::Result<RagConfig> {
    load_config_with(args, |key| std::env::var(key).ok())
}

/// Like [`load_config`] but reading variables through `lookup`. Flags win
/// over the environment and the result is validated once.
pub fn load_config_with(
    args: &GlobalArgs,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<RagConfig> {
    let mut builder =
        RagConfig::builder().env_lookup(lookup).context("invalid PDFCHAT_* environment")?;
    if let Some(dir) = &args.index_dir {
        builder = builder.index_dir(dir.clone());
    }
    if let Some(size) = args.chunk_size {
        builder = builder.chunk_size(size);
    }
    if let Some(overlap) = args.chunk_overlap {
        builder = builder.chunk_overlap(overlap);
    }
    Ok(builder.build()?)
}

fn google_api_key() -> Option<String> {
    std::env::var("GOOGLE_API_KEY").ok().filter(|k| !k.trim().is_empty())
}

fn gemini_client(config: &RagConfig) -> pdfchat_rag::Result<GeminiClient> {
    Ok(GeminiClient::from_env(config.request_timeout)?.with_retry_policy(config.retry_policy()))
}

/// The embedding backend selected by `kind`, or by which API keys are set.
pub fn embedding_provider(
    kind: Option<EmbedderKind>,
    config: &RagConfig,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let kind = kind.unwrap_or_else(|| {
        if google_api_key().is_some() {
            EmbedderKind::Gemini
        } else {
            warn!("GOOGLE_API_KEY not set, using the offline hashing embedder");
            EmbedderKind::Hashing
        }
    });

    let provider: Arc<dyn EmbeddingProvider> = match kind {
        EmbedderKind::Gemini => Arc::new(GeminiEmbeddingProvider::new(gemini_client(config)?)),
        EmbedderKind::Openai => Arc::new(
            OpenAIEmbeddingProvider::from_env(config.request_timeout)?
                .with_retry_policy(config.retry_policy()),
        ),
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
    };
    info!(model = provider.model_id(), dimensions = provider.dimensions(), "embedding provider ready");
    Ok(provider)
}

/// Stands in for the completion service when no Gemini key is configured,
/// so documents can still be processed and searched.
struct MissingCompletion;

#[async_trait]
impl CompletionService for MissingCompletion {
    async fn generate(&self, _prompt: &str) -> pdfchat_rag::Result<String> {
        Err(RagError::ConfigError(
            "GOOGLE_API_KEY is not set; answers need a Gemini API key".to_string(),
        ))
    }

    fn model_id(&self) -> &str {
        "unconfigured"
    }
}

/// The Gemini completion service, or a placeholder that fails on use when
/// `GOOGLE_API_KEY` is missing.
pub fn completion_service(
    model: Option<String>,
    config: &RagConfig,
) -> anyhow::Result<Arc<dyn CompletionService>> {
    if google_api_key().is_none() {
        return Ok(Arc::new(MissingCompletion));
    }
    Ok(Arc::new(GeminiCompletionService::new(gemini_client(config)?, model)))
}

/// Build the pipeline described by `args` and the environment.
pub fn build_pipeline(args: &GlobalArgs) -> anyhow::Result<Pipeline> {
    let config = load_config(args)?;
    let embedder = embedding_provider(args.embedder, &config)?;
    let completion = completion_service(args.model.clone(), &config)?;
    Ok(Pipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .completion_service(completion)
        .build()?)
}

/// Read each path into a [`Document`] named after its file name.
pub async fn read_documents(paths: &[PathBuf]) -> anyhow::Result<Vec<Document>> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        documents.push(Document::new(file_name(path), bytes));
    }
    Ok(documents)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
