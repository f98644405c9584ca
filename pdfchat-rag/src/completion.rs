//! Completion service trait for generating answer text from a prompt.

use async_trait::async_trait;

use crate::error::Result;

/// A hosted language model that turns a prompt into text.
///
/// Implementations return the generated text unmodified. An empty response is
/// reported as a [`RagError::GenerationError`](crate::RagError::GenerationError)
/// rather than as an empty string.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Identifier of the model answering (e.g. `gemini-2.5-flash`).
    fn model_id(&self) -> &str;
}
