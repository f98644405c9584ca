//! Grounded prompt construction and answer generation.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::completion::CompletionService;
use crate::document::{Answer, SearchResult};
use crate::error::Result;

/// Phrase the model is told to reply with when the context has no answer.
pub const FALLBACK_ANSWER: &str = "Answer is not available in the context.";

/// Join chunk texts in retrieval order, separated by a blank line.
pub fn build_context(retrieved: &[SearchResult]) -> String {
    retrieved.iter().map(|r| r.chunk.text.as_str()).collect::<Vec<_>>().join("\n\n")
}

/// The single instruction prompt sent to the completion service.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an assistant that answers questions ONLY using the given context.\n\
         If the answer is not present in the context, say:\n\
         \"{FALLBACK_ANSWER}\"\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n\
         \n\
         Answer:"
    )
}

/// Turns retrieved chunks and a question into an [`Answer`].
///
/// The synthesizer does not check that the generated text is actually
/// supported by the context; see [`Answer::lexical_support`] for a rough
/// signal.
pub struct AnswerSynthesizer {
    completion: Arc<dyn CompletionService>,
}

impl AnswerSynthesizer {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    /// Send one grounded prompt and return the reply with its sources.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationError`](crate::RagError::GenerationError)
    /// from the completion service unchanged.
    pub async fn answer(&self, question: &str, retrieved: Vec<SearchResult>) -> Result<Answer> {
        let model = self.completion.model_id().to_string();
        let prompt = build_prompt(&build_context(&retrieved), question);
        debug!(model = %model, prompt_len = prompt.len(), source_count = retrieved.len(), "sending prompt");

        let text = self.completion.generate(&prompt).await.map_err(|e| {
            error!(model = %model, error = %e, "answer generation failed");
            e
        })?;

        info!(model = %model, answer_len = text.len(), "generated answer");
        Ok(Answer { question: question.to_string(), text, sources: retrieved, model })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::document::Chunk;
    use crate::error::{RagError, ServiceErrorKind};

    #[derive(Default)]
    struct RecordingCompletion {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionService for RecordingCompletion {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                return Err(RagError::generation("fake", "quota exhausted", ServiceErrorKind::Permanent));
            }
            Ok("  The sky is blue.  ".to_string())
        }

        fn model_id(&self) -> &str {
            "fake-model"
        }
    }

    fn result(text: &str, score: f32) -> SearchResult {
        SearchResult { chunk: Chunk::new(text, "doc.pdf", 0, 0), score }
    }

    #[test]
    fn context_keeps_retrieval_order() {
        let context = build_context(&[result("second best", 0.5), result("best", 0.9)]);
        assert_eq!(context, "second best\n\nbest");
    }

    #[test]
    fn prompt_places_context_before_question() {
        let prompt = build_prompt("CTX", "Q?");
        assert!(prompt.starts_with("You are an assistant that answers questions ONLY"));
        assert!(prompt.contains(FALLBACK_ANSWER));
        let ctx = prompt.find("Context:\nCTX").unwrap();
        let q = prompt.find("Question:\nQ?").unwrap();
        assert!(ctx < q);
        assert!(prompt.ends_with("Answer:"));
    }

    #[tokio::test]
    async fn answer_is_returned_verbatim_with_sources() {
        let completion = Arc::new(RecordingCompletion::default());
        let synthesizer = AnswerSynthesizer::new(completion.clone());
        let sources = vec![result("The sky is blue.", 0.8)];

        let answer = synthesizer.answer("What color is the sky?", sources.clone()).await.unwrap();
        assert_eq!(answer.text, "  The sky is blue.  ");
        assert_eq!(answer.sources, sources);
        assert_eq!(answer.model, "fake-model");

        let prompts = completion.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("The sky is blue."));
    }

    #[tokio::test]
    async fn generation_errors_propagate() {
        let completion = Arc::new(RecordingCompletion { fail: true, ..Default::default() });
        let err = AnswerSynthesizer::new(completion)
            .answer("q", vec![result("ctx", 0.1)])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::GenerationError { .. }));
    }
}
