//! Document text extraction.
//!
//! [`TextExtractor`] turns a [`Document`]'s bytes into page-by-page text.
//! Pages that yield no text (scanned images, blank pages) are kept as empty
//! strings so callers can report them; they contribute nothing to the index.

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::document::Document;
use crate::error::{RagError, Result};

/// Text recovered from one document, one entry per page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
}

impl ExtractedText {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of pages with no extractable text.
    pub fn empty_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.trim().is_empty()).count()
    }

    /// Non-empty pages, each followed by a newline.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .filter(|p| !p.trim().is_empty())
            .fold(String::new(), |mut acc, page| {
                acc.push_str(page);
                acc.push('\n');
                acc
            })
    }
}

/// Extracts text from document bytes.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract page text from `document`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ExtractionError`] only when the document cannot be
    /// parsed at all. Unreadable pages are returned as empty strings.
    async fn extract(&self, document: &Document) -> Result<ExtractedText>;
}

/// PDF extraction backed by `pdf-extract`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, document: &Document) -> Result<ExtractedText> {
        let bytes = document.bytes.clone();
        let pages = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        })
        .await
        .map_err(|e| extraction_task_error(&document.name, e))?
        .map_err(|e| {
            error!(document = %document.name, error = %e, "failed to parse PDF");
            RagError::ExtractionError { document: document.name.clone(), message: e.to_string() }
        })?;

        let extracted = ExtractedText::new(pages);
        let empty = extracted.empty_pages();
        if empty > 0 {
            warn!(document = %document.name, empty_pages = empty, "pages without extractable text");
        }
        debug!(document = %document.name, pages = extracted.page_count(), "extracted PDF text");
        Ok(extracted)
    }
}

/// `pdf-extract` panics on some malformed files; that is a bad document, not
/// an internal failure.
fn extraction_task_error(document: &str, err: tokio::task::JoinError) -> RagError {
    if err.is_panic() {
        error!(document = %document, "PDF parser panicked");
        RagError::ExtractionError {
            document: document.to_string(),
            message: "the PDF is malformed and could not be parsed".to_string(),
        }
    } else {
        RagError::PipelineError(format!("extraction task failed: {err}"))
    }
}

/// Treats the bytes as (lossy) UTF-8 text forming a single page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, document: &Document) -> Result<ExtractedText> {
        let text = String::from_utf8_lossy(&document.bytes).into_owned();
        Ok(ExtractedText::new(vec![text]))
    }
}

/// Picks an extractor from the file extension: `.pdf` files go to
/// [`PdfTextExtractor`], everything else to [`PlainTextExtractor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor {
    pdf: PdfTextExtractor,
    plain: PlainTextExtractor,
}

#[async_trait]
impl TextExtractor for DefaultExtractor {
    async fn extract(&self, document: &Document) -> Result<ExtractedText> {
        match document.extension().as_deref() {
            Some("pdf") => self.pdf.extract(document).await,
            _ => self.plain.extract(document).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_skips_empty_pages() {
        let extracted = ExtractedText::new(vec![
            "Page one.".to_string(),
            "   ".to_string(),
            "Page three.".to_string(),
        ]);
        assert_eq!(extracted.page_count(), 3);
        assert_eq!(extracted.empty_pages(), 1);
        assert_eq!(extracted.text(), "Page one.\nPage three.\n");
    }

    #[tokio::test]
    async fn plain_text_is_one_page() {
        let doc = Document::new("notes.txt", "The sky is blue.");
        let extracted = DefaultExtractor::default().extract(&doc).await.unwrap();
        assert_eq!(extracted.pages, vec!["The sky is blue.".to_string()]);
    }

    #[tokio::test]
    async fn garbage_pdf_is_an_extraction_error() {
        let doc = Document::new("broken.pdf", b"definitely not a pdf".to_vec());
        let err = DefaultExtractor::default().extract(&doc).await.unwrap_err();
        match err {
            RagError::ExtractionError { document, .. } => assert_eq!(document, "broken.pdf"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn parser_panic_is_an_extraction_error() {
        let join_err = tokio::task::spawn_blocking(|| -> Vec<String> { panic!("malformed xref") })
            .await
            .unwrap_err();
        match extraction_task_error("broken.pdf", join_err) {
            RagError::ExtractionError { document, .. } => assert_eq!(document, "broken.pdf"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_task_is_a_pipeline_error() {
        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();
        let join_err = task.await.unwrap_err();
        assert!(matches!(
            extraction_task_error("doc.pdf", join_err),
            RagError::PipelineError(_)
        ));
    }
}
