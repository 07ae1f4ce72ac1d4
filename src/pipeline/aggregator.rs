use tracing::info;

use super::confidence::compute_overall_confidence;
use super::types::{DocumentMetadata, DocumentResult, DocumentSource, DocumentStatus, PageStatus, PageText};
use super::PipelineError;

/// Combines page texts into the final document result.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAggregator;

impl DocumentAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Order pages, verify the index sequence and derive document status.
    ///
    /// Page indices must be exactly `0..expected_page_count`; a gap or
    /// duplicate is a `PageSequence` error.
    pub fn aggregate(
        &self,
        mut pages: Vec<PageText>,
        source: &DocumentSource,
        expected_page_count: usize,
        language: &str,
    ) -> Result<DocumentResult, PipelineError> {
        if expected_page_count == 0 {
            return Err(PipelineError::EmptyDocument);
        }

        pages.sort_by_key(|p| p.page_index);
        if pages.len() != expected_page_count {
            return Err(PipelineError::PageSequence(format!(
                "expected {} pages, got {}",
                expected_page_count,
                pages.len()
            )));
        }
        if let Some((position, page)) = pages
            .iter()
            .enumerate()
            .find(|(i, p)| p.page_index != *i)
        {
            return Err(PipelineError::PageSequence(format!(
                "page at position {} has index {}",
                position, page.page_index
            )));
        }

        let status = document_status(&pages);
        let mean_confidence = compute_overall_confidence(&pages);

        info!(
            document_id = %source.id,
            pages = pages.len(),
            status = ?status,
            confidence = mean_confidence,
            "Document aggregated"
        );

        Ok(DocumentResult {
            metadata: DocumentMetadata {
                document_id: source.id,
                filename: source.filename.clone(),
                mime_type: source.mime_type.clone(),
                total_page_count: expected_page_count,
                mean_confidence,
                content_hash: source.content_hash.clone(),
                language: language.to_string(),
            },
            pages,
            status,
        })
    }
}

/// `Failed` when every page failed, `PartiallyFailed` when any page failed or
/// is unreadable, otherwise `Complete`. Blank pages are complete.
pub fn document_status(pages: &[PageText]) -> DocumentStatus {
    if !pages.is_empty() && pages.iter().all(PageText::is_failed) {
        DocumentStatus::Failed
    } else if pages
        .iter()
        .any(|p| matches!(p.status, PageStatus::Unreadable | PageStatus::Failed { .. }))
    {
        DocumentStatus::PartiallyFailed
    } else {
        DocumentStatus::Complete
    }
}
