//! Page text assembly.
//!
//! Results arrive in completion order; the assembler restores reading order
//! from each region's ordering key and joins the text. Low-confidence text is
//! flagged (and optionally annotated), never dropped.

use tracing::{debug, warn};

use super::confidence::{analyze_page_quality, flag_low_confidence_regions, mean_region_confidence};
use super::types::{OcrResult, PageStatus, PageText, PageWarning};
use crate::config::PipelineConfig;

#[derive(Debug, Clone)]
pub struct TextAssembler {
    low_confidence_threshold: f32,
    annotate_low_confidence: bool,
}

impl TextAssembler {
    pub fn new(low_confidence_threshold: f32, annotate_low_confidence: bool) -> Self {
        Self {
            low_confidence_threshold,
            annotate_low_confidence,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.low_confidence_threshold, config.annotate_low_confidence)
    }

    pub fn assemble(&self, page_index: usize, results: Vec<OcrResult>) -> PageText {
        self.assemble_with_warnings(page_index, results, Vec::new())
    }

    /// Assemble a page, keeping warnings raised while normalizing it.
    pub fn assemble_with_warnings(
        &self,
        page_index: usize,
        mut results: Vec<OcrResult>,
        mut warnings: Vec<PageWarning>,
    ) -> PageText {
        results.sort_by_key(|r| r.region.key);

        let low_confidence_regions =
            flag_low_confidence_regions(&results, self.low_confidence_threshold);
        let degraded_regions: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_degraded())
            .map(|(i, _)| i)
            .collect();

        let text = self.join_text(&results);
        let mean_confidence = mean_region_confidence(&results);

        let status = if results.is_empty() {
            PageStatus::Blank
        } else if results.iter().all(|r| r.confidence <= 0.0) {
            PageStatus::Unreadable
        } else {
            PageStatus::Recognized
        };

        warnings.extend(analyze_page_quality(
            &results,
            mean_confidence,
            self.low_confidence_threshold,
        ));

        match status {
            PageStatus::Unreadable => warn!(
                page = page_index,
                regions = results.len(),
                degraded = degraded_regions.len(),
                "Page has regions but no readable text"
            ),
            _ => debug!(
                page = page_index,
                regions = results.len(),
                low_confidence = low_confidence_regions.len(),
                confidence = mean_confidence,
                "Page assembled"
            ),
        }

        PageText {
            page_index,
            text,
            results,
            mean_confidence,
            low_confidence_regions,
            degraded_regions,
            status,
            warnings,
        }
    }

    /// Space between regions of one line, newline between lines and blocks.
    fn join_text(&self, ordered: &[OcrResult]) -> String {
        let mut text = String::new();
        let mut previous: Option<&OcrResult> = None;

        for result in ordered.iter().filter(|r| !r.text.is_empty()) {
            if let Some(prev) = previous {
                text.push(if prev.region.shares_line_with(&result.region) {
                    ' '
                } else {
                    '\n'
                });
            }

            if self.annotate_low_confidence && result.confidence < self.low_confidence_threshold {
                text.push_str("[?");
                text.push_str(&result.text);
                text.push_str("?]");
            } else {
                text.push_str(&result.text);
            }
            previous = Some(result);
        }

        text
    }
}
