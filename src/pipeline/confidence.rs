use super::types::{ConfidenceScale, OcrResult, PageText, PageWarning, RawRecognition};

/// Default flagging threshold. Regions below it are treated as uncertain.
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.50;

/// Map an engine-native confidence onto [0.0, 1.0].
///
/// Percent scores are divided by 100 and tesseract's -1 ("no confidence")
/// becomes 0.0. Non-finite values become 0.0. Empty text always scores 0.0.
pub fn normalize_engine_confidence(raw: &RawRecognition) -> f32 {
    if raw.text.trim().is_empty() || !raw.confidence.is_finite() {
        return 0.0;
    }
    let unit = match raw.scale {
        ConfidenceScale::Unit => raw.confidence,
        ConfidenceScale::Percent => raw.confidence / 100.0,
    };
    unit.clamp(0.0, 1.0)
}

/// Arithmetic mean of region confidences; 0.0 when there are no regions.
pub fn mean_region_confidence(results: &[OcrResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let sum: f32 = results.iter().map(|r| r.confidence).sum();
    (sum / results.len() as f32).clamp(0.0, 1.0)
}

/// Overall document confidence: mean of page means. Pages without regions
/// (blank or failed) count as 0.0.
pub fn compute_overall_confidence(pages: &[PageText]) -> f32 {
    if pages.is_empty() {
        return 0.0;
    }
    let sum: f32 = pages.iter().map(|p| p.mean_confidence).sum();
    (sum / pages.len() as f32).clamp(0.0, 1.0)
}

/// Indices of results whose confidence falls below `threshold`.
pub fn flag_low_confidence_regions(results: &[OcrResult], threshold: f32) -> Vec<usize> {
    results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.confidence < threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Page-level quality warnings derived from region results.
pub fn analyze_page_quality(results: &[OcrResult], mean: f32, threshold: f32) -> Vec<PageWarning> {
    let mut warnings = Vec::new();

    let recognized = results.iter().filter(|r| !r.is_degraded()).count();
    if recognized > 0 && mean < threshold {
        warnings.push(PageWarning::LowConfidencePage { confidence: mean });
    }

    let degraded = results.len() - recognized;
    if degraded > 0 {
        warnings.push(PageWarning::DegradedRegions { count: degraded });
    }

    warnings
}
