use std::sync::Arc;

use image::imageops;
use tracing::{debug, warn};

use super::cancel::CancellationToken;
use super::confidence::normalize_engine_confidence;
use super::engine_pool::EnginePool;
use super::preprocess::encode_png;
use super::sanitize::{flatten_to_line, sanitize_recognized_text};
use super::types::{OcrResult, PageImage, RawRecognition, Region, RegionKind, RegionOutcome};
use super::{EngineError, PipelineError};

/// First attempt plus one retry with the same input.
const MAX_ATTEMPTS: u8 = 2;

/// Runs the OCR engine on one region at a time.
///
/// Transient engine failures are retried once, then reported as a degraded
/// result. Only an unavailable engine or cancellation is an error.
#[derive(Clone)]
pub struct OcrInvoker {
    pool: Arc<EnginePool>,
    crop_padding: u32,
}

impl OcrInvoker {
    pub fn new(pool: Arc<EnginePool>, crop_padding: u32) -> Self {
        Self { pool, crop_padding }
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    pub fn recognize(
        &self,
        region: &Region,
        page: &PageImage,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<OcrResult, PipelineError> {
        cancel.check()?;

        let crop = region
            .bbox
            .padded_within(self.crop_padding, page.width(), page.height());
        let pixels = imageops::crop_imm(&page.pixels, crop.x, crop.y, crop.width, crop.height).to_image();
        let png = match encode_png(&pixels) {
            Ok(png) => png,
            Err(e) => {
                warn!(page = page.index, seq = region.key.seq, error = %e, "Region crop could not be encoded");
                return Ok(degraded(region, 0, e.to_string()));
            }
        };

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let engine = self.pool.checkout(cancel)?;
            match engine.recognize(&png, language) {
                Ok(raw) => {
                    let result = recognized(region, raw, attempt);
                    debug!(
                        page = page.index,
                        seq = region.key.seq,
                        engine = engine.name(),
                        confidence = result.confidence,
                        chars = result.text.len(),
                        "Region recognized"
                    );
                    return Ok(result);
                }
                Err(EngineError::Unavailable(msg)) => {
                    return Err(PipelineError::EngineUnavailable(msg));
                }
                Err(EngineError::Transient(msg)) => {
                    warn!(
                        page = page.index,
                        seq = region.key.seq,
                        attempt,
                        error = %msg,
                        "Transient OCR failure"
                    );
                    last_error = msg;
                }
            }
            cancel.check()?;
        }

        warn!(page = page.index, seq = region.key.seq, "Region degraded after retry");
        Ok(degraded(region, MAX_ATTEMPTS, last_error))
    }
}

fn recognized(region: &Region, raw: RawRecognition, attempts: u8) -> OcrResult {
    let cleaned = sanitize_recognized_text(&raw.text);
    let text = match region.kind {
        RegionKind::Line => flatten_to_line(&cleaned),
        RegionKind::Block => cleaned,
    };
    let confidence = if text.is_empty() {
        0.0
    } else {
        normalize_engine_confidence(&raw)
    };

    OcrResult {
        region: region.clone(),
        text,
        confidence,
        outcome: RegionOutcome::Recognized { attempts },
    }
}

fn degraded(region: &Region, attempts: u8, reason: String) -> OcrResult {
    OcrResult {
        region: region.clone(),
        text: String::new(),
        confidence: 0.0,
        outcome: RegionOutcome::Degraded { attempts, reason },
    }
}
