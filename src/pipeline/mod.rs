pub mod types;
pub mod format;
pub mod preprocess;
pub mod pdf_renderer;
pub mod normalizer;
pub mod segmenter;
pub mod sanitize;
pub mod confidence;
pub mod ocr;
pub mod engine_pool;
pub mod invoker;
pub mod assembler;
pub mod aggregator;
pub mod cancel;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_support;

pub use types::*;
pub use normalizer::{ImageNormalizer, PageStream};
pub use segmenter::PageSegmenter;
pub use ocr::*;
pub use engine_pool::{EngineLease, EnginePool};
pub use invoker::OcrInvoker;
pub use assembler::TextAssembler;
pub use aggregator::DocumentAggregator;
pub use cancel::CancellationToken;
pub use orchestrator::PipelineOrchestrator;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that abort a whole document.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Could not decode document: {0}")]
    Decode(String),

    #[error("Document contains no pages")]
    EmptyDocument,

    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Page sequence invalid: {0}")]
    PageSequence(String),

    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Failure confined to a single page.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PageError {
    #[error("Page raster unavailable: {0}")]
    Raster(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),
}

/// Failure reported by an OCR engine for one invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Crash, timeout or processing error. Worth one retry.
    #[error("Transient engine failure: {0}")]
    Transient(String),

    /// The engine cannot run at all (missing binary, missing language data).
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}
