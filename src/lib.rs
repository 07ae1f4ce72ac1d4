//! Document OCR: normalize scanned pages, segment them into text regions,
//! recognize each region through a pooled OCR engine and reassemble the text
//! in reading order with per-region confidence.

pub mod config;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

pub use pipeline::{
    CancellationToken, DocumentResult, DocumentStatus, PipelineError, PipelineOrchestrator, RawDocument,
};

/// Install the global fmt subscriber. `RUST_LOG` overrides the default filter.
///
/// Logs go to stderr so stdout stays clean for recognized text.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
