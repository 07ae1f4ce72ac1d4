mod cli;

use std::fs;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use docscan_lib::pipeline::build_engines;
use docscan_lib::{PipelineOrchestrator, RawDocument};

use crate::cli::{Cli, OutputFormat};

fn main() {
    docscan_lib::init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "docscan failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.pipeline_config()?;

    let bytes = fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let mime = cli.mime_type()?;
    let mut document = RawDocument::new(bytes, mime);
    if let Some(name) = cli.input.file_name() {
        document = document.with_filename(name.to_string_lossy());
    }

    let language = config.language.clone();
    let engines = build_engines(config.engine_pool_size, config.segmentation.granularity);
    let orchestrator = PipelineOrchestrator::new(config, engines).context("failed to set up OCR pipeline")?;

    let result = orchestrator
        .process(document, &language)
        .with_context(|| format!("OCR failed for {}", cli.input.display()))?;

    info!(
        pages = result.metadata.total_page_count,
        status = ?result.status,
        confidence = result.metadata.mean_confidence,
        "Document processed"
    );

    match cli.format {
        OutputFormat::Text => println!("{}", result.full_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}
