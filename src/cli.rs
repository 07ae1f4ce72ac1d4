use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use docscan_lib::config::PipelineConfig;
use docscan_lib::pipeline::RegionKind;

#[derive(Parser, Debug)]
#[command(
    name = "docscan",
    version,
    about = "Extract ordered, confidence-scored text from scanned documents"
)]
pub struct Cli {
    /// Image (JPEG, PNG, TIFF) or scanned PDF to read
    pub input: PathBuf,

    /// MIME type of the input; guessed from the extension when omitted
    #[arg(long)]
    pub mime: Option<String>,

    /// Tesseract language code, e.g. `eng` or `eng+fra`
    #[arg(long, short = 'l')]
    pub language: Option<String>,

    /// JSON file with pipeline settings; otherwise DOCSCAN_* variables apply
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub granularity: Option<Granularity>,

    #[arg(long)]
    pub page_workers: Option<usize>,

    #[arg(long)]
    pub region_workers: Option<usize>,

    /// Number of OCR engines to run side by side
    #[arg(long)]
    pub engines: Option<usize>,

    /// Leave low-confidence text unmarked
    #[arg(long, default_value_t = false)]
    pub no_annotate: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Granularity {
    Line,
    Block,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Config file (or environment), then command-line overrides.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                PipelineConfig::from_json(&json)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => PipelineConfig::from_env().context("invalid DOCSCAN_* environment")?,
        };

        if let Some(language) = &self.language {
            config.language = language.clone();
        }
        if let Some(granularity) = self.granularity {
            config.segmentation.granularity = match granularity {
                Granularity::Line => RegionKind::Line,
                Granularity::Block => RegionKind::Block,
            };
        }
        if let Some(workers) = self.page_workers {
            config.max_page_workers = workers;
        }
        if let Some(workers) = self.region_workers {
            config.max_region_workers = workers;
        }
        if let Some(engines) = self.engines {
            config.engine_pool_size = engines;
        }
        if self.no_annotate {
            config.annotate_low_confidence = false;
        }

        config.validate().context("invalid pipeline settings")?;
        Ok(config)
    }

    pub fn mime_type(&self) -> Result<String> {
        if let Some(mime) = &self.mime {
            return Ok(mime.clone());
        }
        mime_guess::from_path(&self.input)
            .first_raw()
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "cannot guess the type of {}; pass --mime",
                    self.input.display()
                )
            })
    }
}
