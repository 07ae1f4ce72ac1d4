//! Turns a raw document into a lazy stream of normalized page images.
//!
//! Whole-document problems (unsupported type, undecodable payload, empty PDF)
//! fail `normalize` up front. Everything else is per page: a page that cannot
//! be rasterized yields `Err` for its index and the stream moves on.

use std::sync::Arc;

use tracing::debug;

use super::format::{classify_mime, compute_content_hash, document_id, sanitize_filename, sniff_format, SniffedFormat};
use super::pdf_renderer::LopdfImageExtractor;
use super::preprocess::{apply_orientation, read_exif_orientation, validate_document_bytes, PreprocessingPipeline};
use super::types::{DocumentKind, DocumentSource, PageImage, PdfPageRenderer, RawDocument, RenderedPage};
use super::{PageError, PipelineError};
use crate::config::PipelineConfig;

#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    preprocessing: PreprocessingPipeline,
}

impl ImageNormalizer {
    pub fn new(max_page_dimension: u32, denoise_enabled: bool) -> Self {
        Self {
            preprocessing: PreprocessingPipeline::new(max_page_dimension, denoise_enabled),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_page_dimension, config.denoise_enabled)
    }

    /// Validate `document` and open a page stream over it.
    pub fn normalize(&self, document: RawDocument) -> Result<PageStream, PipelineError> {
        let kind = classify_mime(document.mime_type())?;
        validate_document_bytes(document.bytes())?;

        let bytes = document.bytes();
        let format = sniff_format(bytes);
        let source = Arc::new(DocumentSource {
            id: document_id(bytes),
            content_hash: compute_content_hash(bytes),
            filename: document.filename().map(sanitize_filename),
            mime_type: document.mime_type().to_string(),
            kind,
        });

        let pages = match kind {
            DocumentKind::Image => {
                if !format.is_image() {
                    return Err(PipelineError::Decode(format!(
                        "payload is not a supported image (declared {})",
                        source.mime_type
                    )));
                }
                PageSource::Image {
                    bytes: Some(document.into_bytes()),
                    format,
                }
            }
            DocumentKind::Pdf => {
                if format != SniffedFormat::Pdf {
                    return Err(PipelineError::Decode("payload has no %PDF header".into()));
                }
                let renderer = LopdfImageExtractor::load(bytes)?;
                if renderer.page_count() == 0 {
                    return Err(PipelineError::EmptyDocument);
                }
                PageSource::Pdf(Box::new(renderer))
            }
        };

        let page_count = match &pages {
            PageSource::Image { .. } => 1,
            PageSource::Pdf(renderer) => renderer.page_count(),
        };

        debug!(
            document_id = %source.id,
            kind = ?kind,
            format = ?format,
            pages = page_count,
            "Document opened"
        );

        Ok(PageStream {
            source,
            pages,
            page_count,
            next_index: 0,
            preprocessing: self.preprocessing.clone(),
        })
    }
}

enum PageSource {
    /// Bytes are taken on the first (only) page.
    Image {
        bytes: Option<Vec<u8>>,
        format: SniffedFormat,
    },
    Pdf(Box<dyn PdfPageRenderer>),
}

/// Lazy, finite, non-restartable sequence of normalized pages.
///
/// Owns the document metadata; every `PageImage` holds only a `Weak` link
/// back to it.
pub struct PageStream {
    source: Arc<DocumentSource>,
    pages: PageSource,
    page_count: usize,
    next_index: usize,
    preprocessing: PreprocessingPipeline,
}

impl PageStream {
    pub fn source(&self) -> &Arc<DocumentSource> {
        &self.source
    }

    /// Total pages in the document (produced or not).
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn rasterize(&mut self, index: usize) -> Result<RenderedPage, PageError> {
        match &mut self.pages {
            PageSource::Image { bytes, format } => {
                let bytes = bytes
                    .take()
                    .ok_or_else(|| PageError::Raster("image page already consumed".into()))?;
                let raster = image::load_from_memory(&bytes)
                    .map_err(|e| PageError::Raster(format!("Failed to decode image: {e}")))?;

                // Phone photos carry their rotation in EXIF (JPEG and TIFF only)
                let orientation = match format {
                    SniffedFormat::Jpeg | SniffedFormat::Tiff => read_exif_orientation(&bytes),
                    _ => 1,
                };
                if orientation != 1 {
                    debug!(page = index, orientation, "Applying EXIF orientation");
                }
                Ok(apply_orientation(raster, orientation).into())
            }
            PageSource::Pdf(renderer) => renderer.render_page(index),
        }
    }
}

impl PageStream {
    /// Like `next`, but also reports which page index the entry is for.
    pub fn next_indexed(&mut self) -> Option<(usize, Result<PageImage, PageError>)> {
        if self.next_index >= self.page_count {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        let page = self.rasterize(index).map(|rendered| {
            let prepared = self.preprocessing.process(&rendered.image);
            let mut page = PageImage::new(index, prepared.pixels, Arc::downgrade(&self.source));
            page.warnings = rendered.warnings;
            page.warnings.extend(prepared.warnings);
            debug!(
                page = index,
                width = page.width(),
                height = page.height(),
                warnings = page.warnings.len(),
                "Page normalized"
            );
            page
        });
        Some((index, page))
    }
}

impl Iterator for PageStream {
    type Item = Result<PageImage, PageError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_indexed().map(|(_, page)| page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.page_count - self.next_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PageStream {}
