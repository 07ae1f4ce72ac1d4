use std::sync::{Arc, Weak};

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EngineError, PageError};

// ═══════════════════════════════════════════════════════════
// Input
// ═══════════════════════════════════════════════════════════

/// Raw input document: byte payload plus declared MIME type.
///
/// Immutable. The normalizer takes it by value, so a document is consumed
/// exactly once per pipeline run.
#[derive(Debug, Clone)]
pub struct RawDocument {
    bytes: Vec<u8>,
    mime_type: String,
    filename: Option<String>,
}

impl RawDocument {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            filename: None,
        }
    }

    /// Attach the original upload filename (kept for metadata only).
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Broad input family, decided from the declared MIME type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Image,
    Pdf,
}

/// Metadata captured from a `RawDocument` before its bytes are consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSource {
    /// Deterministic id: UUID v5 of the content bytes.
    pub id: Uuid,
    /// Base64 SHA-256 of the content bytes.
    pub content_hash: String,
    pub filename: Option<String>,
    pub mime_type: String,
    pub kind: DocumentKind,
}

// ═══════════════════════════════════════════════════════════
// Pages and regions
// ═══════════════════════════════════════════════════════════

/// Normalized grayscale raster of one page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based page position in the source document.
    pub index: usize,
    pub pixels: GrayImage,
    /// Normalization steps that changed the page (deskew, denoise, ...).
    pub warnings: Vec<PageWarning>,
    source: Weak<DocumentSource>,
}

impl PageImage {
    pub fn new(index: usize, pixels: GrayImage, source: Weak<DocumentSource>) -> Self {
        Self {
            index,
            pixels,
            warnings: Vec::new(),
            source,
        }
    }

    /// A page with no document behind it (segmenting a standalone raster).
    pub fn detached(index: usize, pixels: GrayImage) -> Self {
        Self::new(index, pixels, Weak::new())
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Metadata of the owning document, if it is still alive.
    pub fn source(&self) -> Option<Arc<DocumentSource>> {
        self.source.upgrade()
    }
}

/// Axis-aligned rectangle in page pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox::new(x, y, right - x, bottom - y)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Grow by `pad` on every side, clipped to a `max_w` x `max_h` page.
    pub fn padded_within(&self, pad: u32, max_w: u32, max_h: u32) -> BoundingBox {
        let x = self.x.saturating_sub(pad);
        let y = self.y.saturating_sub(pad);
        let right = (self.right() + pad).min(max_w);
        let bottom = (self.bottom() + pad).min(max_h);
        BoundingBox::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }
}

/// Segmentation granularity of a region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    #[default]
    Line,
    Block,
}

/// Reading-order key: line top, then left edge, then insertion index.
///
/// `seq` is unique within a page, so the order is total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey {
    pub y: u32,
    pub x: u32,
    pub seq: usize,
}

/// Rectangular sub-area of a page believed to contain text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub bbox: BoundingBox,
    pub kind: RegionKind,
    /// Index of the text line this region belongs to (page-wide).
    pub line: usize,
    /// Index of the text block this region belongs to (page-wide).
    pub block: usize,
    pub key: OrderingKey,
}

impl Region {
    /// True when `other` continues the same visual line.
    pub fn shares_line_with(&self, other: &Region) -> bool {
        self.block == other.block && self.line == other.line
    }
}

// ═══════════════════════════════════════════════════════════
// Recognition results
// ═══════════════════════════════════════════════════════════

/// How a region's recognition ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegionOutcome {
    Recognized { attempts: u8 },
    /// Engine failed on every attempt; text is empty and confidence 0.0.
    Degraded { attempts: u8, reason: String },
}

/// Recognized text for one region.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrResult {
    pub region: Region,
    pub text: String,
    /// Always in [0.0, 1.0]; 0.0 whenever `text` is empty.
    pub confidence: f32,
    pub outcome: RegionOutcome,
}

impl OcrResult {
    pub fn is_degraded(&self) -> bool {
        matches!(self.outcome, RegionOutcome::Degraded { .. })
    }
}

/// Page-level outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageStatus {
    /// At least one region produced text.
    Recognized,
    /// No text regions found.
    Blank,
    /// Regions were found but none could be read.
    Unreadable,
    /// The page raster could not be produced.
    Failed { reason: String },
}

/// Warnings about page quality or processing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageWarning {
    SkewCorrected { angle_degrees: f32 },
    NoiseReduced { noise_level: f32 },
    Downscaled { original_width: u32, original_height: u32 },
    LowConfidencePage { confidence: f32 },
    DegradedRegions { count: usize },
    /// Images on a PDF page that could not be placed and were left out of the raster.
    ImagesDropped { count: usize },
}

/// Assembled text of one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageText {
    pub page_index: usize,
    pub text: String,
    /// Results in reading order.
    pub results: Vec<OcrResult>,
    /// Mean region confidence; 0.0 for a page without regions.
    pub mean_confidence: f32,
    /// Indices into `results` below the low-confidence threshold.
    pub low_confidence_regions: Vec<usize>,
    /// Indices into `results` whose recognition degraded.
    pub degraded_regions: Vec<usize>,
    pub status: PageStatus,
    pub warnings: Vec<PageWarning>,
}

impl PageText {
    /// Placeholder for a page whose raster could not be produced.
    pub fn failed(page_index: usize, reason: impl Into<String>) -> Self {
        Self {
            page_index,
            text: String::new(),
            results: Vec::new(),
            mean_confidence: 0.0,
            low_confidence_regions: Vec::new(),
            degraded_regions: Vec::new(),
            status: PageStatus::Failed {
                reason: reason.into(),
            },
            warnings: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PageStatus::Failed { .. })
    }
}

/// Overall document outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Complete,
    PartiallyFailed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub document_id: Uuid,
    pub filename: Option<String>,
    pub mime_type: String,
    pub total_page_count: usize,
    /// Mean of the page means.
    pub mean_confidence: f32,
    pub content_hash: String,
    pub language: String,
}

/// Final pipeline output for one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentResult {
    pub metadata: DocumentMetadata,
    /// One entry per page, indices contiguous from 0.
    pub pages: Vec<PageText>,
    pub status: DocumentStatus,
}

/// Separator inserted between pages by `DocumentResult::full_text`.
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

impl DocumentResult {
    /// All page texts joined in page order.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(PAGE_BREAK)
    }

    /// Pages that produced no readable text (failed or unreadable).
    pub fn unreadable_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| matches!(p.status, PageStatus::Unreadable | PageStatus::Failed { .. }))
            .map(|p| p.page_index)
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════
// Engine boundary
// ═══════════════════════════════════════════════════════════

/// Units an engine reports confidence in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceScale {
    /// 0.0 - 1.0
    Unit,
    /// 0 - 100; negative means "no confidence available".
    Percent,
}

/// What an engine returns for one region, in its own units.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecognition {
    pub text: String,
    pub confidence: f32,
    pub scale: ConfidenceScale,
}

/// OCR engine abstraction (allows mocking for tests)
///
/// An engine is leased to one worker at a time, so implementations only need
/// to be `Send`.
pub trait OcrEngine: Send {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Recognize text in a PNG-encoded region image.
    fn recognize(&self, image_png: &[u8], language: &str) -> Result<RawRecognition, EngineError>;

    /// Fail with `EngineError::Unavailable` if `language` cannot be served.
    fn ensure_language(&self, _language: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Raster of one document page, with anything lost while producing it.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: DynamicImage,
    pub warnings: Vec<PageWarning>,
}

impl From<DynamicImage> for RenderedPage {
    fn from(image: DynamicImage) -> Self {
        Self {
            image,
            warnings: Vec::new(),
        }
    }
}

/// Page raster source for multi-page documents.
pub trait PdfPageRenderer: Send {
    fn page_count(&self) -> usize;

    /// Produce the raster for a 0-based page index.
    fn render_page(&self, page_index: usize) -> Result<RenderedPage, PageError>;
}
