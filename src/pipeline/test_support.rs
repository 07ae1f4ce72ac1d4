//! Fixtures shared by pipeline tests: synthetic pages, scanned PDFs and a
//! scripted engine that "reads" regions by the width of their ink.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, GrayImage, ImageOutputFormat, Luma, Rgb, RgbImage};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use super::preprocess::encode_png;
use super::types::{ConfidenceScale, OcrEngine, RawRecognition};
use super::EngineError;

// ── Pages ──

pub(crate) fn white_page(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([255]))
}

/// Paint a solid black rectangle.
pub(crate) fn draw_box(img: &mut GrayImage, x: u32, y: u32, width: u32, height: u32) {
    for py in y..(y + height).min(img.height()) {
        for px in x..(x + width).min(img.width()) {
            img.put_pixel(px, py, Luma([0]));
        }
    }
}

pub(crate) fn make_png(img: &GrayImage) -> Vec<u8> {
    encode_png(img).unwrap()
}

/// RGB gradient JPEG of the given size.
pub(crate) fn make_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, ImageOutputFormat::Jpeg(85))
        .unwrap();
    cursor.into_inner()
}

// ── PDFs ──

pub(crate) enum PdfPage {
    /// Page scan stored as a DCTDecode image.
    Jpeg(Vec<u8>),
    /// Page scan stored as raw 8-bit DeviceGray samples.
    Gray(GrayImage),
    /// Raw DeviceGray scan on a page with the given `/Rotate`.
    Rotated(GrayImage, i64),
    /// DeviceGray strips drawn top to bottom by the page content, one user
    /// unit per pixel.
    Strips(Vec<GrayImage>),
    /// Page with fonts but no image XObject.
    TextOnly,
}

fn gray_image_object(doc: &mut Document, img: &GrayImage) -> ObjectId {
    doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img.width() as i64,
            "Height" => img.height() as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8i64,
        },
        img.as_raw().clone(),
    ))
}

/// Build a PDF whose pages carry the given scans.
pub(crate) fn build_scanned_pdf(pages: &[PdfPage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for page in pages {
        let mut contents = None;
        let resources = match page {
            PdfPage::Jpeg(bytes) => {
                let (width, height) = image::load_from_memory(bytes).unwrap().dimensions();
                let image_id = doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => width as i64,
                        "Height" => height as i64,
                        "ColorSpace" => "DeviceRGB",
                        "BitsPerComponent" => 8i64,
                        "Filter" => "DCTDecode",
                    },
                    bytes.clone(),
                ));
                dictionary! { "XObject" => dictionary! { "Im0" => image_id } }
            }
            PdfPage::Gray(img) | PdfPage::Rotated(img, _) => {
                let image_id = gray_image_object(&mut doc, img);
                dictionary! { "XObject" => dictionary! { "Im0" => image_id } }
            }
            PdfPage::Strips(strips) => {
                let total_height: u32 = strips.iter().map(GrayImage::height).sum();
                let mut xobjects = Dictionary::new();
                let mut ops = String::new();
                let mut top = 0;
                for (i, strip) in strips.iter().enumerate() {
                    let name = format!("Im{i}");
                    xobjects.set(name.as_str(), gray_image_object(&mut doc, strip));
                    let bottom = total_height - top - strip.height();
                    ops.push_str(&format!(
                        "q {} 0 0 {} 0 {bottom} cm /{name} Do Q\n",
                        strip.width(),
                        strip.height()
                    ));
                    top += strip.height();
                }
                contents = Some(doc.add_object(Stream::new(Dictionary::new(), ops.into_bytes())));
                dictionary! { "XObject" => xobjects }
            }
            PdfPage::TextOnly => {
                let font_id = doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                });
                dictionary! { "Font" => dictionary! { "F1" => font_id } }
            }
        };

        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources,
        };
        if let PdfPage::Rotated(_, degrees) = page {
            page_dict.set("Rotate", *degrees);
        }
        if let Some(contents) = contents {
            page_dict.set("Contents", contents);
        }
        let page_id = doc.add_object(page_dict);
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

// ── Engine ──

/// Width of the ink bounding box in a PNG crop, or `None` for a clean crop.
pub(crate) fn ink_width(image_png: &[u8]) -> Option<u32> {
    let img = image::load_from_memory(image_png).ok()?.to_luma8();
    let mut min_x = u32::MAX;
    let mut max_x = 0;
    for (x, _, p) in img.enumerate_pixels() {
        if p.0[0] < 128 {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
        }
    }
    (min_x != u32::MAX).then(|| max_x - min_x + 1)
}

/// Widths within this many pixels of a scripted width match it.
const WIDTH_TOLERANCE: u32 = 3;

#[derive(Clone)]
struct ScriptedWord {
    width: u32,
    text: String,
    confidence: f32,
    /// Transient failures left before this word succeeds; `None` = never succeeds.
    failures: Option<Arc<AtomicUsize>>,
    delay: Duration,
}

/// Deterministic engine: each region's text is looked up by its ink width.
///
/// Clones share the call counter, so a pool of clones can be observed from one
/// handle.
#[derive(Clone)]
pub(crate) struct ScriptedEngine {
    words: Vec<ScriptedWord>,
    scale: ConfidenceScale,
    unavailable: bool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self {
            words: Vec::new(),
            scale: ConfidenceScale::Unit,
            unavailable: false,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn word(mut self, width: u32, text: &str, confidence: f32) -> Self {
        self.words.push(ScriptedWord {
            width,
            text: text.to_string(),
            confidence,
            failures: Some(Arc::new(AtomicUsize::new(0))),
            delay: Duration::ZERO,
        });
        self
    }

    /// Like `word`, but the engine takes `delay` to read it.
    pub(crate) fn slow_word(mut self, width: u32, text: &str, confidence: f32, delay: Duration) -> Self {
        self.words.push(ScriptedWord {
            width,
            text: text.to_string(),
            confidence,
            failures: Some(Arc::new(AtomicUsize::new(0))),
            delay,
        });
        self
    }

    /// Region of this width fails transiently `times` times, then reads `text`.
    pub(crate) fn flaky_word(mut self, width: u32, text: &str, confidence: f32, times: usize) -> Self {
        self.words.push(ScriptedWord {
            width,
            text: text.to_string(),
            confidence,
            failures: Some(Arc::new(AtomicUsize::new(times))),
            delay: Duration::ZERO,
        });
        self
    }

    /// Region of this width always fails transiently.
    pub(crate) fn broken_word(mut self, width: u32) -> Self {
        self.words.push(ScriptedWord {
            width,
            text: String::new(),
            confidence: 0.0,
            failures: None,
            delay: Duration::ZERO,
        });
        self
    }

    pub(crate) fn percent_scale(mut self) -> Self {
        self.scale = ConfidenceScale::Percent;
        self
    }

    pub(crate) fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// `n` engines sharing this script, boxed for an `EnginePool`.
    pub(crate) fn boxed_pool(&self, n: usize) -> Vec<Box<dyn OcrEngine>> {
        (0..n)
            .map(|_| Box::new(self.clone()) as Box<dyn OcrEngine>)
            .collect()
    }
}

impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(&self, image_png: &[u8], _language: &str) -> Result<RawRecognition, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.unavailable {
            return Err(EngineError::Unavailable("scripted engine offline".into()));
        }

        let Some(width) = ink_width(image_png) else {
            return Ok(RawRecognition {
                text: String::new(),
                confidence: 0.0,
                scale: self.scale,
            });
        };

        let word = self
            .words
            .iter()
            .find(|w| w.width.abs_diff(width) <= WIDTH_TOLERANCE)
            .ok_or_else(|| EngineError::Transient(format!("no script for width {width}")))?;

        if !word.delay.is_zero() {
            std::thread::sleep(word.delay);
        }

        match &word.failures {
            None => return Err(EngineError::Transient(format!("width {width} is broken"))),
            Some(left) => {
                let failing = left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(EngineError::Transient(format!("flaky read at width {width}")));
                }
            }
        }

        let confidence = match self.scale {
            ConfidenceScale::Unit => word.confidence,
            ConfidenceScale::Percent => word.confidence * 100.0,
        };
        Ok(RawRecognition {
            text: word.text.clone(),
            confidence,
            scale: self.scale,
        })
    }

    fn ensure_language(&self, language: &str) -> Result<(), EngineError> {
        if self.unavailable {
            return Err(EngineError::Unavailable(format!(
                "scripted engine has no '{language}' data"
            )));
        }
        Ok(())
    }
}
