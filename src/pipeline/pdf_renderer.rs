//! PDF page raster extraction using lopdf.
//!
//! Scanned PDFs carry each page as one or more image XObjects (JPEG,
//! embedded image files, or raw pixel data). A page with several images is
//! composited from their placement in the content stream, then turned
//! upright according to the page's `/Rotate`. Pages are extracted on demand
//! so a bad page only fails itself.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use super::types::{PageWarning, PdfPageRenderer, RenderedPage};
use super::{PageError, PipelineError};

/// Parent links followed when resolving inherited page attributes.
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// Longest side of a composited page canvas.
const MAX_CANVAS_SIDE: f32 = 20_000.0;

/// Extracts embedded page scans from a parsed PDF.
pub struct LopdfImageExtractor {
    doc: Document,
    page_ids: Vec<ObjectId>,
}

impl LopdfImageExtractor {
    /// Parse a PDF. Fails with `Decode` when the bytes are not a PDF lopdf can read.
    pub fn load(pdf_bytes: &[u8]) -> Result<Self, PipelineError> {
        let doc = Document::load_mem(pdf_bytes)
            .map_err(|e| PipelineError::Decode(format!("Failed to parse PDF: {e}")))?;
        let page_ids: Vec<ObjectId> = doc.page_iter().collect();

        tracing::debug!(pages = page_ids.len(), "Parsed PDF page tree");

        Ok(Self { doc, page_ids })
    }
}

impl PdfPageRenderer for LopdfImageExtractor {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn render_page(&self, page_index: usize) -> Result<RenderedPage, PageError> {
        let &page_id = self.page_ids.get(page_index).ok_or_else(|| {
            PageError::Raster(format!(
                "page {page_index} out of range ({} pages)",
                self.page_ids.len()
            ))
        })?;

        let mut rendered = extract_page_raster(&self.doc, page_id)?;

        let rotation = page_rotation(&self.doc, page_id);
        rendered.image = match rotation {
            0 => rendered.image,
            90 => rendered.image.rotate90(),
            180 => rendered.image.rotate180(),
            270 => rendered.image.rotate270(),
            other => {
                tracing::debug!(page = page_index, rotate = other, "Ignoring /Rotate that is not a quarter turn");
                rendered.image
            }
        };

        let (width, height) = rendered.image.dimensions();
        tracing::debug!(
            page = page_index,
            width,
            height,
            rotation,
            warnings = rendered.warnings.len(),
            "Extracted image from PDF page"
        );

        Ok(rendered)
    }
}

/// Effective `/Rotate` of a page in degrees (0..360), inherited through `/Parent`.
fn page_rotation(doc: &Document, page_id: ObjectId) -> i64 {
    let mut node = doc.get_dictionary(page_id).ok();
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        let Some(dict) = node else { break };
        if let Some(rotate) = dict.get(b"Rotate").ok().and_then(|v| deref(doc, v).as_i64().ok()) {
            return rotate.rem_euclid(360);
        }
        node = sub_dictionary(doc, dict, b"Parent");
    }
    0
}

// ═══════════════════════════════════════════════════════════
// Page images
// ═══════════════════════════════════════════════════════════

/// The page scan. One image is taken as-is; several are composited by
/// placement. When placement is unknown the largest image wins and the
/// rest are reported as dropped.
fn extract_page_raster(doc: &Document, page_id: ObjectId) -> Result<RenderedPage, PageError> {
    let page = doc
        .get_dictionary(page_id)
        .map_err(|e| PageError::Raster(format!("page object unreadable: {e}")))?;
    let xobjects = sub_dictionary(doc, page, b"Resources")
        .and_then(|resources| sub_dictionary(doc, resources, b"XObject"))
        .ok_or_else(|| PageError::Raster("page has no XObject resources".into()))?;

    let images: Vec<(&[u8], &Stream)> = xobjects
        .iter()
        .filter_map(|(name, entry)| match deref(doc, entry) {
            Object::Stream(stream) if is_image(&stream.dict) => Some((name.as_slice(), stream)),
            _ => None,
        })
        .collect();

    match images.as_slice() {
        [] => return Err(PageError::Raster("page carries no image XObject".into())),
        [(_, only)] => return decode_image_stream(doc, only).map(RenderedPage::from),
        _ => {}
    }

    match image_placements(doc, page_id, &images) {
        Some(placed) if !placed.is_empty() => composite(doc, &placed).map(RenderedPage::from),
        _ => {
            let (_, largest) = images
                .iter()
                .max_by_key(|(_, stream)| pixel_area(stream))
                .ok_or_else(|| PageError::Raster("page carries no image XObject".into()))?;
            let dropped = images.len() - 1;
            tracing::warn!(dropped, "Page images have no usable placement, keeping the largest");
            Ok(RenderedPage {
                image: decode_image_stream(doc, largest)?,
                warnings: vec![PageWarning::ImagesDropped { count: dropped }],
            })
        }
    }
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Image")
}

/// Declared width x height, or the stream length when dimensions are missing.
fn pixel_area(stream: &Stream) -> u64 {
    match (int_entry(&stream.dict, b"Width"), int_entry(&stream.dict, b"Height")) {
        (Some(w), Some(h)) if w > 0 && h > 0 => w as u64 * h as u64,
        _ => stream.content.len() as u64,
    }
}

// ── Placement ──

/// PDF transformation matrix `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// `self` applied first, then `outer` (what `cm` does to the CTM).
    fn then(self, outer: Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = outer.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }
}

/// Where an image lands on the page, in user space (origin bottom-left).
struct Placement<'a> {
    stream: &'a Stream,
    left: f32,
    bottom: f32,
    width: f32,
    height: f32,
}

impl<'a> Placement<'a> {
    /// Image space is the unit square, so the CTM at `Do` is the placement.
    /// Only upright, unflipped placements are supported.
    fn from_ctm(stream: &'a Stream, ctm: Matrix) -> Option<Self> {
        let [a, b, c, d, e, f] = ctm.0;
        let upright = b.abs() < f32::EPSILON && c.abs() < f32::EPSILON && a > 0.0 && d > 0.0;
        upright.then_some(Placement {
            stream,
            left: e,
            bottom: f,
            width: a,
            height: d,
        })
    }
}

/// Images drawn by the page content, in painting order. `None` when the
/// content cannot be read or an image is drawn rotated, skewed or flipped.
fn image_placements<'a>(
    doc: &Document,
    page_id: ObjectId,
    images: &[(&[u8], &'a Stream)],
) -> Option<Vec<Placement<'a>>> {
    let bytes = doc.get_page_content(page_id).ok()?;
    let content = Content::decode(&bytes).ok()?;

    let mut ctm = Matrix::IDENTITY;
    let mut saved = Vec::new();
    let mut placed = Vec::new();

    for op in &content.operations {
        match op.operator.as_str() {
            "q" => saved.push(ctm),
            "Q" => ctm = saved.pop().unwrap_or(Matrix::IDENTITY),
            "cm" => {
                let m: Vec<f32> = op.operands.iter().filter_map(|o| o.as_float().ok()).collect();
                let m: [f32; 6] = m.try_into().ok()?;
                ctm = Matrix(m).then(ctm);
            }
            "Do" => {
                let Some(Object::Name(name)) = op.operands.first() else {
                    continue;
                };
                // Form XObjects and unknown names paint no scan
                if let Some((_, stream)) = images.iter().find(|(n, _)| *n == name.as_slice()) {
                    placed.push(Placement::from_ctm(*stream, ctm)?);
                }
            }
            _ => {}
        }
    }

    Some(placed)
}

/// Paint every placed image onto a white canvas at the resolution of the
/// sharpest image.
fn composite(doc: &Document, placed: &[Placement<'_>]) -> Result<DynamicImage, PageError> {
    let decoded = placed
        .iter()
        .map(|p| decode_image_stream(doc, p.stream).map(|img| (p, img)))
        .collect::<Result<Vec<_>, _>>()?;

    let left = placed.iter().map(|p| p.left).fold(f32::INFINITY, f32::min);
    let bottom = placed.iter().map(|p| p.bottom).fold(f32::INFINITY, f32::min);
    let right = placed.iter().map(|p| p.left + p.width).fold(f32::NEG_INFINITY, f32::max);
    let top = placed.iter().map(|p| p.bottom + p.height).fold(f32::NEG_INFINITY, f32::max);
    let (extent_w, extent_h) = (right - left, top - bottom);

    let scale = decoded
        .iter()
        .map(|(p, img)| img.width() as f32 / p.width)
        .fold(0.0_f32, f32::max)
        .min(MAX_CANVAS_SIDE / extent_w)
        .min(MAX_CANVAS_SIDE / extent_h);
    let to_px = |units: f32| (units * scale).round().max(1.0) as u32;

    let mut canvas = RgbImage::from_pixel(to_px(extent_w), to_px(extent_h), Rgb([255, 255, 255]));
    for (p, img) in &decoded {
        let (target_w, target_h) = (to_px(p.width), to_px(p.height));
        let mut rgb = img.to_rgb8();
        if rgb.dimensions() != (target_w, target_h) {
            rgb = imageops::resize(&rgb, target_w, target_h, FilterType::Triangle);
        }
        let x = ((p.left - left) * scale).round() as i64;
        let y = ((top - p.bottom - p.height) * scale).round() as i64;
        imageops::replace(&mut canvas, &rgb, x, y);
    }

    tracing::debug!(
        images = decoded.len(),
        width = canvas.width(),
        height = canvas.height(),
        "Composited page images"
    );
    Ok(DynamicImage::ImageRgb8(canvas))
}

// ═══════════════════════════════════════════════════════════
// Image streams
// ═══════════════════════════════════════════════════════════

fn decode_image_stream(doc: &Document, stream: &Stream) -> Result<DynamicImage, PageError> {
    // lopdf leaves DCTDecode alone, so a JPEG stream comes back as-is
    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    if uses_filter(&stream.dict, b"DCTDecode") {
        return image::load_from_memory(&content)
            .map_err(|e| PageError::ImageProcessing(format!("JPEG page scan unreadable: {e}")));
    }

    // Some producers embed whole image files (PNG, TIFF)
    match image::load_from_memory(&content) {
        Ok(img) => Ok(img),
        Err(_) => raw_samples_to_image(doc, &stream.dict, &content),
    }
}

fn uses_filter(dict: &Dictionary, filter: &[u8]) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == filter,
        Ok(Object::Array(chain)) => chain
            .iter()
            .any(|f| matches!(f, Object::Name(name) if name == filter)),
        _ => false,
    }
}

/// Build an image from uncompressed samples described by the stream dictionary.
fn raw_samples_to_image(doc: &Document, dict: &Dictionary, samples: &[u8]) -> Result<DynamicImage, PageError> {
    let (width, height) = match (int_entry(dict, b"Width"), int_entry(dict, b"Height")) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w as u32, h as u32),
        (w, h) => {
            return Err(PageError::ImageProcessing(format!(
                "image XObject has no usable size ({w:?} x {h:?})"
            )))
        }
    };
    let bits = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    let model = color_model(doc, dict)?;

    let built = match (bits, &model) {
        (1, ColorModel::Gray) => return unpack_bilevel(width, height, samples).map(DynamicImage::ImageLuma8),
        (8, ColorModel::Gray) => GrayImage::from_raw(width, height, take_exact(samples, width, height, 1)?)
            .map(DynamicImage::ImageLuma8),
        (8, ColorModel::Rgb) => RgbImage::from_raw(width, height, take_exact(samples, width, height, 3)?)
            .map(DynamicImage::ImageRgb8),
        (8, ColorModel::Cmyk) => RgbaImage::from_raw(width, height, cmyk_to_rgba(&take_exact(samples, width, height, 4)?))
            .map(DynamicImage::ImageRgba8),
        (1 | 2 | 4 | 8, ColorModel::Indexed { base, palette }) => {
            let indices = unpack_indices(width, height, bits as u32, samples)?;
            RgbImage::from_raw(width, height, lookup_palette(&indices, base, palette))
                .map(DynamicImage::ImageRgb8)
        }
        _ => {
            return Err(PageError::ImageProcessing(format!(
                "unsupported sample layout: {bits} bits of {}",
                model.name()
            )))
        }
    };
    built.ok_or_else(|| PageError::ImageProcessing(format!("{width}x{height} buffer rejected")))
}

/// Slice exactly `width * height * channels` bytes, failing if the buffer is short.
fn take_exact(raw: &[u8], width: u32, height: u32, channels: u32) -> Result<Vec<u8>, PageError> {
    let expected = width as usize * height as usize * channels as usize;
    raw.get(..expected).map(<[u8]>::to_vec).ok_or_else(|| {
        PageError::ImageProcessing(format!(
            "sample buffer holds {} bytes, {width}x{height}x{channels} needs {expected}",
            raw.len()
        ))
    })
}

/// 1-bit DeviceGray: rows padded to whole bytes, 0 = black.
fn unpack_bilevel(width: u32, height: u32, raw: &[u8]) -> Result<GrayImage, PageError> {
    let row_bytes = (width as usize + 7) / 8;
    if raw.len() < row_bytes * height as usize {
        return Err(PageError::ImageProcessing(format!(
            "bilevel buffer holds {} bytes, {width}x{height} needs {}",
            raw.len(),
            row_bytes * height as usize
        )));
    }

    Ok(GrayImage::from_fn(width, height, |x, y| {
        let byte = raw[y as usize * row_bytes + x as usize / 8];
        let bit = (byte >> (7 - (x % 8))) & 1;
        Luma([bit * 255])
    }))
}

/// Naive CMYK → RGB; OCR only needs luminance to be roughly right.
fn cmyk_pixel(px: &[u8]) -> [u8; 3] {
    let k = 255 - px[3] as u16;
    let channel = |c: u8| ((255 - c as u16) * k / 255) as u8;
    [channel(px[0]), channel(px[1]), channel(px[2])]
}

fn cmyk_to_rgba(cmyk: &[u8]) -> Vec<u8> {
    cmyk.chunks_exact(4)
        .flat_map(|px| {
            let [r, g, b] = cmyk_pixel(px);
            [r, g, b, 255]
        })
        .collect()
}

/// Palette indices of `bits` each, rows padded to whole bytes.
fn unpack_indices(width: u32, height: u32, bits: u32, raw: &[u8]) -> Result<Vec<u8>, PageError> {
    let row_bytes = (width as usize * bits as usize + 7) / 8;
    let needed = row_bytes * height as usize;
    if raw.len() < needed {
        return Err(PageError::ImageProcessing(format!(
            "indexed buffer holds {} bytes, {width}x{height} at {bits} bits needs {needed}",
            raw.len()
        )));
    }

    let mask = ((1u16 << bits) - 1) as u8;
    Ok(raw[..needed]
        .chunks_exact(row_bytes)
        .flat_map(|row| {
            (0..width as usize).map(move |x| {
                let bit = x * bits as usize;
                let shift = 8 - bits as usize - bit % 8;
                (row[bit / 8] >> shift) & mask
            })
        })
        .collect())
}

/// Expand palette indices to RGB. Indices past the palette clamp to its last entry.
fn lookup_palette(indices: &[u8], base: &ColorModel, palette: &[u8]) -> Vec<u8> {
    let comps = base.components();
    let last = palette.len() / comps - 1;
    indices
        .iter()
        .flat_map(|&index| {
            let start = (index as usize).min(last) * comps;
            let entry = &palette[start..start + comps];
            match base {
                ColorModel::Gray => [entry[0]; 3],
                ColorModel::Cmyk => cmyk_pixel(entry),
                _ => [entry[0], entry[1], entry[2]],
            }
        })
        .collect()
}

/// How samples map to color, from /ColorSpace.
#[derive(Debug, Clone, PartialEq)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    /// One index per pixel into `palette`, whose entries are in `base`.
    Indexed { base: Box<ColorModel>, palette: Vec<u8> },
}

impl ColorModel {
    fn components(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Indexed { .. } => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ColorModel::Gray => "gray",
            ColorModel::Rgb => "rgb",
            ColorModel::Cmyk => "cmyk",
            ColorModel::Indexed { .. } => "indexed",
        }
    }
}

/// Color model of an image. Image masks omit /ColorSpace and are gray.
fn color_model(doc: &Document, dict: &Dictionary) -> Result<ColorModel, PageError> {
    match dict.get(b"ColorSpace") {
        Ok(space) => parse_color_space(doc, deref(doc, space), true),
        Err(_) => Ok(ColorModel::Gray),
    }
}

fn parse_color_space(doc: &Document, space: &Object, allow_indexed: bool) -> Result<ColorModel, PageError> {
    let family = match space {
        Object::Name(name) => return Ok(named_color_space(name)),
        Object::Array(family) => family,
        _ => return Ok(ColorModel::Rgb),
    };

    match family.first() {
        Some(Object::Name(name)) if name == b"Indexed" && allow_indexed => indexed_color_space(doc, family),
        Some(Object::Name(name)) if name == b"Indexed" => {
            Err(PageError::ImageProcessing("nested /Indexed color space".into()))
        }
        Some(Object::Name(name)) if name == b"ICCBased" => Ok(family
            .get(1)
            .map(|profile| deref(doc, profile))
            .and_then(|profile| profile.as_stream().ok())
            .and_then(|profile| int_entry(&profile.dict, b"N"))
            .map_or(ColorModel::Rgb, |n| match n {
                1 => ColorModel::Gray,
                4 => ColorModel::Cmyk,
                _ => ColorModel::Rgb,
            })),
        Some(Object::Name(name)) => Ok(named_color_space(name)),
        _ => Ok(ColorModel::Rgb),
    }
}

fn named_color_space(name: &[u8]) -> ColorModel {
    match name {
        b"DeviceGray" | b"CalGray" | b"G" => ColorModel::Gray,
        b"DeviceCMYK" | b"CMYK" => ColorModel::Cmyk,
        _ => ColorModel::Rgb,
    }
}

/// `[/Indexed base hival lookup]`, lookup being a string or a stream.
fn indexed_color_space(doc: &Document, family: &[Object]) -> Result<ColorModel, PageError> {
    let invalid = |what: &str| PageError::ImageProcessing(format!("invalid /Indexed color space: {what}"));

    let base = family
        .get(1)
        .ok_or_else(|| invalid("missing base"))
        .and_then(|base| parse_color_space(doc, deref(doc, base), false))?;
    let hival = family
        .get(2)
        .and_then(|v| deref(doc, v).as_i64().ok())
        .filter(|h| (0..=255).contains(h))
        .ok_or_else(|| invalid("hival outside 0..=255"))?;
    let lookup = match family.get(3).map(|v| deref(doc, v)) {
        Some(Object::String(bytes, _)) => bytes.clone(),
        Some(Object::Stream(stream)) => stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone()),
        _ => return Err(invalid("missing lookup table")),
    };

    let needed = (hival as usize + 1) * base.components();
    if lookup.len() < needed {
        return Err(invalid(&format!("lookup holds {} bytes, needs {needed}", lookup.len())));
    }

    Ok(ColorModel::Indexed {
        base: Box::new(base),
        palette: lookup[..needed].to_vec(),
    })
}

/// Follow an indirect reference; anything else (or a dangling reference) is returned unchanged.
fn deref<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        direct => direct,
    }
}

fn sub_dictionary<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    dict.get(key).ok().and_then(|entry| deref(doc, entry).as_dict().ok())
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok().and_then(|v| v.as_i64().ok())
}
