//! Page raster preprocessing: grayscale, orientation, deskew, contrast, denoise.
//!
//! Every step is a pure function over a grayscale buffer so it can be tested in
//! isolation; `PreprocessingPipeline` composes them in a fixed order.
//!
//! Key rules:
//! - DO correct orientation and skew before segmentation
//! - DO keep output deterministic (same input, same pixels)
//! - DO NOT enhance clean pages (denoise only above a noise threshold)

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma, RgbImage};
use tracing::debug;

use super::types::PageWarning;
use super::{PageError, PipelineError};

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum input size (in bytes) before rejecting.
const MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid input size in bytes (smallest valid PNG is ~67 bytes).
const MIN_DOCUMENT_BYTES: usize = 67;

/// Pixels darker than this count as ink for skew estimation.
const INK_THRESHOLD: u8 = 128;

/// Skew search range and step (degrees).
const SKEW_SEARCH_LIMIT_DEG: f32 = 5.0;
const SKEW_SEARCH_STEP_DEG: f32 = 0.25;

/// Rotations smaller than this are not worth the resampling blur.
const MIN_SKEW_CORRECTION_DEG: f32 = 0.5;

/// Relative projection gain over 0° required before rotating.
const MIN_SKEW_CONFIDENCE: f32 = 0.10;

/// Percentile clip for contrast stretching (per side).
const CONTRAST_CLIP_FRACTION: f64 = 0.005;

/// Intensity spread below which a page is treated as uniform and left alone.
const MIN_STRETCH_RANGE: u8 = 32;

/// Filtering kicks in above this noise score.
/// Clean scans score in the single digits; photocopies and faxes land
/// well above the threshold.
const NOISE_THRESHOLD: f32 = 12.0;

/// Bilateral filter spatial radius (pixels).
const BILATERAL_RADIUS: u32 = 3;

/// Bilateral filter range sigma. Smaller = stronger edge preservation.
const BILATERAL_RANGE_SIGMA: f32 = 25.0;

/// RMS contrast below which a page is blank; nothing to denoise.
const BLANK_CONTRAST: f32 = 5.0;

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

/// Preprocessed page pixels plus what was done to them.
#[derive(Debug, Clone)]
pub struct PreparedPage {
    pub pixels: GrayImage,
    pub warnings: Vec<PageWarning>,
}

/// Composes the preprocessing steps applied to every page raster.
///
/// Order: grayscale → downscale → deskew → contrast stretch → conditional denoise.
#[derive(Debug, Clone)]
pub struct PreprocessingPipeline {
    max_dimension: u32,
    noise_reducer: Option<ConditionalNoiseReducer>,
}

impl PreprocessingPipeline {
    pub fn new(max_dimension: u32, denoise_enabled: bool) -> Self {
        Self {
            max_dimension,
            noise_reducer: denoise_enabled.then(ConditionalNoiseReducer::default),
        }
    }

    pub fn process(&self, raster: &DynamicImage) -> PreparedPage {
        let mut warnings = Vec::new();

        let gray = to_grayscale(raster);
        let scaled = match downscale_to_fit(&gray, self.max_dimension) {
            Cow::Owned(scaled) => Some(scaled),
            Cow::Borrowed(_) => None,
        };
        let gray = match scaled {
            Some(scaled) => {
                warnings.push(PageWarning::Downscaled {
                    original_width: gray.width(),
                    original_height: gray.height(),
                });
                scaled
            }
            None => gray,
        };

        let mut pixels = match estimate_skew(&gray) {
            Some(skew) if skew.is_correctable() => {
                debug!(
                    angle = skew.angle_degrees,
                    confidence = skew.confidence,
                    "Correcting page skew"
                );
                warnings.push(PageWarning::SkewCorrected {
                    angle_degrees: skew.angle_degrees,
                });
                rotate_to_level(&gray, skew.angle_degrees)
            }
            _ => gray,
        };

        stretch_contrast(&mut pixels);

        if let Some(reducer) = &self.noise_reducer {
            let (denoised, noise_level) = reducer.reduce_if_needed(pixels);
            pixels = denoised;
            if let Some(noise_level) = noise_level {
                warnings.push(PageWarning::NoiseReduced { noise_level });
            }
        }

        PreparedPage { pixels, warnings }
    }
}

// ═══════════════════════════════════════════════════════════
// Orientation
// ═══════════════════════════════════════════════════════════

/// EXIF orientation (tag 0x0112) of an encoded image; 1 when absent or unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()
        .and_then(|exif| {
            exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1)
}

/// Undo the camera rotation recorded as EXIF orientation.
///
/// 2 and 4 are mirrors, 3 is a half turn, 6 and 8 are quarter turns, and
/// 5 and 7 combine a quarter turn with a mirror.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ═══════════════════════════════════════════════════════════
// Color and size
// ═══════════════════════════════════════════════════════════

/// Convert any raster to 8-bit grayscale.
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => rgb_to_gray(&other.to_rgb8()),
    }
}

/// BT.601 luma of an RGB raster.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Downscale so the longest side is at most `max_dim`, preserving aspect ratio.
/// Borrows the input when it already fits.
pub fn downscale_to_fit(img: &GrayImage, max_dim: u32) -> Cow<'_, GrayImage> {
    let (w, h) = (img.width(), img.height());
    let largest = w.max(h);

    if max_dim == 0 || largest <= max_dim {
        return Cow::Borrowed(img);
    }

    let scale = max_dim as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, max_dim);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, max_dim);

    debug!(
        from = format!("{w}x{h}"),
        to = format!("{new_w}x{new_h}"),
        "Downscaling oversized page"
    );

    Cow::Owned(image::imageops::resize(img, new_w, new_h, FilterType::Lanczos3))
}

// ═══════════════════════════════════════════════════════════
// Skew
// ═══════════════════════════════════════════════════════════

/// Estimated text-line slope of a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    /// Positive when lines descend to the right (image y grows downward).
    pub angle_degrees: f32,
    /// Relative projection-score gain of the best angle over 0°, in [0, 1].
    pub confidence: f32,
}

impl SkewEstimate {
    /// Large enough and certain enough to rotate for.
    pub fn is_correctable(&self) -> bool {
        self.angle_degrees.abs() >= MIN_SKEW_CORRECTION_DEG
            && self.confidence >= MIN_SKEW_CONFIDENCE
    }
}

/// Estimate skew via the projection-profile method.
///
/// Ink pixels are projected onto rows along each candidate slope in
/// -5..+5 degrees; the slope that packs ink into the fewest rows (highest
/// projection variance) wins.
///
/// Returns `None` if the image is too small or has insufficient ink (< 2%).
pub fn estimate_skew(img: &GrayImage) -> Option<SkewEstimate> {
    let (w, h) = (img.width(), img.height());
    if w < 50 || h < 50 {
        return None;
    }

    // Subsample large pages for speed
    let step = if (w as u64 * h as u64) > 1_000_000 { 2 } else { 1 };
    let mut ink = Vec::new();
    let mut sampled = 0usize;
    for y in (0..h).step_by(step) {
        for x in (0..w).step_by(step) {
            sampled += 1;
            if img.get_pixel(x, y).0[0] < INK_THRESHOLD {
                ink.push((x as f64, y as f64));
            }
        }
    }

    if (ink.len() as f32 / sampled.max(1) as f32) < 0.02 {
        return None;
    }

    let zero_score = projection_score(&ink, w, h, 0.0);
    let mut best_angle = 0.0f32;
    let mut best_score = zero_score;

    // 0, +0.25, -0.25, +0.5, ... so ties keep the smaller correction
    let steps = (SKEW_SEARCH_LIMIT_DEG / SKEW_SEARCH_STEP_DEG).round() as i32;
    for i in 1..=steps {
        for sign in [1.0f32, -1.0] {
            let angle = sign * i as f32 * SKEW_SEARCH_STEP_DEG;
            let score = projection_score(&ink, w, h, angle);
            if score > best_score {
                best_score = score;
                best_angle = angle;
            }
        }
    }

    let confidence = if best_score > 0.0 {
        ((best_score - zero_score) / best_score).clamp(0.0, 1.0) as f32
    } else {
        0.0
    };

    Some(SkewEstimate {
        angle_degrees: best_angle,
        confidence,
    })
}

/// Sum of squared row counts after projecting ink along `angle_deg`.
fn projection_score(ink: &[(f64, f64)], w: u32, h: u32, angle_deg: f32) -> f64 {
    let tan_a = (angle_deg as f64).to_radians().tan();
    let offset = (w as f64 * tan_a.abs()).ceil();
    let bins = (h as f64 + 2.0 * offset) as usize + 2;
    let mut projection = vec![0u32; bins];

    for &(x, y) in ink {
        let row = (y - x * tan_a + offset).round();
        if row >= 0.0 && (row as usize) < bins {
            projection[row as usize] += 1;
        }
    }

    projection.iter().map(|&c| (c as f64) * (c as f64)).sum()
}

/// Rotate a page so text lines sloped by `angle_deg` become horizontal.
///
/// Bilinear sampling around the page center; uncovered corners are white.
pub fn rotate_to_level(img: &GrayImage, angle_deg: f32) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let (sin_a, cos_a) = (angle_deg as f64).to_radians().sin_cos();
    let cx = (w as f64 - 1.0) / 2.0;
    let cy = (h as f64 - 1.0) / 2.0;

    let mut out = GrayImage::from_pixel(w, h, Luma([255]));
    for v in 0..h {
        for u in 0..w {
            let du = u as f64 - cx;
            let dv = v as f64 - cy;
            let sx = cx + du * cos_a - dv * sin_a;
            let sy = cy + du * sin_a + dv * cos_a;
            out.put_pixel(u, v, Luma([sample_bilinear(img, sx, sy)]));
        }
    }
    out
}

fn sample_bilinear(img: &GrayImage, x: f64, y: f64) -> u8 {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let at = |px: i64, py: i64| -> f64 {
        if px < 0 || py < 0 || px >= w || py >= h {
            255.0
        } else {
            img.get_pixel(px as u32, py as u32).0[0] as f64
        }
    };

    let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1, y0) * fx;
    let bottom = at(x0, y0 + 1) * (1.0 - fx) + at(x0 + 1, y0 + 1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

// ═══════════════════════════════════════════════════════════
// Contrast
// ═══════════════════════════════════════════════════════════

/// Linear percentile stretch to the full 0-255 range.
///
/// Leaves near-uniform pages untouched so faint speckle on a blank page is
/// never amplified into ink. Returns whether pixels changed.
pub fn stretch_contrast(img: &mut GrayImage) -> bool {
    let total = img.width() as u64 * img.height() as u64;
    if total == 0 {
        return false;
    }

    let mut histogram = [0u64; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let clip = (total as f64 * CONTRAST_CLIP_FRACTION) as u64;
    let lo = percentile_value(&histogram, clip);
    let hi = 255 - percentile_value_rev(&histogram, clip);

    if hi <= lo || hi - lo < MIN_STRETCH_RANGE || (lo == 0 && hi == 255) {
        return false;
    }

    let range = (hi - lo) as f32;
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        let scaled = ((v as f32 - lo as f32) / range * 255.0).round();
        *slot = scaled.clamp(0.0, 255.0) as u8;
    }

    for p in img.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
    true
}

/// Smallest intensity with more than `skip` pixels at or below it.
fn percentile_value(histogram: &[u64; 256], skip: u64) -> u8 {
    let mut seen = 0u64;
    for (v, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen > skip {
            return v as u8;
        }
    }
    255
}

/// Same as `percentile_value`, counted from the bright end (returns 255 - v).
fn percentile_value_rev(histogram: &[u64; 256], skip: u64) -> u8 {
    let mut seen = 0u64;
    for (i, &count) in histogram.iter().rev().enumerate() {
        seen += count;
        if seen > skip {
            return i as u8;
        }
    }
    255
}

/// RMS contrast: standard deviation of all pixel intensities.
/// Near-uniform pages score under 25; printed documents usually 50-100.
pub fn compute_contrast_score(img: &GrayImage) -> f32 {
    intensity_std_dev(img.pixels().map(|p| p.0[0])) as f32
}

/// Population standard deviation of a sample stream; 0 for no samples.
fn intensity_std_dev(samples: impl Iterator<Item = u8>) -> f64 {
    let (n, sum, sum_sq) = samples.fold((0u64, 0f64, 0f64), |(n, s, sq), v| {
        let v = f64::from(v);
        (n + 1, s + v, sq + v * v)
    });
    if n == 0 {
        return 0.0;
    }
    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).max(0.0).sqrt()
}

// ═══════════════════════════════════════════════════════════
// Noise
// ═══════════════════════════════════════════════════════════

/// Conditional noise reducer. Filters only degraded inputs.
///
/// Clean pages pass through untouched; noisy ones get an edge-preserving
/// bilateral approximation (pure Rust, no `imageproc` dependency).
#[derive(Debug, Clone)]
pub struct ConditionalNoiseReducer {
    /// Images with a noise level below this are left untouched.
    noise_threshold: f32,
}

impl Default for ConditionalNoiseReducer {
    fn default() -> Self {
        Self {
            noise_threshold: NOISE_THRESHOLD,
        }
    }
}

impl ConditionalNoiseReducer {
    /// Reducer that filters above `threshold` instead of the default.
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            noise_threshold: threshold,
        }
    }

    /// Returns the (possibly filtered) image and the noise level when filtering ran.
    pub fn reduce_if_needed(&self, image: GrayImage) -> (GrayImage, Option<f32>) {
        if compute_contrast_score(&image) < BLANK_CONTRAST {
            return (image, None);
        }

        let noise_level = assess_noise_level(&image);
        if noise_level < self.noise_threshold {
            debug!(noise_level, threshold = self.noise_threshold, "Clean page, skipping noise reduction");
            return (image, None);
        }

        debug!(noise_level, threshold = self.noise_threshold, "Degraded page, applying bilateral filter");
        let filtered = apply_bilateral_approximation(&image, BILATERAL_RADIUS, BILATERAL_RANGE_SIGMA);
        (filtered, Some(noise_level))
    }
}

/// Noise estimate for a page, as a standard deviation.
///
/// Splits the page into 5x5 tiles and takes the median deviation of the
/// smoothest quarter: on paper background that is sensor or copier noise,
/// not ink.
pub fn assess_noise_level(img: &GrayImage) -> f32 {
    const TILE: u32 = 5;
    let (w, h) = img.dimensions();

    let mut deviations: Vec<f64> = (0..h / TILE)
        .flat_map(|ty| (0..w / TILE).map(move |tx| (tx * TILE, ty * TILE)))
        .map(|(x0, y0)| {
            let tile = (y0..y0 + TILE).flat_map(|y| (x0..x0 + TILE).map(move |x| img.get_pixel(x, y).0[0]));
            intensity_std_dev(tile)
        })
        .collect();
    if deviations.is_empty() {
        return 0.0;
    }

    deviations.sort_by(f64::total_cmp);
    let smoothest = &deviations[..(deviations.len() / 4).max(1)];
    smoothest[smoothest.len() / 2] as f32
}

/// Edge-preserving smoothing: each pixel becomes the mean of its window,
/// weighted by how close each neighbor's intensity is to its own.
///
/// `radius` is the window half-size; smaller `range_sigma` keeps edges sharper.
pub fn apply_bilateral_approximation(img: &GrayImage, radius: u32, range_sigma: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let denom = 2.0 * range_sigma * range_sigma;

    GrayImage::from_fn(w, h, |x, y| {
        let center = f32::from(img.get_pixel(x, y).0[0]);
        let (weighted, total) = (y.saturating_sub(radius)..(y + radius + 1).min(h))
            .flat_map(|ny| (x.saturating_sub(radius)..(x + radius + 1).min(w)).map(move |nx| (nx, ny)))
            .map(|(nx, ny)| {
                let value = f32::from(img.get_pixel(nx, ny).0[0]);
                let weight = (-(value - center).powi(2) / denom).exp();
                (value * weight, weight)
            })
            .fold((0.0f32, 0.0f32), |(sv, sw), (v, w)| (sv + v, sw + w));

        // The center pixel always contributes weight 1
        Luma([(weighted / total).round().clamp(0.0, 255.0) as u8])
    })
}

// ═══════════════════════════════════════════════════════════
// Pure helper functions
// ═══════════════════════════════════════════════════════════

/// Validate document bytes before decoding.
/// Rejects payloads that are too small or too large to be a document.
pub fn validate_document_bytes(bytes: &[u8]) -> Result<(), PipelineError> {
    if bytes.len() < MIN_DOCUMENT_BYTES {
        return Err(PipelineError::Decode(format!(
            "payload too small to be valid ({} bytes)",
            bytes.len()
        )));
    }
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(PipelineError::Decode(format!(
            "payload exceeds {}MB limit",
            MAX_DOCUMENT_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Encode a grayscale image as PNG bytes (the engine wire format).
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, PageError> {
    let dynamic = DynamicImage::ImageLuma8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| PageError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
