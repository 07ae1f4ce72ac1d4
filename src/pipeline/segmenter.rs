//! Heuristic page layout analysis.
//!
//! Binarize (Otsu) → 8-connected components → lines by vertical gap →
//! segments by horizontal gap → blocks by larger vertical gap. Deterministic:
//! the same page always yields the same regions in the same order.

use image::GrayImage;
use tracing::debug;

use super::types::{BoundingBox, OrderingKey, PageImage, Region, RegionKind};
use crate::config::SegmentationConfig;

/// Splits a normalized page into ordered, non-overlapping text regions.
#[derive(Debug, Clone, Default)]
pub struct PageSegmenter {
    config: SegmentationConfig,
}

impl PageSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    /// Regions of `page` in reading order. A blank page yields an empty Vec.
    pub fn segment(&self, page: &PageImage) -> Vec<Region> {
        let Some(mask) = binarize(&page.pixels, self.config.min_contrast) else {
            debug!(page = page.index, "No foreground, blank page");
            return Vec::new();
        };

        let components: Vec<BoundingBox> = connected_components(&mask)
            .into_iter()
            .filter(|c| c.area >= self.config.min_component_area as u64)
            .map(|c| c.bbox)
            .collect();

        if components.is_empty() {
            debug!(page = page.index, "Only noise components, blank page");
            return Vec::new();
        }

        let lines = self.group_lines(components);
        let blocks = self.group_blocks(&lines);
        let regions = match self.config.granularity {
            RegionKind::Line => line_regions(&lines, &blocks),
            RegionKind::Block => block_regions(&lines, &blocks),
        };

        debug!(
            page = page.index,
            lines = lines.len(),
            blocks = blocks.last().map_or(0, |b| b + 1),
            regions = regions.len(),
            "Segmented page"
        );

        regions
    }

    /// Cluster components into horizontal bands, then split bands at wide gaps.
    fn group_lines(&self, mut components: Vec<BoundingBox>) -> Vec<TextLine> {
        let median_height = median(components.iter().map(|c| c.height));
        let line_gap = (median_height as f32 * self.config.line_gap_factor).round() as u32;

        components.sort_by_key(|c| (c.y, c.x));

        let mut bands: Vec<(u32, u32, Vec<BoundingBox>)> = Vec::new();
        for comp in components {
            match bands.last_mut() {
                Some((_, bottom, members)) if comp.y <= *bottom + line_gap => {
                    *bottom = (*bottom).max(comp.bottom());
                    members.push(comp);
                }
                _ => bands.push((comp.y, comp.bottom(), vec![comp])),
            }
        }

        bands
            .into_iter()
            .map(|(top, bottom, members)| {
                let segment_gap =
                    ((bottom - top) as f32 * self.config.segment_gap_factor).round().max(1.0) as u32;
                TextLine {
                    top,
                    bottom,
                    segments: split_segments(members, segment_gap),
                }
            })
            .collect()
    }

    /// Block index for every line: a new block starts after a wide vertical gap.
    fn group_blocks(&self, lines: &[TextLine]) -> Vec<usize> {
        let median_line = median(lines.iter().map(|l| l.bottom - l.top));
        let block_gap = (median_line as f32 * self.config.block_gap_factor).round() as u32;

        let mut blocks = Vec::with_capacity(lines.len());
        let mut current = 0usize;
        for (i, line) in lines.iter().enumerate() {
            if i > 0 && line.top.saturating_sub(lines[i - 1].bottom) > block_gap {
                current += 1;
            }
            blocks.push(current);
        }
        blocks
    }
}

/// One horizontal band of text.
#[derive(Debug, Clone)]
struct TextLine {
    top: u32,
    bottom: u32,
    /// Disjoint horizontal segments, left to right.
    segments: Vec<BoundingBox>,
}

impl TextLine {
    fn bbox(&self) -> BoundingBox {
        self.segments
            .iter()
            .skip(1)
            .fold(self.segments[0], |acc, s| acc.union(s))
    }
}

fn split_segments(mut members: Vec<BoundingBox>, gap: u32) -> Vec<BoundingBox> {
    members.sort_by_key(|c| (c.x, c.y));

    let mut segments: Vec<BoundingBox> = Vec::new();
    for comp in members {
        match segments.last_mut() {
            Some(seg) if comp.x <= seg.right() + gap => *seg = seg.union(&comp),
            _ => segments.push(comp),
        }
    }
    segments
}

fn line_regions(lines: &[TextLine], blocks: &[usize]) -> Vec<Region> {
    let mut regions = Vec::new();
    for (line_index, line) in lines.iter().enumerate() {
        for segment in &line.segments {
            let seq = regions.len();
            regions.push(Region {
                bbox: *segment,
                kind: RegionKind::Line,
                line: line_index,
                block: blocks[line_index],
                key: OrderingKey {
                    y: line.top,
                    x: segment.x,
                    seq,
                },
            });
        }
    }
    regions
}

fn block_regions(lines: &[TextLine], blocks: &[usize]) -> Vec<Region> {
    let mut regions: Vec<Region> = Vec::new();
    for (line_index, line) in lines.iter().enumerate() {
        let block = blocks[line_index];
        let line_box = line.bbox();
        match regions.last_mut() {
            Some(region) if region.block == block => region.bbox = region.bbox.union(&line_box),
            _ => {
                let seq = regions.len();
                regions.push(Region {
                    bbox: line_box,
                    kind: RegionKind::Block,
                    line: line_index,
                    block,
                    key: OrderingKey {
                        y: line.top,
                        x: 0,
                        seq,
                    },
                });
            }
        }
    }

    for region in &mut regions {
        region.key.x = region.bbox.x;
    }
    regions
}

// ═══════════════════════════════════════════════════════════
// Binarization and components
// ═══════════════════════════════════════════════════════════

/// Foreground mask, row-major.
#[derive(Debug, Clone)]
struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    fn get(&self, x: u32, y: u32) -> bool {
        self.bits[(y * self.width + x) as usize]
    }
}

/// Otsu binarization. `None` when the page has no meaningful contrast.
///
/// Foreground is the minority class, so light-on-dark pages work too.
fn binarize(img: &GrayImage, min_contrast: u8) -> Option<Mask> {
    let total = img.width() as u64 * img.height() as u64;
    if total == 0 {
        return None;
    }

    let mut histogram = [0u64; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let min = histogram.iter().position(|&c| c > 0)? as u8;
    let max = 255 - histogram.iter().rev().position(|&c| c > 0)? as u8;
    if max - min < min_contrast {
        return None;
    }

    let threshold = otsu_threshold(&histogram, total);
    let dark = histogram[..=threshold as usize].iter().sum::<u64>();
    let dark_is_ink = dark * 2 <= total;

    let bits = img
        .pixels()
        .map(|p| (p.0[0] <= threshold) == dark_is_ink)
        .collect();

    Some(Mask {
        width: img.width(),
        height: img.height(),
        bits,
    })
}

/// Threshold maximizing between-class variance; class 0 is `0..=t`.
fn otsu_threshold(histogram: &[u64; 256], total: u64) -> u8 {
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &c)| v as f64 * c as f64)
        .sum();

    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0f64;
    let mut best = (0u8, f64::NEG_INFINITY);

    for t in 0..256usize {
        weight_bg += histogram[t];
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * histogram[t] as f64;

        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let between = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best.1 {
            best = (t as u8, between);
        }
    }
    best.0
}

#[derive(Debug, Clone, Copy)]
struct Component {
    bbox: BoundingBox,
    area: u64,
}

/// 8-connected components of the mask, in scan order.
fn connected_components(mask: &Mask) -> Vec<Component> {
    let (w, h) = (mask.width, mask.height);
    let mut visited = vec![false; mask.bits.len()];
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if visited[idx] || !mask.get(x, y) {
                continue;
            }

            visited[idx] = true;
            stack.push((x, y));
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
            let mut area = 0u64;

            while let Some((cx, cy)) = stack.pop() {
                area += 1;
                min_x = min_x.min(cx);
                max_x = max_x.max(cx);
                min_y = min_y.min(cy);
                max_y = max_y.max(cy);

                for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                        let nidx = (ny * w + nx) as usize;
                        if !visited[nidx] && mask.get(nx, ny) {
                            visited[nidx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            components.push(Component {
                bbox: BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1),
                area,
            });
        }
    }

    components
}

fn median(values: impl Iterator<Item = u32>) -> u32 {
    let mut values: Vec<u32> = values.collect();
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    values[values.len() / 2]
}
