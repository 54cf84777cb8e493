//! Histogram rarity detector. Pixels whose quantized colour is rare within the
//! tile are grouped by window connectivity into regions.

use std::collections::VecDeque;

use crate::{
    algorithms::{color::ColorSpace, regions::inverted_range_confidence},
    error::{AoiError, Result},
    segments::Tile,
    traits::Detector,
    types::{AlgorithmKind, DetectionCandidate, PixelRect},
};

pub const HISTOGRAM_BINS: usize = 26;

/// Bin counts are rescaled to this frame size so thresholds do not depend
/// on resolution
const REFERENCE_PIXELS: f64 = 8000.0 * 6000.0;

type BinMapping = [u8; 256];

fn uniform_mapping(max_value: f64) -> BinMapping {
    let bin_size = max_value / HISTOGRAM_BINS as f64;
    std::array::from_fn(|v| ((v as f64 / bin_size) as usize).min(HISTOGRAM_BINS - 1) as u8)
}

/// Finer bins around neutral for LAB a/b: 6 bins for 0..=64, 13 for
/// 65..=192 and 7 for 193..=255
fn lab_chroma_mapping() -> BinMapping {
    let center_bins = HISTOGRAM_BINS / 2;
    let low_bins = (HISTOGRAM_BINS - center_bins) / 2;
    let high_bins = HISTOGRAM_BINS - center_bins - low_bins;
    std::array::from_fn(|v| {
        let bin = if v <= 64 {
            (v * low_bins / 65).min(low_bins - 1)
        } else if v <= 192 {
            low_bins + ((v - 65) * center_bins / 128).min(center_bins - 1)
        } else {
            low_bins + center_bins + ((v - 193) * high_bins / 63).min(high_bins - 1)
        };
        bin as u8
    })
}

/// Per-channel bin lookup for a colour space
#[derive(Debug, Clone)]
pub struct Quantizer {
    space: ColorSpace,
    mappings: [BinMapping; 3],
}

impl Quantizer {
    pub fn new(space: ColorSpace) -> Self {
        let standard = uniform_mapping(260.0);
        let mappings = match space {
            ColorSpace::Rgb => [standard; 3],
            ColorSpace::Hsv => [uniform_mapping(180.0), standard, standard],
            ColorSpace::Lab => [standard, lab_chroma_mapping(), lab_chroma_mapping()],
        };
        Self { space, mappings }
    }

    pub fn bin(&self, rgb: [u8; 3]) -> usize {
        let c = self.space.convert(rgb);
        let [b0, b1, b2] = [0, 1, 2].map(|i| self.mappings[i][c[i] as usize] as usize);
        (b0 * HISTOGRAM_BINS + b1) * HISTOGRAM_BINS + b2
    }
}

/// Multi-resolution rarity map detector
#[derive(Debug, Clone)]
pub struct MrMapDetector {
    /// Scaled bin count below which a colour is rare; lower is stricter
    pub threshold: f64,
    /// Rare pixels within this many pixels of each other share a region
    pub window: u32,
    pub quantizer: Quantizer,
    /// Downsampling factors whose rarity is averaged
    pub scales: Vec<u32>,
}

impl MrMapDetector {
    pub fn new(threshold: f64, window: u32, space: ColorSpace, scales: Vec<u32>) -> Result<Self> {
        if scales.is_empty() || scales.contains(&0) {
            return Err(AoiError::InvalidConfig("MR map scales must be non-empty and positive".into()));
        }
        Ok(Self {
            threshold,
            window,
            quantizer: Quantizer::new(space),
            scales,
        })
    }

    /// Scaled bin count per tile pixel at one downsampling factor
    fn scaled_counts(&self, tile: &Tile<'_>, scale: u32) -> Vec<f64> {
        let (w, h) = (tile.width(), tile.height());
        let (sw, sh) = (w.div_ceil(scale), h.div_ceil(scale));

        // Block-mean colour for each downsampled cell
        let mut sums = vec![[0u32; 4]; (sw * sh) as usize];
        for (x, y, p) in tile.rgb_pixels() {
            let cell = &mut sums[((y / scale) * sw + x / scale) as usize];
            for c in 0..3 {
                cell[c] += p.0[c] as u32;
            }
            cell[3] += 1;
        }
        let cell_bins: Vec<usize> = sums
            .iter()
            .map(|s| {
                let n = s[3].max(1);
                self.quantizer.bin([(s[0] / n) as u8, (s[1] / n) as u8, (s[2] / n) as u8])
            })
            .collect();

        let mut histogram = vec![0u32; HISTOGRAM_BINS.pow(3)];
        for &bin in &cell_bins {
            histogram[bin] += 1;
        }
        let factor = REFERENCE_PIXELS / (sw as f64 * sh as f64);

        let mut counts = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let bin = cell_bins[((y / scale) * sw + x / scale) as usize];
                counts.push(histogram[bin] as f64 * factor);
            }
        }
        counts
    }

    /// Breadth-first grouping where any flagged pixel inside the window joins
    fn group_window_connected(&self, rare: &[bool], width: u32, height: u32) -> Vec<(PixelRect, Vec<usize>)> {
        let mut visited = vec![false; rare.len()];
        let mut groups = Vec::new();
        let reach = self.window as i64;

        for start in 0..rare.len() {
            if !rare[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            let mut queue = VecDeque::from([start]);
            let mut members = Vec::new();
            let (sx, sy) = ((start as u32 % width), (start as u32 / width));
            let mut bbox = PixelRect::new(sx, sy, 1, 1);

            while let Some(idx) = queue.pop_front() {
                let (x, y) = ((idx as u32 % width) as i64, (idx as u32 / width) as i64);
                bbox = bbox.union(&PixelRect::new(x as u32, y as u32, 1, 1));
                members.push(idx);

                let (x0, x1) = ((x - reach).max(0), (x + reach).min(width as i64 - 1));
                let (y0, y1) = ((y - reach).max(0), (y + reach).min(height as i64 - 1));
                for ny in y0..=y1 {
                    for nx in x0..=x1 {
                        let n = (ny * width as i64 + nx) as usize;
                        if rare[n] && !visited[n] {
                            visited[n] = true;
                            queue.push_back(n);
                        }
                    }
                }
            }
            groups.push((bbox, members));
        }
        groups
    }
}

/// Merge groups until no two bounding rectangles overlap
fn merge_overlapping(mut groups: Vec<(PixelRect, Vec<usize>)>) -> Vec<(PixelRect, Vec<usize>)> {
    let mut merged = true;
    while merged {
        merged = false;
        'outer: for i in 0..groups.len() {
            for j in (i + 1)..groups.len() {
                if groups[i].0.overlaps(&groups[j].0) {
                    let (rect, members) = groups.swap_remove(j);
                    groups[i].0 = groups[i].0.union(&rect);
                    groups[i].1.extend(members);
                    merged = true;
                    break 'outer;
                }
            }
        }
    }
    groups
}

impl Detector for MrMapDetector {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::MrMap
    }

    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>> {
        let pixel_count = tile.pixel_count();
        let mut rarity = vec![0.0f64; pixel_count];
        for &scale in &self.scales {
            for (acc, count) in rarity.iter_mut().zip(self.scaled_counts(tile, scale)) {
                *acc += count;
            }
        }
        let scale_count = self.scales.len() as f64;
        rarity.iter_mut().for_each(|r| *r /= scale_count);

        let rare: Vec<bool> = rarity.iter().map(|&c| c > 0.0 && c < self.threshold).collect();
        let (min, max) = rarity
            .iter()
            .zip(&rare)
            .filter(|(_, flagged)| **flagged)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (&c, _)| (lo.min(c), hi.max(c)));

        let groups = merge_overlapping(self.group_window_connected(&rare, tile.width(), tile.height()));
        let candidates = groups
            .into_iter()
            .map(|(bbox, members)| {
                let mean = members.iter().map(|&i| rarity[i]).sum::<f64>() / members.len() as f64;
                DetectionCandidate::new(
                    bbox.translate(tile.rect.x, tile.rect.y),
                    members.len() as u32,
                    Some(inverted_range_confidence(mean, min, max)),
                    mean,
                    self.kind(),
                )
            })
            .collect();
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageFrame;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_lab_chroma_mapping_bins() {
        let m = lab_chroma_mapping();
        assert_eq!(m[0], 0);
        assert_eq!(m[64], 5);
        assert_eq!(m[65], 6);
        assert_eq!(m[128], 12);
        assert_eq!(m[192], 18);
        assert_eq!(m[193], 19);
        assert_eq!(m[255], 25);
    }

    #[test]
    fn test_uniform_mapping_covers_all_bins() {
        let m = uniform_mapping(260.0);
        assert_eq!(m[0], 0);
        assert_eq!(m[9], 0);
        assert_eq!(m[10], 1);
        assert_eq!(m[255], 25);
        let hue = uniform_mapping(180.0);
        assert_eq!(hue[179], 25);
    }

    fn scene() -> ImageFrame {
        ImageFrame::new(RgbImage::from_fn(100, 100, |x, y| {
            if (20..23).contains(&x) && (20..23).contains(&y) {
                Rgb([250, 0, 250])
            } else if (26..28).contains(&x) && (20..22).contains(&y) {
                Rgb([250, 0, 250])
            } else if (80..82).contains(&x) && (80..82).contains(&y) {
                Rgb([0, 250, 250])
            } else if x < 50 {
                Rgb([90, 110, 70])
            } else {
                Rgb([100, 90, 60])
            }
        }))
    }

    #[test]
    fn test_window_groups_nearby_rare_pixels() {
        let frame = scene();
        // one pixel scales to 4800; 13 rare pixels stay below 70000
        let detector = MrMapDetector::new(70_000.0, 5, ColorSpace::Rgb, vec![1]).unwrap();
        let mut found = detector.detect(&Tile::full(&frame)).unwrap();
        found.sort_by_key(|c| c.bbox.x);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bbox, PixelRect::new(20, 20, 8, 3));
        assert_eq!(found[0].pixel_area, 13);
        assert_eq!(found[1].bbox, PixelRect::new(80, 80, 2, 2));
        // the rarer colour group scores higher
        assert!(found[1].confidence.unwrap() > found[0].confidence.unwrap());
    }

    #[test]
    fn test_lower_threshold_is_stricter() {
        let frame = scene();
        let strict = MrMapDetector::new(20_000.0, 5, ColorSpace::Rgb, vec![1]).unwrap();
        let found = strict.detect(&Tile::full(&frame)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox.x, 80);
    }

    #[test]
    fn test_rejects_bad_scales() {
        assert!(MrMapDetector::new(50.0, 5, ColorSpace::Lab, vec![]).is_err());
        assert!(MrMapDetector::new(50.0, 5, ColorSpace::Lab, vec![0]).is_err());
    }
}
