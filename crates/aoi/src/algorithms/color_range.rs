use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{
        color::{hue_distance, rgb_to_hsv},
        regions::{inverted_range_confidence, label_regions, mask_from_fn},
    },
    error::Result,
    segments::Tile,
    traits::Detector,
    types::{AlgorithmKind, DetectionCandidate},
};

/// Inclusive per-channel RGB bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RgbRange {
    pub min: [u8; 3],
    pub max: [u8; 3],
}

impl RgbRange {
    /// Bounds of `tolerance` either side of a target colour
    pub fn around(color: [u8; 3], tolerance: u8) -> Self {
        Self {
            min: color.map(|c| c.saturating_sub(tolerance)),
            max: color.map(|c| c.saturating_add(tolerance)),
        }
    }

    pub fn contains(&self, rgb: [u8; 3]) -> bool {
        (0..3).all(|i| rgb[i] >= self.min[i] && rgb[i] <= self.max[i])
    }
}

/// RGB colour-range detector. Regions are scored on size and compactness.
#[derive(Debug, Clone)]
pub struct ColorRangeDetector {
    pub colors: Vec<RgbRange>,
    /// Area at which the size score saturates
    pub size_reference_area: u32,
}

impl ColorRangeDetector {
    pub fn new(colors: Vec<RgbRange>, size_reference_area: u32) -> Self {
        Self {
            colors,
            size_reference_area: size_reference_area.max(1),
        }
    }

    /// Equal-weight blend of size and solidity, scaled to 0..100
    pub fn shape_confidence(&self, area: u32, solidity: f64) -> f64 {
        let size_score = (area as f64 / self.size_reference_area as f64).min(1.0);
        (size_score + solidity) / 2.0 * 100.0
    }
}

impl Detector for ColorRangeDetector {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::ColorRange
    }

    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>> {
        if self.colors.is_empty() {
            return Ok(Vec::new());
        }
        let mask = mask_from_fn(tile.width(), tile.height(), |x, y| {
            let rgb = tile.rgb(x, y).0;
            self.colors.iter().any(|range| range.contains(rgb))
        });

        let candidates = label_regions(&mask)
            .into_iter()
            .map(|region| {
                let solidity = region.solidity();
                DetectionCandidate::new(
                    region.image_bbox(tile),
                    region.area(),
                    Some(self.shape_confidence(region.area(), solidity)),
                    solidity,
                    self.kind(),
                )
            })
            .collect();
        Ok(candidates)
    }
}

/// Inclusive HSV bounds on the OpenCV scale. When `min[0] > max[0]` the hue
/// range wraps through red.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HsvRange {
    pub min: [u8; 3],
    pub max: [u8; 3],
}

impl HsvRange {
    /// Bounds around an HSV centre; hue tolerance wraps
    pub fn around(center: [u8; 3], tolerance: [u8; 3]) -> Self {
        let hue = center[0].min(179) as i16;
        let h_tol = tolerance[0].min(89) as i16;
        Self {
            min: [
                (hue - h_tol).rem_euclid(180) as u8,
                center[1].saturating_sub(tolerance[1]),
                center[2].saturating_sub(tolerance[2]),
            ],
            max: [
                (hue + h_tol).rem_euclid(180) as u8,
                center[1].saturating_add(tolerance[1]),
                center[2].saturating_add(tolerance[2]),
            ],
        }
    }

    pub fn wraps(&self) -> bool {
        self.min[0] > self.max[0]
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        let hue_ok = if self.wraps() {
            hsv[0] >= self.min[0] || hsv[0] <= self.max[0]
        } else {
            hsv[0] >= self.min[0] && hsv[0] <= self.max[0]
        };
        hue_ok
            && (1..3).all(|i| hsv[i] >= self.min[i] && hsv[i] <= self.max[i])
    }

    /// Middle of the range, following the wrap
    pub fn center(&self) -> [u8; 3] {
        let span = if self.wraps() {
            self.max[0] as u16 + 180 - self.min[0] as u16
        } else {
            (self.max[0] - self.min[0]) as u16
        };
        [
            ((self.min[0] as u16 + span / 2) % 180) as u8,
            ((self.min[1] as u16 + self.max[1] as u16) / 2) as u8,
            ((self.min[2] as u16 + self.max[2] as u16) / 2) as u8,
        ]
    }
}

/// Weighted HSV distance with circular hue, each axis normalized to 0..1
pub fn hsv_distance(a: [u8; 3], b: [u8; 3]) -> f64 {
    let dh = hue_distance(a[0], b[0]) as f64 / 179.0;
    let ds = (a[1] as f64 - b[1] as f64).abs() / 255.0;
    let dv = (a[2] as f64 - b[2] as f64).abs() / 255.0;
    (2.0 * dh * dh + ds * ds + dv * dv).sqrt()
}

/// HSV colour-range detector. Confidence favours pixels closest to a target
/// centre relative to the other matches in the tile.
#[derive(Debug, Clone)]
pub struct HsvColorRangeDetector {
    pub colors: Vec<HsvRange>,
}

impl HsvColorRangeDetector {
    pub fn new(colors: Vec<HsvRange>) -> Self {
        Self { colors }
    }
}

impl Detector for HsvColorRangeDetector {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::HsvColorRange
    }

    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>> {
        if self.colors.is_empty() {
            return Ok(Vec::new());
        }
        let width = tile.width();
        let centers: Vec<[u8; 3]> = self.colors.iter().map(HsvRange::center).collect();

        // Distance to the nearest matching target; NaN marks unmatched pixels
        let distances: Vec<f64> = tile
            .rgb_pixels()
            .map(|(_, _, p)| {
                let hsv = rgb_to_hsv(p.0);
                self.colors
                    .iter()
                    .zip(&centers)
                    .filter(|(range, _)| range.contains(hsv))
                    .map(|(_, center)| hsv_distance(hsv, *center))
                    .fold(f64::NAN, f64::min)
            })
            .collect();

        let mask = mask_from_fn(width, tile.height(), |x, y| {
            !distances[(y * width + x) as usize].is_nan()
        });
        let regions = label_regions(&mask);
        if regions.is_empty() {
            return Ok(Vec::new());
        }

        let (min, max) = distances
            .iter()
            .filter(|d| !d.is_nan())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));

        let candidates = regions
            .into_iter()
            .map(|region| {
                let mean = region.mean_score(&distances, width);
                DetectionCandidate::new(
                    region.image_bbox(tile),
                    region.area(),
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
    use crate::types::{ImageFrame, PixelRect};
    use image::{Rgb, RgbImage};

    fn two_patch_image() -> ImageFrame {
        ImageFrame::new(RgbImage::from_fn(60, 60, |x, y| {
            if (5..15).contains(&x) && (5..15).contains(&y) {
                Rgb([220, 30, 30])
            } else if (40..44).contains(&x) && (40..44).contains(&y) {
                Rgb([30, 30, 220])
            } else {
                Rgb([60, 120, 60])
            }
        }))
    }

    #[test]
    fn test_rgb_range_union_of_targets() {
        let frame = two_patch_image();
        let red_only = ColorRangeDetector::new(vec![RgbRange::around([220, 30, 30], 20)], 100);
        assert_eq!(red_only.detect(&Tile::full(&frame)).unwrap().len(), 1);

        let both = ColorRangeDetector::new(
            vec![RgbRange::around([220, 30, 30], 20), RgbRange::around([30, 30, 220], 20)],
            100,
        );
        let mut found = both.detect(&Tile::full(&frame)).unwrap();
        found.sort_by_key(|c| c.bbox.x);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bbox, PixelRect::new(5, 5, 10, 10));
        // full square at the reference size: size 1.0, solidity 1.0
        assert!((found[0].confidence.unwrap() - 100.0).abs() < 1e-9);
        // 16 px square: size 0.16, solidity 1.0
        assert!((found[1].confidence.unwrap() - 58.0).abs() < 1e-9);
    }

    #[test]
    fn test_tile_offsets_are_applied() {
        let frame = two_patch_image();
        let detector = ColorRangeDetector::new(vec![RgbRange::around([30, 30, 220], 20)], 100);
        let tile = Tile::new(PixelRect::new(30, 30, 30, 30), &frame);
        let found = detector.detect(&tile).unwrap();
        assert_eq!(found[0].bbox, PixelRect::new(40, 40, 4, 4));
    }

    #[test]
    fn test_hsv_range_wraps_through_red() {
        let range = HsvRange::around([2, 200, 200], [10, 60, 60]);
        assert!(range.wraps());
        assert_eq!(range.min[0], 172);
        assert_eq!(range.max[0], 12);
        assert!(range.contains([178, 200, 200]));
        assert!(range.contains([5, 200, 200]));
        assert!(!range.contains([90, 200, 200]));
        assert_eq!(range.center()[0], 2);
    }

    #[test]
    fn test_hsv_detector_scores_closest_highest() {
        let frame = ImageFrame::new(RgbImage::from_fn(40, 20, |x, y| {
            if (2..8).contains(&x) && (2..8).contains(&y) {
                Rgb([200, 43, 43])
            } else if (20..26).contains(&x) && (2..8).contains(&y) {
                Rgb([240, 90, 90])
            } else {
                Rgb([0, 160, 0])
            }
        }));
        let target = rgb_to_hsv([200, 43, 43]);
        assert_eq!(target, [0, 200, 200]);
        let detector = HsvColorRangeDetector::new(vec![HsvRange::around(target, [8, 50, 50])]);
        let mut found = detector.detect(&Tile::full(&frame)).unwrap();
        found.sort_by_key(|c| c.bbox.x);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].confidence, Some(100.0));
        assert_eq!(found[1].confidence, Some(0.0));
    }
}
