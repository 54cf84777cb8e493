use geo::{Area, ConvexHull, MultiPoint, Point};
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::{segments::Tile, types::PixelRect};

/// An 8-connected group of flagged pixels in tile-local coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub bbox: PixelRect,
    pub pixels: Vec<(u32, u32)>,
}

impl Region {
    pub fn area(&self) -> u32 {
        self.pixels.len() as u32
    }

    /// Bounding box in image coordinates
    pub fn image_bbox(&self, tile: &Tile<'_>) -> PixelRect {
        self.bbox.translate(tile.rect.x, tile.rect.y)
    }

    /// Mean of a per-pixel score stored row-major over the tile
    pub fn mean_score(&self, scores: &[f64], tile_width: u32) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .pixels
            .iter()
            .map(|&(x, y)| scores[(y * tile_width + x) as usize])
            .sum();
        sum / self.pixels.len() as f64
    }

    /// Pixel area over convex hull area, using pixel corners so that thin
    /// regions keep a non-zero hull
    pub fn solidity(&self) -> f64 {
        let mut extents: std::collections::BTreeMap<u32, (u32, u32)> = Default::default();
        for &(x, y) in &self.pixels {
            let entry = extents.entry(y).or_insert((x, x));
            entry.0 = entry.0.min(x);
            entry.1 = entry.1.max(x);
        }

        let mut corners = Vec::with_capacity(extents.len() * 4);
        for (&y, &(min_x, max_x)) in &extents {
            let (top, bottom) = (y as f64, y as f64 + 1.0);
            let (left, right) = (min_x as f64, max_x as f64 + 1.0);
            corners.push(Point::new(left, top));
            corners.push(Point::new(right, top));
            corners.push(Point::new(left, bottom));
            corners.push(Point::new(right, bottom));
        }

        let hull_area = MultiPoint::new(corners).convex_hull().unsigned_area();
        if hull_area > 0.0 {
            (self.area() as f64 / hull_area).min(1.0)
        } else {
            0.0
        }
    }
}

/// Build a tile-sized binary mask from a per-pixel predicate
pub fn mask_from_fn(width: u32, height: u32, mut flagged: impl FnMut(u32, u32) -> bool) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        if flagged(x, y) { Luma([255u8]) } else { Luma([0u8]) }
    })
}

/// Label 8-connected foreground regions of a binary mask
pub fn label_regions(mask: &GrayImage) -> Vec<Region> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut regions: Vec<Option<Region>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        if regions.len() < label {
            regions.resize(label, None);
        }
        let slot = &mut regions[label - 1];
        match slot {
            Some(region) => {
                region.bbox = region.bbox.union(&PixelRect::new(x, y, 1, 1));
                region.pixels.push((x, y));
            }
            None => {
                *slot = Some(Region {
                    bbox: PixelRect::new(x, y, 1, 1),
                    pixels: vec![(x, y)],
                });
            }
        }
    }

    regions.into_iter().flatten().collect()
}

/// Confidence for scores where the rarest or closest pixel in the tile is
/// best: maps the region mean onto the tile's detected range, inverted
pub fn inverted_range_confidence(mean: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range <= f64::EPSILON {
        return 100.0;
    }
    ((max - mean) / range * 100.0).clamp(0.0, 100.0)
}
