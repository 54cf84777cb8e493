use nalgebra::Vector3;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    algorithms::{
        regions::{label_regions, mask_from_fn},
        stats::{rgb_sample, ChannelStats},
    },
    error::Result,
    segments::Tile,
    traits::Detector,
    types::{AlgorithmKind, DetectionCandidate},
};

/// A target colour and the filter response needed to accept a pixel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceSignature {
    pub color: [u8; 3],
    /// Minimum response, where 1.0 is a perfect match
    pub threshold: f64,
}

/// Spectral matched filter against the tile background
#[derive(Debug, Clone)]
pub struct MatchedFilterDetector {
    pub references: Vec<ReferenceSignature>,
}

impl MatchedFilterDetector {
    pub fn new(references: Vec<ReferenceSignature>) -> Self {
        Self { references }
    }
}

struct Filter {
    weights: Vector3<f64>,
    threshold: f64,
}

impl Detector for MatchedFilterDetector {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::MatchedFilter
    }

    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>> {
        let samples = tile.rgb_pixels().map(|(_, _, p)| rgb_sample(p));
        let Some(stats) = ChannelStats::estimate(samples) else {
            debug!("Matched filter: singular covariance in tile {:?}", tile.rect);
            return Ok(Vec::new());
        };

        // Normalized so a pixel equal to the reference responds with 1.0
        let filters: Vec<Filter> = self
            .references
            .iter()
            .filter_map(|reference| {
                let target = Vector3::from(rgb_sample(&image::Rgb(reference.color))) - stats.mean;
                let projected = stats.inverse * target;
                let energy = target.dot(&projected);
                (energy > f64::EPSILON).then(|| Filter {
                    weights: projected / energy,
                    threshold: reference.threshold,
                })
            })
            .collect();
        if filters.is_empty() {
            return Ok(Vec::new());
        }

        let width = tile.width();
        let scores: Vec<f64> = tile
            .rgb_pixels()
            .map(|(_, _, p)| {
                let centered = Vector3::from(rgb_sample(p)) - stats.mean;
                filters
                    .iter()
                    .map(|f| f.weights.dot(&centered))
                    .zip(&filters)
                    .filter(|(score, f)| *score >= f.threshold)
                    .map(|(score, _)| score)
                    .fold(f64::NAN, f64::max)
            })
            .collect();

        let mask = mask_from_fn(width, tile.height(), |x, y| {
            !scores[(y * width + x) as usize].is_nan()
        });

        let candidates = label_regions(&mask)
            .into_iter()
            .map(|region| {
                let mean = region.mean_score(&scores, width);
                DetectionCandidate::new(
                    region.image_bbox(tile),
                    region.area(),
                    Some(mean.clamp(0.0, 1.0) * 100.0),
                    mean,
                    self.kind(),
                )
            })
            .collect();
        Ok(candidates)
    }
}
