use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

use crate::{
    algorithms::{
        regions::{label_regions, mask_from_fn},
        stats::{rgb_sample, ChannelStats},
    },
    error::{AoiError, Result},
    segments::Tile,
    traits::Detector,
    types::{AlgorithmKind, DetectionCandidate},
};

pub const MIN_SENSITIVITY: u8 = 1;
pub const MAX_SENSITIVITY: u8 = 10;

/// Chi-square (3 dof) distance cutoff for a sensitivity level. The tail
/// probability is `10^-(sensitivity + 5)`, so higher levels need a larger
/// Mahalanobis distance to flag a pixel.
pub fn chi_square_cutoff(sensitivity: u8) -> Result<f64> {
    let sensitivity = sensitivity.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY);
    let tail = 10f64.powi(-(sensitivity as i32 + 5));
    let dist = ChiSquared::new(3.0).map_err(|e| AoiError::Numerical(e.to_string()))?;

    // sf is monotone decreasing; bisect on the survival function directly so
    // tiny tails keep their precision
    let (mut lo, mut hi) = (0.0f64, 1000.0f64);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if dist.sf(mid) > tail {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

/// Reed-Xiaoli anomaly detector over RGB channels
#[derive(Debug, Clone)]
pub struct RxDetector {
    pub sensitivity: u8,
    cutoff: f64,
}

impl RxDetector {
    pub fn new(sensitivity: u8) -> Result<Self> {
        Ok(Self {
            sensitivity,
            cutoff: chi_square_cutoff(sensitivity)?,
        })
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }
}

impl Detector for RxDetector {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Rx
    }

    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>> {
        let samples = tile.rgb_pixels().map(|(_, _, p)| rgb_sample(p));
        let Some(stats) = ChannelStats::estimate(samples) else {
            debug!("RX: singular covariance in tile {:?}, skipping", tile.rect);
            return Ok(Vec::new());
        };

        let width = tile.width();
        let scores: Vec<f64> = tile
            .rgb_pixels()
            .map(|(_, _, p)| stats.mahalanobis_sq(rgb_sample(p)))
            .collect();

        let mask = mask_from_fn(width, tile.height(), |x, y| {
            scores[(y * width + x) as usize] > self.cutoff
        });

        let candidates = label_regions(&mask)
            .into_iter()
            .map(|region| {
                let mean = region.mean_score(&scores, width);
                let confidence = 100.0 * (1.0 - self.cutoff / mean);
                DetectionCandidate::new(
                    region.image_bbox(tile),
                    region.area(),
                    Some(confidence),
                    mean,
                    self.kind(),
                )
            })
            .collect();
        Ok(candidates)
    }
}
