use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    algorithms::regions::{label_regions, mask_from_fn},
    error::Result,
    segments::Tile,
    traits::Detector,
    types::{AlgorithmKind, DetectionCandidate},
};

/// Flags pixels whose temperature lies within `[min_celsius, max_celsius]`.
/// Range matches carry no intrinsic confidence.
#[derive(Debug, Clone)]
pub struct ThermalRangeDetector {
    pub min_celsius: f64,
    pub max_celsius: f64,
}

impl ThermalRangeDetector {
    pub fn new(min_celsius: f64, max_celsius: f64) -> Self {
        Self { min_celsius, max_celsius }
    }
}

impl Detector for ThermalRangeDetector {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::ThermalRange
    }

    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>> {
        let Some(temperatures) = tile_temperatures(tile) else {
            debug!("Thermal range: frame has no temperature data");
            return Ok(Vec::new());
        };
        let width = tile.width();
        let mask = mask_from_fn(width, tile.height(), |x, y| {
            let t = temperatures[(y * width + x) as usize];
            t >= self.min_celsius && t <= self.max_celsius
        });

        let candidates = label_regions(&mask)
            .into_iter()
            .map(|region| {
                let mean = region.mean_score(&temperatures, width);
                DetectionCandidate::new(region.image_bbox(tile), region.area(), None, mean, self.kind())
            })
            .collect();
        Ok(candidates)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyDirection {
    #[default]
    AboveOrBelow,
    Above,
    Below,
}

impl AnomalyDirection {
    fn accepts(self, z: f64, threshold: f64) -> bool {
        match self {
            AnomalyDirection::AboveOrBelow => z.abs() > threshold,
            AnomalyDirection::Above => z > threshold,
            AnomalyDirection::Below => z < -threshold,
        }
    }
}

/// Flags pixels more than `threshold` standard deviations from the tile mean
#[derive(Debug, Clone)]
pub struct ThermalAnomalyDetector {
    pub threshold: f64,
    pub direction: AnomalyDirection,
}

impl ThermalAnomalyDetector {
    pub fn new(threshold: f64, direction: AnomalyDirection) -> Self {
        Self { threshold, direction }
    }
}

impl Detector for ThermalAnomalyDetector {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::ThermalAnomaly
    }

    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>> {
        let Some(temperatures) = tile_temperatures(tile) else {
            debug!("Thermal anomaly: frame has no temperature data");
            return Ok(Vec::new());
        };
        let n = temperatures.len() as f64;
        let mean = temperatures.iter().sum::<f64>() / n;
        let variance = temperatures.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
        let sigma = variance.sqrt();
        if !sigma.is_finite() || sigma <= f64::EPSILON {
            debug!("Thermal anomaly: zero variance in tile {:?}", tile.rect);
            return Ok(Vec::new());
        }

        let z_scores: Vec<f64> = temperatures.iter().map(|t| (t - mean) / sigma).collect();
        let width = tile.width();
        let mask = mask_from_fn(width, tile.height(), |x, y| {
            self.direction.accepts(z_scores[(y * width + x) as usize], self.threshold)
        });

        let candidates = label_regions(&mask)
            .into_iter()
            .map(|region| {
                let mean_z = region.mean_score(&z_scores, width);
                let confidence = 100.0 * (1.0 - self.threshold / mean_z.abs());
                let mean_t = region.mean_score(&temperatures, width);
                DetectionCandidate::new(region.image_bbox(tile), region.area(), Some(confidence), mean_t, self.kind())
            })
            .collect();
        Ok(candidates)
    }
}

fn tile_temperatures(tile: &Tile<'_>) -> Option<Vec<f64>> {
    tile.frame.thermal.as_ref()?;
    let (w, h) = (tile.width(), tile.height());
    (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| tile.celsius(x, y).map(f64::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageFrame, PixelRect, ThermalFrame};
    use image::RgbImage;

    fn frame(hot: f32, cold: f32) -> ImageFrame {
        let thermal = ThermalFrame::from_fn(50, 50, |x, y| {
            if (10..14).contains(&x) && (10..14).contains(&y) {
                hot
            } else if (30..33).contains(&x) && (30..33).contains(&y) {
                cold
            } else {
                20.0 + ((x + y) % 3) as f32 * 0.5
            }
        });
        ImageFrame::new(RgbImage::new(50, 50)).with_thermal(thermal)
    }

    #[test]
    fn test_range_mode_is_unscored() {
        let detector = ThermalRangeDetector::new(35.0, 40.0);
        let found = detector.detect(&Tile::full(&frame(37.0, 5.0))).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox, PixelRect::new(10, 10, 4, 4));
        assert_eq!(found[0].confidence, None);
        assert!((found[0].raw_score - 37.0).abs() < 1e-6);
    }

    #[test]
    fn test_anomaly_directions() {
        let f = frame(45.0, 2.0);
        let tile = Tile::full(&f);

        let both = ThermalAnomalyDetector::new(3.0, AnomalyDirection::AboveOrBelow);
        assert_eq!(both.detect(&tile).unwrap().len(), 2);

        let above = ThermalAnomalyDetector::new(3.0, AnomalyDirection::Above).detect(&tile).unwrap();
        assert_eq!(above.len(), 1);
        assert_eq!(above[0].bbox.x, 10);

        let below = ThermalAnomalyDetector::new(3.0, AnomalyDirection::Below).detect(&tile).unwrap();
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].bbox.x, 30);
        assert!(below[0].confidence.unwrap() > 0.0);
    }

    #[test]
    fn test_missing_or_flat_thermal() {
        let plain = ImageFrame::new(RgbImage::new(8, 8));
        let detector = ThermalAnomalyDetector::new(2.0, AnomalyDirection::Above);
        assert!(detector.detect(&Tile::full(&plain)).unwrap().is_empty());

        let flat = ImageFrame::new(RgbImage::new(8, 8)).with_thermal(ThermalFrame::from_fn(8, 8, |_, _| 21.0));
        assert!(detector.detect(&Tile::full(&flat)).unwrap().is_empty());
    }
}
