use crate::{
    error::Result,
    segments::Tile,
    traits::Detector,
    types::{AlgorithmKind, DetectionCandidate},
};

/// Passes through boxes from an external inference step. Each box belongs to
/// the tile containing its centre, so tiling never duplicates a box.
#[derive(Debug, Clone)]
pub struct LearnedModelDetector {
    /// Minimum probability in percent
    pub confidence_threshold: f64,
}

impl LearnedModelDetector {
    pub fn new(confidence_threshold: f64) -> Self {
        Self { confidence_threshold }
    }
}

impl Detector for LearnedModelDetector {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::LearnedModel
    }

    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>> {
        let (img_w, img_h) = (tile.frame.width(), tile.frame.height());
        let candidates = tile
            .frame
            .external
            .iter()
            .filter(|d| {
                let (cx, cy) = d.bbox.center();
                tile.rect.contains_point(cx, cy)
            })
            .filter(|d| d.probability * 100.0 >= self.confidence_threshold)
            .filter_map(|d| {
                let bbox = d.bbox.clip(img_w, img_h)?;
                Some(DetectionCandidate::new(
                    bbox,
                    bbox.pixel_area(),
                    Some(d.probability * 100.0),
                    d.probability,
                    self.kind(),
                ))
            })
            .collect();
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        segments::plan_segments,
        types::{ExternalDetection, ImageFrame, PixelRect},
    };
    use image::RgbImage;

    fn frame() -> ImageFrame {
        ImageFrame::new(RgbImage::new(100, 100)).with_external(vec![
            ExternalDetection { bbox: PixelRect::new(45, 45, 10, 10), probability: 0.9, label: Some("person".into()) },
            ExternalDetection { bbox: PixelRect::new(5, 5, 4, 4), probability: 0.3, label: None },
        ])
    }

    #[test]
    fn test_threshold_in_percent() {
        let f = frame();
        let found = LearnedModelDetector::new(50.0).detect(&Tile::full(&f)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].confidence, Some(90.0));
        assert_eq!(found[0].pixel_area, 100);
    }

    #[test]
    fn test_box_spanning_tiles_reported_once() {
        let f = frame();
        let detector = LearnedModelDetector::new(0.0);
        let total: usize = plan_segments(100, 100, 4)
            .unwrap()
            .into_iter()
            .map(|rect| detector.detect(&Tile::new(rect, &f)).unwrap().len())
            .sum();
        assert_eq!(total, 2);
    }
}
