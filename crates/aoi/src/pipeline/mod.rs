pub mod builder;

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    consolidate::Consolidator,
    error::{AoiError, Result},
    segments::{plan_segments, Tile},
    traits::{Detector, ImagePreprocessor},
    types::{AoiMetadata, AreaOfInterest, ImageFrame, PixelRect, TemperatureSummary},
};

/// Consolidated detections for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDetections {
    pub image_width: u32,
    pub image_height: u32,
    /// Raw candidates before filtering and merging
    pub candidate_count: usize,
    pub aois: Vec<AreaOfInterest>,
}

/// Per-image detection: preprocess, tile, detect, consolidate, annotate
pub struct Pipeline {
    preprocessors: Vec<Box<dyn ImagePreprocessor>>,
    detectors: Vec<Box<dyn Detector>>,
    segments: u32,
    consolidator: Consolidator,
}

impl Pipeline {
    pub fn builder() -> builder::PipelineBuilder {
        builder::PipelineBuilder::new()
    }

    pub fn new(
        preprocessors: Vec<Box<dyn ImagePreprocessor>>,
        detectors: Vec<Box<dyn Detector>>,
        segments: u32,
        consolidator: Consolidator,
    ) -> Self {
        Self {
            preprocessors,
            detectors,
            segments,
            consolidator,
        }
    }

    pub fn process(&self, frame: &ImageFrame) -> Result<ImageDetections> {
        if let Some(thermal) = &frame.thermal {
            if (thermal.width(), thermal.height()) != (frame.width(), frame.height()) {
                return Err(AoiError::ImageProcessing(format!(
                    "Thermal frame {}x{} does not match image {}x{}",
                    thermal.width(),
                    thermal.height(),
                    frame.width(),
                    frame.height()
                )));
            }
        }

        // Step 1: preprocessors in sequence
        let working: Cow<'_, ImageFrame> = if self.preprocessors.is_empty() {
            Cow::Borrowed(frame)
        } else {
            let mut rgb = frame.rgb.clone();
            for preprocessor in &self.preprocessors {
                rgb = preprocessor.preprocess(&rgb)?;
            }
            Cow::Owned(ImageFrame {
                rgb,
                thermal: frame.thermal.clone(),
                external: frame.external.clone(),
            })
        };

        // Step 2: tile plan
        let tiles = plan_segments(working.width(), working.height(), self.segments)?;

        // Step 3: every detector on every tile
        let mut candidates = Vec::new();
        for rect in &tiles {
            let tile = Tile::new(*rect, &working);
            for detector in &self.detectors {
                let found = detector.detect(&tile)?;
                trace!("{} found {} candidates in tile {:?}", detector.kind(), found.len(), rect);
                candidates.extend(found);
            }
        }
        let candidate_count = candidates.len();

        // Step 4: filter and merge
        let mut aois = self.consolidator.consolidate(candidates);

        // Step 5: describe each AOI from the unprocessed frame
        for aoi in &mut aois {
            aoi.metadata = describe_region(frame, &aoi.bbox);
        }

        debug!(
            "Processed {}x{} image: {} tiles, {} candidates, {} AOIs",
            frame.width(),
            frame.height(),
            tiles.len(),
            candidate_count,
            aois.len()
        );

        Ok(ImageDetections {
            image_width: frame.width(),
            image_height: frame.height(),
            candidate_count,
            aois,
        })
    }

    pub fn info(&self) -> String {
        let names: Vec<String> = self.detectors.iter().map(|d| d.kind().to_string()).collect();
        format!(
            "Pipeline: {} preprocessors, detectors [{}], {} segments, merge radius {} px",
            self.preprocessors.len(),
            names.join(", "),
            self.segments,
            self.consolidator.config.merge_radius
        )
    }
}

/// Mean colour and temperature statistics inside a rectangle
fn describe_region(frame: &ImageFrame, bbox: &PixelRect) -> AoiMetadata {
    let Some(rect) = bbox.clip(frame.width(), frame.height()) else {
        return AoiMetadata::default();
    };

    let mut sums = [0u64; 3];
    let mut temps = Vec::new();
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            let p = frame.rgb.get_pixel(x, y);
            for c in 0..3 {
                sums[c] += p.0[c] as u64;
            }
            if let Some(thermal) = &frame.thermal {
                temps.push(thermal.get(x, y) as f64);
            }
        }
    }
    let n = rect.area().max(1);
    let mean_color = sums.map(|s| (s / n) as u8);

    let temperature = (!temps.is_empty()).then(|| TemperatureSummary {
        mean_celsius: temps.iter().sum::<f64>() / temps.len() as f64,
        min_celsius: temps.iter().copied().fold(f64::INFINITY, f64::min),
        max_celsius: temps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    });

    AoiMetadata { mean_color, temperature }
}
