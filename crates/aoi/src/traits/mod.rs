use image::RgbImage;
use survey_common::GeoPoint;

use crate::{
    error::Result,
    segments::Tile,
    types::{AlgorithmKind, DetectionCandidate, ImageFrame, ImageRecord},
};

/// Trait for image preprocessing applied before detection
pub trait ImagePreprocessor: Send + Sync {
    /// Preprocess the input image (e.g., histogram normalization)
    fn preprocess(&self, image: &RgbImage) -> Result<RgbImage>;
}

/// Common contract of every detector in the bank
pub trait Detector: Send + Sync {
    /// Identifier carried by every candidate this detector emits
    fn kind(&self) -> AlgorithmKind;

    /// Detect candidates inside one tile. Rectangles are in image coordinates.
    /// Numerically degenerate tiles yield an empty list.
    fn detect(&self, tile: &Tile<'_>) -> Result<Vec<DetectionCandidate>>;
}

/// Ground elevation lookup for terrain-corrected projection
pub trait ElevationProvider: Send + Sync {
    /// Elevation above mean sea level in metres, `None` outside coverage
    fn elevation(&self, point: GeoPoint) -> Option<f64>;
}

/// Loads pixel data for a record when a worker picks it up
pub trait FrameSource: Send + Sync {
    fn load(&self, record: &ImageRecord) -> Result<ImageFrame>;
}

/// Receives progress from long-running stages
pub trait ProgressSink: Send + Sync {
    fn report(&self, completed: usize, total: usize, message: &str);
}

/// Decides whether a batch keeps going once the AOI ceiling is exceeded
pub trait CeilingConfirmation: Send + Sync {
    fn confirm(&self, total_aois: usize, ceiling: usize) -> bool;
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn report(&self, completed: usize, total: usize, message: &str) {
        self(completed, total, message)
    }
}

impl<F> CeilingConfirmation for F
where
    F: Fn(usize, usize) -> bool + Send + Sync,
{
    fn confirm(&self, total_aois: usize, ceiling: usize) -> bool {
        self(total_aois, ceiling)
    }
}

impl<F> ElevationProvider for F
where
    F: Fn(GeoPoint) -> Option<f64> + Send + Sync,
{
    fn elevation(&self, point: GeoPoint) -> Option<f64> {
        self(point)
    }
}
