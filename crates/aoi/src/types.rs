use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma, RgbImage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};
use survey_common::GeoPoint;

use crate::error::{AoiError, Result};

/// Identifier of the detector that produced a candidate
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlgorithmKind {
    Rx,
    ColorRange,
    HsvColorRange,
    MatchedFilter,
    ThermalRange,
    ThermalAnomaly,
    MrMap,
    LearnedModel,
}

/// Axis-aligned pixel rectangle; `x + width` and `y + height` are exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning two inclusive corner pixels
    pub fn from_inclusive(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// [`PixelRect::area`] saturated to the `u32` used for candidate areas
    pub fn pixel_area(&self) -> u32 {
        u32::try_from(self.area()).unwrap_or(u32::MAX)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn contains_pixel(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64 && x < self.right() as f64 && y >= self.y as f64 && y < self.bottom() as f64
    }

    pub fn union(&self, other: &PixelRect) -> PixelRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        PixelRect::new(x, y, right - x, bottom - y)
    }

    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| PixelRect::new(x, y, right - x, bottom - y))
    }

    pub fn overlaps(&self, other: &PixelRect) -> bool {
        self.intersection(other).is_some()
    }

    /// Shift a tile-local rectangle into image coordinates
    pub fn translate(&self, dx: u32, dy: u32) -> PixelRect {
        PixelRect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Clip to an image of the given size, `None` when nothing remains
    pub fn clip(&self, width: u32, height: u32) -> Option<PixelRect> {
        self.intersection(&PixelRect::new(0, 0, width, height))
    }
}

/// Camera intrinsics needed for ground sample distance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SensorParams {
    pub focal_length_mm: Option<f64>,
    pub sensor_width_mm: Option<f64>,
    pub sensor_height_mm: Option<f64>,
}

/// Gimbal orientation in degrees; pitch -90 is straight down
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GimbalAttitude {
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub roll: Option<f64>,
}

/// Per-image metadata captured at ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageRecord {
    /// Path or other unique identifier
    pub id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub gps: Option<GeoPoint>,
    /// Height above the take-off point in metres
    #[serde(default)]
    pub altitude_agl: Option<f64>,
    /// Absolute camera altitude in metres, used by terrain correction
    #[serde(default)]
    pub altitude_asl: Option<f64>,
    #[serde(default)]
    pub gimbal: GimbalAttitude,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thermal: bool,
    #[serde(default)]
    pub sensor: SensorParams,
}

impl ImageRecord {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            gps: None,
            altitude_agl: None,
            altitude_asl: None,
            gimbal: GimbalAttitude::default(),
            timestamp: None,
            thermal: false,
            sensor: SensorParams::default(),
        }
    }

    pub fn with_gps(mut self, latitude: f64, longitude: f64) -> Self {
        self.gps = Some(GeoPoint::new(latitude, longitude));
        self
    }

    pub fn with_altitude(mut self, altitude_agl: f64) -> Self {
        self.altitude_agl = Some(altitude_agl);
        self
    }

    pub fn with_sensor(mut self, focal_length_mm: f64, sensor_width_mm: f64, sensor_height_mm: f64) -> Self {
        self.sensor = SensorParams {
            focal_length_mm: Some(focal_length_mm),
            sensor_width_mm: Some(sensor_width_mm),
            sensor_height_mm: Some(sensor_height_mm),
        };
        self
    }

    pub fn with_gimbal(mut self, pitch: Option<f64>, yaw: Option<f64>) -> Self {
        self.gimbal.pitch = pitch;
        self.gimbal.yaw = yaw;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn center_pixel(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }
}

/// Linear conversion from raw radiometric counts to degrees Celsius
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThermalCalibration {
    pub gain: f64,
    pub offset: f64,
}

impl Default for ThermalCalibration {
    fn default() -> Self {
        // 16-bit radiometric TIFFs store 1/25 K per count
        Self { gain: 0.04, offset: -273.15 }
    }
}

/// Per-pixel temperatures in degrees Celsius
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalFrame {
    width: u32,
    height: u32,
    celsius: Vec<f32>,
}

impl ThermalFrame {
    pub fn new(width: u32, height: u32, celsius: Vec<f32>) -> Result<Self> {
        if celsius.len() != width as usize * height as usize {
            return Err(AoiError::ImageProcessing(format!(
                "Thermal frame of {}x{} needs {} values, got {}",
                width,
                height,
                width as usize * height as usize,
                celsius.len()
            )));
        }
        Ok(Self { width, height, celsius })
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let mut celsius = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                celsius.push(f(x, y));
            }
        }
        Self { width, height, celsius }
    }

    pub fn from_raw(raw: &ImageBuffer<Luma<u16>, Vec<u16>>, calibration: ThermalCalibration) -> Self {
        let celsius = raw
            .pixels()
            .map(|p| (p.0[0] as f64 * calibration.gain + calibration.offset) as f32)
            .collect();
        Self {
            width: raw.width(),
            height: raw.height(),
            celsius,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.celsius[y as usize * self.width as usize + x as usize]
    }
}

/// A box produced by an external inference step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalDetection {
    pub bbox: PixelRect,
    /// Model probability in `[0, 1]`
    pub probability: f64,
    #[serde(default)]
    pub label: Option<String>,
}

/// Everything a detector may read for one image
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub rgb: RgbImage,
    pub thermal: Option<ThermalFrame>,
    pub external: Vec<ExternalDetection>,
}

impl ImageFrame {
    pub fn new(rgb: RgbImage) -> Self {
        Self {
            rgb,
            thermal: None,
            external: Vec::new(),
        }
    }

    pub fn with_thermal(mut self, thermal: ThermalFrame) -> Self {
        self.thermal = Some(thermal);
        self
    }

    pub fn with_external(mut self, external: Vec<ExternalDetection>) -> Self {
        self.external = external;
        self
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }
}

/// Raw detector output in image pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    pub bbox: PixelRect,
    pub pixel_area: u32,
    /// `None` for detectors with no intrinsic confidence
    pub confidence: Option<f64>,
    pub raw_score: f64,
    pub method: AlgorithmKind,
}

impl DetectionCandidate {
    pub fn new(bbox: PixelRect, pixel_area: u32, confidence: Option<f64>, raw_score: f64, method: AlgorithmKind) -> Self {
        Self {
            bbox,
            pixel_area,
            confidence: confidence.map(|c| c.clamp(0.0, 100.0)),
            raw_score,
            method,
        }
    }
}

/// Where the ground elevation for a projection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ElevationSource {
    Flat,
    Terrain,
}

/// A projected ground location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoFix {
    pub point: GeoPoint,
    pub elevation_source: ElevationSource,
    pub effective_agl_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemperatureSummary {
    pub mean_celsius: f64,
    pub min_celsius: f64,
    pub max_celsius: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct AoiMetadata {
    pub mean_color: [u8; 3],
    pub temperature: Option<TemperatureSummary>,
}

/// Review state owned by downstream tools; carried through untouched
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReviewState {
    pub flagged: bool,
    pub comment: Option<String>,
}

/// A consolidated detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AreaOfInterest {
    pub id: usize,
    pub bbox: PixelRect,
    pub centroid: [f64; 2],
    pub pixel_area: u32,
    pub confidence: Option<f64>,
    pub raw_score: f64,
    pub methods: Vec<AlgorithmKind>,
    /// Number of raw candidates merged into this AOI
    pub members: usize,
    pub gps: Option<GeoFix>,
    #[serde(default)]
    pub metadata: AoiMetadata,
    #[serde(default)]
    pub review: ReviewState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_geometry() {
        let a = PixelRect::new(5, 5, 10, 10);
        let b = PixelRect::new(10, 7, 10, 10);

        assert_eq!(a.center(), (10.0, 10.0));
        assert_eq!(b.center(), (15.0, 12.0));
        assert_eq!(a.union(&b), PixelRect::new(5, 5, 15, 12));
        assert_eq!(a.intersection(&b), Some(PixelRect::new(10, 7, 5, 8)));
        assert!(a.contains_pixel(14, 14));
        assert_eq!(a.pixel_area(), 100);
        assert_eq!(PixelRect::new(0, 0, 100_000, 100_000).pixel_area(), u32::MAX);
        assert!(!a.contains_pixel(15, 14));
    }

    #[test]
    fn test_rect_clip() {
        let r = PixelRect::new(90, 90, 20, 20);
        assert_eq!(r.clip(100, 100), Some(PixelRect::new(90, 90, 10, 10)));
        assert_eq!(PixelRect::new(120, 0, 5, 5).clip(100, 100), None);
    }

    #[test]
    fn test_candidate_confidence_clamped() {
        let c = DetectionCandidate::new(PixelRect::new(0, 0, 1, 1), 1, Some(140.0), 1.0, AlgorithmKind::Rx);
        assert_eq!(c.confidence, Some(100.0));
    }

    #[test]
    fn test_thermal_from_raw() {
        let raw = ImageBuffer::from_pixel(2, 2, Luma([7500u16]));
        let frame = ThermalFrame::from_raw(&raw, ThermalCalibration::default());
        assert!((frame.get(1, 1) - 26.85).abs() < 1e-3);
        assert!(ThermalFrame::new(2, 2, vec![0.0; 3]).is_err());
    }
}
