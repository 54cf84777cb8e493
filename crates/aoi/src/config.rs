use std::{fs, path::{Path, PathBuf}};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};

use crate::{
    algorithms::{
        AnomalyDirection, ColorRangeDetector, ColorSpace, HsvColorRangeDetector, HsvRange,
        LearnedModelDetector, MatchedFilterDetector, MrMapDetector, ReferenceSignature, RgbRange,
        RxDetector, ThermalAnomalyDetector, ThermalRangeDetector,
        rx::{MAX_SENSITIVITY, MIN_SENSITIVITY},
    },
    consolidate::{ConsolidationConfig, DEFAULT_MERGE_RADIUS},
    error::{AoiError, Result},
    segments::grid_shape,
    traits::Detector,
    types::AlgorithmKind,
};

pub const MAX_WORKERS: usize = 20;

/// Size-score reference for colour-range regions when no maximum area is set
pub const DEFAULT_SIZE_REFERENCE_AREA: u32 = 1000;

fn default_sensitivity() -> u8 {
    5
}

fn default_mr_threshold() -> f64 {
    50.0
}

fn default_window() -> u32 {
    5
}

fn default_scales() -> Vec<u32> {
    vec![1, 2, 4]
}

fn default_anomaly_threshold() -> f64 {
    3.0
}

fn default_model_threshold() -> f64 {
    50.0
}

/// One detector of the bank with its parameters
#[derive(
    Debug, Clone,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq
)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlgorithmConfig {
    /// Reed-Xiaoli anomaly detection against the tile background
    Rx {
        #[serde(default = "default_sensitivity")]
        #[schemars(range(min = 1, max = 10))]
        sensitivity: u8,
    },

    /// Per-channel RGB boxes
    ColorRange { colors: Vec<RgbRange> },

    /// HSV boxes on the 0..179 hue scale, wrapping through red
    HsvColorRange { colors: Vec<HsvRange> },

    MatchedFilter { references: Vec<ReferenceSignature> },

    ThermalRange { min_celsius: f64, max_celsius: f64 },

    ThermalAnomaly {
        /// Standard deviations from the tile mean
        #[serde(default = "default_anomaly_threshold")]
        threshold: f64,
        #[serde(default)]
        direction: AnomalyDirection,
    },

    /// Multi-resolution colour rarity
    MrMap {
        #[serde(default = "default_mr_threshold")]
        threshold: f64,
        #[serde(default = "default_window")]
        window: u32,
        #[serde(default)]
        colorspace: ColorSpace,
        #[serde(default = "default_scales")]
        scales: Vec<u32>,
    },

    /// Boxes from an external inference step
    LearnedModel {
        #[serde(default = "default_model_threshold")]
        #[schemars(range(min = 0.0, max = 100.0))]
        confidence_threshold: f64,
    },
}

impl AlgorithmConfig {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Self::Rx { .. } => AlgorithmKind::Rx,
            Self::ColorRange { .. } => AlgorithmKind::ColorRange,
            Self::HsvColorRange { .. } => AlgorithmKind::HsvColorRange,
            Self::MatchedFilter { .. } => AlgorithmKind::MatchedFilter,
            Self::ThermalRange { .. } => AlgorithmKind::ThermalRange,
            Self::ThermalAnomaly { .. } => AlgorithmKind::ThermalAnomaly,
            Self::MrMap { .. } => AlgorithmKind::MrMap,
            Self::LearnedModel { .. } => AlgorithmKind::LearnedModel,
        }
    }

    pub fn algorithm_names() -> &'static [&'static str] {
        <Self as VariantNames>::VARIANTS
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Rx { .. } => "Statistical anomaly detection on RGB channels (Reed-Xiaoli)",
            Self::ColorRange { .. } => "Regions whose RGB values fall inside target boxes",
            Self::HsvColorRange { .. } => "Regions whose HSV values fall inside target boxes",
            Self::MatchedFilter { .. } => "Spectral matched filter against reference colours",
            Self::ThermalRange { .. } => "Regions inside an absolute temperature band",
            Self::ThermalAnomaly { .. } => "Regions far from the tile's mean temperature",
            Self::MrMap { .. } => "Colours that are rare within the tile across scales",
            Self::LearnedModel { .. } => "Boxes from an external object detection model",
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AoiError::InvalidConfig(msg));
        match self {
            Self::Rx { sensitivity } if !(MIN_SENSITIVITY..=MAX_SENSITIVITY).contains(sensitivity) => {
                invalid(format!("RX sensitivity {sensitivity} outside {MIN_SENSITIVITY}..={MAX_SENSITIVITY}"))
            }
            Self::ThermalRange { min_celsius, max_celsius } if min_celsius > max_celsius => {
                invalid(format!("Thermal range {min_celsius}..{max_celsius} is empty"))
            }
            Self::ThermalAnomaly { threshold, .. } if *threshold <= 0.0 => {
                invalid(format!("Thermal anomaly threshold must be positive, got {threshold}"))
            }
            Self::MrMap { scales, .. } if scales.is_empty() || scales.contains(&0) => {
                invalid("MR map scales must be non-empty and positive".into())
            }
            Self::LearnedModel { confidence_threshold } if !(0.0..=100.0).contains(confidence_threshold) => {
                invalid(format!("Model threshold {confidence_threshold} outside 0..=100"))
            }
            _ => Ok(()),
        }
    }

    /// Instantiate the detector. `size_reference_area` scales RGB colour
    /// confidence.
    pub fn build(&self, size_reference_area: u32) -> Result<Box<dyn Detector>> {
        self.validate()?;
        let detector: Box<dyn Detector> = match self {
            Self::Rx { sensitivity } => Box::new(RxDetector::new(*sensitivity)?),
            Self::ColorRange { colors } => Box::new(ColorRangeDetector::new(colors.clone(), size_reference_area)),
            Self::HsvColorRange { colors } => Box::new(HsvColorRangeDetector::new(colors.clone())),
            Self::MatchedFilter { references } => Box::new(MatchedFilterDetector::new(references.clone())),
            Self::ThermalRange { min_celsius, max_celsius } => {
                Box::new(ThermalRangeDetector::new(*min_celsius, *max_celsius))
            }
            Self::ThermalAnomaly { threshold, direction } => {
                Box::new(ThermalAnomalyDetector::new(*threshold, *direction))
            }
            Self::MrMap { threshold, window, colorspace, scales } => {
                Box::new(MrMapDetector::new(*threshold, *window, *colorspace, scales.clone())?)
            }
            Self::LearnedModel { confidence_threshold } => Box::new(LearnedModelDetector::new(*confidence_threshold)),
        };
        Ok(detector)
    }
}

/// Detection and consolidation settings for a survey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DetectionConfig {
    pub algorithms: Vec<AlgorithmConfig>,
    /// Tiles per image, one of 1, 2, 4, 6, 9, 16, 25, 36
    pub segments: u32,
    pub min_area: u32,
    pub max_area: Option<u32>,
    #[schemars(range(min = 0.0, max = 100.0))]
    pub confidence_threshold: f64,
    /// Pixels between candidate centres for merging
    pub merge_radius: f64,
    pub combine_aois: bool,
    /// Total AOI count that triggers a continue-or-stop decision
    pub aoi_ceiling: Option<usize>,
    #[schemars(range(min = 1, max = 20))]
    pub workers: usize,
    /// Reference image for histogram normalization
    pub histogram_reference: Option<PathBuf>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            algorithms: vec![AlgorithmConfig::Rx { sensitivity: default_sensitivity() }],
            segments: 1,
            min_area: 10,
            max_area: None,
            confidence_threshold: 0.0,
            merge_radius: DEFAULT_MERGE_RADIUS,
            combine_aois: true,
            aoi_ceiling: None,
            workers: 4,
            histogram_reference: None,
        }
    }
}

impl DetectionConfig {
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DetectionConfig)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }

    pub fn consolidation(&self) -> ConsolidationConfig {
        ConsolidationConfig {
            min_area: self.min_area,
            max_area: self.max_area,
            confidence_threshold: self.confidence_threshold,
            merge_radius: self.merge_radius,
            combine_aois: self.combine_aois,
        }
    }

    pub fn validate(&self) -> Result<()> {
        grid_shape(self.segments)?;
        if self.algorithms.is_empty() {
            return Err(AoiError::InvalidConfig("At least one algorithm must be configured".into()));
        }
        if let Some(max) = self.max_area {
            if max < self.min_area {
                return Err(AoiError::InvalidConfig(format!(
                    "max_area {max} is smaller than min_area {}",
                    self.min_area
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return Err(AoiError::InvalidConfig(format!(
                "Confidence threshold {} outside 0..=100",
                self.confidence_threshold
            )));
        }
        if !self.merge_radius.is_finite() || self.merge_radius < 0.0 {
            return Err(AoiError::InvalidConfig(format!("Invalid merge radius {}", self.merge_radius)));
        }
        self.algorithms.iter().try_for_each(AlgorithmConfig::validate)
    }

    pub fn build_detectors(&self) -> Result<Vec<Box<dyn Detector>>> {
        let reference = self.max_area.unwrap_or(DEFAULT_SIZE_REFERENCE_AREA);
        self.algorithms.iter().map(|a| a.build(reference)).collect()
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load by file extension, `.toml` or `.json`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&fs::read_to_string(path)?),
            Some("json") => Self::from_json(&fs::read_to_string(path)?),
            _ => Err(AoiError::UnsupportedFileFormat(path.display().to_string())),
        }
    }
}
