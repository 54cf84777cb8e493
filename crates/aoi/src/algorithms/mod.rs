pub mod color;
pub mod color_range;
pub mod learned;
pub mod matched_filter;
pub mod mr_map;
pub mod preprocessing;
pub mod regions;
pub mod rx;
pub mod stats;
pub mod thermal;

pub use color::ColorSpace;
pub use color_range::{ColorRangeDetector, HsvColorRangeDetector, HsvRange, RgbRange};
pub use learned::LearnedModelDetector;
pub use matched_filter::{MatchedFilterDetector, ReferenceSignature};
pub use mr_map::MrMapDetector;
pub use preprocessing::{HistogramMatchPreprocessor, HistogramReference};
pub use rx::RxDetector;
pub use thermal::{AnomalyDirection, ThermalAnomalyDetector, ThermalRangeDetector};
