//! # Aerial Survey AOI Detection
//!
//! Finds areas of interest in drone survey imagery and places them on the
//! ground.
//!
//! ## Core Features
//!
//! - **Detector Bank**: RX anomaly, colour range (RGB and HSV), matched filter,
//!   thermal range and anomaly, multi-resolution rarity and external model boxes
//! - **Pipeline System**: tile each image, run every detector, merge the
//!   candidates into AOIs
//! - **Batch Orchestration**: bounded worker pool with cooperative cancellation
//!   and progress reporting
//! - **Georeferencing**: pixel to GPS through GSD and heading, with optional
//!   terrain correction
//! - **Bearing Recovery**: headings from flight logs or from GPS positions alone
//! - **Coverage and Neighbors**: surveyed area polygons and the other images
//!   that saw an AOI
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aoi::{process_survey, BatchOrchestrator, DetectionConfig, Georeferencer, RunContext, SurveyManifest};
//!
//! let config = DetectionConfig::from_file("detection.toml")?;
//! let manifest = SurveyManifest::from_file("manifest.toml")?;
//! let orchestrator = BatchOrchestrator::from_config(&config, Arc::new(manifest.frame_source()))?;
//!
//! let report = process_survey(
//!     &orchestrator,
//!     manifest.records(),
//!     None,
//!     &Georeferencer::flat(),
//!     &RunContext::default(),
//! )?;
//! aoi::io::save_aois(&report.batch.results, "aois.geojson")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Custom Pipeline
//!
//! ```rust,no_run
//! use aoi::{Pipeline, algorithms::*};
//!
//! let pipeline = Pipeline::builder()
//!     .add_detector(RxDetector::new(5)?)
//!     .add_detector(ThermalAnomalyDetector::new(3.0, AnomalyDirection::Above))
//!     .with_segments(4)
//!     .build()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod algorithms;
pub mod batch;
pub mod bearing;
pub mod config;
pub mod consolidate;
pub mod coverage;
pub mod error;
pub mod georef;
pub mod io;
pub mod neighbor;
pub mod pipeline;
pub mod segments;
pub mod traits;
pub mod typed_geojson;
pub mod types;

pub use batch::{
    process_survey, BatchOrchestrator, BatchResult, CancellationToken, ImageResult, RunContext, SurveyReport,
};
pub use bearing::{resolve_headings, BearingReport, BearingStrategy, HeadingQuality, ResolvedHeading};
pub use config::{AlgorithmConfig, DetectionConfig};
pub use consolidate::{ConsolidationConfig, Consolidator};
pub use coverage::{coverage_extent, CoverageExtent, ImageFootprint};
pub use error::{AoiError, Result};
pub use georef::{Georeferencer, SkipReason};
pub use io::{FileFrameSource, SurveyManifest};
pub use neighbor::{NeighborMatch, NeighborQuery, NeighborTracker};
pub use pipeline::{builder::PipelineBuilder, ImageDetections, Pipeline};
pub use traits::*;
pub use types::*;
