//! Heading recovery for images that lack a recorded gimbal yaw.

pub mod infer;
pub mod track;

use std::{collections::HashMap, path::PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use survey_common::geodesy::normalize_heading;
use tracing::{info, warn};

use crate::{batch::RunContext, types::ImageRecord};

pub use infer::{infer_from_gps, GpsInference};
pub use track::{FlightTrack, TrackFormat, TrackPoint};

/// How a heading was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HeadingSource {
    GimbalYaw,
    Kml,
    Gpx,
    Csv,
    /// Course between neighbouring images
    PrevNext,
    /// Stable course of the leg the image continues
    PrevLeg,
    /// Stable course of the leg the image starts
    NextLeg,
    /// Carried over a hover or very short leg
    CarriedForward,
}

impl From<TrackFormat> for HeadingSource {
    fn from(format: TrackFormat) -> Self {
        match format {
            TrackFormat::Csv => HeadingSource::Csv,
            TrackFormat::Gpx => HeadingSource::Gpx,
            TrackFormat::Kml => HeadingSource::Kml,
        }
    }
}

/// Reliability flag attached to every recovered heading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HeadingQuality {
    Good,
    TurnInferred,
    HoverEstimate,
    /// Outside the track or across a long time gap
    Gap,
}

impl HeadingQuality {
    pub fn confidence(self) -> f64 {
        match self {
            HeadingQuality::Good => 1.0,
            HeadingQuality::TurnInferred => 0.6,
            HeadingQuality::HoverEstimate => 0.5,
            HeadingQuality::Gap => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResolvedHeading {
    /// Degrees clockwise from north, `[0, 360)`
    pub degrees: f64,
    pub source: HeadingSource,
    pub quality: HeadingQuality,
    pub confidence: f64,
}

impl ResolvedHeading {
    pub fn new(degrees: f64, source: HeadingSource, quality: HeadingQuality) -> Self {
        Self {
            degrees: normalize_heading(degrees),
            source,
            quality,
            confidence: quality.confidence(),
        }
    }

    pub fn from_gimbal(yaw: f64) -> Self {
        Self::new(yaw, HeadingSource::GimbalYaw, HeadingQuality::Good)
    }
}

/// Where to look for headings that metadata does not provide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BearingStrategy {
    /// Interpolate along an external flight log
    Track {
        path: PathBuf,
        /// Use GPS-only inference when the log cannot be read
        #[serde(default)]
        fallback_to_gps: bool,
    },
    /// Infer from consecutive image positions
    GpsOnly,
}

/// Headings for a set of images, recorded or recovered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BearingReport {
    pub headings: HashMap<String, ResolvedHeading>,
    pub from_gimbal: usize,
    pub recovered: usize,
    /// Images left without a heading
    pub missing: Vec<String>,
    /// Set when a track could not be used and GPS inference ran instead
    pub fallback_reason: Option<String>,
    /// Why the strategy produced no headings: an unreadable track without
    /// fallback, or too few GPS fixes. The images are left in `missing`.
    #[serde(default)]
    pub strategy_error: Option<String>,
    pub cancelled: bool,
}

impl BearingReport {
    pub fn quality_counts(&self) -> HashMap<HeadingQuality, usize> {
        let mut counts = HashMap::new();
        for heading in self.headings.values() {
            *counts.entry(heading.quality).or_insert(0) += 1;
        }
        counts
    }
}

/// Heading per image: gimbal yaw first, then the strategy for the rest.
/// A track that fails to load falls back to GPS inference when allowed.
/// Strategy failures are recorded on the report and never discard the
/// headings already known.
pub fn resolve_headings(
    records: &[ImageRecord],
    strategy: Option<&BearingStrategy>,
    ctx: &RunContext,
) -> BearingReport {
    let mut report = BearingReport::default();
    let mut needing = Vec::new();
    for record in records {
        match record.gimbal.yaw {
            Some(yaw) => {
                report.headings.insert(record.id.clone(), ResolvedHeading::from_gimbal(yaw));
                report.from_gimbal += 1;
            }
            None => needing.push(record),
        }
    }
    if needing.is_empty() {
        return report;
    }

    let recovered: HashMap<String, ResolvedHeading> = match strategy {
        None => HashMap::new(),
        Some(BearingStrategy::GpsOnly) => gps_headings(records, ctx, &mut report),
        Some(BearingStrategy::Track { path, fallback_to_gps }) => match FlightTrack::load(path) {
            Ok(track) => {
                let mut headings = HashMap::new();
                for (index, record) in needing.iter().enumerate() {
                    if ctx.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    if let Some(timestamp) = record.timestamp {
                        headings.insert(record.id.clone(), track.heading_at(timestamp));
                    }
                    ctx.report(index + 1, needing.len(), "Interpolating track headings");
                }
                headings
            }
            Err(e) if *fallback_to_gps => {
                warn!("Track {:?} unusable ({}), falling back to GPS-only inference", path, e);
                report.fallback_reason = Some(e.to_string());
                gps_headings(records, ctx, &mut report)
            }
            Err(e) => {
                warn!("Track {:?} unusable ({}), {} images left without a heading", path, e, needing.len());
                report.strategy_error = Some(e.to_string());
                HashMap::new()
            }
        },
    };

    for record in needing {
        match recovered.get(&record.id) {
            Some(heading) => {
                report.headings.insert(record.id.clone(), *heading);
                report.recovered += 1;
            }
            None => report.missing.push(record.id.clone()),
        }
    }
    info!(
        "Headings: {} from gimbal, {} recovered, {} missing",
        report.from_gimbal,
        report.recovered,
        report.missing.len()
    );
    report
}

fn gps_headings(records: &[ImageRecord], ctx: &RunContext, report: &mut BearingReport) -> HashMap<String, ResolvedHeading> {
    match infer_from_gps(records, ctx) {
        Ok(inference) => {
            report.cancelled |= inference.cancelled;
            inference.headings
        }
        Err(e) => {
            warn!("GPS heading inference failed: {}", e);
            report.strategy_error = Some(e.to_string());
            HashMap::new()
        }
    }
}
