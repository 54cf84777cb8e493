//! Pixel to ground projection.
//!
//! Image up is the heading direction. Nadir frames scale the offset from the
//! image centre by the ground sample distance; oblique frames with a known
//! pitch cast a ray from the camera onto a flat ground plane. An optional
//! [`ElevationProvider`] refines the height above ground iteratively.

pub mod terrain;

use std::{collections::HashMap, ops::RangeInclusive, sync::Arc};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use survey_common::{
    geodesy::{distance_m, offset},
    GeoPoint,
};
use tracing::{debug, info};

use crate::{
    batch::{ImageResult, RunContext},
    bearing::ResolvedHeading,
    traits::ElevationProvider,
    types::{ElevationSource, GeoFix, ImageRecord},
};

pub use terrain::GridElevation;

/// Gimbal pitch window, in degrees, treated as looking straight down
pub const NADIR_PITCH_RANGE: RangeInclusive<f64> = -95.0..=-85.0;

pub const MAX_TERRAIN_ITERATIONS: usize = 3;
pub const TERRAIN_CONVERGENCE_M: f64 = 1.0;
pub const MIN_EFFECTIVE_AGL_M: f64 = 1.0;

/// Why an image or AOI could not be placed on the ground
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, JsonSchema, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    MissingGps,
    /// Altitude, focal length or sensor width unknown
    MissingGsdInputs,
    NonNadir,
    MissingBearing,
    /// The pixel ray never reaches the ground
    AboveHorizon,
}

/// Metres per pixel on flat ground below a nadir camera
pub fn ground_sample_distance(
    altitude_agl_m: f64,
    sensor_width_mm: f64,
    focal_length_mm: f64,
    image_width_px: u32,
) -> Option<f64> {
    if altitude_agl_m <= 0.0 || sensor_width_mm <= 0.0 || focal_length_mm <= 0.0 || image_width_px == 0 {
        return None;
    }
    Some(altitude_agl_m * sensor_width_mm / (focal_length_mm * image_width_px as f64))
}

/// Missing pitch is assumed to be nadir
pub fn is_nadir(pitch: Option<f64>) -> bool {
    pitch.is_none_or(|p| NADIR_PITCH_RANGE.contains(&p))
}

/// Rotate a camera-frame ground offset (forward along heading, right of
/// heading) into north and east metres
pub fn rotate_to_world(forward: f64, right: f64, heading_deg: f64) -> (f64, f64) {
    let (sin_b, cos_b) = heading_deg.to_radians().sin_cos();
    (forward * cos_b - right * sin_b, forward * sin_b + right * cos_b)
}

/// Inverse of [`rotate_to_world`]
pub fn rotate_to_camera(north: f64, east: f64, heading_deg: f64) -> (f64, f64) {
    let (sin_b, cos_b) = heading_deg.to_radians().sin_cos();
    (north * cos_b + east * sin_b, -north * sin_b + east * cos_b)
}

/// Camera geometry resolved from an image record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub position: GeoPoint,
    pub altitude_agl: f64,
    /// Focal length expressed in pixels
    pub focal_px: f64,
    pub center: (f64, f64),
    /// Pitch below the horizon in degrees; `None` for nadir frames
    pub depression_deg: Option<f64>,
}

impl CameraModel {
    pub fn from_record(record: &ImageRecord) -> Result<Self, SkipReason> {
        let position = record.gps.ok_or(SkipReason::MissingGps)?;
        let altitude_agl = record.altitude_agl.ok_or(SkipReason::MissingGsdInputs)?;
        let focal = record.sensor.focal_length_mm.ok_or(SkipReason::MissingGsdInputs)?;
        let sensor_width = record.sensor.sensor_width_mm.ok_or(SkipReason::MissingGsdInputs)?;
        if focal <= 0.0 || sensor_width <= 0.0 || record.width == 0 || altitude_agl <= 0.0 {
            return Err(SkipReason::MissingGsdInputs);
        }
        let depression_deg = (!is_nadir(record.gimbal.pitch))
            .then(|| record.gimbal.pitch.map(|p| -p))
            .flatten();
        Ok(Self {
            position,
            altitude_agl,
            focal_px: focal / sensor_width * record.width as f64,
            center: record.center_pixel(),
            depression_deg,
        })
    }

    pub fn gsd(&self, altitude_agl: f64) -> f64 {
        altitude_agl / self.focal_px
    }

    /// Ground offset of a pixel in metres, as (forward, right) of the camera
    pub fn ground_offset(&self, pixel: (f64, f64), altitude_agl: f64) -> Result<(f64, f64), SkipReason> {
        let du = pixel.0 - self.center.0;
        let dv = pixel.1 - self.center.1;
        match self.depression_deg {
            None => {
                let gsd = self.gsd(altitude_agl);
                Ok((-dv * gsd, du * gsd))
            }
            Some(depression) => {
                let (sin_d, cos_d) = depression.to_radians().sin_cos();
                let ray_forward = self.focal_px * cos_d - dv * sin_d;
                let ray_up = -self.focal_px * sin_d - dv * cos_d;
                if ray_up >= -f64::EPSILON {
                    return Err(SkipReason::AboveHorizon);
                }
                let t = altitude_agl / -ray_up;
                Ok((t * ray_forward, t * du))
            }
        }
    }

    /// Inverse of [`CameraModel::ground_offset`]. `None` when the ground
    /// offset lies behind the image plane.
    pub fn pixel_for_offset(&self, (forward, right): (f64, f64), altitude_agl: f64) -> Option<(f64, f64)> {
        match self.depression_deg {
            None => {
                let gsd = self.gsd(altitude_agl);
                Some((self.center.0 + right / gsd, self.center.1 - forward / gsd))
            }
            Some(depression) => {
                let (sin_d, cos_d) = depression.to_radians().sin_cos();
                let depth = forward * cos_d + altitude_agl * sin_d;
                if depth <= f64::EPSILON {
                    return None;
                }
                let scale = self.focal_px / depth;
                Some((
                    self.center.0 + right * scale,
                    self.center.1 + (altitude_agl * cos_d - forward * sin_d) * scale,
                ))
            }
        }
    }

    /// Ground point of a pixel for a given heading and height above ground
    pub fn project(&self, pixel: (f64, f64), heading_deg: f64, altitude_agl: f64) -> Result<GeoPoint, SkipReason> {
        let (forward, right) = self.ground_offset(pixel, altitude_agl)?;
        let (north, east) = rotate_to_world(forward, right, heading_deg);
        Ok(offset(self.position, north, east))
    }
}

/// Projects pixels to the ground, optionally terrain corrected
#[derive(Clone, Default)]
pub struct Georeferencer {
    elevation: Option<Arc<dyn ElevationProvider>>,
}

impl std::fmt::Debug for Georeferencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Georeferencer")
            .field("terrain", &self.elevation.is_some())
            .finish()
    }
}

impl Georeferencer {
    /// Flat terrain at take-off altitude
    pub fn flat() -> Self {
        Self { elevation: None }
    }

    pub fn with_terrain(provider: Arc<dyn ElevationProvider>) -> Self {
        Self {
            elevation: Some(provider),
        }
    }

    pub fn ground_sample_distance(&self, record: &ImageRecord) -> Result<f64, SkipReason> {
        let camera = CameraModel::from_record(record)?;
        Ok(camera.gsd(camera.altitude_agl))
    }

    /// Project one pixel of an image
    pub fn project_pixel(&self, record: &ImageRecord, heading_deg: f64, pixel: (f64, f64)) -> Result<GeoFix, SkipReason> {
        let camera = CameraModel::from_record(record)?;
        let flat = camera.project(pixel, heading_deg, camera.altitude_agl)?;
        let flat_fix = GeoFix {
            point: flat,
            elevation_source: ElevationSource::Flat,
            effective_agl_m: camera.altitude_agl,
        };

        let Some(provider) = &self.elevation else {
            return Ok(flat_fix);
        };
        // Absolute camera height: recorded, or take-off ground plus AGL
        let Some(camera_elevation) = record
            .altitude_asl
            .or_else(|| provider.elevation(camera.position).map(|ground| ground + camera.altitude_agl))
        else {
            return Ok(flat_fix);
        };

        let mut estimate = flat_fix;
        for iteration in 0..MAX_TERRAIN_ITERATIONS {
            let Some(ground) = provider.elevation(estimate.point) else {
                debug!("No terrain data at {:?}, keeping current estimate", estimate.point);
                break;
            };
            let effective_agl = (camera_elevation - ground).max(MIN_EFFECTIVE_AGL_M);
            let refined = GeoFix {
                point: camera.project(pixel, heading_deg, effective_agl)?,
                elevation_source: ElevationSource::Terrain,
                effective_agl_m: effective_agl,
            };
            let moved = distance_m(estimate.point, refined.point);
            estimate = refined;
            if moved < TERRAIN_CONVERGENCE_M {
                debug!("Terrain projection converged after {} iterations", iteration + 1);
                break;
            }
        }
        Ok(estimate)
    }

    /// Assign a ground location to every AOI of one processed image
    pub fn georeference_image(&self, result: &mut ImageResult, heading: Option<&ResolvedHeading>) -> Result<usize, SkipReason> {
        let record = &result.record;
        record.gps.ok_or(SkipReason::MissingGps)?;
        let heading = heading.ok_or(SkipReason::MissingBearing)?.degrees;

        let mut located = 0;
        for aoi in &mut result.detections.aois {
            let centroid = (aoi.centroid[0], aoi.centroid[1]);
            match self.project_pixel(record, heading, centroid) {
                Ok(fix) => {
                    aoi.gps = Some(fix);
                    located += 1;
                }
                Err(SkipReason::AboveHorizon) => aoi.gps = None,
                Err(reason) => return Err(reason),
            }
        }
        Ok(located)
    }

    /// Single pass over a batch's results. Cancellation keeps what was
    /// already placed.
    pub fn georeference_all(
        &self,
        results: &mut [ImageResult],
        headings: &HashMap<String, ResolvedHeading>,
        ctx: &RunContext,
    ) -> GeoreferenceSummary {
        let total = results.len();
        let mut summary = GeoreferenceSummary::default();

        for (index, result) in results.iter_mut().enumerate() {
            if ctx.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            match self.georeference_image(result, headings.get(&result.record.id)) {
                Ok(count) => {
                    summary.located_images += 1;
                    summary.located_aois += count;
                }
                Err(reason) => summary.skipped.push((result.record.id.clone(), reason)),
            }
            ctx.report(index + 1, total, "Georeferencing AOIs");
        }

        info!(
            "Georeferenced {} AOIs in {} images, {} images skipped",
            summary.located_aois,
            summary.located_images,
            summary.skipped.len()
        );
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoreferenceSummary {
    pub located_images: usize,
    pub located_aois: usize,
    pub skipped: Vec<(String, SkipReason)>,
    pub cancelled: bool,
}

impl GeoreferenceSummary {
    pub fn skip_counts(&self) -> HashMap<SkipReason, usize> {
        let mut counts = HashMap::new();
        for (_, reason) in &self.skipped {
            *counts.entry(*reason).or_insert(0) += 1;
        }
        counts
    }
}
