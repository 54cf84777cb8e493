//! Ground footprints of images and the union of the nadir ones into coverage
//! polygons.

use std::collections::HashMap;

use geo::{BooleanOps, ChamberlainDuquetteArea, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use survey_common::{
    geodesy::{distance_m, local_offset},
    AreaMeasurement, GeoPoint,
};
use tracing::{debug, info};

use crate::{
    batch::RunContext,
    bearing::ResolvedHeading,
    georef::{rotate_to_camera, CameraModel, SkipReason},
    types::ImageRecord,
};

/// Corners closer than this, in degrees, count as the same footprint
const DUPLICATE_TOLERANCE_DEG: f64 = 1e-9;

/// Ground quadrilateral seen by one image. Nadir frames give a rotated
/// rectangle; oblique frames a trapezoid reaching ahead of the camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFootprint {
    pub image_id: String,
    /// Position of the image in the survey's capture order
    pub image_index: usize,
    /// Ground positions of the top-left, top-right, bottom-right and
    /// bottom-left pixels
    pub corners: [GeoPoint; 4],
    /// Camera position
    pub center: GeoPoint,
    /// Metres per pixel straight below the camera
    pub gsd: f64,
    pub heading: f64,
    pub heading_confidence: f64,
    pub width: u32,
    pub height: u32,
    pub altitude_agl: f64,
    pub focal_px: f64,
    /// Pitch below the horizon for oblique frames
    #[serde(default)]
    pub depression_deg: Option<f64>,
}

impl ImageFootprint {
    /// Fails with `AboveHorizon` when a frame corner never reaches the ground
    pub fn from_record(record: &ImageRecord, image_index: usize, heading: Option<&ResolvedHeading>) -> Result<Self, SkipReason> {
        let camera = CameraModel::from_record(record)?;
        let heading = heading.ok_or(SkipReason::MissingBearing)?;

        let (w, h) = (record.width as f64, record.height as f64);
        let pixels = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
        let mut corners = [camera.position; 4];
        for (corner, pixel) in corners.iter_mut().zip(pixels) {
            *corner = camera.project(pixel, heading.degrees, camera.altitude_agl)?;
        }

        Ok(Self {
            image_id: record.id.clone(),
            image_index,
            corners,
            center: camera.position,
            gsd: camera.gsd(camera.altitude_agl),
            heading: heading.degrees,
            heading_confidence: heading.confidence,
            width: record.width,
            height: record.height,
            altitude_agl: camera.altitude_agl,
            focal_px: camera.focal_px,
            depression_deg: camera.depression_deg,
        })
    }

    pub fn is_nadir(&self) -> bool {
        self.depression_deg.is_none()
    }

    fn camera(&self) -> CameraModel {
        CameraModel {
            position: self.center,
            altitude_agl: self.altitude_agl,
            focal_px: self.focal_px,
            center: (self.width as f64 / 2.0, self.height as f64 / 2.0),
            depression_deg: self.depression_deg,
        }
    }

    pub fn polygon(&self) -> Polygon<f64> {
        let mut ring: Vec<(f64, f64)> = self.corners.iter().map(|c| (c.longitude, c.latitude)).collect();
        ring.push(ring[0]);
        Polygon::new(LineString::from(ring), vec![])
    }

    /// Distance in metres from the camera to the farthest corner; the half
    /// diagonal for nadir frames
    pub fn reach_m(&self) -> f64 {
        self.corners.iter().map(|c| distance_m(self.center, *c)).fold(0.0, f64::max)
    }

    /// Pixel that sees a ground point; may fall outside the frame. `None`
    /// when the point is behind an oblique camera.
    pub fn pixel_for(&self, point: GeoPoint) -> Option<(f64, f64)> {
        let (north, east) = local_offset(self.center, point);
        let (forward, right) = rotate_to_camera(north, east, self.heading);
        self.camera().pixel_for_offset((forward, right), self.altitude_agl)
    }

    pub fn contains_pixel(&self, (x, y): (f64, f64)) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.width as f64 && y <= self.height as f64
    }

    fn same_extent(&self, other: &ImageFootprint) -> bool {
        self.corners.iter().zip(&other.corners).all(|(a, b)| {
            (a.latitude - b.latitude).abs() < DUPLICATE_TOLERANCE_DEG
                && (a.longitude - b.longitude).abs() < DUPLICATE_TOLERANCE_DEG
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FootprintSet {
    pub footprints: Vec<ImageFootprint>,
    pub skipped: Vec<(String, SkipReason)>,
    pub cancelled: bool,
}

impl FootprintSet {
    pub fn skip_counts(&self) -> HashMap<SkipReason, usize> {
        let mut counts = HashMap::new();
        for (_, reason) in &self.skipped {
            *counts.entry(*reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Footprints for every record in order, oblique frames included, with a
/// reason for each skip
pub fn build_footprints(records: &[ImageRecord], headings: &HashMap<String, ResolvedHeading>, ctx: &RunContext) -> FootprintSet {
    let mut set = FootprintSet::default();
    for (index, record) in records.iter().enumerate() {
        if ctx.is_cancelled() {
            set.cancelled = true;
            break;
        }
        match ImageFootprint::from_record(record, index, headings.get(&record.id)) {
            Ok(footprint) => set.footprints.push(footprint),
            Err(reason) => {
                debug!("No footprint for {}: {}", record.id, reason);
                set.skipped.push((record.id.clone(), reason));
            }
        }
        ctx.report(index + 1, records.len(), "Computing image footprints");
    }
    set
}

/// One connected covered region with closed rings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoveragePolygon {
    pub exterior: Vec<GeoPoint>,
    pub holes: Vec<Vec<GeoPoint>>,
    pub area: AreaMeasurement,
}

impl CoveragePolygon {
    fn from_polygon(polygon: &Polygon<f64>) -> Self {
        let ring = |ls: &LineString<f64>| ls.coords().map(|c| GeoPoint::new(c.y, c.x)).collect::<Vec<_>>();
        Self {
            exterior: ring(polygon.exterior()),
            holes: polygon.interiors().iter().map(ring).collect(),
            area: AreaMeasurement::from_square_meters(polygon.chamberlain_duquette_unsigned_area()),
        }
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        let ring = |points: &[GeoPoint]| LineString::from(points.iter().map(|p| (p.longitude, p.latitude)).collect::<Vec<_>>());
        Polygon::new(ring(&self.exterior), self.holes.iter().map(|h| ring(h)).collect())
    }
}

/// Union of the surveyed area
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageExtent {
    pub polygons: Vec<CoveragePolygon>,
    pub total_area: AreaMeasurement,
    pub processed: usize,
    pub skipped: Vec<(String, SkipReason)>,
    pub cancelled: bool,
}

/// Union footprints into non-overlapping polygons. Cancellation returns the
/// union of the footprints merged so far.
pub fn union_footprints(footprints: &[ImageFootprint], ctx: &RunContext) -> (MultiPolygon<f64>, bool) {
    let mut unique: Vec<&ImageFootprint> = Vec::with_capacity(footprints.len());
    for footprint in footprints {
        if !unique.iter().any(|u| u.same_extent(footprint)) {
            unique.push(footprint);
        }
    }
    if unique.len() < footprints.len() {
        debug!("Dropped {} duplicate footprints", footprints.len() - unique.len());
    }

    let mut merged = MultiPolygon::new(vec![]);
    for (index, footprint) in unique.iter().enumerate() {
        if ctx.is_cancelled() {
            return (merged, true);
        }
        let polygon = footprint.polygon();
        merged = if merged.0.is_empty() {
            MultiPolygon::new(vec![polygon])
        } else {
            merged.union(&MultiPolygon::new(vec![polygon]))
        };
        ctx.report(index + 1, unique.len(), "Merging footprints");
    }
    (merged, false)
}

pub fn coverage_extent(records: &[ImageRecord], headings: &HashMap<String, ResolvedHeading>, ctx: &RunContext) -> CoverageExtent {
    let mut set = build_footprints(records, headings, ctx);
    let (nadir, oblique): (Vec<_>, Vec<_>) = set.footprints.drain(..).partition(ImageFootprint::is_nadir);
    set.skipped.extend(oblique.into_iter().map(|f| (f.image_id, SkipReason::NonNadir)));
    set.footprints = nadir;
    let (merged, union_cancelled) = union_footprints(&set.footprints, ctx);

    let polygons: Vec<CoveragePolygon> = merged.0.iter().map(CoveragePolygon::from_polygon).collect();
    let total_area = polygons.iter().fold(AreaMeasurement::zero(), |acc, p| acc + p.area);
    info!(
        "Coverage: {} polygons, {:.2} ha from {} images ({} skipped)",
        polygons.len(),
        total_area.hectares,
        set.footprints.len(),
        set.skipped.len()
    );

    CoverageExtent {
        polygons,
        total_area,
        processed: set.footprints.len(),
        skipped: set.skipped,
        cancelled: set.cancelled || union_cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bearing::{HeadingQuality, HeadingSource};
    use approx::assert_relative_eq;
    use survey_common::geodesy::offset;

    /// 1000x1000 px at 0.1 m/px covers 100 m x 100 m
    fn record(id: &str, position: GeoPoint) -> ImageRecord {
        ImageRecord::new(id, 1000, 1000)
            .with_gps(position.latitude, position.longitude)
            .with_altitude(100.0)
            .with_sensor(10.0, 10.0, 10.0)
    }

    fn north() -> ResolvedHeading {
        ResolvedHeading::new(0.0, HeadingSource::GimbalYaw, HeadingQuality::Good)
    }

    fn headings(records: &[ImageRecord]) -> HashMap<String, ResolvedHeading> {
        records.iter().map(|r| (r.id.clone(), north())).collect()
    }

    #[test]
    fn test_footprint_geometry() {
        let rec = record("a", GeoPoint::new(45.0, 7.0));
        let fp = ImageFootprint::from_record(&rec, 0, Some(&north())).expect("Should build footprint");
        assert_relative_eq!(fp.gsd, 0.1);

        let (n, e) = local_offset(fp.center, fp.corners[0]);
        assert_relative_eq!(n, 50.0, max_relative = 1e-6);
        assert_relative_eq!(e, -50.0, max_relative = 1e-6);

        assert_relative_eq!(fp.reach_m(), 50.0 * 2f64.sqrt(), max_relative = 1e-4);

        let (x, y) = fp.pixel_for(fp.corners[2]).expect("Should see its own corner");
        assert_relative_eq!(x, 1000.0, max_relative = 1e-6);
        assert_relative_eq!(y, 1000.0, max_relative = 1e-6);
    }

    #[test]
    fn test_identical_footprints_union_once() {
        let origin = GeoPoint::new(45.0, 7.0);
        let records = vec![record("a", origin), record("b", origin)];
        let extent = coverage_extent(&records, &headings(&records), &RunContext::default());

        let single = ImageFootprint::from_record(&records[0], 0, Some(&north())).unwrap();
        let single_area = single.polygon().chamberlain_duquette_unsigned_area();

        assert_eq!(extent.polygons.len(), 1);
        assert_eq!(extent.processed, 2);
        assert_relative_eq!(extent.total_area.square_meters, single_area, max_relative = 1e-9);
    }

    #[test]
    fn test_ten_image_strip_is_one_polygon() {
        let origin = GeoPoint::new(45.0, 7.0);
        // 50 m spacing gives 50% forward overlap
        let records: Vec<ImageRecord> = (0..10)
            .map(|i| record(&format!("img_{i}"), offset(origin, i as f64 * 50.0, 0.0)))
            .collect();
        let extent = coverage_extent(&records, &headings(&records), &RunContext::default());

        let single_area = ImageFootprint::from_record(&records[0], 0, Some(&north()))
            .unwrap()
            .polygon()
            .chamberlain_duquette_unsigned_area();

        assert_eq!(extent.polygons.len(), 1);
        // ten footprints minus nine half overlaps
        assert_relative_eq!(extent.total_area.square_meters / single_area, 5.5, max_relative = 1e-3);
    }

    #[test]
    fn test_disjoint_footprints_and_skips() {
        let origin = GeoPoint::new(45.0, 7.0);
        let mut records = vec![
            record("a", origin),
            record("b", offset(origin, 0.0, 500.0)),
            record("oblique", origin).with_gimbal(Some(-45.0), None),
            ImageRecord::new("no_gps", 1000, 1000),
            record("no_heading", origin),
        ];
        records[0].gimbal.pitch = Some(-90.0);
        let map = headings(&records[..3]);

        let extent = coverage_extent(&records, &map, &RunContext::default());
        assert_eq!(extent.polygons.len(), 2);
        assert_eq!(extent.processed, 2);

        let reasons: HashMap<String, SkipReason> = extent.skipped.into_iter().collect();
        assert_eq!(reasons["oblique"], SkipReason::NonNadir);
        assert_eq!(reasons["no_gps"], SkipReason::MissingGps);
        assert_eq!(reasons["no_heading"], SkipReason::MissingBearing);
    }

    #[test]
    fn test_cancelled_before_start() {
        let records = vec![record("a", GeoPoint::new(45.0, 7.0))];
        let ctx = RunContext::default();
        ctx.cancel.cancel();
        let extent = coverage_extent(&records, &headings(&records), &ctx);
        assert!(extent.cancelled);
        assert_eq!(extent.processed, 0);
    }
}
