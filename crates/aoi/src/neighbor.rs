//! Finds every other image that saw a located AOI and where it appears there.

use serde::{Deserialize, Serialize};
use survey_common::{geodesy::distance_m, GeoPoint};
use tracing::debug;

use crate::{batch::RunContext, coverage::ImageFootprint};

pub const DEFAULT_MAX_RESULTS: usize = 50;
/// Candidate footprints lie within this multiple of the largest footprint reach
pub const PREFILTER_FACTOR: f64 = 1.2;

/// An AOI to track across images
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborQuery {
    pub point: GeoPoint,
    pub source_image: String,
    pub source_index: usize,
    /// AOI centroid in the source image
    pub source_pixel: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborMatch {
    pub image_id: String,
    pub image_index: usize,
    /// Expected location of the AOI in this image
    pub pixel: [f64; 2],
    /// Drops from the heading confidence at the image centre to half of it
    /// at the corners
    pub confidence: f64,
    pub is_source: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborSearch {
    /// Ordered by capture order
    pub matches: Vec<NeighborMatch>,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct NeighborTracker<'a> {
    footprints: &'a [ImageFootprint],
    prefilter_radius_m: f64,
    pub max_results: usize,
}

impl<'a> NeighborTracker<'a> {
    pub fn new(footprints: &'a [ImageFootprint]) -> Self {
        let largest = footprints.iter().map(ImageFootprint::reach_m).fold(0.0, f64::max);
        Self {
            footprints,
            prefilter_radius_m: largest * PREFILTER_FACTOR,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    fn project_into(footprint: &ImageFootprint, point: GeoPoint) -> Option<NeighborMatch> {
        let pixel = footprint.pixel_for(point)?;
        if !footprint.contains_pixel(pixel) {
            return None;
        }
        let (cx, cy) = (footprint.width as f64 / 2.0, footprint.height as f64 / 2.0);
        let r = (pixel.0 - cx).hypot(pixel.1 - cy);
        let r_max = cx.hypot(cy).max(f64::EPSILON);
        Some(NeighborMatch {
            image_id: footprint.image_id.clone(),
            image_index: footprint.image_index,
            pixel: [pixel.0, pixel.1],
            confidence: footprint.heading_confidence * (1.0 - 0.5 * (r / r_max).min(1.0)),
            is_source: false,
        })
    }

    /// Scan all footprints for the query point. The source image is always
    /// part of the result.
    pub fn search(&self, query: &NeighborQuery, ctx: &RunContext) -> NeighborSearch {
        let total = self.footprints.len();
        let mut others = Vec::new();
        let mut source = None;
        let mut cancelled = false;

        for (scanned, footprint) in self.footprints.iter().enumerate() {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
            if footprint.image_id == query.source_image {
                source = Self::project_into(footprint, query.point);
            } else if distance_m(footprint.center, query.point) <= self.prefilter_radius_m {
                others.extend(Self::project_into(footprint, query.point));
            }
            ctx.report(scanned + 1, total, "Searching neighbouring images");
        }

        // the source keeps its own pixel even when the projection disagrees
        let source = NeighborMatch {
            image_id: query.source_image.clone(),
            image_index: query.source_index,
            pixel: query.source_pixel,
            confidence: source.map_or(1.0, |m| m.confidence),
            is_source: true,
        };

        others.sort_by_key(|m| m.image_index);
        others.truncate(self.max_results - 1);
        let mut matches = others;
        matches.push(source);
        matches.sort_by_key(|m| m.image_index);

        debug!("AOI at {:?} visible in {} images", query.point, matches.len());
        NeighborSearch { matches, cancelled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bearing::{HeadingQuality, HeadingSource, ResolvedHeading},
        types::ImageRecord,
    };
    use approx::assert_abs_diff_eq;
    use survey_common::geodesy::offset;

    fn footprint(i: usize, center: GeoPoint, heading: f64) -> ImageFootprint {
        tilted_footprint(i, center, heading, None)
    }

    fn tilted_footprint(i: usize, center: GeoPoint, heading: f64, pitch: Option<f64>) -> ImageFootprint {
        let record = ImageRecord::new(format!("img_{i}"), 1000, 1000)
            .with_gps(center.latitude, center.longitude)
            .with_altitude(100.0)
            .with_sensor(10.0, 10.0, 10.0)
            .with_gimbal(pitch, None);
        let heading = ResolvedHeading::new(heading, HeadingSource::GimbalYaw, HeadingQuality::Good);
        ImageFootprint::from_record(&record, i, Some(&heading)).unwrap()
    }

    fn strip() -> Vec<ImageFootprint> {
        let origin = GeoPoint::new(45.0, 7.0);
        (0..6).map(|i| footprint(i, offset(origin, i as f64 * 40.0, 0.0), 0.0)).collect()
    }

    #[test]
    fn test_overlapping_images_found_in_order() {
        let footprints = strip();
        let tracker = NeighborTracker::new(&footprints);
        // 60 m along the strip: inside the footprints of images 1 and 2 only
        let point = offset(footprints[1].center, 20.0, 0.0);
        let query = NeighborQuery {
            point,
            source_image: "img_1".into(),
            source_index: 1,
            source_pixel: [500.0, 300.0],
        };
        let result = tracker.search(&query, &RunContext::default());

        let ids: Vec<&str> = result.matches.iter().map(|m| m.image_id.as_str()).collect();
        assert_eq!(ids, vec!["img_1", "img_2"]);
        assert!(result.matches[0].is_source);
        assert_eq!(result.matches[0].pixel, [500.0, 300.0]);

        // in image 2 the point is 20 m south of centre: 200 px below it
        let m2 = &result.matches[1];
        assert_abs_diff_eq!(m2.pixel[0], 500.0, epsilon = 1e-3);
        assert_abs_diff_eq!(m2.pixel[1], 700.0, epsilon = 1e-3);
        assert!(m2.confidence < 1.0 && m2.confidence > 0.5);
    }

    #[test]
    fn test_rotated_image_inverse_projection() {
        let center = GeoPoint::new(45.0, 7.0);
        let footprints = vec![footprint(0, center, 90.0)];
        // heading east, a point 30 m east lies 300 px above centre
        let point = offset(center, 0.0, 30.0);
        let query = NeighborQuery { point, source_image: "img_0".into(), source_index: 0, source_pixel: [0.0, 0.0] };
        let result = NeighborTracker::new(&footprints).search(&query, &RunContext::default());
        assert_eq!(result.matches.len(), 1);

        let (x, y) = footprints[0].pixel_for(point).unwrap();
        assert_abs_diff_eq!(x, 500.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y, 200.0, epsilon = 1e-3);
    }

    #[test]
    fn test_oblique_image_is_a_candidate() {
        let mut footprints = strip();
        let point = offset(footprints[1].center, 20.0, 0.0);
        // looking north 45 degrees down from 100 m: the optical axis lands 100 m ahead
        let oblique = tilted_footprint(6, offset(point, -100.0, 0.0), 0.0, Some(-45.0));
        assert!(!oblique.is_nadir());
        footprints.push(oblique);

        let query = NeighborQuery { point, source_image: "img_1".into(), source_index: 1, source_pixel: [500.0, 300.0] };
        let result = NeighborTracker::new(&footprints).search(&query, &RunContext::default());

        let ids: Vec<&str> = result.matches.iter().map(|m| m.image_id.as_str()).collect();
        assert_eq!(ids, vec!["img_1", "img_2", "img_6"]);
        let m6 = &result.matches[2];
        assert_abs_diff_eq!(m6.pixel[0], 500.0, epsilon = 1e-2);
        assert_abs_diff_eq!(m6.pixel[1], 500.0, epsilon = 1e-2);
        assert_abs_diff_eq!(m6.confidence, 1.0, epsilon = 1e-4);

        // 150 m behind the camera is behind the image plane
        let behind = offset(point, -250.0, 0.0);
        assert_eq!(footprints[6].pixel_for(behind), None);
    }

    #[test]
    fn test_source_always_included_and_cap() {
        let footprints = strip();
        let far = offset(footprints[0].center, 5000.0, 0.0);
        let query = NeighborQuery { point: far, source_image: "img_4".into(), source_index: 4, source_pixel: [1.0, 2.0] };
        let result = NeighborTracker::new(&footprints).search(&query, &RunContext::default());
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].image_id, "img_4");

        let near = footprints[2].center;
        let query = NeighborQuery { point: near, source_image: "img_5".into(), source_index: 5, source_pixel: [1.0, 2.0] };
        let result = NeighborTracker::new(&footprints)
            .with_max_results(2)
            .search(&query, &RunContext::default());
        assert_eq!(result.matches.len(), 2);
        assert!(result.matches.iter().any(|m| m.is_source));
    }

    #[test]
    fn test_cancelled_search_keeps_source() {
        let footprints = strip();
        let ctx = RunContext::default();
        ctx.cancel.cancel();
        let query = NeighborQuery {
            point: footprints[0].center,
            source_image: "img_0".into(),
            source_index: 0,
            source_pixel: [500.0, 500.0],
        };
        let result = NeighborTracker::new(&footprints).search(&query, &ctx);
        assert!(result.cancelled);
        assert_eq!(result.matches.len(), 1);
    }
}
