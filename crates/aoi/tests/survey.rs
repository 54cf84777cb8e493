use std::sync::Arc;

use aoi::{
    algorithms::{ColorRangeDetector, RgbRange},
    coverage::build_footprints,
    georef::SkipReason,
    process_survey, AoiError, BatchOrchestrator, BearingStrategy, FrameSource, Georeferencer, HeadingQuality,
    ImageFrame, ImageRecord, NeighborQuery, NeighborTracker, Pipeline, RunContext,
};
use approx::assert_relative_eq;
use chrono::{TimeZone, Utc};
use image::{Rgb, RgbImage};
use survey_common::{
    geodesy::{distance_m, local_offset, offset},
    GeoPoint,
};

const SIZE: u32 = 200;
const SPACING_M: f64 = 50.0;

/// Grass with one red marker 40 px above the image centre
struct MarkerSource;

impl FrameSource for MarkerSource {
    fn load(&self, record: &ImageRecord) -> aoi::Result<ImageFrame> {
        if record.width != SIZE {
            return Err(AoiError::FrameUnavailable(record.id.clone()));
        }
        let rgb = RgbImage::from_fn(SIZE, SIZE, |x, y| {
            if (95..105).contains(&x) && (55..65).contains(&y) {
                Rgb([240, 20, 20])
            } else {
                Rgb([60, 110, 50])
            }
        });
        Ok(ImageFrame::new(rgb))
    }
}

/// Ten nadir images flown due north; 200 px at 0.5 m/px covers 100 m
fn survey() -> Vec<ImageRecord> {
    let origin = GeoPoint::new(45.0, 7.0);
    (0..10)
        .map(|i| {
            let p = offset(origin, i as f64 * SPACING_M, 0.0);
            ImageRecord::new(format!("img_{i}"), SIZE, SIZE)
                .with_gps(p.latitude, p.longitude)
                .with_altitude(100.0)
                .with_sensor(10.0, 10.0, 10.0)
                .with_gimbal(Some(-90.0), None)
                .with_timestamp(Utc.timestamp_opt(1_700_000_000 + i * 10, 0).unwrap())
        })
        .collect()
}

fn orchestrator() -> BatchOrchestrator {
    let pipeline = Pipeline::builder()
        .add_detector(ColorRangeDetector::new(vec![RgbRange { min: [200, 0, 0], max: [255, 60, 60] }], 1000))
        .with_segments(4)
        .build()
        .expect("Should build pipeline");
    BatchOrchestrator::new(pipeline, Arc::new(MarkerSource), 4)
}

#[test]
fn test_end_to_end_survey() {
    let records = survey();
    let ctx = RunContext::default();
    let report = process_survey(
        &orchestrator(),
        records.clone(),
        Some(&BearingStrategy::GpsOnly),
        &Georeferencer::flat(),
        &ctx,
    )
    .expect("Should process survey");

    // the marker straddles the tile boundary and is merged back into one AOI
    assert_eq!(report.batch.results.len(), 10);
    assert_eq!(report.batch.total_aois, 10);
    for result in &report.batch.results {
        assert_eq!(result.detections.aois.len(), 1);
        assert_eq!(result.detections.candidate_count, 2);
    }

    assert_eq!(report.bearings.recovered, 10);
    let img_5 = report.bearings.headings["img_5"];
    assert_eq!(img_5.quality, HeadingQuality::Good);
    assert!(report.bearings.headings.values().all(|h| h.degrees < 0.5 || h.degrees > 359.5));

    // every marker lands 20 m north of its camera
    assert_eq!(report.georeference.located_aois, 10);
    for result in &report.batch.results {
        let fix = result.detections.aois[0].gps.expect("Should be georeferenced");
        let camera = result.record.gps.unwrap();
        let (north, east) = local_offset(camera, fix.point);
        assert_relative_eq!(north, 20.0, epsilon = 0.05);
        assert!(east.abs() < 0.05);
    }

    // ten 100 m footprints at 50 m spacing: one 100 m x 550 m polygon
    assert_eq!(report.coverage.polygons.len(), 1);
    assert_relative_eq!(report.coverage.total_area.square_meters, 55_000.0, max_relative = 5e-3);
}

#[test]
fn test_neighbor_query_from_survey_results() {
    let records = survey();
    let ctx = RunContext::default();
    let report = process_survey(
        &orchestrator(),
        records.clone(),
        Some(&BearingStrategy::GpsOnly),
        &Georeferencer::flat(),
        &ctx,
    )
    .unwrap();

    let footprints = build_footprints(&records, &report.bearings.headings, &ctx).footprints;
    let source = report.batch.find("img_3").unwrap();
    let aoi = &source.detections.aois[0];
    let query = NeighborQuery {
        point: aoi.gps.unwrap().point,
        source_image: "img_3".into(),
        source_index: 3,
        source_pixel: aoi.centroid,
    };

    let search = NeighborTracker::new(&footprints).search(&query, &ctx);
    let ids: Vec<&str> = search.matches.iter().map(|m| m.image_id.as_str()).collect();
    assert_eq!(ids, vec!["img_3", "img_4"]);

    // 30 m south of the next image's centre
    let next = &search.matches[1];
    assert_relative_eq!(next.pixel[0], 100.0, epsilon = 0.2);
    assert_relative_eq!(next.pixel[1], 160.0, epsilon = 0.2);
    assert!(distance_m(footprints[4].center, query.point) < 31.0);
}

#[test]
fn test_missing_metadata_only_skips_geospatial_steps() {
    let mut records = survey();
    records[5].gps = None;
    records[6].altitude_agl = None;
    let report = process_survey(
        &orchestrator(),
        records,
        Some(&BearingStrategy::GpsOnly),
        &Georeferencer::flat(),
        &RunContext::default(),
    )
    .unwrap();

    assert_eq!(report.batch.results.len(), 10);
    assert_eq!(report.batch.total_aois, 10);
    assert_eq!(report.georeference.located_images, 8);
    assert_eq!(report.georeference.skipped.len(), 2);
    assert_eq!(report.coverage.skipped.len(), 2);
}

#[test]
fn test_unreadable_track_keeps_detections() {
    let strategy = BearingStrategy::Track { path: "/nonexistent/track.csv".into(), fallback_to_gps: false };
    let report = process_survey(
        &orchestrator(),
        survey(),
        Some(&strategy),
        &Georeferencer::flat(),
        &RunContext::default(),
    )
    .expect("Should keep the batch when the track cannot be read");

    assert_eq!(report.batch.results.len(), 10);
    assert_eq!(report.batch.total_aois, 10);
    assert!(report.bearings.strategy_error.is_some());
    assert_eq!(report.bearings.missing.len(), 10);

    assert_eq!(report.georeference.located_aois, 0);
    assert_eq!(report.georeference.skip_counts()[&SkipReason::MissingBearing], 10);
    assert_eq!(report.coverage.skipped.len(), 10);
    assert!(report.coverage.skipped.iter().all(|(_, reason)| *reason == SkipReason::MissingBearing));
}
