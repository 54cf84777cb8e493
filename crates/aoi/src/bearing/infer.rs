//! Headings from image positions alone, tuned for lawn-mower survey patterns
//! where no images are taken mid-turn.

use std::collections::HashMap;

use survey_common::{
    geodesy::{angle_difference, distance_m, initial_bearing, point_to_segment_distance},
    GeoPoint,
};
use tracing::{debug, info};

use crate::{
    batch::RunContext,
    bearing::{HeadingQuality, HeadingSource, ResolvedHeading},
    error::{AoiError, Result},
    types::ImageRecord,
};

/// Legs shorter than this carry the last valid heading
pub const MIN_LEG_LENGTH_M: f64 = 2.5;
/// Course agreement needed to stay on a leg
pub const LEG_ALIGNMENT_DEG: f64 = 20.0;
/// Positions used to estimate a leg's course
pub const LEG_LOOKAROUND: usize = 5;

const DEFAULT_TURN_THRESHOLD_M: f64 = 15.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsInference {
    pub headings: HashMap<String, ResolvedHeading>,
    /// Cross-track deviation treated as straight flight, for diagnostics
    pub turn_threshold_m: f64,
    pub cancelled: bool,
}

/// Infer a heading for every record with GPS. Records are ordered by capture
/// time; those without a timestamp sort first.
pub fn infer_from_gps(records: &[ImageRecord], ctx: &RunContext) -> Result<GpsInference> {
    let mut fixes: Vec<&ImageRecord> = records.iter().filter(|r| r.gps.is_some()).collect();
    if fixes.len() < 2 {
        return Err(AoiError::InsufficientGps { found: fixes.len() });
    }
    fixes.sort_by_key(|r| r.timestamp);
    let positions: Vec<GeoPoint> = fixes.iter().filter_map(|r| r.gps).collect();
    let n = positions.len();

    let turn_threshold_m = turn_threshold(&positions);
    info!("Inferring headings for {} images, turn threshold {:.1} m", n, turn_threshold_m);

    let mut inference = GpsInference {
        turn_threshold_m,
        ..Default::default()
    };
    let mut last_valid: Option<f64> = None;

    for i in 0..n {
        if ctx.is_cancelled() {
            inference.cancelled = true;
            break;
        }
        let here = positions[i];

        let (mut heading, mut source, mut quality) = if i == 0 {
            if distance_m(here, positions[1]) >= MIN_LEG_LENGTH_M {
                let b = initial_bearing(here, positions[1]);
                last_valid = Some(b);
                (b, HeadingSource::PrevNext, HeadingQuality::Good)
            } else {
                // hovering at the start: take the first leg that moves
                let first_leg = positions
                    .windows(2)
                    .find(|w| distance_m(w[0], w[1]) >= MIN_LEG_LENGTH_M)
                    .map(|w| initial_bearing(w[0], w[1]));
                last_valid = first_leg;
                let b = first_leg.unwrap_or_else(|| initial_bearing(here, positions[1]));
                (b, HeadingSource::NextLeg, HeadingQuality::HoverEstimate)
            }
        } else if i == n - 1 {
            (initial_bearing(positions[n - 2], here), HeadingSource::PrevNext, HeadingQuality::Good)
        } else {
            let prev = positions[i - 1];
            let next = positions[i + 1];

            let on_prev_leg = (i >= 2).then(|| {
                let leg = initial_bearing(positions[i.saturating_sub(LEG_LOOKAROUND)], prev);
                (leg, angle_difference(leg, initial_bearing(prev, here)) <= LEG_ALIGNMENT_DEG)
            });

            match on_prev_leg {
                Some((leg, true)) => {
                    last_valid = Some(leg);
                    (leg, HeadingSource::PrevLeg, HeadingQuality::Good)
                }
                _ if i + 2 < n => {
                    let leg_end = (i + LEG_LOOKAROUND + 1).min(n - 1);
                    let next_leg = initial_bearing(next, positions[leg_end]);
                    let outgoing = initial_bearing(here, next);
                    if angle_difference(next_leg, outgoing) <= LEG_ALIGNMENT_DEG {
                        (next_leg, HeadingSource::NextLeg, HeadingQuality::TurnInferred)
                    } else {
                        (outgoing, HeadingSource::PrevNext, HeadingQuality::TurnInferred)
                    }
                }
                _ => {
                    let b = initial_bearing(prev, here);
                    last_valid = Some(b);
                    (b, HeadingSource::PrevNext, HeadingQuality::Good)
                }
            }
        };

        if i > 0 && distance_m(positions[i - 1], here) < MIN_LEG_LENGTH_M {
            if let Some(carried) = last_valid {
                heading = carried;
                source = HeadingSource::CarriedForward;
                quality = HeadingQuality::HoverEstimate;
            }
        }

        debug!("{}: heading {:.1} ({}, {})", fixes[i].id, heading, source, quality);
        inference
            .headings
            .insert(fixes[i].id.clone(), ResolvedHeading::new(heading, source, quality));
        ctx.report(i + 1, n, "Inferring headings from GPS");
    }
    Ok(inference)
}

/// 85th percentile of each interior position's distance from the line
/// through its neighbours, clamped to 5..=30 m
pub fn turn_threshold(positions: &[GeoPoint]) -> f64 {
    if positions.len() < 5 {
        return DEFAULT_TURN_THRESHOLD_M;
    }
    let mut deviations: Vec<f64> = positions
        .windows(3)
        .map(|w| point_to_segment_distance(w[1], w[0], w[2]))
        .collect();
    deviations.sort_by(f64::total_cmp);

    let rank = 0.85 * (deviations.len() - 1) as f64;
    let (lo, hi) = (rank.floor() as usize, rank.ceil() as usize);
    let value = deviations[lo] + (deviations[hi] - deviations[lo]) * (rank - lo as f64);
    value.clamp(5.0, 30.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    const STEP: f64 = 0.0003; // roughly 33 m of latitude

    fn record(i: usize, lat: f64, lon: f64) -> ImageRecord {
        ImageRecord::new(format!("img_{i:02}"), 100, 100)
            .with_gps(lat, lon)
            .with_timestamp(Utc.timestamp_opt(1_700_000_000 + i as i64 * 4, 0).unwrap())
    }

    /// Two north-south legs joined by an eastward shift
    fn lawnmower() -> Vec<ImageRecord> {
        let mut records = Vec::new();
        for i in 0..6 {
            records.push(record(i, 40.0 + i as f64 * STEP, -105.0));
        }
        for j in 0..6 {
            records.push(record(6 + j, 40.0 + (5 - j) as f64 * STEP, -104.9995));
        }
        records
    }

    #[test]
    fn test_legs_and_turn() {
        let inference = infer_from_gps(&lawnmower(), &RunContext::default()).expect("Should infer");
        let h = &inference.headings;
        assert_eq!(h.len(), 12);

        assert_abs_diff_eq!(h["img_03"].degrees, 0.0, epsilon = 0.5);
        assert_eq!(h["img_03"].source, HeadingSource::PrevLeg);

        // first image of the return leg aligns with the next leg
        assert_eq!(h["img_06"].quality, HeadingQuality::TurnInferred);
        assert_abs_diff_eq!(h["img_06"].degrees, 180.0, epsilon = 0.5);

        assert_abs_diff_eq!(h["img_09"].degrees, 180.0, epsilon = 0.5);
        assert_eq!(h["img_11"].source, HeadingSource::PrevNext);
    }

    #[test]
    fn test_hover_carries_heading() {
        let mut records = lawnmower();
        // img_04 barely moves from img_03
        records[4].gps = records[3].gps.map(|p| GeoPoint::new(p.latitude + 0.000005, p.longitude));
        let inference = infer_from_gps(&records, &RunContext::default()).unwrap();
        let hover = inference.headings["img_04"];
        assert_eq!(hover.quality, HeadingQuality::HoverEstimate);
        assert_eq!(hover.source, HeadingSource::CarriedForward);
        assert_abs_diff_eq!(hover.degrees, 0.0, epsilon = 0.5);
    }

    #[test]
    fn test_hover_at_start_takes_first_leg() {
        let mut records = lawnmower();
        // img_00 sits under a metre west of img_01, so its own leg points east
        records[0].gps = Some(GeoPoint::new(40.0 + STEP, -105.00001));
        let inference = infer_from_gps(&records, &RunContext::default()).unwrap();

        let first = inference.headings["img_00"];
        assert_eq!(first.quality, HeadingQuality::HoverEstimate);
        assert_eq!(first.source, HeadingSource::NextLeg);
        assert_abs_diff_eq!(first.degrees, 0.0, epsilon = 0.5);

        let second = inference.headings["img_01"];
        assert_eq!(second.source, HeadingSource::CarriedForward);
        assert_abs_diff_eq!(second.degrees, 0.0, epsilon = 0.5);
    }

    #[test]
    fn test_requires_two_fixes() {
        let records = vec![record(0, 40.0, -105.0), ImageRecord::new("no_gps", 10, 10)];
        assert!(matches!(
            infer_from_gps(&records, &RunContext::default()),
            Err(AoiError::InsufficientGps { found: 1 })
        ));
    }

    #[test]
    fn test_capture_order_not_input_order() {
        let mut records = lawnmower();
        records.reverse();
        let inference = infer_from_gps(&records, &RunContext::default()).unwrap();
        assert_abs_diff_eq!(inference.headings["img_02"].degrees, 0.0, epsilon = 0.5);
    }

    #[test]
    fn test_turn_threshold_clamped() {
        let straight: Vec<GeoPoint> = (0..8).map(|i| GeoPoint::new(40.0 + i as f64 * STEP, -105.0)).collect();
        assert_eq!(turn_threshold(&straight), 5.0);
        assert_eq!(turn_threshold(&straight[..3]), DEFAULT_TURN_THRESHOLD_M);
    }
}
