//! Small-extent geodesy used for AOI placement and flight-path analysis.
//!
//! Offsets use a local tangent plane around the reference point, which is
//! accurate to well under a pixel at survey altitudes.

use geo::{HaversineBearing, HaversineDistance};

use crate::GeoPoint;

/// WGS84 equatorial radius in metres
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Initial great-circle course from `from` to `to`, degrees clockwise from
/// north in `[0, 360)`
pub fn initial_bearing(from: GeoPoint, to: GeoPoint) -> f64 {
    normalize_heading(from.to_point().haversine_bearing(to.to_point()))
}

/// Great-circle distance in metres
pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    a.to_point().haversine_distance(&b.to_point())
}

/// Wrap any heading into `[0, 360)`
pub fn normalize_heading(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Smallest absolute difference between two headings, in `[0, 180]`
pub fn angle_difference(a: f64, b: f64) -> f64 {
    signed_angle_delta(a, b).abs()
}

/// Signed rotation from `from` to `to`, in `(-180, 180]`
pub fn signed_angle_delta(from: f64, to: f64) -> f64 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 { delta - 360.0 } else { delta }
}

/// Interpolate along the shorter arc between two headings
pub fn interpolate_heading(from: f64, to: f64, fraction: f64) -> f64 {
    normalize_heading(from + signed_angle_delta(from, to) * fraction)
}

/// Move `origin` by a local north/east displacement in metres
pub fn offset(origin: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let lat_rad = origin.latitude.to_radians();
    let d_lat = north_m / EARTH_RADIUS_M;
    let d_lon = east_m / (EARTH_RADIUS_M * lat_rad.cos());
    GeoPoint::new(
        origin.latitude + d_lat.to_degrees(),
        origin.longitude + d_lon.to_degrees(),
    )
}

/// Local north/east displacement in metres from `origin` to `target`.
/// Inverse of [`offset`].
pub fn local_offset(origin: GeoPoint, target: GeoPoint) -> (f64, f64) {
    let lat_rad = origin.latitude.to_radians();
    let north = (target.latitude - origin.latitude).to_radians() * EARTH_RADIUS_M;
    let east = (target.longitude - origin.longitude).to_radians() * EARTH_RADIUS_M * lat_rad.cos();
    (north, east)
}

/// Perpendicular distance in metres from `point` to the segment `a`-`b`,
/// falling back to endpoint distance outside the segment
pub fn point_to_segment_distance(point: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
    let (bn, be) = local_offset(a, b);
    let (pn, pe) = local_offset(a, point);
    let length_sq = bn * bn + be * be;
    if length_sq == 0.0 {
        return (pn * pn + pe * pe).sqrt();
    }
    let t = ((pn * bn + pe * be) / length_sq).clamp(0.0, 1.0);
    let dn = pn - t * bn;
    let de = pe - t * be;
    (dn * dn + de * de).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cardinal_bearings() {
        let origin = GeoPoint::new(40.0, -105.0);
        assert_abs_diff_eq!(initial_bearing(origin, GeoPoint::new(40.01, -105.0)), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(initial_bearing(origin, GeoPoint::new(40.0, -104.99)), 90.0, epsilon = 0.01);
        assert_abs_diff_eq!(initial_bearing(origin, GeoPoint::new(39.99, -105.0)), 180.0, epsilon = 1e-6);
        assert_abs_diff_eq!(initial_bearing(origin, GeoPoint::new(40.0, -105.01)), 270.0, epsilon = 0.01);
    }

    #[test]
    fn test_angle_helpers() {
        assert_eq!(angle_difference(350.0, 10.0), 20.0);
        assert_eq!(angle_difference(10.0, 350.0), 20.0);
        assert_eq!(signed_angle_delta(350.0, 10.0), 20.0);
        assert_eq!(signed_angle_delta(10.0, 350.0), -20.0);
        assert_eq!(normalize_heading(-90.0), 270.0);
        assert_abs_diff_eq!(interpolate_heading(350.0, 10.0, 0.5), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(interpolate_heading(90.0, 180.0, 0.25), 112.5, epsilon = 1e-9);
    }

    #[test]
    fn test_offset_round_trip() {
        let origin = GeoPoint::new(51.5, -0.12);
        let moved = offset(origin, 120.0, -45.0);
        let (north, east) = local_offset(origin, moved);
        assert_abs_diff_eq!(north, 120.0, epsilon = 1e-6);
        assert_abs_diff_eq!(east, -45.0, epsilon = 1e-6);
        assert_abs_diff_eq!(distance_m(origin, moved), 128.16, epsilon = 0.5);
    }

    #[test]
    fn test_point_to_segment_distance() {
        let a = GeoPoint::new(10.0, 10.0);
        let b = offset(a, 100.0, 0.0);
        let beside = offset(a, 50.0, 12.0);
        assert_abs_diff_eq!(point_to_segment_distance(beside, a, b), 12.0, epsilon = 1e-6);

        let beyond = offset(a, 130.0, 0.0);
        assert_abs_diff_eq!(point_to_segment_distance(beyond, a, b), 30.0, epsilon = 1e-6);
    }
}
