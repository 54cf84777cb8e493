//! # Survey Common - Shared Geodesy Types and Utilities
//!
//! Shared value types and small geodesy helpers used by the AOI pipeline and
//! its command line front-end.
//!
//! ## Example
//!
//! ```rust
//! use survey_common::{GeoPoint, geodesy};
//!
//! let launch = GeoPoint::new(47.6205, -122.3493);
//! let waypoint = geodesy::offset(launch, 100.0, 0.0);
//!
//! let bearing = geodesy::initial_bearing(launch, waypoint);
//! assert!(bearing < 0.5 || bearing > 359.5);
//! ```

use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use thiserror::Error;

// Re-exports for convenience
pub use chrono::{DateTime, Utc};

pub mod area;
pub mod geodesy;

pub use area::AreaMeasurement;

/// Result type for shared survey operations
pub type Result<T> = std::result::Result<T, SurveyCommonError>;

/// Standard error type for shared survey operations
#[derive(Error, Debug)]
pub enum SurveyCommonError {
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Invalid value: {message}")]
    InvalidValue { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// WGS84 latitude/longitude in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point without validation
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Create a point, rejecting values outside the valid WGS84 range
    pub fn checked(latitude: f64, longitude: f64) -> Result<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(SurveyCommonError::InvalidCoordinate { latitude, longitude });
        }
        Ok(Self { latitude, longitude })
    }

    /// Convert to a `geo` point (x = longitude, y = latitude)
    pub fn to_point(self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

impl From<geo::Point<f64>> for GeoPoint {
    fn from(point: geo::Point<f64>) -> Self {
        Self::new(point.y(), point.x())
    }
}

impl From<GeoPoint> for geo::Coord<f64> {
    fn from(point: GeoPoint) -> Self {
        geo::Coord { x: point.longitude, y: point.latitude }
    }
}

/// Utility functions for parsing telemetry values
pub mod utils {
    use super::*;
    use chrono::{NaiveDateTime, TimeZone};

    /// Date-time layouts accepted by [`parse_timestamp`] after RFC 3339 fails
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S%.f",
        "%Y:%m:%d %H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    /// Parse a timestamp from unix seconds, RFC 3339 or a common date-time
    /// layout. Naive values are taken as UTC.
    pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SurveyCommonError::Parse("Empty timestamp".to_string()));
        }

        if let Ok(number) = value.parse::<f64>() {
            return from_unix(number);
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Ok(parsed.with_timezone(&Utc));
        }

        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
                return Ok(Utc.from_utc_datetime(&naive));
            }
        }

        Err(SurveyCommonError::Parse(format!("Unrecognised timestamp '{value}'")))
    }

    /// Interpret a unix time in seconds, or milliseconds when the magnitude
    /// only makes sense as milliseconds
    pub fn from_unix(value: f64) -> Result<DateTime<Utc>> {
        if !value.is_finite() {
            return Err(SurveyCommonError::Parse(format!("Invalid unix time {value}")));
        }
        let seconds = if value.abs() > 1e11 { value / 1000.0 } else { value };
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(whole as i64, nanos)
            .ok_or_else(|| SurveyCommonError::Parse(format!("Unix time out of range: {value}")))
    }

    /// Seconds between two instants, negative when `b` precedes `a`
    pub fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
        (b - a).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_checked_point() {
        assert!(GeoPoint::checked(45.0, 120.0).is_ok());
        assert!(GeoPoint::checked(91.0, 0.0).is_err());
        assert!(GeoPoint::checked(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_point_conversion() {
        let point = GeoPoint::new(10.0, 20.0);
        let geo_point = point.to_point();
        assert_eq!(geo_point.x(), 20.0);
        assert_eq!(geo_point.y(), 10.0);
        assert_eq!(GeoPoint::from(geo_point), point);
    }

    #[test]
    fn test_parse_unix_timestamp() {
        let ts = utils::parse_timestamp("1700000000").unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);

        let millis = utils::parse_timestamp("1700000000500").unwrap();
        assert_eq!(millis.timestamp(), 1_700_000_000);
        assert_eq!(millis.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_parse_iso_and_naive_timestamps() {
        let rfc = utils::parse_timestamp("2024-05-01T12:30:15Z").unwrap();
        assert_eq!(rfc.hour(), 12);
        assert_eq!(rfc.minute(), 30);

        let offset = utils::parse_timestamp("2024-05-01T14:30:15+02:00").unwrap();
        assert_eq!(offset, rfc);

        let naive = utils::parse_timestamp("2024-05-01 12:30:15.250").unwrap();
        assert_eq!(naive.second(), 15);
        assert_eq!(naive.timestamp_subsec_millis(), 250);

        let exif = utils::parse_timestamp("2024:05:01 12:30:15").unwrap();
        assert_eq!(exif.day(), 1);
        assert_eq!(exif.month(), 5);
    }

    #[test]
    fn test_parse_invalid_timestamp() {
        assert!(utils::parse_timestamp("").is_err());
        assert!(utils::parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_seconds_between() {
        let a = utils::parse_timestamp("2024-05-01T12:00:00Z").unwrap();
        let b = utils::parse_timestamp("2024-05-01T12:01:30Z").unwrap();
        assert_eq!(utils::seconds_between(a, b), 90.0);
        assert_eq!(utils::seconds_between(b, a), -90.0);
    }
}
