//! External flight logs and heading interpolation along them.

use std::{fs, path::Path};

use chrono::{DateTime, Utc};
use quick_xml::{events::Event, Reader};
use survey_common::{
    geodesy::{angle_difference, distance_m, initial_bearing, interpolate_heading},
    utils::{parse_timestamp, seconds_between},
    GeoPoint,
};
use tracing::{debug, info};

use crate::{
    bearing::{HeadingQuality, HeadingSource, ResolvedHeading},
    error::{AoiError, Result},
};

/// Longest time between bracketing points that still interpolates cleanly
pub const GAP_THRESHOLD_SECS: f64 = 60.0;
/// Slower segments count as hovering
pub const MIN_SPEED_MPS: f64 = 0.5;
/// Heading change between brackets treated as a turn
pub const TURN_THRESHOLD_DEG: f64 = 20.0;
/// Segments shorter than this carry no usable course
const MIN_SEGMENT_M: f64 = 0.05;

const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "time", "datetime", "date"];
const LATITUDE_COLUMNS: &[&str] = &["lat", "latitude"];
const LONGITUDE_COLUMNS: &[&str] = &["lon", "longitude", "lng"];
const ALTITUDE_COLUMNS: &[&str] = &["alt", "altitude", "elevation"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFormat {
    Csv,
    Gpx,
    Kml,
}

impl TrackFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Ok(TrackFormat::Csv),
            Some("gpx") => Ok(TrackFormat::Gpx),
            Some("kml") => Ok(TrackFormat::Kml),
            _ => Err(AoiError::track(path.display().to_string(), "unsupported track format, expected .csv, .gpx or .kml")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub timestamp: DateTime<Utc>,
    pub position: GeoPoint,
    pub altitude: Option<f64>,
}

/// A time-ordered flight log with an instantaneous heading per point
#[derive(Debug, Clone)]
pub struct FlightTrack {
    pub format: TrackFormat,
    points: Vec<TrackPoint>,
    headings: Vec<f64>,
}

impl FlightTrack {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let format = TrackFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| AoiError::track(&label, e.to_string()))?;
        let track = Self::parse(&content, format, &label)?;
        info!("Loaded {} track points from {}", track.points.len(), label);
        Ok(track)
    }

    /// Parse log content; `label` names the source in errors
    pub fn parse(content: &str, format: TrackFormat, label: &str) -> Result<Self> {
        let points = match format {
            TrackFormat::Csv => parse_csv(content, label)?,
            TrackFormat::Gpx => parse_gpx(content).map_err(|e| AoiError::track(label, e.to_string()))?,
            TrackFormat::Kml => parse_kml(content).map_err(|e| AoiError::track(label, e.to_string()))?,
        };
        Self::from_points(format, points).map_err(|e| match e {
            AoiError::InvalidConfig(message) => AoiError::track(label, message),
            other => other,
        })
    }

    pub fn from_points(format: TrackFormat, mut points: Vec<TrackPoint>) -> Result<Self> {
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);
        if points.len() < 2 {
            return Err(AoiError::InvalidConfig(format!(
                "track needs at least two timestamped points, found {}",
                points.len()
            )));
        }
        let headings = point_headings(&points);
        Ok(Self { format, points, headings })
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// Heading at a capture time. Exactly at a track timestamp this is the
    /// point's own heading.
    pub fn heading_at(&self, time: DateTime<Utc>) -> ResolvedHeading {
        let source = HeadingSource::from(self.format);
        let n = self.points.len();
        let k = self.points.partition_point(|p| p.timestamp < time);

        if k < n && self.points[k].timestamp == time {
            return ResolvedHeading::new(self.headings[k], source, HeadingQuality::Good);
        }
        if k == 0 {
            return ResolvedHeading::new(self.headings[0], source, HeadingQuality::Gap);
        }
        if k == n {
            return ResolvedHeading::new(self.headings[n - 1], source, HeadingQuality::Gap);
        }

        let (p1, p2) = (&self.points[k - 1], &self.points[k]);
        let (h1, h2) = (self.headings[k - 1], self.headings[k]);
        let dt = seconds_between(p1.timestamp, p2.timestamp);
        let fraction = (seconds_between(p1.timestamp, time) / dt).clamp(0.0, 1.0);
        let interpolated = interpolate_heading(h1, h2, fraction);

        if dt > GAP_THRESHOLD_SECS {
            return ResolvedHeading::new(interpolated, source, HeadingQuality::Gap);
        }
        if distance_m(p1.position, p2.position) / dt < MIN_SPEED_MPS {
            let carried = self.last_valid_course(k - 1).unwrap_or(h1);
            return ResolvedHeading::new(carried, source, HeadingQuality::HoverEstimate);
        }
        let quality = if angle_difference(h1, h2) > TURN_THRESHOLD_DEG {
            HeadingQuality::TurnInferred
        } else {
            HeadingQuality::Good
        };
        ResolvedHeading::new(interpolated, source, quality)
    }

    /// Course of the latest segment before `segment` flown at or above
    /// `MIN_SPEED_MPS`
    fn last_valid_course(&self, segment: usize) -> Option<f64> {
        (0..segment).rev().find_map(|j| {
            let (a, b) = (&self.points[j], &self.points[j + 1]);
            let dt = seconds_between(a.timestamp, b.timestamp);
            (dt > 0.0 && distance_m(a.position, b.position) / dt >= MIN_SPEED_MPS)
                .then(|| initial_bearing(a.position, b.position))
        })
    }
}

/// Course of each segment, `None` where the aircraft barely moved
fn segment_courses(points: &[TrackPoint]) -> Vec<Option<f64>> {
    points
        .windows(2)
        .map(|w| (distance_m(w[0].position, w[1].position) >= MIN_SEGMENT_M).then(|| initial_bearing(w[0].position, w[1].position)))
        .collect()
}

/// Circular mean of the incoming and outgoing course at each point; points
/// with neither carry the previous heading
fn point_headings(points: &[TrackPoint]) -> Vec<f64> {
    let courses = segment_courses(points);
    let mut headings: Vec<Option<f64>> = (0..points.len())
        .map(|i| {
            let incoming = i.checked_sub(1).and_then(|j| courses[j]);
            let outgoing = courses.get(i).copied().flatten();
            match (incoming, outgoing) {
                (Some(a), Some(b)) => Some(interpolate_heading(a, b, 0.5)),
                (a, b) => a.or(b),
            }
        })
        .collect();

    let mut last = None;
    for h in headings.iter_mut() {
        match h {
            Some(v) => last = Some(*v),
            None => *h = last,
        }
    }
    // leading stationary points take the first real heading
    let first = headings.iter().flatten().next().copied().unwrap_or(0.0);
    headings.into_iter().map(|h| h.unwrap_or(first)).collect()
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| headers.iter().position(|h| h == alias))
}

fn parse_csv(content: &str, label: &str) -> Result<Vec<TrackPoint>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_ascii_lowercase()).collect();

    let time_col = find_column(&headers, TIMESTAMP_COLUMNS)
        .ok_or_else(|| AoiError::track(label, "CSV needs a timestamp, time, datetime or date column"))?;
    let lat_col = find_column(&headers, LATITUDE_COLUMNS)
        .ok_or_else(|| AoiError::track(label, "CSV needs a lat or latitude column"))?;
    let lon_col = find_column(&headers, LONGITUDE_COLUMNS)
        .ok_or_else(|| AoiError::track(label, "CSV needs a lon, longitude or lng column"))?;
    let alt_col = find_column(&headers, ALTITUDE_COLUMNS);

    let mut points = Vec::new();
    let mut skipped = 0;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |col: usize| record.get(col).unwrap_or("");
        let parsed = parse_timestamp(field(time_col)).ok().zip(
            field(lat_col)
                .parse::<f64>()
                .ok()
                .zip(field(lon_col).parse::<f64>().ok())
                .and_then(|(lat, lon)| GeoPoint::checked(lat, lon).ok()),
        );
        match parsed {
            Some((timestamp, position)) => points.push(TrackPoint {
                timestamp,
                position,
                altitude: alt_col.and_then(|c| field(c).parse().ok()),
            }),
            None => {
                skipped += 1;
                debug!("Skipping unreadable track row {}", row + 2);
            }
        }
    }
    if skipped > 0 {
        debug!("Skipped {} CSV rows in {}", skipped, label);
    }
    Ok(points)
}

fn parse_gpx(content: &str) -> std::result::Result<Vec<TrackPoint>, quick_xml::Error> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut points = Vec::new();
    let mut current: Option<(f64, f64)> = None;
    let mut time: Option<DateTime<Utc>> = None;
    let mut elevation: Option<f64> = None;
    let mut element: Vec<u8> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"trkpt" => {
                let (mut lat, mut lon) = (None, None);
                for attr in e.attributes() {
                    let attr = attr?;
                    let value = attr.unescape_value()?;
                    match attr.key.local_name().as_ref() {
                        b"lat" => lat = value.trim().parse::<f64>().ok(),
                        b"lon" => lon = value.trim().parse::<f64>().ok(),
                        _ => {}
                    }
                }
                current = lat.zip(lon);
                time = None;
                elevation = None;
            }
            Event::Start(e) => element = e.local_name().as_ref().to_vec(),
            Event::Text(t) if current.is_some() => {
                let text = t.unescape()?;
                match element.as_slice() {
                    b"time" => time = parse_timestamp(&text).ok(),
                    b"ele" => elevation = text.trim().parse().ok(),
                    _ => {}
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"trkpt" => {
                if let (Some((lat, lon)), Some(timestamp)) = (current.take(), time.take()) {
                    if let Ok(position) = GeoPoint::checked(lat, lon) {
                        points.push(TrackPoint { timestamp, position, altitude: elevation });
                    }
                }
            }
            Event::End(_) => element.clear(),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(points)
}

/// `lon,lat[,alt]` for KML coordinates, `lon lat [alt]` for gx:coord
fn parse_kml_coord(text: &str) -> Option<(GeoPoint, Option<f64>)> {
    let mut parts = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>());
    let lon = parts.next()?.ok()?;
    let lat = parts.next()?.ok()?;
    let alt = parts.next().and_then(|r| r.ok());
    GeoPoint::checked(lat, lon).ok().map(|p| (p, alt))
}

/// Reads `gx:Track` when/coord pairs and timestamped point placemarks
fn parse_kml(content: &str) -> std::result::Result<Vec<TrackPoint>, quick_xml::Error> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut points = Vec::new();
    let mut in_track = false;
    let mut whens: Vec<Option<DateTime<Utc>>> = Vec::new();
    let mut coords: Vec<Option<(GeoPoint, Option<f64>)>> = Vec::new();
    let mut placemark_time: Option<DateTime<Utc>> = None;
    let mut placemark_coord: Option<(GeoPoint, Option<f64>)> = None;
    let mut element: Vec<u8> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                element = e.local_name().as_ref().to_vec();
                match element.as_slice() {
                    b"Track" => {
                        in_track = true;
                        whens.clear();
                        coords.clear();
                    }
                    b"Placemark" => {
                        placemark_time = None;
                        placemark_coord = None;
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                match (element.as_slice(), in_track) {
                    (b"when", true) => whens.push(parse_timestamp(&text).ok()),
                    (b"coord", true) => coords.push(parse_kml_coord(&text)),
                    (b"when", false) => placemark_time = parse_timestamp(&text).ok(),
                    (b"coordinates", false) => placemark_coord = parse_kml_coord(&text),
                    _ => {}
                }
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"Track" => {
                        in_track = false;
                        for (when, coord) in whens.drain(..).zip(coords.drain(..)) {
                            if let (Some(timestamp), Some((position, altitude))) = (when, coord) {
                                points.push(TrackPoint { timestamp, position, altitude });
                            }
                        }
                    }
                    b"Placemark" => {
                        if let (Some(timestamp), Some((position, altitude))) = (placemark_time.take(), placemark_coord.take()) {
                            points.push(TrackPoint { timestamp, position, altitude });
                        }
                    }
                    _ => {}
                }
                element.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const CSV_TRACK: &str = "\
Time,Latitude,Longitude,Altitude
1700000000,40.0000,-105.0000,1600
1700000010,40.0010,-105.0000,1600
1700000020,40.0020,-105.0000,1600
1700000030,40.0020,-104.9987,1600
";

    fn csv_track() -> FlightTrack {
        FlightTrack::parse(CSV_TRACK, TrackFormat::Csv, "test.csv").expect("Should parse CSV track")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_exact_timestamp_returns_point_heading() {
        let track = csv_track();
        assert_eq!(track.points().len(), 4);
        assert_eq!(track.points()[0].altitude, Some(1600.0));

        let h = track.heading_at(at(10));
        assert_eq!(h.quality, HeadingQuality::Good);
        assert_eq!(h.source, HeadingSource::Csv);
        assert_abs_diff_eq!(h.degrees, track.headings[1], epsilon = 1e-12);
        assert_abs_diff_eq!(h.degrees, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_turn_and_outside_track() {
        let track = csv_track();
        // point 2 averages north and east; between 2 and 3 the heading swings
        let turn = track.heading_at(at(25));
        assert_eq!(turn.quality, HeadingQuality::TurnInferred);
        assert!(turn.degrees > 45.0 && turn.degrees < 90.0);

        assert_eq!(track.heading_at(at(-5)).quality, HeadingQuality::Gap);
        let after = track.heading_at(at(40));
        assert_eq!(after.quality, HeadingQuality::Gap);
        assert_abs_diff_eq!(after.degrees, 90.0, epsilon = 0.1);
    }

    #[test]
    fn test_gap_and_hover() {
        let points = vec![
            TrackPoint { timestamp: at(0), position: GeoPoint::new(40.0, -105.0), altitude: None },
            TrackPoint { timestamp: at(10), position: GeoPoint::new(40.001, -105.0), altitude: None },
            TrackPoint { timestamp: at(30), position: GeoPoint::new(40.001, -105.0), altitude: None },
            TrackPoint { timestamp: at(200), position: GeoPoint::new(40.002, -105.0), altitude: None },
        ];
        let track = FlightTrack::from_points(TrackFormat::Gpx, points).unwrap();

        let hover = track.heading_at(at(20));
        assert_eq!(hover.quality, HeadingQuality::HoverEstimate);
        assert_abs_diff_eq!(hover.degrees, 0.0, epsilon = 1e-3);

        assert_eq!(track.heading_at(at(100)).quality, HeadingQuality::Gap);
    }

    #[test]
    fn test_hover_drift_keeps_last_course() {
        // 100 m north in 10 s, then drifting 10 m east over 30 s
        let a = GeoPoint::new(40.0, -105.0);
        let b = survey_common::geodesy::offset(a, 100.0, 0.0);
        let c = survey_common::geodesy::offset(b, 0.0, 10.0);
        let points = vec![
            TrackPoint { timestamp: at(0), position: a, altitude: None },
            TrackPoint { timestamp: at(10), position: b, altitude: None },
            TrackPoint { timestamp: at(40), position: c, altitude: None },
        ];
        let track = FlightTrack::from_points(TrackFormat::Csv, points).unwrap();

        let hover = track.heading_at(at(25));
        assert_eq!(hover.quality, HeadingQuality::HoverEstimate);
        assert!(hover.degrees < 0.1 || hover.degrees > 359.9, "got {}", hover.degrees);
    }

    #[test]
    fn test_gpx() {
        let gpx = r#"<?xml version="1.0"?>
<gpx version="1.1" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg>
    <trkpt lat="40.0" lon="-105.0"><ele>1600</ele><time>2024-05-01T12:00:00Z</time></trkpt>
    <trkpt lat="40.0" lon="-104.999"><ele>1601</ele><time>2024-05-01T12:00:10Z</time></trkpt>
    <trkpt lat="40.0" lon="-104.998"><time>2024-05-01T12:00:20Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;
        let track = FlightTrack::parse(gpx, TrackFormat::Gpx, "t.gpx").expect("Should parse GPX");
        assert_eq!(track.points().len(), 3);
        assert_eq!(track.points()[1].altitude, Some(1601.0));
        let h = track.heading_at(parse_timestamp("2024-05-01T12:00:05Z").unwrap());
        assert_eq!(h.source, HeadingSource::Gpx);
        assert_abs_diff_eq!(h.degrees, 90.0, epsilon = 0.01);
    }

    #[test]
    fn test_kml_gx_track_and_placemarks() {
        let kml = r#"<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:gx="http://www.google.com/kml/ext/2.2">
<Document>
  <Placemark><gx:Track>
    <when>2024-05-01T12:00:00Z</when>
    <when>2024-05-01T12:00:10Z</when>
    <gx:coord>-105.0 40.0 1600</gx:coord>
    <gx:coord>-105.0 39.999 1600</gx:coord>
  </gx:Track></Placemark>
  <Placemark>
    <TimeStamp><when>2024-05-01T12:00:20Z</when></TimeStamp>
    <Point><coordinates>-105.0,39.998,1600</coordinates></Point>
  </Placemark>
</Document>
</kml>"#;
        let track = FlightTrack::parse(kml, TrackFormat::Kml, "t.kml").expect("Should parse KML");
        assert_eq!(track.points().len(), 3);
        assert_eq!(track.points()[2].position, GeoPoint::new(39.998, -105.0));
        let h = track.heading_at(parse_timestamp("2024-05-01T12:00:15Z").unwrap());
        assert_abs_diff_eq!(h.degrees, 180.0, epsilon = 0.01);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            FlightTrack::parse("lat,lon\n1,2\n", TrackFormat::Csv, "x.csv"),
            Err(AoiError::TrackParse { .. })
        ));
        assert!(matches!(
            FlightTrack::parse("time,lat,lon\n1700000000,1,2\n", TrackFormat::Csv, "x.csv"),
            Err(AoiError::TrackParse { .. })
        ));
        assert!(TrackFormat::from_path(Path::new("log.txt")).is_err());
        assert_eq!(TrackFormat::from_path(Path::new("LOG.GPX")).unwrap(), TrackFormat::Gpx);
    }
}
