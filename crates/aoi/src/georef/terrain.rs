use std::{fs, path::Path};

use survey_common::GeoPoint;
use tracing::info;

use crate::{
    error::{AoiError, Result},
    traits::ElevationProvider,
};

/// Regular latitude/longitude elevation grid sampled bilinearly. Row 0 is the
/// southern edge.
#[derive(Debug, Clone, PartialEq)]
pub struct GridElevation {
    south_west: GeoPoint,
    lat_step: f64,
    lon_step: f64,
    cols: usize,
    rows: usize,
    values: Vec<f64>,
    no_data: Option<f64>,
}

impl GridElevation {
    pub fn new(south_west: GeoPoint, lat_step: f64, lon_step: f64, cols: usize, rows: usize, values: Vec<f64>) -> Result<Self> {
        if cols < 2 || rows < 2 {
            return Err(AoiError::InvalidConfig("Elevation grid needs at least 2x2 samples".into()));
        }
        if lat_step <= 0.0 || lon_step <= 0.0 {
            return Err(AoiError::InvalidConfig("Elevation grid steps must be positive".into()));
        }
        if values.len() != cols * rows {
            return Err(AoiError::InvalidConfig(format!(
                "Elevation grid of {cols}x{rows} needs {} values, got {}",
                cols * rows,
                values.len()
            )));
        }
        Ok(Self {
            south_west,
            lat_step,
            lon_step,
            cols,
            rows,
            values,
            no_data: None,
        })
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = Some(no_data);
        self
    }

    /// Load an ESRI ASCII grid in geographic coordinates
    pub fn from_ascii_grid<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let grid = Self::parse_ascii_grid(&fs::read_to_string(path)?)?;
        info!("Loaded {}x{} elevation grid from {:?}", grid.cols, grid.rows, path);
        Ok(grid)
    }

    pub fn parse_ascii_grid(content: &str) -> Result<Self> {
        let bad = |msg: &str| AoiError::InvalidConfig(format!("ASCII grid: {msg}"));
        let mut tokens = content.split_whitespace().peekable();

        let (mut cols, mut rows, mut x0, mut y0, mut cell, mut no_data) = (None, None, None, None, None, None);
        let mut centered = false;
        while let Some(key) = tokens.peek().copied() {
            if key.parse::<f64>().is_ok() {
                break;
            }
            tokens.next();
            let value: f64 = tokens
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| bad(&format!("missing value for {key}")))?;
            match key.to_ascii_lowercase().as_str() {
                "ncols" => cols = Some(value as usize),
                "nrows" => rows = Some(value as usize),
                "xllcorner" => x0 = Some(value),
                "yllcorner" => y0 = Some(value),
                "xllcenter" => {
                    x0 = Some(value);
                    centered = true;
                }
                "yllcenter" => y0 = Some(value),
                "cellsize" => cell = Some(value),
                "nodata_value" => no_data = Some(value),
                other => return Err(bad(&format!("unknown header {other}"))),
            }
        }
        let (cols, rows) = (cols.ok_or_else(|| bad("missing ncols"))?, rows.ok_or_else(|| bad("missing nrows"))?);
        let cell = cell.ok_or_else(|| bad("missing cellsize"))?;
        let (mut x0, mut y0) = (x0.ok_or_else(|| bad("missing x origin"))?, y0.ok_or_else(|| bad("missing y origin"))?);
        if !centered {
            x0 += cell / 2.0;
            y0 += cell / 2.0;
        }

        let north_first: Vec<f64> = tokens
            .map(|t| t.parse::<f64>().map_err(|_| bad(&format!("invalid value {t}"))))
            .collect::<Result<_>>()?;
        if north_first.len() != cols * rows {
            return Err(bad(&format!("expected {} values, found {}", cols * rows, north_first.len())));
        }
        let values = north_first.chunks(cols).rev().flatten().copied().collect();

        let grid = Self::new(GeoPoint::new(y0, x0), cell, cell, cols, rows, values)?;
        Ok(match no_data {
            Some(nd) => grid.with_no_data(nd),
            None => grid,
        })
    }

    fn sample(&self, col: usize, row: usize) -> Option<f64> {
        let v = self.values[row * self.cols + col];
        (self.no_data != Some(v) && v.is_finite()).then_some(v)
    }
}

impl ElevationProvider for GridElevation {
    fn elevation(&self, point: GeoPoint) -> Option<f64> {
        let fr = (point.latitude - self.south_west.latitude) / self.lat_step;
        let fc = (point.longitude - self.south_west.longitude) / self.lon_step;
        if fr < 0.0 || fc < 0.0 || fr > (self.rows - 1) as f64 || fc > (self.cols - 1) as f64 {
            return None;
        }
        let (r0, c0) = ((fr.floor() as usize).min(self.rows - 2), (fc.floor() as usize).min(self.cols - 2));
        let (tr, tc) = (fr - r0 as f64, fc - c0 as f64);

        let z00 = self.sample(c0, r0)?;
        let z01 = self.sample(c0 + 1, r0)?;
        let z10 = self.sample(c0, r0 + 1)?;
        let z11 = self.sample(c0 + 1, r0 + 1)?;
        let south = z00 + (z01 - z00) * tc;
        let north = z10 + (z11 - z10) * tc;
        Some(south + (north - south) * tr)
    }
}
