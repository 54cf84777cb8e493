use aoi::{BearingStrategy, DetectionConfig};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SurveyCliError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Aoi(#[from] aoi::AoiError),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// Output file names written into `output_dir`
pub const RESULTS_FILE: &str = "results.json";
pub const AOI_GEOJSON_FILE: &str = "aois.geojson";
pub const COVERAGE_GEOJSON_FILE: &str = "coverage.geojson";

/// Everything one `process` run needs
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SurveyConfig {
    /// Image manifest, TOML or JSON
    pub manifest: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Where headings come from for images without gimbal yaw
    #[serde(default)]
    pub bearing: Option<BearingStrategy>,
    /// ESRI ASCII elevation grid for terrain-corrected georeferencing
    #[serde(default)]
    pub terrain: Option<PathBuf>,
}

impl SurveyConfig {
    pub fn from_toml(content: &str) -> Result<Self, SurveyCliError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self, SurveyCliError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Auto-detect file format, then resolve relative paths against the
    /// config file's directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SurveyCliError> {
        let path = path.as_ref();
        let mut config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&fs::read_to_string(path)?)?,
            Some("json") => Self::from_json(&fs::read_to_string(path)?)?,
            _ => return Err(SurveyCliError::UnsupportedFileFormat),
        };
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.detection.validate()?;
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.manifest);
        resolve(&mut self.output_dir);
        if let Some(terrain) = self.terrain.as_mut() {
            resolve(terrain);
        }
        if let Some(reference) = self.detection.histogram_reference.as_mut() {
            resolve(reference);
        }
        if let Some(BearingStrategy::Track { path, .. }) = self.bearing.as_mut() {
            resolve(path);
        }
    }

    pub fn to_toml(&self) -> Result<String, SurveyCliError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(SurveyConfig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aoi::AlgorithmConfig;

    const CONFIG: &str = r#"
manifest = "manifest.toml"
output_dir = "out"
terrain = "/data/dem.asc"

[bearing]
type = "track"
path = "flight.gpx"
fallback_to_gps = true

[detection]
segments = 4
min_area = 20

[[detection.algorithms]]
type = "thermal_range"
params = { min_celsius = 30.0, max_celsius = 45.0 }
"#;

    #[test]
    fn test_survey_config_paths_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.toml");
        fs::write(&path, CONFIG).unwrap();

        let config = SurveyConfig::from_file(&path).expect("Should load survey config");
        assert_eq!(config.manifest, dir.path().join("manifest.toml"));
        assert_eq!(config.output_dir, dir.path().join("out"));
        assert_eq!(config.terrain, Some(PathBuf::from("/data/dem.asc")));
        assert_eq!(
            config.bearing,
            Some(BearingStrategy::Track { path: dir.path().join("flight.gpx"), fallback_to_gps: true })
        );
        assert_eq!(config.detection.segments, 4);
        assert!(matches!(config.detection.algorithms[0], AlgorithmConfig::ThermalRange { .. }));
    }

    #[test]
    fn test_invalid_detection_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.json");
        fs::write(&path, r#"{"manifest": "m.json", "output_dir": "o", "detection": {"segments": 5}}"#).unwrap();
        assert!(matches!(SurveyConfig::from_file(&path), Err(SurveyCliError::Aoi(_))));
        assert!(matches!(
            SurveyConfig::from_file(dir.path().join("survey.yaml")),
            Err(SurveyCliError::UnsupportedFileFormat)
        ));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = SurveyConfig::from_toml(CONFIG).unwrap();
        let again = SurveyConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(config, again);
    }
}
