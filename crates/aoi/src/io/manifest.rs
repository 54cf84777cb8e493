//! Image manifests: per-image metadata plus where the pixels live.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{AoiError, Result},
    traits::FrameSource,
    types::{ExternalDetection, ImageFrame, ImageRecord, ThermalCalibration, ThermalFrame},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestEntry {
    #[serde(flatten)]
    pub record: ImageRecord,
    /// RGB image, relative paths resolve against the manifest directory
    pub path: PathBuf,
    /// 16-bit radiometric raster aligned with the RGB image
    #[serde(default)]
    pub thermal_path: Option<PathBuf>,
    #[serde(default)]
    pub thermal_calibration: Option<ThermalCalibration>,
    /// Boxes from an external model, read by the learned-model detector
    #[serde(default)]
    pub detections: Vec<ExternalDetection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SurveyManifest {
    pub images: Vec<ManifestEntry>,
}

impl SurveyManifest {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load by extension and resolve image paths against the file's directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut manifest = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&fs::read_to_string(path)?)?,
            Some("json") => Self::from_json(&fs::read_to_string(path)?)?,
            _ => return Err(AoiError::UnsupportedFileFormat(path.display().to_string())),
        };
        if let Some(base) = path.parent() {
            manifest.resolve_paths(base);
        }
        Ok(manifest)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        for entry in &mut self.images {
            if entry.path.is_relative() {
                entry.path = base.join(&entry.path);
            }
            if let Some(thermal) = entry.thermal_path.as_mut().filter(|p| p.is_relative()) {
                *thermal = base.join(&*thermal);
            }
        }
    }

    /// Records in manifest order; images with a thermal raster are flagged
    pub fn records(&self) -> Vec<ImageRecord> {
        self.images
            .iter()
            .map(|entry| {
                let mut record = entry.record.clone();
                record.thermal |= entry.thermal_path.is_some();
                record
            })
            .collect()
    }

    pub fn frame_source(&self) -> FileFrameSource {
        FileFrameSource {
            entries: self
                .images
                .iter()
                .map(|entry| (entry.record.id.clone(), entry.clone()))
                .collect(),
        }
    }
}

/// Decodes images from disk when a worker asks for them
#[derive(Debug, Clone, Default)]
pub struct FileFrameSource {
    entries: HashMap<String, ManifestEntry>,
}

impl FrameSource for FileFrameSource {
    fn load(&self, record: &ImageRecord) -> Result<ImageFrame> {
        let entry = self
            .entries
            .get(&record.id)
            .ok_or_else(|| AoiError::FrameUnavailable(record.id.clone()))?;

        let rgb = image::open(&entry.path)?.to_rgb8();
        if (rgb.width(), rgb.height()) != (record.width, record.height) {
            warn!(
                "{}: manifest says {}x{}, file is {}x{}",
                record.id,
                record.width,
                record.height,
                rgb.width(),
                rgb.height()
            );
        }
        let mut frame = ImageFrame::new(rgb).with_external(entry.detections.clone());

        if let Some(thermal_path) = &entry.thermal_path {
            let raw = image::open(thermal_path)?.to_luma16();
            let calibration = entry.thermal_calibration.unwrap_or_default();
            frame = frame.with_thermal(ThermalFrame::from_raw(&raw, calibration));
        }
        debug!("Loaded {} ({}x{})", record.id, frame.width(), frame.height());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb, RgbImage};

    const MANIFEST: &str = r#"
[[images]]
id = "DJI_0001"
width = 8
height = 6
path = "DJI_0001.png"
altitude_agl = 60.0
gps = { latitude = 45.0, longitude = 7.0 }
gimbal = { pitch = -90.0 }

[[images]]
id = "DJI_0002"
width = 8
height = 6
path = "/abs/DJI_0002.png"
thermal_path = "DJI_0002_T.png"
"#;

    #[test]
    fn test_manifest_paths_and_records() {
        let mut manifest = SurveyManifest::from_toml(MANIFEST).expect("Should parse manifest");
        manifest.resolve_paths(Path::new("/survey"));

        assert_eq!(manifest.images[0].path, PathBuf::from("/survey/DJI_0001.png"));
        assert_eq!(manifest.images[1].path, PathBuf::from("/abs/DJI_0002.png"));
        assert_eq!(manifest.images[1].thermal_path, Some(PathBuf::from("/survey/DJI_0002_T.png")));

        let records = manifest.records();
        assert_eq!(records[0].altitude_agl, Some(60.0));
        assert_eq!(records[0].gimbal.pitch, Some(-90.0));
        assert!(!records[0].thermal);
        assert!(records[1].thermal);
    }

    #[test]
    fn test_file_source_loads_rgb_and_thermal() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(8, 6, Rgb([10, 20, 30])).save(dir.path().join("DJI_0001.png")).unwrap();
        let raw: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_pixel(8, 6, Luma([7500]));
        raw.save(dir.path().join("DJI_0001_T.png")).unwrap();

        let manifest_path = dir.path().join("manifest.json");
        fs::write(
            &manifest_path,
            r#"{"images": [{"id": "DJI_0001", "width": 8, "height": 6,
                "path": "DJI_0001.png", "thermal_path": "DJI_0001_T.png"}]}"#,
        )
        .unwrap();

        let manifest = SurveyManifest::from_file(&manifest_path).expect("Should load manifest");
        let records = manifest.records();
        let frame = manifest.frame_source().load(&records[0]).expect("Should load frame");
        assert_eq!(frame.rgb.get_pixel(3, 3), &Rgb([10, 20, 30]));
        let thermal = frame.thermal.expect("Should have thermal data");
        assert!((thermal.get(0, 0) - 26.85).abs() < 1e-3);
    }

    #[test]
    fn test_unknown_image_and_format() {
        let source = FileFrameSource::default();
        assert!(matches!(
            source.load(&ImageRecord::new("missing", 1, 1)),
            Err(AoiError::FrameUnavailable(_))
        ));
        assert!(matches!(
            SurveyManifest::from_file("manifest.yaml"),
            Err(AoiError::UnsupportedFileFormat(_))
        ));
    }
}
