pub mod geojson;
pub mod manifest;

pub use self::geojson::{aoi_features, coverage_features, save_aois, save_coverage};
pub use manifest::{FileFrameSource, ManifestEntry, SurveyManifest};
