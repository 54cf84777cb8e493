use thiserror::Error;

#[derive(Error, Debug)]
pub enum AoiError {
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Unsupported segment count {0}; expected one of 1, 2, 4, 6, 9, 16, 25, 36")]
    InvalidSegmentCount(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("At least two georeferenced images are required to infer bearings, found {found}")]
    InsufficientGps { found: usize },

    #[error("Failed to parse track log {path}: {message}")]
    TrackParse { path: String, message: String },

    #[error("No pixel data available for image {0}")]
    FrameUnavailable(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFileFormat(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error(transparent)]
    Common(#[from] survey_common::SurveyCommonError),
}

impl AoiError {
    pub(crate) fn track(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TrackParse {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AoiError>;
