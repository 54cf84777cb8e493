//! GeoJSON features whose properties are a known Rust type.

use std::marker::PhantomData;

use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::Result,
    types::{AlgorithmKind, ElevationSource, TemperatureSummary},
};

/// Properties of a georeferenced AOI point
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[schemars(description = "Properties of a georeferenced area of interest")]
pub struct AoiProperties {
    #[schemars(description = "Image the AOI was detected in")]
    pub image_id: String,
    #[schemars(description = "AOI number within its image, in reading order")]
    pub aoi_id: usize,
    #[schemars(description = "Aggregate confidence 0..100, absent for unscored detectors")]
    pub confidence: Option<f64>,
    pub pixel_area: u32,
    #[schemars(description = "Bounding box as [x, y, width, height] in pixels")]
    pub bbox: [u32; 4],
    pub methods: Vec<AlgorithmKind>,
    #[schemars(description = "Mean RGB colour inside the bounding box")]
    pub mean_color: [u8; 3],
    pub temperature: Option<TemperatureSummary>,
    pub elevation_source: ElevationSource,
    pub flagged: bool,
    pub comment: Option<String>,
}

/// Properties of one covered region
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[schemars(description = "Properties of a surveyed coverage polygon")]
pub struct CoverageProperties {
    pub index: usize,
    pub square_meters: f64,
    pub hectares: f64,
    pub acres: f64,
    pub hole_count: usize,
}

pub type AoiFeatureCollection = TypedFeatureCollection<AoiProperties>;
pub type CoverageFeatureCollection = TypedFeatureCollection<CoverageProperties>;

/// A feature whose properties object deserializes into `P`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TypedFeature<P> {
    #[serde(flatten)]
    pub feature: Feature,
    #[serde(skip)]
    _properties: PhantomData<P>,
}

impl<P> TypedFeature<P>
where
    P: Serialize + DeserializeOwned,
{
    pub fn new(geometry: Geometry, properties: &P) -> Result<Self> {
        let properties = match serde_json::to_value(properties)? {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        };
        Ok(Self {
            feature: Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties,
                foreign_members: None,
            },
            _properties: PhantomData,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.feature.id = Some(geojson::feature::Id::String(id.into()));
        self
    }

    /// `None` when the properties no longer match `P`
    pub fn properties(&self) -> Option<P> {
        let map = self.feature.properties.clone()?;
        serde_json::from_value(serde_json::Value::Object(map)).ok()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TypedFeatureCollection<P> {
    pub features: Vec<TypedFeature<P>>,
    pub foreign_members: Option<JsonObject>,
}

impl<P> Default for TypedFeatureCollection<P> {
    fn default() -> Self {
        Self {
            features: Vec::new(),
            foreign_members: None,
        }
    }
}

impl<P> TypedFeatureCollection<P>
where
    P: Serialize + DeserializeOwned,
{
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn push(&mut self, feature: TypedFeature<P>) {
        self.features.push(feature);
    }

    pub fn insert_member(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.foreign_members
            .get_or_insert_with(JsonObject::new)
            .insert(key.to_string(), value.into());
    }

    pub fn properties(&self) -> impl Iterator<Item = P> + '_ {
        self.features.iter().filter_map(TypedFeature::properties)
    }

    pub fn into_geojson(self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: self.features.into_iter().map(|f| f.feature).collect(),
            foreign_members: self.foreign_members,
        }
    }

    /// Features whose properties fail to parse as `P` are dropped
    pub fn from_geojson(collection: FeatureCollection) -> Self {
        let features = collection
            .features
            .into_iter()
            .map(|feature| TypedFeature {
                feature,
                _properties: PhantomData,
            })
            .filter(|f| f.properties().is_some())
            .collect();
        Self {
            features,
            foreign_members: collection.foreign_members,
        }
    }
}

impl AoiFeatureCollection {
    /// AOIs at or above the given confidence; unscored AOIs are excluded
    pub fn confident(&self, min_confidence: f64) -> Vec<AoiProperties> {
        self.properties()
            .filter(|p| p.confidence.is_some_and(|c| c >= min_confidence))
            .collect()
    }
}

impl CoverageFeatureCollection {
    pub fn total_square_meters(&self) -> f64 {
        self.properties().map(|p| p.square_meters).sum()
    }
}
