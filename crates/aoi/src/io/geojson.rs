use std::path::Path;

use geojson::{Geometry, Value};
use survey_common::GeoPoint;

use crate::{
    batch::ImageResult,
    coverage::{CoverageExtent, CoveragePolygon},
    error::Result,
    typed_geojson::{AoiFeatureCollection, AoiProperties, CoverageFeatureCollection, CoverageProperties, TypedFeature},
};

fn position(point: GeoPoint) -> Vec<f64> {
    vec![point.longitude, point.latitude]
}

fn ring(points: &[GeoPoint]) -> Vec<Vec<f64>> {
    points.iter().copied().map(position).collect()
}

/// One point feature per georeferenced AOI. AOIs without a ground location
/// are left out.
pub fn aoi_features(results: &[ImageResult]) -> Result<AoiFeatureCollection> {
    let mut collection = AoiFeatureCollection::default();
    let mut unlocated = 0usize;

    for result in results {
        for aoi in &result.detections.aois {
            let Some(fix) = aoi.gps else {
                unlocated += 1;
                continue;
            };
            let properties = AoiProperties {
                image_id: result.record.id.clone(),
                aoi_id: aoi.id,
                confidence: aoi.confidence,
                pixel_area: aoi.pixel_area,
                bbox: [aoi.bbox.x, aoi.bbox.y, aoi.bbox.width, aoi.bbox.height],
                methods: aoi.methods.clone(),
                mean_color: aoi.metadata.mean_color,
                temperature: aoi.metadata.temperature,
                elevation_source: fix.elevation_source,
                flagged: aoi.review.flagged,
                comment: aoi.review.comment.clone(),
            };
            let geometry = Geometry::new(Value::Point(position(fix.point)));
            collection.push(TypedFeature::new(geometry, &properties)?.with_id(format!("{}#{}", result.record.id, aoi.id)));
        }
    }

    collection.insert_member("aoi_count", collection.len());
    collection.insert_member("unlocated_count", unlocated);
    Ok(collection)
}

/// Coverage polygons with their areas
pub fn coverage_features(extent: &CoverageExtent) -> Result<CoverageFeatureCollection> {
    let mut collection = CoverageFeatureCollection::default();
    for (index, polygon) in extent.polygons.iter().enumerate() {
        collection.push(TypedFeature::new(polygon_geometry(polygon), &CoverageProperties {
            index,
            square_meters: polygon.area.square_meters,
            hectares: polygon.area.hectares,
            acres: polygon.area.acres,
            hole_count: polygon.holes.len(),
        })?);
    }
    collection.insert_member("total_square_meters", extent.total_area.square_meters);
    collection.insert_member("images_processed", extent.processed);
    collection.insert_member("images_skipped", extent.skipped.len());
    Ok(collection)
}

fn polygon_geometry(polygon: &CoveragePolygon) -> Geometry {
    let mut rings = vec![ring(&polygon.exterior)];
    rings.extend(polygon.holes.iter().map(|hole| ring(hole)));
    Geometry::new(Value::Polygon(rings))
}

pub fn save_aois<P: AsRef<Path>>(results: &[ImageResult], path: P) -> Result<()> {
    let collection = aoi_features(results)?.into_geojson();
    std::fs::write(path, serde_json::to_string_pretty(&collection)?)?;
    Ok(())
}

pub fn save_coverage<P: AsRef<Path>>(extent: &CoverageExtent, path: P) -> Result<()> {
    let collection = coverage_features(extent)?.into_geojson();
    std::fs::write(path, serde_json::to_string_pretty(&collection)?)?;
    Ok(())
}
