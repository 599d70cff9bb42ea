use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde_json::json;

use super::stitch::{is_contiguous, stitch_segments};
use super::Position;

/// Longitude and latitude of a GeoJSON position; altitude is ignored.
pub fn to_position(position: &[f64]) -> Option<Position> {
    match position {
        [x, y, ..] => Some([*x, *y]),
        _ => None,
    }
}

fn to_path(positions: &[Vec<f64>]) -> Vec<Position> {
    positions.iter().filter_map(|p| to_position(p)).collect()
}

pub fn line_string(coordinates: &[Position]) -> Value {
    Value::LineString(coordinates.iter().map(|p| p.to_vec()).collect())
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Flat vertex list of a geometry; used to compare features for equality.
pub fn positions(value: &Value) -> Vec<Position> {
    match value {
        Value::Point(p) => to_position(p).into_iter().collect(),
        Value::MultiPoint(points) | Value::LineString(points) => to_path(points),
        Value::MultiLineString(lines) | Value::Polygon(lines) => {
            lines.iter().flat_map(|l| to_path(l)).collect()
        }
        Value::MultiPolygon(polygons) => polygons.iter().flatten().flat_map(|l| to_path(l)).collect(),
        Value::GeometryCollection(geometries) => geometries.iter().flat_map(|g| positions(&g.value)).collect(),
    }
}

pub fn feature_positions(feature: &Feature) -> Vec<Position> {
    feature
        .geometry
        .as_ref()
        .map(|g| positions(&g.value))
        .unwrap_or_default()
}

/// Line strings of a geometry, or `None` if a collection member is not a line.
fn line_segments(value: &Value) -> Option<Vec<Vec<Position>>> {
    match value {
        Value::LineString(points) => Some(vec![to_path(points)]),
        Value::MultiLineString(lines) => Some(lines.iter().map(|l| to_path(l)).collect()),
        Value::GeometryCollection(geometries) => geometries
            .iter()
            .map(|g| match &g.value {
                Value::LineString(points) => Some(to_path(points)),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// Whether the geometry is a collection of line strings joined end to start.
pub fn is_connected_collection(value: &Value) -> bool {
    match value {
        Value::GeometryCollection(_) => line_segments(value)
            .map(|segments| is_contiguous(segments.iter().map(Vec::as_slice)))
            .unwrap_or(false),
        _ => false,
    }
}

/// Route coordinates of a line string, or of several line strings stitched
/// together. Other geometry kinds have no route path.
pub fn route_coordinates(value: &Value) -> Option<Vec<Position>> {
    match value {
        Value::LineString(points) => Some(to_path(points)),
        Value::MultiLineString(_) | Value::GeometryCollection(_) => {
            line_segments(value).map(|segments| stitch_segments(segments.iter().map(Vec::as_slice)))
        }
        _ => None,
    }
}

pub fn feature(properties: JsonObject, value: Value) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

pub fn convert_to_geojson(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Route trace of one service pattern, tagged with the service number and the
/// zero-based pattern index.
pub fn route_feature(number: &str, pattern: usize, coordinates: &[Position]) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("number".to_string(), json!(number));
    properties.insert("pattern".to_string(), json!(pattern));
    feature(properties, line_string(coordinates))
}

pub fn stop_feature(number: &str, name: &str, road: &str, services: &[String], position: Position) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("number".to_string(), json!(number));
    properties.insert("name".to_string(), json!(name));
    properties.insert("road".to_string(), json!(road));
    properties.insert("services".to_string(), json!(services));
    Feature {
        id: Some(Id::String(number.to_string())),
        ..feature(properties, Value::Point(position.to_vec()))
    }
}

/// Checks the structure every emitted collection must have: a `FeatureCollection`
/// whose features each carry `type = "Feature"`, an object `properties` and an object
/// `geometry`.
pub fn validate_feature_collection(value: &serde_json::Value) -> Result<(), String> {
    let collection = match GeoJson::from_json_value(value.clone()).map_err(|e| e.to_string())? {
        GeoJson::FeatureCollection(collection) => collection,
        GeoJson::Feature(_) => return Err("type is Feature, not FeatureCollection".to_string()),
        GeoJson::Geometry(_) => return Err("type is a geometry, not FeatureCollection".to_string()),
    };
    for (index, feature) in collection.features.iter().enumerate() {
        if feature.properties.is_none() {
            return Err(format!("feature {index} properties is not an object"));
        }
        if feature.geometry.is_none() {
            return Err(format!("feature {index} geometry is not an object"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_geometry_collection() {
        let raw = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"name": "10-1"},
                "geometry": {
                    "type": "GeometryCollection",
                    "geometries": [
                        {"type": "LineString", "coordinates": [[1.0, 2.0], [3.0, 4.0]]},
                        {"type": "LineString", "coordinates": [[3.0, 4.0], [5.0, 6.0]]}
                    ]
                }
            }]
        }"#;
        let collection: FeatureCollection = serde_json::from_str(raw).unwrap();
        let value = &collection.features[0].geometry.as_ref().unwrap().value;
        assert!(is_connected_collection(value));
        assert_eq!(
            route_coordinates(value).unwrap(),
            vec![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]
        );
    }

    #[test]
    fn polygons_keep_their_vertices_but_have_no_route() {
        let polygon = Value::Polygon(vec![vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 0.0]]]);
        assert_eq!(type_name(&polygon), "Polygon");
        assert_eq!(positions(&polygon).len(), 3);
        assert!(route_coordinates(&polygon).is_none());
    }

    #[test]
    fn multi_line_string_is_stitched() {
        let lines = Value::MultiLineString(vec![
            vec![vec![0.0, 0.0], vec![1.0, 1.0]],
            vec![vec![1.0, 1.0], vec![2.0, 2.0]],
        ]);
        assert_eq!(route_coordinates(&lines).unwrap(), vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]);
        assert!(!is_connected_collection(&lines));
    }

    #[test]
    fn mixed_collection_is_not_connected() {
        let value = Value::GeometryCollection(vec![
            Geometry::new(line_string(&[[0.0, 0.0], [1.0, 1.0]])),
            Geometry::new(Value::Point(vec![1.0, 1.0])),
        ]);
        assert!(!is_connected_collection(&value));
        assert!(route_coordinates(&value).is_none());
    }

    #[test]
    fn built_features_validate() {
        let collection = convert_to_geojson(vec![
            route_feature("10", 0, &[[103.8, 1.3], [103.9, 1.4]]),
            stop_feature("01012", "Hotel Grand Pacific", "Victoria St", &["10".to_string()], [103.85, 1.29]),
        ]);
        let value = serde_json::to_value(&collection).unwrap();
        assert!(validate_feature_collection(&value).is_ok());
        assert_eq!(value["features"][1]["id"], "01012");
        assert_eq!(value["features"][1]["geometry"]["type"], "Point");
    }

    #[test]
    fn validation_rejects_malformed_collections() {
        assert!(validate_feature_collection(&json!([])).is_err());
        assert!(validate_feature_collection(&json!({"type": "FeatureCollection"})).is_err());
        let feature = json!({
            "type": "Feature",
            "properties": {},
            "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
        });
        assert!(validate_feature_collection(&feature).is_err());
        let null_properties = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": null,
                "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
            }]
        });
        assert!(validate_feature_collection(&null_properties).is_err());
        let null_geometry = json!({
            "type": "FeatureCollection",
            "features": [{"type": "Feature", "properties": {}, "geometry": null}]
        });
        assert!(validate_feature_collection(&null_geometry).is_err());
    }
}
