use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use roxmltree::{Document, Node};

use crate::geometry::features::{convert_to_geojson, feature};

use super::error::Error;

fn is(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn parse_positions(text: &str) -> Result<Vec<Vec<f64>>, Error> {
    text.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',').map(str::trim);
            let mut next = |field: &str| -> Result<f64, Error> {
                let value = parts.next().unwrap_or_default();
                value.parse().map_err(|_| Error::InvalidValue {
                    field: field.to_string(),
                    value: tuple.to_string(),
                })
            };
            // Altitude, when present, is dropped.
            Ok(vec![next("longitude")?, next("latitude")?])
        })
        .collect()
}

fn coordinates_text(node: Node) -> String {
    node.descendants()
        .find(|c| is(c, "coordinates"))
        .and_then(|c| c.text())
        .unwrap_or_default()
        .to_string()
}

/// Outer ring first, then the holes.
fn polygon_rings(polygon: Node) -> Result<Vec<Vec<Vec<f64>>>, Error> {
    let mut rings = Vec::new();
    for boundary in ["outerBoundaryIs", "innerBoundaryIs"] {
        for node in polygon.children().filter(|c| is(c, boundary)) {
            rings.push(parse_positions(&coordinates_text(node))?);
        }
    }
    Ok(rings)
}

/// Geometries directly below a node, descending into `MultiGeometry`.
fn geometries(node: Node) -> Result<Vec<Value>, Error> {
    let mut found = Vec::new();
    for c in node.children().filter(|c| c.is_element()) {
        match c.tag_name().name() {
            "LineString" => found.push(Value::LineString(parse_positions(&coordinates_text(c))?)),
            "Point" => {
                if let Some(position) = parse_positions(&coordinates_text(c))?.into_iter().next() {
                    found.push(Value::Point(position));
                }
            }
            "Polygon" => found.push(Value::Polygon(polygon_rings(c)?)),
            "MultiGeometry" => found.push(Value::GeometryCollection(
                geometries(c)?.into_iter().map(Geometry::new).collect(),
            )),
            _ => {}
        }
    }
    Ok(found)
}

fn properties(placemark: Node) -> JsonObject {
    let mut properties = JsonObject::new();
    for name in ["name", "description"] {
        if let Some(value) = placemark
            .children()
            .find(|c| is(c, name))
            .and_then(|c| c.text())
        {
            properties.insert(name.to_string(), serde_json::Value::from(value.trim()));
        }
    }
    for data in placemark.descendants().filter(|n| is(n, "Data")) {
        if let (Some(name), Some(value)) = (
            data.attribute("name"),
            data.children().find(|c| is(c, "value")).and_then(|c| c.text()),
        ) {
            properties.insert(name.to_string(), serde_json::Value::from(value.trim()));
        }
    }
    properties
}

/// Converts a KML document into a GeoJSON feature collection, one feature per
/// placemark. A placemark holding several geometries becomes a `GeometryCollection`.
pub fn kml_to_geojson(kml: &str) -> Result<FeatureCollection, Error> {
    let document = Document::parse(kml)?;
    let mut features: Vec<Feature> = Vec::new();
    for placemark in document.descendants().filter(|n| is(n, "Placemark")) {
        let mut found = geometries(placemark)?;
        let value = match found.len() {
            0 => continue,
            1 => found.remove(0),
            _ => Value::GeometryCollection(found.into_iter().map(Geometry::new).collect()),
        };
        features.push(feature(properties(placemark), value));
    }
    Ok(convert_to_geojson(features))
}
