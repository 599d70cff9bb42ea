use roxmltree::{Document, Node};
use std::collections::BTreeMap;

use crate::model::raw::{RawCoordinates, RawDirection, RawService, RawStop};

use super::error::Error;

/// Value of `name` on an element, taken from the attribute or a child element's text.
fn field(node: Node, name: &str) -> Option<String> {
    if let Some(value) = node.attribute(name) {
        return Some(value.trim().to_string());
    }
    child(node, name).map(|c| text(c))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn text(node: Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_leaf(node: &Node) -> bool {
    node.is_element() && !node.children().any(|c| c.is_element())
}

/// Attributes and leaf children of an element, minus the ones already mapped.
fn extras(node: Node, skip: &[&str]) -> BTreeMap<String, String> {
    let mut extra = BTreeMap::new();
    for attribute in node.attributes() {
        if !skip.contains(&attribute.name()) {
            extra.insert(attribute.name().to_string(), attribute.value().to_string());
        }
    }
    for c in node.children().filter(is_leaf) {
        let name = c.tag_name().name();
        if !skip.contains(&name) {
            extra.insert(name.to_string(), text(c));
        }
    }
    extra
}

fn parse_coordinate(field_name: &str, value: Option<String>) -> Result<f64, Error> {
    let value = value.ok_or_else(|| Error::MissingElement(field_name.to_string()))?;
    value.parse().map_err(|_| Error::InvalidValue {
        field: field_name.to_string(),
        value,
    })
}

fn parse_bus_stop(node: Node) -> Result<RawStop, Error> {
    let name = field(node, "name").ok_or_else(|| Error::MissingElement("name".into()))?;
    let position = child(node, "coordinates").unwrap_or(node);
    let coordinates = RawCoordinates {
        long: parse_coordinate("long", field(position, "long"))?,
        lat: parse_coordinate("lat", field(position, "lat"))?,
    };
    Ok(RawStop {
        name,
        details: field(node, "details").unwrap_or_default(),
        coordinates,
        extra: extras(node, &["name", "details", "coordinates", "long", "lat"]),
    })
}

/// Parses the stop list of the primary map feed. A malformed `<busstop>` is
/// logged and skipped; a malformed document is an error.
pub fn parse_bus_stops(xml: &str) -> Result<Vec<RawStop>, Error> {
    let document = Document::parse(xml)?;
    let stops = document
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "busstop")
        .filter_map(|node| match parse_bus_stop(node) {
            Ok(stop) => Some(stop),
            Err(e) => {
                log::warn!("Skipping bus stop '{}': {}", field(node, "name").unwrap_or_default(), e);
                None
            }
        })
        .collect();
    Ok(stops)
}

/// File names listed under `<kmlFile>` or `<routeFile>`.
fn files(node: Node, name: &str) -> Vec<String> {
    let Some(list) = child(node, name) else {
        return vec![];
    };
    let files: Vec<String> = list
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "file")
        .map(text)
        .filter(|f| !f.is_empty())
        .collect();
    if files.is_empty() {
        let single = text(list);
        if single.is_empty() {
            vec![]
        } else {
            vec![single]
        }
    } else {
        files
    }
}

/// Parses the service list. Services are grouped under one element per service type.
pub fn parse_bus_services(xml: &str) -> Result<Vec<RawService>, Error> {
    let document = Document::parse(xml)?;
    let mut services = Vec::new();
    for group in document.root_element().children().filter(|c| c.is_element()) {
        let service_type = group.tag_name().name().to_string();
        for node in group
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "bus_service")
        {
            let number =
                field(node, "number").ok_or_else(|| Error::MissingElement("number".into()))?;
            services.push(RawService {
                number,
                service_type: service_type.clone(),
                kml_files: files(node, "kmlFile"),
                route_files: files(node, "routeFile"),
                extra: extras(node, &["number", "type", "kmlFile", "routeFile"]),
            });
        }
    }
    Ok(services)
}

/// Parses a route file into its directions and their ordered stop codes.
pub fn parse_service_route(xml: &str) -> Result<Vec<RawDirection>, Error> {
    let document = Document::parse(xml)?;
    let directions = document
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "direction")
        .enumerate()
        .map(|(index, node)| RawDirection {
            name: field(node, "name").unwrap_or_else(|| (index + 1).to_string()),
            stops: node
                .children()
                .filter(|c| c.is_element() && c.tag_name().name() == "busstop")
                .filter_map(|c| field(c, "name"))
                .collect(),
        })
        .collect();
    Ok(directions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stops() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <busstops>
                <busstop name="01012" wab="true">
                    <details>Hotel Grand Pacific</details>
                    <coordinates><long>103.84757</long><lat>1.29666</lat></coordinates>
                </busstop>
                <busstop name="-01013">
                    <details>Withdrawn &amp; Gone</details>
                    <coordinates><long>103.8</long><lat>1.3</lat></coordinates>
                </busstop>
            </busstops>"#;
        let stops = parse_bus_stops(xml).unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].name, "01012");
        assert_eq!(stops[0].details, "Hotel Grand Pacific");
        assert_eq!(stops[0].coordinates.lat, 1.29666);
        assert_eq!(stops[0].extra.get("wab").map(String::as_str), Some("true"));
        assert_eq!(stops[1].details, "Withdrawn & Gone");
    }

    #[test]
    fn skips_stop_without_coordinates() {
        let xml = r#"<busstops>
                <busstop name="1"><details>x</details></busstop>
                <busstop name="2"><details>y</details><coordinates><long>103.8</long><lat>1.3</lat></coordinates></busstop>
            </busstops>"#;
        let stops = parse_bus_stops(xml).unwrap();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].name, "2");
    }

    #[test]
    fn rejects_malformed_document() {
        assert!(matches!(parse_bus_stops("<busstops><busstop>"), Err(Error::Xml(_))));
    }

    #[test]
    fn parses_services_by_type() {
        let xml = r#"<bus_service_list>
                <TRUNK>
                    <bus_service number="10" operator="SBST">
                        <kmlFile><file>10-1.kml</file><file>10-2.kml</file></kmlFile>
                        <routeFile><file>10.xml</file></routeFile>
                    </bus_service>
                </TRUNK>
                <CITYDIRECT>
                    <bus_service number="651">
                        <kmlFile><file>651-1.kml</file></kmlFile>
                        <routeFile>651.xml</routeFile>
                    </bus_service>
                </CITYDIRECT>
            </bus_service_list>"#;
        let services = parse_bus_services(xml).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].service_type, "TRUNK");
        assert_eq!(services[0].kml_files, vec!["10-1.kml", "10-2.kml"]);
        assert_eq!(services[0].extra.get("operator").map(String::as_str), Some("SBST"));
        assert_eq!(services[1].service_type, "CITYDIRECT");
        assert_eq!(services[1].route_files, vec!["651.xml"]);
    }

    #[test]
    fn parses_route_directions() {
        let xml = r#"<route>
                <direction name="1">
                    <busstop name="75009"/><busstop name="76059"/>
                </direction>
                <direction name="2">
                    <busstop name="76059"/><busstop name="75009"/>
                </direction>
                <direction name="3"/>
            </route>"#;
        let directions = parse_service_route(xml).unwrap();
        assert_eq!(directions.len(), 3);
        assert_eq!(directions[0].stops, vec!["75009", "76059"]);
        assert_eq!(directions[1].name, "2");
        assert!(directions[2].stops.is_empty());
    }
}
