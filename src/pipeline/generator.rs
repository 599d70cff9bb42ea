use geojson::{Feature, FeatureCollection};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::Config;
use crate::geometry::features::{
    convert_to_geojson, route_coordinates, route_feature, stop_feature, validate_feature_collection,
};
use crate::geometry::polyline::encode_simplified;
use crate::geometry::{is_valid_position, round_to, Position};
use crate::model::canonical::{CanonicalSnapshot, GeneratedArtifacts, ServiceRecord, StopRecord};
use crate::model::patch::PatchSet;
use crate::model::raw::{file_stem, is_withdrawn, parse_pattern_file, DatamallRoute, RawService, RawSnapshot};

use super::error::Error;
use super::naming::synthesize_name;

pub const UNKNOWN_ROAD: &str = "Unknown Road";

/// Joins the primary stop list with the exported road names and the corrected
/// names, keyed by stop code. Withdrawn stops and stops outside valid bounds are
/// left out.
pub fn fuse_stops(raw: &RawSnapshot, stop_names: &BTreeMap<String, String>, precision: u32) -> BTreeMap<String, StopRecord> {
    let roads: BTreeMap<&str, &str> = raw
        .datamall_stops
        .iter()
        .filter_map(|s| {
            let road = s.road_name.as_deref().filter(|r| !r.trim().is_empty())?;
            Some((s.bus_stop_code.as_str(), road))
        })
        .collect();

    let mut stops = BTreeMap::new();
    for stop in raw.stops.iter().filter(|s| !is_withdrawn(&s.name)) {
        let position = [
            round_to(stop.coordinates.long, precision),
            round_to(stop.coordinates.lat, precision),
        ];
        if !is_valid_position(&position) {
            log::warn!("Stop {} excluded - invalid coordinates {:?}", stop.name, position);
            continue;
        }
        let name = stop_names.get(&stop.name).unwrap_or(&stop.details);
        let road = roads.get(stop.name.as_str()).copied().unwrap_or(UNKNOWN_ROAD);
        stops.insert(
            stop.name.clone(),
            StopRecord(position[0], position[1], name.clone(), road.to_string()),
        );
    }
    stops
}

/// Services whose fetched geometry is replaced by a patch: a failed geometry file
/// or a degenerate geometry.
pub fn faulty_services(raw: &RawSnapshot, patches: &PatchSet) -> HashSet<String> {
    let failed = raw.failures.failed_geometries.iter().map(|f| {
        parse_pattern_file(&f.file_name)
            .map(|(number, _)| number)
            .unwrap_or_else(|| file_stem(&f.file_name).to_string())
    });
    failed
        .chain(patches.degenerate.iter().map(|d| d.number.clone()))
        .collect()
}

/// Timing string of one service at one stop. Weekend timings equal to the weekday
/// ones are written `=`.
pub fn format_timing(route: &DatamallRoute) -> String {
    let weekend = |value: &str, weekday: &str| -> String {
        if value != "-" && value == weekday {
            "=".to_string()
        } else {
            value.to_string()
        }
    };
    format!(
        "{} {} {} {} {} {} {}",
        route.service_no,
        route.wd_first_bus,
        route.wd_last_bus,
        weekend(&route.sat_first_bus, &route.wd_first_bus),
        weekend(&route.sat_last_bus, &route.wd_last_bus),
        weekend(&route.sun_first_bus, &route.wd_first_bus),
        weekend(&route.sun_last_bus, &route.wd_last_bus),
    )
}

/// Groups timing strings by stop code, dropping records of unknown stops.
pub fn fuse_first_last(routes: &[DatamallRoute], stops: &BTreeMap<String, StopRecord>) -> BTreeMap<String, Vec<String>> {
    let mut first_last: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for route in routes {
        if !stops.contains_key(&route.bus_stop_code) {
            log::warn!("Service {} excluded - stop {} not found", route.service_no, route.bus_stop_code);
            continue;
        }
        first_last
            .entry(route.bus_stop_code.clone())
            .or_default()
            .push(format_timing(route));
    }
    first_last
}

struct ServiceOutput {
    record: ServiceRecord,
    polylines: Vec<Option<String>>,
    /// Unsimplified path per pattern index.
    paths: Vec<(usize, Vec<Position>)>,
}

/// Third stage: fuses the raw and patch snapshots into the canonical dataset.
pub struct Generator<'a> {
    config: &'a Config,
}

impl<'a> Generator<'a> {
    pub fn new(config: &'a Config) -> Generator<'a> {
        Generator { config }
    }

    /// Per-service problems skip that service. A generated collection that is
    /// not valid GeoJSON fails the whole run.
    pub fn generate(&self, raw: &RawSnapshot, patches: &PatchSet) -> Result<GeneratedArtifacts, Error> {
        log::info!("Generating main data files");
        let candidates = fuse_stops(raw, &patches.stop_names(), self.config.processing.coordinate_precision);
        let faulty = faulty_services(raw, patches);

        let mut services: Vec<&RawService> = raw
            .services
            .iter()
            .filter(|s| {
                !is_withdrawn(&s.number)
                    && self.config.is_allowed_type(&s.service_type)
                    && !patches.missing_services.contains(&s.number)
            })
            .collect();
        services.sort_by(|a, b| a.number.cmp(&b.number));

        let mut service_records = BTreeMap::new();
        let mut routes = BTreeMap::new();
        let mut route_features = Vec::new();
        let mut stop_services: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for service in services {
            let Some(output) = self.process_service(service, raw, patches, &candidates, &faulty) else {
                continue;
            };
            for code in output.record.routes.iter().flatten() {
                stop_services
                    .entry(code.clone())
                    .or_default()
                    .insert(service.number.clone());
            }
            for (pattern, path) in output.paths {
                route_features.push((service.number.clone(), pattern, path));
            }
            routes.insert(service.number.clone(), output.polylines);
            service_records.insert(service.number.clone(), output.record);
        }
        route_features.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let stops: BTreeMap<String, StopRecord> = candidates
            .into_iter()
            .filter(|(code, _)| stop_services.contains_key(code))
            .collect();

        let stop_features: Vec<Feature> = stops
            .iter()
            .map(|(code, stop)| {
                let services: Vec<String> = stop_services
                    .get(code)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                stop_feature(code, stop.name(), stop.road(), &services, [stop.lon(), stop.lat()])
            })
            .collect();
        let stops_geojson = convert_to_geojson(stop_features);
        validate(&stops_geojson, "stops.geojson")?;

        let route_features: Vec<Feature> = route_features
            .iter()
            .map(|(number, pattern, path)| route_feature(number, *pattern, path))
            .collect();
        let routes_geojson = convert_to_geojson(route_features);
        validate(&routes_geojson, "routes.geojson")?;

        log::info!("Generating first/last timing data");
        let first_last = fuse_first_last(&raw.datamall_routes, &stops);

        log::info!(
            "Generated {} stops, {} services, {} route features",
            stops.len(),
            service_records.len(),
            routes_geojson.features.len()
        );
        Ok(GeneratedArtifacts {
            snapshot: CanonicalSnapshot {
                stops,
                services: service_records,
                routes,
                first_last,
            },
            stops_geojson,
            routes_geojson,
        })
    }

    fn process_service(
        &self,
        service: &RawService,
        raw: &RawSnapshot,
        patches: &PatchSet,
        stops: &BTreeMap<String, StopRecord>,
        faulty: &HashSet<String>,
    ) -> Option<ServiceOutput> {
        let number = &service.number;
        let Some(directions) = raw.routes.get(number) else {
            log::error!("Failed to process service {}: no route data", number);
            return None;
        };
        let directions: Vec<&Vec<String>> = directions
            .iter()
            .map(|d| &d.stops)
            .filter(|s| !s.is_empty())
            .collect();

        let route_stops: Vec<Vec<String>> = directions
            .iter()
            .map(|d| d.iter().filter(|s| stops.contains_key(*s)).cloned().collect())
            .collect();
        let Some(name) = synthesize_name(&route_stops, |code| stops.get(code).map(|s| s.name().to_string())) else {
            log::warn!("Failed to process service {}: cannot name its route", number);
            return None;
        };

        let paths: Vec<Option<Vec<Position>>> = if faulty.contains(number) {
            match patches.geometries.get(number) {
                Some(patch) => {
                    let anchored = patch.anchored_patterns();
                    directions
                        .iter()
                        .map(|pattern| {
                            let first = pattern.first()?;
                            anchored
                                .iter()
                                .find(|p| &p.first_stop == first)
                                .map(|p| p.coordinates.clone())
                        })
                        .collect()
                }
                None => {
                    log::warn!("No patched geometry for service {}", number);
                    vec![]
                }
            }
        } else {
            service
                .kml_files
                .iter()
                .enumerate()
                .map(|(i, file)| {
                    let coordinates = raw
                        .geometries
                        .get(file_stem(file))
                        .and_then(|c| c.features.first())
                        .and_then(|f| f.geometry.as_ref())
                        .and_then(|g| route_coordinates(&g.value));
                    if coordinates.is_none() {
                        log::warn!("Failed to process geometry for {} pattern {}", number, i);
                    }
                    coordinates
                })
                .collect()
        };

        let tolerance = self.config.processing.simplify_tolerance;
        let polylines = paths
            .iter()
            .map(|p| p.as_ref().map(|coordinates| encode_simplified(coordinates, tolerance)))
            .collect();
        let paths = paths
            .into_iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|coordinates| (i, coordinates)))
            .collect();
        Some(ServiceOutput {
            record: ServiceRecord {
                name: name.to_string(),
                routes: route_stops,
            },
            polylines,
            paths,
        })
    }
}

fn validate(collection: &FeatureCollection, file: &str) -> Result<(), Error> {
    validate_feature_collection(&serde_json::to_value(collection)?).map_err(|reason| Error::InvalidGeoJson {
        file: file.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::features::{feature, line_string};
    use crate::geometry::polyline::decode;
    use geojson::feature::Id;
    use geojson::{JsonObject, Value as GeometryValue};
    use serde_json::{json, Value};
    use crate::model::patch::{DegenerateGeometry, GeometryPatch, NameCorrection, OneMapDirections, OneMapSegment};
    use crate::model::raw::{DatamallStop, FailedFile, FailureRecord, RawCoordinates, RawDirection, RawStop};
    use approx::assert_relative_eq;

    fn stop(code: &str, name: &str, long: f64, lat: f64) -> RawStop {
        RawStop {
            name: code.to_string(),
            details: name.to_string(),
            coordinates: RawCoordinates { long, lat },
            extra: BTreeMap::new(),
        }
    }

    fn service(number: &str, patterns: usize) -> RawService {
        RawService {
            number: number.to_string(),
            service_type: "TRUNK".into(),
            kml_files: (1..=patterns).map(|i| format!("{number}-{i}.kml")).collect(),
            route_files: vec![format!("{number}.xml")],
            extra: BTreeMap::new(),
        }
    }

    fn direction(stops: &[&str]) -> RawDirection {
        RawDirection {
            name: "1".into(),
            stops: stops.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn line(coordinates: Vec<Position>) -> FeatureCollection {
        convert_to_geojson(vec![feature(JsonObject::new(), line_string(&coordinates))])
    }

    fn timing(service: &str, stop: &str, sat_first: &str, sun_first: &str) -> DatamallRoute {
        DatamallRoute {
            service_no: service.to_string(),
            bus_stop_code: stop.to_string(),
            wd_first_bus: "0530".into(),
            wd_last_bus: "2330".into(),
            sat_first_bus: sat_first.to_string(),
            sat_last_bus: "2330".into(),
            sun_first_bus: sun_first.to_string(),
            sun_last_bus: "-".into(),
            extra: BTreeMap::new(),
        }
    }

    fn raw_snapshot() -> RawSnapshot {
        let mut routes = BTreeMap::new();
        routes.insert("10".to_string(), vec![direction(&["A", "B", "C"]), direction(&["C", "B", "A"])]);
        routes.insert("20".to_string(), vec![direction(&["A", "D", "A"])]);
        routes.insert("30".to_string(), vec![direction(&["C", "D"])]);
        let mut geometries = BTreeMap::new();
        geometries.insert("10-1".to_string(), line(vec![[103.8, 1.3], [103.81, 1.31], [103.82, 1.32]]));
        geometries.insert("10-2".to_string(), line(vec![[103.82, 1.32], [103.8, 1.3]]));
        geometries.insert("20-1".to_string(), line(vec![[0.0, 0.0], [1.0, 1.0]]));
        RawSnapshot {
            stops: vec![
                stop("C", "Changi Village", 103.9876543, 1.3891234),
                stop("A", "Bedok Int", 103.9554321, 1.3245678),
                stop("B", "BLK 1", 103.96, 1.33),
                stop("D", "Tampines Stn", 103.94, 1.35),
                stop("E", "Unserved", 103.95, 1.36),
                stop("-F", "Withdrawn", 103.95, 1.36),
            ],
            services: vec![service("30", 1), service("10", 2), service("20", 1), service("-40", 1)],
            datamall_stops: vec![DatamallStop {
                bus_stop_code: "A".into(),
                road_name: Some("New Upp Changi Rd".into()),
                extra: BTreeMap::new(),
            }],
            datamall_routes: vec![timing("10", "A", "0530", "0600"), timing("10", "Z", "0530", "0530")],
            routes,
            geometries,
            failures: FailureRecord {
                failed_routes: vec![],
                failed_geometries: vec![FailedFile { file_name: "20-1.kml".into(), error: "timeout".into() }],
            },
        }
    }


    fn patches() -> PatchSet {
        let segment = OneMapSegment {
            bus_sequence: 1,
            start_bus_stop_num: "A".into(),
            end_bus_stop_num: None,
            geometries: vec![[103.95, 1.32], [103.94, 1.35], [103.95, 1.32]],
            extra: BTreeMap::new(),
        };
        let mut geometries = BTreeMap::new();
        geometries.insert(
            "20".to_string(),
            GeometryPatch::OneMap(OneMapDirections { direction_one: Some(vec![segment]), direction_two: None }),
        );
        PatchSet {
            geometries,
            name_corrections: vec![NameCorrection { number: "B".into(), name: "BLK 1".into(), new_name: Some("Blk 1".into()) }],
            missing_services: vec!["30".into()],
            ..PatchSet::default()
        }
    }

    fn generate() -> GeneratedArtifacts {
        let config = Config { service_types: vec!["TRUNK".into()], ..Config::default() };
        Generator::new(&config).generate(&raw_snapshot(), &patches()).unwrap()
    }

    #[test]
    fn stops_are_fused_rounded_and_pruned() {
        let snapshot = generate().snapshot;
        assert_eq!(snapshot.stops.keys().collect::<Vec<_>>(), vec!["A", "B", "C", "D"]);
        let a = &snapshot.stops["A"];
        assert_relative_eq!(a.lon(), 103.95543);
        assert_relative_eq!(a.lat(), 1.32457);
        assert_eq!(a.road(), "New Upp Changi Rd");
        assert_eq!(snapshot.stops["B"].name(), "Blk 1");
        assert_eq!(snapshot.stops["C"].road(), UNKNOWN_ROAD);
        for stop in snapshot.stops.values() {
            assert!(is_valid_position(&[stop.lon(), stop.lat()]));
        }
    }

    #[test]
    fn services_are_named_and_missing_ones_excluded() {
        let snapshot = generate().snapshot;
        assert_eq!(snapshot.services.keys().collect::<Vec<_>>(), vec!["10", "20"]);
        assert_eq!(snapshot.services["10"].name, "Bedok Int ⇄ Changi Village");
        assert_eq!(snapshot.services["20"].name, "Bedok Int ⟲ Tampines Stn");
        assert_eq!(snapshot.services["10"].routes[1], vec!["C", "B", "A"]);
    }

    #[test]
    fn faulty_service_uses_anchored_patch_geometry() {
        let artifacts = generate();
        let polylines = &artifacts.snapshot.routes["20"];
        assert_eq!(polylines.len(), 1);
        let decoded = decode(polylines[0].as_ref().unwrap()).unwrap();
        assert_relative_eq!(decoded[1][0], 103.94);
        assert_relative_eq!(decoded[1][1], 1.35);
    }

    #[test]
    fn route_features_are_sorted_by_service_then_pattern() {
        let artifacts = generate();
        let features = &artifacts.routes_geojson.features;
        let keys: Vec<(String, u64)> = features
            .iter()
            .map(|f| {
                (
                    f.property("number").and_then(Value::as_str).unwrap().to_string(),
                    f.property("pattern").and_then(Value::as_u64).unwrap(),
                )
            })
            .collect();
        assert_eq!(keys, vec![("10".into(), 0), ("10".into(), 1), ("20".into(), 0)]);
        // Features keep the unsimplified path.
        match &features[0].geometry.as_ref().unwrap().value {
            GeometryValue::LineString(coordinates) => assert_eq!(coordinates.len(), 3),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn stops_geojson_lists_serving_services() {
        let artifacts = generate();
        let features = &artifacts.stops_geojson.features;
        assert_eq!(features.len(), 4);
        assert_eq!(features[0].id, Some(Id::String("A".into())));
        assert_eq!(features[0].property("services"), Some(&json!(["10", "20"])));
        let value = serde_json::to_value(&artifacts.stops_geojson).unwrap();
        assert!(validate_feature_collection(&value).is_ok());
    }

    #[test]
    fn first_last_drops_unknown_stops_and_compresses_weekends() {
        let snapshot = generate().snapshot;
        assert_eq!(snapshot.first_last.len(), 1);
        assert_eq!(snapshot.first_last["A"], vec!["10 0530 2330 = = 0600 -"]);
        assert!(!snapshot.first_last.contains_key("Z"));
    }

    #[test]
    fn missing_geometry_leaves_a_hole() {
        let mut raw = raw_snapshot();
        raw.geometries.remove("10-1");
        let config = Config { service_types: vec!["TRUNK".into()], ..Config::default() };
        let snapshot = Generator::new(&config).generate(&raw, &patches()).unwrap().snapshot;
        let polylines = &snapshot.routes["10"];
        assert_eq!(polylines.len(), 2);
        assert!(polylines[0].is_none());
        assert!(polylines[1].is_some());
    }

    #[test]
    fn degenerate_services_are_faulty() {
        let raw = raw_snapshot();
        let patches = PatchSet {
            degenerate: vec![DegenerateGeometry {
                number: "10".into(),
                number_pattern: "10-1".into(),
                reason: "More than 1 feature".into(),
                count: Value::from(2),
            }],
            ..PatchSet::default()
        };
        let faulty = faulty_services(&raw, &patches);
        assert!(faulty.contains("10"));
        assert!(faulty.contains("20"));
        assert!(!faulty.contains("30"));
    }
}
