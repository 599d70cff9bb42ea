use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Prefix the primary provider puts on withdrawn stop and service identifiers.
pub const WITHDRAWN_PREFIX: char = '-';

pub fn is_withdrawn(identifier: &str) -> bool {
    identifier.starts_with(WITHDRAWN_PREFIX)
}

/// A stop from the primary map feed. `name` is the stop code and `details` its
/// display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStop {
    pub name: String,
    pub details: String,
    pub coordinates: RawCoordinates,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawCoordinates {
    pub long: f64,
    pub lat: f64,
}

/// A service from the primary map feed, with its per-pattern route & geometry files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawService {
    pub number: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "kmlFile")]
    pub kml_files: Vec<String>,
    #[serde(rename = "routeFile")]
    pub route_files: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// One direction of a route file: the ordered stop codes of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDirection {
    pub name: String,
    pub stops: Vec<String>,
}

/// Stop record from the paginated export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatamallStop {
    pub bus_stop_code: String,
    #[serde(default)]
    pub road_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Route-timing record from the paginated export: one service calling at one stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatamallRoute {
    #[serde(rename = "ServiceNo")]
    pub service_no: String,
    #[serde(rename = "BusStopCode")]
    pub bus_stop_code: String,
    #[serde(rename = "WD_FirstBus")]
    pub wd_first_bus: String,
    #[serde(rename = "WD_LastBus")]
    pub wd_last_bus: String,
    #[serde(rename = "SAT_FirstBus")]
    pub sat_first_bus: String,
    #[serde(rename = "SAT_LastBus")]
    pub sat_last_bus: String,
    #[serde(rename = "SUN_FirstBus")]
    pub sun_first_bus: String,
    #[serde(rename = "SUN_LastBus")]
    pub sun_last_bus: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A page of the paginated export.
#[derive(Debug, Deserialize)]
pub struct DatamallPage<T> {
    pub value: Vec<T>,
}

/// A route or geometry file that could not be fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub file_name: String,
    pub error: String,
}

/// Fetch failures kept for the patch stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(rename = "failedXMLs", default)]
    pub failed_routes: Vec<FailedFile>,
    #[serde(rename = "failedKMLs", default)]
    pub failed_geometries: Vec<FailedFile>,
}

impl FailureRecord {
    pub fn is_empty(&self) -> bool {
        self.failed_routes.is_empty() && self.failed_geometries.is_empty()
    }
}

/// Service number and one-based pattern of a geometry file named `<service>-<n>.<ext>`.
pub fn parse_pattern_file(file_name: &str) -> Option<(String, usize)> {
    let stem = file_stem(file_name);
    let (service, pattern) = stem.rsplit_once('-')?;
    if service.is_empty() || pattern.len() != 1 {
        return None;
    }
    let pattern = pattern.parse().ok()?;
    Some((service.to_string(), pattern))
}

/// File name without its extension.
pub fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

/// Everything the fetch stage collected, as read back by the later stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSnapshot {
    pub stops: Vec<RawStop>,
    pub services: Vec<RawService>,
    pub datamall_stops: Vec<DatamallStop>,
    pub datamall_routes: Vec<DatamallRoute>,
    /// Route directions keyed by route file stem, which is the service number.
    pub routes: BTreeMap<String, Vec<RawDirection>>,
    /// Converted geometry keyed by pattern file stem (`<service>-<n>`).
    pub geometries: BTreeMap<String, FeatureCollection>,
    pub failures: FailureRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pattern_file_names() {
        assert_eq!(parse_pattern_file("10-1.kml"), Some(("10".to_string(), 1)));
        assert_eq!(parse_pattern_file("CT18-2.kml"), Some(("CT18".to_string(), 2)));
        assert_eq!(parse_pattern_file("NR-1-2.kml"), Some(("NR-1".to_string(), 2)));
        assert_eq!(parse_pattern_file("10.kml"), None);
        assert_eq!(parse_pattern_file("10-12.kml"), None);
    }

    #[test]
    fn detects_withdrawn_identifiers() {
        assert!(is_withdrawn("-10"));
        assert!(!is_withdrawn("10e"));
    }

    #[test]
    fn reads_failure_record() {
        let raw = r#"{"failedXMLs": [], "failedKMLs": [{"fileName": "10-1.kml", "error": "timeout"}]}"#;
        let record: FailureRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.failed_geometries[0].file_name, "10-1.kml");
        assert!(!record.is_empty());
    }

    #[test]
    fn reads_timing_record() {
        let raw = r#"{
            "ServiceNo": "10", "Operator": "SBST", "Direction": 1, "StopSequence": 1,
            "BusStopCode": "75009", "Distance": 0,
            "WD_FirstBus": "0500", "WD_LastBus": "2300",
            "SAT_FirstBus": "0500", "SAT_LastBus": "2300",
            "SUN_FirstBus": "0600", "SUN_LastBus": "2300"
        }"#;
        let route: DatamallRoute = serde_json::from_str(raw).unwrap();
        assert_eq!(route.bus_stop_code, "75009");
        assert_eq!(route.sun_first_bus, "0600");
        assert_eq!(route.extra.get("Operator"), Some(&Value::from("SBST")));
    }
}
