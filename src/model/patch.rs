use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::geometry::stitch::stitch_segments;
use crate::geometry::Position;

/// Accepts a JSON string or number and keeps it as a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// One leg of a route returned by the secondary map service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneMapSegment {
    #[serde(rename = "BUS_SEQUENCE")]
    pub bus_sequence: u32,
    #[serde(rename = "START_BUS_STOP_NUM", deserialize_with = "string_or_number")]
    pub start_bus_stop_num: String,
    #[serde(
        rename = "END_BUS_STOP_NUM",
        default,
        deserialize_with = "opt_string_or_number"
    )]
    pub end_bus_stop_num: Option<String>,
    #[serde(rename = "GEOMETRIES")]
    pub geometries: Vec<Position>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Both directions of a service as stored from the secondary map service. A loop
/// service only has the first direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneMapDirections {
    #[serde(rename = "BUS_DIRECTION_ONE")]
    pub direction_one: Option<Vec<OneMapSegment>>,
    #[serde(rename = "BUS_DIRECTION_TWO")]
    pub direction_two: Option<Vec<OneMapSegment>>,
}

/// Route info document of the tertiary search service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityMapperRouteInfo {
    pub routes: Vec<CityMapperRoute>,
    #[serde(default)]
    pub stops: BTreeMap<String, CityMapperStop>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityMapperRoute {
    #[serde(default)]
    pub patterns: Vec<CityMapperPattern>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityMapperPattern {
    #[serde(default)]
    pub stop_points: Vec<CityMapperStopPoint>,
    /// Vertices as `[lat, lon]`.
    #[serde(default)]
    pub path: Vec<[f64; 2]>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityMapperStopPoint {
    pub id: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityMapperStop {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub stop_code: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Which provider produced a geometry replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchSource {
    OneMap,
    CityMapper,
}

impl PatchSource {
    /// Suffix of the patch file: `<service>.<suffix>.json`.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            PatchSource::OneMap => "om",
            PatchSource::CityMapper => "cm",
        }
    }
}

/// Geometry replacement for a service, kept in the shape its provider returned it.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryPatch {
    OneMap(OneMapDirections),
    CityMapper(CityMapperRouteInfo),
}

/// One direction's replacement path, anchored by the stop it starts from.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchoredPattern {
    pub first_stop: String,
    pub coordinates: Vec<Position>,
}

impl GeometryPatch {
    pub fn source(&self) -> PatchSource {
        match self {
            GeometryPatch::OneMap(_) => PatchSource::OneMap,
            GeometryPatch::CityMapper(_) => PatchSource::CityMapper,
        }
    }

    /// Replacement paths per direction. Directions without a resolvable anchor stop
    /// are left out.
    pub fn anchored_patterns(&self) -> Vec<AnchoredPattern> {
        match self {
            GeometryPatch::OneMap(directions) => [&directions.direction_one, &directions.direction_two]
                .into_iter()
                .flatten()
                .filter_map(|segments| {
                    let first_stop = segments
                        .iter()
                        .find(|s| s.bus_sequence == 1)?
                        .start_bus_stop_num
                        .clone();
                    let coordinates =
                        stitch_segments(segments.iter().map(|s| s.geometries.as_slice()));
                    Some(AnchoredPattern { first_stop, coordinates })
                })
                .collect(),
            GeometryPatch::CityMapper(info) => info
                .routes
                .first()
                .map(|route| {
                    route
                        .patterns
                        .iter()
                        .filter_map(|pattern| {
                            let stop_id = &pattern.stop_points.first()?.id;
                            let first_stop = info.stops.get(stop_id)?.stop_code.clone()?;
                            let coordinates =
                                pattern.path.iter().map(|[lat, lon]| [*lon, *lat]).collect();
                            Some(AnchoredPattern { first_stop, coordinates })
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// A stop whose all-caps name was looked up in the stop-name registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameCorrection {
    pub number: String,
    pub name: String,
    pub new_name: Option<String>,
}

/// A fetched geometry that is present but not a single usable path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegenerateGeometry {
    pub number: String,
    #[serde(rename = "numberPattern")]
    pub number_pattern: String,
    #[serde(rename = "e")]
    pub reason: String,
    /// Number of features or collection members, `"?"` when not applicable.
    pub count: Value,
}

/// Audit entry for one repaired or abandoned service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub number: String,
    pub strategy: Option<String>,
    #[serde(default)]
    pub attempts: Vec<RepairAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub strategy: String,
    pub error: String,
}

/// Output of the patch stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchSet {
    /// Geometry replacements keyed by service number.
    pub geometries: BTreeMap<String, GeometryPatch>,
    pub name_corrections: Vec<NameCorrection>,
    /// Services every repair strategy failed for.
    pub missing_services: Vec<String>,
    pub degenerate: Vec<DegenerateGeometry>,
    pub repairs: Vec<RepairRecord>,
}

impl PatchSet {
    /// Corrected names keyed by stop code, for the lookups that returned one.
    pub fn stop_names(&self) -> BTreeMap<String, String> {
        self.name_corrections
            .iter()
            .filter_map(|c| c.new_name.clone().map(|n| (c.number.clone(), n)))
            .collect()
    }
}
