use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `stops.json` entry: `[lon, lat, name, road]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRecord(pub f64, pub f64, pub String, pub String);

impl StopRecord {
    pub fn lon(&self) -> f64 {
        self.0
    }

    pub fn lat(&self) -> f64 {
        self.1
    }

    pub fn name(&self) -> &str {
        &self.2
    }

    pub fn road(&self) -> &str {
        &self.3
    }
}

/// `services.json` entry: synthesized name and the stop sequence of each pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub routes: Vec<Vec<String>>,
}

/// The four canonical JSON documents of a revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSnapshot {
    pub stops: BTreeMap<String, StopRecord>,
    pub services: BTreeMap<String, ServiceRecord>,
    /// Encoded polylines per pattern index; a pattern without geometry is `null`.
    pub routes: BTreeMap<String, Vec<Option<String>>>,
    pub first_last: BTreeMap<String, Vec<String>>,
}

/// Generator output: the canonical snapshot plus both GeoJSON collections.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifacts {
    pub snapshot: CanonicalSnapshot,
    pub stops_geojson: FeatureCollection,
    pub routes_geojson: FeatureCollection,
}

/// Canonical output file stems.
pub const STOPS: &str = "stops";
pub const SERVICES: &str = "services";
pub const ROUTES: &str = "routes";
pub const FIRST_LAST: &str = "firstlast";
