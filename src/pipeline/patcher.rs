use async_trait::async_trait;
use geojson::{FeatureCollection, Value as GeometryValue};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::config::Config;
use crate::geometry::features::{feature_positions, is_connected_collection, type_name};
use crate::model::patch::{DegenerateGeometry, NameCorrection, PatchSet};
use crate::model::raw::{file_stem, is_withdrawn, parse_pattern_file, FailureRecord, RawSnapshot};
use crate::sources::error::Error as SourceError;
use crate::sources::transitlink::TransitLinkClient;

use super::error::Error;
use super::repair::{RepairChain, RepairOutcome, RepairRequest};
use super::store::DataStore;

/// Registry of canonical stop names, used for stops with all-caps names.
#[async_trait(?Send)]
pub trait StopNameRegistry {
    async fn lookup_stop_name(&self, code: &str) -> Result<Option<String>, SourceError>;
    /// Pause between two lookups.
    async fn delay(&self);
}

#[async_trait(?Send)]
impl StopNameRegistry for TransitLinkClient {
    async fn lookup_stop_name(&self, code: &str) -> Result<Option<String>, SourceError> {
        TransitLinkClient::lookup_stop_name(self, code).await
    }

    async fn delay(&self) {
        self.http().delay().await
    }
}

/// An all-caps abbreviation: no lowercase letter and at least two consecutive
/// uppercase letters.
pub fn is_suspect_name(name: &str) -> bool {
    !name.chars().any(|c| c.is_ascii_lowercase())
        && name
            .as_bytes()
            .windows(2)
            .any(|w| w[0].is_ascii_uppercase() && w[1].is_ascii_uppercase())
}

/// Checks that a fetched geometry is a single usable path.
pub fn classify_degenerate(number: &str, pattern: &str, collection: &FeatureCollection) -> Option<DegenerateGeometry> {
    let degenerate = |reason: String, count: Value| DegenerateGeometry {
        number: number.to_string(),
        number_pattern: pattern.to_string(),
        reason,
        count,
    };
    let features = &collection.features;
    let first = features.first()?;
    if features.len() > 1 {
        let positions = feature_positions(first);
        if features.iter().all(|f| feature_positions(f) == positions) {
            log::info!("Service {} features are all the same", number);
            return None;
        }
        return Some(degenerate("More than 1 feature".to_string(), Value::from(features.len())));
    }
    let Some(geometry) = &first.geometry else {
        return Some(degenerate("Feature has no geometry".to_string(), Value::from("?")));
    };
    match &geometry.value {
        GeometryValue::LineString(_) => None,
        value if is_connected_collection(value) => None,
        GeometryValue::GeometryCollection(geometries) => Some(degenerate(
            "Not LineString but is GeometryCollection".to_string(),
            Value::from(geometries.len()),
        )),
        value => Some(degenerate(format!("Not LineString but is {}", type_name(value)), Value::from("?"))),
    }
}

/// Services with a failed geometry file whose pattern exists in the fetched route
/// data, one request per service.
pub fn failed_requests(failures: &FailureRecord, raw: &RawSnapshot) -> Vec<RepairRequest> {
    let mut seen = BTreeSet::new();
    let mut requests = Vec::new();
    for failure in &failures.failed_geometries {
        let Some((number, pattern)) = parse_pattern_file(&failure.file_name) else {
            log::warn!("Cannot tell the pattern of {}", failure.file_name);
            continue;
        };
        let Some(directions) = raw.routes.get(&number) else {
            log::warn!("Failed to read route data for service {}", number);
            continue;
        };
        if pattern == 0 || directions.get(pattern - 1).is_none() {
            log::warn!("Missing pattern {} for service {}", pattern, number);
            continue;
        }
        if seen.insert(number.clone()) {
            requests.push(RepairRequest {
                number,
                directions: Some(directions.clone()),
            });
        }
    }
    requests
}

/// Fetched geometries of the allowed services that are not a single path.
pub fn degenerate_geometries(config: &Config, raw: &RawSnapshot) -> Vec<DegenerateGeometry> {
    raw.services
        .iter()
        .filter(|s| !is_withdrawn(&s.number) && config.is_allowed_type(&s.service_type))
        .flat_map(|service| {
            service.kml_files.iter().filter_map(|file| {
                let pattern = file_stem(file);
                let collection = raw.geometries.get(pattern)?;
                classify_degenerate(&service.number, pattern, collection)
            })
        })
        .collect()
}

/// Second stage: repairs what the fetch stage could not get right.
pub struct Patcher<'a, R> {
    chain: &'a RepairChain<'a>,
    registry: &'a R,
    config: &'a Config,
    store: &'a DataStore,
}

impl<'a, R> Patcher<'a, R>
where
    R: StopNameRegistry,
{
    pub fn new(chain: &'a RepairChain<'a>, registry: &'a R, config: &'a Config, store: &'a DataStore) -> Patcher<'a, R> {
        Patcher {
            chain,
            registry,
            config,
            store,
        }
    }

    /// Per-service failures are recorded in the returned patch set; only writing
    /// the patch files can fail the stage.
    pub async fn patch_all(&self, failures: &FailureRecord, raw: &RawSnapshot) -> Result<PatchSet, Error> {
        let mut patches = PatchSet::default();

        log::info!("Patching missing routes");
        let mut requests = failed_requests(failures, raw);

        log::info!("Checking fetched geometries");
        patches.degenerate = degenerate_geometries(self.config, raw);
        for entry in &patches.degenerate {
            log::warn!("{}: {} ({})", entry.number_pattern, entry.reason, entry.count);
            if !requests.iter().any(|r| r.number == entry.number) {
                requests.push(RepairRequest {
                    number: entry.number.clone(),
                    directions: raw.routes.get(&entry.number).cloned(),
                });
            }
        }

        for request in &requests {
            let outcome = self.chain.repair(request).await;
            patches.repairs.push(outcome.record(&request.number));
            match outcome {
                RepairOutcome::Repaired { patch, .. } => {
                    patches.geometries.insert(request.number.clone(), patch);
                }
                RepairOutcome::Missing { .. } => patches.missing_services.push(request.number.clone()),
            }
        }

        log::info!("Patching bus stop names");
        patches.name_corrections = self.correct_stop_names(raw).await;

        self.store.write_patch_set(&patches)?;
        log::info!(
            "Patched {} services, {} missing, {} stop names looked up",
            patches.geometries.len(),
            patches.missing_services.len(),
            patches.name_corrections.len()
        );
        Ok(patches)
    }

    async fn correct_stop_names(&self, raw: &RawSnapshot) -> Vec<NameCorrection> {
        let mut corrections = Vec::new();
        for stop in raw
            .stops
            .iter()
            .filter(|s| !is_withdrawn(&s.name) && is_suspect_name(&s.details))
        {
            log::info!("Looking up name of stop {}", stop.name);
            match self.registry.lookup_stop_name(&stop.name).await {
                Ok(new_name) => corrections.push(NameCorrection {
                    number: stop.name.clone(),
                    name: stop.details.clone(),
                    new_name,
                }),
                Err(e) => log::error!("Failed to patch stop name for {}: {}", stop.name, e),
            }
            self.registry.delay().await;
        }
        corrections
    }
}
