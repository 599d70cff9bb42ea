use async_trait::async_trait;
use std::time::Duration;

use crate::model::patch::{GeometryPatch, OneMapDirections, OneMapSegment, RepairAttempt, RepairRecord};
use crate::model::raw::RawDirection;
use crate::sources::citymapper::CityMapperClient;
use crate::sources::error::Error as SourceError;
use crate::sources::onemap::OneMapClient;

/// A service whose fetched geometry is unusable.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairRequest {
    pub number: String,
    /// Directions of the fetched route file. `None` when the route file itself is
    /// unavailable.
    pub directions: Option<Vec<RawDirection>>,
}

impl RepairRequest {
    fn first_stop(&self, pattern: usize) -> Option<&str> {
        self.directions
            .as_ref()?
            .get(pattern)?
            .stops
            .first()
            .map(String::as_str)
    }
}

/// One way of getting a replacement geometry for a service.
#[async_trait(?Send)]
pub trait RepairStrategy {
    fn name(&self) -> &'static str;
    async fn repair(&self, request: &RepairRequest) -> Result<GeometryPatch, SourceError>;
}

#[derive(Debug)]
pub enum RepairOutcome {
    Repaired {
        strategy: &'static str,
        patch: GeometryPatch,
        attempts: Vec<RepairAttempt>,
    },
    /// Every strategy failed.
    Missing { attempts: Vec<RepairAttempt> },
}

impl RepairOutcome {
    pub fn record(&self, number: &str) -> RepairRecord {
        match self {
            RepairOutcome::Repaired { strategy, attempts, .. } => RepairRecord {
                number: number.to_string(),
                strategy: Some(strategy.to_string()),
                attempts: attempts.clone(),
            },
            RepairOutcome::Missing { attempts } => RepairRecord {
                number: number.to_string(),
                strategy: None,
                attempts: attempts.clone(),
            },
        }
    }
}

/// Strategies tried in priority order; the first success wins and the later ones
/// are not called.
pub struct RepairChain<'a> {
    strategies: Vec<Box<dyn RepairStrategy + 'a>>,
    delay: Duration,
}

impl<'a> RepairChain<'a> {
    pub fn new(strategies: Vec<Box<dyn RepairStrategy + 'a>>) -> RepairChain<'a> {
        RepairChain {
            strategies,
            delay: Duration::ZERO,
        }
    }

    /// Waits `delay` after every strategy call.
    pub fn with_delay(mut self, delay: Duration) -> RepairChain<'a> {
        self.delay = delay;
        self
    }

    pub async fn repair(&self, request: &RepairRequest) -> RepairOutcome {
        let mut attempts = Vec::new();
        for strategy in &self.strategies {
            let result = strategy.repair(request).await;
            if !self.delay.is_zero() {
                actix_rt::time::sleep(self.delay).await;
            }
            match result {
                Ok(patch) => {
                    log::info!("Service {} repaired with {}", request.number, strategy.name());
                    return RepairOutcome::Repaired {
                        strategy: strategy.name(),
                        patch,
                        attempts,
                    };
                }
                Err(e) => {
                    log::warn!("{} could not repair service {}: {}", strategy.name(), request.number, e);
                    attempts.push(RepairAttempt {
                        strategy: strategy.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        log::error!("Service {} is missing from every provider", request.number);
        RepairOutcome::Missing { attempts }
    }
}

/// Pairs the two fetched directions. When both start at the same stop the service
/// is a loop and only one direction is kept. Empty responses count as absent.
pub fn combine_directions(one: Vec<OneMapSegment>, two: Option<Vec<OneMapSegment>>) -> OneMapDirections {
    let one = Some(one).filter(|d| !d.is_empty());
    let two = two.filter(|d| !d.is_empty());
    let (direction_one, direction_two) = match (one, two) {
        (Some(one), Some(two)) if one[0].start_bus_stop_num != two[0].start_bus_stop_num => {
            (Some(one), Some(two))
        }
        (Some(one), _) => (Some(one), None),
        (None, two) => (two, None),
    };
    OneMapDirections {
        direction_one,
        direction_two,
    }
}

/// Provider of per-direction route segments, optionally starting at a stop.
#[async_trait(?Send)]
pub trait BusRouteSource {
    async fn bus_route(&self, service: &str, start_stop: Option<&str>) -> Result<Vec<OneMapSegment>, SourceError>;
}

#[async_trait(?Send)]
impl BusRouteSource for OneMapClient {
    async fn bus_route(&self, service: &str, start_stop: Option<&str>) -> Result<Vec<OneMapSegment>, SourceError> {
        self.fetch_bus_route(service, start_stop).await
    }
}

pub struct OneMapStrategy<'a, S> {
    source: &'a S,
}

impl<'a, S: BusRouteSource> OneMapStrategy<'a, S> {
    pub fn new(source: &'a S) -> OneMapStrategy<'a, S> {
        OneMapStrategy { source }
    }
}

#[async_trait(?Send)]
impl<S: BusRouteSource> RepairStrategy for OneMapStrategy<'_, S> {
    fn name(&self) -> &'static str {
        "onemap"
    }

    async fn repair(&self, request: &RepairRequest) -> Result<GeometryPatch, SourceError> {
        let number = request.number.as_str();
        let directions = match request.first_stop(0) {
            Some(first_stop) => {
                let one = self.source.bus_route(number, Some(first_stop)).await?;
                let two = match request.first_stop(1) {
                    Some(stop) => Some(self.source.bus_route(number, Some(stop)).await?),
                    None => None,
                };
                let directions = combine_directions(one, two);
                if let Some(actual) = directions
                    .direction_one
                    .as_ref()
                    .and_then(|d| d.first())
                    .map(|s| s.start_bus_stop_num.as_str())
                {
                    if actual != first_stop {
                        return Err(SourceError::AnchorMismatch {
                            service: number.to_string(),
                            expected: first_stop.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                }
                directions
            }
            None => {
                let one = self.source.bus_route(number, None).await?;
                let end = one.first().and_then(|s| s.end_bus_stop_num.clone());
                let two = match end {
                    Some(end) => Some(self.source.bus_route(number, Some(&end)).await?),
                    None => None,
                };
                combine_directions(one, two)
            }
        };
        if directions.direction_one.is_none() {
            return Err(SourceError::NotFound(format!("no route data found for service {number}")));
        }
        Ok(GeometryPatch::OneMap(directions))
    }
}

pub struct CityMapperStrategy<'a> {
    client: &'a CityMapperClient,
}

impl<'a> CityMapperStrategy<'a> {
    pub fn new(client: &'a CityMapperClient) -> CityMapperStrategy<'a> {
        CityMapperStrategy { client }
    }
}

#[async_trait(?Send)]
impl RepairStrategy for CityMapperStrategy<'_> {
    fn name(&self) -> &'static str {
        "citymapper"
    }

    async fn repair(&self, request: &RepairRequest) -> Result<GeometryPatch, SourceError> {
        let info = self.client.fetch_bus_route(&request.number).await?;
        Ok(GeometryPatch::CityMapper(info))
    }
}
