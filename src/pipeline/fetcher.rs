use async_trait::async_trait;
use geojson::FeatureCollection;

use crate::config::Config;
use crate::model::raw::{
    file_stem, is_withdrawn, DatamallRoute, DatamallStop, FailedFile, FailureRecord, RawDirection, RawService,
    RawSnapshot, RawStop,
};
use crate::sources::error::Error as SourceError;
use crate::sources::lta::LtaClient;

use super::error::Error;
use super::store::{DataStore, BUS_SERVICES, BUS_STOPS, DATAMALL_ROUTES, DATAMALL_STOPS, FAILURES};

/// The authoritative provider of stops, services and per-pattern route files.
#[async_trait(?Send)]
pub trait PrimaryProvider {
    async fn bus_stops(&self) -> Result<Vec<RawStop>, SourceError>;
    async fn bus_services(&self) -> Result<Vec<RawService>, SourceError>;
    async fn service_route(&self, file_name: &str) -> Result<Vec<RawDirection>, SourceError>;
    async fn service_geometry(&self, file_name: &str) -> Result<FeatureCollection, SourceError>;
    async fn datamall_stops(&self) -> Result<Vec<DatamallStop>, SourceError>;
    async fn datamall_routes(&self) -> Result<Vec<DatamallRoute>, SourceError>;
    /// Pause between two services.
    async fn delay(&self);
}

#[async_trait(?Send)]
impl PrimaryProvider for LtaClient {
    async fn bus_stops(&self) -> Result<Vec<RawStop>, SourceError> {
        self.fetch_bus_stops().await
    }

    async fn bus_services(&self) -> Result<Vec<RawService>, SourceError> {
        self.fetch_bus_services().await
    }

    async fn service_route(&self, file_name: &str) -> Result<Vec<RawDirection>, SourceError> {
        self.fetch_service_route(file_name).await
    }

    async fn service_geometry(&self, file_name: &str) -> Result<FeatureCollection, SourceError> {
        self.fetch_service_geometry(file_name).await
    }

    async fn datamall_stops(&self) -> Result<Vec<DatamallStop>, SourceError> {
        self.fetch_bus_stops_datamall().await
    }

    async fn datamall_routes(&self) -> Result<Vec<DatamallRoute>, SourceError> {
        self.fetch_bus_routes_datamall().await
    }

    async fn delay(&self) {
        self.http().delay().await
    }
}

/// First stage: pulls every raw document from the primary provider and writes it
/// under the raw directory.
pub struct Fetcher<'a, P> {
    provider: &'a P,
    config: &'a Config,
    store: &'a DataStore,
}

impl<'a, P> Fetcher<'a, P>
where
    P: PrimaryProvider,
{
    pub fn new(provider: &'a P, config: &'a Config, store: &'a DataStore) -> Fetcher<'a, P> {
        Fetcher { provider, config, store }
    }

    /// Fails only when a top-level list cannot be fetched. A failing route or
    /// geometry file is recorded and the remaining services are still fetched.
    pub async fn fetch_all(&self) -> Result<RawSnapshot, Error> {
        self.config.account_key()?;

        log::info!("Fetching bus stops");
        let stops = self.provider.bus_stops().await?;
        self.store.write(&self.store.raw_file(BUS_STOPS), &stops)?;

        log::info!("Fetching bus services");
        let services = self.provider.bus_services().await?;
        self.store.write(&self.store.raw_file(BUS_SERVICES), &services)?;

        log::info!("Fetching paginated stop and route exports");
        let datamall_stops = self.provider.datamall_stops().await?;
        self.store.write(&self.store.raw_file(DATAMALL_STOPS), &datamall_stops)?;
        let datamall_routes = self.provider.datamall_routes().await?;
        self.store.write(&self.store.raw_file(DATAMALL_ROUTES), &datamall_routes)?;

        let mut snapshot = RawSnapshot {
            stops,
            services,
            datamall_stops,
            datamall_routes,
            ..RawSnapshot::default()
        };
        self.fetch_service_files(&mut snapshot).await?;
        self.store.write(&self.store.patch_file(FAILURES), &snapshot.failures)?;
        log::info!(
            "Fetched {} route files and {} geometries, {} route and {} geometry failures",
            snapshot.routes.len(),
            snapshot.geometries.len(),
            snapshot.failures.failed_routes.len(),
            snapshot.failures.failed_geometries.len()
        );
        Ok(snapshot)
    }

    async fn fetch_service_files(&self, snapshot: &mut RawSnapshot) -> Result<(), Error> {
        log::info!("Fetching service routes");
        let mut failures = FailureRecord::default();
        for service in &snapshot.services {
            if is_withdrawn(&service.number) {
                log::warn!("Skipping withdrawn service {}", service.number);
                continue;
            }
            if !self.config.is_allowed_type(&service.service_type) {
                log::info!("Skipping {} ({})", service.number, service.service_type);
                continue;
            }

            for file_name in &service.route_files {
                match self.provider.service_route(file_name).await {
                    Ok(directions) => {
                        let stem = file_stem(file_name);
                        let path = self.store.service_file(&service.service_type, &format!("{stem}.json"));
                        self.store.write(&path, &directions)?;
                        snapshot.routes.insert(stem.to_string(), directions);
                    }
                    Err(e) => {
                        log::error!("Failed to fetch route {}: {}", file_name, e);
                        failures.failed_routes.push(FailedFile {
                            file_name: file_name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            for file_name in &service.kml_files {
                match self.provider.service_geometry(file_name).await {
                    Ok(collection) => {
                        let stem = file_stem(file_name);
                        let path = self.store.service_file(&service.service_type, &format!("{stem}.geojson"));
                        self.store.write(&path, &collection)?;
                        snapshot.geometries.insert(stem.to_string(), collection);
                    }
                    Err(e) => {
                        log::error!("Failed to fetch geometry {}: {}", file_name, e);
                        failures.failed_geometries.push(FailedFile {
                            file_name: file_name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            self.provider.delay().await;
        }
        snapshot.failures = failures;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::features::{convert_to_geojson, feature, line_string};
    use crate::model::raw::RawCoordinates;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct FakeProvider {
        fail_stops: bool,
        failing_files: Vec<&'static str>,
        requested: RefCell<Vec<String>>,
    }

    fn service(number: &str, service_type: &str) -> RawService {
        RawService {
            number: number.to_string(),
            service_type: service_type.to_string(),
            kml_files: vec![format!("{number}-1.kml")],
            route_files: vec![format!("{number}.xml")],
            extra: BTreeMap::new(),
        }
    }

    #[async_trait(?Send)]
    impl PrimaryProvider for FakeProvider {
        async fn bus_stops(&self) -> Result<Vec<RawStop>, SourceError> {
            if self.fail_stops {
                return Err(SourceError::Status { url: "bus_stops.xml".into(), status: 503 });
            }
            Ok(vec![RawStop {
                name: "01012".into(),
                details: "Hotel Grand Pacific".into(),
                coordinates: RawCoordinates { long: 103.8, lat: 1.3 },
                extra: BTreeMap::new(),
            }])
        }

        async fn bus_services(&self) -> Result<Vec<RawService>, SourceError> {
            Ok(vec![
                service("10", "TRUNK"),
                service("-11", "TRUNK"),
                service("NR1", "NIGHTRIDER"),
                service("12", "TRUNK"),
            ])
        }

        async fn service_route(&self, file_name: &str) -> Result<Vec<RawDirection>, SourceError> {
            self.requested.borrow_mut().push(file_name.to_string());
            Ok(vec![RawDirection { name: "1".into(), stops: vec!["01012".into()] }])
        }

        async fn service_geometry(&self, file_name: &str) -> Result<FeatureCollection, SourceError> {
            self.requested.borrow_mut().push(file_name.to_string());
            if self.failing_files.iter().any(|f| *f == file_name) {
                return Err(SourceError::Request { url: file_name.into(), reason: "timed out".into() });
            }
            Ok(convert_to_geojson(vec![feature(
                Default::default(),
                line_string(&[[103.8, 1.3], [103.9, 1.4]]),
            )]))
        }

        async fn datamall_stops(&self) -> Result<Vec<DatamallStop>, SourceError> {
            Ok(vec![])
        }

        async fn datamall_routes(&self) -> Result<Vec<DatamallRoute>, SourceError> {
            Ok(vec![])
        }

        async fn delay(&self) {}
    }

    fn config() -> Config {
        Config {
            service_types: vec!["TRUNK".into()],
            account_key: Some("key".into()),
            ..Config::default()
        }
    }

    #[actix_rt::test]
    async fn failed_geometry_does_not_block_other_services() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let store = DataStore::new(dir.path(), &config.paths);
        let provider = FakeProvider { failing_files: vec!["10-1.kml"], ..FakeProvider::default() };

        let snapshot = Fetcher::new(&provider, &config, &store).fetch_all().await.unwrap();

        assert_eq!(*provider.requested.borrow(), vec!["10.xml", "10-1.kml", "12.xml", "12-1.kml"]);
        assert_eq!(snapshot.failures.failed_geometries.len(), 1);
        assert_eq!(snapshot.failures.failed_geometries[0].file_name, "10-1.kml");
        assert!(snapshot.failures.failed_routes.is_empty());
        assert!(snapshot.geometries.contains_key("12-1"));
        assert!(snapshot.routes.contains_key("10"));

        let reloaded = store.load_raw_snapshot().unwrap();
        assert_eq!(reloaded.failures, snapshot.failures);
        assert_eq!(reloaded.geometries, snapshot.geometries);
    }

    #[actix_rt::test]
    async fn stop_list_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let store = DataStore::new(dir.path(), &config.paths);
        let provider = FakeProvider { fail_stops: true, ..FakeProvider::default() };

        let result = Fetcher::new(&provider, &config, &store).fetch_all().await;
        assert!(matches!(result, Err(Error::Source(SourceError::Status { status: 503, .. }))));
        assert!(provider.requested.borrow().is_empty());
    }

    #[actix_rt::test]
    async fn account_key_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { account_key: None, ..config() };
        let store = DataStore::new(dir.path(), &config.paths);
        let provider = FakeProvider::default();

        let result = Fetcher::new(&provider, &config, &store).fetch_all().await;
        assert!(matches!(result, Err(Error::MissingAccountKey)));
    }
}
