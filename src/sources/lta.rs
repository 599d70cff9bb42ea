use geojson::FeatureCollection;
use serde::de::DeserializeOwned;
use std::future::Future;

use crate::config::Config;
use crate::model::raw::{DatamallPage, DatamallRoute, DatamallStop, RawDirection, RawService, RawStop};

use super::error::Error;
use super::http::HttpClient;
use super::{kml, xml};

/// Client of the primary transit-authority feed: the XML/KML map service and the
/// paginated REST export.
pub struct LtaClient {
    http: HttpClient,
    base_url: String,
    datamall_base_url: String,
    batch_size: usize,
    account_key: Option<String>,
}

impl LtaClient {
    pub fn new(http: HttpClient, config: &Config) -> LtaClient {
        LtaClient {
            http,
            base_url: config.apis.lta_base_url.clone(),
            datamall_base_url: config.apis.datamall_base_url.clone(),
            batch_size: config.apis.datamall_batch_size,
            account_key: config.account_key.clone(),
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub async fn fetch_bus_stops(&self) -> Result<Vec<RawStop>, Error> {
        let url = format!("{}/bus_stops.xml", self.base_url);
        xml::parse_bus_stops(&self.http.get_text(&url, &[]).await?)
    }

    pub async fn fetch_bus_services(&self) -> Result<Vec<RawService>, Error> {
        let url = format!("{}/bus_services.xml", self.base_url);
        xml::parse_bus_services(&self.http.get_text(&url, &[]).await?)
    }

    pub async fn fetch_service_route(&self, file_name: &str) -> Result<Vec<RawDirection>, Error> {
        let url = format!("{}/bus_route_xml/{}", self.base_url, file_name);
        xml::parse_service_route(&self.http.get_text(&url, &[]).await?)
    }

    pub async fn fetch_service_geometry(&self, file_name: &str) -> Result<FeatureCollection, Error> {
        let url = format!("{}/bus_route_kml/{}", self.base_url, file_name);
        kml::kml_to_geojson(&self.http.get_text(&url, &[]).await?)
    }

    async fn fetch_datamall<T>(&self, endpoint: &str) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
    {
        let account_key = self
            .account_key
            .as_deref()
            .ok_or_else(|| Error::NotFound("no account key for the paginated export".into()))?;
        let http = &self.http;
        let base_url = self.datamall_base_url.as_str();
        let values = paginate(self.batch_size, move |skip| {
            let url = format!("{}/{}?$skip={}", base_url, endpoint, skip);
            async move {
                let page: DatamallPage<T> = http.get_json(&url, &[("AccountKey", account_key)]).await?;
                Ok(page.value)
            }
        })
        .await?;
        log::info!("Fetched {} {} records", values.len(), endpoint);
        Ok(values)
    }

    pub async fn fetch_bus_stops_datamall(&self) -> Result<Vec<DatamallStop>, Error> {
        self.fetch_datamall("BusStops").await
    }

    pub async fn fetch_bus_routes_datamall(&self) -> Result<Vec<DatamallRoute>, Error> {
        self.fetch_datamall("BusRoutes").await
    }
}

/// Requests pages at offsets `0, batch_size, 2 * batch_size, ...` until a page
/// comes back empty.
pub async fn paginate<T, F, Fut>(batch_size: usize, mut fetch_page: F) -> Result<Vec<T>, Error>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, Error>>,
{
    let mut values = Vec::new();
    let mut skip = 0;
    loop {
        let page = fetch_page(skip).await?;
        if page.is_empty() {
            return Ok(values);
        }
        values.extend(page);
        skip += batch_size;
    }
}
