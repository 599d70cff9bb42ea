use serde::Deserialize;

use crate::config::Config;
use crate::model::patch::CityMapperRouteInfo;

use super::error::Error;
use super::http::{build_url, HttpClient};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

/// Client of the crowd transit-search service.
pub struct CityMapperClient {
    http: HttpClient,
    base_url: String,
    region_id: String,
}

impl CityMapperClient {
    pub fn new(http: HttpClient, config: &Config) -> CityMapperClient {
        CityMapperClient {
            http,
            base_url: config.apis.citymapper_base_url.clone(),
            region_id: config.apis.citymapper_region_id.clone(),
        }
    }

    pub async fn search_transport(&self, query: &str) -> Result<Vec<SearchResult>, Error> {
        let url = build_url(
            &self.base_url,
            "2/findtransport",
            &[("query", query), ("region_id", self.region_id.as_str())],
        )?;
        let response: SearchResponse = self.http.get_json(&url, &[]).await?;
        Ok(response.results)
    }

    pub async fn get_route_info(&self, route_id: &str) -> Result<CityMapperRouteInfo, Error> {
        let url = build_url(
            &self.base_url,
            "1/routeinfo",
            &[
                ("route", route_id),
                ("region_id", self.region_id.as_str()),
                ("weekend", "1"),
                ("status_format", "rich"),
            ],
        )?;
        self.http.get_json(&url, &[]).await
    }

    /// Route info of the search result whose display name is exactly the service
    /// number. Results without any route pattern are rejected.
    pub async fn fetch_bus_route(&self, service: &str) -> Result<CityMapperRouteInfo, Error> {
        let results = self.search_transport(service).await?;
        if results.is_empty() {
            return Err(Error::NotFound(format!("no results found for service {service}")));
        }
        let result = exact_match(&results, service)
            .ok_or_else(|| Error::NotFound(format!("exact match not found for service {service}")))?;
        let info = self.get_route_info(&result.id).await?;
        if !has_patterns(&info) {
            return Err(Error::NotFound(format!("no route data found for service {service}")));
        }
        Ok(info)
    }
}

pub fn exact_match<'a>(results: &'a [SearchResult], service: &str) -> Option<&'a SearchResult> {
    results.iter().find(|r| r.display_name == service)
}

pub fn has_patterns(info: &CityMapperRouteInfo) -> bool {
    info.routes.first().is_some_and(|r| !r.patterns.is_empty())
}
