use regex::Regex;
use std::cell::RefCell;
use std::sync::LazyLock;

use crate::config::Config;
use crate::model::patch::OneMapSegment;

use super::error::Error;
use super::http::{build_url, HttpClient};

const SESSION_COOKIE: &str = "OMITN";

static SESSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"OMITN=([^;]*)").expect("session cookie pattern"));

/// Pulls the session token out of `Set-Cookie` header values.
pub fn extract_session_token(set_cookies: &[String]) -> Option<String> {
    set_cookies.iter().find_map(|cookie| {
        SESSION_TOKEN
            .captures(cookie)
            .map(|c| c[1].to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Client of the session-authenticated interactive map service.
pub struct OneMapClient {
    http: HttpClient,
    base_url: String,
    session_url: String,
    token: RefCell<Option<String>>,
}

impl OneMapClient {
    pub fn new(http: HttpClient, config: &Config) -> OneMapClient {
        OneMapClient {
            http,
            base_url: config.apis.onemap_base_url.clone(),
            session_url: config.apis.onemap_session_url.clone(),
            token: RefCell::new(None),
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Session token, requested once and reused for later calls.
    pub async fn authenticate(&self) -> Result<String, Error> {
        if let Some(token) = self.token.borrow().clone() {
            return Ok(token);
        }
        let response = self.http.get(&self.session_url, &[]).await?;
        let token = extract_session_token(&response.set_cookies)
            .ok_or_else(|| Error::MissingSession(SESSION_COOKIE.to_string()))?;
        log::debug!("Obtained map service session");
        *self.token.borrow_mut() = Some(token.clone());
        Ok(token)
    }

    /// Route legs of a service, optionally starting from a given stop.
    pub async fn fetch_bus_route(
        &self,
        service: &str,
        start_stop: Option<&str>,
    ) -> Result<Vec<OneMapSegment>, Error> {
        let token = self.authenticate().await?;
        let mut params = vec![("busSvcNo", service)];
        if let Some(stop) = start_stop {
            params.push(("startBusStopNo", stop));
        }
        let url = build_url(&self.base_url, "omapp/getBusRoutes", &params)?;
        let cookie = format!("{}={}", SESSION_COOKIE, token);
        self.http.get_json(&url, &[("Cookie", cookie.as_str())]).await
    }
}
