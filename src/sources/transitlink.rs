use regex::Regex;
use std::sync::LazyLock;

use crate::config::Config;

use super::error::Error;
use super::http::HttpClient;

static STOP_NAME_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<td class="data">[^<>]+</td>\s+<td class="data">([^<>]+)"#)
        .expect("stop name pattern")
});

/// Canonical stop name from a registry result page: the second data cell.
pub fn extract_stop_name(html: &str) -> Option<String> {
    STOP_NAME_CELL
        .captures(html)
        .map(|c| c[1].trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Client of the stop-name registry used to fix all-caps stop names.
pub struct TransitLinkClient {
    http: HttpClient,
    base_url: String,
}

impl TransitLinkClient {
    pub fn new(http: HttpClient, config: &Config) -> TransitLinkClient {
        TransitLinkClient {
            http,
            base_url: config.apis.transitlink_base_url.clone(),
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub async fn lookup_stop_name(&self, code: &str) -> Result<Option<String>, Error> {
        let url = format!("{}/bscode_idx.php", self.base_url);
        let html = self
            .http
            .post_form(&url, &[("bs_code", "-"), ("bscode", code)])
            .await?;
        Ok(extract_stop_name(&html))
    }
}
