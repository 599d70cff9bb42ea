use awc::http::header::{SET_COOKIE, USER_AGENT};
use awc::SendClientRequest;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::config::Processing;

use super::error::Error;

const AGENT: &str = "busnet-data/0.1";
const BODY_LIMIT: usize = 128 * 1024 * 1024;

/// Body and cookies of a successful response.
pub struct Response {
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Thin wrapper around the actix HTTP client that every provider client shares.
///
/// Requests are retried a bounded number of times on transport errors and on
/// transient statuses; nothing else is retried.
#[derive(Clone)]
pub struct HttpClient {
    client: awc::Client,
    retry_limit: u32,
    delay: Duration,
}

impl HttpClient {
    pub fn new(processing: &Processing) -> HttpClient {
        let client = awc::Client::builder()
            .timeout(processing.request_timeout())
            .add_default_header((USER_AGENT, AGENT))
            .finish();
        HttpClient {
            client,
            retry_limit: processing.retry_limit,
            delay: processing.request_delay(),
        }
    }

    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Response, Error> {
        log::info!("GET {}", url);
        self.execute(url, || {
            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.insert_header((*name, *value));
            }
            request.send()
        })
        .await
    }

    pub async fn get_text(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, Error> {
        Ok(self.get(url, headers).await?.text())
    }

    pub async fn get_json<T>(&self, url: &str, headers: &[(&str, &str)]) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let response = self.get(url, headers).await?;
        serde_json::from_slice(&response.body).map_err(|source| Error::Json {
            url: url.to_string(),
            source,
        })
    }

    pub async fn post_form<T>(&self, url: &str, form: &T) -> Result<String, Error>
    where
        T: Serialize,
    {
        log::info!("POST {}", url);
        let response = self
            .execute(url, || self.client.post(url).send_form(form))
            .await?;
        Ok(response.text())
    }

    /// Waits the configured inter-request delay.
    pub async fn delay(&self) {
        actix_rt::time::sleep(self.delay).await;
    }

    async fn execute<F>(&self, url: &str, send: F) -> Result<Response, Error>
    where
        F: Fn() -> SendClientRequest,
    {
        let mut attempt = 0;
        loop {
            let error = match send().await {
                Ok(mut response) if response.status().is_success() => {
                    let set_cookies = response
                        .headers()
                        .get_all(SET_COOKIE)
                        .filter_map(|v| v.to_str().ok())
                        .map(str::to_string)
                        .collect();
                    let body = response
                        .body()
                        .limit(BODY_LIMIT)
                        .await
                        .map_err(|e| Error::Payload {
                            url: url.to_string(),
                            reason: e.to_string(),
                        })?;
                    return Ok(Response {
                        set_cookies,
                        body: body.to_vec(),
                    });
                }
                Ok(response) => Error::Status {
                    url: url.to_string(),
                    status: response.status().as_u16(),
                },
                Err(e) => Error::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                },
            };

            if attempt >= self.retry_limit || !is_retryable(&error) {
                log::error!("Failed to fetch {}: {}", url, error);
                return Err(error);
            }
            attempt += 1;
            log::warn!("Retrying {} time(s) - {}", attempt, url);
            self.delay().await;
        }
    }
}

fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Request { .. } => true,
        Error::Status { status, .. } => {
            matches!(status, 400 | 408 | 413 | 429) || (500..600).contains(status)
        }
        _ => false,
    }
}

/// Joins a base URL, a path and encoded query parameters.
pub fn build_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<String, Error> {
    let joined = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    let invalid = |_| Error::InvalidValue {
        field: "url".to_string(),
        value: joined.clone(),
    };
    let url = if params.is_empty() {
        url::Url::parse(&joined).map_err(invalid)?
    } else {
        url::Url::parse_with_params(&joined, params).map_err(invalid)?
    };
    Ok(url.to_string())
}
