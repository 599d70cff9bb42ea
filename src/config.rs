use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::error::Error;

/// Environment variable holding the account key of the paginated stop/route export.
pub const ACCOUNT_KEY_ENV: &str = "DatamallAccountKey";

/// Runtime configuration for every pipeline stage.
///
/// All fields have defaults, so a partial JSON file only needs to name the values it
/// overrides. Paths are relative to the data directory given on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub apis: Apis,
    pub paths: Paths,
    pub processing: Processing,
    pub service_types: Vec<String>,
    #[serde(skip)]
    pub account_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Apis {
    pub lta_base_url: String,
    pub datamall_base_url: String,
    pub datamall_batch_size: usize,
    pub onemap_base_url: String,
    pub onemap_session_url: String,
    pub citymapper_base_url: String,
    pub citymapper_region_id: String,
    pub transitlink_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub raw: PathBuf,
    pub patch: PathBuf,
    pub output: PathBuf,
    pub services: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Processing {
    /// Number of decimal digits kept for stop coordinates.
    pub coordinate_precision: u32,
    pub simplify_tolerance: f64,
    pub request_timeout_ms: u64,
    pub retry_limit: u32,
    pub request_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            apis: Apis::default(),
            paths: Paths::default(),
            processing: Processing::default(),
            service_types: vec!["CITYDIRECT".to_string(), "TRUNK".to_string()],
            account_key: None,
        }
    }
}

impl Default for Apis {
    fn default() -> Self {
        Apis {
            lta_base_url: "https://www.lta.gov.sg/map/busService".to_string(),
            datamall_base_url: "https://datamall2.mytransport.sg/ltaodataservice".to_string(),
            datamall_batch_size: 500,
            onemap_base_url: "https://www.onemap.gov.sg".to_string(),
            onemap_session_url: "https://www.onemap.gov.sg/".to_string(),
            citymapper_base_url: "https://citymapper.com/api".to_string(),
            citymapper_region_id: "sg-singapore".to_string(),
            transitlink_base_url: "https://www.transitlink.com.sg/eservice/eguide".to_string(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Paths {
            raw: PathBuf::from("data/v1/raw"),
            patch: PathBuf::from("data/v1/patch"),
            output: PathBuf::from("data/v1"),
            services: PathBuf::from("data/v1/raw/services"),
        }
    }
}

impl Default for Processing {
    fn default() -> Self {
        Processing {
            coordinate_precision: 5,
            simplify_tolerance: 0.00005,
            request_timeout_ms: 60_000,
            retry_limit: 5,
            request_delay_ms: 1_000,
        }
    }
}

impl Processing {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Config {
    /// Load the configuration from an optional JSON file, then pick up the account key
    /// from the environment.
    pub fn load(path: Option<&Path>) -> Result<Config, Error> {
        let mut config = match path {
            Some(p) => {
                log::debug!("Reading configuration from {}", p.display());
                let file = std::fs::File::open(p).map_err(|e| Error::NamedFileIO {
                    file_name: p.display().to_string(),
                    source: Box::new(e),
                })?;
                serde_json::from_reader(std::io::BufReader::new(file))?
            }
            None => Config::default(),
        };
        config.account_key = std::env::var(ACCOUNT_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Ok(config)
    }

    /// Whether a service type is part of the allow-list.
    pub fn is_allowed_type(&self, service_type: &str) -> bool {
        self.service_types.iter().any(|t| t == service_type)
    }

    pub fn account_key(&self) -> Result<&str, Error> {
        self.account_key.as_deref().ok_or(Error::MissingAccountKey)
    }
}
