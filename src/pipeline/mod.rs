pub mod changes;
pub mod error;
pub mod fetcher;
pub mod generator;
pub mod naming;
pub mod patcher;
pub mod repair;
pub mod store;

use std::path::Path;

use crate::config::Config;
use crate::sources::citymapper::CityMapperClient;
use crate::sources::http::HttpClient;
use crate::sources::lta::LtaClient;
use crate::sources::onemap::OneMapClient;
use crate::sources::transitlink::TransitLinkClient;

use changes::ChangeSet;
use error::Error;
use fetcher::Fetcher;
use generator::Generator;
use patcher::Patcher;
use repair::{CityMapperStrategy, OneMapStrategy, RepairChain};
use store::DataStore;

/// Where the previous revision of the canonical files comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Previous<'a> {
    Directory(&'a Path),
    GitRef(&'a str),
}

pub async fn run_fetch(config: &Config, store: &DataStore) -> Result<(), Error> {
    let client = LtaClient::new(HttpClient::new(&config.processing), config);
    Fetcher::new(&client, config, store).fetch_all().await?;
    Ok(())
}

pub async fn run_patch(config: &Config, store: &DataStore) -> Result<(), Error> {
    let raw = store.load_raw_snapshot()?;
    let http = HttpClient::new(&config.processing);
    let onemap = OneMapClient::new(http.clone(), config);
    let citymapper = CityMapperClient::new(http.clone(), config);
    let transitlink = TransitLinkClient::new(http, config);
    let chain = RepairChain::new(vec![
        Box::new(OneMapStrategy::new(&onemap)),
        Box::new(CityMapperStrategy::new(&citymapper)),
    ])
    .with_delay(config.processing.request_delay());
    Patcher::new(&chain, &transitlink, config, store)
        .patch_all(&raw.failures, &raw)
        .await?;
    Ok(())
}

pub fn run_generate(config: &Config, store: &DataStore) -> Result<(), Error> {
    let raw = store.load_raw_snapshot()?;
    let patches = store.load_patch_set()?;
    let artifacts = Generator::new(config).generate(&raw, &patches)?;
    store.write_artifacts(&artifacts)
}

/// Compares the generated canonical files with a previous revision.
pub fn run_changes(store: &DataStore, previous: Previous) -> Result<ChangeSet, Error> {
    let old = match previous {
        Previous::Directory(dir) => store.load_canonical(dir)?,
        Previous::GitRef(git_ref) => changes::load_from_git(store, git_ref)?,
    };
    let new = store.load_canonical(&store.output_dir())?;
    changes::detect(&old, &new, chrono::Local::now().date_naive())
}

/// Fetch, patch and generate, each stage reading what the previous one wrote.
pub async fn run_build(config: &Config, store: &DataStore) -> Result<(), Error> {
    log::info!("Stage 1/3: fetch");
    run_fetch(config, store).await?;
    log::info!("Stage 2/3: patch");
    run_patch(config, store).await?;
    log::info!("Stage 3/3: generate");
    run_generate(config, store)
}
