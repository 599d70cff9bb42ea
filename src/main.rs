use clap::Parser;
use std::path::PathBuf;

use busnet_data::config::Config;
use busnet_data::pipeline::run_build;
use busnet_data::pipeline::store::DataStore;

/// Fetches, patches and generates the canonical bus network dataset.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
}

#[actix_rt::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Could not load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let store = DataStore::new(&args.data_dir, &config.paths);

    if let Err(e) = run_build(&config, &store).await {
        log::error!("Build failed: {}", e);
        std::process::exit(1);
    }
    log::info!("Dataset written to {}", store.output_dir().display());
}
