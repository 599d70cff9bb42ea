use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};

use busnet_data::config::Config;
use busnet_data::pipeline::error::Error;
use busnet_data::pipeline::store::DataStore;
use busnet_data::pipeline::{self, Previous};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the raw provider snapshot
    Fetch,
    /// Repair failed or degenerate geometries and correct stop names
    Patch,
    /// Build the canonical files from the raw snapshot and patches
    Generate,
    /// Write a changelog against a previous revision
    Changes(ChangesArgs),
    /// Run fetch, patch and generate in order
    Build,
}

#[derive(ClapArgs, Debug)]
struct ChangesArgs {
    #[command(flatten)]
    revision: RevisionArgs,

    /// Markdown output file; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Exactly one source of the previous revision.
#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
struct RevisionArgs {
    /// Directory holding the previous canonical files
    #[arg(long)]
    previous: Option<PathBuf>,

    /// Git revision holding the previous canonical files
    #[arg(long)]
    git_ref: Option<String>,
}

impl RevisionArgs {
    fn previous(&self) -> Previous<'_> {
        match (&self.git_ref, &self.previous) {
            (Some(git_ref), _) => Previous::GitRef(git_ref),
            // The group makes `--previous` present here.
            (None, dir) => Previous::Directory(dir.as_deref().unwrap_or(Path::new("."))),
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let config = Config::load(args.config.as_deref())?;
    let store = DataStore::new(&args.data_dir, &config.paths);

    match args.command {
        Command::Fetch => pipeline::run_fetch(&config, &store).await,
        Command::Patch => pipeline::run_patch(&config, &store).await,
        Command::Generate => pipeline::run_generate(&config, &store),
        Command::Build => pipeline::run_build(&config, &store).await,
        Command::Changes(changes) => {
            let markdown = pipeline::run_changes(&store, changes.revision.previous())?.to_markdown();
            match changes.output {
                Some(path) => {
                    std::fs::write(&path, markdown).map_err(|e| Error::named(path.display(), e))?;
                    log::info!("Changelog written to {}", path.display());
                }
                None => print!("{}", markdown),
            }
            Ok(())
        }
    }
}

#[actix_rt::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => {}
        Err(Error::NoChanges) => log::info!("No changes since the previous revision"),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}
