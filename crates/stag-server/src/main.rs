//! Binary entrypoint for the STAG spatial service.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use stag_server::config::Config;

#[derive(Parser)]
#[command(name = "stag", about = "Spatial data service for AR/VR sessions")]
struct Cli {
    /// Config file path (overrides the default search paths)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(version = stag_server::VERSION, "starting stag");

    if let Err(e) = stag_server::run(config).await {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}
