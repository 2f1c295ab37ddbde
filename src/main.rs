pub mod types;
pub mod config;
pub mod error;
pub mod data;
pub mod processing;
pub mod render;
pub mod pipeline;

use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "generate_maps", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render point incidents as a marker-cluster map
    Cluster {
        /// Point CSV
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
        /// Defaults to `[output] cluster_map`
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Render per-region values as a choropleth
    Choropleth {
        /// Region-value CSV
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
        /// GeoJSON FeatureCollection or shapefile
        #[arg(short, long, value_name = "FILE")]
        geometry: PathBuf,
        /// Defaults to `[output] choropleth_map`
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Generate both maps from the paths in the config file
    All {
        #[arg(short, long, value_name = "FILE", default_value = "maps.toml")]
        config: PathBuf,
    },
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Cluster { input, output, config } => {
            let app_config = AppConfig::load_or_default(config.as_deref())?;
            let output = output.unwrap_or_else(|| app_config.output.cluster_map.clone());
            pipeline::run_cluster(&app_config, &input, &output)?;
        }
        Commands::Choropleth { input, geometry, output, config } => {
            let app_config = AppConfig::load_or_default(config.as_deref())?;
            let output = output.unwrap_or_else(|| app_config.output.choropleth_map.clone());
            pipeline::run_choropleth(&app_config, &input, &geometry, &output)?;
        }
        Commands::All { config } => {
            info!("Generating maps with config: {:?}", config);
            let app_config = AppConfig::load_from_file(&config)?;
            pipeline::run_all(&app_config)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = error::exit_code(&err);
            if code == 2 {
                warn!("{:#}", err);
            } else {
                error!("{:#}", err);
            }
            ExitCode::from(code)
        }
    }
}
