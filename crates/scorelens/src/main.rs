//! scorelens - dynamics, density and spectrum analysis for scores
//!
//! Subcommands:
//! - `scorelens analyze <file>` - Analyze a MusicXML, MIDI or JSON score
//! - `scorelens config` - Print the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scoreconf::{CacheBackend, ScoreConfig};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "scorelens")]
#[command(about = "Analyze dynamics, note density and pitch spectrum of a score")]
#[command(version)]
struct Cli {
    /// Config file used instead of ./scorelens.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a score file (.musicxml, .xml, .mid, .midi, .json)
    Analyze {
        /// Score file
        file: PathBuf,

        /// Skip per-part dynamics events
        #[arg(long)]
        no_dynamics: bool,

        /// Skip note density
        #[arg(long)]
        no_density: bool,

        /// Skip the pitch spectrum
        #[arg(long)]
        no_spectral: bool,

        /// Skip the combined dynamics curve
        #[arg(long)]
        no_combined_dynamics: bool,

        /// Density bin width in centiseconds
        #[arg(short, long)]
        interval: Option<u32>,

        /// Result cache backend: memory, sqlite or none
        #[arg(long)]
        cache: Option<CacheBackend>,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(config: &ScoreConfig) {
    let filter = EnvFilter::try_new(&config.telemetry.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = ScoreConfig::load_with_sources_from(cli.config.as_deref())
        .context("loading configuration")?;
    init_tracing(&config);

    match cli.command {
        Commands::Analyze {
            file,
            no_dynamics,
            no_density,
            no_spectral,
            no_combined_dynamics,
            interval,
            cache,
            output,
        } => {
            let options = score_analysis::AnalysisOptions {
                density: !no_density,
                dynamics: !no_dynamics,
                spectral: !no_spectral,
                combined_dynamics: !no_combined_dynamics,
                interval,
            };
            commands::analyze(config, &file, &options, cache, output.as_deref())?;
        }
        Commands::Config => {
            commands::show_config(&config, &sources);
        }
    }

    Ok(())
}
