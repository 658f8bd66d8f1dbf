//! CLI command implementations

use std::path::Path;

use anyhow::{Context, Result};
use score_analysis::{AnalysisOptions, AnalysisReport, ScoreAnalyzer};
use scoreconf::{CacheBackend, ConfigSources, ScoreConfig};
use tracing::info;

/// Load, analyze and write the JSON report.
pub fn analyze(
    mut config: ScoreConfig,
    file: &Path,
    options: &AnalysisOptions,
    cache: Option<CacheBackend>,
    output: Option<&Path>,
) -> Result<()> {
    if let Some(backend) = cache {
        config.cache.backend = backend;
    }

    let report = run(config, file, options)?;
    let json = serde_json::to_string_pretty(&report).context("serializing report")?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("writing report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run(config: ScoreConfig, file: &Path, options: &AnalysisOptions) -> Result<AnalysisReport> {
    let score = score_model::load_path(file)
        .with_context(|| format!("loading score {}", file.display()))?;
    info!(
        path = %file.display(),
        notes = score.notes().len(),
        parts = score.metadata().parts.len(),
        "score loaded"
    );

    let analyzer = ScoreAnalyzer::new(config).context("creating analyzer")?;
    let report = analyzer
        .analyze(&score, options)
        .with_context(|| format!("analyzing {}", file.display()))?;
    Ok(report)
}

/// Print the effective config, preceded by where it came from.
pub fn show_config(config: &ScoreConfig, sources: &ConfigSources) {
    if sources.files.is_empty() {
        println!("# no config files found, using defaults");
    }
    for file in &sources.files {
        println!("# loaded: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# env override: {var}");
    }
    println!();
    print!("{}", config.to_toml());
}
