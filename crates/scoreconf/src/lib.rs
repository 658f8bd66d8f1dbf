//! Configuration loading for scorelens.
//!
//! Every tunable of the analysis engines lives here, together with the
//! cache backend selection and the log filter.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/scorelens/config.toml` (system)
//! 2. `~/.config/scorelens/config.toml` (user)
//! 3. `./scorelens.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`SCORELENS_*`)
//!
//! # Example Config
//!
//! ```toml
//! [density]
//! interval_cs = 10
//!
//! [dynamics]
//! stevens_coefficient = 0.67
//! temporal_window = 0.1
//! masking_window = 0.15
//!
//! [spectrum]
//! pitch_resolution = 128
//! time_resolution = 400
//! sigma = 1.5
//!
//! [cache]
//! backend = "sqlite"
//! path = "~/.local/share/scorelens/cache.db"
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{
    CacheBackend, CacheConfig, DensityConfig, DynamicsConfig, SpectrumConfig, TelemetryConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Complete scorelens configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScoreConfig {
    pub density: DensityConfig,
    pub dynamics: DynamicsConfig,
    pub spectrum: SpectrumConfig,
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
}

impl ScoreConfig {
    /// Load configuration from all sources and validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing `./scorelens.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject tunables the engines cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                key,
                message: message.into(),
            }
        }
        fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(invalid(key, format!("must be a positive number, got {value}")))
            }
        }
        fn factor(key: &'static str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(invalid(key, format!("must be in (0, 1], got {value}")))
            }
        }

        if self.density.interval_cs == 0 {
            return Err(invalid("density.interval_cs", "must be greater than zero"));
        }

        let d = &self.dynamics;
        positive("dynamics.stevens_coefficient", d.stevens_coefficient)?;
        positive("dynamics.temporal_window", d.temporal_window)?;
        positive("dynamics.masking_window", d.masking_window)?;
        factor("dynamics.dense_factor", d.dense_factor)?;
        factor("dynamics.masked_factor", d.masked_factor)?;
        if d.curve_points < 2 {
            return Err(invalid("dynamics.curve_points", "must be at least 2"));
        }
        if !(d.curve_sigma.is_finite() && d.curve_sigma >= 0.0) {
            return Err(invalid("dynamics.curve_sigma", "must be a non-negative number"));
        }

        let s = &self.spectrum;
        if s.pitch_resolution == 0 || s.time_resolution == 0 {
            return Err(invalid("spectrum", "resolutions must be greater than zero"));
        }
        if !(s.sigma.is_finite() && s.sigma >= 0.0) {
            return Err(invalid(
                "spectrum.sigma",
                format!("must be a non-negative number, got {}", s.sigma),
            ));
        }

        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# scorelens configuration\n\n");

        output.push_str("[density]\n");
        output.push_str(&format!("interval_cs = {}\n", self.density.interval_cs));

        let d = &self.dynamics;
        output.push_str("\n[dynamics]\n");
        output.push_str(&format!("stevens_coefficient = {:?}\n", d.stevens_coefficient));
        output.push_str(&format!("temporal_window = {:?}\n", d.temporal_window));
        output.push_str(&format!("masking_window = {:?}\n", d.masking_window));
        output.push_str(&format!("dense_factor = {:?}\n", d.dense_factor));
        output.push_str(&format!("masked_factor = {:?}\n", d.masked_factor));
        output.push_str(&format!("curve_points = {}\n", d.curve_points));
        output.push_str(&format!("curve_sigma = {:?}\n", d.curve_sigma));

        let s = &self.spectrum;
        output.push_str("\n[spectrum]\n");
        output.push_str(&format!("pitch_resolution = {}\n", s.pitch_resolution));
        output.push_str(&format!("time_resolution = {}\n", s.time_resolution));
        output.push_str(&format!("sigma = {:?}\n", s.sigma));

        output.push_str("\n[cache]\n");
        output.push_str(&format!("backend = \"{}\"\n", self.cache.backend));
        output.push_str(&format!("path = \"{}\"\n", self.cache.path.display()));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}
