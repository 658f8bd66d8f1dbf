//! Config file discovery, loading, and environment variable overlay.

use crate::{CacheBackend, ConfigError, ScoreConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/scorelens/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("scorelens/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // An explicit path is always returned so a missing file surfaces as a read error.
    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("scorelens.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load a single config file on top of the defaults.
pub fn load_from_file(path: &Path) -> Result<ScoreConfig, ConfigError> {
    let table = load_table(path)?;
    from_table(table, path)
}

/// Build a config from a merged table; missing keys take their defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<ScoreConfig, ConfigError> {
    let mut config: ScoreConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    if let Some(expanded) = config.cache.path.to_str().map(expand_path) {
        config.cache.path = expanded;
    }
    Ok(config)
}

/// Merge `overlay` into `base`, key by key; nested tables merge recursively.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `SCORELENS_*` environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ScoreConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply overrides from an explicit variable list.
pub fn apply_overrides_from(
    config: &mut ScoreConfig,
    sources: &mut ConfigSources,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        let applied = match key.as_str() {
            "SCORELENS_DENSITY_INTERVAL" => value
                .parse::<u32>()
                .map(|v| config.density.interval_cs = v)
                .is_ok(),
            "SCORELENS_STEVENS_COEFFICIENT" => value
                .parse::<f64>()
                .map(|v| config.dynamics.stevens_coefficient = v)
                .is_ok(),
            "SCORELENS_TEMPORAL_WINDOW" => value
                .parse::<f64>()
                .map(|v| config.dynamics.temporal_window = v)
                .is_ok(),
            "SCORELENS_MASKING_WINDOW" => value
                .parse::<f64>()
                .map(|v| config.dynamics.masking_window = v)
                .is_ok(),
            "SCORELENS_SPECTRUM_SIGMA" => value
                .parse::<f64>()
                .map(|v| config.spectrum.sigma = v)
                .is_ok(),
            "SCORELENS_PITCH_RESOLUTION" => value
                .parse::<usize>()
                .map(|v| config.spectrum.pitch_resolution = v)
                .is_ok(),
            "SCORELENS_TIME_RESOLUTION" => value
                .parse::<usize>()
                .map(|v| config.spectrum.time_resolution = v)
                .is_ok(),
            "SCORELENS_CACHE_BACKEND" => value
                .parse::<CacheBackend>()
                .map(|v| config.cache.backend = v)
                .is_ok(),
            "SCORELENS_CACHE_PATH" => {
                config.cache.path = expand_path(&value);
                true
            }
            "SCORELENS_LOG_LEVEL" | "RUST_LOG" => {
                config.telemetry.log_level = value;
                true
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
