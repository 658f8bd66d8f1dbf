//! Configuration sections, one per engine plus cache and telemetry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Note-density binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Bin width in centiseconds (1 time unit = 100).
    /// Default: 10
    #[serde(default = "DensityConfig::default_interval_cs")]
    pub interval_cs: u32,
}

impl DensityConfig {
    fn default_interval_cs() -> u32 {
        10
    }
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            interval_cs: Self::default_interval_cs(),
        }
    }
}

/// Perceived-intensity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    /// Stevens' power-law exponent for loudness.
    pub stevens_coefficient: f64,
    /// Temporal integration window, in time units.
    pub temporal_window: f64,
    /// Window inside which a louder part masks a marking.
    pub masking_window: f64,
    /// Multiplier applied when markings crowd the integration window.
    pub dense_factor: f64,
    /// Multiplier applied to masked markings.
    pub masked_factor: f64,
    /// Sample count of the combined dynamics curve.
    pub curve_points: usize,
    /// Gaussian sigma (in samples) used to smooth the combined curve.
    pub curve_sigma: f64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            stevens_coefficient: 0.67,
            temporal_window: 0.1,
            masking_window: 0.15,
            dense_factor: 0.9,
            masked_factor: 0.8,
            curve_points: 500,
            curve_sigma: 5.0,
        }
    }
}

/// Pitch × time energy grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    pub pitch_resolution: usize,
    pub time_resolution: usize,
    /// Gaussian smoothing sigma in bins; 0 disables smoothing.
    pub sigma: f64,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            pitch_resolution: 128,
            time_resolution: 400,
            sigma: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
    None,
}

impl fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheBackend::Memory => "memory",
            CacheBackend::Sqlite => "sqlite",
            CacheBackend::None => "none",
        })
    }
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "sqlite" => Ok(CacheBackend::Sqlite),
            "none" | "off" => Ok(CacheBackend::None),
            other => Err(format!("unknown cache backend: {other}")),
        }
    }
}

/// Analysis result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default: memory
    #[serde(default)]
    pub backend: CacheBackend,

    /// SQLite database used by the `sqlite` backend.
    /// Default: ~/.local/share/scorelens/cache.db
    #[serde(default = "CacheConfig::default_path")]
    pub path: PathBuf,
}

impl CacheConfig {
    fn default_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.data_dir().join("scorelens/cache.db"))
            .unwrap_or_else(|| PathBuf::from(".scorelens/cache.db"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            path: Self::default_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an EnvFilter string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
