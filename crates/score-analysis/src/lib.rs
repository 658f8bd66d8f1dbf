//! Density, dynamics and spectrum analysis over a [`ScoreModel`].
//!
//! The engines are plain functions over immutable input. [`ScoreAnalyzer`]
//! ties them to a [`ScoreConfig`] and a [`ResultCache`] so repeated
//! analyses of the same score are served from the cache.

pub mod cache;
pub mod density;
pub mod dynamics;
pub mod smoothing;
pub mod spectrum;

pub use cache::{memoize, CacheKey, MemoryCache, NoCache, ResultCache, SqliteCache};
pub use density::{
    analyze_density, analyze_density_with_register, DensitySeries, DensitySummary,
    RegisterDensity,
};
pub use dynamics::{DynamicsAnalyzer, DynamicsCurve};
pub use spectrum::{
    extract_notes, spectral_density, spectral_density_within, GridBounds, SpectrumGrid,
};

use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use score_model::{DynamicEvent, Error, Result, ScoreMetadata, ScoreModel};
use scoreconf::{CacheBackend, CacheConfig, ScoreConfig};

/// Current algorithm version; bump to invalidate persisted cache entries.
pub const CURRENT_VERSION: u32 = 1;

/// Which analyses to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub density: bool,
    pub dynamics: bool,
    pub spectral: bool,
    pub combined_dynamics: bool,
    /// Density bin width override, in centiseconds
    pub interval: Option<u32>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            density: true,
            dynamics: true,
            spectral: true,
            combined_dynamics: true,
            interval: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityReport {
    pub interval_cs: u32,
    pub series: RegisterDensity,
    pub summary: DensitySummary,
}

/// Everything one `analyze` call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub metadata: ScoreMetadata,
    pub note_count: usize,
    pub time_range: (f64, f64),
    pub pitch_range: (u8, u8),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density: Option<DensityReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamics: Option<Vec<DynamicEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined_dynamics: Option<DynamicsCurve>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectral: Option<SpectrumGrid>,
}

/// Open the cache selected by `config`.
pub fn open_cache(config: &CacheConfig) -> anyhow::Result<Arc<dyn ResultCache>> {
    Ok(match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::None => Arc::new(NoCache),
        CacheBackend::Sqlite => Arc::new(
            SqliteCache::open(&config.path, CURRENT_VERSION).with_context(|| {
                format!("opening sqlite cache at {}", config.path.display())
            })?,
        ),
    })
}

/// Runs the engines with one configuration and one cache.
pub struct ScoreAnalyzer {
    config: ScoreConfig,
    dynamics: DynamicsAnalyzer,
    cache: Arc<dyn ResultCache>,
}

impl ScoreAnalyzer {
    /// Create with the cache backend named in `config`.
    pub fn new(config: ScoreConfig) -> anyhow::Result<Self> {
        let cache = open_cache(&config.cache)?;
        Ok(Self::with_cache(config, cache)?)
    }

    /// Create with an explicit cache (for testing or sharing one cache).
    pub fn with_cache(config: ScoreConfig, cache: Arc<dyn ResultCache>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(Self {
            dynamics: DynamicsAnalyzer::new(&config.dynamics),
            config,
            cache,
        })
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    pub fn analyze(&self, score: &ScoreModel, options: &AnalysisOptions) -> Result<AnalysisReport> {
        info!(
            title = %score.metadata().title,
            notes = score.notes().len(),
            markings = score.markings().len(),
            "analyzing score"
        );

        let density = if options.density {
            let interval_cs = options.interval.unwrap_or(self.config.density.interval_cs);
            let series = self.density(score, interval_cs)?;
            let summary = density::summarize(&DensitySeries {
                time: series.time.clone(),
                density: series.density.clone(),
            });
            Some(DensityReport {
                interval_cs,
                series,
                summary,
            })
        } else {
            None
        };

        let events = if options.dynamics || options.combined_dynamics {
            Some(self.dynamics(score)?)
        } else {
            None
        };
        let combined_dynamics = match &events {
            Some(events) if options.combined_dynamics => {
                Some(self.dynamics.combined_curve(events))
            }
            _ => None,
        };

        let spectral = if options.spectral {
            Some(self.spectrum(score)?)
        } else {
            None
        };

        Ok(AnalysisReport {
            metadata: score.metadata().clone(),
            note_count: score.notes().len(),
            time_range: score.time_range(),
            pitch_range: score.pitch_range(),
            density,
            dynamics: events.filter(|_| options.dynamics),
            combined_dynamics,
            spectral,
        })
    }

    /// Register-augmented density with bins of `interval_cs` centiseconds.
    pub fn density(&self, score: &ScoreModel, interval_cs: u32) -> Result<RegisterDensity> {
        self.cached(score, "density", json!({ "interval": interval_cs }), || {
            density::analyze_score_density_with_register(score, interval_cs as f64)
        })
    }

    pub fn dynamics(&self, score: &ScoreModel) -> Result<Vec<DynamicEvent>> {
        self.cached(score, "dynamics", json!(self.config.dynamics), || {
            self.dynamics.analyze(score)
        })
    }

    pub fn combined_dynamics(&self, score: &ScoreModel) -> Result<DynamicsCurve> {
        let events = self.dynamics(score)?;
        Ok(self.dynamics.combined_curve(&events))
    }

    pub fn spectrum(&self, score: &ScoreModel) -> Result<SpectrumGrid> {
        self.cached(score, "spectral", json!(self.config.spectrum), || {
            spectrum::analyze_spectrum(score, &self.config.spectrum)
        })
    }

    fn cached<T, F>(
        &self,
        score: &ScoreModel,
        analysis_type: &str,
        params: Value,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let result = match CacheKey::derive(score, analysis_type, &params) {
            Ok(key) => memoize(self.cache.as_ref(), &key, compute),
            Err(e) => {
                warn!(analysis = analysis_type, error = %e, "no cache key, computing uncached");
                compute()
            }
        };

        if let Err(e) = &result {
            error!(analysis = analysis_type, error = %e, "analysis failed");
        }
        result
    }
}
