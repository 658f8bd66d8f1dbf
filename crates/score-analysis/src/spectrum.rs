//! Pitch × time energy distribution.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use score_model::score::EMPTY_PITCH_RANGE;
use score_model::{Error, NoteEvent, Result, ScoreModel};
use scoreconf::SpectrumConfig;

use crate::density::linspace;
use crate::smoothing::{gaussian_filter_2d, MAX_SIGMA};

/// Largest energy grid a spectrum analysis will allocate.
pub const MAX_CELLS: usize = 1 << 24;

/// Extent of a spectrum grid, padding included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBounds {
    pub time: (f64, f64),
    pub pitch: (f64, f64),
}

impl GridBounds {
    /// Note extent padded by 5% of the time span and 10% of the pitch span.
    ///
    /// Pitch stays within MIDI range and time never goes below zero.
    pub fn from_notes(notes: &[NoteEvent]) -> Option<Self> {
        let first = notes.first()?;
        let mut time = (first.start_time, first.end_time());
        let mut pitch = (first.pitch as f64, first.pitch as f64);
        for note in &notes[1..] {
            time = (time.0.min(note.start_time), time.1.max(note.end_time()));
            pitch = (pitch.0.min(note.pitch as f64), pitch.1.max(note.pitch as f64));
        }

        let pitch_pad = (pitch.1 - pitch.0) * 0.1;
        let time_pad = (time.1 - time.0) * 0.05;
        Some(Self {
            time: ((time.0 - time_pad).max(0.0), time.1 + time_pad),
            pitch: ((pitch.0 - pitch_pad).max(0.0), (pitch.1 + pitch_pad).min(127.0)),
        })
    }
}

/// Row-major `[pitch_bin][time_bin]` energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumGrid {
    pub energy: Vec<f64>,
    pub pitch_resolution: usize,
    pub time_resolution: usize,
    pub time_range: (f64, f64),
    pub pitch_range: (f64, f64),
    pub time_edges: Vec<f64>,
}

impl SpectrumGrid {
    fn empty(pitch_resolution: usize, time_resolution: usize) -> Self {
        Self {
            energy: Vec::new(),
            pitch_resolution,
            time_resolution,
            time_range: (0.0, 0.0),
            pitch_range: (EMPTY_PITCH_RANGE.0 as f64, EMPTY_PITCH_RANGE.1 as f64),
            time_edges: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }

    pub fn at(&self, pitch_bin: usize, time_bin: usize) -> f64 {
        self.energy
            .get(pitch_bin * self.time_resolution + time_bin)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn bounds(&self) -> GridBounds {
        GridBounds {
            time: self.time_range,
            pitch: self.pitch_range,
        }
    }

    pub fn total_energy(&self) -> f64 {
        self.energy.iter().sum()
    }
}

/// Notes of the score ordered by start time, minus any with unusable timing.
pub fn extract_notes(score: &ScoreModel) -> Vec<NoteEvent> {
    let mut notes: Vec<NoteEvent> = score
        .notes()
        .iter()
        .filter(|n| {
            let usable = n.start_time.is_finite()
                && n.duration.is_finite()
                && n.end_time() >= n.start_time;
            if !usable {
                warn!(
                    start = n.start_time,
                    duration = n.duration,
                    part = %n.part,
                    "skipping note with unusable timing"
                );
            }
            usable
        })
        .cloned()
        .collect();
    notes.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    notes
}

fn check_parameters(resolution: (usize, usize), sigma: f64) -> Result<()> {
    if resolution.0 == 0 || resolution.1 == 0 {
        return Err(Error::Validation(format!(
            "spectrum resolution must be non-zero, got {} x {}",
            resolution.0, resolution.1
        )));
    }
    if resolution.0.checked_mul(resolution.1).map_or(true, |cells| cells > MAX_CELLS) {
        return Err(Error::Validation(format!(
            "spectrum resolution {} x {} exceeds {MAX_CELLS} cells",
            resolution.0, resolution.1
        )));
    }
    if !(sigma.is_finite() && (0.0..=MAX_SIGMA).contains(&sigma)) {
        return Err(Error::Configuration(format!(
            "spectrum sigma must be between 0 and {MAX_SIGMA}, got {sigma}"
        )));
    }
    Ok(())
}

/// Energy grid over the padded note extent.
///
/// `resolution` is `(pitch_bins, time_bins)`.
pub fn spectral_density(
    notes: &[NoteEvent],
    resolution: (usize, usize),
    sigma: f64,
) -> Result<SpectrumGrid> {
    check_parameters(resolution, sigma)?;
    match GridBounds::from_notes(notes) {
        Some(bounds) => spectral_density_within(notes, bounds, resolution, sigma),
        None => Ok(SpectrumGrid::empty(resolution.0, resolution.1)),
    }
}

/// Energy grid over caller-supplied bounds.
pub fn spectral_density_within(
    notes: &[NoteEvent],
    bounds: GridBounds,
    resolution: (usize, usize),
    sigma: f64,
) -> Result<SpectrumGrid> {
    check_parameters(resolution, sigma)?;
    let (pitch_res, time_res) = resolution;
    if notes.is_empty() {
        return Ok(SpectrumGrid::empty(pitch_res, time_res));
    }

    let (t_min, t_max) = bounds.time;
    let (p_min, p_max) = bounds.pitch;
    let time_edges = linspace(t_min, t_max, time_res);
    let mut energy = vec![0.0; pitch_res * time_res];

    for note in notes {
        let (start, end) = (note.start_time, note.end_time());
        let pitch_bin = if p_max > p_min {
            ((note.pitch as f64 - p_min) / (p_max - p_min) * (pitch_res - 1) as f64) as i64
        } else {
            0
        };
        if !(0..pitch_res as i64).contains(&pitch_bin) {
            continue;
        }

        let row = pitch_bin as usize * time_res;
        let velocity = note.velocity.clamp(0.0, 1.0);
        for (time_bin, _) in time_edges
            .iter()
            .enumerate()
            .filter(|(_, &edge)| start <= edge && edge <= end)
        {
            energy[row + time_bin] += velocity;
        }
    }

    if sigma > 0.0 && energy.iter().any(|&e| e != 0.0) {
        energy = gaussian_filter_2d(&energy, pitch_res, time_res, sigma);
    }
    debug!(pitch_res, time_res, sigma, notes = notes.len(), "spectrum grid built");

    Ok(SpectrumGrid {
        energy,
        pitch_resolution: pitch_res,
        time_resolution: time_res,
        time_range: bounds.time,
        pitch_range: bounds.pitch,
        time_edges,
    })
}

/// Extract the score's notes and grid them with configured resolution and sigma.
pub fn analyze_spectrum(score: &ScoreModel, config: &SpectrumConfig) -> Result<SpectrumGrid> {
    let notes = extract_notes(score);
    spectral_density(
        &notes,
        (config.pitch_resolution, config.time_resolution),
        config.sigma,
    )
}
