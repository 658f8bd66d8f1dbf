//! Note density over a uniform time grid.
//!
//! Bin widths are given in centiseconds of score time: one time unit is 100
//! interval units, so `interval = 10` yields ten bins per time unit.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use score_model::{Error, Result, ScoreModel};

/// Note counts sampled on a grid spanning `[0, max end]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DensitySeries {
    pub time: Vec<f64>,
    pub density: Vec<u32>,
}

impl DensitySeries {
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }
}

/// Density plus the pitch register active at each grid point.
///
/// Register series are zero where nothing sounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterDensity {
    pub time: Vec<f64>,
    pub density: Vec<u32>,
    pub register_high: Vec<u8>,
    pub register_low: Vec<u8>,
    pub register_mean: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DensitySummary {
    pub max: u32,
    pub mean: f64,
    /// Grid times whose count exceeds 80% of the maximum
    pub peaks: Vec<f64>,
}

/// Largest time grid a density analysis will allocate.
pub const MAX_BINS: usize = 1 << 22;

/// `n` evenly spaced points over `[start, end]`, both ends included.
pub(crate) fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + i as f64 * step })
                .collect()
        }
    }
}

struct Note {
    start: f64,
    end: f64,
    pitch: f64,
}

/// Grid layout shared by both density variants.
struct Binning {
    time: Vec<f64>,
    interval: f64,
}

impl Binning {
    fn bins(&self) -> usize {
        self.time.len()
    }

    /// Inclusive bin range covered by a note, or `None` when it starts past the grid.
    fn span(&self, note: &Note) -> Option<(usize, usize)> {
        let start_bin = (note.start * 100.0 / self.interval).floor().max(0.0) as usize;
        let end_bin = (note.end * 100.0 / self.interval).floor();
        if start_bin >= self.bins() || end_bin < start_bin as f64 {
            return None;
        }
        Some((start_bin, (end_bin as usize).min(self.bins() - 1)))
    }
}

fn read_records<T: AsRef<[f64]>>(notes: &[T]) -> Result<Vec<Note>> {
    let mut parsed = Vec::with_capacity(notes.len());
    for (index, record) in notes.iter().enumerate() {
        let fields = record.as_ref();
        if fields.len() < 3 {
            return Err(Error::analysis(
                format!("density analysis failed: malformed note record at index {index}"),
                Error::Validation(format!(
                    "expected (start, duration, pitch), got {} field(s)",
                    fields.len()
                )),
            ));
        }

        let (start, duration, pitch) = (fields[0], fields[1], fields[2]);
        if !(start.is_finite() && duration.is_finite() && pitch.is_finite()) {
            warn!(index, "skipping note with non-finite values");
            continue;
        }
        parsed.push(Note {
            start,
            end: start + duration,
            pitch,
        });
    }
    Ok(parsed)
}

fn layout(notes: &[Note], interval: f64) -> Result<Option<Binning>> {
    if !(interval.is_finite() && interval > 0.0) {
        return Err(Error::Validation(format!(
            "density interval must be a positive number of centiseconds, got {interval}"
        )));
    }

    let Some(max_time) = notes.iter().map(|n| n.end).reduce(f64::max) else {
        warn!("no notes to analyze, returning empty density");
        return Ok(None);
    };
    if max_time <= 0.0 {
        warn!(max_time, "notes end at or before zero, returning empty density");
        return Ok(None);
    }

    let bins = (max_time * 100.0 / interval).ceil();
    if !(bins.is_finite() && bins <= MAX_BINS as f64) {
        return Err(Error::analysis(
            "density analysis failed: time grid too large",
            Error::Validation(format!(
                "{max_time} time units at {interval} cs per bin exceeds {MAX_BINS} bins"
            )),
        ));
    }
    let bins = bins as usize;
    debug!(bins, max_time, interval, "density grid");
    Ok(Some(Binning {
        time: linspace(0.0, max_time, bins),
        interval,
    }))
}

/// Count the notes sounding in each bin.
///
/// Each record is `(start, duration, pitch)`; extra fields are ignored.
pub fn analyze_density<T: AsRef<[f64]>>(notes: &[T], interval: f64) -> Result<DensitySeries> {
    let notes = read_records(notes)?;
    let Some(binning) = layout(&notes, interval)? else {
        return Ok(DensitySeries::default());
    };

    let mut density = vec![0u32; binning.bins()];
    for note in &notes {
        if let Some((first, last)) = binning.span(note) {
            for count in &mut density[first..=last] {
                *count += 1;
            }
        }
    }

    Ok(DensitySeries {
        time: binning.time,
        density,
    })
}

/// Density with per-bin lowest, highest and mean sounding pitch.
pub fn analyze_density_with_register<T: AsRef<[f64]>>(
    notes: &[T],
    interval: f64,
) -> Result<RegisterDensity> {
    let series = analyze_density(notes, interval)?;
    if series.is_empty() {
        return Ok(RegisterDensity::default());
    }

    let notes = read_records(notes)?;
    let binning = Binning {
        time: series.time,
        interval,
    };
    let bins = binning.bins();

    // One bit per MIDI pitch sounding in each bin
    let mut occupancy = vec![0u128; bins];
    for note in &notes {
        if !(0.0..128.0).contains(&note.pitch) {
            continue;
        }
        let bit = 1u128 << (note.pitch as u32);
        if let Some((first, last)) = binning.span(note) {
            for cell in &mut occupancy[first..=last] {
                *cell |= bit;
            }
        }
    }

    let mut register_high = vec![0u8; bins];
    let mut register_low = vec![0u8; bins];
    let mut register_mean = vec![0.0; bins];
    for (bin, &pitches) in occupancy.iter().enumerate() {
        if pitches == 0 {
            continue;
        }
        register_low[bin] = pitches.trailing_zeros() as u8;
        register_high[bin] = (127 - pitches.leading_zeros()) as u8;
        let sum: u32 = (0..128u32).filter(|p| pitches & (1 << p) != 0).sum();
        register_mean[bin] = sum as f64 / pitches.count_ones() as f64;
    }

    Ok(RegisterDensity {
        time: binning.time,
        density: series.density,
        register_high,
        register_low,
        register_mean,
    })
}

pub fn summarize(series: &DensitySeries) -> DensitySummary {
    let Some(max) = series.density.iter().copied().max() else {
        return DensitySummary::default();
    };
    let mean = series.density.iter().map(|&c| c as f64).sum::<f64>() / series.len() as f64;
    let threshold = 0.8 * max as f64;
    let peaks = series
        .time
        .iter()
        .zip(&series.density)
        .filter(|(_, &count)| count as f64 > threshold)
        .map(|(&t, _)| t)
        .collect();

    DensitySummary { max, mean, peaks }
}

/// `(start, duration, pitch)` records for every note of a score.
pub fn note_records(score: &ScoreModel) -> Vec<[f64; 3]> {
    score
        .notes()
        .iter()
        .map(|n| [n.start_time, n.duration, n.pitch as f64])
        .collect()
}

pub fn analyze_score_density(score: &ScoreModel, interval: f64) -> Result<DensitySeries> {
    analyze_density(&note_records(score), interval)
}

pub fn analyze_score_density_with_register(
    score: &ScoreModel,
    interval: f64,
) -> Result<RegisterDensity> {
    analyze_density_with_register(&note_records(score), interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_note_fills_first_ten_bins() {
        let series = analyze_density(&[[0.0, 1.0, 60.0]], 10.0).unwrap();
        assert_eq!(series.len(), 10);
        assert_eq!(series.density, vec![1; 10]);
        assert_eq!(series.time[0], 0.0);
        assert_eq!(series.time[9], 1.0);
    }

    #[test]
    fn empty_input_is_not_an_error() {
        let empty: Vec<[f64; 3]> = Vec::new();
        assert!(analyze_density(&empty, 10.0).unwrap().is_empty());
        assert_eq!(
            analyze_density_with_register(&empty, 10.0).unwrap(),
            RegisterDensity::default()
        );
    }

    #[test]
    fn zero_length_score_is_empty() {
        let series = analyze_density(&[[0.0, 0.0, 60.0]], 10.0).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn overlapping_notes_stack() {
        let notes = vec![
            vec![0.0, 2.0, 60.0],
            vec![1.0, 1.0, 64.0],
            vec![1.5, 0.2, 67.0, 0.9],
        ];
        let series = analyze_density(&notes, 50.0).unwrap();
        // 2 time units at 50cs = 4 bins
        assert_eq!(series.time, vec![0.0, 2.0 / 3.0, 4.0 / 3.0, 2.0]);
        assert_eq!(series.density, vec![1, 1, 2, 3]);
        assert_eq!(series.time.len(), series.density.len());
        assert!(series.time.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn note_starting_past_the_grid_is_dropped() {
        // max end 0.95 → ceil(9.5) = 10 bins; the second note starts in bin 10
        let notes = [[0.0, 0.95, 60.0], [0.95, 0.0, 62.0], [1.0, -0.05, 64.0]];
        let series = analyze_density(&notes, 10.0).unwrap();
        assert_eq!(series.len(), 10);
        assert_eq!(series.density.iter().sum::<u32>(), 10);
    }

    #[test]
    fn negative_starts_clamp_to_first_bin() {
        let series = analyze_density(&[[-0.5, 1.0, 60.0]], 10.0).unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(series.density, vec![1, 1, 1, 1, 1]);
    }

    #[test]
    fn non_finite_notes_are_skipped() {
        let notes = [[f64::NAN, 1.0, 60.0], [0.0, 1.0, 60.0]];
        let series = analyze_density(&notes, 10.0).unwrap();
        assert_eq!(series.density, vec![1; 10]);
    }

    #[test]
    fn short_record_reports_index() {
        let notes = vec![vec![0.0, 1.0, 60.0], vec![0.5, 1.0]];
        let err = analyze_density(&notes, 10.0).unwrap_err();
        assert!(matches!(err, Error::Analysis { .. }));
        assert!(err.to_string().contains("index 1"));
        assert!(matches!(err.cause(), Some(Error::Validation(_))));
    }

    #[test]
    fn interval_must_be_positive() {
        for interval in [0.0, -10.0, f64::NAN] {
            let err = analyze_density(&[[0.0, 1.0, 60.0]], interval).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
    }

    #[test]
    fn oversized_grid_is_an_analysis_error() {
        for notes in [[[0.0, 1e18, 60.0]], [[0.0, f64::MAX, 60.0]]] {
            let err = analyze_density(&notes, 10.0).unwrap_err();
            assert!(matches!(err, Error::Analysis { .. }));
            assert!(matches!(err.cause(), Some(Error::Validation(_))));
            assert!(analyze_density_with_register(&notes, 10.0).is_err());
        }
    }

    #[test]
    fn grid_at_the_cap_is_allowed() {
        let units = MAX_BINS / 10;
        let series = analyze_density(&[[0.0, units as f64, 60.0]], 10.0).unwrap();
        assert_eq!(series.len(), units * 10);
    }

    #[test]
    fn register_tracks_sounding_pitches() {
        let notes = [[0.0, 1.0, 48.0], [0.5, 0.5, 72.0], [0.0, 1.0, 200.0]];
        let register = analyze_density_with_register(&notes, 25.0).unwrap();
        assert_eq!(register.density, vec![2, 2, 3, 3]);
        assert_eq!(register.register_low, vec![48, 48, 48, 48]);
        assert_eq!(register.register_high, vec![48, 48, 72, 72]);
        assert_eq!(register.register_mean, vec![48.0, 48.0, 60.0, 60.0]);
    }

    #[test]
    fn score_notes_feed_the_engine() {
        let score = ScoreModel::from_notes(vec![
            score_model::NoteEvent::new(0.5, 0.5, 64, 0.8, "A"),
            score_model::NoteEvent::new(0.0, 1.0, 60, 0.8, "B"),
        ]);
        assert_eq!(note_records(&score), vec![[0.0, 1.0, 60.0], [0.5, 0.5, 64.0]]);

        let series = analyze_score_density(&score, 50.0).unwrap();
        assert_eq!(series.density, vec![1, 2]);
        let register = analyze_score_density_with_register(&score, 50.0).unwrap();
        assert_eq!(register.register_high, vec![60, 64]);
    }

    #[test]
    fn summary_finds_peaks() {
        let series = DensitySeries {
            time: vec![0.0, 1.0, 2.0, 3.0],
            density: vec![1, 5, 4, 2],
        };
        let summary = summarize(&series);
        assert_eq!(summary.max, 5);
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.peaks, vec![1.0]);
        assert_eq!(summarize(&DensitySeries::default()), DensitySummary::default());
    }
}
