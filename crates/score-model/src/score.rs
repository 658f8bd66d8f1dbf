use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::dynamic::{DynamicEvent, DynamicMarking};
use crate::note::NoteEvent;

/// Pitch range reported for a score without notes (middle C to C5).
pub const EMPTY_PITCH_RANGE: (u8, u8) = (60, 72);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreMetadata {
    pub title: String,
    pub composer: String,
    /// "numerator/denominator"
    pub time_signature: String,
    pub key_signature: String,
    /// Quarter notes per minute
    pub tempo: f64,
    /// Part names in score order
    pub parts: Vec<String>,
}

impl Default for ScoreMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            composer: String::new(),
            time_signature: "4/4".into(),
            key_signature: "C".into(),
            tempo: 120.0,
            parts: Vec::new(),
        }
    }
}

/// The normalized score every engine consumes.
///
/// Notes are ordered by start time then pitch, dynamics and markings by
/// time. The ordering is established on construction (and on
/// deserialization) and the model offers no way to disturb it afterwards.
/// Range and part views are computed on first access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ScoreContents")]
pub struct ScoreModel {
    metadata: ScoreMetadata,
    notes: Vec<NoteEvent>,
    dynamics: Vec<DynamicEvent>,
    markings: Vec<DynamicMarking>,
    #[serde(skip)]
    time_range: OnceLock<(f64, f64)>,
    #[serde(skip)]
    pitch_range: OnceLock<(u8, u8)>,
    #[serde(skip)]
    parts: OnceLock<BTreeSet<String>>,
}

#[derive(Deserialize)]
struct ScoreContents {
    #[serde(default)]
    metadata: ScoreMetadata,
    #[serde(default)]
    notes: Vec<NoteEvent>,
    #[serde(default)]
    dynamics: Vec<DynamicEvent>,
    #[serde(default)]
    markings: Vec<DynamicMarking>,
}

impl From<ScoreContents> for ScoreModel {
    fn from(contents: ScoreContents) -> Self {
        ScoreModel::new(
            contents.metadata,
            contents.notes,
            contents.dynamics,
            contents.markings,
        )
    }
}

impl ScoreModel {
    pub fn new(
        metadata: ScoreMetadata,
        mut notes: Vec<NoteEvent>,
        mut dynamics: Vec<DynamicEvent>,
        mut markings: Vec<DynamicMarking>,
    ) -> Self {
        notes.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then(a.pitch.cmp(&b.pitch))
        });
        dynamics.sort_by(|a, b| a.time.total_cmp(&b.time));
        markings.sort_by(|a, b| a.time.total_cmp(&b.time));

        Self {
            metadata,
            notes,
            dynamics,
            markings,
            time_range: OnceLock::new(),
            pitch_range: OnceLock::new(),
            parts: OnceLock::new(),
        }
    }

    /// A model holding only notes, with default metadata.
    pub fn from_notes(notes: Vec<NoteEvent>) -> Self {
        Self::new(ScoreMetadata::default(), notes, Vec::new(), Vec::new())
    }

    pub fn metadata(&self) -> &ScoreMetadata {
        &self.metadata
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn dynamics(&self) -> &[DynamicEvent] {
        &self.dynamics
    }

    pub fn markings(&self) -> &[DynamicMarking] {
        &self.markings
    }

    /// Earliest start and latest end over all notes, `(0, 0)` when empty.
    pub fn time_range(&self) -> (f64, f64) {
        *self.time_range.get_or_init(|| {
            if self.notes.is_empty() {
                return (0.0, 0.0);
            }
            let min = self
                .notes
                .iter()
                .map(|n| n.start_time)
                .fold(f64::INFINITY, f64::min);
            let max = self
                .notes
                .iter()
                .map(|n| n.end_time())
                .fold(f64::NEG_INFINITY, f64::max);
            (min, max)
        })
    }

    /// Lowest and highest MIDI pitch; [`EMPTY_PITCH_RANGE`] when empty.
    pub fn pitch_range(&self) -> (u8, u8) {
        *self.pitch_range.get_or_init(|| {
            let min = self.notes.iter().map(|n| n.pitch).min();
            let max = self.notes.iter().map(|n| n.pitch).max();
            match (min, max) {
                (Some(min), Some(max)) => (min, max),
                _ => EMPTY_PITCH_RANGE,
            }
        })
    }

    /// Names of all parts that carry notes.
    pub fn parts(&self) -> &BTreeSet<String> {
        self.parts
            .get_or_init(|| self.notes.iter().map(|n| n.part.clone()).collect())
    }

    /// Notes starting in `[start, end)` or already sounding at `start`.
    pub fn notes_in_time_range(&self, start: f64, end: f64) -> Vec<&NoteEvent> {
        self.notes
            .iter()
            .filter(|n| n.sounds_within(start, end))
            .collect()
    }

    pub fn dynamics_in_time_range(&self, start: f64, end: f64) -> Vec<&DynamicEvent> {
        self.dynamics
            .iter()
            .filter(|d| start <= d.time && d.time < end)
            .collect()
    }

    pub fn notes_by_part(&self, part: &str) -> Vec<&NoteEvent> {
        self.notes.iter().filter(|n| n.part == part).collect()
    }

    /// Most recent dynamic of `part` at or before `time`.
    pub fn active_dynamic(&self, time: f64, part: &str) -> Option<&DynamicEvent> {
        self.dynamics
            .iter()
            .rev()
            .find(|d| d.part == part && d.time <= time)
    }

    /// Compact description: metadata, counts and the outermost notes.
    pub fn summary(&self) -> ScoreSummary {
        let sample_notes = if self.notes.len() >= 4 {
            let tail = &self.notes[self.notes.len() - 2..];
            self.notes[..2].iter().chain(tail).cloned().collect()
        } else {
            self.notes.clone()
        };

        ScoreSummary {
            title: self.metadata.title.clone(),
            composer: self.metadata.composer.clone(),
            time_signature: self.metadata.time_signature.clone(),
            note_count: self.notes.len(),
            dynamic_count: self.dynamics.len(),
            marking_count: self.markings.len(),
            sample_notes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub title: String,
    pub composer: String,
    pub time_signature: String,
    pub note_count: usize,
    pub dynamic_count: usize,
    pub marking_count: usize,
    /// First two and last two notes (all notes when fewer than four)
    pub sample_notes: Vec<NoteEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::DynamicLabel;
    use pretty_assertions::assert_eq;

    fn note(start: f64, duration: f64, pitch: u8, part: &str) -> NoteEvent {
        NoteEvent::new(start, duration, pitch, 0.8, part)
    }

    #[test]
    fn construction_sorts_notes_by_time_then_pitch() {
        let score = ScoreModel::from_notes(vec![
            note(1.0, 1.0, 64, "A"),
            note(0.0, 1.0, 67, "A"),
            note(0.0, 1.0, 60, "B"),
        ]);

        let order: Vec<_> = score.notes().iter().map(|n| (n.start_time, n.pitch)).collect();
        assert_eq!(order, vec![(0.0, 60), (0.0, 67), (1.0, 64)]);
    }

    #[test]
    fn deserialization_restores_ordering() {
        let json = r#"{
            "notes": [
                {"start_time": 2.0, "duration": 1.0, "pitch": 60, "pitch_name": "C4",
                 "velocity": 0.8, "part": "P", "measure": 1, "beat": 1.0},
                {"start_time": 0.0, "duration": 1.0, "pitch": 62, "pitch_name": "D4",
                 "velocity": 0.8, "part": "P", "measure": 1, "beat": 1.0}
            ],
            "dynamics": [
                {"time": 3.0, "label": "f", "intensity": 80.0, "kind": "instant", "part": "P", "measure": 1},
                {"time": 1.0, "label": "p", "intensity": 50.0, "kind": "instant", "part": "P", "measure": 1}
            ]
        }"#;
        let score: ScoreModel = serde_json::from_str(json).unwrap();
        assert_eq!(score.notes()[0].pitch, 62);
        assert_eq!(score.dynamics()[0].label, DynamicLabel::P);
        assert_eq!(score.metadata().time_signature, "4/4");
    }

    #[test]
    fn empty_model_views_use_defaults() {
        let score = ScoreModel::from_notes(vec![]);
        assert_eq!(score.time_range(), (0.0, 0.0));
        assert_eq!(score.pitch_range(), EMPTY_PITCH_RANGE);
        assert!(score.parts().is_empty());
    }

    #[test]
    fn range_views_cover_all_notes() {
        let score = ScoreModel::from_notes(vec![
            note(0.5, 2.0, 55, "Viola"),
            note(1.0, 4.0, 72, "Violin"),
        ]);
        assert_eq!(score.time_range(), (0.5, 5.0));
        assert_eq!(score.pitch_range(), (55, 72));
        let parts: Vec<_> = score.parts().iter().cloned().collect();
        assert_eq!(parts, vec!["Viola".to_string(), "Violin".to_string()]);
        // second access is served from the cached value
        assert_eq!(score.time_range(), (0.5, 5.0));
    }

    #[test]
    fn active_dynamic_picks_latest_for_part() {
        let score = ScoreModel::new(
            ScoreMetadata::default(),
            vec![],
            vec![
                DynamicEvent::instant(0.0, DynamicLabel::P, "A", 1),
                DynamicEvent::instant(4.0, DynamicLabel::F, "A", 2),
                DynamicEvent::instant(2.0, DynamicLabel::Ff, "B", 1),
            ],
            vec![],
        );
        assert_eq!(score.active_dynamic(3.0, "A").unwrap().label, DynamicLabel::P);
        assert_eq!(score.active_dynamic(4.0, "A").unwrap().label, DynamicLabel::F);
        assert!(score.active_dynamic(1.0, "B").is_none());
        assert_eq!(score.dynamics_in_time_range(0.0, 4.0).len(), 2);
    }

    #[test]
    fn summary_samples_head_and_tail() {
        let notes: Vec<_> = (0..6).map(|i| note(i as f64, 1.0, 60 + i as u8, "P")).collect();
        let summary = ScoreModel::from_notes(notes).summary();
        assert_eq!(summary.note_count, 6);
        let pitches: Vec<_> = summary.sample_notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![60, 61, 64, 65]);
    }

    #[test]
    fn notes_in_time_range_includes_sustained() {
        let score = ScoreModel::from_notes(vec![note(0.0, 4.0, 60, "P"), note(5.0, 1.0, 62, "P")]);
        assert_eq!(score.notes_in_time_range(2.0, 3.0).len(), 1);
        assert_eq!(score.notes_in_time_range(4.0, 5.0).len(), 0);
        assert_eq!(score.notes_by_part("P").len(), 2);
    }
}
