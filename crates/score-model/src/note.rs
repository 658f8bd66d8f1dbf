use serde::{Deserialize, Serialize};

use crate::dynamic::DynamicLabel;
use crate::pitch::pitch_name;

/// Velocity assumed when a score does not specify one.
pub const DEFAULT_VELOCITY: f64 = 0.8;

/// A single sounding note, timed in quarter-note beats from the start of the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub start_time: f64,
    pub duration: f64,
    /// MIDI pitch, 0–127
    pub pitch: u8,
    pub pitch_name: String,
    /// Normalized 0.0–1.0
    pub velocity: f64,
    pub part: String,
    pub measure: u32,
    pub beat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<u32>,
    /// Dynamic in effect for the part when the note starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicLabel>,
}

impl NoteEvent {
    pub fn new(start_time: f64, duration: f64, pitch: u8, velocity: f64, part: impl Into<String>) -> Self {
        Self {
            start_time,
            duration,
            pitch,
            pitch_name: pitch_name(pitch),
            velocity,
            part: part.into(),
            measure: 0,
            beat: 1.0,
            voice: None,
            dynamic: None,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// True when the note is sounding anywhere in `[start, end)`.
    pub fn sounds_within(&self, start: f64, end: f64) -> bool {
        (start <= self.start_time && self.start_time < end)
            || (self.start_time <= start && start < self.end_time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_time_is_derived() {
        let note = NoteEvent::new(1.5, 0.5, 61, 0.8, "Flute");
        assert_eq!(note.end_time(), 2.0);
        assert_eq!(note.pitch_name, "C#4");
    }

    #[test]
    fn sounding_window_includes_held_notes() {
        let note = NoteEvent::new(1.0, 2.0, 60, 0.8, "P");
        assert!(note.sounds_within(0.0, 1.5));
        assert!(note.sounds_within(2.0, 4.0));
        assert!(!note.sounds_within(3.0, 4.0));
        assert!(!note.sounds_within(0.0, 1.0));
    }
}
