//! Boundary adapters: turn external score shapes into a [`ScoreModel`].
//!
//! The JSON adapter accepts two shapes:
//!
//! - note-list: `{"notes": [...], "markings": [...], "title": ...}` or a bare array of notes
//! - parts: `{"parts": [{"name": "Flute", "notes": [...], "markings": [...]}], ...}`
//!
//! Anything else is a validation error. Individual notes or markings that
//! lack required attributes are skipped with a warning.
//!
//! Note `velocity` is normalized 0.0–1.0, except that values above 1.0 are
//! read as MIDI velocities; `midi_velocity` is always read as 0–127.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::dynamic::{DynamicEvent, DynamicLabel, DynamicMarking, MarkingContent, WedgeKind};
use crate::note::{NoteEvent, DEFAULT_VELOCITY};
use crate::pitch::{parse_pitch_name, pitch_name};
use crate::score::{ScoreMetadata, ScoreModel};
use crate::{Error, Result};

const METADATA_KEYS: [&str; 5] = ["title", "composer", "time_signature", "key_signature", "tempo"];

/// Load a score file, choosing the adapter by extension.
pub fn load_path(path: &Path) -> Result<ScoreModel> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    debug!(path = %path.display(), "loading score");

    match extension.as_deref() {
        Some("json") => from_json_str(&std::fs::read_to_string(path).map_err(io_err)?),
        Some("xml" | "musicxml") => {
            crate::musicxml::parse_musicxml(&std::fs::read_to_string(path).map_err(io_err)?)
        }
        Some("mid" | "midi") => crate::midi::parse_midi(&std::fs::read(path).map_err(io_err)?),
        other => Err(Error::Validation(format!(
            "unsupported score format: {}",
            other.unwrap_or("<no extension>")
        ))),
    }
}

pub fn from_json_str(json: &str) -> Result<ScoreModel> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| Error::ScoreParse(format!("invalid JSON: {e}")))?;
    from_json_value(&value)
}

pub fn from_json_value(value: &Value) -> Result<ScoreModel> {
    if let Some(notes) = value.as_array() {
        let notes = collect_notes(notes, None);
        return Ok(assemble(ScoreMetadata::default(), notes, Vec::new()));
    }

    let object = value.as_object().ok_or_else(|| {
        Error::Validation("unrecognized score shape: expected a JSON object or array".into())
    })?;
    let metadata = read_metadata(object)?;

    if let Some(notes) = object.get("notes").and_then(Value::as_array) {
        let notes = collect_notes(notes, None);
        let markings = object
            .get("markings")
            .or_else(|| object.get("dynamics"))
            .and_then(Value::as_array)
            .map(|m| collect_markings(m, None))
            .unwrap_or_default();
        return Ok(assemble(metadata, notes, markings));
    }

    if let Some(parts) = object.get("parts").and_then(Value::as_array) {
        let mut metadata = metadata;
        let mut notes = Vec::new();
        let mut markings = Vec::new();

        for (index, part) in parts.iter().enumerate() {
            let Some(part) = part.as_object() else {
                warn!(index, "skipping part that is not an object");
                continue;
            };
            let name = part
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Part {}", index + 1));

            if let Some(part_notes) = part.get("notes").and_then(Value::as_array) {
                notes.extend(collect_notes(part_notes, Some(&name)));
            }
            if let Some(part_markings) = part
                .get("markings")
                .or_else(|| part.get("dynamics"))
                .and_then(Value::as_array)
            {
                markings.extend(collect_markings(part_markings, Some(&name)));
            }
            metadata.parts.push(name);
        }

        return Ok(assemble(metadata, notes, markings));
    }

    Err(Error::Validation(
        "unrecognized score shape: expected a `notes` or `parts` array".into(),
    ))
}

fn read_metadata(object: &Map<String, Value>) -> Result<ScoreMetadata> {
    let source = match object.get("metadata") {
        Some(Value::Object(meta)) => meta.clone(),
        _ => object
            .iter()
            .filter(|(key, _)| METADATA_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    };

    serde_json::from_value(Value::Object(source))
        .map_err(|e| Error::Validation(format!("invalid score metadata: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPitch {
    Midi(i64),
    Name(String),
}

#[derive(Debug, Deserialize)]
struct RawNote {
    #[serde(alias = "start", alias = "offset")]
    start_time: Option<f64>,
    duration: Option<f64>,
    pitch: Option<RawPitch>,
    pitch_name: Option<String>,
    velocity: Option<f64>,
    midi_velocity: Option<f64>,
    part: Option<String>,
    measure: Option<u32>,
    beat: Option<f64>,
    voice: Option<u32>,
    dynamic: Option<String>,
}

fn collect_notes(values: &[Value], part: Option<&str>) -> Vec<NoteEvent> {
    values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| match note_from_value(value, part) {
            Ok(note) => Some(note),
            Err(reason) => {
                warn!(index, part, %reason, "skipping note");
                None
            }
        })
        .collect()
}

fn note_from_value(value: &Value, part: Option<&str>) -> std::result::Result<NoteEvent, String> {
    let raw: RawNote = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;

    let start_time = raw.start_time.ok_or("missing start_time")?;
    let duration = raw.duration.ok_or("missing duration")?;
    let pitch = match raw.pitch.ok_or("missing pitch")? {
        RawPitch::Midi(m) => u8::try_from(m)
            .ok()
            .filter(|m| *m <= 127)
            .ok_or_else(|| format!("pitch {m} outside 0..=127"))?,
        RawPitch::Name(name) => {
            parse_pitch_name(&name).ok_or_else(|| format!("unreadable pitch {name:?}"))?
        }
    };

    // `velocity` is normalized unless it exceeds 1.0, so MIDI velocities 0
    // and 1 are only unambiguous under `midi_velocity`.
    let velocity = match (raw.midi_velocity, raw.velocity) {
        (Some(v), _) => (v / 127.0).clamp(0.0, 1.0),
        (None, Some(v)) if v > 1.0 => (v / 127.0).min(1.0),
        (None, Some(v)) => v.max(0.0),
        (None, None) => DEFAULT_VELOCITY,
    };

    let part = raw
        .part
        .or_else(|| part.map(str::to_string))
        .unwrap_or_else(|| "Part 1".to_string());

    Ok(NoteEvent {
        start_time,
        duration,
        pitch,
        pitch_name: raw.pitch_name.unwrap_or_else(|| pitch_name(pitch)),
        velocity,
        part,
        measure: raw.measure.unwrap_or(0),
        beat: raw.beat.unwrap_or(1.0),
        voice: raw.voice,
        dynamic: raw.dynamic.and_then(|d| d.parse().ok()),
    })
}

#[derive(Debug, Deserialize)]
struct RawMarking {
    #[serde(alias = "offset")]
    time: Option<f64>,
    part: Option<String>,
    measure: Option<u32>,
    #[serde(alias = "label", alias = "symbol")]
    value: Option<String>,
    text: Option<String>,
    wedge: Option<WedgeKind>,
}

fn collect_markings(values: &[Value], part: Option<&str>) -> Vec<DynamicMarking> {
    values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| match marking_from_value(value, part) {
            Ok(marking) => Some(marking),
            Err(reason) => {
                warn!(index, part, %reason, "skipping marking");
                None
            }
        })
        .collect()
}

fn marking_from_value(
    value: &Value,
    part: Option<&str>,
) -> std::result::Result<DynamicMarking, String> {
    let raw: RawMarking = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    let time = raw.time.ok_or("missing time")?;

    let content = match (raw.value, raw.text, raw.wedge) {
        (Some(value), _, _) => MarkingContent::Symbol { value },
        (None, Some(text), _) => MarkingContent::Text { text },
        (None, None, Some(wedge)) => MarkingContent::Wedge { wedge },
        (None, None, None) => return Err("marking has no value, text or wedge".into()),
    };

    Ok(DynamicMarking {
        time,
        part: raw
            .part
            .or_else(|| part.map(str::to_string))
            .unwrap_or_else(|| "Part 1".to_string()),
        measure: raw.measure.unwrap_or(0),
        content,
    })
}

/// Build the model shared by every adapter.
///
/// Engraved symbols with a known label become instant dynamic events at
/// their table level, and each note without an explicit dynamic inherits
/// the latest one of its part.
pub(crate) fn assemble(
    mut metadata: ScoreMetadata,
    mut notes: Vec<NoteEvent>,
    markings: Vec<DynamicMarking>,
) -> ScoreModel {
    let mut dynamics: Vec<DynamicEvent> = markings
        .iter()
        .filter_map(|m| match &m.content {
            MarkingContent::Symbol { value } => DynamicLabel::from_marking(value)
                .map(|label| DynamicEvent::instant(m.time, label, m.part.clone(), m.measure)),
            _ => None,
        })
        .collect();
    dynamics.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut by_part: HashMap<&str, Vec<&DynamicEvent>> = HashMap::new();
    for event in &dynamics {
        by_part.entry(event.part.as_str()).or_default().push(event);
    }
    for note in notes.iter_mut().filter(|n| n.dynamic.is_none()) {
        note.dynamic = by_part.get(note.part.as_str()).and_then(|events| {
            events
                .iter()
                .rev()
                .find(|e| e.time <= note.start_time)
                .map(|e| e.label)
        });
    }

    let seen = notes
        .iter()
        .map(|n| &n.part)
        .chain(markings.iter().map(|m| &m.part));
    for part in seen {
        if !metadata.parts.contains(part) {
            metadata.parts.push(part.clone());
        }
    }

    ScoreModel::new(metadata, notes, dynamics, markings)
}
