//! Partwise MusicXML reader.
//!
//! Walks the document with a streaming quick-xml reader, keeping one time
//! cursor per part. Times are converted from divisions to quarter-note
//! beats. Dynamic symbols, text directions and hairpins are collected as
//! raw [`DynamicMarking`]s for the dynamics engine.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::adapter::assemble;
use crate::dynamic::{DynamicMarking, MarkingContent, WedgeKind};
use crate::note::{NoteEvent, DEFAULT_VELOCITY};
use crate::pitch::{midi_from_pitch, spelled_name};
use crate::score::{ScoreMetadata, ScoreModel};
use crate::{Error, Result};

const MAJOR_KEYS: [&str; 15] = [
    "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
];
const MINOR_KEYS: [&str; 15] = [
    "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#", "G#", "D#", "A#",
];

/// Key name for a signature given in fifths, e.g. `(-1, "major") -> "F major"`.
pub fn key_name(fifths: i32, mode: &str) -> Option<String> {
    let index = usize::try_from(fifths + 7).ok()?;
    let minor = mode.eq_ignore_ascii_case("minor");
    let tonic = if minor { MINOR_KEYS.get(index)? } else { MAJOR_KEYS.get(index)? };
    Some(format!("{} {}", tonic, if minor { "minor" } else { "major" }))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    PartName,
    Divisions,
    Duration,
    Step,
    Alter,
    Octave,
    Voice,
    Fifths,
    Mode,
    Beats,
    BeatType,
    PerMinute,
    Title,
    Composer,
    Words,
    OtherDynamics,
    Offset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Backup,
    Forward,
}

#[derive(Debug, Default)]
struct PendingNote {
    rest: bool,
    chord: bool,
    grace: bool,
    unpitched: bool,
    duration: Option<f64>,
    step: Option<char>,
    alter: i32,
    octave: Option<i32>,
    voice: Option<u32>,
    velocity: Option<f64>,
}

#[derive(Debug)]
struct Cursor {
    position: f64,
    last_note_start: f64,
    divisions: f64,
    measure: u32,
    measure_start: f64,
    beat_type: u32,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            position: 0.0,
            last_note_start: 0.0,
            divisions: 1.0,
            measure: 0,
            measure_start: 0.0,
            beat_type: 4,
        }
    }
}

impl Cursor {
    fn to_beats(&self, divisions: f64) -> f64 {
        divisions / self.divisions
    }

    /// One-based beat position of `time` within the current measure.
    fn beat_of(&self, time: f64) -> f64 {
        1.0 + (time - self.measure_start) * self.beat_type as f64 / 4.0
    }
}

#[derive(Debug, Default)]
struct MusicXmlReader {
    field: Option<Field>,
    saw_root: bool,

    part_names: HashMap<String, String>,
    part_order: Vec<String>,
    score_part_id: Option<String>,
    part: String,
    part_index: usize,
    cursor: Cursor,

    in_note: bool,
    note: PendingNote,
    motion: Option<Motion>,
    motion_duration: f64,

    in_direction: bool,
    in_dynamics: bool,
    direction_offset: f64,
    pending_marks: Vec<MarkingContent>,

    in_time: bool,
    time_beats: Option<String>,
    in_key: bool,
    key_fifths: Option<i32>,
    key_mode: Option<String>,

    title: Option<String>,
    composer: Option<String>,
    time_signature: Option<String>,
    key_signature: Option<String>,
    tempo: Option<f64>,

    notes: Vec<NoteEvent>,
    markings: Vec<DynamicMarking>,
}

pub fn parse_musicxml(xml: &str) -> Result<ScoreModel> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut state = MusicXmlReader::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => state.open(e)?,
            Ok(Event::Empty(ref e)) => {
                state.open(e)?;
                state.close(e.name().as_ref())?;
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| Error::ScoreParse(format!("bad text content: {e}")))?;
                state.text(&text);
            }
            Ok(Event::End(ref e)) => state.close(e.name().as_ref())?,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::ScoreParse(format!(
                    "XML parse error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    state.finish()
}

fn attribute(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| std::str::from_utf8(&a.value).ok().map(str::to_string))
}

impl MusicXmlReader {
    fn open(&mut self, e: &BytesStart) -> Result<()> {
        let name = e.name();
        match name.as_ref() {
            b"score-partwise" => self.saw_root = true,
            b"score-timewise" => {
                return Err(Error::ScoreParse(
                    "timewise MusicXML is not supported".into(),
                ))
            }
            b"score-part" => {
                let id = attribute(e, b"id").unwrap_or_default();
                self.part_order.push(id.clone());
                self.score_part_id = Some(id);
            }
            b"part-name" if self.score_part_id.is_some() => self.field = Some(Field::PartName),
            b"part" => {
                let id = attribute(e, b"id").unwrap_or_default();
                self.part = self
                    .part_names
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("Part {}", self.part_index + 1));
                self.part_index += 1;
                self.cursor = Cursor::default();
            }
            b"measure" => {
                self.cursor.measure = attribute(e, b"number")
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(self.cursor.measure + 1);
                self.cursor.measure_start = self.cursor.position;
            }
            b"note" => {
                self.in_note = true;
                self.note = PendingNote {
                    velocity: attribute(e, b"dynamics")
                        .and_then(|d| d.parse::<f64>().ok())
                        .map(|pct| (pct * 0.9 / 127.0).clamp(0.0, 1.0)),
                    ..PendingNote::default()
                };
            }
            b"rest" if self.in_note => self.note.rest = true,
            b"chord" if self.in_note => self.note.chord = true,
            b"grace" if self.in_note => self.note.grace = true,
            b"unpitched" if self.in_note => self.note.unpitched = true,
            b"backup" => self.begin_motion(Motion::Backup),
            b"forward" => self.begin_motion(Motion::Forward),
            b"direction" => {
                self.in_direction = true;
                self.direction_offset = 0.0;
                self.pending_marks.clear();
            }
            b"dynamics" if self.in_direction => self.in_dynamics = true,
            b"other-dynamics" if self.in_dynamics => self.field = Some(Field::OtherDynamics),
            tag if self.in_dynamics => self.pending_marks.push(MarkingContent::Symbol {
                value: String::from_utf8_lossy(tag).into_owned(),
            }),
            b"words" if self.in_direction => self.field = Some(Field::Words),
            b"wedge" if self.in_direction => {
                let wedge = match attribute(e, b"type").as_deref() {
                    Some("crescendo") => Some(WedgeKind::Crescendo),
                    Some("diminuendo") => Some(WedgeKind::Diminuendo),
                    Some("stop") => Some(WedgeKind::Stop),
                    _ => None,
                };
                if let Some(wedge) = wedge {
                    self.pending_marks.push(MarkingContent::Wedge { wedge });
                }
            }
            b"offset" if self.in_direction => self.field = Some(Field::Offset),
            b"sound" => {
                if let Some(tempo) = attribute(e, b"tempo").and_then(|t| t.parse::<f64>().ok()) {
                    self.tempo.get_or_insert(tempo);
                }
            }
            b"time" => {
                self.in_time = true;
                self.time_beats = None;
            }
            b"key" => {
                self.in_key = true;
                self.key_fifths = None;
                self.key_mode = None;
            }
            b"creator" => {
                if attribute(e, b"type").as_deref() == Some("composer") {
                    self.field = Some(Field::Composer);
                }
            }
            b"divisions" => self.field = Some(Field::Divisions),
            b"duration" => self.field = Some(Field::Duration),
            b"step" => self.field = Some(Field::Step),
            b"alter" => self.field = Some(Field::Alter),
            b"octave" => self.field = Some(Field::Octave),
            b"voice" if self.in_note => self.field = Some(Field::Voice),
            b"fifths" if self.in_key => self.field = Some(Field::Fifths),
            b"mode" if self.in_key => self.field = Some(Field::Mode),
            b"beats" if self.in_time => self.field = Some(Field::Beats),
            b"beat-type" if self.in_time => self.field = Some(Field::BeatType),
            b"per-minute" => self.field = Some(Field::PerMinute),
            b"work-title" | b"movement-title" => self.field = Some(Field::Title),
            _ => {}
        }
        Ok(())
    }

    fn begin_motion(&mut self, motion: Motion) {
        self.motion = Some(motion);
        self.motion_duration = 0.0;
    }

    fn text(&mut self, text: &str) {
        let Some(field) = self.field.take() else {
            return;
        };
        match field {
            Field::PartName => {
                if let Some(id) = &self.score_part_id {
                    self.part_names.insert(id.clone(), text.to_string());
                }
            }
            Field::Divisions => {
                if let Ok(v) = text.parse::<f64>() {
                    if v > 0.0 {
                        self.cursor.divisions = v;
                    }
                }
            }
            Field::Duration => {
                if let Ok(v) = text.parse::<f64>() {
                    if self.in_note {
                        self.note.duration = Some(v);
                    } else if self.motion.is_some() {
                        self.motion_duration = v;
                    }
                }
            }
            Field::Step => self.note.step = text.chars().next(),
            Field::Alter => {
                // Microtonal alterations round to the nearest semitone.
                if let Ok(v) = text.parse::<f64>() {
                    self.note.alter = v.round() as i32;
                }
            }
            Field::Octave => self.note.octave = text.parse().ok(),
            Field::Voice => self.note.voice = text.parse().ok(),
            Field::Fifths => self.key_fifths = text.parse().ok(),
            Field::Mode => self.key_mode = Some(text.to_string()),
            Field::Beats => self.time_beats = Some(text.to_string()),
            Field::BeatType => {
                if let Ok(v) = text.parse::<u32>() {
                    if v > 0 {
                        self.cursor.beat_type = v;
                    }
                }
                if self.time_signature.is_none() {
                    if let Some(beats) = &self.time_beats {
                        self.time_signature = Some(format!("{beats}/{text}"));
                    }
                }
            }
            Field::PerMinute => {
                if let Ok(v) = text.parse::<f64>() {
                    self.tempo.get_or_insert(v);
                }
            }
            Field::Title => {
                self.title.get_or_insert_with(|| text.to_string());
            }
            Field::Composer => {
                self.composer.get_or_insert_with(|| text.to_string());
            }
            Field::Words => self.pending_marks.push(MarkingContent::Text {
                text: text.to_string(),
            }),
            Field::OtherDynamics => self.pending_marks.push(MarkingContent::Symbol {
                value: text.to_string(),
            }),
            Field::Offset => {
                if let Ok(v) = text.parse::<f64>() {
                    self.direction_offset = v;
                }
            }
        }
    }

    fn close(&mut self, name: &[u8]) -> Result<()> {
        match name {
            b"score-part" => self.score_part_id = None,
            b"note" if self.in_note => {
                self.in_note = false;
                self.finish_note();
            }
            b"backup" | b"forward" => {
                let delta = self.cursor.to_beats(self.motion_duration);
                match self.motion.take() {
                    Some(Motion::Backup) => {
                        self.cursor.position = (self.cursor.position - delta).max(0.0)
                    }
                    Some(Motion::Forward) => self.cursor.position += delta,
                    None => {}
                }
            }
            b"dynamics" => self.in_dynamics = false,
            b"direction" => {
                self.in_direction = false;
                let time = self.cursor.position + self.cursor.to_beats(self.direction_offset);
                for content in self.pending_marks.drain(..) {
                    self.markings.push(DynamicMarking {
                        time,
                        part: self.part.clone(),
                        measure: self.cursor.measure,
                        content,
                    });
                }
            }
            b"time" => self.in_time = false,
            b"key" => {
                self.in_key = false;
                if self.key_signature.is_none() {
                    if let Some(fifths) = self.key_fifths {
                        let mode = self.key_mode.as_deref().unwrap_or("major");
                        self.key_signature = key_name(fifths, mode);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn finish_note(&mut self) {
        let note = std::mem::take(&mut self.note);
        if note.grace {
            return;
        }

        let duration = self.cursor.to_beats(note.duration.unwrap_or(0.0));
        let start = if note.chord {
            self.cursor.last_note_start
        } else {
            self.cursor.position
        };
        if !note.chord {
            self.cursor.last_note_start = start;
            self.cursor.position += duration;
        }

        if note.rest || note.unpitched {
            return;
        }
        let (Some(step), Some(octave)) = (note.step, note.octave) else {
            warn!(part = %self.part, measure = self.cursor.measure, "note without pitch, skipping");
            return;
        };
        let Some(pitch) = u8::try_from(midi_from_pitch(step, note.alter, octave))
            .ok()
            .filter(|p| *p <= 127)
        else {
            warn!(part = %self.part, measure = self.cursor.measure, "pitch outside MIDI range, skipping");
            return;
        };

        self.notes.push(NoteEvent {
            start_time: start,
            duration,
            pitch,
            pitch_name: spelled_name(step, note.alter, octave),
            velocity: note.velocity.unwrap_or(DEFAULT_VELOCITY),
            part: self.part.clone(),
            measure: self.cursor.measure,
            beat: self.cursor.beat_of(start),
            voice: note.voice,
            dynamic: None,
        });
    }

    fn finish(self) -> Result<ScoreModel> {
        if !self.saw_root {
            return Err(Error::ScoreParse(
                "document is not a partwise MusicXML score".into(),
            ));
        }

        let parts = self
            .part_order
            .iter()
            .enumerate()
            .map(|(i, id)| {
                self.part_names
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| format!("Part {}", i + 1))
            })
            .collect();

        let defaults = ScoreMetadata::default();
        let metadata = ScoreMetadata {
            title: self.title.unwrap_or_default(),
            composer: self.composer.unwrap_or_default(),
            time_signature: self.time_signature.unwrap_or(defaults.time_signature),
            key_signature: self.key_signature.unwrap_or(defaults.key_signature),
            tempo: self.tempo.unwrap_or(defaults.tempo),
            parts,
        };

        debug!(
            notes = self.notes.len(),
            markings = self.markings.len(),
            "parsed MusicXML score"
        );
        Ok(assemble(metadata, self.notes, self.markings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::DynamicLabel;
    use pretty_assertions::assert_eq;

    const DUET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <work><work-title>Little Duet</work-title></work>
  <identification><creator type="composer">A. Composer</creator></identification>
  <part-list>
    <score-part id="P1"><part-name>Flute</part-name></score-part>
    <score-part id="P2"><part-name>Cello</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes>
        <divisions>2</divisions>
        <key><fifths>-1</fifths><mode>major</mode></key>
        <time><beats>3</beats><beat-type>4</beat-type></time>
      </attributes>
      <direction placement="below">
        <direction-type><dynamics><p/></dynamics></direction-type>
        <sound tempo="72"/>
      </direction>
      <note>
        <pitch><step>B</step><alter>-1</alter><octave>4</octave></pitch>
        <duration>2</duration><voice>1</voice>
      </note>
      <note>
        <pitch><step>D</step><octave>5</octave></pitch>
        <duration>2</duration><voice>1</voice>
      </note>
      <note>
        <chord/>
        <pitch><step>F</step><octave>5</octave></pitch>
        <duration>2</duration><voice>1</voice>
      </note>
      <direction>
        <direction-type><wedge type="crescendo"/></direction-type>
      </direction>
      <note><rest/><duration>2</duration></note>
    </measure>
    <measure number="2">
      <direction>
        <direction-type><wedge type="stop"/></direction-type>
        <offset>1</offset>
      </direction>
      <direction>
        <direction-type><dynamics><ff/></dynamics></direction-type>
      </direction>
      <note dynamics="141.11">
        <pitch><step>C</step><octave>5</octave></pitch>
        <duration>6</duration>
      </note>
    </measure>
  </part>
  <part id="P2">
    <measure number="1">
      <attributes><divisions>1</divisions></attributes>
      <direction><direction-type><words>cresc.</words></direction-type></direction>
      <note>
        <grace/>
        <pitch><step>G</step><octave>2</octave></pitch>
      </note>
      <note>
        <pitch><step>C</step><octave>3</octave></pitch>
        <duration>3</duration>
      </note>
      <backup><duration>3</duration></backup>
      <forward><duration>1</duration></forward>
      <note>
        <pitch><step>G</step><octave>3</octave></pitch>
        <duration>2</duration>
      </note>
    </measure>
  </part>
</score-partwise>"#;

    #[test]
    fn reads_metadata() {
        let score = parse_musicxml(DUET).unwrap();
        let meta = score.metadata();
        assert_eq!(meta.title, "Little Duet");
        assert_eq!(meta.composer, "A. Composer");
        assert_eq!(meta.time_signature, "3/4");
        assert_eq!(meta.key_signature, "F major");
        assert_eq!(meta.tempo, 72.0);
        assert_eq!(meta.parts, vec!["Flute".to_string(), "Cello".to_string()]);
    }

    #[test]
    fn places_notes_in_beats() {
        let score = parse_musicxml(DUET).unwrap();
        let flute: Vec<_> = score
            .notes_by_part("Flute")
            .iter()
            .map(|n| (n.start_time, n.pitch, n.duration))
            .collect();
        assert_eq!(
            flute,
            vec![(0.0, 70, 1.0), (1.0, 74, 1.0), (1.0, 77, 1.0), (3.0, 72, 3.0)]
        );

        let cello: Vec<_> = score
            .notes_by_part("Cello")
            .iter()
            .map(|n| (n.start_time, n.pitch))
            .collect();
        assert_eq!(cello, vec![(0.0, 48), (1.0, 55)]);

        let first = &score.notes_by_part("Flute")[0];
        assert_eq!(first.pitch_name, "Bb4");
        assert_eq!(first.voice, Some(1));
        assert_eq!(first.measure, 1);
        assert_eq!(first.beat, 1.0);
    }

    #[test]
    fn collects_dynamic_directions() {
        let score = parse_musicxml(DUET).unwrap();
        let kinds: Vec<_> = score
            .markings()
            .iter()
            .map(|m| (m.time, m.part.as_str(), m.content.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (0.0, "Flute", MarkingContent::Symbol { value: "p".into() }),
                (0.0, "Cello", MarkingContent::Text { text: "cresc.".into() }),
                (2.0, "Flute", MarkingContent::Wedge { wedge: WedgeKind::Crescendo }),
                (3.0, "Flute", MarkingContent::Symbol { value: "ff".into() }),
                (3.5, "Flute", MarkingContent::Wedge { wedge: WedgeKind::Stop }),
            ]
        );
        assert_eq!(score.dynamics().len(), 2);
    }

    #[test]
    fn notes_inherit_dynamics_and_velocity() {
        let score = parse_musicxml(DUET).unwrap();
        let flute = score.notes_by_part("Flute");
        assert_eq!(flute[0].dynamic, Some(DynamicLabel::P));
        assert_eq!(flute[0].velocity, DEFAULT_VELOCITY);
        assert_eq!(flute[3].dynamic, Some(DynamicLabel::Ff));
        assert!((flute[3].velocity - 1.0).abs() < 1e-3);
        assert_eq!(score.notes_by_part("Cello")[0].dynamic, None);
    }

    #[test]
    fn rejects_non_musicxml() {
        assert!(matches!(
            parse_musicxml("<html><body/></html>"),
            Err(Error::ScoreParse(_))
        ));
        assert!(matches!(
            parse_musicxml("<score-partwise><part></score-partwise>"),
            Err(Error::ScoreParse(_))
        ));
    }

    #[test]
    fn key_names() {
        assert_eq!(key_name(0, "major").as_deref(), Some("C major"));
        assert_eq!(key_name(0, "minor").as_deref(), Some("A minor"));
        assert_eq!(key_name(3, "major").as_deref(), Some("A major"));
        assert_eq!(key_name(9, "major"), None);
    }
}
