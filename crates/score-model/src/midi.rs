//! Standard MIDI file reader.
//!
//! Note-on/note-off pairs are matched per (channel, pitch) with a stack so
//! overlapping repeats close in LIFO order. Ticks are converted to
//! quarter-note beats using the header resolution.

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::HashMap;
use tracing::debug;

use crate::adapter::assemble;
use crate::musicxml::key_name;
use crate::note::NoteEvent;
use crate::score::{ScoreMetadata, ScoreModel};
use crate::{Error, Result};

const TIMECODE_PPQ: u16 = 480;

struct RawNote {
    onset: u64,
    offset: u64,
    pitch: u8,
    velocity: u8,
    track: usize,
}

pub fn parse_midi(bytes: &[u8]) -> Result<ScoreModel> {
    let smf = Smf::parse(bytes).map_err(|e| Error::ScoreParse(format!("invalid MIDI: {e}")))?;

    let ppq = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int(),
        Timing::Timecode(_, _) => TIMECODE_PPQ,
    };

    let mut raw_notes = Vec::new();
    let mut track_names: Vec<Option<String>> = vec![None; smf.tracks.len()];
    let mut tempo: Option<(u64, f64)> = None;
    let mut time_signature: Option<(u64, u8, u8)> = None;
    let mut key_signature: Option<(u64, i8, bool)> = None;

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        let mut pending: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                    let name = String::from_utf8_lossy(name).trim().to_string();
                    if !name.is_empty() {
                        track_names[track_index] = Some(name);
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(usec)) => {
                    if tempo.map_or(true, |(at, _)| tick < at) {
                        tempo = Some((tick, 60_000_000.0 / usec.as_int() as f64));
                    }
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, denom_pow, _, _)) => {
                    let denominator = 1u8.checked_shl(denom_pow as u32).unwrap_or(0);
                    let valid = num > 0 && denominator > 0;
                    if valid && time_signature.map_or(true, |(at, _, _)| tick < at) {
                        time_signature = Some((tick, num, denominator));
                    }
                }
                TrackEventKind::Meta(MetaMessage::KeySignature(fifths, minor)) => {
                    if key_signature.map_or(true, |(at, _, _)| tick < at) {
                        key_signature = Some((tick, fifths, minor));
                    }
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            pending
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push((tick, vel.as_int()));
                        }
                        MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                            if let Some((onset, velocity)) = pending
                                .get_mut(&(ch, key.as_int()))
                                .and_then(|stack| stack.pop())
                            {
                                raw_notes.push(RawNote {
                                    onset,
                                    offset: tick,
                                    pitch: key.as_int(),
                                    velocity,
                                    track: track_index,
                                });
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        // Unclosed notes end with their track.
        for ((_, pitch), stack) in pending {
            for (onset, velocity) in stack {
                raw_notes.push(RawNote {
                    onset,
                    offset: tick,
                    pitch,
                    velocity,
                    track: track_index,
                });
            }
        }
    }

    let (numerator, denominator) = time_signature.map_or((4, 4), |(_, n, d)| (n, d));
    let measure_length = numerator as f64 * 4.0 / denominator as f64;
    let part_name = |track: usize| {
        track_names[track]
            .clone()
            .unwrap_or_else(|| format!("Track {track}"))
    };

    let notes: Vec<NoteEvent> = raw_notes
        .iter()
        .map(|raw| {
            let start_time = raw.onset as f64 / ppq as f64;
            let measure_index = (start_time / measure_length).floor();
            let mut note = NoteEvent::new(
                start_time,
                raw.offset.saturating_sub(raw.onset) as f64 / ppq as f64,
                raw.pitch,
                raw.velocity as f64 / 127.0,
                part_name(raw.track),
            );
            note.measure = measure_index as u32 + 1;
            note.beat =
                1.0 + (start_time - measure_index * measure_length) * denominator as f64 / 4.0;
            note
        })
        .collect();

    let mut parts: Vec<String> = Vec::new();
    let mut tracks_with_notes: Vec<usize> = raw_notes.iter().map(|n| n.track).collect();
    tracks_with_notes.sort_unstable();
    tracks_with_notes.dedup();
    for track in tracks_with_notes {
        parts.push(part_name(track));
    }

    let defaults = ScoreMetadata::default();
    let metadata = ScoreMetadata {
        title: String::new(),
        composer: String::new(),
        time_signature: time_signature
            .map(|(_, n, d)| format!("{n}/{d}"))
            .unwrap_or(defaults.time_signature),
        key_signature: key_signature
            .and_then(|(_, fifths, minor)| {
                key_name(fifths as i32, if minor { "minor" } else { "major" })
            })
            .unwrap_or(defaults.key_signature),
        tempo: tempo.map_or(defaults.tempo, |(_, bpm)| bpm),
        parts,
    };

    debug!(notes = notes.len(), ppq, "parsed MIDI file");
    Ok(assemble(metadata, notes, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(buf: &mut Vec<u8>, track: &[u8]) {
        buf.extend_from_slice(b"MTrk");
        buf.extend_from_slice(&(track.len() as u32).to_be_bytes());
        buf.extend_from_slice(track);
    }

    fn make_midi() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"MThd");
        buf.extend_from_slice(&6u32.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes()); // format 1
        buf.extend_from_slice(&2u16.to_be_bytes()); // 2 tracks
        buf.extend_from_slice(&480u16.to_be_bytes());

        let mut track0 = Vec::new();
        // 100 BPM (600000 usec/beat)
        track0.extend_from_slice(&[0x00, 0xFF, 0x51, 0x03, 0x09, 0x27, 0xC0]);
        // 3/4
        track0.extend_from_slice(&[0x00, 0xFF, 0x58, 0x04, 0x03, 0x02, 0x18, 0x08]);
        // D major
        track0.extend_from_slice(&[0x00, 0xFF, 0x59, 0x02, 0x02, 0x00]);
        track0.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
        chunk(&mut buf, &track0);

        let mut track1 = Vec::new();
        // Track name "Horn"
        track1.extend_from_slice(&[0x00, 0xFF, 0x03, 0x04, b'H', b'o', b'r', b'n']);
        // C4 and E4 together for one beat
        track1.extend_from_slice(&[0x00, 0x90, 60, 127]);
        track1.extend_from_slice(&[0x00, 0x90, 64, 64]);
        track1.extend_from_slice(&[0x83, 0x60, 0x80, 60, 0]);
        track1.extend_from_slice(&[0x00, 0x90, 64, 0]);
        // G4 three beats later, never released
        track1.extend_from_slice(&[0x8B, 0x20, 0x90, 67, 100]);
        track1.extend_from_slice(&[0x83, 0x60, 0xFF, 0x2F, 0x00]);
        chunk(&mut buf, &track1);

        buf
    }

    #[test]
    fn reads_notes_in_beats() {
        let score = parse_midi(&make_midi()).unwrap();
        let notes: Vec<_> = score
            .notes()
            .iter()
            .map(|n| (n.start_time, n.duration, n.pitch))
            .collect();
        assert_eq!(notes, vec![(0.0, 1.0, 60), (0.0, 1.0, 64), (4.0, 1.0, 67)]);

        let first = &score.notes()[0];
        assert_eq!(first.velocity, 1.0);
        assert_eq!(first.part, "Horn");
        assert_eq!(first.pitch_name, "C4");

        let last = &score.notes()[2];
        assert_eq!(last.measure, 2);
        assert_eq!(last.beat, 2.0);
    }

    #[test]
    fn reads_metadata() {
        let score = parse_midi(&make_midi()).unwrap();
        let meta = score.metadata();
        assert!((meta.tempo - 100.0).abs() < 1e-9);
        assert_eq!(meta.time_signature, "3/4");
        assert_eq!(meta.key_signature, "D major");
        assert_eq!(meta.parts, vec!["Horn".to_string()]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_midi(b"not a midi file"), Err(Error::ScoreParse(_))));
    }
}
