//! Pitch spelling helpers.

const NOTE_NAMES_SHARP: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// MIDI number for a spelled pitch (C4 = 60).
pub fn midi_from_pitch(step: char, alter: i32, octave: i32) -> i32 {
    let base = match step.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => 0,
    };
    (octave + 1) * 12 + base + alter
}

/// Sharp-spelled name with octave, e.g. `61 -> "C#4"`.
pub fn pitch_name(midi: u8) -> String {
    let octave = midi as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES_SHARP[(midi % 12) as usize], octave)
}

/// Name as written in the score, e.g. `('B', -1, 4) -> "Bb4"`.
pub fn spelled_name(step: char, alter: i32, octave: i32) -> String {
    let accidental = match alter {
        a if a > 0 => "#".repeat(a as usize),
        a if a < 0 => "b".repeat(a.unsigned_abs() as usize),
        _ => String::new(),
    };
    format!("{}{}{}", step.to_ascii_uppercase(), accidental, octave)
}

/// Parse a written pitch name such as `"C#4"`, `"Bb3"` or `"A-1"`.
pub fn parse_pitch_name(name: &str) -> Option<u8> {
    let mut chars = name.trim().chars().peekable();
    let step = chars.next()?.to_ascii_uppercase();
    if !"CDEFGAB".contains(step) {
        return None;
    }

    let mut alter = 0;
    while let Some(&c) = chars.peek() {
        match c {
            '#' => alter += 1,
            'b' => alter -= 1,
            _ => break,
        }
        chars.next();
    }

    let octave: i32 = chars.collect::<String>().parse().ok()?;
    u8::try_from(midi_from_pitch(step, alter, octave))
        .ok()
        .filter(|m| *m <= 127)
}
