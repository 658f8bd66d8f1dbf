use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Notated loudness level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicLabel {
    Pppp,
    Ppp,
    Pp,
    P,
    Mp,
    Mf,
    F,
    Ff,
    Fff,
    Ffff,
    Sf,
    Sff,
    Sfff,
    Sffff,
}

impl DynamicLabel {
    pub const ALL: [DynamicLabel; 14] = [
        DynamicLabel::Pppp,
        DynamicLabel::Ppp,
        DynamicLabel::Pp,
        DynamicLabel::P,
        DynamicLabel::Mp,
        DynamicLabel::Mf,
        DynamicLabel::F,
        DynamicLabel::Ff,
        DynamicLabel::Fff,
        DynamicLabel::Ffff,
        DynamicLabel::Sf,
        DynamicLabel::Sff,
        DynamicLabel::Sfff,
        DynamicLabel::Sffff,
    ];

    /// Linear marking level, pppp = 20 .. ffff = 110.
    pub fn base_value(self) -> f64 {
        match self {
            DynamicLabel::Pppp => 20.0,
            DynamicLabel::Ppp => 30.0,
            DynamicLabel::Pp => 40.0,
            DynamicLabel::P => 50.0,
            DynamicLabel::Mp => 60.0,
            DynamicLabel::Mf => 70.0,
            DynamicLabel::F => 80.0,
            DynamicLabel::Ff => 90.0,
            DynamicLabel::Fff => 100.0,
            DynamicLabel::Ffff => 110.0,
            DynamicLabel::Sf => 85.0,
            DynamicLabel::Sff => 95.0,
            DynamicLabel::Sfff => 105.0,
            DynamicLabel::Sffff => 115.0,
        }
    }

    /// Relative attack emphasis of the marking.
    pub fn onset_weight(self) -> f64 {
        match self {
            DynamicLabel::Pppp => 0.4,
            DynamicLabel::Ppp => 0.5,
            DynamicLabel::Pp => 0.6,
            DynamicLabel::P => 0.7,
            DynamicLabel::Mp => 0.8,
            DynamicLabel::Mf => 0.9,
            DynamicLabel::F => 1.0,
            DynamicLabel::Ff => 1.1,
            DynamicLabel::Fff => 1.2,
            DynamicLabel::Ffff => 1.3,
            DynamicLabel::Sf => 1.15,
            DynamicLabel::Sff => 1.25,
            DynamicLabel::Sfff => 1.35,
            DynamicLabel::Sffff => 1.45,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DynamicLabel::Pppp => "pppp",
            DynamicLabel::Ppp => "ppp",
            DynamicLabel::Pp => "pp",
            DynamicLabel::P => "p",
            DynamicLabel::Mp => "mp",
            DynamicLabel::Mf => "mf",
            DynamicLabel::F => "f",
            DynamicLabel::Ff => "ff",
            DynamicLabel::Fff => "fff",
            DynamicLabel::Ffff => "ffff",
            DynamicLabel::Sf => "sf",
            DynamicLabel::Sff => "sff",
            DynamicLabel::Sfff => "sfff",
            DynamicLabel::Sffff => "sffff",
        }
    }

    /// Exact, case-sensitive lookup of a normalized label.
    pub fn lookup(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.as_str() == value)
    }

    /// Lookup of engraved or written marking text: trimmed, lowercased,
    /// hyphens removed (`"m-f"` reads as `mf`).
    pub fn from_marking(value: &str) -> Option<Self> {
        Self::lookup(&value.trim().to_lowercase().replace('-', ""))
    }
}

impl fmt::Display for DynamicLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DynamicLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_marking(s)
            .ok_or_else(|| Error::Validation(format!("unknown dynamic label: {s:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicEventKind {
    Instant,
    GradualStart,
    GradualEnd,
    TextDerived,
}

/// Surroundings an intensity was computed in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicContext {
    /// Neighbouring events per time unit inside the integration window
    pub temporal_density: f64,
    /// Label in effect for the part before this event
    pub previous: Option<DynamicLabel>,
    /// Base-level change against `previous`
    pub delta: Option<f64>,
    pub masked: bool,
}

/// An analyzed dynamic marking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicEvent {
    pub time: f64,
    pub label: DynamicLabel,
    pub intensity: f64,
    pub kind: DynamicEventKind,
    pub part: String,
    pub measure: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub context: DynamicContext,
}

impl DynamicEvent {
    /// An instant marking at its table level, before any perceptual scaling.
    pub fn instant(time: f64, label: DynamicLabel, part: impl Into<String>, measure: u32) -> Self {
        Self {
            time,
            label,
            intensity: label.base_value(),
            kind: DynamicEventKind::Instant,
            part: part.into(),
            measure,
            duration: None,
            context: DynamicContext::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WedgeKind {
    Crescendo,
    Diminuendo,
    Stop,
}

/// What a raw direction in the score says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkingContent {
    /// An engraved dynamic symbol such as `ff`
    Symbol { value: String },
    /// Free text such as `cresc.` or `sub. p`
    Text { text: String },
    /// Hairpin start or end
    Wedge { wedge: WedgeKind },
}

/// A dynamic direction as found in the score, before analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicMarking {
    pub time: f64,
    pub part: String,
    pub measure: u32,
    #[serde(flatten)]
    pub content: MarkingContent,
}

impl DynamicMarking {
    pub fn symbol(time: f64, value: impl Into<String>, part: impl Into<String>, measure: u32) -> Self {
        Self {
            time,
            part: part.into(),
            measure,
            content: MarkingContent::Symbol { value: value.into() },
        }
    }

    pub fn text(time: f64, text: impl Into<String>, part: impl Into<String>, measure: u32) -> Self {
        Self {
            time,
            part: part.into(),
            measure,
            content: MarkingContent::Text { text: text.into() },
        }
    }

    pub fn wedge(time: f64, wedge: WedgeKind, part: impl Into<String>, measure: u32) -> Self {
        Self {
            time,
            part: part.into(),
            measure,
            content: MarkingContent::Wedge { wedge },
        }
    }
}
