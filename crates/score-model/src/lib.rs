//! Normalized score model shared by every scorelens analysis.
//!
//! Scores enter the system once, through one of the adapters
//! ([`adapter`] for JSON, [`musicxml`], [`midi`]), and leave as an
//! immutable [`ScoreModel`]. Engines never look at file formats.

pub mod adapter;
pub mod dynamic;
pub mod midi;
pub mod musicxml;
pub mod note;
pub mod pitch;
pub mod score;

pub use adapter::{from_json_str, from_json_value, load_path};
pub use dynamic::{
    DynamicContext, DynamicEvent, DynamicEventKind, DynamicLabel, DynamicMarking,
    MarkingContent, WedgeKind,
};
pub use note::NoteEvent;
pub use score::{ScoreMetadata, ScoreModel, ScoreSummary};

use std::path::PathBuf;

/// Errors shared by the model, the adapters and the analysis engines.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input shape or parameters.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A computation failed; `source` carries the underlying cause.
    #[error("{message}")]
    Analysis {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// A tunable parameter is out of range.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("score parse error: {0}")]
    ScoreParse(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap `cause` in an analysis error.
    pub fn analysis(message: impl Into<String>, cause: Error) -> Self {
        Error::Analysis {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// The wrapped cause of an analysis error, if any.
    pub fn cause(&self) -> Option<&Error> {
        match self {
            Error::Analysis { source, .. } => source.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn analysis_error_exposes_cause() {
        let err = Error::analysis("density failed", Error::Validation("bad note".into()));
        assert_eq!(err.to_string(), "density failed");
        assert!(matches!(err.cause(), Some(Error::Validation(_))));
        assert!(err.source().is_some());
    }
}
