//! Perceived dynamics from notated markings.
//!
//! Marking levels are mapped through Stevens' power law and then adjusted
//! for crowding (many markings inside the integration window) and masking
//! (a louder part marked at nearly the same time).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use score_model::{
    DynamicContext, DynamicEvent, DynamicEventKind, DynamicLabel, DynamicMarking, Error,
    MarkingContent, Result, ScoreModel, WedgeKind,
};
use scoreconf::DynamicsConfig;

use crate::density::linspace;
use crate::smoothing::gaussian_filter_1d;

/// All parts' dynamics resampled on one smoothed curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicsCurve {
    pub time: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl DynamicsCurve {
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DynamicsAnalyzer {
    config: DynamicsConfig,
}

/// Per-traversal bookkeeping.
#[derive(Default)]
struct Extraction {
    events: Vec<DynamicEvent>,
    current: HashMap<String, DynamicLabel>,
    /// Index of the open hairpin start per part
    open_wedges: HashMap<String, usize>,
}

impl DynamicsAnalyzer {
    pub fn new(config: &DynamicsConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &DynamicsConfig {
        &self.config
    }

    /// Loudness of a marking level as heard in `context`.
    pub fn perceived_intensity(&self, base: f64, context: &DynamicContext) -> f64 {
        let mut perceived = (base / 100.0).powf(self.config.stevens_coefficient) * 100.0;
        if context.temporal_density > 1.0 / self.config.temporal_window {
            perceived *= self.config.dense_factor;
        }
        if context.masked {
            perceived *= self.config.masked_factor;
        }
        perceived
    }

    /// Analyze every marking of the score, ordered by time.
    ///
    /// Any malformed marking fails the whole analysis.
    pub fn analyze(&self, score: &ScoreModel) -> Result<Vec<DynamicEvent>> {
        let events = self
            .extract(score)
            .map_err(|cause| Error::analysis("dynamics analysis failed", cause))?;
        info!(events = events.len(), "dynamics analyzed");
        Ok(events)
    }

    fn extract(&self, score: &ScoreModel) -> Result<Vec<DynamicEvent>> {
        let mut state = Extraction::default();

        for part in part_order(score) {
            let markings = score.markings().iter().filter(|m| m.part == part);
            for marking in markings {
                if !(marking.time.is_finite() && marking.time >= 0.0) {
                    return Err(Error::Validation(format!(
                        "marking in part {part:?}, measure {} has invalid time {}",
                        marking.measure, marking.time
                    )));
                }
                self.visit(&mut state, marking);
            }
        }

        let mut events = state.events;
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(events)
    }

    fn visit(&self, state: &mut Extraction, marking: &DynamicMarking) {
        match &marking.content {
            MarkingContent::Symbol { value } => match DynamicLabel::from_marking(value) {
                Some(label) => {
                    self.emit(state, marking, label, DynamicEventKind::Instant);
                    state.current.insert(marking.part.clone(), label);
                }
                None => debug!(symbol = %value, "ignoring unknown dynamic symbol"),
            },
            MarkingContent::Text { text } => {
                let value = text.to_lowercase();
                let gradual = value.contains("cresc") || value.contains("dim");
                if let Some(label) = DynamicLabel::from_marking(&value) {
                    let kind = if gradual {
                        DynamicEventKind::GradualStart
                    } else {
                        DynamicEventKind::TextDerived
                    };
                    self.emit(state, marking, label, kind);
                    state.current.insert(marking.part.clone(), label);
                }
            }
            MarkingContent::Wedge {
                wedge: WedgeKind::Crescendo | WedgeKind::Diminuendo,
            } => {
                let Some(&label) = state.current.get(&marking.part) else {
                    debug!(part = %marking.part, "hairpin before any dynamic, skipping");
                    return;
                };
                let index = self.emit(state, marking, label, DynamicEventKind::GradualStart);
                state.open_wedges.insert(marking.part.clone(), index);
            }
            MarkingContent::Wedge {
                wedge: WedgeKind::Stop,
            } => {
                let Some(&label) = state.current.get(&marking.part) else {
                    return;
                };
                if let Some(start) = state.open_wedges.remove(&marking.part) {
                    let opened = &mut state.events[start];
                    opened.duration = Some(marking.time - opened.time);
                }
                self.emit(state, marking, label, DynamicEventKind::GradualEnd);
            }
        }
    }

    /// Push an event and return its index.
    fn emit(
        &self,
        state: &mut Extraction,
        marking: &DynamicMarking,
        label: DynamicLabel,
        kind: DynamicEventKind,
    ) -> usize {
        let context = self.context(state, marking, label);
        state.events.push(DynamicEvent {
            time: marking.time,
            label,
            intensity: self.perceived_intensity(label.base_value(), &context),
            kind,
            part: marking.part.clone(),
            measure: marking.measure,
            duration: None,
            context,
        });
        state.events.len() - 1
    }

    fn context(
        &self,
        state: &Extraction,
        marking: &DynamicMarking,
        label: DynamicLabel,
    ) -> DynamicContext {
        let window = self.config.temporal_window;
        let neighbours = state
            .events
            .iter()
            .filter(|e| (e.time - marking.time).abs() < window)
            .count();
        let masked = state.events.iter().any(|e| {
            e.part != marking.part
                && (e.time - marking.time).abs() < self.config.masking_window
                && e.label.base_value() > label.base_value()
        });
        let previous = state.current.get(&marking.part).copied();

        DynamicContext {
            temporal_density: neighbours as f64 / window,
            previous,
            delta: previous.map(|p| label.base_value() - p.base_value()),
            masked,
        }
    }

    /// Interpolate all events onto `curve_points` samples and smooth.
    pub fn combined_curve(&self, events: &[DynamicEvent]) -> DynamicsCurve {
        let mut points: Vec<(f64, f64)> = events.iter().map(|e| (e.time, e.intensity)).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (Some(&(first_t, first_v)), Some(&(last_t, last_v))) = (points.first(), points.last())
        else {
            return DynamicsCurve::default();
        };

        let time = linspace(first_t, last_t, self.config.curve_points);
        let raw: Vec<f64> = time
            .iter()
            .map(|&t| {
                let after = points.partition_point(|&(et, _)| et <= t);
                if after == 0 {
                    return first_v;
                }
                if after == points.len() {
                    return last_v;
                }
                let (t0, v0) = points[after - 1];
                let (t1, v1) = points[after];
                if t1 == t0 {
                    v0
                } else {
                    v0 + (v1 - v0) * (t - t0) / (t1 - t0)
                }
            })
            .collect();

        DynamicsCurve {
            intensity: gaussian_filter_1d(&raw, self.config.curve_sigma),
            time,
        }
    }
}

/// Parts in order of their first marking.
fn part_order(score: &ScoreModel) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for marking in score.markings() {
        if !order.contains(&marking.part) {
            order.push(marking.part.clone());
        }
    }
    order
}
