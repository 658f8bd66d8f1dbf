use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use score_analysis::{
    AnalysisOptions, MemoryCache, ResultCache, ScoreAnalyzer, SqliteCache, CURRENT_VERSION,
};
use score_model::{DynamicEventKind, DynamicLabel, Error};
use scoreconf::ScoreConfig;

const QUARTET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <work><work-title>Sketch</work-title></work>
  <part-list>
    <score-part id="P1"><part-name>Violin</part-name></score-part>
    <score-part id="P2"><part-name>Viola</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes>
        <divisions>1</divisions>
        <time><beats>4</beats><beat-type>4</beat-type></time>
      </attributes>
      <direction><direction-type><dynamics><pp/></dynamics></direction-type></direction>
      <note><pitch><step>E</step><octave>5</octave></pitch><duration>2</duration></note>
      <direction><direction-type><wedge type="crescendo"/></direction-type></direction>
      <note><pitch><step>G</step><octave>5</octave></pitch><duration>2</duration></note>
    </measure>
    <measure number="2">
      <direction><direction-type><wedge type="stop"/></direction-type></direction>
      <direction><direction-type><dynamics><f/></dynamics></direction-type></direction>
      <note><pitch><step>A</step><octave>5</octave></pitch><duration>4</duration></note>
    </measure>
  </part>
  <part id="P2">
    <measure number="1">
      <attributes><divisions>1</divisions></attributes>
      <direction><direction-type><dynamics><mf/></dynamics></direction-type></direction>
      <note><pitch><step>C</step><octave>4</octave></pitch><duration>4</duration></note>
    </measure>
    <measure number="2">
      <note><pitch><step>D</step><octave>4</octave></pitch><duration>4</duration></note>
    </measure>
  </part>
</score-partwise>"#;

fn analyzer_with(cache: Arc<dyn ResultCache>) -> ScoreAnalyzer {
    ScoreAnalyzer::with_cache(ScoreConfig::default(), cache).unwrap()
}

#[test]
fn musicxml_score_through_every_engine() {
    let score = score_model::musicxml::parse_musicxml(QUARTET).unwrap();
    let analyzer = analyzer_with(Arc::new(MemoryCache::new()));
    let report = analyzer.analyze(&score, &AnalysisOptions::default()).unwrap();

    assert_eq!(report.metadata.title, "Sketch");
    assert_eq!(report.note_count, 5);
    assert_eq!(report.time_range, (0.0, 8.0));
    assert_eq!(report.pitch_range, (60, 81));

    let density = report.density.unwrap();
    assert_eq!(density.series.density.len(), 80);
    assert_eq!(density.summary.max, 4);
    assert_eq!(density.series.register_high[0], 76);
    assert_eq!(density.series.register_low[0], 60);

    let dynamics = report.dynamics.unwrap();
    let kinds: Vec<(f64, DynamicLabel, DynamicEventKind)> =
        dynamics.iter().map(|e| (e.time, e.label, e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (0.0, DynamicLabel::Pp, DynamicEventKind::Instant),
            (0.0, DynamicLabel::Mf, DynamicEventKind::Instant),
            (2.0, DynamicLabel::Pp, DynamicEventKind::GradualStart),
            (4.0, DynamicLabel::Pp, DynamicEventKind::GradualEnd),
            (4.0, DynamicLabel::F, DynamicEventKind::Instant),
        ]
    );
    assert_eq!(dynamics[2].duration, Some(2.0));
    assert!(dynamics.windows(2).all(|w| w[0].time <= w[1].time));

    let curve = report.combined_dynamics.unwrap();
    assert_eq!(curve.time.len(), 500);
    assert_eq!(curve.time[0], 0.0);
    assert_eq!(curve.time[499], 4.0);

    let spectrum = report.spectral.unwrap();
    assert_eq!(spectrum.energy.len(), 128 * 400);
    assert!(spectrum.total_energy() > 0.0);
    assert!(spectrum.energy.iter().all(|e| *e >= 0.0));
}

#[test]
fn json_score_is_served_from_cache_on_second_run() {
    let score = score_model::from_json_value(&json!({
        "title": "Cached",
        "notes": [
            {"start": 0.0, "duration": 1.0, "pitch": 60, "part": "Piano"},
            {"start": 1.0, "duration": 1.0, "pitch": "E4", "part": "Piano"}
        ],
        "markings": [{"time": 0.0, "value": "mp", "part": "Piano"}]
    }))
    .unwrap();

    let cache = Arc::new(MemoryCache::new());
    let analyzer = analyzer_with(cache.clone());
    let first = analyzer.analyze(&score, &AnalysisOptions::default()).unwrap();
    assert_eq!(cache.len(), 3);

    let second = analyzer.analyze(&score, &AnalysisOptions::default()).unwrap();
    assert_eq!(cache.len(), 3);
    assert_eq!(
        first.density.map(|d| d.series.density),
        second.density.map(|d| d.series.density)
    );
    assert_eq!(
        first.dynamics.map(|d| d.len()),
        second.dynamics.map(|d| d.len())
    );
}

#[test]
fn sqlite_cache_persists_across_analyzers() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let score = score_model::musicxml::parse_musicxml(QUARTET).unwrap();

    let first = analyzer_with(Arc::new(SqliteCache::open(&path, CURRENT_VERSION).unwrap()));
    let density = first.density(&score, 10).unwrap();

    let reopened = SqliteCache::open(&path, CURRENT_VERSION).unwrap();
    let second = analyzer_with(Arc::new(reopened));
    assert_eq!(second.density(&score, 10).unwrap().density, density.density);

    let newer = SqliteCache::open(&path, CURRENT_VERSION + 1).unwrap();
    assert_eq!(newer.prune_stale().unwrap(), 1);
}

#[test]
fn malformed_marking_fails_dynamics_but_not_density() {
    let score = score_model::from_json_value(&json!({
        "notes": [{"start": 0.0, "duration": 2.0, "pitch": 62}],
        "markings": [{"time": -1.0, "value": "f", "part": "Part 1"}]
    }))
    .unwrap();
    let analyzer = analyzer_with(Arc::new(MemoryCache::new()));

    let density = analyzer.density(&score, 10).unwrap();
    assert_eq!(density.density, vec![1; 20]);

    let err = analyzer.dynamics(&score).unwrap_err();
    assert!(matches!(err, Error::Analysis { .. }));
    assert!(matches!(err.cause(), Some(Error::Validation(_))));
}

#[test]
fn unknown_shape_is_rejected_by_adapter() {
    let err = score_model::from_json_value(&json!({"tracks": []})).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn empty_score_yields_empty_sections() {
    let score = score_model::from_json_value(&json!({"notes": []})).unwrap();
    let analyzer = analyzer_with(Arc::new(MemoryCache::new()));
    let report = analyzer.analyze(&score, &AnalysisOptions::default()).unwrap();

    assert!(report.density.unwrap().series.time.is_empty());
    assert!(report.dynamics.unwrap().is_empty());
    assert!(report.combined_dynamics.unwrap().time.is_empty());
    let spectrum = report.spectral.unwrap();
    assert!(spectrum.is_empty());
    assert_eq!(spectrum.pitch_range, (60.0, 72.0));
}
