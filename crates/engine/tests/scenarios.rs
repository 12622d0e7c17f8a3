use pretty_assertions::assert_eq;
use scanner_engine::{
    run, BoundaryState, CancellationToken, Engine, EngineError, EngineOptions, EngineResult,
    ExtractionMethod, Namespace, ParamValue, TemplateWarning,
};

const SINGLE_SCANNER: &str = r#"import pandas as pd

PRICE_MIN = 5.0
VOLUME_MIN = 500_000

def momentum_scan(df):
    return df[(df.close > PRICE_MIN) & (df.volume > VOLUME_MIN)]
"#;

const TWO_BANNERS: &str = r#"import pandas as pd

# ==== Scanner: Gap Up ====
price_min = 5.0

def gap_scan(df):
    return df[df.close > price_min]

# ==== Scanner: Volume Spike ====
price_min = 10.0

def volume_scan(df):
    return df[df.close > price_min]
"#;

const MERGED_SCRIPTS: &str = r#"import pandas as pd

data = pd.read_csv("prices.csv")
gappers = data[data["gap"] > 0.04]
print(gappers.head())

volume = pd.read_csv("volume.csv")
spikes = volume[volume["rvol"] > 3.0]
print(spikes.tail())
"#;

const CONFIG_HEAVY: &str = r#"import pandas as pd

PRICE_MIN = 2.0
PRICE_MAX = 20.0
VOLUME_MIN = 1_000_000
GAP_MIN = 0.04
GAP_MAX = 0.5
RVOL_MIN = 2.5
ATR_PERIOD = 14
RSI_PERIOD = 14
RSI_UPPER = 70
FLOAT_MAX = 50_000_000
LOOKBACK_DAYS = 20
TOP_COUNT = 25

def gap_scan(df):
    hits = df[(df.gap > GAP_MIN) & (df.gap < GAP_MAX)]
    hits = hits[(hits.close > PRICE_MIN) & (hits.close < PRICE_MAX)]
    hits = hits[(hits.volume > VOLUME_MIN) & (hits.rvol > RVOL_MIN)]
    hits = hits[(hits.atr_len == ATR_PERIOD) & (hits.rsi_len == RSI_PERIOD)]
    hits = hits[(hits.rsi < RSI_UPPER) & (hits.float_shares < FLOAT_MAX)]
    hits = hits[hits.days >= LOOKBACK_DAYS]
    return hits.head(TOP_COUNT)
"#;

const PROCEDURAL_SCRIPT: &str = r#"import pandas as pd

PRICE_MIN = 5.0
GAP_MIN = 0.04

bars = pd.read_csv("bars.csv")
hits = bars[(bars.close > PRICE_MIN) & (bars.gap > GAP_MIN)]
print(hits)
"#;

const SHARED_PRELUDE: &str = r#"import pandas as pd

universe = pd.read_csv("universe.csv")

# ==== Scanner: Gap Up ====
GAP_MIN = 0.04

def gap_scan(df):
    return df[df.gap > GAP_MIN]

# ==== Scanner: Volume Spike ====
RVOL_MIN = 3.0

def volume_scan(df):
    return df[(df.rvol > RVOL_MIN) & df.symbol.isin(universe.symbol)]
"#;

const UNBANNERED_VARIANTS: &str = r#"import pandas as pd

GAP_MIN = 0.04

def gap_scan_a(df):
    gaps = df[df.gap > GAP_MIN]
    return gaps

def gap_scan_b(df):
    gaps = df[df.gap > GAP_MIN * 2]
    return gaps
"#;

const LOCAL_NAMES: &str = r#"import pandas as pd

lookback = int("20")

# ==== Scanner: Gap Up ====
threshold = 0.5

def gap_scan(df):
    bars = df.tail(lookback=20)
    return bars[bars.gap > threshold]

# ==== Scanner: Volume Spike ====
RVOL_MIN = 3.0

def volume_scan(df):
    recent = df.tail(lookback)
    if (threshold := recent.rvol.mean()) > RVOL_MIN:
        return recent[recent.rvol > threshold]
    return recent.head(0)
"#;

fn analyze(code: &str) -> EngineResult {
    run(code, &EngineOptions::default()).expect("run failed")
}

#[test]
fn single_entry_point_is_one_boundary() {
    let result = analyze(SINGLE_SCANNER);

    assert_eq!(result.boundaries.len(), 1);
    let boundary = &result.boundaries[0];
    assert_eq!(boundary.namespace.as_str(), "momentum_scan");
    assert_eq!((boundary.start_line, boundary.end_line), (1, 7));
    assert_eq!(boundary.confidence, 1.0);
    assert!(!boundary.requires_review);
    assert_eq!(boundary.state, BoundaryState::TemplateGenerated);

    let set = result.parameter_set(&boundary.namespace).unwrap();
    assert_eq!(set.names().collect::<Vec<_>>(), vec!["PRICE_MIN", "VOLUME_MIN"]);
    assert_eq!(set.get("VOLUME_MIN").unwrap().value, ParamValue::Int(500_000));

    assert!(!result.validation_report.contamination_detected);
    assert_eq!(result.validation_report.isolation_score, 1.0);
    assert_eq!(result.templates.len(), 1);
    assert!(result.templates[0].is_emitted());
}

#[test]
fn procedural_script_is_one_boundary() {
    let result = analyze(PROCEDURAL_SCRIPT);

    assert_eq!(result.boundaries.len(), 1);
    let boundary = &result.boundaries[0];
    assert_eq!((boundary.start_line, boundary.end_line), (1, 8));
    assert_eq!(boundary.confidence, 1.0);
    assert!(!boundary.requires_review);
    assert_eq!(boundary.state, BoundaryState::TemplateGenerated);

    let set = result.parameter_set(&boundary.namespace).unwrap();
    assert!(set.contains("PRICE_MIN"));
    assert!(set.contains("GAP_MIN"));
    assert!(!result.validation_report.contamination_detected);
    assert_eq!(result.templates.len(), 1);
    assert!(result.templates[0].is_emitted());
}

#[test]
fn banner_scanners_keep_their_own_values() {
    let result = analyze(TWO_BANNERS);

    let names: Vec<&str> = result
        .boundaries
        .iter()
        .map(|b| b.namespace.as_str())
        .collect();
    assert_eq!(names, vec!["gap_up", "volume_spike"]);

    let value_of = |ns: &str| {
        result
            .parameter_set(&Namespace::new(ns))
            .and_then(|set| set.get("price_min"))
            .map(|p| (p.value.clone(), p.source_line))
    };
    assert_eq!(value_of("gap_up"), Some((ParamValue::Float(5.0), 4)));
    assert_eq!(value_of("volume_spike"), Some((ParamValue::Float(10.0), 10)));

    let report = &result.validation_report;
    assert!(!report.contamination_detected);
    assert!(report.cross_namespace_collisions.is_empty());
    assert_eq!(
        report.recurring_names.get("price_min"),
        Some(&vec![Namespace::new("gap_up"), Namespace::new("volume_spike")])
    );

    assert_eq!(result.templates.len(), 2);
    let gap = result.template(&Namespace::new("gap_up")).unwrap();
    assert!(gap.source_text.contains("price_min = 5.0"));
    assert!(!gap.source_text.contains("price_min = 10.0"));
}

#[test]
fn invalid_source_reports_line() {
    let code = "import pandas as pd\n\nPRICE_MIN = 5.0\nVOLUME_MIN = = 100\n";
    match run(code, &EngineOptions::default()) {
        Err(EngineError::Parse { line, .. }) => assert_eq!(line, 4),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn config_block_parameters_are_high_confidence() {
    let result = analyze(CONFIG_HEAVY);

    assert_eq!(result.boundaries.len(), 1);
    let set = result
        .parameter_set(&result.boundaries[0].namespace)
        .unwrap();
    assert_eq!(set.len(), 12);
    for param in set.iter() {
        assert_eq!(
            param.extraction_method,
            ExtractionMethod::ConfigBlock,
            "{} came from {:?}",
            param.name,
            param.extraction_method
        );
        assert!(
            param.confidence >= 0.85,
            "{} has confidence {}",
            param.name,
            param.confidence
        );
    }
}

#[test]
fn merged_scripts_need_review() {
    let result = analyze(MERGED_SCRIPTS);

    assert_eq!(result.boundaries.len(), 1);
    let boundary = &result.boundaries[0];
    assert!(boundary.confidence < 0.6, "confidence {}", boundary.confidence);
    assert!(boundary.requires_review);
    assert_eq!(boundary.state, BoundaryState::RequiresReview);
    assert!(result.templates.is_empty());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.kind() == "boundary_ambiguity"));
}

#[test]
fn shared_constant_goes_to_global() {
    let code = r#"import pandas as pd

API_KEY = "demo"

# ==== Scanner: Gap Up ====
GAP_MIN = 0.04

def gap_scan(df):
    return df[df.gap > GAP_MIN].assign(key=API_KEY)

# ==== Scanner: Volume Spike ====
RVOL_MIN = 3.0

def volume_scan(df):
    return df[df.rvol > RVOL_MIN]
"#;
    let result = analyze(code);

    let global = result.parameter_set(&Namespace::global()).unwrap();
    assert_eq!(global.names().collect::<Vec<_>>(), vec!["API_KEY"]);
    for ns in ["gap_up", "volume_spike"] {
        assert!(!result
            .parameter_set(&Namespace::new(ns))
            .unwrap()
            .contains("API_KEY"));
    }

    let gap = result.template(&Namespace::new("gap_up")).unwrap();
    assert!(gap.dependencies.contains("API_KEY"));
    assert!(gap.source_text.contains("API_KEY = \"demo\""));
    let volume = result.template(&Namespace::new("volume_spike")).unwrap();
    assert!(!volume.source_text.contains("API_KEY"));
}

#[test]
fn shared_prelude_is_included_not_isolated() {
    let result = analyze(SHARED_PRELUDE);

    let names: Vec<&str> = result
        .boundaries
        .iter()
        .map(|b| b.namespace.as_str())
        .collect();
    assert_eq!(names, vec!["gap_up", "volume_spike"]);
    assert!(result.boundaries.iter().all(|b| !b.requires_review));

    let volume = result.template(&Namespace::new("volume_spike")).unwrap();
    assert!(volume.is_emitted());
    assert!(volume.dependencies.contains("universe"));
    assert!(volume
        .source_text
        .contains("universe = pd.read_csv(\"universe.csv\")"));
    assert!(!volume
        .warnings
        .iter()
        .any(|w| matches!(w, TemplateWarning::MissingDependency { .. })));

    let gap = result.template(&Namespace::new("gap_up")).unwrap();
    assert!(!gap.source_text.contains("universe"));
}

#[test]
fn unbannered_definitions_are_treated_alike() {
    let result = analyze(UNBANNERED_VARIANTS);

    assert_eq!(result.boundaries.len(), 2);
    let (a, b) = (&result.boundaries[0], &result.boundaries[1]);
    assert_eq!((a.start_line, a.end_line), (5, 7));
    assert_eq!((b.start_line, b.end_line), (9, 11));
    assert_eq!(a.agreeing_methods, b.agreeing_methods);
    assert_eq!(a.state, b.state);
    assert_eq!(a.requires_review, b.requires_review);
}

#[test]
fn local_names_are_not_contamination() {
    let result = analyze(LOCAL_NAMES);

    let report = &result.validation_report;
    assert!(
        !report.contamination_detected,
        "{:?}",
        report.cross_namespace_collisions
    );
    assert_eq!(report.isolation_score, 1.0);
    assert_eq!(result.boundaries.len(), 2);
    assert!(result.boundaries.iter().all(|b| !b.requires_review));

    assert_eq!(result.templates.len(), 2);
    let volume = result.template(&Namespace::new("volume_spike")).unwrap();
    assert!(volume.is_emitted());
    assert!(volume.source_text.contains("lookback = int(\"20\")"));
}

#[test]
fn cross_reference_blocks_both_templates() {
    let code = r#"import pandas as pd

# ==== Scanner: Gap Up ====
GAP_MIN = 0.04

def gap_scan(df):
    return df[df.gap > GAP_MIN]

# ==== Scanner: Volume Spike ====
RVOL_MIN = 3.0

def volume_scan(df):
    return df[(df.rvol > RVOL_MIN) & (df.gap > GAP_MIN)]
"#;
    let result = analyze(code);

    let report = &result.validation_report;
    assert!(report.contamination_detected);
    assert!(report.isolation_score < 1.0);
    assert!(report
        .cross_namespace_collisions
        .iter()
        .any(|c| c.parameter == "GAP_MIN"
            && c.owner == Namespace::new("gap_up")
            && c.other == Namespace::new("volume_spike")));

    assert!(result.templates.is_empty());
    assert!(result.boundaries.iter().all(|b| b.requires_review));
    assert!(result.diagnostics.iter().any(|d| d.kind() == "contamination"));
}

#[test]
fn exhausted_budget_times_out_every_namespace() {
    let options = EngineOptions {
        time_budget_ms: 0,
        ..Default::default()
    };
    let result = run(TWO_BANNERS, &options).unwrap();

    assert_eq!(result.boundaries.len(), 2);
    assert!(result.boundaries.iter().all(|b| b.requires_review));
    assert!(result.templates.is_empty());
    assert!(result.diagnostics.iter().any(|d| d.kind() == "timeout"));
    assert_eq!(
        result.parameter_sets.keys().collect::<Vec<_>>(),
        vec![&Namespace::global()]
    );
}

#[test]
fn cancelled_run_returns_error() {
    let engine = Engine::new(EngineOptions::default()).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(
        engine.run_with_cancel(TWO_BANNERS, &token),
        Err(EngineError::Cancelled)
    );
}

#[test]
fn invalid_options_are_rejected() {
    let options = EngineOptions {
        min_boundary_confidence: 1.5,
        ..Default::default()
    };
    assert!(matches!(
        Engine::new(options),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[test]
fn discard_only_applies_to_review_boundaries() {
    let mut merged = analyze(MERGED_SCRIPTS);
    let namespace = merged.boundaries[0].namespace.clone();
    merged.discard(&namespace).unwrap();
    assert_eq!(merged.boundaries[0].state, BoundaryState::Discarded);
    assert!(merged.parameter_set(&namespace).is_none());

    let mut single = analyze(SINGLE_SCANNER);
    let namespace = single.boundaries[0].namespace.clone();
    assert!(matches!(
        single.discard(&namespace),
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        single.discard(&Namespace::new("nope")),
        Err(EngineError::UnknownNamespace(_))
    ));
}

#[test]
fn empty_source_yields_empty_result() {
    let result = analyze("");
    assert!(result.boundaries.is_empty());
    assert!(result.templates.is_empty());
    assert_eq!(result.stats().boundaries, 0);
}
