//! Classifier: an ordered chain of stages, each either confident or passing.
//!
//! ```text
//! candidate ──▶ RuleTable ──pass──▶ ValueHeuristic ──pass──▶ UnknownFallback
//!                  │                     │                        │
//!                  └──── Verdict::Confident { role, confidence } ─┘
//! ```

use std::collections::BTreeSet;

use crate::source::SourceScope;
use crate::types::{ExtractedParameter, ParamValue, Role};

/// Weight of the extractor's own confidence in the final blend
const EXTRACTION_WEIGHT: f64 = 0.6;
const VERDICT_WEIGHT: f64 = 0.4;
/// Ceiling for anything left as `unknown`
pub const UNKNOWN_CONFIDENCE_CAP: f64 = 0.3;

const THRESHOLD_WORDS: &[&str] = &[
    "min", "max", "threshold", "limit", "cutoff", "floor", "ceiling", "lower", "upper", "above",
    "below",
];
const CONFIG_WORDS: &[&str] = &[
    "enable", "enabled", "disable", "disabled", "mode", "flag", "use", "debug", "api", "key",
    "token", "url", "path", "timeout", "interval", "period", "lookback", "window", "days", "bars",
    "top", "count", "size", "universe", "timeframe",
];
const FILTER_WORDS: &[&str] = &[
    "price", "volume", "gap", "atr", "volatility", "rsi", "float", "cap", "change", "pct",
    "ratio", "rvol", "spread", "sma", "ema", "vwap", "sector", "exclude", "include", "only",
    "require",
];
const RATIO_WORDS: &[&str] = &["ratio", "pct", "percent", "rate", "weight", "frac", "fraction"];

/// Outcome of one stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Confident { role: Role, confidence: f64 },
    Pass,
}

/// What a stage may know about the candidate's surroundings
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext<'a> {
    /// Other candidates from the same namespace
    pub siblings: &'a [ExtractedParameter],
    /// Identifiers used as comparison operands inside the boundary
    pub compared: BTreeSet<String>,
}

impl<'a> ClassifyContext<'a> {
    #[must_use]
    pub fn new(siblings: &'a [ExtractedParameter]) -> Self {
        Self {
            siblings,
            compared: BTreeSet::new(),
        }
    }

    /// Context for candidates extracted from `scope`
    #[must_use]
    pub fn from_scope(scope: &SourceScope<'_>, siblings: &'a [ExtractedParameter]) -> Self {
        let mut compared = BTreeSet::new();
        for comparison in scope.nodes(&["comparison_operator"]) {
            let mut cursor = comparison.walk();
            for operand in comparison.named_children(&mut cursor) {
                let name = match operand.kind() {
                    "identifier" => scope.text(operand),
                    "attribute" => operand
                        .child_by_field_name("attribute")
                        .map_or("", |n| scope.text(n)),
                    _ => continue,
                };
                if !name.is_empty() {
                    compared.insert(name.to_string());
                }
            }
        }
        Self { siblings, compared }
    }
}

pub trait ClassifierStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn judge(&self, candidate: &ExtractedParameter, context: &ClassifyContext<'_>) -> Verdict;
}

/// Name vocabulary, checked threshold → config → filter
pub struct RuleTable;

impl ClassifierStage for RuleTable {
    fn name(&self) -> &'static str {
        "rule_table"
    }

    fn judge(&self, candidate: &ExtractedParameter, _context: &ClassifyContext<'_>) -> Verdict {
        let tokens = name_tokens(&candidate.name);
        let hits = |words: &[&str]| tokens.iter().any(|t| words.contains(&t.as_str()));

        if hits(THRESHOLD_WORDS) {
            Verdict::Confident {
                role: Role::Threshold,
                confidence: 0.95,
            }
        } else if hits(CONFIG_WORDS) {
            Verdict::Confident {
                role: Role::Config,
                confidence: 0.9,
            }
        } else if hits(FILTER_WORDS) {
            Verdict::Confident {
                role: Role::Filter,
                confidence: 0.85,
            }
        } else {
            Verdict::Pass
        }
    }
}

/// Role from value type and numeric range
pub struct ValueHeuristic;

impl ClassifierStage for ValueHeuristic {
    fn name(&self) -> &'static str {
        "value_heuristic"
    }

    fn judge(&self, candidate: &ExtractedParameter, context: &ClassifyContext<'_>) -> Verdict {
        let confident = |role, confidence| Verdict::Confident { role, confidence };
        match &candidate.value {
            ParamValue::Bool(_) => confident(Role::Config, 0.6),
            ParamValue::Str(_) => confident(Role::Config, 0.55),
            ParamValue::Int(_) | ParamValue::Float(_)
                if context.compared.contains(&candidate.name) =>
            {
                confident(Role::Threshold, 0.65)
            }
            ParamValue::Float(v) if *v > 0.0 && *v < 1.0 && has_ratio_sibling(candidate, context) => {
                confident(Role::Threshold, 0.6)
            }
            ParamValue::Int(v) if (2..=400).contains(v) => confident(Role::Config, 0.45),
            _ => Verdict::Pass,
        }
    }
}

/// Terminal stage: present but unexplained
pub struct UnknownFallback;

impl ClassifierStage for UnknownFallback {
    fn name(&self) -> &'static str {
        "unknown_fallback"
    }

    fn judge(&self, _candidate: &ExtractedParameter, _context: &ClassifyContext<'_>) -> Verdict {
        Verdict::Confident {
            role: Role::Unknown,
            confidence: UNKNOWN_CONFIDENCE_CAP,
        }
    }
}

/// Ordered chain of stages
pub struct Classifier {
    stages: Vec<Box<dyn ClassifierStage>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            stages: vec![
                Box::new(RuleTable),
                Box::new(ValueHeuristic),
                Box::new(UnknownFallback),
            ],
        }
    }
}

impl Classifier {
    /// Chain with custom stages; an unknown fallback is appended
    #[must_use]
    pub fn with_stages(mut stages: Vec<Box<dyn ClassifierStage>>) -> Self {
        stages.push(Box::new(UnknownFallback));
        Self { stages }
    }

    /// Copy of `candidate` with role and confidence set
    #[must_use]
    pub fn classify(
        &self,
        candidate: &ExtractedParameter,
        context: &ClassifyContext<'_>,
    ) -> ExtractedParameter {
        let (stage, role, verdict_confidence) = self
            .stages
            .iter()
            .find_map(|stage| match stage.judge(candidate, context) {
                Verdict::Confident { role, confidence } => Some((stage.name(), role, confidence)),
                Verdict::Pass => None,
            })
            .unwrap_or(("none", Role::Unknown, UNKNOWN_CONFIDENCE_CAP));

        let mut confidence =
            EXTRACTION_WEIGHT * candidate.confidence + VERDICT_WEIGHT * verdict_confidence;
        if role == Role::Unknown {
            confidence = confidence.min(UNKNOWN_CONFIDENCE_CAP);
        }

        log::trace!(
            "{} classified as {} by {stage} ({confidence:.2})",
            candidate.name,
            role.as_str()
        );

        let mut classified = candidate.clone();
        classified.role = role;
        classified.confidence = confidence.clamp(0.0, 1.0);
        classified
    }

    /// Classify every list; siblings are all candidates of the namespace
    #[must_use]
    pub fn classify_all(
        &self,
        lists: &[Vec<ExtractedParameter>],
        scope: &SourceScope<'_>,
    ) -> Vec<Vec<ExtractedParameter>> {
        let siblings: Vec<ExtractedParameter> = lists.iter().flatten().cloned().collect();
        let context = ClassifyContext::from_scope(scope, &siblings);
        lists
            .iter()
            .map(|list| list.iter().map(|c| self.classify(c, &context)).collect())
            .collect()
    }
}

/// Classify a single candidate with no surrounding context
#[must_use]
pub fn classify(candidate: &ExtractedParameter) -> ExtractedParameter {
    Classifier::default().classify(candidate, &ClassifyContext::default())
}

/// Lowercase tokens split on `_` and camelCase humps
pub(crate) fn name_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for part in name.split(|c: char| c == '_' || c.is_ascii_digit()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in part.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(std::mem::take(&mut current).to_lowercase());
            }
            prev_lower = c.is_lowercase();
            current.push(c);
        }
        if !current.is_empty() {
            tokens.push(current.to_lowercase());
        }
    }
    tokens
}

fn has_ratio_sibling(candidate: &ExtractedParameter, context: &ClassifyContext<'_>) -> bool {
    context
        .siblings
        .iter()
        .filter(|s| s.name != candidate.name)
        .any(|s| {
            name_tokens(&s.name)
                .iter()
                .any(|t| RATIO_WORDS.contains(&t.as_str()))
                || matches!(s.value, ParamValue::Float(v) if v > 0.0 && v < 1.0)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExtractionMethod, Namespace};
    use pretty_assertions::assert_eq;

    fn candidate(name: &str, value: ParamValue, confidence: f64) -> ExtractedParameter {
        ExtractedParameter::new(
            Namespace::new("gap"),
            name,
            "raw",
            value,
            1,
            "",
            ExtractionMethod::AstStructural,
            confidence,
        )
    }

    #[test]
    fn test_name_tokens() {
        assert_eq!(name_tokens("PRICE_MIN"), vec!["price", "min"]);
        assert_eq!(name_tokens("minPrice"), vec!["min", "price"]);
        assert_eq!(name_tokens("rsi14Upper"), vec!["rsi", "upper"]);
    }

    #[test]
    fn test_rule_table_order() {
        let c = classify(&candidate("VOLUME_MIN", ParamValue::Int(100), 0.9));
        assert_eq!(c.role, Role::Threshold);
        assert!((c.confidence - (0.6 * 0.9 + 0.4 * 0.95)).abs() < 1e-9);

        let c = classify(&candidate("use_premarket", ParamValue::Bool(true), 0.7));
        assert_eq!(c.role, Role::Config);

        let c = classify(&candidate("sector", ParamValue::Str("tech".into()), 0.7));
        assert_eq!(c.role, Role::Filter);
    }

    #[test]
    fn test_value_heuristics() {
        let c = classify(&candidate("verbose", ParamValue::Bool(false), 0.7));
        assert_eq!(c.role, Role::Config);

        let siblings = vec![candidate("body_ratio", ParamValue::Float(0.7), 0.7)];
        let context = ClassifyContext::new(&siblings);
        let c = Classifier::default().classify(&candidate("alpha", ParamValue::Float(0.25), 0.7), &context);
        assert_eq!(c.role, Role::Threshold);

        let mut context = ClassifyContext::default();
        context.compared.insert("hurdle".to_string());
        let c = Classifier::default().classify(&candidate("hurdle", ParamValue::Int(3), 0.7), &context);
        assert_eq!(c.role, Role::Threshold);
    }

    #[test]
    fn test_unknown_is_capped() {
        let c = classify(&candidate("foo", ParamValue::Float(12345.0), 0.9));
        assert_eq!(c.role, Role::Unknown);
        assert!(c.confidence <= UNKNOWN_CONFIDENCE_CAP);
    }

    #[test]
    fn test_blend_keeps_extractor_order() {
        let block = classify(&ExtractedParameter {
            extraction_method: ExtractionMethod::ConfigBlock,
            ..candidate("GAP_MIN", ParamValue::Float(0.04), 0.9)
        });
        let ast = classify(&candidate("GAP_MIN", ParamValue::Float(0.04), 0.8));
        assert!(block.confidence > ast.confidence);
    }
}
