use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tree_sitter::Node;

use super::{line_of, simple_assignment, ParameterExtractor};
use crate::literal::literal_value;
use crate::source::SourceScope;
use crate::types::{ExtractedParameter, ExtractionMethod, Namespace, ParamValue};

const COMPARISON: f64 = 0.5;
const INDICATOR_PERIOD: f64 = 0.45;
const VOCABULARY_ASSIGNMENT: f64 = 0.55;

static TRADING_VOCABULARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(price|volume|gap|atr|volatility|rsi|sma|ema|vwap|float|market_?cap|mcap|change|pct|percent|ratio|rvol|spread|range)",
    )
    .expect("valid trading vocabulary regex")
});

const INDICATOR_CALLS: &[&str] = &[
    "rolling",
    "ewm",
    "atr",
    "rsi",
    "sma",
    "ema",
    "shift",
    "pct_change",
];

/// Trading-vocabulary idioms the structural extractor cannot see:
/// thresholds inside comparisons and indicator periods inside calls
pub struct PatternExtractor;

impl ParameterExtractor for PatternExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Pattern
    }

    fn extract_scope(
        &self,
        scope: &SourceScope<'_>,
        namespace: &Namespace,
    ) -> Vec<ExtractedParameter> {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        let mut out = Vec::new();

        for node in scope.nodes(&["comparison_operator", "call", "assignment"]) {
            let found = match node.kind() {
                "comparison_operator" => comparison(scope, node),
                "call" => indicator_period(scope, node),
                "assignment" => vocabulary_assignment(scope, node),
                _ => None,
            };
            let Some((base, value, confidence)) = found else {
                continue;
            };

            let Some(parsed) = literal_value(value, &|n| scope.text(n)) else {
                continue;
            };
            let count = seen.entry(base.clone()).or_default();
            *count += 1;
            let name = if *count == 1 {
                base
            } else {
                format!("{base}_{count}")
            };

            let line = line_of(node);
            out.push(ExtractedParameter::new(
                namespace.clone(),
                name,
                scope.text(value),
                parsed,
                line,
                scope.snippet(line),
                ExtractionMethod::Pattern,
                confidence,
            ));
        }

        out
    }
}

/// `price > 5` → `price_min`, `5 > price` → `price_max`
fn comparison<'a>(scope: &SourceScope<'a>, node: Node<'a>) -> Option<(String, Node<'a>, f64)> {
    let mut cursor = node.walk();
    let operands: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
    let [left, right] = operands.as_slice() else {
        return None;
    };
    let mut cursor = node.walk();
    let operator = node
        .children_by_field_name("operators", &mut cursor)
        .next()
        .map(|op| scope.text(op))?;

    let (subject, literal, subject_first) = if is_number(scope, *right) {
        (*left, *right, true)
    } else if is_number(scope, *left) {
        (*right, *left, false)
    } else {
        return None;
    };

    let name = subject_name(scope, subject)?;
    if !TRADING_VOCABULARY.is_match(&name) {
        return None;
    }

    let lower_bound = match operator {
        ">" | ">=" => subject_first,
        "<" | "<=" => !subject_first,
        _ => return None,
    };
    let suffix = if lower_bound { "min" } else { "max" };
    Some((format!("{}_{suffix}", name.to_lowercase()), literal, COMPARISON))
}

/// `df.close.rolling(20)` → `rolling_period`
fn indicator_period<'a>(scope: &SourceScope<'a>, node: Node<'a>) -> Option<(String, Node<'a>, f64)> {
    let function = node.child_by_field_name("function")?;
    let callee = match function.kind() {
        "identifier" => scope.text(function),
        "attribute" => function
            .child_by_field_name("attribute")
            .map(|n| scope.text(n))?,
        _ => return None,
    };
    let callee = callee.to_lowercase();
    if !INDICATOR_CALLS.contains(&callee.as_str()) {
        return None;
    }

    let arguments = node.child_by_field_name("arguments")?;
    let mut cursor = arguments.walk();
    let period = arguments
        .named_children(&mut cursor)
        .filter(|arg| arg.kind() != "keyword_argument")
        .find(|arg| is_number(scope, *arg))?;
    Some((format!("{callee}_period"), period, INDICATOR_PERIOD))
}

fn vocabulary_assignment<'a>(
    scope: &SourceScope<'a>,
    node: Node<'a>,
) -> Option<(String, Node<'a>, f64)> {
    let (name, value) = simple_assignment(scope, node)?;
    if !TRADING_VOCABULARY.is_match(name) {
        return None;
    }
    Some((name.to_string(), value, VOCABULARY_ASSIGNMENT))
}

fn is_number<'a>(scope: &SourceScope<'a>, node: Node<'a>) -> bool {
    matches!(
        literal_value(node, &|n| scope.text(n)),
        Some(ParamValue::Int(_) | ParamValue::Float(_))
    )
}

/// Identifier, attribute name, or string subscript key being compared
fn subject_name<'a>(scope: &SourceScope<'a>, node: Node<'a>) -> Option<String> {
    match node.kind() {
        "identifier" => Some(scope.text(node).to_string()),
        "attribute" => node
            .child_by_field_name("attribute")
            .map(|n| scope.text(n).to_string()),
        "subscript" => {
            let key = node.child_by_field_name("subscript")?;
            match literal_value(key, &|n| scope.text(n))? {
                ParamValue::Str(text) => Some(text.trim().replace(' ', "_")),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse;
    use crate::types::LineSpan;
    use pretty_assertions::assert_eq;

    const CODE: &str = r#"def gap_scan(df):
    hits = df[(df.close > 5) & (df["volume"] >= 500_000)]
    hits = hits[hits.gap < 0.3]
    hits = hits[0.5 < hits.rvol]
    sma = df.close.rolling(20).mean()
    slow = df.close.rolling(window=50).mean()
    spread_limit = 0.02
    return hits[hits.close > 10]
"#;

    fn names(code: &str) -> Vec<(String, String)> {
        let doc = parse(code).unwrap();
        let span = doc.full_span().unwrap();
        PatternExtractor
            .extract_scope(&doc.scope(span), &Namespace::new("gap"))
            .into_iter()
            .map(|p| (p.name, p.raw_value))
            .collect()
    }

    #[test]
    fn test_comparison_and_indicator_patterns() {
        let found = names(CODE);
        let expected: Vec<(String, String)> = [
            ("volume_min", "500_000"),
            ("gap_max", "0.3"),
            ("rvol_min", "0.5"),
            ("rolling_period", "20"),
            ("spread_limit", "0.02"),
        ]
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_repeated_names_get_suffixes() {
        let code = "a = x[x.price > 5]\nb = x[x.price > 10]\n";
        let found = names(code);
        assert_eq!(found[0].0, "price_min");
        assert_eq!(found[1].0, "price_min_2");
    }

    #[test]
    fn test_non_vocabulary_names_are_ignored() {
        let doc = parse("if count > 3:\n    pass\n").unwrap();
        let found = PatternExtractor.extract_scope(
            &doc.scope(LineSpan::new(1, 2)),
            &Namespace::new("x"),
        );
        assert!(found.is_empty());
    }
}
