use std::collections::BTreeSet;
use tree_sitter::Node;

use super::{BoundaryCandidate, BoundarySignal};
use crate::literal::is_literal;
use crate::source::{IdentKind, SourceDocument};
use crate::types::{DetectionMethod, LineSpan};

/// Names too common in scanner code to say anything about cohesion
const STOP_WORDS: &[&str] = &[
    "self", "cls", "df", "data", "pd", "np", "print", "len", "range", "int", "float", "str",
    "bool", "list", "dict", "set", "tuple", "min", "max", "abs", "round", "sum", "sorted",
    "enumerate", "zip", "isinstance", "return",
];

/// Cohesion drops between contiguous top-level blocks
pub struct SemanticSignal {
    split_threshold: f64,
}

#[derive(Debug, Clone)]
struct Block {
    span: LineSpan,
    ids: BTreeSet<String>,
    logic: bool,
}

#[derive(Debug, Clone)]
struct Segment {
    span: LineSpan,
    ids: BTreeSet<String>,
    logic: bool,
    left_drop: f64,
    right_drop: f64,
}

impl SemanticSignal {
    #[must_use]
    pub const fn new(split_threshold: f64) -> Self {
        Self { split_threshold }
    }

    fn segments(&self, doc: &SourceDocument) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();
        for block in blocks(doc) {
            if let Some(current) = segments.last_mut() {
                let similarity = overlap_coefficient(&current.ids, &block.ids);
                if similarity >= self.split_threshold {
                    current.span = current.span.union(&block.span);
                    current.ids.extend(block.ids);
                    current.logic |= block.logic;
                    continue;
                }
                let drop = 1.0 - similarity;
                current.right_drop = drop;
                segments.push(Segment {
                    span: block.span,
                    ids: block.ids,
                    logic: block.logic,
                    left_drop: drop,
                    right_drop: 1.0,
                });
            } else {
                segments.push(Segment {
                    span: block.span,
                    ids: block.ids,
                    logic: block.logic,
                    left_drop: 1.0,
                    right_drop: 1.0,
                });
            }
        }
        segments
    }

    /// Largest cohesion drop between two logic-bearing segments (0 when cohesive)
    #[must_use]
    pub fn max_logic_drop(&self, doc: &SourceDocument) -> f64 {
        let segments = self.segments(doc);
        segments
            .iter()
            .filter(|s| s.logic)
            .skip(1)
            .map(|s| s.left_drop)
            .fold(0.0, f64::max)
    }
}

impl BoundarySignal for SemanticSignal {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Semantic
    }

    fn propose(&self, doc: &SourceDocument) -> Vec<BoundaryCandidate> {
        self.segments(doc)
            .into_iter()
            .filter(|s| s.logic)
            .map(|s| {
                BoundaryCandidate::new(
                    DetectionMethod::Semantic,
                    s.span,
                    (s.left_drop + s.right_drop) / 2.0,
                )
            })
            .collect()
    }
}

/// `|A ∩ B| / min(|A|, |B|)`; an empty side gives no evidence for a split
pub(crate) fn overlap_coefficient(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    shared as f64 / smaller as f64
}

fn blocks(doc: &SourceDocument) -> Vec<Block> {
    let lines = doc.lines();
    let main_guard = doc.main_guard_line();
    let mut out: Vec<Block> = Vec::new();
    let mut prev: Option<(LineSpan, bool)> = None;

    for node in doc.top_level_nodes() {
        let span = SourceDocument::node_span(node);
        // The runner block belongs to no scanner
        if main_guard.is_some_and(|guard| span.start >= guard) {
            break;
        }
        let is_def = is_definition(node);
        let logic = is_logic(doc, node);

        let breaks = match prev {
            None => true,
            Some((prev_span, prev_def)) => {
                is_def
                    || prev_def
                    || (prev_span.end + 1..span.start)
                        .any(|l| lines.is_blank(l) || lines.is_comment(l))
            }
        };

        let ids: BTreeSet<String> = lines
            .identifiers_in(span)
            .filter(|i| matches!(i.kind, IdentKind::Use | IdentKind::Binding))
            .map(|i| i.name.clone())
            .filter(|name| !STOP_WORDS.contains(&name.as_str()))
            .collect();

        match out.last_mut() {
            Some(block) if !breaks => {
                block.span = block.span.union(&span);
                block.ids.extend(ids);
                block.logic |= logic;
            }
            _ => out.push(Block { span, ids, logic }),
        }
        prev = Some((span, is_def));
    }

    out
}

fn is_definition(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "function_definition" | "class_definition" | "decorated_definition"
    )
}

/// Definitions and non-literal statements carry scanner logic; imports,
/// docstrings and literal constants do not
fn is_logic<'a>(doc: &'a SourceDocument, node: Node<'a>) -> bool {
    match node.kind() {
        "function_definition" | "class_definition" | "decorated_definition" => true,
        "import_statement" | "import_from_statement" | "future_import_statement" => false,
        "expression_statement" => {
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
            !children.iter().all(|child| match child.kind() {
                "string" => true,
                "assignment" => child
                    .child_by_field_name("right")
                    .is_some_and(|rhs| is_literal(rhs, &|n| doc.node_text(n))),
                _ => false,
            })
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse;

    const TWO_SCANNERS: &str = r#"import pandas as pd

GAP_MIN = 0.04
GAP_MAX = 0.2

def gap_scan(df):
    gap = df.open / df.prev_close - 1
    return df[(gap > GAP_MIN) & (gap < GAP_MAX)]

RVOL_MIN = 3.0

def rvol_scan(df):
    rvol = df.volume / df.avg_volume
    return df[rvol > RVOL_MIN]
"#;

    #[test]
    fn test_overlap_coefficient() {
        let a: BTreeSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let b: BTreeSet<String> = ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
        let c: BTreeSet<String> = ["q"].iter().map(|s| s.to_string()).collect();
        assert!((overlap_coefficient(&a, &b) - 1.0).abs() < 1e-9);
        assert_eq!(overlap_coefficient(&a, &c), 0.0);
        assert_eq!(overlap_coefficient(&a, &BTreeSet::new()), 1.0);
    }

    #[test]
    fn test_segments_split_between_scanners() {
        let doc = parse(TWO_SCANNERS).unwrap();
        let candidates = SemanticSignal::new(0.2).propose(&doc);
        let spans: Vec<LineSpan> = candidates.iter().map(|c| c.span).collect();
        assert_eq!(spans, vec![LineSpan::new(3, 8), LineSpan::new(10, 14)]);
        assert!(candidates.iter().all(|c| c.confidence > 0.9));
    }

    #[test]
    fn test_single_cohesive_script_has_no_drop() {
        let code = "price_min = 5.0\nhits = universe[universe.close > price_min]\n";
        let doc = parse(code).unwrap();
        assert_eq!(SemanticSignal::new(0.2).max_logic_drop(&doc), 0.0);
    }
}
