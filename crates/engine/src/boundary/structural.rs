use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::{BoundaryCandidate, BoundarySignal};
use crate::source::SourceDocument;
use crate::types::DetectionMethod;

static ENTRY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(scan|screen|signal|strateg|run|detect|filter|find|setup|main|generate)")
        .expect("valid entry-name regex")
});

/// Top-level function/class definitions as boundary candidates
pub struct StructuralSignal;

/// Completeness of a definition
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DefinitionShape {
    pub score: f64,
    /// Recognizable entry point (returns + entry-like name)
    pub entry: bool,
}

impl BoundarySignal for StructuralSignal {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Structural
    }

    fn propose(&self, doc: &SourceDocument) -> Vec<BoundaryCandidate> {
        doc.top_level_nodes()
            .into_iter()
            .filter_map(|node| {
                let def = match node.kind() {
                    "decorated_definition" => node.child_by_field_name("definition")?,
                    "function_definition" | "class_definition" => node,
                    _ => return None,
                };
                let name = def
                    .child_by_field_name("name")
                    .map(|n| doc.node_text(n).to_string());
                let shape = match def.kind() {
                    "function_definition" => function_shape(doc, def, name.as_deref()),
                    "class_definition" => class_shape(doc, def),
                    _ => return None,
                };
                let mut candidate = BoundaryCandidate::new(
                    DetectionMethod::Structural,
                    SourceDocument::node_span(node),
                    shape.score,
                );
                candidate.name = name;
                candidate.entry_shaped = shape.entry;
                Some(candidate)
            })
            .collect()
    }
}

fn is_entry_name(name: &str) -> bool {
    ENTRY_NAME.is_match(name)
}

fn function_shape(doc: &SourceDocument, def: Node<'_>, name: Option<&str>) -> DefinitionShape {
    let returns = def
        .child_by_field_name("body")
        .is_some_and(contains_return);
    let entry_name = name.is_some_and(is_entry_name);
    let has_params = def.child_by_field_name("parameters").is_some_and(|params| {
        let mut cursor = params.walk();
        let any = params
            .named_children(&mut cursor)
            .any(|p| !matches!(doc.node_text(p), "self" | "cls"));
        any
    });

    let mut score = 0.4;
    if returns {
        score += 0.3;
    }
    if entry_name {
        score += 0.2;
    }
    if has_params {
        score += 0.1;
    }
    DefinitionShape {
        score: f64::min(score, 1.0),
        entry: returns && entry_name,
    }
}

fn class_shape(doc: &SourceDocument, def: Node<'_>) -> DefinitionShape {
    let Some(body) = def.child_by_field_name("body") else {
        return DefinitionShape {
            score: 0.4,
            entry: false,
        };
    };

    let mut entry_method = false;
    let mut has_state = false;
    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        let member = if member.kind() == "decorated_definition" {
            match member.child_by_field_name("definition") {
                Some(inner) => inner,
                None => continue,
            }
        } else {
            member
        };
        match member.kind() {
            "function_definition" => {
                let name = member
                    .child_by_field_name("name")
                    .map(|n| doc.node_text(n))
                    .unwrap_or_default();
                if name == "__init__" {
                    has_state = true;
                } else if name == "__call__" || is_entry_name(name) {
                    entry_method = true;
                }
            }
            "expression_statement" => {
                let mut inner = member.walk();
                if member
                    .named_children(&mut inner)
                    .any(|c| c.kind() == "assignment")
                {
                    has_state = true;
                }
            }
            _ => {}
        }
    }

    let mut score = 0.4;
    if entry_method {
        score += 0.4;
    }
    if has_state {
        score += 0.2;
    }
    DefinitionShape {
        score: f64::min(score, 1.0),
        entry: entry_method,
    }
}

/// `return`/`yield` in a body, ignoring nested definitions
fn contains_return(body: Node<'_>) -> bool {
    let mut stack = vec![body];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "return_statement" | "yield" => return true,
            "function_definition" | "class_definition" | "lambda" if node.id() != body.id() => {
                continue
            }
            _ => {}
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse;

    #[test]
    fn test_entry_shaped_function() {
        let doc = parse("def gap_scan(df, min_gap=0.03):\n    return df\n").unwrap();
        let candidates = StructuralSignal.propose(&doc);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].entry_shaped);
        assert!((candidates[0].confidence - 1.0).abs() < 1e-9);
        assert_eq!(candidates[0].name.as_deref(), Some("gap_scan"));
    }

    #[test]
    fn test_helper_is_not_entry_shaped() {
        let doc = parse("def load(path):\n    return path\n\ndef log_it():\n    pass\n").unwrap();
        let candidates = StructuralSignal.propose(&doc);
        assert_eq!(candidates.len(), 2);
        assert!(!candidates[0].entry_shaped);
        assert!((candidates[0].confidence - 0.8).abs() < 1e-9);
        assert!((candidates[1].confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_class_with_scan_method() {
        let code = "class GapScanner:\n    PRICE_MIN = 5\n\n    def scan(self, df):\n        return df\n";
        let doc = parse(code).unwrap();
        let candidates = StructuralSignal.propose(&doc);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].entry_shaped);
        assert_eq!(candidates[0].span.start, 1);
        assert_eq!(candidates[0].span.end, 5);
    }

    #[test]
    fn test_decorated_definition_includes_decorator() {
        let doc = parse("@register\ndef run_scan(df):\n    return df\n").unwrap();
        let candidates = StructuralSignal.propose(&doc);
        assert_eq!(candidates[0].span.start, 1);
        assert_eq!(candidates[0].name.as_deref(), Some("run_scan"));
    }
}
