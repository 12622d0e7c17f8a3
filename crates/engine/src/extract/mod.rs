//! Parameter Extractors.
//!
//! Every extractor sees a [`SourceScope`] and nothing else, so a candidate
//! can only come from lines inside the boundary it is tagged with.

mod ast;
mod config_block;
mod pattern;

pub use ast::AstExtractor;
pub use config_block::ConfigBlockExtractor;
pub use pattern::PatternExtractor;

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use crate::config::EngineOptions;
use crate::source::{SourceDocument, SourceScope};
use crate::types::{ExtractedParameter, ExtractionMethod, Namespace, ScannerBoundary};

static UPPER_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^_*[A-Z][A-Z0-9_]*$").expect("valid upper-case regex"));

/// Common contract of all extraction strategies
pub trait ParameterExtractor: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// Candidates found inside `scope`, tagged with `namespace`
    fn extract_scope(&self, scope: &SourceScope<'_>, namespace: &Namespace)
        -> Vec<ExtractedParameter>;

    /// Candidates inside `boundary`'s line range
    fn extract(&self, doc: &SourceDocument, boundary: &ScannerBoundary) -> Vec<ExtractedParameter> {
        self.extract_scope(&doc.scope(boundary.span()), &boundary.namespace)
    }
}

/// Extractors in a fixed order
#[must_use]
pub fn extractors(options: &EngineOptions) -> Vec<Box<dyn ParameterExtractor>> {
    vec![
        Box::new(ConfigBlockExtractor::new(options.min_config_block_len)),
        Box::new(AstExtractor),
        Box::new(PatternExtractor),
    ]
}

/// One candidate list per extractor for `scope`
pub fn extract_all(
    extractors: &[Box<dyn ParameterExtractor>],
    scope: &SourceScope<'_>,
    namespace: &Namespace,
) -> Vec<Vec<ExtractedParameter>> {
    extractors
        .iter()
        .map(|extractor| {
            let found = extractor.extract_scope(scope, namespace);
            log::debug!(
                "{}: {} candidates in {} ({})",
                extractor.method().as_str(),
                found.len(),
                namespace,
                scope.span()
            );
            found
        })
        .collect()
}

pub(crate) fn is_upper_case(name: &str) -> bool {
    UPPER_CASE.is_match(name)
}

/// `(name, value)` of a single-target assignment, e.g. `X = 1` or `X: int = 1`
pub(crate) fn simple_assignment<'a>(
    scope: &SourceScope<'a>,
    assignment: Node<'a>,
) -> Option<(&'a str, Node<'a>)> {
    let left = assignment.child_by_field_name("left")?;
    if left.kind() != "identifier" {
        return None;
    }
    let right = assignment.child_by_field_name("right")?;
    Some((scope.text(left), right))
}

/// 1-based start line of a node
pub(crate) fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_case_names() {
        assert!(is_upper_case("PRICE_MIN"));
        assert!(is_upper_case("_API_KEY"));
        assert!(is_upper_case("RSI14"));
        assert!(!is_upper_case("price_min"));
        assert!(!is_upper_case("Price"));
        assert!(!is_upper_case("_"));
    }

    #[test]
    fn test_extractor_order() {
        let methods: Vec<ExtractionMethod> = extractors(&EngineOptions::default())
            .iter()
            .map(|e| e.method())
            .collect();
        assert_eq!(
            methods,
            vec![
                ExtractionMethod::ConfigBlock,
                ExtractionMethod::AstStructural,
                ExtractionMethod::Pattern
            ]
        );
    }
}
