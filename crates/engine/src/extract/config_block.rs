use tree_sitter::Node;

use super::{is_upper_case, line_of, ParameterExtractor};
use crate::literal::literal_value;
use crate::source::SourceScope;
use crate::types::{ExtractedParameter, ExtractionMethod, Namespace, ParamValue};

const BLOCK_CONFIDENCE: f64 = 0.9;

/// Runs of consecutive UPPER_CASE assignments, extracted as a batch
pub struct ConfigBlockExtractor {
    min_len: usize,
}

impl ConfigBlockExtractor {
    #[must_use]
    pub const fn new(min_len: usize) -> Self {
        Self { min_len }
    }
}

impl ParameterExtractor for ConfigBlockExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::ConfigBlock
    }

    fn extract_scope(
        &self,
        scope: &SourceScope<'_>,
        namespace: &Namespace,
    ) -> Vec<ExtractedParameter> {
        let mut runs: Vec<Vec<(Node<'_>, &str, Node<'_>)>> = Vec::new();
        let mut current: Vec<(Node<'_>, &str, Node<'_>)> = Vec::new();

        for statement in scope.nodes(&["expression_statement"]) {
            let Some((name, value)) = constant_assignment(scope, statement) else {
                continue;
            };
            let continues = current
                .last()
                .and_then(|(prev, _, _)| next_statement(*prev))
                .is_some_and(|next| next.id() == statement.id());
            if !continues && !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
            current.push((statement, name, value));
        }
        if !current.is_empty() {
            runs.push(current);
        }

        runs.into_iter()
            .filter(|run| run.len() >= self.min_len)
            .flatten()
            .map(|(statement, name, value)| {
                let raw = scope.text(value);
                let parsed = literal_value(value, &|n| scope.text(n))
                    .unwrap_or_else(|| ParamValue::Expression(raw.to_string()));
                let line = line_of(statement);
                ExtractedParameter::new(
                    namespace.clone(),
                    name,
                    raw,
                    parsed,
                    line,
                    scope.snippet(line),
                    ExtractionMethod::ConfigBlock,
                    BLOCK_CONFIDENCE,
                )
            })
            .collect()
    }
}

/// `NAME = value` as the only expression in a statement
fn constant_assignment<'a>(
    scope: &SourceScope<'a>,
    statement: Node<'a>,
) -> Option<(&'a str, Node<'a>)> {
    if statement.named_child_count() != 1 {
        return None;
    }
    let assignment = statement.named_child(0)?;
    if assignment.kind() != "assignment" {
        return None;
    }
    let (name, value) = super::simple_assignment(scope, assignment)?;
    is_upper_case(name).then_some((name, value))
}

/// Next sibling statement, skipping comments
fn next_statement(node: Node<'_>) -> Option<Node<'_>> {
    let mut next = node.next_named_sibling();
    while let Some(sibling) = next {
        if sibling.kind() != "comment" {
            return Some(sibling);
        }
        next = sibling.next_named_sibling();
    }
    None
}
