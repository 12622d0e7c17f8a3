use tree_sitter::Node;

use super::{is_upper_case, line_of, simple_assignment, ParameterExtractor};
use crate::literal::literal_value;
use crate::source::SourceScope;
use crate::types::{ExtractedParameter, ExtractionMethod, Namespace};

const ASSIGNMENT: f64 = 0.7;
const CONSTANT: f64 = 0.8;
const DEFAULT_PARAMETER: f64 = 0.75;
const KEYWORD_ARGUMENT: f64 = 0.65;
const DICTIONARY_ENTRY: f64 = 0.6;

/// Literal assignments, parameter defaults, keyword arguments and dict entries
pub struct AstExtractor;

impl ParameterExtractor for AstExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::AstStructural
    }

    fn extract_scope(
        &self,
        scope: &SourceScope<'_>,
        namespace: &Namespace,
    ) -> Vec<ExtractedParameter> {
        let kinds = [
            "assignment",
            "default_parameter",
            "typed_default_parameter",
            "keyword_argument",
            "pair",
        ];
        scope
            .nodes(&kinds)
            .into_iter()
            .filter_map(|node| {
                let (name, value, confidence) = match node.kind() {
                    "assignment" => {
                        let (name, value) = simple_assignment(scope, node)?;
                        let confidence = if is_upper_case(name) {
                            CONSTANT
                        } else {
                            ASSIGNMENT
                        };
                        (name.to_string(), value, confidence)
                    }
                    "default_parameter" | "typed_default_parameter" => {
                        let name = node.child_by_field_name("name")?;
                        let value = node.child_by_field_name("value")?;
                        (scope.text(name).to_string(), value, DEFAULT_PARAMETER)
                    }
                    "keyword_argument" => {
                        let name = node.child_by_field_name("name")?;
                        let value = node.child_by_field_name("value")?;
                        (scope.text(name).to_string(), value, KEYWORD_ARGUMENT)
                    }
                    "pair" => {
                        let key = node.child_by_field_name("key")?;
                        let value = node.child_by_field_name("value")?;
                        (dictionary_key(scope, key)?, value, DICTIONARY_ENTRY)
                    }
                    _ => return None,
                };
                candidate(scope, namespace, node, name, value, confidence)
            })
            .collect()
    }
}

fn candidate<'a>(
    scope: &SourceScope<'a>,
    namespace: &Namespace,
    node: Node<'a>,
    name: String,
    value: Node<'a>,
    confidence: f64,
) -> Option<ExtractedParameter> {
    if name.is_empty() {
        return None;
    }
    let parsed = literal_value(value, &|n| scope.text(n))?;
    let line = line_of(node);
    Some(ExtractedParameter::new(
        namespace.clone(),
        name,
        scope.text(value),
        parsed,
        line,
        scope.snippet(line),
        ExtractionMethod::AstStructural,
        confidence,
    ))
}

/// Plain string key of a dictionary entry
fn dictionary_key<'a>(scope: &SourceScope<'a>, key: Node<'a>) -> Option<String> {
    match literal_value(key, &|n| scope.text(n))? {
        crate::types::ParamValue::Str(text) if !text.trim().is_empty() => Some(text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse;
    use crate::types::{InferredType, LineSpan, ParamValue};
    use pretty_assertions::assert_eq;

    const CODE: &str = r#"PRICE_MIN = 5.0
lookback = 20
label: str = "gap"
ratio = price / volume

def scan(df, min_gap=0.03, *, top: int = 10):
    hits = df.rolling(window=14).mean()
    weights = {"rsi": 0.4, "volume": 0.6, 3: 1}
    return hits
"#;

    fn extract(code: &str, span: LineSpan) -> Vec<ExtractedParameter> {
        let doc = parse(code).unwrap();
        AstExtractor.extract_scope(&doc.scope(span), &Namespace::new("gap"))
    }

    #[test]
    fn test_extracts_literal_sources() {
        let params = extract(CODE, LineSpan::new(1, 9));
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["PRICE_MIN", "lookback", "label", "min_gap", "top", "window", "rsi", "volume"]
        );

        let price = &params[0];
        assert_eq!(price.value, ParamValue::Float(5.0));
        assert_eq!(price.confidence, CONSTANT);
        assert_eq!(price.source_line, 1);
        assert_eq!(price.context_snippet, "PRICE_MIN = 5.0");

        let label = &params[2];
        assert_eq!(label.inferred_type, InferredType::Str);
        assert_eq!(label.raw_value, "\"gap\"");

        assert_eq!(params[3].confidence, DEFAULT_PARAMETER);
        assert_eq!(params[5].confidence, KEYWORD_ARGUMENT);
        assert_eq!(params[6].confidence, DICTIONARY_ENTRY);
        assert!(params.iter().all(|p| p.namespace.as_str() == "gap"));
    }

    #[test]
    fn test_scope_is_respected() {
        let params = extract(CODE, LineSpan::new(6, 9));
        assert!(params.iter().all(|p| p.source_line >= 6));
        assert!(!params.iter().any(|p| p.name == "PRICE_MIN"));
    }
}
