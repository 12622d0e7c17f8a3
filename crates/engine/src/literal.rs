use tree_sitter::Node;

use crate::types::ParamValue;

/// Parse a Python literal node. `text_of` yields the source text of a node.
///
/// Returns `None` for anything that is not a plain literal (f-strings,
/// concatenations, names, calls, complex numbers).
pub(crate) fn literal_value<'a, F>(node: Node<'a>, text_of: &F) -> Option<ParamValue>
where
    F: Fn(Node<'a>) -> &'a str,
{
    match node.kind() {
        "integer" => parse_int(text_of(node)),
        "float" => parse_float(text_of(node)).map(ParamValue::Float),
        "true" => Some(ParamValue::Bool(true)),
        "false" => Some(ParamValue::Bool(false)),
        "none" => Some(ParamValue::None),
        "string" => string_value(node, text_of).map(ParamValue::Str),
        "unary_operator" => {
            let operator = node.child_by_field_name("operator").map(text_of)?;
            let argument = node.child_by_field_name("argument")?;
            match (operator, literal_value(argument, text_of)?) {
                ("-", ParamValue::Int(v)) => Some(ParamValue::Int(-v)),
                ("-", ParamValue::Float(v)) => Some(ParamValue::Float(-v)),
                ("+", value @ (ParamValue::Int(_) | ParamValue::Float(_))) => Some(value),
                _ => None,
            }
        }
        "parenthesized_expression" => {
            let mut cursor = node.walk();
            let inner: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
            match inner.as_slice() {
                [only] => literal_value(*only, text_of),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Whether the node is a plain literal
pub(crate) fn is_literal<'a, F>(node: Node<'a>, text_of: &F) -> bool
where
    F: Fn(Node<'a>) -> &'a str,
{
    literal_value(node, text_of).is_some()
}

fn parse_int(text: &str) -> Option<ParamValue> {
    let cleaned = text.replace('_', "").to_ascii_lowercase();
    if cleaned.ends_with('j') {
        return None;
    }
    let parsed = if let Some(hex) = cleaned.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = cleaned.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = cleaned.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else {
        cleaned.parse::<i64>().ok()
    };
    match parsed {
        Some(v) => Some(ParamValue::Int(v)),
        // Out of i64 range: keep the magnitude as a float
        None => cleaned.parse::<f64>().ok().map(ParamValue::Float),
    }
}

fn parse_float(text: &str) -> Option<f64> {
    let cleaned = text.replace('_', "");
    if cleaned.ends_with(['j', 'J']) {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn string_value<'a, F>(node: Node<'a>, text_of: &F) -> Option<String>
where
    F: Fn(Node<'a>) -> &'a str,
{
    let mut cursor = node.walk();
    let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
    if children.iter().any(|c| c.kind() == "interpolation") {
        return None;
    }
    Some(
        children
            .iter()
            .filter(|c| c.kind() == "string_content")
            .map(|c| text_of(*c))
            .collect(),
    )
}
