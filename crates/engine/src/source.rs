//! Source Model: parsed syntax tree plus a flat line/identifier index.
//!
//! Everything downstream reads the document through [`SourceDocument`] or a
//! line-bounded [`SourceScope`]; neither exposes mutation.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tree_sitter::{Node, Parser, Tree};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{EngineError, Result};
use crate::types::LineSpan;

const SNIPPET_GRAPHEMES: usize = 120;

/// How an identifier occurrence is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentKind {
    /// Name read (a free reference unless bound locally)
    Use,
    /// Name bound by assignment, parameter, import, loop target, definition
    Binding,
    /// `obj.<name>`
    Attribute,
    /// `call(<name>=...)`
    KeywordName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identifier {
    pub name: String,
    pub line: usize,
    pub column: usize,
    pub kind: IdentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentLine {
    pub line: usize,
    pub column: usize,
    pub text: String,
}

/// Flat, 1-based line index over the document
#[derive(Debug, Clone, Default)]
pub struct LineIndex {
    lines: Vec<String>,
    identifiers: Vec<Vec<Identifier>>,
    comments: Vec<CommentLine>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let lines: Vec<String> = text
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        let identifiers = vec![Vec::new(); lines.len()];
        Self {
            lines,
            identifiers,
            comments: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Line text (1-based)
    #[must_use]
    pub fn line(&self, line: usize) -> Option<&str> {
        line.checked_sub(1)
            .and_then(|idx| self.lines.get(idx))
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_blank(&self, line: usize) -> bool {
        self.line(line).map_or(true, |l| l.trim().is_empty())
    }

    /// Whole-line comment (ignoring indentation)
    #[must_use]
    pub fn is_comment(&self, line: usize) -> bool {
        self.line(line)
            .is_some_and(|l| l.trim_start().starts_with('#'))
    }

    /// Verbatim text of a line range, newline-joined
    #[must_use]
    pub fn slice(&self, span: LineSpan) -> String {
        if span.is_empty() || span.start == 0 {
            return String::new();
        }
        let start = span.start - 1;
        let end = span.end.min(self.lines.len());
        if start >= end {
            return String::new();
        }
        self.lines[start..end].join("\n")
    }

    #[must_use]
    pub fn identifiers_on(&self, line: usize) -> &[Identifier] {
        line.checked_sub(1)
            .and_then(|idx| self.identifiers.get(idx))
            .map_or(&[], Vec::as_slice)
    }

    pub fn identifiers_in(&self, span: LineSpan) -> impl Iterator<Item = &Identifier> + '_ {
        (span.start..=span.end).flat_map(move |line| self.identifiers_on(line).iter())
    }

    /// Names read in `span` but never bound there, with their first line
    #[must_use]
    pub fn free_names(&self, span: LineSpan) -> BTreeMap<String, usize> {
        let bound: BTreeSet<&str> = self
            .identifiers_in(span)
            .filter(|i| i.kind == IdentKind::Binding)
            .map(|i| i.name.as_str())
            .collect();
        let mut free = BTreeMap::new();
        for ident in self.identifiers_in(span) {
            if ident.kind == IdentKind::Use && !bound.contains(ident.name.as_str()) {
                free.entry(ident.name.clone()).or_insert(ident.line);
            }
        }
        free
    }

    #[must_use]
    pub fn comments(&self) -> &[CommentLine] {
        &self.comments
    }

    /// Last non-blank line at or before `line`, not going above `floor`
    #[must_use]
    pub fn last_code_line(&self, floor: usize, line: usize) -> Option<usize> {
        (floor..=line.min(self.len()))
            .rev()
            .find(|&l| !self.is_blank(l))
    }

    /// Trimmed line, truncated to a bounded number of grapheme clusters
    #[must_use]
    pub fn snippet(&self, line: usize) -> String {
        let text = self.line(line).unwrap_or_default().trim();
        let mut graphemes = text.graphemes(true);
        let head: String = graphemes.by_ref().take(SNIPPET_GRAPHEMES).collect();
        if graphemes.next().is_some() {
            format!("{head}…")
        } else {
            head
        }
    }
}

/// Immutable parsed upload
pub struct SourceDocument {
    text: String,
    tree: Tree,
    lines: LineIndex,
}

impl std::fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDocument")
            .field("lines", &self.lines.len())
            .field("comments", &self.lines.comments.len())
            .finish_non_exhaustive()
    }
}

/// Parse Python source into a [`SourceDocument`]; invalid syntax is fatal
pub fn parse(text: &str) -> Result<SourceDocument> {
    SourceDocument::parse(text)
}

impl SourceDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| EngineError::tree_sitter(format!("Failed to set language: {e}")))?;

        let tree = parser
            .parse(text, None)
            .ok_or_else(|| EngineError::tree_sitter("Parser returned no tree"))?;

        if let Some(node) = first_syntax_error(tree.root_node()) {
            let pos = node.start_position();
            let message = if node.is_missing() {
                format!("missing `{}`", node.kind())
            } else {
                let fragment = node_text(text, node)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim();
                let fragment: String = fragment.chars().take(40).collect();
                format!("unexpected `{fragment}`")
            };
            return Err(EngineError::parse(pos.row + 1, pos.column + 1, message));
        }

        let mut lines = LineIndex::new(text);
        index_tree(text, tree.root_node(), &mut lines);

        Ok(Self {
            text: text.to_string(),
            tree,
            lines,
        })
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    #[must_use]
    pub const fn lines(&self) -> &LineIndex {
        &self.lines
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Span of the whole document, `None` when empty
    #[must_use]
    pub fn full_span(&self) -> Option<LineSpan> {
        (!self.lines.is_empty()).then(|| LineSpan::new(1, self.lines.len()))
    }

    #[must_use]
    pub fn node_text(&self, node: Node<'_>) -> &str {
        node_text(&self.text, node)
    }

    /// 1-based line span of a node
    #[must_use]
    pub fn node_span(node: Node<'_>) -> LineSpan {
        node_span(node)
    }

    /// Top-level statements in document order (comments excluded)
    #[must_use]
    pub fn top_level_nodes(&self) -> Vec<Node<'_>> {
        let root = self.tree.root_node();
        let mut cursor = root.walk();
        root.named_children(&mut cursor)
            .filter(|n| n.kind() != "comment")
            .collect()
    }

    /// Start line of a top-level `if __name__ == "__main__":` runner block
    #[must_use]
    pub fn main_guard_line(&self) -> Option<usize> {
        self.top_level_nodes()
            .into_iter()
            .filter(|n| n.kind() == "if_statement")
            .find(|n| {
                n.child_by_field_name("condition").is_some_and(|cond| {
                    let text = self.node_text(cond);
                    text.contains("__name__") && text.contains("__main__")
                })
            })
            .map(|n| n.start_position().row + 1)
    }

    /// Read-only view restricted to `span`
    #[must_use]
    pub const fn scope(&self, span: LineSpan) -> SourceScope<'_> {
        SourceScope { doc: self, span }
    }
}

/// Line-bounded view of a document.
///
/// Only nodes that start inside the span and identifiers on its lines are
/// reachable; nothing outside the span can leak into a scoped extraction.
#[derive(Clone, Copy)]
pub struct SourceScope<'a> {
    doc: &'a SourceDocument,
    span: LineSpan,
}

impl<'a> SourceScope<'a> {
    #[must_use]
    pub const fn span(&self) -> LineSpan {
        self.span
    }

    /// Nodes of the given kinds starting inside the span, in document order
    #[must_use]
    pub fn nodes(&self, kinds: &[&str]) -> Vec<Node<'a>> {
        let mut out = Vec::new();
        let mut stack = vec![self.doc.tree.root_node()];
        while let Some(node) = stack.pop() {
            let span = node_span(node);
            if span.end < self.span.start || span.start > self.span.end {
                continue;
            }
            if self.span.contains(span.start) && kinds.contains(&node.kind()) {
                out.push(node);
            }
            let mut cursor = node.walk();
            let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Top-level statements starting inside the span
    #[must_use]
    pub fn top_level(&self) -> Vec<Node<'a>> {
        let root = self.doc.tree.root_node();
        let mut cursor = root.walk();
        root.named_children(&mut cursor)
            .filter(|n| n.kind() != "comment" && self.span.contains(n.start_position().row + 1))
            .collect()
    }

    /// Source text of a node obtained from this scope
    #[must_use]
    pub fn text(&self, node: Node<'a>) -> &'a str {
        if !self.span.contains(node.start_position().row + 1) {
            return "";
        }
        node_text(&self.doc.text, node)
    }

    #[must_use]
    pub fn line(&self, line: usize) -> Option<&'a str> {
        if self.span.contains(line) {
            self.doc.lines.line(line)
        } else {
            None
        }
    }

    #[must_use]
    pub fn snippet(&self, line: usize) -> String {
        if self.span.contains(line) {
            self.doc.lines.snippet(line)
        } else {
            String::new()
        }
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &'a Identifier> + 'a {
        self.doc.lines.identifiers_in(self.span)
    }

    #[must_use]
    pub fn slice(&self) -> String {
        self.doc.lines.slice(self.span)
    }
}

pub(crate) fn node_text<'t>(text: &'t str, node: Node<'_>) -> &'t str {
    text.get(node.start_byte()..node.end_byte()).unwrap_or_default()
}

pub(crate) fn node_span(node: Node<'_>) -> LineSpan {
    let start = node.start_position().row + 1;
    let mut end = node.end_position().row + 1;
    // A node ending at column 0 stops on the previous line
    if node.end_position().column == 0 && end > start {
        end -= 1;
    }
    LineSpan::new(start, end)
}

/// First `ERROR` or `MISSING` node in document order
fn first_syntax_error(root: Node<'_>) -> Option<Node<'_>> {
    if !root.has_error() {
        return None;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

fn index_tree(text: &str, root: Node<'_>, index: &mut LineIndex) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let pos = node.start_position();
        match node.kind() {
            "identifier" => {
                if let Some(bucket) = index.identifiers.get_mut(pos.row) {
                    bucket.push(Identifier {
                        name: node_text(text, node).to_string(),
                        line: pos.row + 1,
                        column: pos.column + 1,
                        kind: classify_identifier(node),
                    });
                }
            }
            "comment" => index.comments.push(CommentLine {
                line: pos.row + 1,
                column: pos.column + 1,
                text: node_text(text, node).to_string(),
            }),
            _ => {}
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    for bucket in &mut index.identifiers {
        bucket.sort_by_key(|ident| ident.column);
    }
    index.comments.sort_by_key(|c| c.line);
}

fn is_field(parent: Node<'_>, field: &str, child: Node<'_>) -> bool {
    let mut cursor = parent.walk();
    let found = parent
        .children_by_field_name(field, &mut cursor)
        .any(|n| n.id() == child.id());
    found
}

fn classify_identifier(node: Node<'_>) -> IdentKind {
    let Some(parent) = node.parent() else {
        return IdentKind::Use;
    };
    match parent.kind() {
        "attribute" if is_field(parent, "attribute", node) => return IdentKind::Attribute,
        "keyword_argument" if is_field(parent, "name", node) => return IdentKind::KeywordName,
        _ => {}
    }

    // Climb out of destructuring targets: `a, (b, c) = ...`
    let mut child = node;
    let mut current = parent;
    while matches!(
        current.kind(),
        "pattern_list"
            | "tuple_pattern"
            | "list_pattern"
            | "list_splat_pattern"
            | "dictionary_splat_pattern"
    ) {
        child = current;
        match current.parent() {
            Some(p) => current = p,
            None => return IdentKind::Use,
        }
    }

    let binding = match current.kind() {
        "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
            is_field(current, "left", child)
        }
        "default_parameter" | "typed_default_parameter" | "function_definition"
        | "class_definition" | "named_expression" => is_field(current, "name", child),
        "parameters" | "lambda_parameters" | "typed_parameter" => true,
        "aliased_import" => is_field(current, "alias", child),
        "as_pattern_target" | "global_statement" | "nonlocal_statement" => true,
        "dotted_name" => current.parent().is_some_and(|p| match p.kind() {
            "import_statement" => true,
            "import_from_statement" => is_field(p, "name", current),
            _ => false,
        }),
        _ => false,
    };

    if binding {
        IdentKind::Binding
    } else {
        IdentKind::Use
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &str = r#"import pandas as pd

PRICE_MIN = 5.0  # dollars

def scan(df, min_gap=0.03):
    hits = df[df.close > PRICE_MIN]
    return hits
"#;

    #[test]
    fn test_parse_valid_document() {
        let doc = parse(CODE).unwrap();
        assert_eq!(doc.line_count(), 7);
        assert_eq!(doc.lines().line(3), Some("PRICE_MIN = 5.0  # dollars"));
        assert!(doc.lines().is_blank(2));
        assert_eq!(doc.top_level_nodes().len(), 3);
        assert_eq!(doc.lines().comments().len(), 1);
        assert_eq!(doc.lines().comments()[0].line, 3);
    }

    #[test]
    fn test_identifier_kinds() {
        let doc = parse(CODE).unwrap();
        let line6 = doc.lines().identifiers_on(6);
        let kind_of = |name: &str| line6.iter().find(|i| i.name == name).map(|i| i.kind);
        assert_eq!(kind_of("hits"), Some(IdentKind::Binding));
        assert_eq!(kind_of("close"), Some(IdentKind::Attribute));
        assert_eq!(kind_of("PRICE_MIN"), Some(IdentKind::Use));

        let line5 = doc.lines().identifiers_on(5);
        assert!(line5
            .iter()
            .all(|i| i.kind == IdentKind::Binding));

        let line1 = doc.lines().identifiers_on(1);
        assert!(line1.iter().any(|i| i.name == "pd" && i.kind == IdentKind::Binding));
    }

    #[test]
    fn test_walrus_target_is_binding() {
        let code = "def scan(df):\n    if (threshold := df.rvol.mean()) > 1:\n        return df[df.rvol > threshold]\n";
        let doc = parse(code).unwrap();
        let line2 = doc.lines().identifiers_on(2);
        let target = line2.iter().find(|i| i.name == "threshold").unwrap();
        assert_eq!(target.kind, IdentKind::Binding);
        assert!(!doc.lines().free_names(LineSpan::new(1, 3)).contains_key("threshold"));
    }

    #[test]
    fn test_free_names() {
        let doc = parse(CODE).unwrap();
        let free = doc.lines().free_names(LineSpan::new(5, 7));
        assert_eq!(free.keys().collect::<Vec<_>>(), vec!["PRICE_MIN"]);
        assert_eq!(free.get("PRICE_MIN"), Some(&6));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse("price_min = 5.0\nvolume_min = = 100\n").unwrap_err();
        match err {
            EngineError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_document() {
        let doc = parse("").unwrap();
        assert_eq!(doc.line_count(), 0);
        assert!(doc.full_span().is_none());
    }

    #[test]
    fn test_scope_restricts_nodes() {
        let doc = parse(CODE).unwrap();
        let scope = doc.scope(LineSpan::new(5, 7));
        let assignments = scope.nodes(&["assignment"]);
        assert_eq!(assignments.len(), 1);
        assert_eq!(scope.text(assignments[0]), "hits = df[df.close > PRICE_MIN]");
        assert!(scope.line(3).is_none());
        assert!(scope.identifiers().all(|i| i.line >= 5));
    }

    #[test]
    fn test_main_guard_detected() {
        let doc = parse("def scan():\n    return 1\n\nif __name__ == \"__main__\":\n    scan()\n")
            .unwrap();
        assert_eq!(doc.main_guard_line(), Some(4));
    }

    #[test]
    fn test_snippet_truncates_long_lines() {
        let long = format!("X = \"{}\"", "a".repeat(300));
        let doc = parse(&long).unwrap();
        let snippet = doc.lines().snippet(1);
        assert!(snippet.ends_with('…'));
        assert_eq!(snippet.graphemes(true).count(), SNIPPET_GRAPHEMES + 1);
    }
}
