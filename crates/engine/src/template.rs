//! Template Generator & Validator.
//!
//! A template is assembled as
//!
//! ```text
//! # header
//! <dependencies: imports, GLOBAL constants, shared helpers (source order)>
//! <parameter block: this namespace's ParameterSet only>
//! <boundary body, verbatim>
//! ```
//!
//! and then re-parsed. Contamination blocks release; a parse failure only
//! affects its own namespace.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;

use crate::error::{EngineError, Result};
use crate::extract::is_upper_case;
use crate::report::ValidationReport;
use crate::source::{IdentKind, SourceDocument};
use crate::types::{LineSpan, Namespace, ParamValue, ParameterSet, ScannerBoundary};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const BUILTINS: &[&str] = &[
    "__name__", "__file__", "__doc__", "abs", "all", "any", "bool", "dict", "divmod", "enumerate",
    "Exception", "filter", "float", "format", "frozenset", "getattr", "hasattr", "hash", "int",
    "isinstance", "issubclass", "iter", "KeyError", "len", "list", "map", "max", "min", "next",
    "object", "open", "print", "property", "range", "repr", "reversed", "round", "RuntimeError",
    "set", "setattr", "slice", "sorted", "staticmethod", "classmethod", "str", "sum", "super",
    "tuple", "type", "TypeError", "ValueError", "vars", "zip", "IndexError", "StopIteration",
    "NotImplementedError", "ZeroDivisionError", "AttributeError", "self", "cls",
];

/// Outcome of template validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ValidationStatus {
    Emitted,
    /// The assembled text does not parse; only this namespace is affected
    SyntaxInvalid { line: usize, message: String },
    /// Contamination involves this namespace; the template is not released
    BlockedContamination,
}

/// Non-blocking findings attached to a template
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TemplateWarning {
    /// Parameter-like name used in the body but missing from the set
    ExtractionMiss { name: String, line: usize },
    /// Free name with no definition anywhere the template can include
    MissingDependency { name: String },
}

/// Self-contained source unit for one isolated scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedTemplate {
    pub namespace: Namespace,
    pub source_text: String,
    /// Names resolved from outside the boundary
    pub dependencies: BTreeSet<String>,
    pub parameter_set: ParameterSet,
    pub validation_status: ValidationStatus,
    pub warnings: Vec<TemplateWarning>,
}

impl GeneratedTemplate {
    #[must_use]
    pub fn syntax_valid(&self) -> bool {
        !matches!(self.validation_status, ValidationStatus::SyntaxInvalid { .. })
    }

    #[must_use]
    pub fn is_emitted(&self) -> bool {
        self.validation_status == ValidationStatus::Emitted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DependencyKind {
    Import,
    Constant,
    Helper,
}

/// Top-level statement a template may pull in
#[derive(Debug, Clone)]
struct Dependency {
    kind: DependencyKind,
    span: LineSpan,
    names: BTreeSet<String>,
}

/// Builds templates for the boundaries of one document
pub struct TemplateGenerator<'d> {
    doc: &'d SourceDocument,
    boundaries: &'d [ScannerBoundary],
    global: &'d ParameterSet,
    dependencies: Vec<Dependency>,
}

impl<'d> TemplateGenerator<'d> {
    #[must_use]
    pub fn new(
        doc: &'d SourceDocument,
        boundaries: &'d [ScannerBoundary],
        global: &'d ParameterSet,
    ) -> Self {
        let dependencies = collect_dependencies(doc, boundaries);
        Self {
            doc,
            boundaries,
            global,
            dependencies,
        }
    }

    /// Assemble and validate the template of `namespace`
    pub fn generate(
        &self,
        namespace: &Namespace,
        parameter_set: &ParameterSet,
        report: &ValidationReport,
    ) -> Result<GeneratedTemplate> {
        let boundary = self
            .boundaries
            .iter()
            .find(|b| &b.namespace == namespace)
            .ok_or_else(|| EngineError::UnknownNamespace(namespace.to_string()))?;

        let lines = self.doc.lines();
        let body_span = boundary.span();
        let (included, resolved, missing) = self.resolve(body_span, parameter_set);

        let mut warnings: Vec<TemplateWarning> = missing
            .into_iter()
            .map(|name| TemplateWarning::MissingDependency { name })
            .collect();

        let mut reported = BTreeSet::new();
        for ident in lines.identifiers_in(body_span) {
            if ident.kind != IdentKind::Use
                || !is_upper_case(&ident.name)
                || parameter_set.contains(&ident.name)
                || self.global.contains(&ident.name)
                || resolved.contains(&ident.name)
                || !reported.insert(ident.name.clone())
            {
                continue;
            }
            warnings.push(TemplateWarning::ExtractionMiss {
                name: ident.name.clone(),
                line: ident.line,
            });
        }
        warnings.sort();

        let mut text = String::new();
        let _ = writeln!(text, "# Isolated scanner: {}", boundary.proposed_name);
        let _ = writeln!(
            text,
            "# namespace: {}, source lines {}, confidence {:.2}",
            namespace, body_span, boundary.confidence
        );

        if !included.is_empty() {
            text.push_str("\n# --- dependencies ---\n");
            for dep in &included {
                text.push_str(&lines.slice(dep.span));
                text.push('\n');
            }
        }

        text.push_str("\n# --- parameters ---\n");
        for param in parameter_set.iter() {
            let valid_name = IDENTIFIER.is_match(&param.name) && !KEYWORDS.contains(&param.name.as_str());
            match (&param.value, valid_name) {
                (ParamValue::Expression(_), _) => {
                    let _ = writeln!(
                        text,
                        "# {} is computed in the body (line {})",
                        param.name, param.source_line
                    );
                }
                (_, true) if !param.raw_value.contains('\n') => {
                    let _ = writeln!(text, "{} = {}", param.name, param.raw_value);
                }
                _ => {
                    let _ = writeln!(
                        text,
                        "# {} = {}",
                        param.name,
                        param.raw_value.replace('\n', " ")
                    );
                }
            }
        }

        text.push_str("\n# --- scanner body ---\n");
        text.push_str(&lines.slice(body_span));
        text.push('\n');

        let validation_status = if report.is_implicated(namespace) {
            warn!("Template for {namespace} blocked by contamination");
            ValidationStatus::BlockedContamination
        } else {
            match SourceDocument::parse(&text) {
                Ok(_) => ValidationStatus::Emitted,
                Err(EngineError::Parse { line, message, .. }) => {
                    warn!("Template for {namespace} does not parse at line {line}: {message}");
                    ValidationStatus::SyntaxInvalid { line, message }
                }
                Err(other) => return Err(other),
            }
        };

        debug!(
            "Template {}: {} dependencies, {} warnings, {:?}",
            namespace,
            resolved.len(),
            warnings.len(),
            validation_status
        );

        Ok(GeneratedTemplate {
            namespace: namespace.clone(),
            source_text: text,
            dependencies: resolved,
            parameter_set: parameter_set.clone(),
            validation_status,
            warnings,
        })
    }

    /// Dependencies needed by `span`, transitively, in source order
    fn resolve(
        &self,
        span: LineSpan,
        parameter_set: &ParameterSet,
    ) -> (Vec<&Dependency>, BTreeSet<String>, BTreeSet<String>) {
        let lines = self.doc.lines();
        let mut queue: VecDeque<String> = lines.free_names(span).into_keys().collect();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut included: BTreeSet<usize> = BTreeSet::new();
        let mut resolved = BTreeSet::new();
        let mut missing = BTreeSet::new();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let found = self
                .dependencies
                .iter()
                .enumerate()
                .find(|(_, dep)| dep.names.contains(&name) && !span.overlaps(&dep.span));
            match found {
                Some((idx, dep)) => {
                    resolved.insert(name);
                    if included.insert(idx) && dep.kind != DependencyKind::Import {
                        queue.extend(lines.free_names(dep.span).into_keys());
                    }
                }
                None => {
                    if !BUILTINS.contains(&name.as_str()) && !parameter_set.contains(&name) {
                        missing.insert(name);
                    }
                }
            }
        }

        let mut deps: Vec<&Dependency> = included.iter().map(|&i| &self.dependencies[i]).collect();
        deps.sort_by_key(|d| d.span.start);
        (deps, resolved, missing)
    }
}

/// Imports anywhere at top level; constants and helpers only outside every boundary
fn collect_dependencies(doc: &SourceDocument, boundaries: &[ScannerBoundary]) -> Vec<Dependency> {
    let inside = |line: usize| boundaries.iter().any(|b| b.span().contains(line));
    let lines = doc.lines();

    doc.top_level_nodes()
        .into_iter()
        .filter_map(|node| {
            let span = SourceDocument::node_span(node);
            let kind = match node.kind() {
                "import_statement" | "import_from_statement" | "future_import_statement" => {
                    DependencyKind::Import
                }
                _ if inside(span.start) => return None,
                "function_definition" | "class_definition" | "decorated_definition" => {
                    DependencyKind::Helper
                }
                "expression_statement" => DependencyKind::Constant,
                _ => return None,
            };

            let names: BTreeSet<String> = match kind {
                DependencyKind::Helper => {
                    let def = if node.kind() == "decorated_definition" {
                        node.child_by_field_name("definition")?
                    } else {
                        node
                    };
                    let name = def.child_by_field_name("name")?;
                    std::iter::once(doc.node_text(name).to_string()).collect()
                }
                _ => lines
                    .identifiers_in(span)
                    .filter(|i| i.kind == IdentKind::Binding)
                    .map(|i| i.name.clone())
                    .collect(),
            };
            (!names.is_empty()).then_some(Dependency { kind, span, names })
        })
        .collect()
}

/// Names a template resolves from outside its boundary: imports and
/// top-level bindings that no boundary owns
pub(crate) fn shared_names(doc: &SourceDocument, boundaries: &[ScannerBoundary]) -> BTreeSet<String> {
    collect_dependencies(doc, boundaries)
        .into_iter()
        .flat_map(|dep| dep.names)
        .collect()
}

/// Syntax validity of every template, keyed by namespace
#[must_use]
pub fn syntax_map(templates: &[GeneratedTemplate]) -> BTreeMap<Namespace, bool> {
    templates
        .iter()
        .map(|t| (t.namespace.clone(), t.syntax_valid()))
        .collect()
}
