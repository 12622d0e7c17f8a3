use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{LineSpan, Namespace};

/// Non-fatal condition recorded on the run result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Boundary kept for human review; no template is generated automatically
    BoundaryAmbiguity {
        namespace: Option<Namespace>,
        span: LineSpan,
        confidence: f64,
        reason: String,
    },
    /// A parameter-like name used in the body is missing from the namespace's set
    ExtractionMiss {
        namespace: Namespace,
        name: String,
        line: usize,
    },
    /// A free name in the body could not be resolved from the document
    MissingDependency { namespace: Namespace, name: String },
    /// Cross-namespace evidence; emission is blocked for the implicated namespaces
    Contamination {
        namespaces: Vec<Namespace>,
        parameters: Vec<String>,
    },
    /// Wall-clock budget exhausted; listed namespaces did not finish
    Timeout {
        namespaces: Vec<Namespace>,
        budget_ms: u64,
    },
    /// Generated template failed to re-parse
    TemplateSyntax {
        namespace: Namespace,
        line: usize,
        message: String,
    },
}

impl Diagnostic {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BoundaryAmbiguity { .. } => "boundary_ambiguity",
            Self::ExtractionMiss { .. } => "extraction_miss",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::Contamination { .. } => "contamination",
            Self::Timeout { .. } => "timeout",
            Self::TemplateSyntax { .. } => "template_syntax",
        }
    }
}

/// Kind of evidence behind a cross-namespace collision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionKind {
    /// The same declaration (name + source line) sits in both namespaces
    SharedOrigin,
    /// One namespace reads a parameter only the other declares
    CrossReference,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrossNamespaceCollision {
    pub kind: CollisionKind,
    pub parameter: String,
    /// Namespace holding the declaration
    pub owner: Namespace,
    /// Namespace that shares or reads it
    pub other: Namespace,
    /// Declaration line in the owner namespace
    pub source_line: usize,
    /// Line in `other` where the evidence was found
    pub evidence_line: usize,
}

/// Result of the cross-namespace pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub contamination_detected: bool,
    pub cross_namespace_collisions: Vec<CrossNamespaceCollision>,
    pub isolation_score: f64,
    pub syntax_valid_per_namespace: BTreeMap<Namespace, bool>,
    /// Names declared independently in several namespaces (expected, informational)
    pub recurring_names: BTreeMap<String, Vec<Namespace>>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            contamination_detected: false,
            cross_namespace_collisions: Vec::new(),
            isolation_score: 1.0,
            syntax_valid_per_namespace: BTreeMap::new(),
            recurring_names: BTreeMap::new(),
        }
    }
}

impl ValidationReport {
    /// Whether `namespace` appears on either side of a collision
    #[must_use]
    pub fn is_implicated(&self, namespace: &Namespace) -> bool {
        self.cross_namespace_collisions
            .iter()
            .any(|c| &c.owner == namespace || &c.other == namespace)
    }

    /// Collisions involving `namespace`
    pub fn collisions_for<'a>(
        &'a self,
        namespace: &'a Namespace,
    ) -> impl Iterator<Item = &'a CrossNamespaceCollision> + 'a {
        self.cross_namespace_collisions
            .iter()
            .filter(move |c| &c.owner == namespace || &c.other == namespace)
    }
}
