use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, Result};

/// Inclusive, 1-based line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

impl LineSpan {
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of lines covered
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end < self.start
    }

    #[must_use]
    pub const fn contains(&self, line: usize) -> bool {
        line >= self.start && line <= self.end
    }

    #[must_use]
    pub const fn contains_span(&self, other: &Self) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Lines shared by both spans
    #[must_use]
    pub fn intersection_len(&self, other: &Self) -> usize {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end < start {
            0
        } else {
            end - start + 1
        }
    }

    /// Intersection over union of the two line ranges
    #[must_use]
    pub fn iou(&self, other: &Self) -> f64 {
        let inter = self.intersection_len(other);
        if inter == 0 {
            return 0.0;
        }
        let union = self.len() + other.len() - inter;
        inter as f64 / union as f64
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Display for LineSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Name of the write-once namespace for verifiably shared values
pub const GLOBAL_NAMESPACE: &str = "GLOBAL";

/// Isolation unit: one per boundary, plus [`GLOBAL_NAMESPACE`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn global() -> Self {
        Self(GLOBAL_NAMESPACE.to_string())
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_NAMESPACE
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Independent signal that proposed a boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Structural,
    CommentMarker,
    Semantic,
}

impl DetectionMethod {
    /// Consensus weight; structural signals are the most reliable for well-formed code
    #[must_use]
    pub const fn weight(self) -> f64 {
        match self {
            Self::Structural => 0.5,
            Self::CommentMarker => 0.3,
            Self::Semantic => 0.2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::CommentMarker => "comment_marker",
            Self::Semantic => "semantic",
        }
    }
}

/// Lifecycle of a boundary:
/// `proposed → consensus-confirmed → (validated | requires_review) → template-generated | discarded`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryState {
    Proposed,
    ConsensusConfirmed,
    Validated,
    RequiresReview,
    TemplateGenerated,
    Discarded,
}

impl BoundaryState {
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Proposed, Self::ConsensusConfirmed)
                | (Self::Proposed, Self::RequiresReview)
                | (Self::ConsensusConfirmed, Self::Validated)
                | (Self::ConsensusConfirmed, Self::RequiresReview)
                | (Self::Validated, Self::TemplateGenerated)
                | (Self::Validated, Self::RequiresReview)
                | (Self::RequiresReview, Self::Discarded)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::TemplateGenerated | Self::Discarded)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::ConsensusConfirmed => "consensus_confirmed",
            Self::Validated => "validated",
            Self::RequiresReview => "requires_review",
            Self::TemplateGenerated => "template_generated",
            Self::Discarded => "discarded",
        }
    }
}

/// Line range in a multi-scanner file attributable to exactly one scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerBoundary {
    pub id: usize,
    pub proposed_name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub confidence: f64,
    /// Highest-weight signal among those that agreed
    pub detection_method: DetectionMethod,
    /// Every signal that agreed on this range
    pub agreeing_methods: Vec<DetectionMethod>,
    pub namespace: Namespace,
    pub requires_review: bool,
    pub state: BoundaryState,
}

impl ScannerBoundary {
    #[must_use]
    pub const fn span(&self) -> LineSpan {
        LineSpan::new(self.start_line, self.end_line)
    }

    /// Move to `to`, rejecting transitions the lifecycle forbids
    pub fn transition(&mut self, to: BoundaryState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        if to == BoundaryState::RequiresReview {
            self.requires_review = true;
        }
        Ok(())
    }

    /// Eligible for automatic template generation
    #[must_use]
    pub fn is_auto_eligible(&self) -> bool {
        !self.requires_review && self.state == BoundaryState::Validated
    }
}

/// Which extractor produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    AstStructural,
    Pattern,
    ConfigBlock,
}

impl ExtractionMethod {
    /// Tie-break priority: config-block reflects explicit author intent
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::ConfigBlock => 3,
            Self::AstStructural => 2,
            Self::Pattern => 1,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AstStructural => "ast_structural",
            Self::Pattern => "pattern",
            Self::ConfigBlock => "config_block",
        }
    }
}

/// Semantic role of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Filter,
    Threshold,
    Config,
    /// Present but unexplained; never treated as a filter by default
    Unknown,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Threshold => "threshold",
            Self::Config => "config",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredType {
    Int,
    Float,
    Str,
    Bool,
    NoneType,
    Expression,
}

/// Parsed right-hand side of a parameter declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Expression(String),
}

impl ParamValue {
    #[must_use]
    pub const fn inferred_type(&self) -> InferredType {
        match self {
            Self::Int(_) => InferredType::Int,
            Self::Float(_) => InferredType::Float,
            Self::Str(_) => InferredType::Str,
            Self::Bool(_) => InferredType::Bool,
            Self::None => InferredType::NoneType,
            Self::Expression(_) => InferredType::Expression,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_literal(&self) -> bool {
        !matches!(self, Self::Expression(_))
    }
}

/// A candidate parameter, always attached to exactly one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedParameter {
    pub name: String,
    pub raw_value: String,
    pub value: ParamValue,
    pub inferred_type: InferredType,
    pub role: Role,
    pub confidence: f64,
    pub source_line: usize,
    pub context_snippet: String,
    pub extraction_method: ExtractionMethod,
    pub namespace: Namespace,
}

impl ExtractedParameter {
    /// Create an unclassified candidate with the extractor's base confidence
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        namespace: Namespace,
        name: impl Into<String>,
        raw_value: impl Into<String>,
        value: ParamValue,
        source_line: usize,
        context_snippet: impl Into<String>,
        extraction_method: ExtractionMethod,
        confidence: f64,
    ) -> Self {
        let inferred_type = value.inferred_type();
        Self {
            name: name.into(),
            raw_value: raw_value.into(),
            value,
            inferred_type,
            role: Role::Unknown,
            confidence,
            source_line,
            context_snippet: context_snippet.into(),
            extraction_method,
            namespace,
        }
    }

    /// Identity of the declaration this parameter came from
    #[must_use]
    pub fn origin(&self) -> (&str, usize) {
        (self.name.as_str(), self.source_line)
    }
}

/// Why a candidate was left out of a [`ParameterSet`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum AuditReason {
    /// A same-named candidate won arbitration
    Superseded { kept_method: ExtractionMethod, kept_line: usize },
    /// Candidate was tagged with another namespace
    ForeignNamespace,
    /// GLOBAL candidate no scanner references
    Unreferenced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub candidate: ExtractedParameter,
    #[serde(flatten)]
    pub reason: AuditReason,
}

/// Isolated parameters of one namespace, unique by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub namespace: Namespace,
    pub parameters: Vec<ExtractedParameter>,
    /// Losing duplicates; kept for debugging, not serialized
    #[serde(skip)]
    pub(crate) audit: Vec<AuditEntry>,
}

impl ParameterSet {
    #[must_use]
    pub fn empty(namespace: Namespace) -> Self {
        Self {
            namespace,
            parameters: Vec::new(),
            audit: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExtractedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExtractedParameter> {
        self.parameters.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Candidates discarded during combination
    #[must_use]
    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_geometry() {
        let a = LineSpan::new(10, 19);
        let b = LineSpan::new(15, 24);
        assert_eq!(a.len(), 10);
        assert!(a.overlaps(&b));
        assert_eq!(a.intersection_len(&b), 5);
        assert!((a.iou(&b) - 5.0 / 15.0).abs() < 1e-9);
        assert_eq!(a.union(&b), LineSpan::new(10, 24));
        assert!(!a.overlaps(&LineSpan::new(20, 30)));
        assert!(LineSpan::new(1, 30).contains_span(&a));
    }

    #[test]
    fn test_boundary_transitions() {
        let mut boundary = ScannerBoundary {
            id: 1,
            proposed_name: "gap".to_string(),
            start_line: 1,
            end_line: 10,
            confidence: 0.9,
            detection_method: DetectionMethod::Structural,
            agreeing_methods: vec![DetectionMethod::Structural],
            namespace: Namespace::new("gap"),
            requires_review: false,
            state: BoundaryState::Proposed,
        };

        assert!(boundary.transition(BoundaryState::TemplateGenerated).is_err());
        boundary.transition(BoundaryState::ConsensusConfirmed).unwrap();
        boundary.transition(BoundaryState::Validated).unwrap();
        assert!(boundary.is_auto_eligible());
        boundary.transition(BoundaryState::RequiresReview).unwrap();
        assert!(boundary.requires_review);
        boundary.transition(BoundaryState::Discarded).unwrap();
        assert!(boundary.state.is_terminal());
        assert!(boundary.transition(BoundaryState::Validated).is_err());
    }

    #[test]
    fn test_extraction_priority() {
        assert!(ExtractionMethod::ConfigBlock.priority() > ExtractionMethod::AstStructural.priority());
        assert!(ExtractionMethod::AstStructural.priority() > ExtractionMethod::Pattern.priority());
    }

    #[test]
    fn test_namespace_global() {
        assert!(Namespace::global().is_global());
        assert!(!Namespace::new("gap_up").is_global());
        assert_eq!(
            serde_json::to_string(&Namespace::new("gap_up")).unwrap(),
            "\"gap_up\""
        );
    }
}
