//! # Scanner Engine
//!
//! Boundary detection and parameter isolation for multi-scanner source files.
//!
//! ## Philosophy
//!
//! Scope first, then collect per scope:
//! - Locate each scanner's line range before looking at any parameter
//! - Extract only inside that range, tagged with its namespace
//! - Combine per namespace; the only shared namespace is the write-once `GLOBAL`
//! - Report cross-namespace evidence instead of resolving it silently
//!
//! ## Architecture
//!
//! ```text
//! Source Text
//!     │
//!     ├──> Source Model (tree-sitter parse, line index)
//!     │
//!     ├──> Boundary Detector
//!     │    ├─> Structural / Comment-marker / Semantic signals
//!     │    └─> Consensus → ScannerBoundary[]
//!     │
//!     ├──> Per boundary (worker pool)
//!     │    ├─> Extractors (config block, AST, pattern)
//!     │    ├─> Classifier chain
//!     │    └─> combine() → ParameterSet
//!     │
//!     ├──> Cross-namespace check → ValidationReport
//!     │
//!     └──> Template Generator & Validator → GeneratedTemplate[]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use scanner_engine::{run, EngineOptions};
//!
//! let code = r#"
//! PRICE_MIN = 5.0
//! VOLUME_MIN = 500_000
//!
//! def momentum_scan(df):
//!     return df[(df.close > PRICE_MIN) & (df.volume > VOLUME_MIN)]
//! "#;
//!
//! let result = run(code, &EngineOptions::default()).unwrap();
//! for boundary in &result.boundaries {
//!     println!("{} at lines {}-{}", boundary.namespace, boundary.start_line, boundary.end_line);
//! }
//! ```

mod boundary;
mod classify;
mod combine;
mod config;
mod error;
mod extract;
mod literal;
mod pipeline;
mod report;
mod source;
mod template;
mod types;

pub use boundary::{
    detect_boundaries, BoundaryCandidate, BoundaryDetector, BoundarySignal, Detection,
    MarkerSignal, SemanticSignal, StructuralSignal,
};
pub use classify::{
    classify, ClassifierStage, Classifier, ClassifyContext, RuleTable, UnknownFallback,
    ValueHeuristic, Verdict, UNKNOWN_CONFIDENCE_CAP,
};
pub use combine::{admit_global, combine, cross_namespace_check};
pub use config::EngineOptions;
pub use error::{EngineError, Result};
pub use extract::{
    extract_all, extractors, AstExtractor, ConfigBlockExtractor, ParameterExtractor,
    PatternExtractor,
};
pub use pipeline::{run, CancellationToken, Engine, EngineResult, RunStats};
pub use report::{CollisionKind, CrossNamespaceCollision, Diagnostic, ValidationReport};
pub use source::{parse, CommentLine, IdentKind, Identifier, LineIndex, SourceDocument, SourceScope};
pub use template::{GeneratedTemplate, TemplateGenerator, TemplateWarning, ValidationStatus};
pub use types::{
    AuditEntry, AuditReason, BoundaryState, DetectionMethod, ExtractedParameter,
    ExtractionMethod, InferredType, LineSpan, Namespace, ParamValue, ParameterSet, Role,
    ScannerBoundary, GLOBAL_NAMESPACE,
};
