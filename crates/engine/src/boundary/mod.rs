//! Boundary Detector: three independent signals, resolved by consensus.
//!
//! ```text
//! SourceDocument ──┬── StructuralSignal ──┐
//!                  ├── MarkerSignal ──────┼──▶ consensus ──▶ [ScannerBoundary]
//!                  └── SemanticSignal ────┘
//! ```
//!
//! Signals only read the document; each returns its own candidate list.

mod consensus;
mod markers;
mod semantic;
mod structural;

pub use markers::MarkerSignal;
pub use semantic::SemanticSignal;
pub use structural::StructuralSignal;

use log::{debug, warn};
use std::collections::BTreeSet;

use crate::config::EngineOptions;
use crate::report::Diagnostic;
use crate::source::SourceDocument;
use crate::types::{BoundaryState, DetectionMethod, LineSpan, Namespace, ScannerBoundary};
use consensus::Resolved;

/// A range proposed by one signal
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryCandidate {
    pub method: DetectionMethod,
    pub span: LineSpan,
    pub confidence: f64,
    /// Banner title or definition name, when the signal knows one
    pub name: Option<String>,
    /// Structural only: the definition looks like a scanner entry point
    pub entry_shaped: bool,
}

impl BoundaryCandidate {
    #[must_use]
    pub const fn new(method: DetectionMethod, span: LineSpan, confidence: f64) -> Self {
        Self {
            method,
            span,
            confidence,
            name: None,
            entry_shaped: false,
        }
    }
}

/// Independent boundary signal over a read-only document
pub trait BoundarySignal: Send + Sync {
    fn method(&self) -> DetectionMethod;

    fn propose(&self, doc: &SourceDocument) -> Vec<BoundaryCandidate>;
}

/// Boundaries plus the ambiguity diagnostics raised while resolving them
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub boundaries: Vec<ScannerBoundary>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs the signals and resolves them into non-overlapping boundaries
pub struct BoundaryDetector {
    options: EngineOptions,
    structural: StructuralSignal,
    markers: MarkerSignal,
    semantic: SemanticSignal,
}

impl BoundaryDetector {
    #[must_use]
    pub fn new(options: &EngineOptions) -> Self {
        Self {
            options: options.clone(),
            structural: StructuralSignal,
            markers: MarkerSignal,
            semantic: SemanticSignal::new(options.semantic_split_threshold),
        }
    }

    pub fn detect(&self, doc: &SourceDocument) -> Detection {
        let Some(whole) = doc.full_span() else {
            return Detection::default();
        };

        let structural = self.structural.propose(doc);
        let markers = self.markers.propose(doc);
        let mut semantic = if self.options.enable_semantic_detector {
            self.semantic.propose(doc)
        } else {
            Vec::new()
        };
        // Prelude outside every definition and banner section stays shared
        semantic.retain(|s| {
            structural
                .iter()
                .chain(&markers)
                .any(|c| c.span.overlaps(&s.span))
        });
        debug!(
            "Boundary candidates: {} structural, {} marker, {} semantic",
            structural.len(),
            markers.len(),
            semantic.len()
        );

        let resolved = if markers.is_empty() {
            self.single_scanner(doc, whole, &structural)
        } else {
            None
        };

        let resolved = resolved.unwrap_or_else(|| {
            let mut candidates = structural;
            candidates.extend(markers);
            candidates.extend(semantic);
            consensus::resolve(
                consensus::cluster(candidates, self.options.alignment_tolerance),
                doc,
            )
        });

        self.finalize(resolved)
    }

    /// Whole-file boundary when there is nothing to split on
    fn single_scanner(
        &self,
        doc: &SourceDocument,
        whole: LineSpan,
        structural: &[BoundaryCandidate],
    ) -> Option<Vec<Resolved>> {
        let entries: Vec<&BoundaryCandidate> =
            structural.iter().filter(|c| c.entry_shaped).collect();

        if let [entry] = entries.as_slice() {
            debug!("Single entry point `{}`; whole file is one scanner", entry.name.as_deref().unwrap_or("?"));
            return Some(vec![Resolved {
                span: whole,
                confidence: 1.0,
                methods: vec![DetectionMethod::Structural],
                name: entry.name.clone(),
                confirmed: true,
            }]);
        }

        if structural.len() > 1 {
            return None;
        }

        let shape = structural.first().map_or(0.3, |c| c.confidence);
        let (confidence, methods) = if self.options.enable_semantic_detector {
            let drop = self.semantic.max_logic_drop(doc);
            if structural.is_empty() && drop == 0.0 {
                // Procedural script with one unbroken flow of names
                (1.0, vec![DetectionMethod::Semantic])
            } else {
                (
                    (DetectionMethod::Structural.weight() * shape
                        + DetectionMethod::Semantic.weight() * (1.0 - drop))
                        / (DetectionMethod::Structural.weight()
                            + DetectionMethod::Semantic.weight()),
                    vec![DetectionMethod::Structural, DetectionMethod::Semantic],
                )
            }
        } else {
            (shape, vec![DetectionMethod::Structural])
        };

        Some(vec![Resolved {
            span: whole,
            confidence,
            methods,
            name: structural.first().and_then(|c| c.name.clone()),
            confirmed: true,
        }])
    }

    fn finalize(&self, mut resolved: Vec<Resolved>) -> Detection {
        let mut diagnostics = Vec::new();

        if resolved.len() > self.options.max_boundaries {
            resolved.sort_by(|a, b| {
                b.confirmed
                    .cmp(&a.confirmed)
                    .then(b.confidence.total_cmp(&a.confidence))
                    .then(a.span.start.cmp(&b.span.start))
            });
            for dropped in resolved.drain(self.options.max_boundaries..) {
                warn!(
                    "Boundary {} dropped: more than {} boundaries",
                    dropped.span, self.options.max_boundaries
                );
                diagnostics.push(Diagnostic::BoundaryAmbiguity {
                    namespace: None,
                    span: dropped.span,
                    confidence: dropped.confidence,
                    reason: format!(
                        "exceeds max_boundaries ({})",
                        self.options.max_boundaries
                    ),
                });
            }
            resolved.sort_by_key(|r| r.span.start);
        }

        let mut taken: BTreeSet<String> = BTreeSet::new();
        let mut boundaries = Vec::with_capacity(resolved.len());

        for (idx, r) in resolved.into_iter().enumerate() {
            let id = idx + 1;
            let proposed_name = r.name.clone().unwrap_or_else(|| format!("scanner_{id}"));
            let namespace = Namespace::new(unique_slug(&proposed_name, id, &mut taken));

            let mut boundary = ScannerBoundary {
                id,
                proposed_name,
                start_line: r.span.start,
                end_line: r.span.end,
                confidence: r.confidence.clamp(0.0, 1.0),
                detection_method: r.methods.first().copied().unwrap_or(DetectionMethod::Structural),
                agreeing_methods: r.methods.clone(),
                namespace,
                requires_review: false,
                state: BoundaryState::Proposed,
            };

            let reason = if !r.confirmed {
                Some(format!(
                    "only the {} signal proposed this range",
                    boundary.detection_method.as_str()
                ))
            } else if boundary.confidence < self.options.min_boundary_confidence {
                Some(format!(
                    "confidence {:.2} below {:.2}",
                    boundary.confidence, self.options.min_boundary_confidence
                ))
            } else {
                None
            };

            let mut path = Vec::with_capacity(2);
            if r.confirmed {
                path.push(BoundaryState::ConsensusConfirmed);
            }
            path.push(if reason.is_some() {
                BoundaryState::RequiresReview
            } else {
                BoundaryState::Validated
            });
            for state in path {
                if let Err(err) = boundary.transition(state) {
                    warn!("{err}");
                }
            }

            if let Some(reason) = reason {
                warn!("Boundary {} ({}) requires review: {reason}", boundary.span(), boundary.namespace);
                diagnostics.push(Diagnostic::BoundaryAmbiguity {
                    namespace: Some(boundary.namespace.clone()),
                    span: boundary.span(),
                    confidence: boundary.confidence,
                    reason,
                });
            }
            boundaries.push(boundary);
        }

        Detection {
            boundaries,
            diagnostics,
        }
    }
}

/// Detect scanner boundaries in line order
pub fn detect_boundaries(doc: &SourceDocument, options: &EngineOptions) -> Vec<ScannerBoundary> {
    BoundaryDetector::new(options).detect(doc).boundaries
}

/// Lowercase identifier-safe slug, made unique against `taken`
fn unique_slug(name: &str, id: usize, taken: &mut BTreeSet<String>) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    let base = if slug.is_empty() {
        format!("scanner_{id}")
    } else if slug.starts_with(|c: char| c.is_ascii_digit()) {
        format!("scanner_{slug}")
    } else {
        slug.to_string()
    };

    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{base}_{n}");
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}
