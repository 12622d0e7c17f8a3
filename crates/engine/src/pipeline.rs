//! Run orchestration: detection, per-boundary fan-out, join, templates.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::boundary::BoundaryDetector;
use crate::classify::Classifier;
use crate::combine::{admit_global, combine, cross_namespace_check};
use crate::config::EngineOptions;
use crate::error::{EngineError, Result};
use crate::extract::{extract_all, extractors, ParameterExtractor};
use crate::report::{Diagnostic, ValidationReport};
use crate::source::SourceDocument;
use crate::template::{syntax_map, GeneratedTemplate, TemplateGenerator, TemplateWarning, ValidationStatus};
use crate::types::{
    BoundaryState, ExtractedParameter, LineSpan, Namespace, ParameterSet, ScannerBoundary,
};

// ═══════════════════════════════════════════════════════════════════════════
//  CANCELLATION
// ═══════════════════════════════════════════════════════════════════════════

/// Shared flag checked between per-boundary stages
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  PER-RUN RESULTS
// ═══════════════════════════════════════════════════════════════════════════

/// Append-only, namespace-keyed collection shared by worker tasks.
///
/// A key can be written once; a second write is rejected and reported.
#[derive(Debug, Default)]
pub(crate) struct NamespaceResults {
    sets: Mutex<BTreeMap<Namespace, ParameterSet>>,
}

impl NamespaceResults {
    /// Returns `false` when `namespace` was already written
    pub(crate) fn append(&self, set: ParameterSet) -> bool {
        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        if sets.contains_key(&set.namespace) {
            warn!("Rejected second write to namespace {}", set.namespace);
            return false;
        }
        sets.insert(set.namespace.clone(), set);
        true
    }

    pub(crate) fn into_inner(self) -> BTreeMap<Namespace, ParameterSet> {
        self.sets.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Finished,
    TimedOut,
    Cancelled,
}

// ═══════════════════════════════════════════════════════════════════════════
//  RESULT
// ═══════════════════════════════════════════════════════════════════════════

/// Everything a run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    pub boundaries: Vec<ScannerBoundary>,
    /// One set per finished namespace, plus `GLOBAL`
    pub parameter_sets: BTreeMap<Namespace, ParameterSet>,
    pub validation_report: ValidationReport,
    /// Released templates (emitted or flagged `syntax_invalid`)
    pub templates: Vec<GeneratedTemplate>,
    pub diagnostics: Vec<Diagnostic>,
}

impl EngineResult {
    #[must_use]
    pub fn boundary(&self, namespace: &Namespace) -> Option<&ScannerBoundary> {
        self.boundaries.iter().find(|b| &b.namespace == namespace)
    }

    #[must_use]
    pub fn parameter_set(&self, namespace: &Namespace) -> Option<&ParameterSet> {
        self.parameter_sets.get(namespace)
    }

    #[must_use]
    pub fn template(&self, namespace: &Namespace) -> Option<&GeneratedTemplate> {
        self.templates.iter().find(|t| &t.namespace == namespace)
    }

    /// User rejection of a boundary kept for review
    pub fn discard(&mut self, namespace: &Namespace) -> Result<()> {
        let boundary = self
            .boundaries
            .iter_mut()
            .find(|b| &b.namespace == namespace)
            .ok_or_else(|| EngineError::UnknownNamespace(namespace.to_string()))?;
        boundary.transition(BoundaryState::Discarded)?;
        self.parameter_sets.remove(namespace);
        self.templates.retain(|t| &t.namespace != namespace);
        info!("Discarded namespace {namespace}");
        Ok(())
    }

    /// Get statistics about the run
    #[must_use]
    pub fn stats(&self) -> RunStats {
        let count_state = |state| self.boundaries.iter().filter(|b| b.state == state).count();
        RunStats {
            boundaries: self.boundaries.len(),
            requires_review: self.boundaries.iter().filter(|b| b.requires_review).count(),
            templates_emitted: self.templates.iter().filter(|t| t.is_emitted()).count(),
            templates_generated: count_state(BoundaryState::TemplateGenerated),
            parameters: self
                .parameter_sets
                .iter()
                .filter(|(ns, _)| !ns.is_global())
                .map(|(_, set)| set.len())
                .sum(),
            global_parameters: self
                .parameter_sets
                .get(&Namespace::global())
                .map_or(0, ParameterSet::len),
            diagnostics: self.diagnostics.len(),
            isolation_score: self.validation_report.isolation_score,
        }
    }
}

/// Statistics about a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub boundaries: usize,
    pub requires_review: usize,
    pub templates_emitted: usize,
    pub templates_generated: usize,
    pub parameters: usize,
    pub global_parameters: usize,
    pub diagnostics: usize,
    pub isolation_score: f64,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Boundaries: {} | Review: {} | Templates: {} | Params: {} | Global: {} | Diagnostics: {} | Isolation: {:.2}",
            self.boundaries,
            self.requires_review,
            self.templates_emitted,
            self.parameters,
            self.global_parameters,
            self.diagnostics,
            self.isolation_score
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Scanner isolation engine
pub struct Engine {
    options: EngineOptions,
    extractors: Vec<Box<dyn ParameterExtractor>>,
    classifier: Classifier,
}

impl Engine {
    /// Create an engine with validated options
    pub fn new(options: EngineOptions) -> Result<Self> {
        options.validate()?;
        let extractors = extractors(&options);
        Ok(Self {
            options,
            extractors,
            classifier: Classifier::default(),
        })
    }

    #[must_use]
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn run(&self, source_text: &str) -> Result<EngineResult> {
        self.run_with_cancel(source_text, &CancellationToken::new())
    }

    /// Full pipeline; cancellable until the cross-namespace join
    pub fn run_with_cancel(
        &self,
        source_text: &str,
        cancel: &CancellationToken,
    ) -> Result<EngineResult> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.options.time_budget_ms);
        ensure_running(cancel)?;

        let doc = SourceDocument::parse(source_text)?;
        debug!("Parsed {} lines", doc.line_count());

        let detection = BoundaryDetector::new(&self.options).detect(&doc);
        let mut boundaries = detection.boundaries;
        let mut diagnostics = detection.diagnostics;
        ensure_running(cancel)?;

        let results = NamespaceResults::default();
        let global = self.global_set(&doc, &boundaries);
        results.append(global.clone());

        let outcomes = self.fan_out(&boundaries, |boundary| {
            self.process(&doc, boundary, &results, cancel, deadline)
        });

        if cancel.is_cancelled() || outcomes.contains(&TaskOutcome::Cancelled) {
            info!("Run cancelled before join");
            return Err(EngineError::Cancelled);
        }

        // Join point: everything below runs to completion
        let parameter_sets = results.into_inner();

        let timed_out: Vec<Namespace> = boundaries
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| **outcome == TaskOutcome::TimedOut)
            .map(|(b, _)| b.namespace.clone())
            .collect();
        if !timed_out.is_empty() {
            warn!(
                "Time budget of {}ms exhausted; {} namespaces unfinished",
                self.options.time_budget_ms,
                timed_out.len()
            );
            for boundary in boundaries
                .iter_mut()
                .filter(|b| timed_out.contains(&b.namespace))
            {
                mark_for_review(boundary);
            }
            diagnostics.push(Diagnostic::Timeout {
                namespaces: timed_out.clone(),
                budget_ms: self.options.time_budget_ms,
            });
        }

        let scanner_sets: BTreeMap<Namespace, ParameterSet> = parameter_sets
            .iter()
            .filter(|(ns, _)| !ns.is_global())
            .map(|(ns, set)| (ns.clone(), set.clone()))
            .collect();
        let mut report = cross_namespace_check(&doc, &boundaries, &scanner_sets, &global);

        if report.contamination_detected {
            let namespaces: BTreeSet<Namespace> = report
                .cross_namespace_collisions
                .iter()
                .flat_map(|c| [c.owner.clone(), c.other.clone()])
                .collect();
            let parameters: BTreeSet<String> = report
                .cross_namespace_collisions
                .iter()
                .map(|c| c.parameter.clone())
                .collect();
            diagnostics.push(Diagnostic::Contamination {
                namespaces: namespaces.into_iter().collect(),
                parameters: parameters.into_iter().collect(),
            });
        }

        let generator = TemplateGenerator::new(&doc, &boundaries, &global);
        let eligible: Vec<&ScannerBoundary> = boundaries
            .iter()
            .filter(|b| b.is_auto_eligible() && !timed_out.contains(&b.namespace))
            .collect();
        let generated: Vec<Result<GeneratedTemplate>> = self.fan_out(&eligible, |boundary| {
            let empty = ParameterSet::empty(boundary.namespace.clone());
            let set = scanner_sets.get(&boundary.namespace).unwrap_or(&empty);
            generator.generate(&boundary.namespace, set, &report)
        });

        let mut templates = Vec::with_capacity(generated.len());
        for template in generated {
            let template = template?;
            let Some(boundary) = boundaries
                .iter_mut()
                .find(|b| b.namespace == template.namespace)
            else {
                continue;
            };

            for warning in &template.warnings {
                diagnostics.push(match warning {
                    TemplateWarning::ExtractionMiss { name, line } => Diagnostic::ExtractionMiss {
                        namespace: template.namespace.clone(),
                        name: name.clone(),
                        line: *line,
                    },
                    TemplateWarning::MissingDependency { name } => Diagnostic::MissingDependency {
                        namespace: template.namespace.clone(),
                        name: name.clone(),
                    },
                });
            }

            match &template.validation_status {
                ValidationStatus::Emitted => {
                    boundary.transition(BoundaryState::TemplateGenerated)?;
                    templates.push(template);
                }
                ValidationStatus::SyntaxInvalid { line, message } => {
                    diagnostics.push(Diagnostic::TemplateSyntax {
                        namespace: template.namespace.clone(),
                        line: *line,
                        message: message.clone(),
                    });
                    mark_for_review(boundary);
                    templates.push(template);
                }
                ValidationStatus::BlockedContamination => mark_for_review(boundary),
            }
        }

        // Contaminated namespaces never auto-execute, template or not
        for boundary in boundaries
            .iter_mut()
            .filter(|b| report.is_implicated(&b.namespace))
        {
            mark_for_review(boundary);
        }

        report.syntax_valid_per_namespace = syntax_map(&templates);

        let result = EngineResult {
            boundaries,
            parameter_sets,
            validation_report: report,
            templates,
            diagnostics,
        };
        info!("{} in {:?}", result.stats(), started.elapsed());
        Ok(result)
    }

    /// Extraction → classification → combination for one boundary
    fn process(
        &self,
        doc: &SourceDocument,
        boundary: &ScannerBoundary,
        results: &NamespaceResults,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> TaskOutcome {
        if cancel.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        if Instant::now() >= deadline {
            return TaskOutcome::TimedOut;
        }

        let scope = doc.scope(boundary.span());
        let lists = extract_all(&self.extractors, &scope, &boundary.namespace);
        if cancel.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        if Instant::now() >= deadline {
            return TaskOutcome::TimedOut;
        }

        let classified = self.classifier.classify_all(&lists, &scope);
        results.append(combine(&boundary.namespace, classified));
        TaskOutcome::Finished
    }

    /// GLOBAL candidates: top-level statements outside every boundary that
    /// at least one boundary reads
    fn global_set(&self, doc: &SourceDocument, boundaries: &[ScannerBoundary]) -> ParameterSet {
        let namespace = Namespace::global();
        let Some(whole) = doc.full_span() else {
            return ParameterSet::empty(namespace);
        };

        let top_level_lines: BTreeSet<usize> = doc
            .top_level_nodes()
            .into_iter()
            .filter(|n| n.kind() == "expression_statement")
            .map(|n| SourceDocument::node_span(n).start)
            .collect();

        let mut lists: Vec<Vec<ExtractedParameter>> = Vec::new();
        for gap in gaps(whole, boundaries) {
            let scope = doc.scope(gap);
            for list in extract_all(&self.extractors, &scope, &namespace) {
                let list: Vec<ExtractedParameter> = list
                    .into_iter()
                    .filter(|p| top_level_lines.contains(&p.source_line))
                    .collect();
                let list = self.classifier.classify_all(&[list], &scope);
                lists.extend(list);
            }
        }

        let referenced: BTreeSet<String> = boundaries
            .iter()
            .flat_map(|b| doc.lines().free_names(b.span()).into_keys())
            .collect();
        admit_global(combine(&namespace, lists), &referenced)
    }

    /// Run `task` over `items` on the worker pool, keeping input order
    fn fan_out<T, R, F>(&self, items: &[T], task: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if items.is_empty() {
            return Vec::new();
        }
        let workers = self.options.effective_workers(items.len());
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| items.par_iter().map(&task).collect()),
            Err(err) => {
                warn!("Worker pool unavailable ({err}); running sequentially");
                items.iter().map(task).collect()
            }
        }
    }
}

/// Run the engine once with `options`
pub fn run(source_text: &str, options: &EngineOptions) -> Result<EngineResult> {
    Engine::new(options.clone())?.run(source_text)
}

fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

fn mark_for_review(boundary: &mut ScannerBoundary) {
    if boundary.state == BoundaryState::RequiresReview {
        return;
    }
    if let Err(err) = boundary.transition(BoundaryState::RequiresReview) {
        warn!("{err}");
    }
}

/// Line ranges of `whole` not covered by any boundary
fn gaps(whole: LineSpan, boundaries: &[ScannerBoundary]) -> Vec<LineSpan> {
    let mut spans: Vec<LineSpan> = boundaries.iter().map(ScannerBoundary::span).collect();
    spans.sort();
    let mut out = Vec::new();
    let mut next = whole.start;
    for span in spans {
        if span.start > next {
            out.push(LineSpan::new(next, span.start - 1));
        }
        next = next.max(span.end + 1);
    }
    if next <= whole.end {
        out.push(LineSpan::new(next, whole.end));
    }
    out
}
