//! Isolation & Combination: per-namespace arbitration and the
//! cross-namespace contamination pass.

use log::{debug, warn};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::report::{CollisionKind, CrossNamespaceCollision, ValidationReport};
use crate::source::{IdentKind, SourceDocument};
use crate::template::shared_names;
use crate::types::{
    AuditEntry, AuditReason, ExtractedParameter, Namespace, ParameterSet, ScannerBoundary,
};

/// Merge candidate lists of one namespace into a [`ParameterSet`].
///
/// Only candidates tagged with `namespace` are considered; anything else goes
/// straight to the audit log unread. Per name the winner is chosen by
/// confidence, then extractor priority, then earliest line.
#[must_use]
pub fn combine(namespace: &Namespace, candidate_lists: Vec<Vec<ExtractedParameter>>) -> ParameterSet {
    let mut set = ParameterSet::empty(namespace.clone());
    let mut by_name: BTreeMap<String, Vec<ExtractedParameter>> = BTreeMap::new();

    for candidate in candidate_lists.into_iter().flatten() {
        if &candidate.namespace != namespace {
            set.audit.push(AuditEntry {
                candidate,
                reason: AuditReason::ForeignNamespace,
            });
            continue;
        }
        by_name
            .entry(candidate.name.clone())
            .or_default()
            .push(candidate);
    }

    for (_, mut group) in by_name {
        group.sort_by(arbitration_order);
        let mut group = group.into_iter();
        let Some(winner) = group.next() else {
            continue;
        };
        for loser in group {
            set.audit.push(AuditEntry {
                candidate: loser,
                reason: AuditReason::Superseded {
                    kept_method: winner.extraction_method,
                    kept_line: winner.source_line,
                },
            });
        }
        set.parameters.push(winner);
    }

    set.parameters
        .sort_by(|a, b| a.source_line.cmp(&b.source_line).then(a.name.cmp(&b.name)));
    debug!(
        "Combined {}: {} parameters, {} audited",
        namespace,
        set.parameters.len(),
        set.audit.len()
    );
    set
}

/// Best candidate first
fn arbitration_order(a: &ExtractedParameter, b: &ExtractedParameter) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(
            b.extraction_method
                .priority()
                .cmp(&a.extraction_method.priority()),
        )
        .then(a.source_line.cmp(&b.source_line))
}

/// Keep only GLOBAL parameters that some scanner actually reads
#[must_use]
pub fn admit_global(mut global: ParameterSet, referenced: &BTreeSet<String>) -> ParameterSet {
    let (kept, dropped): (Vec<ExtractedParameter>, Vec<ExtractedParameter>) = global
        .parameters
        .into_iter()
        .partition(|p| referenced.contains(&p.name));
    global.parameters = kept;
    global
        .audit
        .extend(dropped.into_iter().map(|candidate| AuditEntry {
            candidate,
            reason: AuditReason::Unreferenced,
        }));
    global
}

/// Keyword-argument names, dict keys and synthesized pattern names are not
/// readable by other code; only real bindings are
fn binds_name(doc: &SourceDocument, param: &ExtractedParameter) -> bool {
    doc.lines()
        .identifiers_on(param.source_line)
        .iter()
        .any(|i| i.kind == IdentKind::Binding && i.name == param.name)
}

/// Pairwise cross-namespace check over finished parameter sets
#[must_use]
pub fn cross_namespace_check(
    doc: &SourceDocument,
    boundaries: &[ScannerBoundary],
    sets: &BTreeMap<Namespace, ParameterSet>,
    global: &ParameterSet,
) -> ValidationReport {
    let mut collisions: BTreeSet<CrossNamespaceCollision> = BTreeSet::new();

    // The same declaration in two sets
    let mut origins: BTreeMap<(&str, usize), Vec<&Namespace>> = BTreeMap::new();
    for (namespace, set) in sets {
        for param in set.iter() {
            origins.entry(param.origin()).or_default().push(namespace);
        }
    }
    for ((name, line), owners) in &origins {
        for (i, owner) in owners.iter().enumerate() {
            for other in &owners[i + 1..] {
                collisions.insert(CrossNamespaceCollision {
                    kind: CollisionKind::SharedOrigin,
                    parameter: (*name).to_string(),
                    owner: (*owner).clone(),
                    other: (*other).clone(),
                    source_line: *line,
                    evidence_line: *line,
                });
            }
        }
    }

    // A boundary reading a name only another namespace binds
    let shared = shared_names(doc, boundaries);
    for boundary in boundaries {
        let Some(own) = sets.get(&boundary.namespace) else {
            continue;
        };
        for (name, use_line) in doc.lines().free_names(boundary.span()) {
            if own.contains(&name) || global.contains(&name) || shared.contains(&name) {
                continue;
            }
            for (owner, set) in sets {
                if owner == &boundary.namespace {
                    continue;
                }
                if let Some(param) = set.get(&name).filter(|p| binds_name(doc, p)) {
                    collisions.insert(CrossNamespaceCollision {
                        kind: CollisionKind::CrossReference,
                        parameter: name.clone(),
                        owner: owner.clone(),
                        other: boundary.namespace.clone(),
                        source_line: param.source_line,
                        evidence_line: use_line,
                    });
                }
            }
        }
    }

    let mut recurring: BTreeMap<String, Vec<Namespace>> = BTreeMap::new();
    for (namespace, set) in sets {
        for name in set.names() {
            recurring
                .entry(name.to_string())
                .or_default()
                .push(namespace.clone());
        }
    }
    recurring.retain(|_, namespaces| namespaces.len() > 1);

    let total: usize = sets.values().map(ParameterSet::len).sum();
    let contaminated: BTreeSet<(&Namespace, &str)> = collisions
        .iter()
        .flat_map(|c| {
            let mut hit = vec![(&c.owner, c.parameter.as_str())];
            if c.kind == CollisionKind::SharedOrigin {
                hit.push((&c.other, c.parameter.as_str()));
            }
            hit
        })
        .collect();
    let isolation_score = if total == 0 {
        1.0
    } else {
        (1.0 - contaminated.len() as f64 / total as f64).max(0.0)
    };

    let collisions: Vec<CrossNamespaceCollision> = collisions.into_iter().collect();
    if !collisions.is_empty() {
        warn!(
            "Contamination: {} cross-namespace collisions, isolation score {:.2}",
            collisions.len(),
            isolation_score
        );
    }

    ValidationReport {
        contamination_detected: !collisions.is_empty(),
        cross_namespace_collisions: collisions,
        isolation_score,
        syntax_valid_per_namespace: BTreeMap::new(),
        recurring_names: recurring,
    }
}
