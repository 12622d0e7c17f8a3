//! Alignment of candidates from independent signals into final ranges.

use log::debug;

use super::BoundaryCandidate;
use crate::source::{IdentKind, SourceDocument};
use crate::types::{DetectionMethod, LineSpan};

/// Candidates from different signals that describe the same range
#[derive(Debug, Clone)]
pub(crate) struct Cluster {
    members: Vec<BoundaryCandidate>,
}

impl Cluster {
    fn seed(candidate: BoundaryCandidate) -> Self {
        Self {
            members: vec![candidate],
        }
    }

    fn has(&self, method: DetectionMethod) -> bool {
        self.members.iter().any(|m| m.method == method)
    }

    /// Union of structural and marker members; semantic members never widen it
    pub(crate) fn extent(&self) -> LineSpan {
        let mut anchors = self
            .members
            .iter()
            .filter(|m| m.method != DetectionMethod::Semantic)
            .map(|m| m.span);
        match anchors.next() {
            Some(first) => anchors.fold(first, |acc, span| acc.union(&span)),
            None => self.members[0].span,
        }
    }

    /// Agreeing methods, highest weight first
    pub(crate) fn methods(&self) -> Vec<DetectionMethod> {
        let mut methods: Vec<DetectionMethod> = self.members.iter().map(|m| m.method).collect();
        methods.sort();
        methods.dedup();
        methods
    }

    pub(crate) fn is_confirmed(&self) -> bool {
        self.members.len() >= 2
    }

    /// Weighted mean of the members' confidences
    pub(crate) fn confidence(&self) -> f64 {
        let (weighted, weights) = self.members.iter().fold((0.0, 0.0), |(sum, w), m| {
            (sum + m.method.weight() * m.confidence, w + m.method.weight())
        });
        if weights == 0.0 {
            0.0
        } else {
            weighted / weights
        }
    }

    fn structural(&self) -> Option<&BoundaryCandidate> {
        self.members
            .iter()
            .find(|m| m.method == DetectionMethod::Structural)
    }

    fn structural_confidence(&self) -> f64 {
        self.structural().map_or(0.0, |m| m.confidence)
    }

    /// Banner title wins over a definition name
    pub(crate) fn name(&self) -> Option<String> {
        let by_method = |method| {
            self.members
                .iter()
                .find(|m| m.method == method)
                .and_then(|m| m.name.clone())
        };
        by_method(DetectionMethod::CommentMarker).or_else(|| by_method(DetectionMethod::Structural))
    }
}

/// Range that survived consensus
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub span: LineSpan,
    pub confidence: f64,
    pub methods: Vec<DetectionMethod>,
    pub name: Option<String>,
    /// Two or more signals agreed
    pub confirmed: bool,
}

/// Whether two ranges describe the same scanner within `tolerance` lines
pub(crate) fn aligns(a: LineSpan, b: LineSpan, tolerance: usize) -> bool {
    let shorter = a.len().min(b.len());
    if a.intersection_len(&b) * 2 < shorter {
        return false;
    }
    if a.end.abs_diff(b.end) > tolerance {
        return false;
    }
    a.start.abs_diff(b.start) <= tolerance || a.contains_span(&b) || b.contains_span(&a)
}

/// Group candidates so that each cluster holds at most one candidate per signal
pub(crate) fn cluster(mut candidates: Vec<BoundaryCandidate>, tolerance: usize) -> Vec<Cluster> {
    candidates.sort_by(|a, b| {
        a.method
            .cmp(&b.method)
            .then(a.span.start.cmp(&b.span.start))
            .then(b.confidence.total_cmp(&a.confidence))
    });

    let definitions: Vec<LineSpan> = candidates
        .iter()
        .filter(|c| c.method == DetectionMethod::Structural)
        .map(|c| c.span)
        .collect();

    let mut clusters: Vec<Cluster> = Vec::new();
    for candidate in candidates {
        // A cohesive segment spanning several definitions confirms none of them
        if candidate.method == DetectionMethod::Semantic
            && definitions.iter().filter(|d| d.overlaps(&candidate.span)).count() > 1
        {
            clusters.push(Cluster::seed(candidate));
            continue;
        }
        let best = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.has(candidate.method))
            .filter(|(_, c)| aligns(c.extent(), candidate.span, tolerance))
            .max_by(|(_, a), (_, b)| {
                let ia = a.extent().iou(&candidate.span);
                let ib = b.extent().iou(&candidate.span);
                ia.total_cmp(&ib)
                    .then(b.extent().start.cmp(&a.extent().start))
            })
            .map(|(idx, _)| idx);

        match best {
            Some(idx) => clusters[idx].members.push(candidate),
            None => clusters.push(Cluster::seed(candidate)),
        }
    }
    clusters
}

/// Turn clusters into non-overlapping ranges.
///
/// Confirmed clusters are placed first, strongest structural signal first,
/// and clipped against those already placed. Single-signal clusters that
/// overlap a confirmed range are absorbed; structural singletons called from
/// a confirmed range are shared helpers and stay outside every boundary.
pub(crate) fn resolve(clusters: Vec<Cluster>, doc: &SourceDocument) -> Vec<Resolved> {
    let (mut confirmed, mut singletons): (Vec<Cluster>, Vec<Cluster>) =
        clusters.into_iter().partition(Cluster::is_confirmed);

    confirmed.sort_by(|a, b| {
        b.structural_confidence()
            .total_cmp(&a.structural_confidence())
            .then(a.extent().start.cmp(&b.extent().start))
    });

    let mut placed: Vec<Resolved> = Vec::new();
    for cluster in &confirmed {
        let Some(span) = clip(doc, cluster.extent(), &placed) else {
            debug!("Dropping confirmed cluster {} fully covered by a stronger one", cluster.extent());
            continue;
        };
        placed.push(Resolved {
            span,
            confidence: cluster.confidence(),
            methods: cluster.methods(),
            name: cluster.name(),
            confirmed: true,
        });
    }

    singletons.sort_by(|a, b| {
        let (ma, mb) = (&a.members[0], &b.members[0]);
        ma.method
            .cmp(&mb.method)
            .then(mb.confidence.total_cmp(&ma.confidence))
            .then(ma.span.start.cmp(&mb.span.start))
    });

    let confirmed_spans: Vec<LineSpan> = placed.iter().map(|r| r.span).collect();
    for cluster in singletons {
        let candidate = &cluster.members[0];
        if placed.iter().any(|r| r.span.overlaps(&candidate.span)) {
            continue;
        }
        if candidate.method == DetectionMethod::Structural {
            if let Some(name) = candidate.name.as_deref() {
                if is_called_from(doc, name, &confirmed_spans) {
                    debug!("`{name}` at {} is a shared helper", candidate.span);
                    continue;
                }
            }
        }
        placed.push(Resolved {
            span: candidate.span,
            confidence: candidate.confidence,
            methods: vec![candidate.method],
            name: candidate.name.clone(),
            confirmed: false,
        });
    }

    placed.sort_by_key(|r| r.span.start);
    placed
}

/// Remove lines already owned by `placed`, keeping the larger remaining piece
fn clip(doc: &SourceDocument, span: LineSpan, placed: &[Resolved]) -> Option<LineSpan> {
    let mut span = span;
    for other in placed {
        if !span.overlaps(&other.span) {
            continue;
        }
        let before = (span.start < other.span.start)
            .then(|| LineSpan::new(span.start, other.span.start - 1));
        let after =
            (span.end > other.span.end).then(|| LineSpan::new(other.span.end + 1, span.end));
        span = match (before, after) {
            (Some(b), Some(a)) if a.len() > b.len() => a,
            (Some(b), _) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
    }
    let end = doc.lines().last_code_line(span.start, span.end)?;
    let start = (span.start..=end).find(|&l| !doc.lines().is_blank(l))?;
    Some(LineSpan::new(start, end))
}

fn is_called_from(doc: &SourceDocument, name: &str, spans: &[LineSpan]) -> bool {
    spans.iter().any(|span| {
        doc.lines()
            .identifiers_in(*span)
            .any(|i| i.kind == IdentKind::Use && i.name == name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse;

    fn candidate(method: DetectionMethod, start: usize, end: usize, confidence: f64) -> BoundaryCandidate {
        BoundaryCandidate::new(method, LineSpan::new(start, end), confidence)
    }

    #[test]
    fn test_alignment_rules() {
        assert!(aligns(LineSpan::new(3, 7), LineSpan::new(6, 7), 4));
        assert!(aligns(LineSpan::new(10, 30), LineSpan::new(12, 29), 4));
        // End lines too far apart
        assert!(!aligns(LineSpan::new(3, 20), LineSpan::new(5, 8), 4));
        // Barely touching
        assert!(!aligns(LineSpan::new(1, 10), LineSpan::new(10, 19), 4));
    }

    #[test]
    fn test_cluster_one_member_per_method() {
        let clusters = cluster(
            vec![
                candidate(DetectionMethod::Structural, 5, 10, 1.0),
                candidate(DetectionMethod::CommentMarker, 3, 10, 1.0),
                candidate(DetectionMethod::CommentMarker, 4, 10, 0.5),
            ],
            4,
        );
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].extent(), LineSpan::new(3, 10));
        assert!(clusters[0].is_confirmed());
        assert!(!clusters[1].is_confirmed());
    }

    #[test]
    fn test_semantic_segment_over_two_definitions_confirms_neither() {
        let clusters = cluster(
            vec![
                candidate(DetectionMethod::Structural, 3, 7, 0.9),
                candidate(DetectionMethod::Structural, 9, 13, 0.9),
                candidate(DetectionMethod::Semantic, 3, 13, 1.0),
            ],
            4,
        );
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|c| !c.is_confirmed()));
    }

    #[test]
    fn test_weighted_confidence() {
        let clusters = cluster(
            vec![
                candidate(DetectionMethod::Structural, 5, 10, 1.0),
                candidate(DetectionMethod::Semantic, 3, 10, 0.5),
            ],
            4,
        );
        assert_eq!(clusters.len(), 1);
        let expected = (0.5 * 1.0 + 0.2 * 0.5) / 0.7;
        assert!((clusters[0].confidence() - expected).abs() < 1e-9);
        // Semantic members add confidence, not extent
        assert_eq!(clusters[0].extent(), LineSpan::new(5, 10));
    }

    #[test]
    fn test_helper_singleton_is_not_a_boundary() {
        let code = "def load(path):\n    return path\n\ndef gap_scan(df):\n    rows = load(df)\n    return rows\n";
        let doc = parse(code).unwrap();
        let named = |start, end, confidence, name: &str| {
            let mut c = candidate(DetectionMethod::Structural, start, end, confidence);
            c.name = Some(name.to_string());
            c
        };
        let clusters = cluster(
            vec![
                named(1, 2, 0.8, "load"),
                named(4, 6, 1.0, "gap_scan"),
                candidate(DetectionMethod::Semantic, 4, 6, 1.0),
            ],
            4,
        );
        let resolved = resolve(clusters, &doc);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].span, LineSpan::new(4, 6));
        assert!(resolved[0].confirmed);
    }

    #[test]
    fn test_overlapping_confirmed_clusters_are_clipped() {
        let code = "a = 1\nb = a\nc = b\nd = c\ne = d\nf = e\ng = f\nh = g\n";
        let doc = parse(code).unwrap();
        let mut strong = Cluster::seed(candidate(DetectionMethod::Structural, 1, 5, 1.0));
        strong
            .members
            .push(candidate(DetectionMethod::CommentMarker, 1, 5, 1.0));
        let mut weak = Cluster::seed(candidate(DetectionMethod::Structural, 4, 8, 0.6));
        weak.members
            .push(candidate(DetectionMethod::Semantic, 4, 8, 1.0));

        let resolved = resolve(vec![weak, strong], &doc);
        let spans: Vec<LineSpan> = resolved.iter().map(|r| r.span).collect();
        assert_eq!(spans, vec![LineSpan::new(1, 5), LineSpan::new(6, 8)]);
    }
}
