use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use super::{BoundaryCandidate, BoundarySignal};
use crate::source::SourceDocument;
use crate::types::{DetectionMethod, LineSpan};

static DECORATION_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#+\s*[=\-*~_#]{3,}\s*$").expect("valid decoration regex"));

static TITLED_DECORATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#+\s*(?P<deco>[=\-*~_#])[=\-*~_#]{2,}\s*(?P<title>[^\s=\-*~_#].*?)\s*[=\-*~_#]*\s*$")
        .expect("valid titled banner regex")
});

static KEYWORD_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^#+\s*(?:scanner|strategy|screener|scan|setup|signal)\s*(?:#?\s*\d+)?\s*[:\-–]\s*(?P<title>\S.*?)\s*$",
    )
    .expect("valid keyword banner regex")
});

static TITLE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:scanner|strategy|screener|scan|setup|signal)\s*(?:#?\s*\d+)?\s*[:\-–]\s*(?P<rest>\S.*)$")
        .expect("valid title prefix regex")
});

/// Lines that look like scanner-name banners
pub struct MarkerSignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Marker {
    pub line: usize,
    /// Last line of the banner itself (boxes span several lines)
    pub last_line: usize,
    pub title: Option<String>,
    pub style: String,
}

impl BoundarySignal for MarkerSignal {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::CommentMarker
    }

    fn propose(&self, doc: &SourceDocument) -> Vec<BoundaryCandidate> {
        let markers = find_markers(doc);
        if markers.is_empty() {
            return Vec::new();
        }

        let mut style_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for marker in &markers {
            *style_counts.entry(marker.style.as_str()).or_default() += 1;
        }

        let lines = doc.lines();
        let main_guard = doc.main_guard_line();
        let total = markers.len() as f64;
        let mut out = Vec::with_capacity(markers.len());

        for (idx, marker) in markers.iter().enumerate() {
            let mut raw_end = markers
                .get(idx + 1)
                .map_or(lines.len(), |next| next.line.saturating_sub(1));
            if let Some(guard) = main_guard {
                if guard > marker.line && guard <= raw_end {
                    raw_end = guard - 1;
                }
            }
            let Some(end) = lines.last_code_line(marker.line, raw_end) else {
                continue;
            };

            let code_lines = (marker.last_line + 1..=end)
                .filter(|&l| !lines.is_blank(l) && !lines.is_comment(l))
                .count();

            let regularity = style_counts
                .get(marker.style.as_str())
                .copied()
                .unwrap_or(0) as f64
                / total;
            let mut confidence = 0.5 + 0.25 * regularity;
            if marker.title.is_some() {
                confidence += 0.25;
            }
            if code_lines < 2 {
                confidence *= 0.5;
            }

            let mut candidate = BoundaryCandidate::new(
                DetectionMethod::CommentMarker,
                LineSpan::new(marker.line, end),
                confidence.min(1.0),
            );
            candidate.name = marker.title.clone();
            out.push(candidate);
        }

        out
    }
}

/// Column-0 banner comments in document order
pub(crate) fn find_markers(doc: &SourceDocument) -> Vec<Marker> {
    let lines = doc.lines();
    let comments: BTreeMap<usize, &str> = lines
        .comments()
        .iter()
        .filter(|c| c.column == 1)
        .map(|c| (c.line, c.text.trim_end()))
        .collect();

    let mut markers: Vec<Marker> = Vec::new();
    let mut skip_until = 0;

    for (&line, &text) in &comments {
        if line <= skip_until {
            continue;
        }

        if DECORATION_ONLY.is_match(text) {
            let style = decoration_style(text);
            if let Some((title, closing)) = boxed_title(&comments, line) {
                markers.push(Marker {
                    line,
                    last_line: closing,
                    title: Some(title),
                    style,
                });
                skip_until = closing;
                continue;
            }
            let near_previous = markers
                .last()
                .is_some_and(|m| line <= m.last_line + 2);
            if !near_previous {
                markers.push(Marker {
                    line,
                    last_line: line,
                    title: None,
                    style,
                });
            }
            continue;
        }

        if let Some(caps) = KEYWORD_BANNER.captures(text) {
            markers.push(Marker {
                line,
                last_line: line,
                title: caps.name("title").map(|m| clean_title(m.as_str())),
                style: "keyword".to_string(),
            });
            continue;
        }

        if let Some(caps) = TITLED_DECORATION.captures(text) {
            markers.push(Marker {
                line,
                last_line: line,
                title: caps.name("title").map(|m| clean_title(m.as_str())),
                style: caps
                    .name("deco")
                    .map_or_else(String::new, |m| m.as_str().to_string()),
            });
        }
    }

    markers
}

/// Decoration / 1-3 title lines / decoration box starting at `line`
fn boxed_title(comments: &BTreeMap<usize, &str>, line: usize) -> Option<(String, usize)> {
    let mut title: Option<String> = None;
    for offset in 1..=4 {
        let text = comments.get(&(line + offset))?;
        if DECORATION_ONLY.is_match(text) {
            return title.map(|t| (t, line + offset));
        }
        if title.is_none() {
            let inner = text.trim_start_matches('#').trim();
            if !inner.is_empty() {
                title = Some(clean_title(inner));
            }
        }
    }
    None
}

fn decoration_style(text: &str) -> String {
    text.trim_start_matches('#')
        .trim()
        .chars()
        .next()
        .map_or_else(|| "#".to_string(), |c| c.to_string())
}

fn clean_title(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches(|c: char| "=-*~_#".contains(c))
        .trim();
    match TITLE_PREFIX.captures(trimmed) {
        Some(caps) => caps
            .name("rest")
            .map_or(trimmed, |m| m.as_str())
            .trim()
            .to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse;
    use pretty_assertions::assert_eq;

    const BANNERS: &str = r#"import pandas as pd

# ==== Scanner: Gap Up ====
GAP_MIN = 0.04

def gap_scan(df):
    return df[df.gap > GAP_MIN]

# ==== Scanner: Volume Spike ====
RVOL_MIN = 3.0

def volume_scan(df):
    return df[df.rvol > RVOL_MIN]
"#;

    #[test]
    fn test_titled_banners() {
        let doc = parse(BANNERS).unwrap();
        let markers = find_markers(&doc);
        let titles: Vec<_> = markers.iter().filter_map(|m| m.title.clone()).collect();
        assert_eq!(titles, vec!["Gap Up".to_string(), "Volume Spike".to_string()]);
    }

    #[test]
    fn test_sections_stop_before_next_banner() {
        let doc = parse(BANNERS).unwrap();
        let candidates = MarkerSignal.propose(&doc);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].span, LineSpan::new(3, 7));
        assert_eq!(candidates[1].span, LineSpan::new(9, 13));
        assert!(candidates.iter().all(|c| (c.confidence - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_box_banner_collapses() {
        let code = "# ==========\n# Momentum scanner\n# ==========\ndef momentum_scan(df):\n    return df\n";
        let doc = parse(code).unwrap();
        let markers = find_markers(&doc);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].line, 1);
        assert_eq!(markers[0].last_line, 3);
        assert_eq!(markers[0].title.as_deref(), Some("Momentum scanner"));
    }

    #[test]
    fn test_keyword_banner() {
        let doc = parse("# Scanner 2: Low Float Runner\nx = 1\ny = 2\n").unwrap();
        let markers = find_markers(&doc);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].title.as_deref(), Some("Low Float Runner"));
        assert_eq!(markers[0].style, "keyword");
    }

    #[test]
    fn test_plain_comments_are_not_markers() {
        let doc = parse("# compute the gap\nx = 1\n\ndef f():\n    # inside\n    return x\n").unwrap();
        assert!(find_markers(&doc).is_empty());
    }

    #[test]
    fn test_section_clipped_at_main_guard() {
        let code = "# === Gap ===\ndef gap_scan(df):\n    return df\n\nif __name__ == \"__main__\":\n    gap_scan(None)\n";
        let doc = parse(code).unwrap();
        let candidates = MarkerSignal.propose(&doc);
        assert_eq!(candidates[0].span, LineSpan::new(1, 3));
    }
}
