use scanner_engine::{
    EngineResult, GeneratedTemplate, Namespace, ParameterSet, ScannerBoundary, ValidationStatus,
};

pub fn render_summary(result: &EngineResult) -> String {
    let mut out = render_boundaries(&result.boundaries);
    out.push('\n');

    for template in &result.templates {
        out.push_str(&format!(
            "template {}: {}\n",
            template.namespace,
            status_label(template)
        ));
    }
    let report = &result.validation_report;
    for collision in &report.cross_namespace_collisions {
        out.push_str(&format!(
            "contamination: `{}` declared in {} (line {}) reached from {} (line {})\n",
            collision.parameter,
            collision.owner,
            collision.source_line,
            collision.other,
            collision.evidence_line
        ));
    }
    for diagnostic in &result.diagnostics {
        out.push_str(&format!("diagnostic: {}\n", diagnostic.kind()));
    }
    out.push_str(&format!("{}\n", result.stats()));
    out
}

pub fn render_boundaries(boundaries: &[ScannerBoundary]) -> String {
    let mut out = String::new();
    out.push_str("| id | namespace | lines | confidence | methods | state |\n");
    out.push_str("|---:|---|---|---:|---|---|\n");
    for b in boundaries {
        let methods: Vec<&str> = b.agreeing_methods.iter().map(|m| m.as_str()).collect();
        out.push_str(&format!(
            "| {} | `{}` | {}-{} | {:.2} | {} | {} |\n",
            b.id,
            b.namespace,
            b.start_line,
            b.end_line,
            b.confidence,
            methods.join("+"),
            b.state.as_str()
        ));
    }
    out
}

pub fn render_parameters<'a>(sets: impl IntoIterator<Item = (&'a Namespace, &'a ParameterSet)>) -> String {
    let mut out = String::new();
    for (namespace, set) in sets {
        out.push_str(&format!("[{namespace}]\n"));
        if set.is_empty() {
            out.push_str("  (no parameters)\n");
        }
        for p in set.iter() {
            out.push_str(&format!(
                "  {} = {}  # {} {:.2}, line {}, {}\n",
                p.name,
                one_line(&p.raw_value, 60),
                p.role.as_str(),
                p.confidence,
                p.source_line,
                p.extraction_method.as_str()
            ));
        }
    }
    out
}

pub fn status_label(template: &GeneratedTemplate) -> String {
    match &template.validation_status {
        ValidationStatus::Emitted => "emitted".to_string(),
        ValidationStatus::SyntaxInvalid { line, message } => {
            format!("syntax_invalid at line {line}: {message}")
        }
        ValidationStatus::BlockedContamination => "blocked_contamination".to_string(),
    }
}

fn one_line(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
