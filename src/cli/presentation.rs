//! CLI presentation: text and json formatters.

use crate::cli::route::ScriptReport;
use crate::error::EngineError;

pub fn format_script_report_text(report: &ScriptReport) -> String {
    let mut s = String::new();
    for outcome in &report.commands {
        s.push_str(&format!(
            "{:>4}  {:<11}  {}",
            outcome.line,
            outcome.status.to_string(),
            outcome.command
        ));
        if let Some(result) = &outcome.result {
            s.push_str(&format!("  -> {}", result));
        }
        for error in &outcome.errors {
            s.push_str(&format!("\n        {}", error));
        }
        s.push('\n');
    }

    s.push_str("\nRegistry:");
    if report.registry.groups.is_empty() {
        s.push_str("\n  (empty)");
    }
    for group in &report.registry.groups {
        s.push_str(&format!(
            "\n  {} {} {}x{}x{}",
            group.id, group.name, group.dims[0], group.dims[1], group.dims[2]
        ));
        for resource in &group.resources {
            let marker = if report.registry.active.as_deref() == Some(resource.id.as_str()) {
                "*"
            } else {
                " "
            };
            s.push_str(&format!(
                "\n   {}{} {} ({}, {}) provenance={} hash={}",
                marker,
                resource.id,
                resource.name,
                resource.kind,
                resource.state,
                resource.provenance_id,
                &resource.content_hash[..12.min(resource.content_hash.len())]
            ));
        }
    }
    s.push_str(&format!(
        "\n\nUndo items: {}  Redo items: {}  Provenance steps: {}",
        report.undo_items, report.redo_items, report.provenance_steps
    ));
    s
}

pub fn format_script_report_json(report: &ScriptReport) -> Result<String, EngineError> {
    serde_json::to_string_pretty(report).map_err(|e| EngineError::Io(e.into()))
}

pub fn format_usage(lines: &[String]) -> String {
    lines.join("\n")
}
