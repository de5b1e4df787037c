//! Report generation.
//!
//! Renders a [`RunOutcome`] or a [`DateReport`] as plain text, Markdown or
//! JSON.

use crate::models::{DateReport, Finding, RunOutcome};
use anyhow::Result;
use std::io::Write;
use std::path::Path;

/// The one-line answer printed by default.
pub fn generate_text_report(outcome: &RunOutcome) -> String {
    format!("Final Result: {}\n", outcome.answer.direct_answer)
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(outcome: &RunOutcome) -> String {
    let mut output = String::new();

    output.push_str("# Budget Q&A Report\n\n");
    output.push_str(&generate_metadata_section(outcome));
    output.push_str(&generate_answer_section(outcome));
    output.push_str(&generate_reasoning_section(outcome));
    output.push_str(&generate_findings_section(outcome));
    output.push_str(&generate_history_section(&outcome.history));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(outcome: &RunOutcome) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Query:** {}\n", outcome.query));
    section.push_str(&format!(
        "- **Finished:** {}\n",
        outcome.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", outcome.model_used));
    section.push_str(&format!("- **Rounds:** {}\n", outcome.loop_count));
    section.push_str(&format!("- **Duration:** {:.1}s\n", outcome.duration_seconds));
    section.push('\n');

    section
}

fn generate_answer_section(outcome: &RunOutcome) -> String {
    format!("## Answer\n\n{}\n\n", outcome.answer.direct_answer)
}

fn generate_reasoning_section(outcome: &RunOutcome) -> String {
    let mut section = String::new();

    section.push_str("## Supervisor\n\n");
    let trail: Vec<&str> = outcome
        .routes
        .iter()
        .map(|r| r.as_str())
        .chain(std::iter::once("FINISH"))
        .collect();
    section.push_str(&format!("- **Route:** {}\n", trail.join(" → ")));
    section.push_str(&format!("- **Final reasoning:** {}\n\n", outcome.reasoning));

    section
}

fn generate_findings_section(outcome: &RunOutcome) -> String {
    let mut section = String::new();

    section.push_str("## Findings\n\n");
    section.push_str(&generate_finding_block("Revenue", outcome.revenue.as_ref()));
    section.push_str(&generate_finding_block("Expenditure", outcome.expenditure.as_ref()));

    section
}

fn generate_finding_block(title: &str, finding: Option<&Finding>) -> String {
    match finding {
        None => format!("### {}\n\n*No finding.*\n\n", title),
        Some(finding) => {
            let kind = if finding.is_structured() {
                "structured"
            } else {
                "raw summary"
            };
            format!("### {} ({})\n\n{}\n\n", title, kind, finding.text())
        }
    }
}

fn generate_history_section(history: &[String]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Past Actions\n\n");
    for (i, entry) in history.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, entry));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    format!("---\n\n*Report generated by budget-qa v{}*\n", env!("CARGO_PKG_VERSION"))
}

/// Generate a JSON report.
pub fn generate_json_report(outcome: &RunOutcome) -> Result<String> {
    serde_json::to_string_pretty(outcome).map_err(Into::into)
}

/// One line per dated statement.
pub fn generate_date_text_report(report: &DateReport) -> String {
    if report.records.is_empty() {
        return format!(
            "No dates found on pages {}.\n",
            join_pages(&report.pages)
        );
    }

    let mut output = String::new();
    for record in &report.records {
        let date = if record.normalized_date.is_empty() {
            "unknown"
        } else {
            record.normalized_date.as_str()
        };
        output.push_str(&format!(
            "[page {}] {} {}: {}\n",
            record.page,
            date,
            record.status,
            single_line(&record.original_text)
        ));
    }
    output
}

/// Markdown table of the dated statements.
pub fn generate_date_markdown_report(report: &DateReport) -> String {
    let mut output = String::new();

    output.push_str("# Budget Date Status Report\n\n");
    output.push_str("## Metadata\n\n");
    output.push_str(&format!("- **Pages:** {}\n", join_pages(&report.pages)));
    output.push_str(&format!("- **Reference date:** {}\n", report.reference_date));
    output.push_str(&format!(
        "- **Finished:** {}\n",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!("- **Model Used:** `{}`\n", report.model_used));
    output.push_str(&format!("- **Duration:** {:.1}s\n", report.duration_seconds));
    if report.skipped > 0 {
        output.push_str(&format!("- **Skipped blocks:** {}\n", report.skipped));
    }
    output.push('\n');

    output.push_str("## Dates\n\n");
    if report.records.is_empty() {
        output.push_str("*No dates found.*\n\n");
    } else {
        output.push_str("| Page | Date | Status | Text |\n");
        output.push_str("|---:|---|---|---|\n");
        for record in &report.records {
            output.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                record.page,
                record.normalized_date,
                record.status,
                single_line(&record.original_text).replace('|', "\\|")
            ));
        }
        output.push('\n');
    }

    output.push_str(&generate_footer());
    output
}

/// Generate a JSON date report.
pub fn generate_date_json_report(report: &DateReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

fn join_pages(pages: &[u32]) -> String {
    let pages: Vec<String> = pages.iter().map(u32::to_string).collect();
    pages.join(", ")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
