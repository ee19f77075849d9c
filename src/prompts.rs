//! Prompt construction for every model and agent request.
//!
//! System prompts hold fixed instructions plus the caller's opaque style
//! text; user prompts hold the task data. Style text is passed through
//! verbatim and never interpreted.

use artisync_core::diff::Diff;
use artisync_core::profile::DataProfile;
use artisync_core::snapshot::Snapshot;

const DOCUMENT_RULES: &str = "\
The artifact is a single self-contained HTML document: it starts with <!DOCTYPE html>, \
contains <html> ... </html>, inlines all CSS and JavaScript, and loads nothing from \
the network except well-known CDN libraries.";

fn with_style(base: &str, style: Option<&str>) -> String {
    match style.map(str::trim).filter(|s| !s.is_empty()) {
        Some(style) => format!("{}\n\nStyle and branding guidance:\n{}", base, style),
        None => base.to_string(),
    }
}

pub fn generate_system(style: Option<&str>) -> String {
    let base = format!(
        "You turn data into a polished visual report.\n{}\n\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"html\": \"<the complete document>\", \"summary\": \"<one or two sentences describing it>\"}}",
        DOCUMENT_RULES
    );
    with_style(&base, style)
}

pub fn generate_user(
    snapshot: &Snapshot,
    profile: &DataProfile,
    rendered: &str,
    instructions: Option<&str>,
) -> String {
    let mut out = String::new();
    if let Some(instructions) = instructions {
        out.push_str(&format!("Instructions:\n{}\n\n", instructions));
    }
    match snapshot {
        Snapshot::Tabular(_) => {
            out.push_str(&format!("Data profile:\n{}\n", profile.summary()));
            out.push_str(&format!("Data (CSV):\n{}", rendered));
        }
        Snapshot::Text(_) => out.push_str(&format!("Content:\n{}", rendered)),
    }
    out
}

pub fn edits_system(style: Option<&str>) -> String {
    let base = format!(
        "You update an existing HTML document with minimal, targeted edits.\n{}\n\n\
         Each edit replaces one exact substring of the current document. Every `find` \
         must be copied verbatim from the document and must occur exactly once; \
         include enough surrounding markup to make it unique. Edits are applied in order, \
         each against the result of the previous ones.\n\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"edits\": [{{\"find\": \"...\", \"replace\": \"...\"}}], \"summary\": \"...\", \"changes\": [\"...\"]}}",
        DOCUMENT_RULES
    );
    with_style(&base, style)
}

pub fn edits_user(
    artifact: &str,
    rendered: &str,
    diff: Option<&Diff>,
    instructions: Option<&str>,
) -> String {
    let mut out = String::new();
    if let Some(instructions) = instructions {
        out.push_str(&format!("Requested change:\n{}\n\n", instructions));
    }
    if let Some(diff) = diff {
        out.push_str(&format!("What changed in the data:\n{}\n\n", diff.summary()));
        if !diff.cells.is_empty() {
            out.push_str("Changed cells (sample):\n");
            for cell in &diff.cells {
                out.push_str(&format!(
                    "- {} @ {}: {} -> {}\n",
                    cell.column,
                    serde_json::to_string(&cell.row).unwrap_or_default(),
                    cell.old,
                    cell.new
                ));
            }
            out.push('\n');
        }
    }
    out.push_str(&format!("Current data:\n{}\n\n", rendered));
    out.push_str(&format!("Current document:\n<document>\n{}\n</document>", artifact));
    out
}

pub fn classify_system() -> String {
    "You decide how to update a generated report after its source data changed.\n\
     Choose \"surgical-patch\" when targeted edits to the existing document can reflect \
     the change, or \"regenerate\" when the document must be rebuilt.\n\n\
     Respond with a single JSON object and nothing else:\n\
     {\"approach\": \"surgical-patch\" | \"regenerate\", \"reason\": \"...\"}"
        .to_string()
}

pub fn classify_user(summary: &str) -> String {
    format!("Change summary:\n{}", summary)
}

pub fn domain_judge_system() -> String {
    "You judge whether two versions of a dataset describe the same subject.\n\
     Respond with a single JSON object and nothing else:\n\
     {\"domainChanged\": true | false, \"reason\": \"...\"}"
        .to_string()
}

pub fn domain_judge_user(before: &Snapshot, after: &Snapshot, summary: &str) -> String {
    format!(
        "Before: {} with columns [{}]\nAfter: {} with columns [{}]\n\nChange summary:\n{}",
        before.kind(),
        before.columns().join(", "),
        after.kind(),
        after.columns().join(", "),
        summary
    )
}

pub fn triage_system() -> String {
    "You decide whether a requested change to a report needs new computation over the \
     underlying data (aggregations, filtering, new derived figures) or only presentation \
     changes to the existing document.\n\
     Respond with a single JSON object and nothing else:\n\
     {\"needsData\": true | false, \"reason\": \"...\"}"
        .to_string()
}

pub fn triage_user(instructions: &str, snapshot: &Snapshot) -> String {
    format!(
        "Requested change:\n{}\n\nData: {} with {} rows and columns [{}]",
        instructions,
        snapshot.kind(),
        snapshot.len(),
        snapshot.columns().join(", ")
    )
}

/// Appended to a retried request after an unparseable response.
pub fn repair_suffix(field: &str, reason: &str) -> String {
    format!(
        "\n\nYour previous reply could not be used ({}). Reply again with ONLY one valid JSON \
         object containing the \"{}\" field. No prose, no code fences, no trailing commas.",
        reason, field
    )
}

/// Agent task for a sandboxed run. File names are relative to the session.
pub struct AgentTask<'a> {
    pub data_file: &'a str,
    pub has_existing: bool,
    pub output_file: &'a str,
    pub instructions: Option<&'a str>,
    pub style: Option<&'a str>,
    pub diff_summary: Option<&'a str>,
}

pub fn agent_prompt(task: &AgentTask<'_>) -> String {
    let mut out = format!(
        "Build a visual HTML report from the data in `{}` (a profile of it is in `profile.json`).\n{}\n",
        task.data_file, DOCUMENT_RULES
    );
    if task.has_existing {
        out.push_str(
            "The current version of the report is in `existing.html`. Preserve its layout, \
             sections and look unless the data no longer supports them.\n",
        );
    }
    if let Some(summary) = task.diff_summary {
        out.push_str(&format!("What changed in the data:\n{}\n", summary));
    }
    if let Some(instructions) = task.instructions {
        out.push_str(&format!("Instructions:\n{}\n", instructions));
    }
    if let Some(style) = task.style.map(str::trim).filter(|s| !s.is_empty()) {
        out.push_str(&format!("Style and branding guidance:\n{}\n", style));
    }
    out.push_str(&format!(
        "Compute any figures from the data file with scripts rather than by hand. \
         Write the finished document to `{}`.",
        task.output_file
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_is_appended_verbatim() {
        let s = generate_system(Some("Use #FF5500 and the Inter font."));
        assert!(s.ends_with("Style and branding guidance:\nUse #FF5500 and the Inter font."));
        assert!(!generate_system(Some("   ")).contains("Style"));
    }

    #[test]
    fn test_agent_prompt_mentions_files() {
        let p = agent_prompt(&AgentTask {
            data_file: "data.csv",
            has_existing: true,
            output_file: "output.html",
            instructions: Some("Add a chart"),
            style: None,
            diff_summary: None,
        });
        assert!(p.contains("`data.csv`"));
        assert!(p.contains("existing.html"));
        assert!(p.contains("`output.html`"));
        assert!(p.contains("Add a chart"));
    }

    #[test]
    fn test_repair_suffix_names_field() {
        assert!(repair_suffix("edits", "field not found").contains("\"edits\""));
    }
}
