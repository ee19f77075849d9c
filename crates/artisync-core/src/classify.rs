//! Update-strategy classification.
//!
//! The fast paths here are pure. When none of them fires, [`fast_path`]
//! returns [`FastPath::Undecided`] and the caller may consult a model with
//! the diff summary; whatever that call returns goes through
//! [`parse_model_label`], and anything unusable fails open to
//! [`Approach::SurgicalPatch`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::diff::Diff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Approach {
    NoOp,
    SurgicalPatch,
    Regenerate,
}

impl Approach {
    pub fn as_str(&self) -> &'static str {
        match self {
            Approach::NoOp => "no-op",
            Approach::SurgicalPatch => "surgical-patch",
            Approach::Regenerate => "regenerate",
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who made the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    Heuristic,
    Model,
    FailOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub approach: Approach,
    pub reason: String,
    pub decided_by: DecisionSource,
}

impl Classification {
    pub fn heuristic(approach: Approach, reason: impl Into<String>) -> Self {
        Self {
            approach,
            reason: reason.into(),
            decided_by: DecisionSource::Heuristic,
        }
    }

    pub fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            approach: Approach::SurgicalPatch,
            reason: reason.into(),
            decided_by: DecisionSource::FailOpen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRules {
    /// Schema changes (added + removed columns) still handled by patching.
    pub max_schema_changes: usize,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            max_schema_changes: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastPath {
    Decided(Classification),
    /// No rule fired; the summary is what a model may see.
    Undecided { summary: String },
}

pub fn fast_path(diff: &Diff, rules: &ClassifierRules) -> FastPath {
    if diff.unchanged {
        return FastPath::Decided(Classification::heuristic(
            Approach::NoOp,
            "snapshots are identical",
        ));
    }
    if diff.domain.changed {
        return FastPath::Decided(Classification::heuristic(
            Approach::Regenerate,
            format!("domain changed: {}", diff.domain.reason),
        ));
    }
    let schema_changes = diff.schema.change_count();
    if schema_changes <= rules.max_schema_changes {
        return FastPath::Decided(Classification::heuristic(
            Approach::SurgicalPatch,
            format!(
                "{} schema change{} within limit of {}",
                schema_changes,
                if schema_changes == 1 { "" } else { "s" },
                rules.max_schema_changes
            ),
        ));
    }
    FastPath::Undecided {
        summary: diff.summary(),
    }
}

/// Interpret a model's `{"approach", "reason"}` object. Only the two
/// update approaches are accepted; `None` means the caller should fail open.
pub fn parse_model_label(obj: &serde_json::Map<String, serde_json::Value>) -> Option<Classification> {
    let approach = match obj.get("approach")?.as_str()?.trim() {
        "surgical-patch" => Approach::SurgicalPatch,
        "regenerate" => Approach::Regenerate,
        _ => return None,
    };
    let reason = obj
        .get("reason")
        .and_then(|r| r.as_str())
        .unwrap_or("no reason given")
        .to_string();
    Some(Classification {
        approach,
        reason,
        decided_by: DecisionSource::Model,
    })
}
