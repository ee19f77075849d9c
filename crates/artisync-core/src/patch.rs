//! Find/replace patch engine.
//!
//! Edits are applied in order against the *current* text, so a later edit
//! may match text introduced by an earlier one. Each edit succeeds only when
//! its `find` occurs exactly once; anything else is recorded as a failure and
//! the text is left as it was.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub find: String,
    pub replace: String,
}

impl Edit {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum EditFailure {
    NotFound,
    Ambiguous { occurrences: usize },
    EmptyFind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEdit {
    pub index: usize,
    pub edit: Edit,
    #[serde(flatten)]
    pub failure: EditFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    pub result: String,
    /// Indices (into the input edit list) of edits that applied.
    pub applied: Vec<usize>,
    pub failed: Vec<FailedEdit>,
}

#[derive(Debug, Clone, Error)]
pub enum PatchError {
    #[error("none of {} edits applied", failed.len())]
    NoEditsApplied { failed: Vec<FailedEdit> },
}

enum Matches {
    None,
    One(usize),
    Many(usize),
}

fn locate(haystack: &str, needle: &str) -> Matches {
    let mut found = haystack.match_indices(needle);
    match (found.next(), found.next()) {
        (None, _) => Matches::None,
        (Some((start, _)), None) => Matches::One(start),
        (Some(_), Some(_)) => Matches::Many(2 + found.count()),
    }
}

pub fn apply_edits(artifact: &str, edits: &[Edit]) -> Result<PatchOutcome, PatchError> {
    let mut text = artifact.to_string();
    let mut applied = Vec::new();
    let mut failed = Vec::new();

    for (index, edit) in edits.iter().enumerate() {
        let failure = if edit.find.is_empty() {
            Some(EditFailure::EmptyFind)
        } else {
            match locate(&text, &edit.find) {
                Matches::None => Some(EditFailure::NotFound),
                Matches::Many(occurrences) => Some(EditFailure::Ambiguous { occurrences }),
                Matches::One(start) => {
                    text.replace_range(start..start + edit.find.len(), &edit.replace);
                    applied.push(index);
                    None
                }
            }
        };
        if let Some(failure) = failure {
            failed.push(FailedEdit {
                index,
                edit: edit.clone(),
                failure,
            });
        }
    }

    if !edits.is_empty() && applied.is_empty() {
        return Err(PatchError::NoEditsApplied { failed });
    }

    Ok(PatchOutcome {
        result: text,
        applied,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_match_replaces() {
        let out = apply_edits("<td>10</td><td>20</td>", &[Edit::new("<td>10</td>", "<td>11</td>")])
            .unwrap();
        assert_eq!(out.result, "<td>11</td><td>20</td>");
        assert_eq!(out.applied, vec![0]);
        assert!(out.failed.is_empty());
    }

    #[test]
    fn test_sequential_dependency() {
        let out = apply_edits("A", &[Edit::new("A", "B"), Edit::new("B", "C")]).unwrap();
        assert_eq!(out.result, "C");
        assert_eq!(out.applied, vec![0, 1]);
    }

    #[test]
    fn test_ambiguous_is_rejected_with_count() {
        let err = apply_edits("X and X and X", &[Edit::new("X", "Y")]).unwrap_err();
        let PatchError::NoEditsApplied { failed } = err;
        assert_eq!(failed[0].failure, EditFailure::Ambiguous { occurrences: 3 });
    }

    #[test]
    fn test_partial_success_keeps_going() {
        let out = apply_edits(
            "alpha beta beta",
            &[
                Edit::new("gamma", "x"),
                Edit::new("beta", "y"),
                Edit::new("alpha", "a"),
                Edit::new("", "z"),
            ],
        )
        .unwrap();
        assert_eq!(out.result, "a beta beta");
        assert_eq!(out.applied, vec![2]);
        let reasons: Vec<_> = out.failed.iter().map(|f| f.failure.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                EditFailure::NotFound,
                EditFailure::Ambiguous { occurrences: 2 },
                EditFailure::EmptyFind
            ]
        );
    }

    #[test]
    fn test_empty_edit_set_is_noop() {
        let out = apply_edits("unchanged", &[]).unwrap();
        assert_eq!(out.result, "unchanged");
        assert!(out.applied.is_empty());
    }

    #[test]
    fn test_replacement_can_make_later_edit_ambiguous() {
        let out = apply_edits("ab", &[Edit::new("b", "a"), Edit::new("a", "c")]).unwrap();
        assert_eq!(out.result, "aa");
        assert_eq!(out.failed[0].failure, EditFailure::Ambiguous { occurrences: 2 });
    }

    #[test]
    fn test_failure_json_shape() {
        let f = FailedEdit {
            index: 0,
            edit: Edit::new("x", "y"),
            failure: EditFailure::Ambiguous { occurrences: 2 },
        };
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["reason"], "ambiguous");
        assert_eq!(json["occurrences"], 2);
        assert_eq!(json["edit"]["find"], "x");
    }
}
