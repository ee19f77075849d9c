//! Operation errors.
//!
//! Internally, failures are recoverable steps on the escalation ladder:
//! a bad classification fails open, an unparseable response is retried with a
//! repair instruction, a failed patch escalates. Only what survives every
//! fallback reaches the caller, as an [`OperationError`] that says whether
//! the content or the environment was at fault, what was tried and what it
//! cost.

use artisync_core::artifact::ValidationError;
use artisync_core::extract::ExtractionFailure;
use artisync_core::patch::PatchError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::escalation::Attempts;
use crate::session::SessionError;
use crate::usage::UsageRecord;

/// Who is to blame for a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The generated document or model output was unusable.
    Content,
    /// The execution environment or a provider failed.
    Environment,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Content => "content",
            FailureKind::Environment => "environment",
        })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("model request failed: {0:#}")]
    Model(anyhow::Error),
    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("artifact failed validation: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::InvalidInput(_)
            | SyncError::Extraction(_)
            | SyncError::Patch(_)
            | SyncError::Validation(_) => FailureKind::Content,
            SyncError::Model(_) | SyncError::Session(_) => FailureKind::Environment,
        }
    }

    pub fn retry_advice(&self) -> &'static str {
        match self {
            SyncError::InvalidInput(_) => "Fix the request and try again.",
            SyncError::Model(_) => "The model provider failed; retry later or check credentials.",
            SyncError::Extraction(_) | SyncError::Patch(_) | SyncError::Validation(_) => {
                "The generated document was unusable; retrying may produce a valid one, \
                 or simplify the instructions."
            }
            SyncError::Session(SessionError::Timeout { .. }) => {
                "The agent ran out of time; retry with a smaller dataset or a longer timeout."
            }
            SyncError::Session(SessionError::Disabled) => {
                "Enable a sandbox provider to allow regeneration."
            }
            SyncError::Session(_) => "The execution environment failed; retry later.",
        }
    }
}

/// A failed operation as seen by the caller.
#[derive(Debug, Error)]
#[error("{} failure after [{}]: {}", .error.kind(), .attempts, .error)]
pub struct OperationError {
    #[source]
    pub error: SyncError,
    pub attempts: Attempts,
    pub usage: UsageRecord,
}

impl OperationError {
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }

    pub fn retry_advice(&self) -> &'static str {
        self.error.retry_advice()
    }

    /// JSON report for the CLI.
    pub fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.error.to_string(),
            "kind": self.kind(),
            "retry_advice": self.retry_advice(),
            "attempts": self.attempts,
            "usage": self.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisync_core::artifact::StrategyKind;

    #[test]
    fn test_failure_kinds() {
        let v = SyncError::Validation(ValidationError::TooShort { len: 3, min: 200 });
        assert_eq!(v.kind(), FailureKind::Content);
        let s = SyncError::Session(SessionError::Timeout { secs: 5 });
        assert_eq!(s.kind(), FailureKind::Environment);
        assert!(s.retry_advice().contains("ran out of time"));
    }

    #[test]
    fn test_operation_error_display_and_report() {
        let mut attempts = Attempts::new();
        attempts.begin(StrategyKind::Direct);
        attempts.escalate(StrategyKind::Sandboxed, "validation failed");
        let err = OperationError {
            error: SyncError::Validation(ValidationError::MissingStructure("a closing </html> tag")),
            attempts,
            usage: UsageRecord::default(),
        };
        assert_eq!(
            err.to_string(),
            "content failure after [direct -> sandboxed]: artifact failed validation: document is missing a closing </html> tag"
        );
        let report = err.report();
        assert_eq!(report["kind"], "content");
        assert_eq!(report["attempts"]["strategies"][1], "sandboxed");
        assert_eq!(report["attempts"]["escalations"][0]["reason"], "validation failed");
    }
}
