//! Generated artifacts and their structural validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::snapshot::SnapshotId;

/// Synthesis strategy, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Single structured-output model request.
    Direct,
    /// Agent process inside an execution session.
    Sandboxed,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::Direct => "direct",
            StrategyKind::Sandboxed => "sandboxed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub strategy: StrategyKind,
    pub model: String,
    /// Credits charged for the whole operation that produced this artifact.
    pub credits: u64,
    /// Agent turns, zero for Direct.
    pub turns: u32,
    pub generated_at: DateTime<Utc>,
}

/// One version of a generated document. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub content: String,
    pub source_snapshot: SnapshotId,
    pub summary: String,
    pub metadata: GenerationMetadata,
}

impl Artifact {
    pub fn new(
        content: String,
        source_snapshot: SnapshotId,
        summary: String,
        metadata: GenerationMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            source_snapshot,
            summary,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRules {
    pub min_length: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self { min_length: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("document is {len} characters, shorter than the {min} minimum")]
    TooShort { len: usize, min: usize },
    #[error("document is missing {0}")]
    MissingStructure(&'static str),
}

/// Structural sanity check on a complete HTML document.
pub fn validate_document(html: &str, rules: &ValidationRules) -> Result<(), ValidationError> {
    let len = html.trim().chars().count();
    if len < rules.min_length {
        return Err(ValidationError::TooShort {
            len,
            min: rules.min_length,
        });
    }
    let lower = html.to_ascii_lowercase();
    if !lower.contains("<html") && !lower.contains("<!doctype html") {
        return Err(ValidationError::MissingStructure("an opening <html> tag"));
    }
    if !lower.contains("</html>") {
        return Err(ValidationError::MissingStructure("a closing </html> tag"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<!DOCTYPE html><html><head><title>t</title></head><body>{}</body></html>", body)
    }

    #[test]
    fn test_valid_document() {
        let html = page(&"x".repeat(300));
        assert!(validate_document(&html, &ValidationRules::default()).is_ok());
    }

    #[test]
    fn test_too_short() {
        let err = validate_document(&page(""), &ValidationRules::default()).unwrap_err();
        assert!(matches!(err, ValidationError::TooShort { min: 200, .. }));
    }

    #[test]
    fn test_missing_close_tag() {
        let html = format!("<HTML><body>{}</body>", "y".repeat(300));
        let err = validate_document(&html, &ValidationRules::default()).unwrap_err();
        assert_eq!(err, ValidationError::MissingStructure("a closing </html> tag"));
    }

    #[test]
    fn test_fragment_rejected() {
        let html = format!("<div>{}</div></html>", "z".repeat(300));
        let err = validate_document(&html, &ValidationRules::default()).unwrap_err();
        assert_eq!(err, ValidationError::MissingStructure("an opening <html> tag"));
    }

    #[test]
    fn test_strategy_order_and_labels() {
        assert!(StrategyKind::Direct < StrategyKind::Sandboxed);
        assert_eq!(serde_json::to_value(StrategyKind::Sandboxed).unwrap(), "sandboxed");
        assert_eq!(StrategyKind::Direct.to_string(), "direct");
    }
}
