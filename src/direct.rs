//! Direct strategy: one structured-output model request per attempt.
//!
//! | Call             | Expected object                                            |
//! |------------------|------------------------------------------------------------|
//! | `synthesize`     | `{"html": string, "summary": string}`                      |
//! | `propose_edits`  | `{"edits": [{"find", "replace"}], "summary", "changes"?}`  |
//!
//! Output is extracted (with `direct.repair_retries` repair rounds), then
//! type-checked; nothing from the model is acted on before both steps pass.

use artisync_core::diff::Diff;
use artisync_core::extract::{string_field, ExtractionFailure};
use artisync_core::patch::Edit;
use artisync_core::profile::profile;
use artisync_core::snapshot::Snapshot;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::config::DirectConfig;
use crate::engine::Brief;
use crate::error::SyncError;
use crate::model::{request_object, ModelClient, ModelRequest, RequestPurpose};
use crate::prompts;
use crate::usage::UsageLedger;

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub html: String,
    pub summary: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct EditProposal {
    pub edits: Vec<Edit>,
    pub summary: String,
    pub changes: Vec<String>,
    pub model: String,
}

pub struct DirectStrategy {
    client: Arc<dyn ModelClient>,
    config: DirectConfig,
    max_tokens: u32,
}

impl DirectStrategy {
    pub fn new(client: Arc<dyn ModelClient>, config: DirectConfig, max_tokens: u32) -> Self {
        Self {
            client,
            config,
            max_tokens,
        }
    }

    /// Whether the snapshot is small enough to send in a single request.
    pub fn fits(&self, snapshot: &Snapshot) -> bool {
        match snapshot {
            Snapshot::Tabular(t) => t.rows().len() <= self.config.max_rows,
            Snapshot::Text(t) => t.content().chars().count() <= self.config.max_text_chars,
        }
    }

    fn render(&self, snapshot: &Snapshot) -> String {
        match snapshot {
            Snapshot::Tabular(_) => snapshot.render(Some(self.config.max_rows)),
            Snapshot::Text(t) => t.content().chars().take(self.config.max_text_chars).collect(),
        }
    }

    pub async fn synthesize(
        &self,
        snapshot: &Snapshot,
        brief: &Brief,
        ledger: &mut UsageLedger,
    ) -> Result<Synthesis, SyncError> {
        let data_profile = profile(snapshot);
        let request = ModelRequest {
            purpose: RequestPurpose::Generate,
            system: prompts::generate_system(brief.style.as_deref()),
            user: prompts::generate_user(
                snapshot,
                &data_profile,
                &self.render(snapshot),
                brief.instructions.as_deref(),
            ),
            max_tokens: self.max_tokens,
        };
        let (obj, model) = request_object(
            self.client.as_ref(),
            &request,
            "html",
            self.config.repair_retries,
            ledger,
        )
        .await?;

        let html = string_field(&obj, "html")
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| invalid("html", "html must be a non-empty string"))?;
        let summary = string_field(&obj, "summary").unwrap_or_default();
        info!(html_len = html.len(), "direct synthesis returned a document");
        Ok(Synthesis {
            html,
            summary,
            model,
        })
    }

    pub async fn propose_edits(
        &self,
        artifact: &str,
        snapshot: &Snapshot,
        diff: Option<&Diff>,
        brief: &Brief,
        ledger: &mut UsageLedger,
    ) -> Result<EditProposal, SyncError> {
        let request = ModelRequest {
            purpose: RequestPurpose::ProposeEdits,
            system: prompts::edits_system(brief.style.as_deref()),
            user: prompts::edits_user(
                artifact,
                &self.render(snapshot),
                diff,
                brief.instructions.as_deref(),
            ),
            max_tokens: self.max_tokens,
        };
        let (obj, model) = request_object(
            self.client.as_ref(),
            &request,
            "edits",
            self.config.repair_retries,
            ledger,
        )
        .await?;

        let edits = parse_edits(&obj)?;
        let changes = obj
            .get("changes")
            .and_then(|c| c.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        info!(edits = edits.len(), "direct strategy proposed edits");
        Ok(EditProposal {
            edits,
            summary: string_field(&obj, "summary").unwrap_or_default(),
            changes,
            model,
        })
    }
}

fn invalid(field: &str, reason: &str) -> SyncError {
    SyncError::Extraction(ExtractionFailure {
        field: field.to_string(),
        reason: reason.to_string(),
        preview: String::new(),
    })
}

/// Every element must be an object with string `find` and `replace`.
fn parse_edits(obj: &Map<String, Value>) -> Result<Vec<Edit>, SyncError> {
    let items = obj
        .get("edits")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("edits", "edits must be an array"))?;
    items
        .iter()
        .map(|item| {
            let find = item.get("find").and_then(|f| f.as_str());
            let replace = item.get("replace").and_then(|r| r.as_str());
            match (find, replace) {
                (Some(find), Some(replace)) => Ok(Edit::new(find, replace)),
                _ => Err(invalid(
                    "edits",
                    "each edit must have string find and replace fields",
                )),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;
    use serde_json::json;

    fn strategy(client: Arc<ScriptedClient>) -> DirectStrategy {
        DirectStrategy::new(client, DirectConfig::default(), 1000)
    }

    fn snapshot() -> Snapshot {
        Snapshot::text("Quarterly revenue rose.")
    }

    #[tokio::test]
    async fn test_synthesize_parses_fenced_reply() {
        let client = Arc::new(ScriptedClient::new());
        client.push(
            RequestPurpose::Generate,
            "Here you go:\n```json\n{\"html\": \"<html>x</html>\", \"summary\": \"a report\"}\n```",
        );
        let mut ledger = UsageLedger::new();
        let out = strategy(client.clone())
            .synthesize(&snapshot(), &Brief::default(), &mut ledger)
            .await
            .unwrap();
        assert_eq!(out.html, "<html>x</html>");
        assert_eq!(out.summary, "a report");
        assert_eq!(ledger.model_calls(), 1);
    }

    #[tokio::test]
    async fn test_repair_retry_then_success() {
        let client = Arc::new(ScriptedClient::new());
        client.push(RequestPurpose::Generate, "I could not do that.");
        client.push(RequestPurpose::Generate, "{\"html\": \"<html>ok</html>\", \"summary\": \"s\"}");
        let mut ledger = UsageLedger::new();
        let out = strategy(client.clone())
            .synthesize(&snapshot(), &Brief::default(), &mut ledger)
            .await
            .unwrap();
        assert_eq!(out.html, "<html>ok</html>");
        assert_eq!(ledger.model_calls(), 2);
        let requests = client.requests();
        assert!(requests[1].user.contains("could not be used"));
    }

    #[tokio::test]
    async fn test_repair_retries_exhausted() {
        let client = Arc::new(ScriptedClient::new());
        client.push(RequestPurpose::Generate, "nope");
        client.push(RequestPurpose::Generate, "still nope");
        let mut ledger = UsageLedger::new();
        let err = strategy(client)
            .synthesize(&snapshot(), &Brief::default(), &mut ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));
        assert_eq!(ledger.model_calls(), 2);
    }

    #[tokio::test]
    async fn test_non_string_html_rejected() {
        let client = Arc::new(ScriptedClient::new());
        client.push(RequestPurpose::Generate, "{\"html\": 42}");
        let err = strategy(client)
            .synthesize(&snapshot(), &Brief::default(), &mut UsageLedger::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-empty string"));
    }

    #[tokio::test]
    async fn test_propose_edits() {
        let client = Arc::new(ScriptedClient::new());
        client.push(
            RequestPurpose::ProposeEdits,
            &json!({
                "edits": [{"find": "10", "replace": "11"}],
                "summary": "updated revenue",
                "changes": ["EMEA revenue 10 -> 11"]
            })
            .to_string(),
        );
        let out = strategy(client)
            .propose_edits("<td>10</td>", &snapshot(), None, &Brief::default(), &mut UsageLedger::new())
            .await
            .unwrap();
        assert_eq!(out.edits, vec![Edit::new("10", "11")]);
        assert_eq!(out.changes, vec!["EMEA revenue 10 -> 11".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_edit_rejects_proposal() {
        let client = Arc::new(ScriptedClient::new());
        client.push(RequestPurpose::ProposeEdits, "{\"edits\": [{\"find\": \"a\"}]}");
        let err = strategy(client)
            .propose_edits("a", &snapshot(), None, &Brief::default(), &mut UsageLedger::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));
    }

    #[test]
    fn test_fits_respects_max_rows() {
        let client = Arc::new(ScriptedClient::new());
        let direct = DirectStrategy::new(
            client,
            DirectConfig {
                max_rows: 1,
                ..DirectConfig::default()
            },
            1000,
        );
        let cols = vec!["a".to_string()];
        let row = |v: f64| -> artisync_core::Row {
            std::iter::once(("a".to_string(), artisync_core::Value::Number(v))).collect()
        };
        assert!(direct.fits(&Snapshot::tabular(cols.clone(), vec![row(1.0)])));
        assert!(!direct.fits(&Snapshot::tabular(cols, vec![row(1.0), row(2.0)])));
    }
}
