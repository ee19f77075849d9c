//! Strategy classification and instruction triage.
//!
//! Both calls fail safe: classification falls open to `surgical-patch`
//! (a bad patch is detected and escalated later), triage falls back to
//! "no data needed" (Direct is tried first, then escalation applies).

use artisync_core::classify::{
    fast_path, parse_model_label, Classification, ClassifierRules, FastPath,
};
use artisync_core::diff::Diff;
use artisync_core::snapshot::Snapshot;
use std::sync::Arc;
use tracing::{info, warn};

use crate::model::{request_object, ModelClient, ModelRequest, RequestPurpose};
use crate::prompts;
use crate::usage::UsageLedger;

const CLASSIFY_MAX_TOKENS: u32 = 300;

pub struct Classifier {
    rules: ClassifierRules,
    assistant: Option<Arc<dyn ModelClient>>,
}

impl Classifier {
    pub fn new(rules: ClassifierRules, assistant: Option<Arc<dyn ModelClient>>) -> Self {
        Self { rules, assistant }
    }

    pub async fn classify(&self, diff: &Diff, ledger: &mut UsageLedger) -> Classification {
        let summary = match fast_path(diff, &self.rules) {
            FastPath::Decided(c) => {
                info!(approach = %c.approach, reason = %c.reason, "classified by heuristic");
                return c;
            }
            FastPath::Undecided { summary } => summary,
        };

        let Some(client) = &self.assistant else {
            return Classification::fail_open("no model available for an undecided diff");
        };

        let request = ModelRequest {
            purpose: RequestPurpose::Classify,
            system: prompts::classify_system(),
            user: prompts::classify_user(&summary),
            max_tokens: CLASSIFY_MAX_TOKENS,
        };
        let classification = match request_object(client.as_ref(), &request, "approach", 0, ledger).await {
            Ok((obj, _)) => parse_model_label(&obj).unwrap_or_else(|| {
                warn!(label = ?obj.get("approach"), "unusable classification label; failing open");
                Classification::fail_open("model returned an unusable label")
            }),
            Err(e) => {
                warn!(error = %e, "classification request failed; failing open");
                Classification::fail_open(format!("classification failed: {}", e))
            }
        };
        info!(
            approach = %classification.approach,
            decided_by = ?classification.decided_by,
            "classified with model assistance"
        );
        classification
    }

    /// Whether an instruction needs computation over the data.
    pub async fn needs_data(
        &self,
        instructions: &str,
        snapshot: &Snapshot,
        ledger: &mut UsageLedger,
    ) -> bool {
        let Some(client) = &self.assistant else {
            return false;
        };
        let request = ModelRequest {
            purpose: RequestPurpose::Triage,
            system: prompts::triage_system(),
            user: prompts::triage_user(instructions, snapshot),
            max_tokens: CLASSIFY_MAX_TOKENS,
        };
        match request_object(client.as_ref(), &request, "needsData", 0, ledger).await {
            Ok((obj, _)) => {
                let needs = obj.get("needsData").and_then(|v| v.as_bool()).unwrap_or(false);
                info!(needs_data = needs, "instruction triaged");
                needs
            }
            Err(e) => {
                warn!(error = %e, "instruction triage failed; assuming presentation-only");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;
    use artisync_core::billing::TokenUsage;
    use artisync_core::classify::{Approach, DecisionSource};
    use artisync_core::diff::{compute_diff, DiffOptions};
    use artisync_core::snapshot::{Row, Value};

    fn wide(columns: &[&str]) -> Snapshot {
        let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let row: Row = cols.iter().map(|c| (c.clone(), Value::Number(1.0))).collect();
        Snapshot::tabular(cols, vec![row])
    }

    /// Four added columns: past the schema-change limit, domain not changed.
    fn undecided_diff() -> Diff {
        let before = wide(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        let after = wide(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"]);
        let diff = compute_diff(&before, &after, &DiffOptions::default());
        assert!(!diff.domain.changed);
        assert_eq!(diff.schema.change_count(), 4);
        diff
    }

    fn classifier(client: &Arc<ScriptedClient>) -> Classifier {
        let assistant: Arc<dyn ModelClient> = client.clone();
        Classifier::new(ClassifierRules::default(), Some(assistant))
    }

    #[tokio::test]
    async fn test_model_label_is_used() {
        let client = Arc::new(ScriptedClient::new());
        client.push(
            RequestPurpose::Classify,
            "{\"approach\": \"regenerate\", \"reason\": \"layout no longer fits\"}",
        );
        let mut ledger = UsageLedger::new();
        let c = classifier(&client).classify(&undecided_diff(), &mut ledger).await;
        assert_eq!(c.approach, Approach::Regenerate);
        assert_eq!(c.decided_by, DecisionSource::Model);
        assert_eq!(c.reason, "layout no longer fits");
        assert_eq!(ledger.model_calls(), 1);
        assert_eq!(ledger.tokens(), TokenUsage::new(100, 20));
    }

    #[tokio::test]
    async fn test_unusable_label_fails_open() {
        let client = Arc::new(ScriptedClient::new());
        client.push(RequestPurpose::Classify, "{\"approach\": \"rewrite everything\"}");
        let c = classifier(&client)
            .classify(&undecided_diff(), &mut UsageLedger::new())
            .await;
        assert_eq!(c.approach, Approach::SurgicalPatch);
        assert_eq!(c.decided_by, DecisionSource::FailOpen);
    }

    #[tokio::test]
    async fn test_model_error_fails_open() {
        let client = Arc::new(ScriptedClient::new());
        let mut ledger = UsageLedger::new();
        let c = classifier(&client).classify(&undecided_diff(), &mut ledger).await;
        assert_eq!(c.approach, Approach::SurgicalPatch);
        assert_eq!(c.decided_by, DecisionSource::FailOpen);
        assert_eq!(client.calls_for(RequestPurpose::Classify), 1);
    }

    #[tokio::test]
    async fn test_no_assistant_fails_open_without_calls() {
        let c = Classifier::new(ClassifierRules::default(), None)
            .classify(&undecided_diff(), &mut UsageLedger::new())
            .await;
        assert_eq!(c.decided_by, DecisionSource::FailOpen);
    }

    #[tokio::test]
    async fn test_heuristic_decision_skips_model() {
        let client = Arc::new(ScriptedClient::new());
        let before = wide(&["a", "b"]);
        let diff = compute_diff(&before, &wide(&["a", "b", "c"]), &DiffOptions::default());
        let c = classifier(&client).classify(&diff, &mut UsageLedger::new()).await;
        assert_eq!(c.decided_by, DecisionSource::Heuristic);
        assert_eq!(client.calls_for(RequestPurpose::Classify), 0);
    }

    #[tokio::test]
    async fn test_triage() {
        let client = Arc::new(ScriptedClient::new());
        client.push(RequestPurpose::Triage, "{\"needsData\": true, \"reason\": \"new average\"}");
        let c = classifier(&client);
        let snapshot = wide(&["a"]);
        assert!(c.needs_data("add an average row", &snapshot, &mut UsageLedger::new()).await);
        // Nothing queued: the failed call falls back to presentation-only.
        assert!(!c.needs_data("make it blue", &snapshot, &mut UsageLedger::new()).await);
        assert_eq!(client.calls_for(RequestPurpose::Triage), 2);
    }
}
