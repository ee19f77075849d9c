//! Diffing with optional model judgment of ambiguous domain signals.

use artisync_core::diff::{compute_diff, Diff, DiffOptions};
use artisync_core::snapshot::Snapshot;
use std::sync::Arc;
use tracing::{info, warn};

use crate::model::{request_object, ModelClient, ModelRequest, RequestPurpose};
use crate::prompts;
use crate::usage::UsageLedger;

const JUDGE_MAX_TOKENS: u32 = 300;

pub struct Differ {
    options: DiffOptions,
    judge: Option<Arc<dyn ModelClient>>,
}

impl Differ {
    /// `judge` is consulted only when the heuristic is ambiguous.
    pub fn new(options: DiffOptions, judge: Option<Arc<dyn ModelClient>>) -> Self {
        Self { options, judge }
    }

    pub async fn diff(&self, before: &Snapshot, after: &Snapshot, ledger: &mut UsageLedger) -> Diff {
        let mut diff = compute_diff(before, after, &self.options);
        info!(
            unchanged = diff.unchanged,
            schema_changes = diff.schema.change_count(),
            cells_changed = diff.cells_changed_total,
            rows_added = diff.rows.added,
            rows_removed = diff.rows.removed,
            domain_changed = diff.domain.changed,
            ambiguous = diff.domain.ambiguous,
            "computed diff"
        );

        if !diff.needs_domain_judgment() {
            return diff;
        }
        let Some(judge) = &self.judge else {
            return diff;
        };

        let request = ModelRequest {
            purpose: RequestPurpose::DomainJudge,
            system: prompts::domain_judge_system(),
            user: prompts::domain_judge_user(before, after, &diff.summary()),
            max_tokens: JUDGE_MAX_TOKENS,
        };
        match request_object(judge.as_ref(), &request, "domainChanged", 0, ledger).await {
            Ok((obj, _)) => match obj.get("domainChanged").and_then(|v| v.as_bool()) {
                Some(changed) => {
                    let reason = obj
                        .get("reason")
                        .and_then(|r| r.as_str())
                        .unwrap_or("model judgment")
                        .to_string();
                    info!(changed, reason = %reason, "domain judged by model");
                    diff.resolve_domain(changed, reason);
                }
                None => warn!("domain judgment had a non-boolean domainChanged; assuming unchanged"),
            },
            Err(e) => warn!(error = %e, "domain judgment failed; assuming unchanged"),
        }
        diff
    }
}
