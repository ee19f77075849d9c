//! The sync engine: generate, modify and refresh operations.
//!
//! Every operation tries the cheap path first and escalates only when
//! classification or validation says so:
//!
//! ```text
//!   generate:  Direct synthesize ──fail/too large──► Sandboxed regenerate
//!   modify:    triage ─► Direct edits ─► patch ─► validate ──fail──► Sandboxed
//!                  └─ needs data ──────────────────────────────────► Sandboxed
//!   refresh:   diff ─► classify ─┬─ no-op ──────────► existing artifact
//!                                ├─ surgical-patch ─► Direct edits ─► patch ─► validate ──fail──► Sandboxed
//!                                └─ regenerate ─────► Sandboxed
//! ```
//!
//! Escalation is one-directional and recorded in [`Attempts`]. An operation
//! owns its [`UsageLedger`]; credits are computed once when it finishes.
//! The engine itself holds no mutable state, so independent operations can
//! run concurrently on one engine.

use artisync_core::artifact::{
    validate_document, Artifact, GenerationMetadata, StrategyKind, ValidationRules,
};
use artisync_core::billing::BillingRates;
use artisync_core::classify::{Approach, Classification};
use artisync_core::diff::Diff;
use artisync_core::patch::{apply_edits, FailedEdit};
use artisync_core::snapshot::Snapshot;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agentic::AgenticStrategy;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::differ::Differ;
use crate::direct::DirectStrategy;
use crate::error::{OperationError, SyncError};
use crate::escalation::Attempts;
use crate::model::{create_client, ModelClient};
use crate::session::{create_sandbox, Sandbox, SessionLimits, SessionManager};
use crate::usage::{UsageLedger, UsageRecord};

/// Per-operation instructions and opaque style text.
#[derive(Debug, Clone, Default)]
pub struct Brief {
    pub instructions: Option<String>,
    pub style: Option<String>,
}

impl Brief {
    pub fn new(instructions: Option<String>, style: Option<String>) -> Self {
        Self {
            instructions: instructions.filter(|s| !s.trim().is_empty()),
            style: style.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Result of applying a Direct edit proposal.
#[derive(Debug, Clone, Serialize)]
pub struct PatchSummary {
    pub applied: usize,
    pub failed: Vec<FailedEdit>,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub artifact: Artifact,
    /// False when the existing artifact was returned unchanged (no-op).
    pub updated: bool,
    pub attempts: Attempts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchSummary>,
    pub usage: UsageRecord,
}

/// State owned by one running operation.
struct Operation {
    attempts: Attempts,
    ledger: UsageLedger,
    diff: Option<Diff>,
    classification: Option<Classification>,
    patch: Option<PatchSummary>,
}

impl Operation {
    fn new() -> Self {
        Self {
            attempts: Attempts::new(),
            ledger: UsageLedger::new(),
            diff: None,
            classification: None,
            patch: None,
        }
    }

    fn fail(self, error: SyncError, rates: &BillingRates) -> OperationError {
        let usage = self.ledger.close(rates);
        warn!(
            kind = %error.kind(),
            attempts = %self.attempts,
            credits = usage.credits,
            error = %error,
            "operation failed"
        );
        OperationError {
            error,
            attempts: self.attempts,
            usage,
        }
    }

    fn finish(self, artifact: Artifact, updated: bool, usage: UsageRecord) -> SyncOutcome {
        SyncOutcome {
            artifact,
            updated,
            attempts: self.attempts,
            diff: self.diff,
            classification: self.classification,
            patch: self.patch,
            usage,
        }
    }
}

/// A document produced by one strategy, before it becomes an [`Artifact`].
struct Draft {
    html: String,
    summary: String,
    model: String,
    turns: u32,
    strategy: StrategyKind,
}

pub struct SyncEngine {
    direct: Option<DirectStrategy>,
    agentic: AgenticStrategy,
    differ: Differ,
    classifier: Classifier,
    rates: BillingRates,
    validation: ValidationRules,
}

impl SyncEngine {
    /// Assemble an engine. `client` is `None` when no model is configured;
    /// every model-backed step then takes its documented fallback.
    pub fn new(config: &Config, client: Option<Arc<dyn ModelClient>>, sandbox: Arc<dyn Sandbox>) -> Self {
        let direct = client
            .clone()
            .map(|c| DirectStrategy::new(c, config.direct.clone(), config.model.max_tokens));
        let judge = client.clone().filter(|_| config.differ.model_judge);
        let assistant = client.filter(|_| config.classifier.model_assist);
        let sessions = SessionManager::new(sandbox, SessionLimits::from_config(&config.sandbox));

        Self {
            direct,
            agentic: AgenticStrategy::new(sessions, &config.sandbox),
            differ: Differ::new(config.differ.options(), judge),
            classifier: Classifier::new(config.classifier.rules(), assistant),
            rates: config.billing.rates(),
            validation: config.validation.rules(),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = if config.model.is_enabled() {
            Some(create_client(&config.model)?)
        } else {
            None
        };
        Ok(Self::new(config, client, create_sandbox(&config.sandbox)))
    }

    /// Build a first artifact from a snapshot.
    pub async fn generate(&self, snapshot: &Snapshot, brief: &Brief) -> Result<SyncOutcome, OperationError> {
        let mut op = Operation::new();
        if snapshot.is_empty() {
            return Err(op.fail(
                SyncError::InvalidInput("snapshot has no content".to_string()),
                &self.rates,
            ));
        }
        info!(snapshot = %snapshot.id().short(), kind = snapshot.kind(), "generate");

        let escalation_reason = match &self.direct {
            Some(direct) if direct.fits(snapshot) => {
                op.attempts.begin(StrategyKind::Direct);
                let attempt = direct
                    .synthesize(snapshot, brief, &mut op.ledger)
                    .await
                    .and_then(|s| {
                        self.check(&s.html)?;
                        Ok(s)
                    });
                match attempt {
                    Ok(s) => {
                        let draft = Draft {
                            html: s.html,
                            summary: s.summary,
                            model: s.model,
                            turns: 0,
                            strategy: StrategyKind::Direct,
                        };
                        return Ok(self.complete(op, draft, snapshot, true));
                    }
                    Err(e) => {
                        warn!(error = %e, "direct generation failed; escalating");
                        format!("direct generation failed: {}", e)
                    }
                }
            }
            Some(_) => format!("snapshot exceeds direct limits ({} rows/lines)", snapshot.len()),
            None => "no model configured for direct generation".to_string(),
        };

        self.regenerate(op, snapshot, None, brief, None, escalation_reason)
            .await
    }

    /// Apply an instruction to an existing artifact.
    pub async fn modify(
        &self,
        artifact: &Artifact,
        snapshot: &Snapshot,
        brief: &Brief,
    ) -> Result<SyncOutcome, OperationError> {
        let mut op = Operation::new();
        let Some(instructions) = brief.instructions.as_deref() else {
            return Err(op.fail(
                SyncError::InvalidInput("modify requires instructions".to_string()),
                &self.rates,
            ));
        };
        info!(artifact = %artifact.id, "modify");

        let escalation_reason = match &self.direct {
            Some(direct) => {
                if self
                    .classifier
                    .needs_data(instructions, snapshot, &mut op.ledger)
                    .await
                {
                    "instruction needs computation over the data".to_string()
                } else {
                    op.attempts.begin(StrategyKind::Direct);
                    match self
                        .patch_direct(direct, &mut op, &artifact.content, snapshot, None, brief)
                        .await
                    {
                        Ok(draft) => return Ok(self.complete(op, draft, snapshot, true)),
                        Err(e) => {
                            warn!(error = %e, "direct modification failed; escalating");
                            format!("direct modification failed: {}", e)
                        }
                    }
                }
            }
            None => "no model configured for direct edits".to_string(),
        };

        self.regenerate(op, snapshot, Some(&artifact.content), brief, None, escalation_reason)
            .await
    }

    /// Bring an artifact up to date with a new snapshot of its content.
    pub async fn refresh(
        &self,
        artifact: &Artifact,
        prior: &Snapshot,
        snapshot: &Snapshot,
        brief: &Brief,
    ) -> Result<SyncOutcome, OperationError> {
        let mut op = Operation::new();
        if artifact.source_snapshot != prior.id() {
            warn!(
                recorded = %artifact.source_snapshot.short(),
                supplied = %prior.id().short(),
                "prior snapshot does not match the artifact's recorded source"
            );
        }
        info!(artifact = %artifact.id, "refresh");

        let diff = self.differ.diff(prior, snapshot, &mut op.ledger).await;
        let classification = self.classifier.classify(&diff, &mut op.ledger).await;
        let approach = classification.approach;
        let reason = classification.reason.clone();
        let domain_changed = diff.domain.changed;
        let summary = diff.summary();
        op.diff = Some(diff);
        op.classification = Some(classification);

        let escalation_reason = match (approach, &self.direct) {
            (Approach::NoOp, _) => {
                let usage = op.ledger.close(&self.rates);
                info!("content unchanged; keeping existing artifact");
                return Ok(op.finish(artifact.clone(), false, usage));
            }
            (Approach::SurgicalPatch, Some(direct)) => {
                op.attempts.begin(StrategyKind::Direct);
                let diff = op.diff.clone();
                match self
                    .patch_direct(direct, &mut op, &artifact.content, snapshot, diff.as_ref(), brief)
                    .await
                {
                    Ok(draft) => return Ok(self.complete(op, draft, snapshot, true)),
                    Err(e) => {
                        warn!(error = %e, "surgical patch failed; escalating");
                        format!("surgical patch failed: {}", e)
                    }
                }
            }
            (Approach::SurgicalPatch, None) => "no model configured for surgical patching".to_string(),
            (Approach::Regenerate, _) => reason,
        };

        // A changed domain gets a fresh design; otherwise keep the layout.
        let existing = (!domain_changed).then_some(artifact.content.as_str());
        self.regenerate(op, snapshot, existing, brief, Some(&summary), escalation_reason)
            .await
    }

    async fn patch_direct(
        &self,
        direct: &DirectStrategy,
        op: &mut Operation,
        content: &str,
        snapshot: &Snapshot,
        diff: Option<&Diff>,
        brief: &Brief,
    ) -> Result<Draft, SyncError> {
        let proposal = direct
            .propose_edits(content, snapshot, diff, brief, &mut op.ledger)
            .await?;
        let outcome = apply_edits(content, &proposal.edits)?;
        info!(
            applied = outcome.applied.len(),
            failed = outcome.failed.len(),
            "patch applied"
        );
        op.patch = Some(PatchSummary {
            applied: outcome.applied.len(),
            failed: outcome.failed.clone(),
            changes: proposal.changes.clone(),
        });
        self.check(&outcome.result)?;
        Ok(Draft {
            html: outcome.result,
            summary: proposal.summary,
            model: proposal.model,
            turns: 0,
            strategy: StrategyKind::Direct,
        })
    }

    async fn regenerate(
        &self,
        mut op: Operation,
        snapshot: &Snapshot,
        existing: Option<&str>,
        brief: &Brief,
        diff_summary: Option<&str>,
        reason: String,
    ) -> Result<SyncOutcome, OperationError> {
        info!(reason = %reason, "escalating to sandboxed regeneration");
        op.attempts.escalate(StrategyKind::Sandboxed, reason);

        let run = match self
            .agentic
            .regenerate(snapshot, existing, brief, diff_summary, &mut op.ledger)
            .await
        {
            Ok(run) => run,
            Err(e) => return Err(op.fail(e, &self.rates)),
        };
        if let Err(e) = self.check(&run.html) {
            return Err(op.fail(e, &self.rates));
        }

        let draft = Draft {
            html: run.html,
            summary: run.summary,
            model: run.model,
            turns: run.turns,
            strategy: StrategyKind::Sandboxed,
        };
        Ok(self.complete(op, draft, snapshot, true))
    }

    fn check(&self, html: &str) -> Result<(), SyncError> {
        validate_document(html, &self.validation).map_err(SyncError::from)
    }

    fn complete(&self, op: Operation, draft: Draft, snapshot: &Snapshot, updated: bool) -> SyncOutcome {
        let usage = op.ledger.close(&self.rates);
        let artifact = Artifact::new(
            draft.html,
            snapshot.id(),
            draft.summary,
            GenerationMetadata {
                strategy: draft.strategy,
                model: draft.model,
                credits: usage.credits,
                turns: draft.turns,
                generated_at: Utc::now(),
            },
        );
        info!(
            artifact = %artifact.id,
            strategy = %draft.strategy,
            attempts = %op.attempts,
            credits = usage.credits,
            "operation complete"
        );
        op.finish(artifact, updated, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DisabledSandbox;
    use crate::testing::ScriptedClient;
    use crate::model::RequestPurpose;
    use serde_json::json;

    fn page(marker: &str) -> String {
        format!(
            "<!DOCTYPE html><html><body><h1>{}</h1>{}</body></html>",
            marker,
            "<p>filler</p>".repeat(30)
        )
    }

    fn engine(client: Arc<ScriptedClient>) -> SyncEngine {
        let client: Arc<dyn ModelClient> = client;
        SyncEngine::new(&Config::default(), Some(client), Arc::new(DisabledSandbox))
    }

    #[tokio::test]
    async fn test_generate_direct() {
        let client = Arc::new(ScriptedClient::new());
        client.push(
            RequestPurpose::Generate,
            &json!({"html": page("Report"), "summary": "A report"}).to_string(),
        );
        let snap = Snapshot::text("Revenue grew 10% this quarter.");
        let out = engine(client).generate(&snap, &Brief::default()).await.unwrap();
        assert_eq!(out.artifact.metadata.strategy, StrategyKind::Direct);
        assert_eq!(out.artifact.source_snapshot, snap.id());
        assert_eq!(out.attempts.strategies(), &[StrategyKind::Direct]);
        assert_eq!(out.usage.model_calls, 1);
        assert_eq!(out.artifact.metadata.credits, out.usage.credits);
    }

    #[tokio::test]
    async fn test_invalid_direct_output_escalates_then_reports_environment_failure() {
        let client = Arc::new(ScriptedClient::new());
        client.push(RequestPurpose::Generate, "{\"html\": \"<p>too short</p>\", \"summary\": \"s\"}");
        let err = engine(client)
            .generate(&Snapshot::text("Some content."), &Brief::default())
            .await
            .unwrap_err();
        assert_eq!(err.attempts.strategies(), &[StrategyKind::Direct, StrategyKind::Sandboxed]);
        assert_eq!(err.attempts.escalations().len(), 1);
        assert_eq!(err.kind(), crate::error::FailureKind::Environment);
        assert_eq!(err.usage.model_calls, 1);
    }

    #[tokio::test]
    async fn test_empty_snapshot_rejected() {
        let err = engine(Arc::new(ScriptedClient::new()))
            .generate(&Snapshot::text("  "), &Brief::default())
            .await
            .unwrap_err();
        assert!(matches!(err.error, SyncError::InvalidInput(_)));
        assert!(err.attempts.strategies().is_empty());
    }

    #[tokio::test]
    async fn test_modify_requires_instructions() {
        let client = Arc::new(ScriptedClient::new());
        let snap = Snapshot::text("Content here.");
        let artifact = Artifact::new(
            page("x"),
            snap.id(),
            String::new(),
            GenerationMetadata {
                strategy: StrategyKind::Direct,
                model: "m".into(),
                credits: 0,
                turns: 0,
                generated_at: Utc::now(),
            },
        );
        let err = engine(client)
            .modify(&artifact, &snap, &Brief::new(Some("   ".into()), None))
            .await
            .unwrap_err();
        assert!(matches!(err.error, SyncError::InvalidInput(_)));
    }

    #[test]
    fn test_brief_drops_blank_fields() {
        let b = Brief::new(Some("".into()), Some("  brand ".into()));
        assert!(b.instructions.is_none());
        assert_eq!(b.style.as_deref(), Some("  brand "));
    }
}
