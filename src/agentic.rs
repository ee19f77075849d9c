//! Sandboxed-agentic strategy: full regeneration by an agent process.
//!
//! Session layout:
//!
//! | File            | Contents                                        |
//! |-----------------|-------------------------------------------------|
//! | `data.csv`      | tabular snapshot as CSV (or `data.txt` for text) |
//! | `profile.json`  | [`DataProfile`](artisync_core::profile::DataProfile) |
//! | `existing.html` | current artifact, for modify/refresh            |
//! | `output.html`   | written by the agent; the only success signal   |
//!
//! The agent's stdout is parsed best-effort for a trailing JSON report
//! (`result`, `num_turns`, `usage`) used for the summary and billing.

use artisync_core::billing::TokenUsage;
use artisync_core::profile::profile;
use artisync_core::snapshot::Snapshot;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::SandboxConfig;
use crate::engine::Brief;
use crate::error::SyncError;
use crate::prompts::{self, AgentTask};
use crate::session::{AgentInvocation, SessionJob, SessionManager};
use crate::usage::UsageLedger;

const SUMMARY_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct AgenticRun {
    pub html: String,
    pub summary: String,
    pub turns: u32,
    pub model: String,
}

/// What the agent reported on stdout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentReport {
    pub result: Option<String>,
    pub num_turns: Option<u32>,
    pub usage: TokenUsage,
    pub model: Option<String>,
}

pub struct AgenticStrategy {
    sessions: SessionManager,
    max_turns: u32,
    model_label: Option<String>,
}

impl AgenticStrategy {
    pub fn new(sessions: SessionManager, config: &SandboxConfig) -> Self {
        Self {
            sessions,
            max_turns: config.max_turns,
            model_label: config.model.clone(),
        }
    }

    pub async fn regenerate(
        &self,
        snapshot: &Snapshot,
        existing: Option<&str>,
        brief: &Brief,
        diff_summary: Option<&str>,
        ledger: &mut UsageLedger,
    ) -> Result<AgenticRun, SyncError> {
        let data_file = match snapshot {
            Snapshot::Tabular(_) => "data.csv",
            Snapshot::Text(_) => "data.txt",
        };
        let profile_json = serde_json::to_vec_pretty(&profile(snapshot))
            .map_err(|e| SyncError::InvalidInput(format!("cannot serialize profile: {}", e)))?;

        let mut files = vec![
            (data_file.to_string(), snapshot.render(None).into_bytes()),
            ("profile.json".to_string(), profile_json),
        ];
        if let Some(existing) = existing {
            files.push(("existing.html".to_string(), existing.as_bytes().to_vec()));
        }

        let output_file = self.sessions.limits().output_file.clone();
        let prompt = prompts::agent_prompt(&AgentTask {
            data_file,
            has_existing: existing.is_some(),
            output_file: &output_file,
            instructions: brief.instructions.as_deref(),
            style: brief.style.as_deref(),
            diff_summary,
        });

        let job = SessionJob {
            files,
            invocation: AgentInvocation {
                prompt,
                max_turns: self.max_turns,
            },
        };

        let run = match self.sessions.execute(job).await {
            Ok(run) => run,
            Err(e) => {
                ledger.record_sandbox_run(TokenUsage::default());
                return Err(SyncError::Session(e));
            }
        };

        let report = parse_agent_report(&run.exit.stdout);
        debug!(?report, "agent report");
        ledger.record_sandbox_run(report.usage);

        let summary = report
            .result
            .as_deref()
            .map(|r| r.trim().chars().take(SUMMARY_CHARS).collect::<String>())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Regenerated by the agent.".to_string());
        let turns = report.num_turns.unwrap_or(0);
        let model = self
            .model_label
            .clone()
            .or(report.model)
            .unwrap_or_else(|| "agent".to_string());

        info!(session = %run.session_id, turns, html_len = run.output.len(), "sandboxed regeneration finished");
        Ok(AgenticRun {
            html: run.output,
            summary,
            turns,
            model,
        })
    }
}

/// Find the last JSON object on stdout (whole output first, then line by line
/// from the end) and read `result`, `num_turns`, `usage` and `model`.
pub fn parse_agent_report(stdout: &str) -> AgentReport {
    let whole = serde_json::from_str::<Value>(stdout.trim())
        .ok()
        .filter(Value::is_object);
    let found = whole.or_else(|| {
        stdout
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
            .find(Value::is_object)
    });
    let Some(obj) = found else {
        return AgentReport::default();
    };

    let usage = obj.get("usage");
    let count = |field: &str| {
        usage
            .and_then(|u| u.get(field))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    AgentReport {
        result: obj.get("result").and_then(|r| r.as_str()).map(str::to_string),
        num_turns: obj
            .get("num_turns")
            .and_then(|n| n.as_u64())
            .map(|n| n.min(u32::MAX as u64) as u32),
        usage: TokenUsage::new(count("input_tokens"), count("output_tokens")),
        model: obj.get("model").and_then(|m| m.as_str()).map(str::to_string),
    }
}
