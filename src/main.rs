//! # Artisync CLI (`artisync`)
//!
//! Generates an HTML artifact from a content snapshot and keeps it current
//! as the content changes.
//!
//! ## Usage
//!
//! ```bash
//! artisync --config ./config/artisync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `artisync generate` | Build a first artifact from a snapshot |
//! | `artisync modify` | Apply an instruction to an existing artifact |
//! | `artisync refresh` | Update an artifact for a new snapshot |
//! | `artisync diff <before> <after>` | Heuristic diff and fast-path classification |
//! | `artisync patch` | Apply a find/replace edit list to an HTML file |
//! | `artisync credits <in> <out>` | Credits for a token count |
//! | `artisync profile <snapshot>` | Data profile of a snapshot |
//!
//! Snapshots and artifacts are JSON files. Results go to stdout as JSON;
//! logs go to stderr (`RUST_LOG`, default `artisync=info`).
//!
//! ## Examples
//!
//! ```bash
//! artisync generate --snapshot q1.json --instructions "Sales dashboard" --out report.json --html report.html
//! artisync refresh --artifact report.json --prior q1.json --snapshot q2.json --out report.json
//! artisync diff q1.json q2.json
//! ```

use anyhow::{Context, Result};
use artisync::config::{self, Config};
use artisync::{Brief, OperationError, SyncEngine, SyncOutcome};
use artisync_core::artifact::Artifact;
use artisync_core::billing::{to_billable_units, TokenUsage};
use artisync_core::classify::{fast_path, FastPath};
use artisync_core::diff::compute_diff;
use artisync_core::patch::{apply_edits, Edit};
use artisync_core::profile::profile;
use artisync_core::snapshot::Snapshot;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Artisync: keep generated documents in sync with their source content.
///
/// Commands that call a model or a sandbox read settings from `--config`.
/// See `config/artisync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "artisync",
    about = "Generate HTML artifacts from content snapshots and keep them in sync",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/artisync.toml`. When the file does not exist,
    /// built-in defaults apply (model and sandbox disabled unless configured).
    #[arg(long, global = true, default_value = "./config/artisync.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a first artifact from a snapshot.
    Generate {
        /// Snapshot JSON file.
        #[arg(long)]
        snapshot: PathBuf,

        /// What the document should show.
        #[arg(long)]
        instructions: Option<String>,

        /// Opaque style or branding text passed to every prompt.
        #[arg(long)]
        style: Option<String>,

        /// Where to write the artifact JSON.
        #[arg(long)]
        out: PathBuf,

        /// Also write the bare HTML document here.
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Apply an instruction to an existing artifact.
    Modify {
        /// Artifact JSON file.
        #[arg(long)]
        artifact: PathBuf,

        /// Snapshot JSON file the artifact was built from.
        #[arg(long)]
        snapshot: PathBuf,

        /// The change to make.
        #[arg(long)]
        instructions: String,

        #[arg(long)]
        style: Option<String>,

        #[arg(long)]
        out: PathBuf,

        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Update an artifact for a new snapshot of its content.
    Refresh {
        /// Artifact JSON file.
        #[arg(long)]
        artifact: PathBuf,

        /// Snapshot the artifact was built from.
        #[arg(long)]
        prior: PathBuf,

        /// The new snapshot.
        #[arg(long)]
        snapshot: PathBuf,

        #[arg(long)]
        style: Option<String>,

        #[arg(long)]
        out: PathBuf,

        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Diff two snapshots and show the fast-path classification.
    ///
    /// Heuristics only: no model is called and no config is read.
    Diff { before: PathBuf, after: PathBuf },

    /// Apply a JSON list of `{"find", "replace"}` edits to an HTML file.
    Patch {
        #[arg(long)]
        html: PathBuf,

        #[arg(long)]
        edits: PathBuf,

        /// Write the patched document here instead of printing the report only.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Credits charged for a token count.
    Credits {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// Print the data profile of a snapshot.
    Profile { snapshot: PathBuf },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "artisync=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        info!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::default())
    }
}

fn write_outcome(outcome: &SyncOutcome, out: &Path, html: Option<&Path>) -> Result<()> {
    let artifact = serde_json::to_string_pretty(&outcome.artifact)?;
    std::fs::write(out, artifact).with_context(|| format!("Failed to write {}", out.display()))?;
    if let Some(html) = html {
        std::fs::write(html, &outcome.artifact.content)
            .with_context(|| format!("Failed to write {}", html.display()))?;
    }
    print_json(&serde_json::json!({
        "artifact_id": outcome.artifact.id,
        "updated": outcome.updated,
        "strategy": outcome.artifact.metadata.strategy,
        "summary": outcome.artifact.summary,
        "attempts": outcome.attempts,
        "classification": outcome.classification,
        "patch": outcome.patch,
        "usage": outcome.usage,
    }))
}

/// Print the structured failure report, then surface the error.
fn report_failure(err: OperationError) -> anyhow::Error {
    if let Ok(report) = serde_json::to_string_pretty(&err.report()) {
        println!("{}", report);
    }
    anyhow::Error::new(err)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Diff { before, after } => {
            let before: Snapshot = read_json(&before)?;
            let after: Snapshot = read_json(&after)?;
            let defaults = Config::default();
            let diff = compute_diff(&before, &after, &defaults.differ.options());
            let classification = match fast_path(&diff, &defaults.classifier.rules()) {
                FastPath::Decided(c) => Some(c),
                FastPath::Undecided { .. } => None,
            };
            print_json(&serde_json::json!({
                "summary": diff.summary(),
                "diff": diff,
                "classification": classification,
            }))?;
        }
        Commands::Patch { html, edits, out } => {
            let document = std::fs::read_to_string(&html)
                .with_context(|| format!("Failed to read {}", html.display()))?;
            let edits: Vec<Edit> = read_json(&edits)?;
            let outcome = apply_edits(&document, &edits)?;
            if let Some(out) = out {
                std::fs::write(&out, &outcome.result)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
            }
            print_json(&serde_json::json!({
                "applied": outcome.applied,
                "failed": outcome.failed,
            }))?;
        }
        Commands::Credits {
            input_tokens,
            output_tokens,
        } => {
            let cfg = load_or_default(&cli.config)?;
            let rates = cfg.billing.rates();
            print_json(&serde_json::json!({
                "tokens": TokenUsage::new(input_tokens, output_tokens),
                "credits": to_billable_units(input_tokens, output_tokens, &rates),
            }))?;
        }
        Commands::Profile { snapshot } => {
            let snapshot: Snapshot = read_json(&snapshot)?;
            print_json(&profile(&snapshot))?;
        }
        Commands::Generate {
            snapshot,
            instructions,
            style,
            out,
            html,
        } => {
            let cfg = load_or_default(&cli.config)?;
            let engine = SyncEngine::from_config(&cfg)?;
            let snapshot: Snapshot = read_json(&snapshot)?;
            let brief = Brief::new(instructions, style);
            let outcome = engine
                .generate(&snapshot, &brief)
                .await
                .map_err(report_failure)?;
            write_outcome(&outcome, &out, html.as_deref())?;
        }
        Commands::Modify {
            artifact,
            snapshot,
            instructions,
            style,
            out,
            html,
        } => {
            let cfg = load_or_default(&cli.config)?;
            let engine = SyncEngine::from_config(&cfg)?;
            let artifact: Artifact = read_json(&artifact)?;
            let snapshot: Snapshot = read_json(&snapshot)?;
            let brief = Brief::new(Some(instructions), style);
            let outcome = engine
                .modify(&artifact, &snapshot, &brief)
                .await
                .map_err(report_failure)?;
            write_outcome(&outcome, &out, html.as_deref())?;
        }
        Commands::Refresh {
            artifact,
            prior,
            snapshot,
            style,
            out,
            html,
        } => {
            let cfg = load_or_default(&cli.config)?;
            let engine = SyncEngine::from_config(&cfg)?;
            let artifact: Artifact = read_json(&artifact)?;
            let prior: Snapshot = read_json(&prior)?;
            let snapshot: Snapshot = read_json(&snapshot)?;
            let brief = Brief::new(None, style);
            let outcome = engine
                .refresh(&artifact, &prior, &snapshot, &brief)
                .await
                .map_err(report_failure)?;
            write_outcome(&outcome, &out, html.as_deref())?;
        }
    }

    Ok(())
}
