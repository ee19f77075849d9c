//! # Artisync
//!
//! Keeps a generated HTML document in sync with the content it was built
//! from. A new snapshot of the source content is diffed against the prior
//! one, the change is classified, and the cheapest adequate strategy
//! updates the document.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────────┐
//! │ Snapshot │──▶│  Differ  │──▶│ Classifier │──▶│ no-op            │
//! │ prior/new│   │ (+judge) │   │ (+assist)  │   │ surgical-patch ──┼─▶ Direct edits ─▶ Patch ─▶ Validate
//! └──────────┘   └──────────┘   └────────────┘   │ regenerate ──────┼─▶ Sandboxed agent ─▶ Validate
//!                                                └──────────────────┘
//! ```
//!
//! Failed Direct attempts escalate to the sandboxed agent; escalation never
//! goes back. Pure logic lives in the `artisync-core` crate; this crate adds
//! model clients, execution sessions, accounting and the engine.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`model`] | Model provider abstraction (Anthropic, OpenAI, disabled) |
//! | [`prompts`] | Prompt text for every model and agent call |
//! | [`differ`] | Heuristic diff plus optional model domain judgment |
//! | [`classifier`] | Strategy classification and instruction triage |
//! | [`direct`] | Direct strategy: synthesis and edit proposals |
//! | [`agentic`] | Sandboxed-agentic strategy |
//! | [`session`] | Execution sessions and the local-process sandbox |
//! | [`escalation`] | Observable strategy attempts |
//! | [`usage`] | Per-operation token and credit ledger |
//! | [`error`] | Operation error taxonomy |
//! | [`engine`] | generate / modify / refresh |

pub mod agentic;
pub mod classifier;
pub mod config;
pub mod differ;
pub mod direct;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod model;
pub mod prompts;
pub mod session;
pub mod usage;

#[cfg(test)]
mod testing;

pub use engine::{Brief, SyncEngine, SyncOutcome};
pub use error::{FailureKind, OperationError, SyncError};
