//! # Artisync Core
//!
//! Pure logic for keeping a generated document in sync with the content it
//! was built from: the snapshot model, profiling, diffing, strategy
//! classification, the find/replace patch engine, JSON extraction from model
//! output, artifact validation and credit accounting.
//!
//! This crate performs no I/O and has no async runtime dependency. The
//! `artisync` application crate layers model clients, execution sessions
//! and the sync engine on top of it.

pub mod artifact;
pub mod billing;
pub mod classify;
pub mod diff;
pub mod extract;
pub mod patch;
pub mod profile;
pub mod snapshot;

pub use artifact::{Artifact, GenerationMetadata, StrategyKind, ValidationError, ValidationRules};
pub use billing::{to_billable_units, BillingRates, TokenUsage};
pub use classify::{Approach, Classification, ClassifierRules, DecisionSource, FastPath};
pub use diff::{compute_diff, Diff, DiffOptions};
pub use extract::{extract, ExtractionFailure};
pub use patch::{apply_edits, Edit, PatchError, PatchOutcome};
pub use profile::{profile, DataProfile};
pub use snapshot::{Row, Snapshot, SnapshotId, Value};
