//! Structured differences between two snapshots.
//!
//! [`compute_diff`] is the cheap, model-free half of change detection. It
//! produces schema, row and cell deltas plus a heuristic domain signal; the
//! application layer may resolve an ambiguous signal with a model judgment
//! via [`Diff::resolve_domain`].
//!
//! # Row matching
//!
//! Rows are matched by key when a shared identifier-like column holds
//! non-null, unique values on both sides; otherwise by position.
//!
//! # Domain heuristic
//!
//! ```text
//!   tabular: churn = |added ∪ removed| / |before ∪ after|
//!   text:    churn = 1 - |words(before) ∩ words(after)| / |words(before) ∪ words(after)|
//!
//!   disjoint columns or churn >= domain_high  → changed
//!   churn <= domain_low                       → unchanged
//!   otherwise                                 → ambiguous
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::profile::is_identifier_name;
use crate::snapshot::{Snapshot, SnapshotId, Table, Value};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Maximum number of cell changes kept in [`Diff::cells`].
    pub cell_cap: usize,
    pub domain_low: f64,
    pub domain_high: f64,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            cell_cap: 50,
            domain_low: 0.3,
            domain_high: 0.75,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub columns_added: BTreeSet<String>,
    pub columns_removed: BTreeSet<String>,
}

impl SchemaDiff {
    pub fn change_count(&self) -> usize {
        self.columns_added.len() + self.columns_removed.len()
    }
}

/// Which row a cell change belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowRef {
    Key { column: String, value: String },
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellChange {
    pub row: RowRef,
    pub column: String,
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowDelta {
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "lowercase")]
pub enum RowMatching {
    Key {
        column: String,
    },
    #[default]
    Position,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainSignal {
    pub changed: bool,
    pub reason: String,
    /// The heuristic could not decide.
    pub ambiguous: bool,
    /// An ambiguous signal was settled by an external judgment.
    #[serde(default)]
    pub judged: bool,
    /// Column churn or word-set distance, when computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub churn: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub before: SnapshotId,
    pub after: SnapshotId,
    pub unchanged: bool,
    pub schema: SchemaDiff,
    pub cells: Vec<CellChange>,
    pub cells_changed_total: usize,
    pub rows: RowDelta,
    pub row_matching: RowMatching,
    pub domain: DomainSignal,
}

impl Diff {
    fn empty(before: SnapshotId, after: SnapshotId) -> Self {
        Self {
            before,
            after,
            unchanged: false,
            schema: SchemaDiff::default(),
            cells: Vec::new(),
            cells_changed_total: 0,
            rows: RowDelta::default(),
            row_matching: RowMatching::Position,
            domain: DomainSignal::default(),
        }
    }

    /// Heuristic was inconclusive and nobody has resolved it yet.
    pub fn needs_domain_judgment(&self) -> bool {
        self.domain.ambiguous && !self.domain.judged
    }

    /// Record the outcome of an external domain judgment.
    pub fn resolve_domain(&mut self, changed: bool, reason: impl Into<String>) {
        self.domain.changed = changed;
        self.domain.reason = reason.into();
        self.domain.judged = true;
    }

    /// Human-readable description for classifier prompts. Mentions column
    /// names and counts only, never row contents.
    pub fn summary(&self) -> String {
        if self.unchanged {
            return "No changes.".to_string();
        }
        let mut lines = Vec::new();
        if !self.schema.columns_added.is_empty() {
            lines.push(format!("Columns added: {}", join(&self.schema.columns_added)));
        }
        if !self.schema.columns_removed.is_empty() {
            lines.push(format!(
                "Columns removed: {}",
                join(&self.schema.columns_removed)
            ));
        }
        lines.push(format!(
            "Rows added: {}, rows removed: {}",
            self.rows.added, self.rows.removed
        ));
        let touched: BTreeSet<&str> = self.cells.iter().map(|c| c.column.as_str()).collect();
        if self.cells_changed_total > 0 {
            lines.push(format!(
                "Cells changed: {} (in columns: {})",
                self.cells_changed_total,
                touched.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        match &self.row_matching {
            RowMatching::Key { column } => lines.push(format!("Rows matched by key column {}", column)),
            RowMatching::Position => lines.push("Rows matched by position".to_string()),
        }
        lines.push(format!(
            "Domain signal: {} ({})",
            if self.domain.changed {
                "changed"
            } else if self.domain.ambiguous {
                "ambiguous"
            } else {
                "same"
            },
            self.domain.reason
        ));
        lines.join("\n")
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

pub fn compute_diff(before: &Snapshot, after: &Snapshot, options: &DiffOptions) -> Diff {
    let before_id = before.id();
    let after_id = after.id();

    if before_id == after_id {
        let mut diff = Diff::empty(before_id, after_id);
        diff.unchanged = true;
        return diff;
    }

    let mut diff = Diff::empty(before_id, after_id);

    match (before, after) {
        (Snapshot::Tabular(b), Snapshot::Tabular(a)) => {
            diff_tables(&mut diff, b, a, options);
            // Same columns and values; only column or key order differs.
            if diff.schema.change_count() == 0
                && diff.cells_changed_total == 0
                && diff.rows == RowDelta::default()
            {
                diff.unchanged = true;
                diff.domain = DomainSignal::default();
                return diff;
            }
        }
        (Snapshot::Text(b), Snapshot::Text(a)) => diff_text(&mut diff, b.content(), a.content(), options),
        _ => {
            diff.rows = RowDelta {
                added: after.len(),
                removed: before.len(),
            };
            diff.domain = DomainSignal {
                changed: true,
                reason: format!("content kind changed from {} to {}", before.kind(), after.kind()),
                ambiguous: false,
                judged: false,
                churn: None,
            };
            return diff;
        }
    }

    if after.is_empty() {
        diff.domain = DomainSignal {
            changed: true,
            reason: "new snapshot is empty".to_string(),
            ambiguous: false,
            judged: false,
            churn: diff.domain.churn,
        };
    }

    diff
}

fn diff_tables(diff: &mut Diff, before: &Table, after: &Table, options: &DiffOptions) {
    let before_cols: BTreeSet<String> = before.columns().iter().cloned().collect();
    let after_cols: BTreeSet<String> = after.columns().iter().cloned().collect();

    diff.schema = SchemaDiff {
        columns_added: after_cols.difference(&before_cols).cloned().collect(),
        columns_removed: before_cols.difference(&after_cols).cloned().collect(),
    };

    let union = before_cols.union(&after_cols).count();
    let churn = if union == 0 {
        0.0
    } else {
        diff.schema.change_count() as f64 / union as f64
    };
    let disjoint = !before_cols.is_empty()
        && !after_cols.is_empty()
        && before_cols.is_disjoint(&after_cols);
    diff.domain = if disjoint {
        DomainSignal {
            changed: true,
            reason: "column sets are disjoint".to_string(),
            ambiguous: false,
            judged: false,
            churn: Some(churn),
        }
    } else {
        classify_churn("column churn", churn, options)
    };

    let shared: Vec<&String> = before
        .columns()
        .iter()
        .filter(|c| after_cols.contains(*c))
        .collect();

    match find_key_column(before, after, &shared) {
        Some(key) => {
            let before_index = key_index(before, &key);
            let after_index = key_index(after, &key);
            diff.rows = RowDelta {
                added: after_index.keys().filter(|k| !before_index.contains_key(*k)).count(),
                removed: before_index.keys().filter(|k| !after_index.contains_key(*k)).count(),
            };
            for (a_row, a) in after.rows().iter().enumerate() {
                let Some(k) = a.get(&key).map(|v| v.to_string()) else {
                    continue;
                };
                let Some(&b_row) = before_index.get(&k) else {
                    continue;
                };
                compare_rows(diff, before, b_row, after, a_row, &shared, options, || RowRef::Key {
                    column: key.clone(),
                    value: k.clone(),
                });
            }
            diff.row_matching = RowMatching::Key { column: key };
        }
        None => {
            let (b_len, a_len) = (before.rows().len(), after.rows().len());
            diff.rows = RowDelta {
                added: a_len.saturating_sub(b_len),
                removed: b_len.saturating_sub(a_len),
            };
            for i in 0..b_len.min(a_len) {
                compare_rows(diff, before, i, after, i, &shared, options, || RowRef::Index(i));
            }
            diff.row_matching = RowMatching::Position;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compare_rows(
    diff: &mut Diff,
    before: &Table,
    b_row: usize,
    after: &Table,
    a_row: usize,
    shared: &[&String],
    options: &DiffOptions,
    row_ref: impl Fn() -> RowRef,
) {
    for column in shared {
        let old = before.cell(b_row, column);
        let new = after.cell(a_row, column);
        if same_value(old, new) {
            continue;
        }
        diff.cells_changed_total += 1;
        if diff.cells.len() < options.cell_cap {
            diff.cells.push(CellChange {
                row: row_ref(),
                column: column.to_string(),
                old: old.clone(),
                new: new.clone(),
            });
        }
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    a == b || (a.is_null() && b.is_null())
}

/// First shared identifier-like column whose values are non-null and unique
/// on both sides.
fn find_key_column(before: &Table, after: &Table, shared: &[&String]) -> Option<String> {
    shared
        .iter()
        .filter(|c| is_identifier_name(c))
        .find(|c| is_unique_key(before, c) && is_unique_key(after, c))
        .map(|c| c.to_string())
}

fn is_unique_key(table: &Table, column: &str) -> bool {
    let mut seen = HashSet::new();
    table.rows().iter().all(|row| match row.get(column) {
        Some(v) if !v.is_null() => seen.insert(v.to_string()),
        _ => false,
    })
}

fn key_index(table: &Table, column: &str) -> HashMap<String, usize> {
    table
        .rows()
        .iter()
        .enumerate()
        .filter_map(|(i, row)| row.get(column).map(|v| (v.to_string(), i)))
        .collect()
}

fn diff_text(diff: &mut Diff, before: &str, after: &str, options: &DiffOptions) {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for line in before.lines().map(str::trim).filter(|l| !l.is_empty()) {
        *counts.entry(line).or_insert(0) -= 1;
    }
    for line in after.lines().map(str::trim).filter(|l| !l.is_empty()) {
        *counts.entry(line).or_insert(0) += 1;
    }
    diff.rows = RowDelta {
        added: counts.values().filter(|n| **n > 0).map(|n| *n as usize).sum(),
        removed: counts.values().filter(|n| **n < 0).map(|n| n.unsigned_abs() as usize).sum(),
    };

    let b_words = words(before);
    let a_words = words(after);
    let union = b_words.union(&a_words).count();
    let distance = if union == 0 {
        0.0
    } else {
        1.0 - b_words.intersection(&a_words).count() as f64 / union as f64
    };
    diff.domain = classify_churn("word-set distance", distance, options);
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

fn classify_churn(label: &str, churn: f64, options: &DiffOptions) -> DomainSignal {
    if churn >= options.domain_high {
        DomainSignal {
            changed: true,
            reason: format!("{} {:.2} at or above {:.2}", label, churn, options.domain_high),
            ambiguous: false,
            judged: false,
            churn: Some(churn),
        }
    } else if churn <= options.domain_low {
        DomainSignal {
            changed: false,
            reason: format!("{} {:.2} at or below {:.2}", label, churn, options.domain_low),
            ambiguous: false,
            judged: false,
            churn: Some(churn),
        }
    } else {
        DomainSignal {
            changed: false,
            reason: format!(
                "ambiguous: {} {:.2} between {:.2} and {:.2}",
                label, churn, options.domain_low, options.domain_high
            ),
            ambiguous: true,
            judged: false,
            churn: Some(churn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::{num, table, text};

    fn opts() -> DiffOptions {
        DiffOptions::default()
    }

    #[test]
    fn test_identical_is_unchanged() {
        let s = table(&["a"], &[vec![num(1.0)]]);
        let d = compute_diff(&s, &s.clone(), &opts());
        assert!(d.unchanged);
        assert!(d.cells.is_empty());
        assert_eq!(d.schema.change_count(), 0);
        assert!(!d.domain.changed);
        assert_eq!(d.summary(), "No changes.");
    }

    #[test]
    fn test_reordered_columns_are_unchanged() {
        let before = table(&["region", "revenue"], &[vec![text("EMEA"), num(1.0)]]);
        let after = table(&["revenue", "region"], &[vec![num(1.0), text("EMEA")]]);
        assert_ne!(before.id(), after.id());
        let d = compute_diff(&before, &after, &opts());
        assert!(d.unchanged);
        assert!(!d.domain.changed);
        assert_eq!(d.summary(), "No changes.");
    }

    #[test]
    fn test_position_matching_cells_and_rows() {
        let before = table(&["region", "revenue"], &[vec![text("EMEA"), num(1.0)], vec![text("APAC"), num(2.0)]]);
        let after = table(
            &["region", "revenue"],
            &[vec![text("EMEA"), num(1.0)], vec![text("APAC"), num(3.0)], vec![text("LATAM"), num(4.0)]],
        );
        let d = compute_diff(&before, &after, &opts());
        assert!(!d.unchanged);
        assert_eq!(d.row_matching, RowMatching::Position);
        assert_eq!(d.rows, RowDelta { added: 1, removed: 0 });
        assert_eq!(d.cells_changed_total, 1);
        assert_eq!(d.cells[0].row, RowRef::Index(1));
        assert_eq!(d.cells[0].old, num(2.0));
        assert_eq!(d.cells[0].new, num(3.0));
        assert!(!d.domain.changed);
        assert!(!d.domain.ambiguous);
    }

    #[test]
    fn test_key_matching_survives_reordering() {
        let before = table(
            &["sku", "qty"],
            &[vec![text("A1"), num(1.0)], vec![text("B2"), num(2.0)], vec![text("C3"), num(3.0)]],
        );
        let after = table(
            &["sku", "qty"],
            &[vec![text("C3"), num(3.0)], vec![text("A1"), num(9.0)], vec![text("D4"), num(4.0)]],
        );
        let d = compute_diff(&before, &after, &opts());
        assert_eq!(d.row_matching, RowMatching::Key { column: "sku".into() });
        assert_eq!(d.rows, RowDelta { added: 1, removed: 1 });
        assert_eq!(d.cells_changed_total, 1);
        assert_eq!(
            d.cells[0].row,
            RowRef::Key {
                column: "sku".into(),
                value: "A1".into()
            }
        );
    }

    #[test]
    fn test_duplicate_keys_fall_back_to_position() {
        let before = table(&["id", "v"], &[vec![num(1.0), num(1.0)], vec![num(1.0), num(2.0)]]);
        let after = table(&["id", "v"], &[vec![num(1.0), num(1.0)], vec![num(1.0), num(5.0)]]);
        let d = compute_diff(&before, &after, &opts());
        assert_eq!(d.row_matching, RowMatching::Position);
        assert_eq!(d.cells_changed_total, 1);
    }

    #[test]
    fn test_cell_cap_keeps_true_total() {
        let rows_b: Vec<Vec<Value>> = (0..80).map(|i| vec![num(i as f64)]).collect();
        let rows_a: Vec<Vec<Value>> = (0..80).map(|i| vec![num(i as f64 + 0.5)]).collect();
        let d = compute_diff(&table(&["v"], &rows_b), &table(&["v"], &rows_a), &opts());
        assert_eq!(d.cells.len(), 50);
        assert_eq!(d.cells_changed_total, 80);
    }

    #[test]
    fn test_schema_diff_and_ambiguous_domain() {
        let before = table(&["a", "b", "c"], &[vec![num(1.0), num(2.0), num(3.0)]]);
        let after = table(&["a", "b", "d"], &[vec![num(1.0), num(2.0), num(3.0)]]);
        let d = compute_diff(&before, &after, &opts());
        assert_eq!(d.schema.columns_added, BTreeSet::from(["d".to_string()]));
        assert_eq!(d.schema.columns_removed, BTreeSet::from(["c".to_string()]));
        // 2 of 4 columns churned
        assert!(d.domain.ambiguous);
        assert!(!d.domain.changed);
        assert!(d.needs_domain_judgment());
        assert_eq!(d.domain.churn, Some(0.5));
    }

    #[test]
    fn test_resolve_domain_clears_judgment_need() {
        let before = table(&["a", "b", "c"], &[vec![num(1.0), num(2.0), num(3.0)]]);
        let after = table(&["a", "b", "d"], &[vec![num(1.0), num(2.0), num(3.0)]]);
        let mut d = compute_diff(&before, &after, &opts());
        d.resolve_domain(true, "different subject");
        assert!(d.domain.changed);
        assert!(d.domain.ambiguous);
        assert!(!d.needs_domain_judgment());
    }

    #[test]
    fn test_disjoint_columns_change_domain() {
        let before = table(&["region", "revenue"], &[vec![text("EMEA"), num(1.0)]]);
        let after = table(&["patient", "dose"], &[vec![text("P1"), num(5.0)]]);
        let d = compute_diff(&before, &after, &opts());
        assert!(d.domain.changed);
        assert_eq!(d.domain.reason, "column sets are disjoint");
        assert!(d.cells.is_empty());
    }

    #[test]
    fn test_kind_change_is_domain_change() {
        let before = table(&["a"], &[vec![num(1.0)]]);
        let after = Snapshot::text("A narrative about the year.");
        let d = compute_diff(&before, &after, &opts());
        assert!(d.domain.changed);
        assert!(d.domain.reason.contains("tabular to text"));
    }

    #[test]
    fn test_empty_after_is_domain_change() {
        let before = table(&["a"], &[vec![num(1.0)]]);
        let after = table(&["a"], &[]);
        let d = compute_diff(&before, &after, &opts());
        assert!(!d.unchanged);
        assert!(d.domain.changed);
        assert_eq!(d.rows.removed, 1);
    }

    #[test]
    fn test_text_diff_lines_and_words() {
        let before = Snapshot::text("Revenue grew in EMEA.\nCosts fell sharply.\n");
        let after = Snapshot::text("Revenue grew in EMEA.\nCosts fell slightly.\n");
        let d = compute_diff(&before, &after, &opts());
        assert_eq!(d.rows, RowDelta { added: 1, removed: 1 });
        assert!(!d.domain.changed);

        let other = Snapshot::text("Migratory birds nest along coastal wetlands.");
        let d = compute_diff(&before, &other, &opts());
        assert!(d.domain.changed);
    }

    #[test]
    fn test_summary_has_no_row_values() {
        let before = table(&["name", "amount"], &[vec![text("secret-customer"), num(1.0)]]);
        let after = table(&["name", "amount"], &[vec![text("secret-customer"), num(2.0)]]);
        let s = compute_diff(&before, &after, &opts()).summary();
        assert!(s.contains("Cells changed: 1 (in columns: amount)"));
        assert!(!s.contains("secret-customer"));
    }
}
