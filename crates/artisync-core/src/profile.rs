//! Column profiling for tabular snapshots.
//!
//! Profiles are derived on every call and never cached. They feed two
//! consumers: Direct prompts (a compact textual summary) and the sandbox,
//! which receives the full [`DataProfile`] as `profile.json`.
//!
//! # Type inference
//!
//! | Kind      | Rule                                                      |
//! |-----------|-----------------------------------------------------------|
//! | `boolean` | every non-null value is a bool or `true`/`false`/`yes`/`no` |
//! | `number`  | every non-null value is numeric (numeric text allowed)    |
//! | `date`    | every non-null value parses as `%Y-%m-%d`, `%m/%d/%Y` or RFC 3339 |
//! | `string`  | anything else                                             |
//!
//! A column with no non-null values is `string`.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::snapshot::{Snapshot, Table, Value};

/// Columns with at most this many distinct values carry a distribution.
pub const DISTRIBUTION_LIMIT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    String,
    Number,
    Date,
    Boolean,
}

/// Suggested analytical role of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    Identifier,
    Time,
    Measure,
    Dimension,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub role: ColumnRole,
    /// Rows where the column holds a non-null value.
    pub non_null: usize,
    pub distinct: usize,
    /// Value → count, present only for low-cardinality columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<NumericStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProfile {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
    pub insights: Vec<String>,
}

impl DataProfile {
    /// Compact multi-line description for prompts.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} rows x {} columns\n",
            self.row_count, self.column_count
        );
        for col in &self.columns {
            let kind = serde_json::to_value(col.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            out.push_str(&format!("- {} ({}, {} distinct", col.name, kind, col.distinct));
            if let Some(stats) = &col.stats {
                out.push_str(&format!(
                    ", min {} max {} mean {:.2}",
                    Value::Number(stats.min),
                    Value::Number(stats.max),
                    stats.mean
                ));
            }
            out.push_str(")\n");
        }
        for insight in &self.insights {
            out.push_str(&format!("* {}\n", insight));
        }
        out
    }
}

/// Profile a snapshot. Text snapshots yield a profile with no columns and
/// `row_count` equal to the number of non-empty lines.
pub fn profile(snapshot: &Snapshot) -> DataProfile {
    match snapshot.as_table() {
        Some(table) => profile_table(table),
        None => DataProfile {
            row_count: snapshot.len(),
            column_count: 0,
            columns: Vec::new(),
            insights: Vec::new(),
        },
    }
}

fn profile_table(table: &Table) -> DataProfile {
    let row_count = table.rows().len();
    let columns: Vec<ColumnProfile> = table
        .columns()
        .iter()
        .map(|name| profile_column(table, name))
        .collect();

    let mut insights = Vec::new();
    for col in &columns {
        let missing = row_count - col.non_null;
        if missing > 0 {
            insights.push(format!(
                "{} has {} missing value{}",
                col.name,
                missing,
                if missing == 1 { "" } else { "s" }
            ));
        }
    }
    for col in columns.iter().filter(|c| c.kind == ColumnKind::Date) {
        if let Some((first, last)) = date_range(table, &col.name) {
            insights.push(format!("{} spans {} to {}", col.name, first, last));
        }
    }
    for col in columns.iter().filter(|c| c.role == ColumnRole::Dimension) {
        if let Some(dist) = &col.distribution {
            if let Some((top, count)) = dist.iter().max_by_key(|(_, n)| **n) {
                if col.non_null > 0 && *count * 2 > col.non_null {
                    insights.push(format!(
                        "{} is dominated by \"{}\" ({} of {})",
                        col.name, top, count, col.non_null
                    ));
                }
            }
        }
    }

    DataProfile {
        row_count,
        column_count: columns.len(),
        columns,
        insights,
    }
}

fn profile_column(table: &Table, name: &str) -> ColumnProfile {
    let values: Vec<&Value> = table
        .rows()
        .iter()
        .filter_map(|row| row.get(name))
        .filter(|v| !v.is_null())
        .collect();

    let kind = infer_kind(&values);
    let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    let distinct = rendered.iter().collect::<HashSet<_>>().len();

    let distribution = (distinct > 0 && distinct <= DISTRIBUTION_LIMIT).then(|| {
        let mut counts = BTreeMap::new();
        for r in &rendered {
            *counts.entry(r.clone()).or_insert(0) += 1;
        }
        counts
    });

    let stats = if kind == ColumnKind::Number {
        numeric_stats(values.iter().filter_map(|v| v.as_f64()))
    } else {
        None
    };

    let role = suggest_role(name, kind, distinct, values.len());

    ColumnProfile {
        name: name.to_string(),
        kind,
        role,
        non_null: values.len(),
        distinct,
        distribution,
        stats,
    }
}

fn infer_kind(values: &[&Value]) -> ColumnKind {
    if values.is_empty() {
        return ColumnKind::String;
    }
    if values.iter().all(|v| is_boolean(v)) {
        ColumnKind::Boolean
    } else if values.iter().all(|v| v.as_f64().is_some()) {
        ColumnKind::Number
    } else if values
        .iter()
        .all(|v| matches!(v, Value::Text(s) if parse_date(s).is_some()))
    {
        ColumnKind::Date
    } else {
        ColumnKind::String
    }
}

fn is_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Text(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "false" | "yes" | "no"
        ),
        _ => false,
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.date_naive()))
}

fn date_range(table: &Table, column: &str) -> Option<(NaiveDate, NaiveDate)> {
    let dates: Vec<NaiveDate> = table
        .rows()
        .iter()
        .filter_map(|row| match row.get(column) {
            Some(Value::Text(s)) => parse_date(s),
            _ => None,
        })
        .collect();
    let first = dates.iter().min()?;
    let last = dates.iter().max()?;
    Some((*first, *last))
}

fn numeric_stats(values: impl Iterator<Item = f64>) -> Option<NumericStats> {
    let mut count = 0usize;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for v in values {
        count += 1;
        min = min.min(v);
        max = max.max(v);
        sum += v;
    }
    (count > 0).then(|| NumericStats {
        min,
        max,
        mean: sum / count as f64,
        sum,
    })
}

fn suggest_role(name: &str, kind: ColumnKind, distinct: usize, non_null: usize) -> ColumnRole {
    if kind == ColumnKind::Date || is_time_name(name) {
        ColumnRole::Time
    } else if is_identifier_name(name) && non_null > 0 && distinct == non_null {
        ColumnRole::Identifier
    } else if kind == ColumnKind::Number {
        ColumnRole::Measure
    } else {
        ColumnRole::Dimension
    }
}

fn is_time_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["date", "month", "year", "quarter", "week", "time"]
        .iter()
        .any(|t| lower == *t || lower.ends_with(&format!("_{}", t)))
}

/// Identifier-like column names: `id`, `key`, `code`, `sku`, `*_id`,
/// `* id` and camel-case `*Id`.
pub fn is_identifier_name(name: &str) -> bool {
    let trimmed = name.trim();
    let lower = trimmed.to_ascii_lowercase();
    matches!(lower.as_str(), "id" | "key" | "code" | "sku")
        || lower.ends_with("_id")
        || lower.ends_with(" id")
        || (trimmed.len() > 2
            && trimmed.ends_with("Id")
            && trimmed[..trimmed.len() - 2]
                .chars()
                .last()
                .is_some_and(|c| c.is_lowercase()))
}
