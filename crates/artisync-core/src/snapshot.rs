//! Immutable content snapshots.
//!
//! A [`Snapshot`] is one version of the content an artifact is built from:
//! either a table (ordered columns plus rows keyed by column name) or free
//! text. Snapshots are never mutated after construction; every edit upstream
//! produces a new snapshot with a new [`SnapshotId`].
//!
//! # Identity
//!
//! [`Snapshot::id`] is a SHA-256 digest over a canonical walk of the content
//! (kind tag, column order, every row's entries in key order). Two snapshots
//! with equal content always share an id, which is what
//! `Artifact::source_snapshot` records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A single cell value.
///
/// Deserialized untagged, so plain JSON scalars map directly:
/// `null`, `true`, `42.5`, `"EMEA"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value, parsing numeric text (`"1,200.50"`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => {
                let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
                if cleaned.is_empty() {
                    None
                } else {
                    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
                }
            }
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// One table row: column name → value.
pub type Row = BTreeMap<String, Value>;

/// Content-derived snapshot identity (lowercase SHA-256 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tabular snapshot payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Row>,
}

impl Table {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Value of `column` in row `index`; missing cells read as [`Value::Null`].
    pub fn cell(&self, index: usize, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.rows
            .get(index)
            .and_then(|row| row.get(column))
            .unwrap_or(&NULL)
    }
}

/// Free-text snapshot payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    content: String,
}

impl Text {
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// One immutable version of source content.
///
/// The JSON form is internally tagged:
///
/// ```json
/// {"kind": "tabular", "columns": ["region", "revenue"], "rows": [{"region": "EMEA", "revenue": 120}]}
/// {"kind": "text", "content": "Quarterly narrative..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Snapshot {
    Tabular(Table),
    Text(Text),
}

impl Snapshot {
    pub fn tabular(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Snapshot::Tabular(Table { columns, rows })
    }

    pub fn text(content: impl Into<String>) -> Self {
        Snapshot::Text(Text {
            content: content.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Snapshot::Tabular(_) => "tabular",
            Snapshot::Text(_) => "text",
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Snapshot::Tabular(t) => Some(t),
            Snapshot::Text(_) => None,
        }
    }

    /// Column names, empty for text snapshots.
    pub fn columns(&self) -> &[String] {
        match self {
            Snapshot::Tabular(t) => &t.columns,
            Snapshot::Text(_) => &[],
        }
    }

    /// Row count for tables, non-empty line count for text.
    pub fn len(&self) -> usize {
        match self {
            Snapshot::Tabular(t) => t.rows.len(),
            Snapshot::Text(t) => t.content.lines().filter(|l| !l.trim().is_empty()).count(),
        }
    }

    /// True when there is nothing an artifact could be built from.
    pub fn is_empty(&self) -> bool {
        match self {
            Snapshot::Tabular(t) => t.columns.is_empty() || t.rows.is_empty(),
            Snapshot::Text(t) => t.content.trim().is_empty(),
        }
    }

    /// Content-derived identity.
    pub fn id(&self) -> SnapshotId {
        let mut hasher = Sha256::new();
        match self {
            Snapshot::Tabular(t) => {
                hasher.update(b"tabular\0");
                for column in &t.columns {
                    hash_str(&mut hasher, column);
                }
                hasher.update(b"\x1e");
                for row in &t.rows {
                    for (key, value) in row {
                        hash_str(&mut hasher, key);
                        hasher.update([value.tag()]);
                        match value {
                            Value::Null => {}
                            Value::Bool(b) => hasher.update([*b as u8]),
                            Value::Number(n) => hasher.update(n.to_bits().to_le_bytes()),
                            Value::Text(s) => hash_str(&mut hasher, s),
                        }
                    }
                    hasher.update(b"\x1e");
                }
            }
            Snapshot::Text(t) => {
                hasher.update(b"text\0");
                hasher.update(t.content.as_bytes());
            }
        }
        SnapshotId(hex::encode(hasher.finalize()))
    }

    /// Render the snapshot as CSV (tables) or raw text.
    ///
    /// `max_rows` truncates tables; `None` renders every row.
    pub fn render(&self, max_rows: Option<usize>) -> String {
        match self {
            Snapshot::Tabular(t) => table_to_csv(t, max_rows),
            Snapshot::Text(t) => t.content.clone(),
        }
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn table_to_csv(table: &Table, max_rows: Option<usize>) -> String {
    let mut out = String::new();
    let header: Vec<String> = table.columns.iter().map(|c| csv_field(c)).collect();
    out.push_str(&header.join(","));
    out.push('\n');

    let limit = max_rows.unwrap_or(usize::MAX);
    for row in table.rows.iter().take(limit) {
        let fields: Vec<String> = table
            .columns
            .iter()
            .map(|c| csv_field(&row.get(c).map(|v| v.to_string()).unwrap_or_default()))
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}
