//! Schema-related data models.
//!
//! Types describing database structure: tables/collections/indices, their
//! columns or fields, and the cached snapshots the schema indexer serves
//! autocomplete from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of namespace object, one per engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
    Collection,
    Index,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
            Self::Collection => write!(f, "collection"),
            Self::Index => write!(f, "index"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub kind: ObjectKind,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One column (relational), field (document) or mapping property
/// (search-index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Engine-specific type text, e.g. `varchar(64)`, `int64/string`, `keyword`.
    pub data_type: String,
    pub nullable: bool,
    /// Key role, e.g. `PRI` for a primary key; empty when none.
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            key: String::new(),
            default_value: None,
            comment: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.key == "PRI"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// One table plus its columns inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: TableInfo,
    pub columns: Vec<ColumnInfo>,
}

/// Cached structure of one (connection, database) pair.
///
/// Immutable once built; a rebuild replaces the whole snapshot so readers
/// never see a mix of old and new tables.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
    pub built_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            tables,
            built_at: Utc::now(),
        }
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Compact text rendering of the snapshot, suitable as LLM prompt context.
    pub fn schema_text(&self, database: &str) -> String {
        let mut lines = vec![format!("Database: {}", database), String::new()];
        for entry in &self.tables {
            let cols = entry
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("  {}({})", entry.table.name, cols));
        }
        lines.join("\n")
    }
}

/// What a schema search should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Table,
    Field,
    All,
}

/// One autocomplete hit.
///
/// `display` is suitable for literal insertion at the cursor; the kind tag
/// lets the caller render tables and fields distinctly. Hits never carry
/// [`SearchKind::All`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub display: String,
    pub kind: SearchKind,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}
