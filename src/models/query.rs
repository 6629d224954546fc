//! Query-related data models.
//!
//! This module defines the request/outcome types flowing through the query
//! gateway and the common tabular shapes results are normalized into.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default page size for table browsing.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Maximum allowed page size.
pub const MAX_PAGE_SIZE: u32 = 500;

/// A raw query submitted for execution through the gateway.
///
/// `query` is an already-extracted query string in the engine's native
/// dialect - SQL for the relational engine, a JSON command payload for the
/// document engine, a console-style request for the search-index engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub connection_id: String,
    /// Target database / namespace. Falls back to the connection default.
    #[serde(default)]
    pub database: Option<String>,
    pub query: String,
    /// Must be true to execute a query classified as a write.
    #[serde(default)]
    pub confirmed: bool,
}

impl QueryRequest {
    pub fn new(connection_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            database: None,
            query: query.into(),
            confirmed: false,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }
}

/// An ordered row set: declared column order plus named-field records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Present only when the engine reports it cheaply; never guessed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl RowSet {
    /// Build a row set from records, deriving column order from the first row.
    pub fn from_rows(rows: Vec<serde_json::Map<String, JsonValue>>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            columns,
            rows,
            total: None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// One page of a table/collection/index browse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowPage {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// 1-based page number as requested.
    pub page: u32,
    pub page_size: u32,
    /// Total row count when cheaply knowable, otherwise omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Clamp a requested page size into the supported range.
pub fn clamp_page_size(page_size: u32) -> u32 {
    page_size.clamp(1, MAX_PAGE_SIZE)
}

/// Outcome of a gateway execution.
///
/// A result is either a row set or a mutation summary, never both. A write
/// submitted without confirmation yields `NeedsConfirmation` and has no side
/// effect; resubmitting with `confirmed = true` executes it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    Rows(RowSet),
    Mutation {
        affected: u64,
    },
    NeedsConfirmation {
        /// The original query, echoed for resubmission.
        query: String,
        /// Human-readable reason the query was held.
        reason: String,
    },
}

impl QueryOutcome {
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Self::NeedsConfirmation { .. })
    }
}
