//! Engine dispatch.
//!
//! One tagged union per engine family, selected by the connection's declared
//! engine kind - never by inspecting the native client at runtime. Every
//! variant exposes the same capability surface; differences live inside the
//! per-engine modules.

use crate::error::CoreResult;
use crate::models::{
    ColumnInfo, ConnectionConfig, EngineKind, IndexInfo, RowPage, RowSet, TableInfo,
};
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::elastic::ElasticEngine;
use super::mongo::MongoEngine;
use super::mysql::MySqlEngine;

/// Result of a raw query in the engine's own terms, before gateway
/// normalization: either rows or an affected-count, never both.
#[derive(Debug, Clone)]
pub enum NativeResult {
    Rows {
        columns: Vec<String>,
        rows: Vec<serde_json::Map<String, JsonValue>>,
        total: Option<u64>,
    },
    Affected(u64),
}

impl NativeResult {
    pub fn rows(
        columns: Vec<String>,
        rows: Vec<serde_json::Map<String, JsonValue>>,
        total: Option<u64>,
    ) -> Self {
        Self::Rows {
            columns,
            rows,
            total,
        }
    }

    /// Convert into the common tabular shape.
    pub fn into_row_set(self) -> Option<RowSet> {
        match self {
            Self::Rows {
                columns,
                rows,
                total,
            } => Some(RowSet {
                columns,
                rows,
                total,
            }),
            Self::Affected(_) => None,
        }
    }
}

/// A live engine client, one variant per engine family.
///
/// Cheap to clone: every variant wraps a pooled or multiplexed client.
#[derive(Debug, Clone)]
pub enum EngineClient {
    MySql(MySqlEngine),
    Mongo(MongoEngine),
    Elastic(ElasticEngine),
}

impl EngineClient {
    /// Open a client for the config's engine kind against `host:port`
    /// (already tunnel-substituted by the caller when applicable).
    pub async fn connect(
        config: &ConnectionConfig,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> CoreResult<Self> {
        match config.engine {
            EngineKind::Mysql => Ok(Self::MySql(
                MySqlEngine::connect(config, host, port, connect_timeout).await?,
            )),
            EngineKind::Mongodb => Ok(Self::Mongo(
                MongoEngine::connect(config, host, port, connect_timeout).await?,
            )),
            EngineKind::Elasticsearch => Ok(Self::Elastic(ElasticEngine::connect(
                config,
                host,
                port,
                connect_timeout,
            )?)),
        }
    }

    pub fn engine_kind(&self) -> EngineKind {
        match self {
            Self::MySql(_) => EngineKind::Mysql,
            Self::Mongo(_) => EngineKind::Mongodb,
            Self::Elastic(_) => EngineKind::Elasticsearch,
        }
    }

    /// Cheap liveness probe used by `test()`.
    pub async fn ping(&self) -> CoreResult<()> {
        match self {
            Self::MySql(engine) => engine.ping().await,
            Self::Mongo(engine) => engine.ping().await,
            Self::Elastic(engine) => engine.ping().await,
        }
    }

    pub async fn list_databases(&self) -> CoreResult<Vec<String>> {
        match self {
            Self::MySql(engine) => engine.list_databases().await,
            Self::Mongo(engine) => engine.list_databases().await,
            Self::Elastic(engine) => engine.list_databases().await,
        }
    }

    pub async fn list_tables(&self, database: &str) -> CoreResult<Vec<TableInfo>> {
        match self {
            Self::MySql(engine) => engine.list_tables(database).await,
            Self::Mongo(engine) => engine.list_tables(database).await,
            Self::Elastic(engine) => engine.list_tables(database).await,
        }
    }

    pub async fn describe(&self, database: &str, table: &str) -> CoreResult<Vec<ColumnInfo>> {
        match self {
            Self::MySql(engine) => engine.describe(database, table).await,
            Self::Mongo(engine) => engine.describe(database, table).await,
            Self::Elastic(engine) => engine.describe(database, table).await,
        }
    }

    pub async fn list_indexes(&self, database: &str, table: &str) -> CoreResult<Vec<IndexInfo>> {
        match self {
            Self::MySql(engine) => engine.list_indexes(database, table).await,
            Self::Mongo(engine) => engine.list_indexes(database, table).await,
            Self::Elastic(engine) => engine.list_indexes(database, table).await,
        }
    }

    /// Fetch one page of a table/collection/index; 1-based page numbers.
    pub async fn page_rows(
        &self,
        database: &str,
        table: &str,
        page: u32,
        page_size: u32,
    ) -> CoreResult<RowPage> {
        match self {
            Self::MySql(engine) => engine.page_rows(database, table, page, page_size).await,
            Self::Mongo(engine) => engine.page_rows(database, table, page, page_size).await,
            Self::Elastic(engine) => engine.page_rows(database, table, page, page_size).await,
        }
    }

    /// Pass a raw query through to the engine with no rewriting.
    pub async fn run(&self, database: Option<&str>, query: &str) -> CoreResult<NativeResult> {
        match self {
            Self::MySql(engine) => engine.run(database, query).await,
            Self::Mongo(engine) => engine.run(database, query).await,
            Self::Elastic(engine) => engine.run(database, query).await,
        }
    }

    pub async fn close(self) {
        match self {
            Self::MySql(engine) => engine.close().await,
            Self::Mongo(engine) => engine.close().await,
            Self::Elastic(engine) => engine.close().await,
        }
    }
}
