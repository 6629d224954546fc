//! Relational engine adapter (MySQL).
//!
//! Wraps a `sqlx` MySQL pool behind the uniform capability surface:
//! namespace listing, `information_schema` introspection, paged browsing and
//! raw query execution with JSON row decoding.

use crate::error::{CoreError, CoreResult};
use crate::models::{ColumnInfo, IndexInfo, ObjectKind, RowPage, TableInfo, clamp_page_size};
use crate::query::classify;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, MySqlPool, Row, TypeInfo};
use std::time::Duration;

use super::adapter::NativeResult;

const POOL_MAX_CONNECTIONS: u32 = 5;

/// Live MySQL client handle. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct MySqlEngine {
    pool: MySqlPool,
}

impl MySqlEngine {
    /// Open a pool against `host:port` using the credentials in `config`.
    ///
    /// `host`/`port` are passed separately because a tunnel substitutes a
    /// local forward endpoint for the configured address.
    pub async fn connect(
        config: &crate::models::ConnectionConfig,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> CoreResult<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(config.username.as_deref().unwrap_or("root"))
            .charset("utf8mb4");
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        if let Some(database) = &config.database {
            options = options.database(database);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::connect(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn ping(&self) -> CoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn list_databases(&self) -> CoreResult<Vec<String>> {
        let rows = sqlx::query("SHOW DATABASES").fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>(0).ok())
            .collect())
    }

    pub async fn list_tables(&self, database: &str) -> CoreResult<Vec<TableInfo>> {
        let rows = sqlx::query(
            "SELECT TABLE_NAME, TABLE_TYPE FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? ORDER BY TABLE_NAME",
        )
        .bind(database)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name: String = row.try_get("TABLE_NAME").ok()?;
                let table_type: String = row.try_get("TABLE_TYPE").unwrap_or_default();
                let kind = if table_type.eq_ignore_ascii_case("VIEW") {
                    ObjectKind::View
                } else {
                    ObjectKind::Table
                };
                Some(TableInfo::new(name, kind))
            })
            .collect())
    }

    pub async fn describe(&self, database: &str, table: &str) -> CoreResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_KEY, COLUMN_DEFAULT, COLUMN_COMMENT \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
        )
        .bind(database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name: String = row.try_get("COLUMN_NAME").ok()?;
                let data_type: String = row.try_get("COLUMN_TYPE").unwrap_or_default();
                let nullable: String = row.try_get("IS_NULLABLE").unwrap_or_default();
                let key: String = row.try_get("COLUMN_KEY").unwrap_or_default();
                let default_value: Option<String> = row.try_get("COLUMN_DEFAULT").ok().flatten();
                let comment: String = row.try_get("COLUMN_COMMENT").unwrap_or_default();

                let mut column = ColumnInfo::new(name, data_type, nullable == "YES").with_key(key);
                column.default_value = default_value;
                if !comment.is_empty() {
                    column.comment = Some(comment);
                }
                Some(column)
            })
            .collect())
    }

    pub async fn list_indexes(&self, database: &str, table: &str) -> CoreResult<Vec<IndexInfo>> {
        let rows = sqlx::query(
            "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY INDEX_NAME, SEQ_IN_INDEX",
        )
        .bind(database)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in &rows {
            let name: String = match row.try_get("INDEX_NAME") {
                Ok(n) => n,
                Err(_) => continue,
            };
            let column: String = row.try_get("COLUMN_NAME").unwrap_or_default();
            let non_unique: i64 = row.try_get("NON_UNIQUE").unwrap_or(1);

            match indexes.iter_mut().find(|idx| idx.name == name) {
                Some(idx) => idx.columns.push(column),
                None => indexes.push(IndexInfo {
                    name,
                    columns: vec![column],
                    unique: non_unique == 0,
                }),
            }
        }
        Ok(indexes)
    }

    pub async fn page_rows(
        &self,
        database: &str,
        table: &str,
        page: u32,
        page_size: u32,
    ) -> CoreResult<RowPage> {
        let page = page.max(1);
        let page_size = clamp_page_size(page_size);
        let offset = (page as u64 - 1) * page_size as u64;
        let qualified = format!("{}.{}", quote_ident(database), quote_ident(table));

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", qualified))
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!("SELECT * FROM {} LIMIT ? OFFSET ?", qualified))
            .bind(page_size as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let columns = rows.first().map(column_names).unwrap_or_default();
        let rows = rows.iter().map(row_to_json).collect();

        Ok(RowPage {
            columns,
            rows,
            page,
            page_size,
            total: Some(total as u64),
        })
    }

    /// Run a raw SQL statement with no rewriting.
    ///
    /// The statement is classified lexically first: writes go through
    /// `execute` and report affected rows, everything else is fetched as a
    /// row set.
    pub async fn run(&self, database: Option<&str>, sql: &str) -> CoreResult<NativeResult> {
        let mut conn = self.pool.acquire().await?;
        if let Some(db) = database {
            (&mut *conn)
                .execute(format!("USE {}", quote_ident(db)).as_str())
                .await?;
        }

        if classify::relational_write_verb(sql).is_some() {
            let result = (&mut *conn).execute(sql).await?;
            Ok(NativeResult::Affected(result.rows_affected()))
        } else {
            let rows = (&mut *conn).fetch_all(sql).await?;
            let columns = rows.first().map(column_names).unwrap_or_default();
            let rows: Vec<_> = rows.iter().map(row_to_json).collect();
            Ok(NativeResult::rows(columns, rows, None))
        }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Backtick-quote an identifier, doubling embedded backticks.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn column_names(row: &MySqlRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode one row into a JSON record, keyed by column name.
fn row_to_json(row: &MySqlRow) -> serde_json::Map<String, serde_json::Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            (
                col.name().to_string(),
                decode_value(row, idx, col.type_info().name()),
            )
        })
        .collect()
}

/// Decode a single cell by type-name category, falling back to text.
fn decode_value(row: &MySqlRow, idx: usize, type_name: &str) -> serde_json::Value {
    use serde_json::Value;

    let lower = type_name.to_lowercase();

    if lower.contains("int") {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
        }
        if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
            return Value::Number(v.into());
        }
        return Value::Null;
    }

    if lower == "bool" || lower == "boolean" {
        return row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null);
    }

    if lower.contains("float") || lower.contains("double") {
        return row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }

    if lower == "json" {
        return row
            .try_get::<Option<Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(Value::Null);
    }

    if lower.contains("blob") || lower.contains("binary") {
        return row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|bytes| match String::from_utf8(bytes.clone()) {
                Ok(text) => Value::String(text),
                Err(_) => Value::String(format!("<binary {} bytes>", bytes.len())),
            })
            .unwrap_or(Value::Null);
    }

    // Decimals, dates, times and everything textual come back as strings.
    match row.try_get::<Option<String>, _>(idx) {
        Ok(Some(v)) => Value::String(v),
        Ok(None) => Value::Null,
        Err(_) => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| Value::String(dt.to_string()))
            .unwrap_or(Value::Null),
    }
}
