//! Schema indexing and autocomplete search.
//!
//! The [`SchemaIndexer`] caches one immutable [`SchemaSnapshot`] per
//! (connection, database) pair, built by walking the engine's structure
//! through its live client. Rebuilds replace the snapshot wholesale so
//! readers never observe a half-built mix, and concurrent rebuilds for the
//! same key collapse into a single underlying scan.

use crate::db::adapter::EngineClient;
use crate::db::manager::ConnectionManager;
use crate::error::CoreResult;
use crate::models::{SchemaSnapshot, SearchHit, SearchKind, TableSchema};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Maximum number of search hits returned.
const SEARCH_RESULT_CAP: usize = 20;

type SnapshotKey = (String, String);

struct CacheEntry {
    /// Bumped on every replacement; lets queued builders detect that the
    /// build they were waiting behind already produced a fresh snapshot.
    generation: u64,
    snapshot: Arc<SchemaSnapshot>,
}

#[derive(Default)]
pub struct SchemaIndexer {
    cache: RwLock<HashMap<SnapshotKey, CacheEntry>>,
    /// Per-key build gates serializing expensive metadata scans.
    gates: Mutex<HashMap<SnapshotKey, Arc<Mutex<()>>>>,
}

impl SchemaIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the snapshot for `(connection_id, database)`.
    ///
    /// Fails with `NotConnected` when the connection is not live. Concurrent
    /// calls for the same key await one underlying scan and all observe the
    /// identical resulting snapshot.
    pub async fn build(
        &self,
        manager: &ConnectionManager,
        connection_id: &str,
        database: &str,
    ) -> CoreResult<Arc<SchemaSnapshot>> {
        let client = manager.adapter(connection_id).await?;
        let key = (connection_id.to_string(), database.to_string());
        let database = database.to_string();
        self.build_with(key, move || async move { scan(client, &database).await })
            .await
    }

    /// Single-flight build primitive around an arbitrary loader.
    async fn build_with<F, Fut>(
        &self,
        key: SnapshotKey,
        loader: F,
    ) -> CoreResult<Arc<SchemaSnapshot>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<SchemaSnapshot>>,
    {
        let gate = {
            let mut gates = self.gates.lock().await;
            gates
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let start_generation = self.generation(&key).await;
        let _guard = gate.lock().await;

        // While we queued behind the gate, another caller may have finished
        // the very build we were asking for.
        if self.generation(&key).await != start_generation {
            if let Some(snapshot) = self.get_key(&key).await {
                return Ok(snapshot);
            }
        }

        let snapshot = Arc::new(loader().await?);
        let mut cache = self.cache.write().await;
        let generation = cache.get(&key).map(|e| e.generation).unwrap_or(0) + 1;
        info!(
            connection_id = %key.0,
            database = %key.1,
            tables = snapshot.table_count(),
            "Schema snapshot built"
        );
        cache.insert(
            key,
            CacheEntry {
                generation,
                snapshot: snapshot.clone(),
            },
        );
        Ok(snapshot)
    }

    async fn generation(&self, key: &SnapshotKey) -> u64 {
        self.cache
            .read()
            .await
            .get(key)
            .map(|e| e.generation)
            .unwrap_or(0)
    }

    async fn get_key(&self, key: &SnapshotKey) -> Option<Arc<SchemaSnapshot>> {
        self.cache.read().await.get(key).map(|e| e.snapshot.clone())
    }

    /// The cached snapshot, if any.
    pub async fn get(
        &self,
        connection_id: &str,
        database: &str,
    ) -> Option<Arc<SchemaSnapshot>> {
        self.get_key(&(connection_id.to_string(), database.to_string()))
            .await
    }

    /// The cached snapshot, building it on first access.
    pub async fn ensure(
        &self,
        manager: &ConnectionManager,
        connection_id: &str,
        database: &str,
    ) -> CoreResult<Arc<SchemaSnapshot>> {
        if let Some(snapshot) = self.get(connection_id, database).await {
            return Ok(snapshot);
        }
        self.build(manager, connection_id, database).await
    }

    /// Drop every snapshot belonging to `connection_id`; called on
    /// disconnect.
    pub async fn evict(&self, connection_id: &str) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|(id, _), _| id != connection_id);
        let dropped = before - cache.len();
        drop(cache);

        let mut gates = self.gates.lock().await;
        gates.retain(|(id, _), _| id != connection_id);

        if dropped > 0 {
            debug!(connection_id = %connection_id, dropped, "Schema snapshots evicted");
        }
    }

    /// Compact schema text for LLM prompt context, building the snapshot on
    /// first access.
    pub async fn schema_text(
        &self,
        manager: &ConnectionManager,
        connection_id: &str,
        database: &str,
    ) -> CoreResult<String> {
        let snapshot = self.ensure(manager, connection_id, database).await?;
        Ok(snapshot.schema_text(database))
    }

    /// Ranked autocomplete search over the cached snapshot.
    ///
    /// Ranking: exact case-insensitive match, then prefix, then substring;
    /// shorter names first within a tier. When `kind` is `Field` and
    /// `scope_table` is given, only that table's columns are candidates.
    /// Returns nothing when no snapshot has been built yet.
    pub async fn search(
        &self,
        connection_id: &str,
        database: &str,
        query: &str,
        kind: SearchKind,
        scope_table: Option<&str>,
    ) -> Vec<SearchHit> {
        let Some(snapshot) = self.get(connection_id, database).await else {
            return Vec::new();
        };

        let needle = query.to_lowercase();
        let mut ranked: Vec<(u8, usize, String, SearchHit)> = Vec::new();

        for entry in &snapshot.tables {
            let table_name = &entry.table.name;

            if matches!(kind, SearchKind::Table | SearchKind::All) {
                if let Some(tier) = match_tier(table_name, &needle) {
                    ranked.push((
                        tier,
                        table_name.len(),
                        table_name.clone(),
                        SearchHit {
                            display: table_name.clone(),
                            kind: SearchKind::Table,
                            table: table_name.clone(),
                            field: None,
                        },
                    ));
                }
            }

            if matches!(kind, SearchKind::Field | SearchKind::All) {
                if let Some(scope) = scope_table {
                    if !table_name.eq_ignore_ascii_case(scope) {
                        continue;
                    }
                }
                for column in &entry.columns {
                    if let Some(tier) = match_tier(&column.name, &needle) {
                        let display = if scope_table.is_some() {
                            column.name.clone()
                        } else {
                            format!("{}.{}", table_name, column.name)
                        };
                        ranked.push((
                            tier,
                            column.name.len(),
                            column.name.clone(),
                            SearchHit {
                                display,
                                kind: SearchKind::Field,
                                table: table_name.clone(),
                                field: Some(column.name.clone()),
                            },
                        ));
                    }
                }
            }
        }

        ranked.sort_by(|a, b| (a.0, a.1, &a.2).cmp(&(b.0, b.1, &b.2)));
        ranked
            .into_iter()
            .take(SEARCH_RESULT_CAP)
            .map(|(_, _, _, hit)| hit)
            .collect()
    }
}

/// Match tier: 0 exact, 1 prefix, 2 substring, None otherwise. The needle
/// is already lowercased.
fn match_tier(name: &str, needle: &str) -> Option<u8> {
    let lower = name.to_lowercase();
    if lower == *needle {
        Some(0)
    } else if lower.starts_with(needle) {
        Some(1)
    } else if lower.contains(needle) {
        Some(2)
    } else {
        None
    }
}

/// Walk the engine's structure: tables first, then columns per table.
async fn scan(client: EngineClient, database: &str) -> CoreResult<SchemaSnapshot> {
    let tables = client.list_tables(database).await?;
    let mut entries = Vec::with_capacity(tables.len());
    for table in tables {
        let columns = client.describe(database, &table.name).await?;
        entries.push(TableSchema { table, columns });
    }
    Ok(SchemaSnapshot::new(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnInfo, ObjectKind, TableInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![
            TableSchema {
                table: TableInfo::new("orders", ObjectKind::Table),
                columns: vec![
                    ColumnInfo::new("id", "bigint", false).with_key("PRI"),
                    ColumnInfo::new("order_date", "date", true),
                    ColumnInfo::new("user_id", "bigint", false),
                ],
            },
            TableSchema {
                table: TableInfo::new("order_items", ObjectKind::Table),
                columns: vec![
                    ColumnInfo::new("id", "bigint", false).with_key("PRI"),
                    ColumnInfo::new("order_id", "bigint", false),
                ],
            },
            TableSchema {
                table: TableInfo::new("users", ObjectKind::Table),
                columns: vec![
                    ColumnInfo::new("id", "bigint", false).with_key("PRI"),
                    ColumnInfo::new("email", "varchar(255)", false),
                ],
            },
        ])
    }

    async fn seeded_indexer() -> SchemaIndexer {
        let indexer = SchemaIndexer::new();
        indexer
            .build_with(("c1".to_string(), "shop".to_string()), || async {
                Ok(sample_snapshot())
            })
            .await
            .unwrap();
        indexer
    }

    #[tokio::test]
    async fn test_search_table_ranking() {
        let indexer = seeded_indexer().await;
        let hits = indexer
            .search("c1", "shop", "orders", SearchKind::Table, None)
            .await;
        // Exact match ranks above the longer substring match.
        assert_eq!(hits[0].display, "orders");
        assert!(hits.iter().any(|h| h.display == "order_items"));
    }

    #[tokio::test]
    async fn test_search_prefix_before_substring() {
        let indexer = seeded_indexer().await;
        let hits = indexer
            .search("c1", "shop", "order", SearchKind::Table, None)
            .await;
        assert_eq!(hits[0].display, "orders");
        assert_eq!(hits[1].display, "order_items");
    }

    #[tokio::test]
    async fn test_search_field_scoped_to_table() {
        let indexer = seeded_indexer().await;
        let hits = indexer
            .search("c1", "shop", "id", SearchKind::Field, Some("orders"))
            .await;
        assert!(!hits.is_empty());
        for hit in &hits {
            assert_eq!(hit.table, "orders");
            assert_eq!(hit.kind, SearchKind::Field);
            // Scoped hits insert the bare field name.
            assert!(!hit.display.contains('.'));
        }
    }

    #[tokio::test]
    async fn test_search_field_unscoped_is_qualified() {
        let indexer = seeded_indexer().await;
        let hits = indexer
            .search("c1", "shop", "email", SearchKind::Field, None)
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display, "users.email");
    }

    #[tokio::test]
    async fn test_search_without_snapshot_is_empty() {
        let indexer = SchemaIndexer::new();
        let hits = indexer
            .search("c1", "shop", "users", SearchKind::All, None)
            .await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_snapshot_wholesale() {
        let indexer = seeded_indexer().await;
        indexer
            .build_with(("c1".to_string(), "shop".to_string()), || async {
                Ok(SchemaSnapshot::new(vec![TableSchema {
                    table: TableInfo::new("fresh", ObjectKind::Table),
                    columns: vec![],
                }]))
            })
            .await
            .unwrap();

        let snapshot = indexer.get("c1", "shop").await.unwrap();
        assert_eq!(snapshot.table_count(), 1);
        assert_eq!(snapshot.tables[0].table.name, "fresh");
        // Nothing of the old snapshot remains.
        assert!(
            indexer
                .search("c1", "shop", "orders", SearchKind::Table, None)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_evict_drops_all_snapshots_for_connection() {
        let indexer = seeded_indexer().await;
        indexer
            .build_with(("c1".to_string(), "analytics".to_string()), || async {
                Ok(sample_snapshot())
            })
            .await
            .unwrap();
        indexer
            .build_with(("c2".to_string(), "shop".to_string()), || async {
                Ok(sample_snapshot())
            })
            .await
            .unwrap();

        indexer.evict("c1").await;
        assert!(indexer.get("c1", "shop").await.is_none());
        assert!(indexer.get("c1", "analytics").await.is_none());
        assert!(indexer.get("c2", "shop").await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_builds_collapse_into_one_scan() {
        let indexer = Arc::new(SchemaIndexer::new());
        let scans = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let indexer = indexer.clone();
            let scans = scans.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                indexer
                    .build_with(("c1".to_string(), "shop".to_string()), move || async move {
                        scans.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        Ok(sample_snapshot())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut snapshots = Vec::new();
        for handle in handles {
            snapshots.push(handle.await.unwrap());
        }

        assert_eq!(scans.load(Ordering::SeqCst), 1);
        // Every caller observed the identical snapshot.
        for snapshot in &snapshots[1..] {
            assert!(Arc::ptr_eq(&snapshots[0], snapshot));
        }
    }

    #[tokio::test]
    async fn test_build_error_leaves_previous_snapshot_in_place() {
        let indexer = seeded_indexer().await;
        let result = indexer
            .build_with(("c1".to_string(), "shop".to_string()), || async {
                Err(crate::error::CoreError::query("scan interrupted"))
            })
            .await;
        assert!(result.is_err());
        // The old snapshot still serves readers.
        let snapshot = indexer.get("c1", "shop").await.unwrap();
        assert_eq!(snapshot.table_count(), 3);
    }

    #[test]
    fn test_match_tier_ordering() {
        assert_eq!(match_tier("orders", "orders"), Some(0));
        assert_eq!(match_tier("Orders", "orders"), Some(0));
        assert_eq!(match_tier("order_items", "order"), Some(1));
        assert_eq!(match_tier("reorder", "order"), Some(2));
        assert_eq!(match_tier("users", "order"), None);
    }
}
