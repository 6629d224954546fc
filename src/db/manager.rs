//! Live-connection management.
//!
//! The [`ConnectionManager`] owns the registry of saved configs and the map
//! of live engine clients, and drives the connect/disconnect lifecycle:
//! tunnel first, then client, torn down in reverse order. It is constructed
//! once by the process entry point and passed by reference to every
//! component that needs it.
//!
//! Lock discipline: the live map's lock is held only to read or mutate
//! entries - no driver or tunnel call ever runs under it. Concurrent
//! connects for the same id collapse onto one attempt via a per-id gate.

use crate::db::adapter::EngineClient;
use crate::db::registry::ConnectionRegistry;
use crate::db::tunnel::SshTunnel;
use crate::error::{CoreError, CoreResult};
use crate::indexer::SchemaIndexer;
use crate::models::{
    ColumnInfo, ConnectionConfig, ConnectionStatus, ConnectionSummary, EngineKind, IndexInfo,
    RowPage, TableInfo,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// A registered live connection.
struct LiveEntry {
    client: EngineClient,
    /// Wrapped so the entry stays shareable; only teardown touches it.
    tunnel: Option<std::sync::Mutex<SshTunnel>>,
    engine: EngineKind,
    connected_at: DateTime<Utc>,
    status: ConnectionStatus,
}

/// Per-id state: either an in-flight attempt (its gate is locked for the
/// duration) or an established entry.
enum LiveState {
    Connecting(Arc<tokio::sync::Mutex<()>>),
    Live(LiveEntry),
}

pub struct ConnectionManager {
    registry: ConnectionRegistry,
    indexer: Arc<SchemaIndexer>,
    live: RwLock<HashMap<String, LiveState>>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        registry: ConnectionRegistry,
        indexer: Arc<SchemaIndexer>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            indexer,
            live: RwLock::new(HashMap::new()),
            connect_timeout,
        }
    }

    // ---- registry CRUD ----

    pub fn create_config(&self, config: ConnectionConfig) -> CoreResult<ConnectionConfig> {
        self.registry.create(config)
    }

    pub fn update_config(&self, config: ConnectionConfig) -> CoreResult<ConnectionConfig> {
        self.registry.update(config)
    }

    /// Delete a saved config. A currently connected id is disconnected
    /// first, so the client close is observed before the registry entry
    /// disappears.
    pub async fn delete_config(&self, id: &str) -> CoreResult<()> {
        if self.is_connected(id).await {
            self.disconnect(id).await;
        }
        self.registry.delete(id)
    }

    pub fn get_config(&self, id: &str) -> Option<ConnectionConfig> {
        self.registry.get(id)
    }

    /// Secret-free config views with live status.
    pub async fn list_summaries(&self) -> Vec<ConnectionSummary> {
        let connected = self.connected_ids().await;
        self.registry.summaries(&connected)
    }

    pub fn config_count(&self) -> usize {
        self.registry.count()
    }

    // ---- lifecycle ----

    /// Bring the connection up. Connecting an already-connected id is a
    /// no-op; concurrent calls for the same id collapse onto one attempt.
    pub async fn connect(&self, id: &str) -> CoreResult<()> {
        let config = self
            .registry
            .get(id)
            .ok_or_else(|| CoreError::not_found(id))?;

        // Insert a placeholder under the write lock before any I/O so a
        // second caller finds it and waits instead of opening a second
        // client.
        let _gate_guard = loop {
            let waiter = {
                let mut live = self.live.write().await;
                match live.get(id) {
                    Some(LiveState::Live(entry)) => {
                        if entry.status == ConnectionStatus::Connected {
                            return Ok(());
                        }
                        return Err(CoreError::connect(format!(
                            "Connection '{}' is in an error state; disconnect it first",
                            id
                        )));
                    }
                    Some(LiveState::Connecting(gate)) => gate.clone(),
                    None => {
                        let gate = Arc::new(tokio::sync::Mutex::new(()));
                        let guard = match gate.clone().try_lock_owned() {
                            Ok(guard) => guard,
                            // Freshly created mutex; retry defensively.
                            Err(_) => continue,
                        };
                        live.insert(id.to_string(), LiveState::Connecting(gate));
                        break guard;
                    }
                }
            };
            // Wait for the in-flight attempt, then re-check the map.
            drop(waiter.lock().await);
        };

        info!(connection_id = %id, engine = %config.engine, "Connecting");
        let result = self.open_connection(&config).await;

        let mut live = self.live.write().await;
        match result {
            Ok(entry) => {
                info!(connection_id = %id, "Connected");
                live.insert(id.to_string(), LiveState::Live(entry));
                Ok(())
            }
            Err(e) => {
                live.remove(id);
                warn!(connection_id = %id, error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// Open tunnel (if configured) then client, pinging to verify. Every
    /// failure path releases whatever was already opened.
    async fn open_connection(&self, config: &ConnectionConfig) -> CoreResult<LiveEntry> {
        let tunnel = match &config.tunnel {
            Some(spec) => {
                let spec = spec.clone();
                let remote_host = config.effective_host().to_string();
                let remote_port = config.effective_port();
                let tunnel =
                    tokio::task::spawn_blocking(move || SshTunnel::open(&spec, &remote_host, remote_port))
                        .await
                        .map_err(|e| CoreError::connect(format!("Tunnel task failed: {}", e)))??;
                Some(tunnel)
            }
            None => None,
        };

        let (host, port) = match &tunnel {
            Some(tunnel) => ("127.0.0.1".to_string(), tunnel.local_port()),
            None => (
                config.effective_host().to_string(),
                config.effective_port(),
            ),
        };

        let client = match EngineClient::connect(config, &host, port, self.connect_timeout).await {
            Ok(client) => client,
            Err(e) => {
                close_tunnel(tunnel).await;
                return Err(e);
            }
        };

        // Some drivers connect lazily; a ping makes failures surface here
        // instead of on the first real operation.
        if let Err(e) = client.ping().await {
            client.close().await;
            close_tunnel(tunnel).await;
            return Err(CoreError::connect(e.to_string()));
        }

        Ok(LiveEntry {
            client,
            tunnel: tunnel.map(std::sync::Mutex::new),
            engine: config.engine,
            connected_at: Utc::now(),
            status: ConnectionStatus::Connected,
        })
    }

    /// Tear the connection down: client first, then tunnel (reverse of
    /// creation), then evict its schema snapshots. Disconnecting an id that
    /// is not connected is a no-op.
    pub async fn disconnect(&self, id: &str) {
        let entry = {
            let mut live = self.live.write().await;
            match live.get(id) {
                Some(LiveState::Live(_)) => match live.remove(id) {
                    Some(LiveState::Live(entry)) => Some(entry),
                    _ => None,
                },
                // An in-flight connect keeps its placeholder; it is not
                // connected yet, so there is nothing to tear down.
                _ => None,
            }
        };

        let Some(entry) = entry else {
            return;
        };

        info!(connection_id = %id, "Disconnecting");
        entry.client.close().await;
        close_tunnel(
            entry
                .tunnel
                .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner)),
        )
        .await;
        self.indexer.evict(id).await;
    }

    /// Validate a config by building tunnel + client and pinging, without
    /// registering a live connection or touching the registry.
    pub async fn test(&self, config: &ConnectionConfig) -> CoreResult<()> {
        config.validate().map_err(CoreError::invalid_input)?;
        let entry = self.open_connection(config).await?;
        entry.client.close().await;
        close_tunnel(
            entry
                .tunnel
                .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner)),
        )
        .await;
        Ok(())
    }

    /// Disconnect everything; used at shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<String> = {
            let live = self.live.read().await;
            live.keys().cloned().collect()
        };
        for id in ids {
            self.disconnect(&id).await;
        }
        info!("All connections closed");
    }

    // ---- state queries ----

    pub async fn status(&self, id: &str) -> ConnectionStatus {
        let live = self.live.read().await;
        match live.get(id) {
            Some(LiveState::Live(entry)) => entry.status,
            Some(LiveState::Connecting(_)) => ConnectionStatus::Connecting,
            None => ConnectionStatus::Disconnected,
        }
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.status(id).await == ConnectionStatus::Connected
    }

    pub async fn connected_at(&self, id: &str) -> Option<DateTime<Utc>> {
        let live = self.live.read().await;
        match live.get(id) {
            Some(LiveState::Live(entry)) if entry.status == ConnectionStatus::Connected => {
                Some(entry.connected_at)
            }
            _ => None,
        }
    }

    pub async fn connected_ids(&self) -> HashSet<String> {
        let live = self.live.read().await;
        live.iter()
            .filter_map(|(id, state)| match state {
                LiveState::Live(entry) if entry.status == ConnectionStatus::Connected => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Flip a live entry to the error state after a post-connect driver
    /// failure. The connection stays registered but unusable until an
    /// explicit disconnect + reconnect.
    pub async fn mark_error(&self, id: &str) {
        let mut live = self.live.write().await;
        if let Some(LiveState::Live(entry)) = live.get_mut(id) {
            warn!(connection_id = %id, "Marking connection as errored");
            entry.status = ConnectionStatus::Error;
        }
    }

    /// Clone of the live client handle for `id`.
    pub async fn adapter(&self, id: &str) -> CoreResult<EngineClient> {
        let live = self.live.read().await;
        match live.get(id) {
            Some(LiveState::Live(entry)) if entry.status == ConnectionStatus::Connected => {
                Ok(entry.client.clone())
            }
            _ => Err(CoreError::not_connected(id)),
        }
    }

    /// Engine kind for `id`: live entry first, saved config otherwise.
    pub async fn engine_kind(&self, id: &str) -> CoreResult<EngineKind> {
        {
            let live = self.live.read().await;
            if let Some(LiveState::Live(entry)) = live.get(id) {
                return Ok(entry.engine);
            }
        }
        self.registry
            .get(id)
            .map(|c| c.engine)
            .ok_or_else(|| CoreError::not_found(id))
    }

    /// Flip the entry to `error` when a driver result indicates the
    /// connection is gone, so post-connect connectivity failures always
    /// surface in the live state.
    async fn flag_if_lost<T>(&self, id: &str, result: &CoreResult<T>) {
        if let Err(e) = result {
            if e.is_connection_loss() {
                self.mark_error(id).await;
            }
        }
    }

    // ---- adapter passthrough for the UI layer ----

    pub async fn list_databases(&self, id: &str) -> CoreResult<Vec<String>> {
        let result = self.adapter(id).await?.list_databases().await;
        self.flag_if_lost(id, &result).await;
        result
    }

    pub async fn list_tables(&self, id: &str, database: &str) -> CoreResult<Vec<TableInfo>> {
        let result = self.adapter(id).await?.list_tables(database).await;
        self.flag_if_lost(id, &result).await;
        result
    }

    pub async fn describe(
        &self,
        id: &str,
        database: &str,
        table: &str,
    ) -> CoreResult<Vec<ColumnInfo>> {
        let result = self.adapter(id).await?.describe(database, table).await;
        self.flag_if_lost(id, &result).await;
        result
    }

    pub async fn list_indexes(
        &self,
        id: &str,
        database: &str,
        table: &str,
    ) -> CoreResult<Vec<IndexInfo>> {
        let result = self.adapter(id).await?.list_indexes(database, table).await;
        self.flag_if_lost(id, &result).await;
        result
    }

    pub async fn page_rows(
        &self,
        id: &str,
        database: &str,
        table: &str,
        page: u32,
        page_size: u32,
    ) -> CoreResult<RowPage> {
        let result = self
            .adapter(id)
            .await?
            .page_rows(database, table, page, page_size)
            .await;
        self.flag_if_lost(id, &result).await;
        result
    }
}

/// Close a tunnel on a blocking thread; ssh2 teardown blocks on network I/O.
async fn close_tunnel(tunnel: Option<SshTunnel>) {
    if let Some(mut tunnel) = tunnel {
        let result = tokio::task::spawn_blocking(move || tunnel.close()).await;
        if let Err(e) = result {
            warn!(error = %e, "Tunnel close task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> (tempfile::TempDir, ConnectionManager) {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            ConnectionRegistry::load(dir.path().join("connections.json")).unwrap();
        let indexer = Arc::new(SchemaIndexer::new());
        let manager = ConnectionManager::new(registry, indexer, Duration::from_secs(5));
        (dir, manager)
    }

    fn mysql_config(id: &str) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(id, "local", EngineKind::Mysql);
        config.host = Some("127.0.0.1".to_string());
        config
    }

    #[tokio::test]
    async fn test_connect_unknown_id_is_not_found() {
        let (_dir, manager) = test_manager();
        assert!(matches!(
            manager.connect("ghost").await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_defaults_to_disconnected() {
        let (_dir, manager) = test_manager();
        assert_eq!(manager.status("ghost").await, ConnectionStatus::Disconnected);
        assert!(!manager.is_connected("ghost").await);
    }

    #[tokio::test]
    async fn test_disconnect_absent_is_noop() {
        let (_dir, manager) = test_manager();
        // Twice in a row, neither panics nor errors.
        manager.disconnect("ghost").await;
        manager.disconnect("ghost").await;
    }

    #[tokio::test]
    async fn test_adapter_requires_connection() {
        let (_dir, manager) = test_manager();
        manager.create_config(mysql_config("c1")).unwrap();
        assert!(matches!(
            manager.adapter("c1").await,
            Err(CoreError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_engine_kind_falls_back_to_registry() {
        let (_dir, manager) = test_manager();
        manager.create_config(mysql_config("c1")).unwrap();
        assert_eq!(manager.engine_kind("c1").await.unwrap(), EngineKind::Mysql);
        assert!(matches!(
            manager.engine_kind("ghost").await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_config_without_live_connection() {
        let (_dir, manager) = test_manager();
        manager.create_config(mysql_config("c1")).unwrap();
        manager.delete_config("c1").await.unwrap();
        assert!(manager.get_config("c1").is_none());
    }

    #[tokio::test]
    async fn test_test_does_not_register_live_connection() {
        let (_dir, manager) = test_manager();
        // Nothing listens on this port, so the probe fails - but it must
        // fail without leaving registry entries or live state behind.
        let mut config = mysql_config("probe");
        config.port = Some(1);
        let result = manager.test(&config).await;
        assert!(result.is_err());
        assert_eq!(manager.config_count(), 0);
        assert!(!manager.is_connected("probe").await);
    }

    #[tokio::test]
    async fn test_summaries_reflect_registry() {
        let (_dir, manager) = test_manager();
        let mut config = mysql_config("c1");
        config.password = Some("secret".to_string());
        manager.create_config(config).unwrap();

        let summaries = manager.list_summaries().await;
        assert_eq!(summaries.len(), 1);
        assert!(!summaries[0].connected);
        assert_ne!(summaries[0].password.as_deref(), Some("secret"));
    }
}
