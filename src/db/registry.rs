//! Saved-connection registry.
//!
//! CRUD over [`ConnectionConfig`] with JSON file persistence. The registry
//! stores secrets verbatim (round-trip fidelity is part of the contract) and
//! only the summary views mask them. Writes go through a temp file and
//! rename so a crash cannot truncate the saved set.

use crate::error::{CoreError, CoreResult};
use crate::models::{ConnectionConfig, ConnectionSummary};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

pub struct ConnectionRegistry {
    path: PathBuf,
    configs: Mutex<Vec<ConnectionConfig>>,
}

impl ConnectionRegistry {
    /// Load the registry from `path`, starting empty when the file does not
    /// exist yet.
    pub fn load(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let configs = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| CoreError::storage(format!("Failed to read {}: {}", path.display(), e)))?;
            serde_json::from_str(&raw).map_err(|e| {
                CoreError::storage(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            Vec::new()
        };

        info!(
            path = %path.display(),
            count = configs.len(),
            "Loaded connection registry"
        );

        Ok(Self {
            path,
            configs: Mutex::new(configs),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ConnectionConfig>> {
        self.configs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn list(&self) -> Vec<ConnectionConfig> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<ConnectionConfig> {
        self.lock().iter().find(|c| c.id == id).cloned()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().iter().any(|c| c.id == id)
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Save a new config, generating a short id when none is supplied.
    pub fn create(&self, mut config: ConnectionConfig) -> CoreResult<ConnectionConfig> {
        if config.id.is_empty() {
            config.id = generate_id();
        }
        config
            .validate()
            .map_err(CoreError::invalid_input)?;

        let mut configs = self.lock();
        if configs.iter().any(|c| c.id == config.id) {
            return Err(CoreError::invalid_input(format!(
                "Connection '{}' already exists",
                config.id
            )));
        }
        configs.push(config.clone());
        self.persist(&configs)?;
        debug!(id = %config.id, "Connection config created");
        Ok(config)
    }

    /// Update an existing config. The engine kind is immutable; an update
    /// that changes it is rejected.
    pub fn update(&self, mut config: ConnectionConfig) -> CoreResult<ConnectionConfig> {
        config
            .validate()
            .map_err(CoreError::invalid_input)?;

        let mut configs = self.lock();
        let existing = configs
            .iter_mut()
            .find(|c| c.id == config.id)
            .ok_or_else(|| CoreError::not_found(&config.id))?;

        if existing.engine != config.engine {
            return Err(CoreError::invalid_input(format!(
                "Engine kind of '{}' cannot be changed after creation",
                config.id
            )));
        }

        config.created_at = existing.created_at;
        *existing = config.clone();
        self.persist(&configs)?;
        debug!(id = %config.id, "Connection config updated");
        Ok(config)
    }

    pub fn delete(&self, id: &str) -> CoreResult<()> {
        let mut configs = self.lock();
        let before = configs.len();
        configs.retain(|c| c.id != id);
        if configs.len() == before {
            return Err(CoreError::not_found(id));
        }
        self.persist(&configs)?;
        debug!(id = %id, "Connection config deleted");
        Ok(())
    }

    /// Secret-free views with live status, for the UI layer.
    pub fn summaries(&self, connected: &HashSet<String>) -> Vec<ConnectionSummary> {
        self.lock()
            .iter()
            .map(|c| c.summary(connected.contains(&c.id)))
            .collect()
    }

    fn persist(&self, configs: &[ConnectionConfig]) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CoreError::storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let raw = serde_json::to_string_pretty(configs)
            .map_err(|e| CoreError::storage(format!("Failed to encode registry: {}", e)))?;

        let tmp = temp_path(&self.path);
        fs::write(&tmp, raw)
            .map_err(|e| CoreError::storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            CoreError::storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

/// Short random id in the style the UI already uses (12 hex chars).
fn generate_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
