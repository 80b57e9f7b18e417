//! Config Entries Manager
//!
//! Owns every persisted entry, the unique-id index used for duplicate
//! detection, and the connect/disconnect lifecycle of each entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState};
use crate::state_machine::InvalidTransition;
use crate::storage::{Storable, Storage, StorageError};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 5;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Connects and disconnects the client behind an entry.
///
/// Registered per domain; the manager drives it from `setup`/`unload`.
#[async_trait]
pub trait EntryLifecycle: Send + Sync {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), String>;

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String>;
}

/// Config Entries Manager
pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup/unload across entries
    setup_lock: Mutex<()>,

    lifecycles: DashMap<String, Arc<dyn EntryLifecycle>>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            lifecycles: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!("Loading {} config entries from storage", data.entries.len());
            for entry in data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> ConfigEntriesResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries.iter().map(|r| r.value().clone()).collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", data.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        self.entries.insert(entry.entry_id.clone(), entry.clone());
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.insert(
                (entry.domain.clone(), unique_id.clone()),
                entry.entry_id.clone(),
            );
        }
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// All entries of a domain, optionally without ignored discoveries
    pub fn get_by_domain(&self, domain: &str, include_ignore: bool) -> Vec<ConfigEntry> {
        self.entries
            .iter()
            .filter(|r| r.domain == domain)
            .filter(|r| include_ignore || r.source != ConfigEntrySource::Ignore)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Get entry by unique_id
    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add a new config entry, rejecting a duplicate unique_id
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    /// Merge `updates` over an entry's data.
    ///
    /// Returns the entry and whether anything changed; unchanged data is not
    /// written back to storage.
    pub async fn update_data(
        &self,
        entry_id: &str,
        updates: &HashMap<String, Value>,
    ) -> ConfigEntriesResult<(ConfigEntry, bool)> {
        let (entry, changed) = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            let changed = entry.merge_data(updates);
            (entry.clone(), changed)
        };

        if changed {
            self.save().await?;
            debug!("Updated config entry data: {}", entry_id);
        }
        Ok((entry, changed))
    }

    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    /// Register the lifecycle handler for a domain
    pub fn register_lifecycle(&self, domain: &str, lifecycle: Arc<dyn EntryLifecycle>) {
        self.lifecycles.insert(domain.to_string(), lifecycle);
        debug!("Registered lifecycle for domain: {}", domain);
    }

    fn lifecycle(&self, domain: &str) -> Option<Arc<dyn EntryLifecycle>> {
        self.lifecycles.get(domain).map(|r| r.value().clone())
    }

    /// Setup an entry (connect its client)
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.setup_locked(entry_id).await
    }

    async fn setup_locked(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let outcome = match self.lifecycle(&entry.domain) {
            Some(lifecycle) => lifecycle.setup_entry(&entry).await,
            None => {
                debug!("No lifecycle for domain {}, marking as loaded", entry.domain);
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(reason) => {
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    /// Unload an entry (disconnect its client).
    ///
    /// Unloading an entry that is not loaded does nothing.
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.unload_locked(entry_id).await
    }

    async fn unload_locked(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }
        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }

        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let outcome = match self.lifecycle(&entry.domain) {
            Some(lifecycle) => lifecycle.unload_entry(&entry).await,
            None => Ok(()),
        };

        match outcome {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(reason) => {
                warn!("Unload failed for entry {}: {}", entry_id, reason);
                self.set_state(entry_id, ConfigEntryState::FailedUnload, Some(reason))?;
                Err(ConfigEntriesError::CannotUnload(ConfigEntryState::FailedUnload))
            }
        }
    }

    /// Reload an entry (unload if loaded, then setup)
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;
        self.unload_locked(entry_id).await?;
        self.setup_locked(entry_id).await
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
