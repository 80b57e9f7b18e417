//! Connection lifecycle of a Z-Wave JS entry
//!
//! Setting up an entry verifies that its server answers a version probe;
//! unloading forgets the connection.

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::{ConfigEntry, EntryLifecycle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::consts::CONF_URL;
use crate::version::{get_version_info, VersionInfo, VersionProbe};

/// [`EntryLifecycle`] that connects an entry by probing its server
pub struct ServerConnection {
    probe: Arc<dyn VersionProbe>,
    timeout: Duration,
    /// Version info of each connected entry
    connected: DashMap<String, VersionInfo>,
}

impl ServerConnection {
    pub fn new(probe: Arc<dyn VersionProbe>, timeout: Duration) -> Self {
        Self {
            probe,
            timeout,
            connected: DashMap::new(),
        }
    }

    /// Version info of a connected entry
    pub fn version_info(&self, entry_id: &str) -> Option<VersionInfo> {
        self.connected.get(entry_id).map(|r| r.value().clone())
    }
}

#[async_trait]
impl EntryLifecycle for ServerConnection {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        let url = entry
            .data_str(CONF_URL)
            .ok_or_else(|| format!("entry {} has no {}", entry.entry_id, CONF_URL))?;
        let info = get_version_info(self.probe.as_ref(), url, self.timeout)
            .await
            .map_err(|e| e.to_string())?;

        info!(
            "Connected to Z-Wave JS server {} (driver {}, home id {})",
            info.server_version, info.driver_version, info.home_id
        );
        self.connected.insert(entry.entry_id.clone(), info);
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        if self.connected.remove(&entry.entry_id).is_some() {
            debug!("Disconnected entry {}", entry.entry_id);
        }
        Ok(())
    }
}
