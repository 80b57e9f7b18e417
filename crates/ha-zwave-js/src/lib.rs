//! Z-Wave JS integration
//!
//! Establishes and validates the connection to a Z-Wave JS server, and
//! optionally installs, configures and starts the managed add-on that hosts
//! it.
//!
//! # Key Types
//!
//! - [`ZwaveJs`] - Entry points for config and options flows
//! - [`ConfigFlow`] / [`OptionsFlow`] - The flow state machines
//! - [`VersionProbe`] - Reads the server's version and network identity
//! - [`AddonApi`] - Supervisor operations on the managed add-on

pub mod addon;
pub mod config;
pub mod consts;
pub mod error;
pub mod flow;
pub mod lifecycle;
pub mod usb;
pub mod version;

pub use addon::{
    AddonApi, AddonDiscoveryInfo, AddonInfo, AddonOptions, AddonState, AddonTask,
    SupervisorAddonClient,
};
pub use config::{FlowTimeouts, SupervisorConfig, ZwaveJsConfig};
pub use error::{AddonError, ConfigError, ConfigResult, ProbeError};
pub use flow::{
    ConfigFlow, ConfigureAddonInput, HassioServiceInfo, ManualInput, OnSupervisorInput,
    OptionsFlow, Step, ZwaveJsContext,
};
pub use lifecycle::ServerConnection;
pub use usb::UsbServiceInfo;
pub use version::{validate_input, VersionInfo, VersionProbe, WsVersionProbe};

use std::sync::Arc;

use ha_config_entries::{ConfigEntries, ConfigEntrySource, FlowError, FlowManager, FlowResult};
use tracing::debug;

/// Starts Z-Wave JS flows against a set of config entries
pub struct ZwaveJs {
    ctx: ZwaveJsContext,
    flow: FlowManager,
    options: FlowManager,
}

impl ZwaveJs {
    pub fn new(entries: Arc<ConfigEntries>, ctx: ZwaveJsContext) -> Self {
        Self {
            ctx,
            flow: FlowManager::config(entries.clone()),
            options: FlowManager::options(entries),
        }
    }

    pub fn context(&self) -> &ZwaveJsContext {
        &self.ctx
    }

    /// Config flow manager
    pub fn flow(&self) -> &FlowManager {
        &self.flow
    }

    /// Options flow manager
    pub fn options(&self) -> &FlowManager {
        &self.options
    }

    pub fn entries(&self) -> &Arc<ConfigEntries> {
        self.flow.entries()
    }

    /// Start a config flow from the user
    pub async fn start_user_flow(&self) -> Result<FlowResult, FlowError> {
        self.start(ConfigEntrySource::User, None).await
    }

    /// Start a config flow from a supervisor add-on discovery
    pub async fn start_hassio_flow(
        &self,
        info: &HassioServiceInfo,
    ) -> Result<FlowResult, FlowError> {
        let data = serde_json::to_value(info).map_err(|e| FlowError::InvalidInput {
            step: Step::Hassio.to_string(),
            message: e.to_string(),
        })?;
        self.start(ConfigEntrySource::Hassio, Some(data)).await
    }

    /// Start a config flow from a USB discovery
    pub async fn start_usb_flow(&self, info: &UsbServiceInfo) -> Result<FlowResult, FlowError> {
        let data = serde_json::to_value(info).map_err(|e| FlowError::InvalidInput {
            step: Step::Usb.to_string(),
            message: e.to_string(),
        })?;
        self.start(ConfigEntrySource::Usb, Some(data)).await
    }

    /// Start an options flow for an existing entry
    pub async fn start_options_flow(&self, entry_id: &str) -> Result<FlowResult, FlowError> {
        debug!("Starting Z-Wave JS options flow for {}", entry_id);
        self.options
            .init(
                Box::new(OptionsFlow::new(self.ctx.clone(), entry_id)),
                ConfigEntrySource::User,
                None,
            )
            .await
    }

    async fn start(
        &self,
        source: ConfigEntrySource,
        data: Option<serde_json::Value>,
    ) -> Result<FlowResult, FlowError> {
        debug!("Starting Z-Wave JS config flow from {}", source.as_str());
        self.flow
            .init(Box::new(ConfigFlow::new(self.ctx.clone())), source, data)
            .await
    }
}
