//! Constants for the Z-Wave JS integration

use std::time::Duration;

pub const DOMAIN: &str = "zwave_js";
pub const TITLE: &str = "Z-Wave JS";

/// Supervisor slug of the managed add-on
pub const ADDON_SLUG: &str = "core_zwave_js";

// Connection record keys
pub const CONF_URL: &str = "url";
pub const CONF_USB_PATH: &str = "usb_path";
pub const CONF_NETWORK_KEY: &str = "network_key";
pub const CONF_USE_ADDON: &str = "use_addon";
pub const CONF_INTEGRATION_CREATED_ADDON: &str = "integration_created_addon";

// Options flow form keys
pub const CONF_LOG_LEVEL: &str = "log_level";
pub const CONF_EMULATE_HARDWARE: &str = "emulate_hardware";

pub const DEFAULT_URL: &str = "ws://localhost:3000";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const SERVER_VERSION_TIMEOUT: Duration = Duration::from_secs(10);
pub const ADDON_SETUP_TIMEOUT: Duration = Duration::from_secs(5);
pub const ADDON_SETUP_TIMEOUT_ROUNDS: u32 = 4;

/// Stable abort reasons and form error codes
pub mod reason {
    pub use ha_config_entries::{ALREADY_CONFIGURED, ALREADY_IN_PROGRESS};

    pub const ADDON_INFO_FAILED: &str = "addon_info_failed";
    pub const ADDON_INSTALL_FAILED: &str = "addon_install_failed";
    pub const ADDON_SET_CONFIG_FAILED: &str = "addon_set_config_failed";
    pub const ADDON_START_FAILED: &str = "addon_start_failed";
    pub const ADDON_GET_DISCOVERY_INFO_FAILED: &str = "addon_get_discovery_info_failed";
    pub const CANNOT_CONNECT: &str = "cannot_connect";
    pub const DIFFERENT_DEVICE: &str = "different_device";
    pub const DISCOVERY_REQUIRES_SUPERVISOR: &str = "discovery_requires_supervisor";
    pub const INVALID_WS_URL: &str = "invalid_ws_url";
    pub const NOT_ZWAVE_DEVICE: &str = "not_zwave_device";
    pub const UNKNOWN: &str = "unknown";
}
