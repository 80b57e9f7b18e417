//! USB discovery rules
//!
//! Which serial adapters are Z-Wave sticks, which ones share a VID/PID with
//! Zigbee radios and must be skipped, and how a stick is named and keyed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory of stable symlinks to serial devices
const SERIAL_BY_ID_DIR: &str = "/dev/serial/by-id";

/// VID/PID pairs of known Z-Wave sticks
pub const ZWAVE_USB_IDS: &[(&str, &str)] = &[
    // Aeotec Z-Stick Gen5+, Z-Wave.Me UZB
    ("0658", "0200"),
    // Nortek HUSBZB-1 (Z-Wave and Zigbee in one stick)
    ("10C4", "8A2A"),
    // Aeotec Z-Stick 7 and other CP210x based sticks
    ("10C4", "EA60"),
];

/// A USB serial adapter reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbServiceInfo {
    pub device: String,
    pub vid: String,
    pub pid: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl UsbServiceInfo {
    fn description_lower(&self) -> String {
        self.description.as_deref().unwrap_or_default().to_lowercase()
    }

    /// Whether the VID/PID belongs to a known Z-Wave stick
    pub fn is_known_zwave_stick(&self) -> bool {
        ZWAVE_USB_IDS
            .iter()
            .any(|(vid, pid)| self.vid.eq_ignore_ascii_case(vid) && self.pid.eq_ignore_ascii_case(pid))
    }

    /// Adapters sharing a Z-Wave VID/PID that are actually something else
    pub fn is_denylisted(&self) -> bool {
        let description = self.description_lower();
        let is = |vid: &str, pid: &str| {
            self.vid.eq_ignore_ascii_case(vid) && self.pid.eq_ignore_ascii_case(pid)
        };

        // The Zigbee half of the HUSBZB-1
        (is("10C4", "8A2A") && !description.contains("z-wave"))
            // TI CC2652 Zigbee sticks on a CP210x bridge
            || (is("10C4", "EA60") && description.contains("2652"))
    }

    /// Unique id of a discovered stick
    pub fn unique_id(&self) -> String {
        format!(
            "{}:{}_{}_{}_{}",
            self.vid,
            self.pid,
            self.serial_number.as_deref().unwrap_or_default(),
            self.manufacturer.as_deref().unwrap_or_default(),
            self.description.as_deref().unwrap_or_default(),
        )
    }

    /// Name shown in the confirm form
    pub fn human_readable_name(&self) -> String {
        let mut name = format!(
            "{}, s/n: {}",
            self.device,
            self.serial_number.as_deref().unwrap_or("n/a")
        );
        if let Some(manufacturer) = self.manufacturer.as_deref().filter(|m| !m.is_empty()) {
            name.push_str(&format!(" - {}", manufacturer));
        }
        if !self.vid.is_empty() {
            name.push_str(&format!(" - {}:{}", self.vid, self.pid));
        }

        match self.description.as_deref().filter(|d| !d.is_empty()) {
            Some(description) => {
                let short: String = description.chars().take(26).collect();
                format!("{} - {}", short, name)
            }
            None => name,
        }
    }
}

/// Stable `/dev/serial/by-id` path for a device, or the device path itself
pub async fn serial_by_id(device: &str) -> String {
    serial_by_id_in(Path::new(SERIAL_BY_ID_DIR), device).await
}

async fn serial_by_id_in(by_id_dir: &Path, device: &str) -> String {
    let Ok(target) = tokio::fs::canonicalize(device).await else {
        return device.to_string();
    };
    let Ok(mut dir) = tokio::fs::read_dir(by_id_dir).await else {
        return device.to_string();
    };

    while let Ok(Some(link)) = dir.next_entry().await {
        let path: PathBuf = link.path();
        if let Ok(resolved) = tokio::fs::canonicalize(&path).await {
            if resolved == target {
                debug!("Resolved {} to {}", device, path.display());
                return path.to_string_lossy().into_owned();
            }
        }
    }
    device.to_string()
}
