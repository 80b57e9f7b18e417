//! Z-Wave JS config and options flows
//!
//! Both flows are explicit state machines over [`Step`]. A step either shows
//! a result to the caller or hands over to another step with optional input;
//! the handler loops until something is shown. Add-on install and start run
//! as background [`AddonTask`]s polled by their progress steps.

mod config_flow;
mod options_flow;

pub use config_flow::{ConfigFlow, HassioServiceInfo};
pub use options_flow::OptionsFlow;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ha_config_entries::{FlowError, FlowResult};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::addon::{AddonApi, AddonInfo, AddonOptions, AddonTask};
use crate::config::FlowTimeouts;
use crate::consts::reason;
use crate::error::{AddonError, ProbeError};
use crate::version::{get_version_info, VersionInfo, VersionProbe};

/// Collaborators shared by every flow
#[derive(Clone)]
pub struct ZwaveJsContext {
    /// Present only when running under a supervisor
    pub addon: Option<Arc<dyn AddonApi>>,
    pub probe: Arc<dyn VersionProbe>,
    pub timeouts: FlowTimeouts,
}

impl ZwaveJsContext {
    pub fn new(probe: Arc<dyn VersionProbe>) -> Self {
        Self {
            addon: None,
            probe,
            timeouts: FlowTimeouts::default(),
        }
    }

    pub fn with_addon(mut self, addon: Arc<dyn AddonApi>) -> Self {
        self.addon = Some(addon);
        self
    }

    pub fn with_timeouts(mut self, timeouts: FlowTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Whether a supervisor manages add-ons on this host
    pub fn is_hassio(&self) -> bool {
        self.addon.is_some()
    }
}

/// Steps of the config and options flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    User,
    Hassio,
    HassioConfirm,
    Usb,
    UsbConfirm,
    OnSupervisor,
    InstallAddon,
    InstallFailed,
    ConfigureAddon,
    StartAddon,
    StartFailed,
    FinishAddonSetup,
    Manual,
    Init,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::User => "user",
            Step::Hassio => "hassio",
            Step::HassioConfirm => "hassio_confirm",
            Step::Usb => "usb",
            Step::UsbConfirm => "usb_confirm",
            Step::OnSupervisor => "on_supervisor",
            Step::InstallAddon => "install_addon",
            Step::InstallFailed => "install_failed",
            Step::ConfigureAddon => "configure_addon",
            Step::StartAddon => "start_addon",
            Step::StartFailed => "start_failed",
            Step::FinishAddonSetup => "finish_addon_setup",
            Step::Manual => "manual",
            Step::Init => "init",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let step = match s {
            "user" => Step::User,
            "hassio" => Step::Hassio,
            "hassio_confirm" => Step::HassioConfirm,
            "usb" => Step::Usb,
            "usb_confirm" => Step::UsbConfirm,
            "on_supervisor" => Step::OnSupervisor,
            "install_addon" => Step::InstallAddon,
            "install_failed" => Step::InstallFailed,
            "configure_addon" => Step::ConfigureAddon,
            "start_addon" => Step::StartAddon,
            "start_failed" => Step::StartFailed,
            "finish_addon_setup" => Step::FinishAddonSetup,
            "manual" => Step::Manual,
            "init" => Step::Init,
            other => return Err(FlowError::UnknownStep(other.to_string())),
        };
        Ok(step)
    }
}

/// Input of the `manual` step
#[derive(Debug, Clone, Deserialize)]
pub struct ManualInput {
    pub url: String,
}

/// Input of the `on_supervisor` step
#[derive(Debug, Clone, Deserialize)]
pub struct OnSupervisorInput {
    #[serde(default = "default_true")]
    pub use_addon: bool,
}

fn default_true() -> bool {
    true
}

/// Input of the `configure_addon` step.
///
/// `usb_path` is required except for USB discovery; `log_level` and
/// `emulate_hardware` are only read by the options flow, defaulting to
/// `info` and `false`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigureAddonInput {
    #[serde(default)]
    pub usb_path: Option<String>,
    #[serde(default)]
    pub network_key: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub emulate_hardware: Option<bool>,
}

/// Outcome of running one step
pub(crate) enum Transition {
    /// Hand this result to the caller
    Show(FlowResult),
    /// Continue with another step
    Goto(Step, Option<Value>),
}

pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(
    step: Step,
    input: Value,
) -> Result<T, FlowError> {
    FlowError::parse_input(step.as_str(), input)
}

pub(crate) fn required_input(step: Step, input: Option<Value>) -> Result<Value, FlowError> {
    input.ok_or_else(|| FlowError::InvalidInput {
        step: step.to_string(),
        message: "missing input".to_string(),
    })
}

pub(crate) fn data_updates<const N: usize>(pairs: [(&str, Value); N]) -> HashMap<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Abort reason for a probe that failed outside a form
pub(crate) fn probe_abort_reason(err: &ProbeError) -> &'static str {
    match err {
        ProbeError::Unknown(_) => reason::UNKNOWN,
        _ => reason::CANNOT_CONNECT,
    }
}

/// Where a started add-on can be reached
#[derive(Debug)]
pub(crate) struct StartedAddon {
    ws_address: String,
    version_info: VersionInfo,
}

/// State accumulated by a flow, plus the add-on steps both flows share
pub(crate) struct AddonFlowState {
    pub ctx: ZwaveJsContext,
    pub ws_address: Option<String>,
    pub usb_path: Option<String>,
    pub network_key: Option<String>,
    pub use_addon: bool,
    pub integration_created_addon: bool,
    pub restart_addon: bool,
    pub version_info: Option<VersionInfo>,
    install_task: Option<AddonTask<Result<(), AddonError>>>,
    start_task: Option<AddonTask<Result<StartedAddon, AddonError>>>,
}

impl AddonFlowState {
    pub fn new(ctx: ZwaveJsContext) -> Self {
        Self {
            ctx,
            ws_address: None,
            usb_path: None,
            network_key: None,
            use_addon: false,
            integration_created_addon: false,
            restart_addon: false,
            version_info: None,
            install_task: None,
            start_task: None,
        }
    }

    fn addon(&self) -> Result<Arc<dyn AddonApi>, FlowError> {
        self.ctx
            .addon
            .clone()
            .ok_or_else(|| FlowError::abort(reason::DISCOVERY_REQUIRES_SUPERVISOR))
    }

    pub async fn probe(&self, url: &str) -> Result<VersionInfo, ProbeError> {
        get_version_info(self.ctx.probe.as_ref(), url, self.ctx.timeouts.server_version).await
    }

    pub async fn addon_info(&self) -> Result<AddonInfo, FlowError> {
        let info = self.addon()?.addon_info().await.map_err(|err| {
            error!("Failed to get Z-Wave JS add-on info: {}", err);
            FlowError::abort(reason::ADDON_INFO_FAILED)
        })?;
        debug!("Add-on info: {:?}", info);
        Ok(info)
    }

    pub async fn set_addon_options(&self, options: &AddonOptions) -> Result<(), FlowError> {
        self.addon()?.set_options(options).await.map_err(|err| {
            error!("Failed to set Z-Wave JS add-on config: {}", err);
            FlowError::abort(reason::ADDON_SET_CONFIG_FAILED)
        })
    }

    /// Websocket address published by the add-on
    pub async fn discovery_address(&self) -> Result<String, FlowError> {
        let info = self.addon()?.discovery_info().await.map_err(|err| {
            error!("Failed to get Z-Wave JS add-on discovery info: {}", err);
            FlowError::abort(reason::ADDON_GET_DISCOVERY_INFO_FAILED)
        })?;
        Ok(info.ws_address())
    }

    /// Install the add-on in the background and report progress
    pub fn step_install_addon(&mut self) -> Result<Transition, FlowError> {
        let progress = FlowResult::progress(Step::InstallAddon.as_str(), "install_addon");

        let Some(task) = self.install_task.as_mut() else {
            let addon = self.addon()?;
            self.install_task = Some(AddonTask::spawn(async move { addon.install().await }));
            return Ok(Transition::Show(progress));
        };
        let Some(outcome) = task.poll_result() else {
            return Ok(Transition::Show(progress));
        };
        self.install_task = None;

        let next = match flatten(outcome) {
            Ok(()) => {
                self.integration_created_addon = true;
                Step::ConfigureAddon
            }
            Err(err) => {
                error!("Failed to install Z-Wave JS add-on: {}", err);
                Step::InstallFailed
            }
        };
        Ok(Transition::Show(FlowResult::progress_done(next.as_str())))
    }

    /// Start (or restart) the add-on in the background and wait for its
    /// server to answer a probe
    pub fn step_start_addon(&mut self) -> Result<Transition, FlowError> {
        let progress = FlowResult::progress(Step::StartAddon.as_str(), "start_addon");

        let Some(task) = self.start_task.as_mut() else {
            let addon = self.addon()?;
            self.start_task = Some(AddonTask::spawn(start_addon(
                addon,
                self.ctx.probe.clone(),
                self.ctx.timeouts,
                self.restart_addon,
                self.ws_address.clone(),
            )));
            return Ok(Transition::Show(progress));
        };
        let Some(outcome) = task.poll_result() else {
            return Ok(Transition::Show(progress));
        };
        self.start_task = None;

        let next = match flatten(outcome) {
            Ok(started) => {
                self.ws_address = Some(started.ws_address);
                self.version_info = Some(started.version_info);
                Step::FinishAddonSetup
            }
            Err(err) => {
                error!("Failed to start Z-Wave JS add-on: {}", err);
                Step::StartFailed
            }
        };
        Ok(Transition::Show(FlowResult::progress_done(next.as_str())))
    }

    /// Wait for whichever add-on task is running
    pub async fn wait_for_tasks(&mut self) {
        if let Some(task) = self.install_task.as_mut() {
            task.wait().await;
        }
        if let Some(task) = self.start_task.as_mut() {
            task.wait().await;
        }
    }
}

fn flatten<T>(outcome: Result<Result<T, AddonError>, tokio::task::JoinError>) -> Result<T, AddonError> {
    outcome.map_err(|e| AddonError::TaskFailed(e.to_string()))?
}

async fn start_addon(
    addon: Arc<dyn AddonApi>,
    probe: Arc<dyn VersionProbe>,
    timeouts: FlowTimeouts,
    restart: bool,
    mut ws_address: Option<String>,
) -> Result<StartedAddon, AddonError> {
    if restart {
        addon.restart().await?;
    } else {
        addon.start().await?;
    }

    for round in 1..=timeouts.addon_setup_rounds {
        tokio::time::sleep(timeouts.addon_setup).await;

        let address = match ws_address.clone() {
            Some(address) => address,
            None => match addon.discovery_info().await {
                Ok(info) => {
                    let address = info.ws_address();
                    ws_address = Some(address.clone());
                    address
                }
                Err(err) => {
                    debug!("Add-on discovery info not ready (round {}): {}", round, err);
                    continue;
                }
            },
        };

        match get_version_info(probe.as_ref(), &address, timeouts.server_version).await {
            Ok(version_info) => {
                return Ok(StartedAddon {
                    ws_address: address,
                    version_info,
                })
            }
            Err(err) => debug!("Add-on server not ready (round {}): {}", round, err),
        }
    }

    warn!(
        "Z-Wave JS add-on did not come up within {} rounds",
        timeouts.addon_setup_rounds
    );
    Err(AddonError::SetupTimeout {
        rounds: timeouts.addon_setup_rounds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names_round_trip() {
        for step in [
            Step::User,
            Step::Hassio,
            Step::HassioConfirm,
            Step::Usb,
            Step::UsbConfirm,
            Step::OnSupervisor,
            Step::InstallAddon,
            Step::InstallFailed,
            Step::ConfigureAddon,
            Step::StartAddon,
            Step::StartFailed,
            Step::FinishAddonSetup,
            Step::Manual,
            Step::Init,
        ] {
            assert_eq!(step.as_str().parse::<Step>().unwrap(), step);
        }
    }

    #[test]
    fn test_unknown_step_rejected() {
        let err = "reticulate_splines".parse::<Step>().unwrap_err();
        assert!(matches!(err, FlowError::UnknownStep(ref s) if s == "reticulate_splines"));
    }

    #[test]
    fn test_on_supervisor_defaults_to_addon() {
        let input: OnSupervisorInput = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(input.use_addon);
    }

    #[test]
    fn test_probe_abort_reason() {
        assert_eq!(
            probe_abort_reason(&ProbeError::CannotConnect("timeout".into())),
            "cannot_connect"
        );
        assert_eq!(probe_abort_reason(&ProbeError::Unknown("boom".into())), "unknown");
    }
}
