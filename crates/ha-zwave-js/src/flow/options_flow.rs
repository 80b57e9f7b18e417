//! Options flow: reconfigures an existing Z-Wave JS entry
//!
//! Changing add-on options may restart the add-on the entry is connected
//! to. The live connection is dropped at most once before that restart and
//! the entry is reloaded exactly once when the flow ends, whatever the
//! outcome. If the reconfigured add-on turns out to be unreachable or to
//! control a different network, the original add-on options are written
//! back and the add-on restarted before the flow aborts.

use async_trait::async_trait;
use ha_config_entries::{
    ConfigEntriesError, ConfigEntry, ConfigEntrySource, FlowError, FlowHandler, FlowResult,
    FlowScope, FormField,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::{
    data_updates, parse_input, AddonFlowState, ConfigureAddonInput, ManualInput,
    OnSupervisorInput, Step, Transition, ZwaveJsContext,
};
use crate::addon::{AddonOptions, AddonState};
use crate::consts::{
    reason, CONF_EMULATE_HARDWARE, CONF_INTEGRATION_CREATED_ADDON, CONF_LOG_LEVEL,
    CONF_NETWORK_KEY, CONF_URL, CONF_USB_PATH, CONF_USE_ADDON, DEFAULT_LOG_LEVEL, DOMAIN, TITLE,
};
use crate::error::ProbeError;
use crate::version::validate_input;

/// Flow that reconfigures the Z-Wave JS entry `entry_id`
pub struct OptionsFlow {
    entry_id: String,
    state: AddonFlowState,
    /// Add-on options before this flow changed them
    original_addon_options: Option<AddonOptions>,
    /// Set while the original options are being restored
    revert_reason: Option<String>,
}

impl OptionsFlow {
    pub fn new(ctx: ZwaveJsContext, entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            state: AddonFlowState::new(ctx),
            original_addon_options: None,
            revert_reason: None,
        }
    }

    fn entry(&self, scope: &FlowScope<'_>) -> Result<ConfigEntry, FlowError> {
        scope
            .entries()
            .get(&self.entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(self.entry_id.clone()).into())
    }

    async fn run_step(
        &mut self,
        step: Step,
        input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        match step {
            Step::Init => Ok(self.step_init()),
            Step::Manual => self.step_manual(input, scope).await,
            Step::OnSupervisor => self.step_on_supervisor(input, scope).await,
            Step::InstallAddon => self.state.step_install_addon(),
            Step::InstallFailed => Err(FlowError::abort(reason::ADDON_INSTALL_FAILED)),
            Step::ConfigureAddon => self.step_configure_addon(input, scope).await,
            Step::StartAddon => self.state.step_start_addon(),
            Step::StartFailed => self.revert(reason::ADDON_START_FAILED, scope).await,
            Step::FinishAddonSetup => self.step_finish_addon_setup(scope).await,
            Step::User
            | Step::Hassio
            | Step::HassioConfirm
            | Step::Usb
            | Step::UsbConfirm => Err(FlowError::UnknownStep(step.to_string())),
        }
    }

    fn step_init(&self) -> Transition {
        if self.state.ctx.is_hassio() {
            Transition::Goto(Step::OnSupervisor, None)
        } else {
            Transition::Goto(Step::Manual, None)
        }
    }

    async fn step_manual(
        &mut self,
        input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        let entry = self.entry(scope)?;
        let Some(input) = input else {
            let url = entry.data_str(CONF_URL).unwrap_or_default();
            return Ok(Transition::Show(manual_form(url)));
        };
        let input: ManualInput = parse_input(Step::Manual, input)?;

        let version_info = match validate_input(
            self.state.ctx.probe.as_ref(),
            &input.url,
            self.state.ctx.timeouts.server_version,
        )
        .await
        {
            Ok(info) => info,
            Err(err) => {
                if let ProbeError::Unknown(_) = err {
                    error!("Unexpected exception probing {}: {}", input.url, err);
                }
                return Ok(Transition::Show(
                    manual_form(&input.url).with_base_error(err.code()),
                ));
            }
        };

        if entry.unique_id.as_deref() != Some(version_info.unique_id().as_str()) {
            warn!(
                "Server at {} controls network {}, entry is for {:?}",
                input.url, version_info.home_id, entry.unique_id
            );
            return Err(FlowError::abort(reason::DIFFERENT_DEVICE));
        }

        scope
            .entries()
            .update_data(
                &self.entry_id,
                &data_updates([
                    (CONF_URL, json!(input.url)),
                    (CONF_USB_PATH, Value::Null),
                    (CONF_NETWORK_KEY, Value::Null),
                    (CONF_USE_ADDON, json!(false)),
                    (CONF_INTEGRATION_CREATED_ADDON, json!(false)),
                ]),
            )
            .await?;
        Ok(Transition::Show(FlowResult::create_entry(TITLE, json!({}))))
    }

    async fn step_on_supervisor(
        &mut self,
        input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        let Some(input) = input else {
            let use_addon = self.entry(scope)?.data_bool(CONF_USE_ADDON);
            return Ok(Transition::Show(FlowResult::form(
                Step::OnSupervisor.as_str(),
                vec![FormField::optional(CONF_USE_ADDON, "boolean").with_default(use_addon)],
            )));
        };
        let input: OnSupervisorInput = parse_input(Step::OnSupervisor, input)?;
        if !input.use_addon {
            return Ok(Transition::Goto(Step::Manual, None));
        }

        self.state.use_addon = true;
        let info = self.state.addon_info().await?;
        let next = match info.state {
            AddonState::NotInstalled => Step::InstallAddon,
            AddonState::NotRunning | AddonState::Running => Step::ConfigureAddon,
        };
        Ok(Transition::Goto(next, None))
    }

    async fn step_configure_addon(
        &mut self,
        input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        let info = self.state.addon_info().await?;
        let current = info.options;

        let Some(input) = input else {
            return Ok(Transition::Show(configure_addon_form(&current)));
        };
        let input: ConfigureAddonInput = parse_input(Step::ConfigureAddon, input)?;
        let usb_path = input.usb_path.ok_or_else(|| FlowError::InvalidInput {
            step: Step::ConfigureAddon.to_string(),
            message: format!("{} is required", CONF_USB_PATH),
        })?;

        self.state.usb_path = Some(usb_path);
        self.state.network_key = input.network_key.or_else(|| current.network_key.clone());

        let mut new_options = current.clone();
        new_options.device = self.state.usb_path.clone();
        new_options.network_key = self.state.network_key.clone();
        new_options.log_level = Some(
            input
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        );
        new_options.emulate_hardware = Some(input.emulate_hardware.unwrap_or(false));

        if new_options != current {
            if info.state == AddonState::Running {
                self.state.restart_addon = true;
            }
            self.original_addon_options = Some(current);
            self.state.set_addon_options(&new_options).await?;
        }

        self.after_configure(info.state, scope).await
    }

    /// Continue once the add-on options are written
    async fn after_configure(
        &mut self,
        addon_state: AddonState,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        if addon_state == AddonState::Running && !self.state.restart_addon {
            return Ok(Transition::Goto(Step::FinishAddonSetup, None));
        }

        let entry = self.entry(scope)?;
        if entry.data_bool(CONF_USE_ADDON) && entry.is_loaded() {
            info!("Disconnecting from Z-Wave JS before the add-on restarts");
            if let Err(err) = scope.entries().unload(&self.entry_id).await {
                warn!("Unloading entry {} failed: {}", self.entry_id, err);
            }
        }
        Ok(Transition::Goto(Step::StartAddon, None))
    }

    async fn step_finish_addon_setup(
        &mut self,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        if let Some(reason) = self.revert_reason.take() {
            self.original_addon_options = None;
            return Err(FlowError::abort(&reason));
        }

        let ws_address = match self.state.ws_address.clone() {
            Some(address) => address,
            None => self.state.discovery_address().await?,
        };
        self.state.ws_address = Some(ws_address.clone());

        let version_info = match self.state.version_info.clone() {
            Some(info) => info,
            None => match self.state.probe(&ws_address).await {
                Ok(info) => info,
                Err(err) => {
                    warn!("Cannot reach Z-Wave JS add-on at {}: {}", ws_address, err);
                    return self.revert(reason::CANNOT_CONNECT, scope).await;
                }
            },
        };
        self.state.version_info = Some(version_info.clone());

        let entry = self.entry(scope)?;
        if entry.unique_id.as_deref() != Some(version_info.unique_id().as_str()) {
            warn!(
                "Add-on controls network {}, entry is for {:?}",
                version_info.home_id, entry.unique_id
            );
            return self.revert(reason::DIFFERENT_DEVICE, scope).await;
        }

        scope
            .entries()
            .update_data(
                &self.entry_id,
                &data_updates([
                    (CONF_URL, json!(ws_address)),
                    (CONF_USB_PATH, json!(self.state.usb_path)),
                    (CONF_NETWORK_KEY, json!(self.state.network_key)),
                    (CONF_USE_ADDON, json!(true)),
                    (
                        CONF_INTEGRATION_CREATED_ADDON,
                        json!(self.state.integration_created_addon),
                    ),
                ]),
            )
            .await?;
        Ok(Transition::Show(FlowResult::create_entry(TITLE, json!({}))))
    }

    /// Restore the original add-on options, then abort with `reason`.
    ///
    /// Aborts right away when nothing was changed or a revert is already
    /// running.
    async fn revert(
        &mut self,
        reason: &str,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        if self.revert_reason.is_some() {
            error!(
                "Failed to revert add-on options before aborting flow, reason: {}",
                reason
            );
            return Err(FlowError::abort(reason));
        }
        let Some(original) = self.original_addon_options.take() else {
            return Err(FlowError::abort(reason));
        };

        debug!("Reverting add-on options, reason: {}", reason);
        self.revert_reason = Some(reason.to_string());

        let info = self.state.addon_info().await?;
        self.state.usb_path = original.device.clone();
        self.state.network_key = original.network_key.clone();
        if original != info.options {
            if info.state == AddonState::Running {
                self.state.restart_addon = true;
            }
            self.state.set_addon_options(&original).await?;
        }

        self.after_configure(info.state, scope).await
    }

    async fn reload_entry(&self, scope: &FlowScope<'_>) {
        if let Err(err) = scope.entries().reload(&self.entry_id).await {
            warn!("Reloading entry {} failed: {}", self.entry_id, err);
        }
    }
}

fn manual_form(default_url: &str) -> FlowResult {
    FlowResult::form(
        Step::Manual.as_str(),
        vec![FormField::required(CONF_URL, "string").with_default(default_url)],
    )
}

fn configure_addon_form(current: &AddonOptions) -> FlowResult {
    FlowResult::form(
        Step::ConfigureAddon.as_str(),
        vec![
            FormField::required(CONF_USB_PATH, "string")
                .with_default(current.device().unwrap_or_default()),
            FormField::optional(CONF_NETWORK_KEY, "string")
                .with_default(current.network_key().unwrap_or_default()),
            FormField::optional(CONF_LOG_LEVEL, "select").with_default(
                current
                    .log_level
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            ),
            FormField::optional(CONF_EMULATE_HARDWARE, "boolean")
                .with_default(current.emulate_hardware.unwrap_or(false)),
        ],
    )
}

#[async_trait]
impl FlowHandler for OptionsFlow {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn initial_step(&self, _source: ConfigEntrySource) -> String {
        Step::Init.to_string()
    }

    async fn step(
        &mut self,
        step_id: &str,
        user_input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<FlowResult, FlowError> {
        let mut step: Step = step_id.parse()?;
        let mut input = user_input;
        let outcome = loop {
            debug!("Z-Wave JS options flow {} at step {}", scope.flow_id(), step);
            match self.run_step(step, input, scope).await {
                Ok(Transition::Show(result)) => break Ok(result),
                Ok(Transition::Goto(next, next_input)) => {
                    step = next;
                    input = next_input;
                }
                Err(err) => break Err(err),
            }
        };

        let finished = match &outcome {
            Ok(result) => result.is_terminal(),
            Err(FlowError::Abort { .. }) => true,
            Err(_) => false,
        };
        if finished {
            self.reload_entry(scope).await;
        }
        outcome
    }

    async fn wait_for_background(&mut self) {
        self.state.wait_for_tasks().await;
    }
}
