//! Config flow: creates the Z-Wave JS connection entry

use async_trait::async_trait;
use std::collections::HashMap;
use ha_config_entries::{
    ConfigEntrySource, FlowError, FlowHandler, FlowResult, FlowScope, FormField,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::{
    data_updates, parse_input, probe_abort_reason, required_input, AddonFlowState,
    ConfigureAddonInput, ManualInput, OnSupervisorInput, Step, Transition, ZwaveJsContext,
};
use crate::addon::AddonState;
use crate::consts::{
    reason, CONF_INTEGRATION_CREATED_ADDON, CONF_NETWORK_KEY, CONF_URL, CONF_USB_PATH,
    CONF_USE_ADDON, DEFAULT_URL, DOMAIN, TITLE,
};
use crate::error::ProbeError;
use crate::usb::{serial_by_id, UsbServiceInfo};
use crate::version::validate_input;

/// Discovery info pushed by the supervisor for the add-on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HassioServiceInfo {
    /// Add-on name
    #[serde(default)]
    pub addon: Option<String>,
    pub host: String,
    pub port: u16,
}

impl HassioServiceInfo {
    pub fn ws_address(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Flow that creates the Z-Wave JS entry
pub struct ConfigFlow {
    state: AddonFlowState,
    /// Device name shown when confirming a USB discovery
    usb_title: Option<String>,
}

impl ConfigFlow {
    pub fn new(ctx: ZwaveJsContext) -> Self {
        Self {
            state: AddonFlowState::new(ctx),
            usb_title: None,
        }
    }

    async fn run_step(
        &mut self,
        step: Step,
        input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        match step {
            Step::User => Ok(self.step_user()),
            Step::Hassio => self.step_hassio(input, scope).await,
            Step::HassioConfirm => Ok(self.step_hassio_confirm(input)),
            Step::Usb => self.step_usb(input, scope).await,
            Step::UsbConfirm => Ok(self.step_usb_confirm(input)),
            Step::OnSupervisor => self.step_on_supervisor(input).await,
            Step::InstallAddon => self.state.step_install_addon(),
            Step::InstallFailed => Err(FlowError::abort(reason::ADDON_INSTALL_FAILED)),
            Step::ConfigureAddon => self.step_configure_addon(input, scope).await,
            Step::StartAddon => self.state.step_start_addon(),
            Step::StartFailed => Err(FlowError::abort(reason::ADDON_START_FAILED)),
            Step::FinishAddonSetup => self.step_finish_addon_setup(scope).await,
            Step::Manual => self.step_manual(input, scope).await,
            Step::Init => Err(FlowError::UnknownStep(step.to_string())),
        }
    }

    fn step_user(&self) -> Transition {
        if self.state.ctx.is_hassio() {
            Transition::Goto(Step::OnSupervisor, None)
        } else {
            Transition::Goto(Step::Manual, None)
        }
    }

    async fn step_hassio(
        &mut self,
        input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        let info: HassioServiceInfo = parse_input(Step::Hassio, required_input(Step::Hassio, input)?)?;
        scope.claim_discovery()?;

        let ws_address = info.ws_address();
        let version_info = self.state.probe(&ws_address).await.map_err(|err| {
            warn!("Cannot reach discovered Z-Wave JS server at {}: {}", ws_address, err);
            FlowError::abort(probe_abort_reason(&err))
        })?;

        scope.set_unique_id(&version_info.unique_id(), true)?;
        scope
            .abort_if_unique_id_configured(data_updates([(CONF_URL, json!(ws_address))]))
            .await?;

        self.state.ws_address = Some(ws_address);
        self.state.version_info = Some(version_info);
        Ok(Transition::Goto(Step::HassioConfirm, None))
    }

    fn step_hassio_confirm(&self, input: Option<Value>) -> Transition {
        match input {
            None => Transition::Show(FlowResult::form(Step::HassioConfirm.as_str(), Vec::new())),
            Some(_) => Transition::Goto(Step::OnSupervisor, Some(json!({ CONF_USE_ADDON: true }))),
        }
    }

    async fn step_usb(
        &mut self,
        input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        let info: UsbServiceInfo = parse_input(Step::Usb, required_input(Step::Usb, input)?)?;

        if !self.state.ctx.is_hassio() {
            return Err(FlowError::abort(reason::DISCOVERY_REQUIRES_SUPERVISOR));
        }
        if !scope.current_entries(false).is_empty() {
            return Err(FlowError::abort(reason::ALREADY_CONFIGURED));
        }
        scope.claim_discovery()?;

        if !info.is_known_zwave_stick() || info.is_denylisted() {
            debug!(
                "Ignoring non Z-Wave USB device {}:{} {:?}",
                info.vid, info.pid, info.description
            );
            return Err(FlowError::abort(reason::NOT_ZWAVE_DEVICE));
        }

        let addon_info = self.state.addon_info().await?;
        if addon_info.state == AddonState::Running {
            return Err(FlowError::abort(reason::ALREADY_CONFIGURED));
        }

        scope.set_unique_id(&info.unique_id(), true)?;
        scope.abort_if_unique_id_configured(HashMap::new()).await?;
        self.state.usb_path = Some(serial_by_id(&info.device).await);
        self.usb_title = Some(info.human_readable_name());
        Ok(Transition::Goto(Step::UsbConfirm, None))
    }

    fn step_usb_confirm(&self, input: Option<Value>) -> Transition {
        match input {
            None => Transition::Show(
                FlowResult::form(Step::UsbConfirm.as_str(), Vec::new())
                    .with_placeholder("name", self.usb_title.clone().unwrap_or_default()),
            ),
            Some(_) => Transition::Goto(Step::OnSupervisor, Some(json!({ CONF_USE_ADDON: true }))),
        }
    }

    async fn step_on_supervisor(&mut self, input: Option<Value>) -> Result<Transition, FlowError> {
        let Some(input) = input else {
            return Ok(Transition::Show(FlowResult::form(
                Step::OnSupervisor.as_str(),
                vec![FormField::optional(CONF_USE_ADDON, "boolean").with_default(true)],
            )));
        };
        let input: OnSupervisorInput = parse_input(Step::OnSupervisor, input)?;
        if !input.use_addon {
            return Ok(Transition::Goto(Step::Manual, None));
        }

        self.state.use_addon = true;
        let info = self.state.addon_info().await?;
        let next = match info.state {
            AddonState::Running => {
                self.state.usb_path = info.options.device().map(str::to_string);
                self.state.network_key = info.options.network_key().map(str::to_string);
                Step::FinishAddonSetup
            }
            AddonState::NotRunning => Step::ConfigureAddon,
            AddonState::NotInstalled => Step::InstallAddon,
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
        let usb_discovery = scope.source() == ConfigEntrySource::Usb;

        let Some(input) = input else {
            if scope.source() == ConfigEntrySource::Hassio {
                if let (Some(device), Some(network_key)) =
                    (current.device(), current.network_key())
                {
                    debug!("Add-on already configured for {}, skipping configure step", device);
                    self.state.usb_path = Some(device.to_string());
                    self.state.network_key = Some(network_key.to_string());
                    return Ok(Transition::Goto(Step::StartAddon, None));
                }
            }

            let mut schema = Vec::new();
            if !usb_discovery {
                let usb_path = current
                    .device()
                    .or(self.state.usb_path.as_deref())
                    .unwrap_or_default();
                schema.push(FormField::required(CONF_USB_PATH, "string").with_default(usb_path));
            }
            let network_key = current
                .network_key()
                .or(self.state.network_key.as_deref())
                .unwrap_or_default();
            schema.push(FormField::optional(CONF_NETWORK_KEY, "string").with_default(network_key));
            return Ok(Transition::Show(FlowResult::form(
                Step::ConfigureAddon.as_str(),
                schema,
            )));
        };

        let input: ConfigureAddonInput = parse_input(Step::ConfigureAddon, input)?;
        if !usb_discovery {
            let usb_path = input.usb_path.ok_or_else(|| FlowError::InvalidInput {
                step: Step::ConfigureAddon.to_string(),
                message: format!("{} is required", CONF_USB_PATH),
            })?;
            self.state.usb_path = Some(usb_path);
        }
        self.state.network_key = input.network_key.or_else(|| current.network_key.clone());

        let mut new_options = current.clone();
        new_options.device = self.state.usb_path.clone();
        new_options.network_key = self.state.network_key.clone();
        if new_options != current {
            self.state.set_addon_options(&new_options).await?;
        }
        Ok(Transition::Goto(Step::StartAddon, None))
    }

    async fn step_finish_addon_setup(
        &mut self,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        let ws_address = match self.state.ws_address.clone() {
            Some(address) => address,
            None => self.state.discovery_address().await?,
        };
        self.state.ws_address = Some(ws_address.clone());

        if scope.unique_id().is_none() || scope.source() == ConfigEntrySource::Usb {
            let version_info = match self.state.version_info.clone() {
                Some(info) => info,
                None => self.state.probe(&ws_address).await.map_err(|err| {
                    warn!("Cannot reach Z-Wave JS add-on at {}: {}", ws_address, err);
                    FlowError::abort(reason::CANNOT_CONNECT)
                })?,
            };
            scope.set_unique_id(&version_info.unique_id(), false)?;
            self.state.version_info = Some(version_info);
        }

        scope
            .abort_if_unique_id_configured(data_updates([
                (CONF_URL, json!(ws_address)),
                (CONF_USB_PATH, json!(self.state.usb_path)),
                (CONF_NETWORK_KEY, json!(self.state.network_key)),
            ]))
            .await?;

        Ok(Transition::Show(self.create_entry(scope)))
    }

    async fn step_manual(
        &mut self,
        input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<Transition, FlowError> {
        let Some(input) = input else {
            return Ok(Transition::Show(manual_form(DEFAULT_URL)));
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
                } else {
                    debug!("Manual URL {} rejected: {}", input.url, err);
                }
                return Ok(Transition::Show(
                    manual_form(&input.url).with_base_error(err.code()),
                ));
            }
        };

        scope.set_unique_id(&version_info.unique_id(), false)?;
        scope
            .abort_if_unique_id_configured(data_updates([
                (CONF_URL, json!(input.url)),
                (CONF_USB_PATH, Value::Null),
                (CONF_NETWORK_KEY, Value::Null),
                (CONF_USE_ADDON, json!(false)),
                (CONF_INTEGRATION_CREATED_ADDON, json!(false)),
            ]))
            .await?;

        self.state.ws_address = Some(input.url);
        self.state.use_addon = false;
        self.state.version_info = Some(version_info);
        Ok(Transition::Show(self.create_entry(scope)))
    }

    /// Resolve the flow with a new entry, cancelling pending discoveries
    fn create_entry(&self, scope: &FlowScope<'_>) -> FlowResult {
        scope.abort_other_flows();

        let state = &self.state;
        let (usb_path, network_key) = if state.use_addon {
            (state.usb_path.clone(), state.network_key.clone())
        } else {
            (None, None)
        };
        info!("Creating Z-Wave JS entry for {:?}", state.ws_address);

        FlowResult::create_entry(
            TITLE,
            json!({
                CONF_URL: state.ws_address,
                CONF_USB_PATH: usb_path,
                CONF_NETWORK_KEY: network_key,
                CONF_USE_ADDON: state.use_addon,
                CONF_INTEGRATION_CREATED_ADDON: state.integration_created_addon,
            }),
        )
    }
}

fn manual_form(default_url: &str) -> FlowResult {
    FlowResult::form(
        Step::Manual.as_str(),
        vec![FormField::required(CONF_URL, "string").with_default(default_url)],
    )
}

#[async_trait]
impl FlowHandler for ConfigFlow {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn step(
        &mut self,
        step_id: &str,
        user_input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<FlowResult, FlowError> {
        let mut step: Step = step_id.parse()?;
        let mut input = user_input;
        loop {
            debug!("Z-Wave JS config flow {} at step {}", scope.flow_id(), step);
            match self.run_step(step, input, scope).await? {
                Transition::Show(result) => return Ok(result),
                Transition::Goto(next, next_input) => {
                    step = next;
                    input = next_input;
                }
            }
        }
    }

    async fn wait_for_background(&mut self) {
        self.state.wait_for_tasks().await;
    }
}
