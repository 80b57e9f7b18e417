//! Common test utilities for the Z-Wave JS flows
//!
//! Hand-written doubles for the supervisor add-on API, the version probe and
//! the entry connection lifecycle, plus a harness wiring them to a
//! storage-backed set of config entries.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ha_config_entries::{ConfigEntries, ConfigEntry, EntryLifecycle, FlowResult, Storage};
use ha_zwave_js::consts::DOMAIN;
use ha_zwave_js::{
    AddonApi, AddonDiscoveryInfo, AddonError, AddonInfo, AddonOptions, AddonState, FlowTimeouts,
    ProbeError, VersionInfo, VersionProbe, ZwaveJs, ZwaveJsContext,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const HOME_ID: u64 = 1234;

pub fn version_info(home_id: u64) -> VersionInfo {
    VersionInfo {
        driver_version: "test_driver_version".to_string(),
        server_version: "test_server_version".to_string(),
        home_id,
        min_schema_version: 0,
        max_schema_version: 1,
    }
}

pub fn addon_options(device: &str, network_key: &str) -> AddonOptions {
    AddonOptions {
        device: Some(device.to_string()),
        network_key: Some(network_key.to_string()),
        ..Default::default()
    }
}

/// Recorded add-on API call
#[derive(Debug, Clone, PartialEq)]
pub enum AddonCall {
    Info,
    DiscoveryInfo,
    SetOptions(AddonOptions),
    Install,
    Start,
    Restart,
}

#[derive(Debug)]
struct MockAddonState {
    info: AddonInfo,
    discovery: Option<AddonDiscoveryInfo>,
    failing: HashSet<&'static str>,
    calls: Vec<AddonCall>,
}

/// Scripted add-on API that records every call
#[derive(Debug)]
pub struct MockAddon {
    state: Mutex<MockAddonState>,
    /// When set, `install` waits for a notification
    install_gate: Option<Notify>,
}

impl MockAddon {
    pub fn new(state: AddonState, options: AddonOptions) -> Self {
        Self {
            state: Mutex::new(MockAddonState {
                info: AddonInfo {
                    state,
                    options,
                    version: Some("1.0.0".to_string()),
                },
                discovery: Some(AddonDiscoveryInfo {
                    host: "host1".to_string(),
                    port: 3001,
                }),
                failing: HashSet::new(),
                calls: Vec::new(),
            }),
            install_gate: None,
        }
    }

    pub fn running(options: AddonOptions) -> Self {
        Self::new(AddonState::Running, options)
    }

    pub fn not_running(options: AddonOptions) -> Self {
        Self::new(AddonState::NotRunning, options)
    }

    pub fn not_installed() -> Self {
        let addon = Self::new(AddonState::NotInstalled, AddonOptions::default());
        addon.lock().info.version = None;
        addon
    }

    /// Make `operation` (`addon_info`, `discovery_info`, `set_options`,
    /// `install`, `start`, `restart`) fail
    pub fn failing(self, operation: &'static str) -> Self {
        self.lock().failing.insert(operation);
        self
    }

    pub fn without_discovery(self) -> Self {
        self.lock().discovery = None;
        self
    }

    pub fn with_install_gate(mut self) -> Self {
        self.install_gate = Some(Notify::new());
        self
    }

    pub fn release_install(&self) {
        if let Some(gate) = &self.install_gate {
            gate.notify_one();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockAddonState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: AddonCall, operation: &str) -> Result<(), AddonError> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.failing.contains(operation) {
            return Err(AddonError::api(operation, "Boom"));
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<AddonCall> {
        self.lock().calls.clone()
    }

    pub fn set_options_calls(&self) -> Vec<AddonOptions> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                AddonCall::SetOptions(options) => Some(options),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &AddonCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn options_now(&self) -> AddonOptions {
        self.lock().info.options.clone()
    }
}

#[async_trait]
impl AddonApi for MockAddon {
    async fn addon_info(&self) -> Result<AddonInfo, AddonError> {
        self.record(AddonCall::Info, "addon_info")?;
        Ok(self.lock().info.clone())
    }

    async fn discovery_info(&self) -> Result<AddonDiscoveryInfo, AddonError> {
        self.record(AddonCall::DiscoveryInfo, "discovery_info")?;
        self.lock()
            .discovery
            .clone()
            .ok_or_else(|| AddonError::MissingDiscoveryInfo("core_zwave_js".to_string()))
    }

    async fn set_options(&self, options: &AddonOptions) -> Result<(), AddonError> {
        self.record(AddonCall::SetOptions(options.clone()), "set_options")?;
        self.lock().info.options = options.clone();
        Ok(())
    }

    async fn install(&self) -> Result<(), AddonError> {
        if let Some(gate) = &self.install_gate {
            gate.notified().await;
        }
        self.record(AddonCall::Install, "install")?;
        let mut state = self.lock();
        state.info.state = AddonState::NotRunning;
        state.info.version = Some("1.0.0".to_string());
        Ok(())
    }

    async fn start(&self) -> Result<(), AddonError> {
        self.record(AddonCall::Start, "start")?;
        self.lock().info.state = AddonState::Running;
        Ok(())
    }

    async fn restart(&self) -> Result<(), AddonError> {
        self.record(AddonCall::Restart, "restart")?;
        self.lock().info.state = AddonState::Running;
        Ok(())
    }
}

/// Scripted version probe that records probed URLs
#[derive(Debug)]
pub struct MockProbe {
    queued: Mutex<VecDeque<Result<VersionInfo, ProbeError>>>,
    default: Mutex<Result<VersionInfo, ProbeError>>,
    delay: Duration,
    urls: Mutex<Vec<String>>,
}

impl MockProbe {
    pub fn new(home_id: u64) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            default: Mutex::new(Ok(version_info(home_id))),
            delay: Duration::ZERO,
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Answer only after `delay`
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer every probe with `result` from now on
    pub fn answer(&self, result: Result<VersionInfo, ProbeError>) {
        *self.default.lock().unwrap() = result;
    }

    /// Answer the next probe with `result`
    pub fn answer_once(&self, result: Result<VersionInfo, ProbeError>) {
        self.queued.lock().unwrap().push_back(result);
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionProbe for MockProbe {
    async fn server_version(&self, url: &str) -> Result<VersionInfo, ProbeError> {
        self.urls.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let queued = self.queued.lock().unwrap().pop_front();
        match queued {
            Some(result) => result,
            None => self.default.lock().unwrap().clone(),
        }
    }
}

/// Entry lifecycle counting connects and disconnects
#[derive(Debug, Default)]
pub struct CountingLifecycle {
    pub setups: AtomicUsize,
    pub unloads: AtomicUsize,
}

impl CountingLifecycle {
    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntryLifecycle for CountingLifecycle {
    async fn setup_entry(&self, _entry: &ConfigEntry) -> Result<(), String> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unload_entry(&self, _entry: &ConfigEntry) -> Result<(), String> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Timeouts that keep add-on polling instant
pub fn test_timeouts() -> FlowTimeouts {
    FlowTimeouts {
        server_version: Duration::from_secs(5),
        addon_setup: Duration::ZERO,
        addon_setup_rounds: 4,
    }
}

/// Flows wired to mocks and a temporary storage directory
pub struct Harness {
    _dir: TempDir,
    pub entries: Arc<ConfigEntries>,
    pub addon: Option<Arc<MockAddon>>,
    pub probe: Arc<MockProbe>,
    pub lifecycle: Arc<CountingLifecycle>,
    pub zwave: ZwaveJs,
}

impl Harness {
    /// Host without a supervisor
    pub fn without_supervisor() -> Self {
        Self::build(None, MockProbe::new(HOME_ID))
    }

    /// Host with a supervisor managing `addon`
    pub fn with_addon(addon: MockAddon) -> Self {
        Self::build(Some(addon), MockProbe::new(HOME_ID))
    }

    pub fn build(addon: Option<MockAddon>, probe: MockProbe) -> Self {
        let dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let lifecycle = Arc::new(CountingLifecycle::default());
        entries.register_lifecycle(DOMAIN, lifecycle.clone());

        let probe = Arc::new(probe);
        let addon = addon.map(Arc::new);
        let mut ctx = ZwaveJsContext::new(probe.clone()).with_timeouts(test_timeouts());
        if let Some(addon) = &addon {
            ctx = ctx.with_addon(addon.clone());
        }

        Self {
            _dir: dir,
            zwave: ZwaveJs::new(entries.clone(), ctx),
            entries,
            addon,
            probe,
            lifecycle,
        }
    }

    pub fn addon(&self) -> &MockAddon {
        self.addon.as_deref().expect("harness has no add-on")
    }

    /// Add a loaded entry for `unique_id`
    pub async fn add_entry(&self, unique_id: &str, data: Value) -> ConfigEntry {
        let data: HashMap<String, Value> = serde_json::from_value(data).unwrap();
        let entry = self
            .entries
            .add(
                ConfigEntry::new(DOMAIN, "Z-Wave JS")
                    .with_data(data)
                    .with_unique_id(unique_id),
            )
            .await
            .unwrap();
        self.entries.setup(&entry.entry_id).await.unwrap();
        self.entries.get(&entry.entry_id).unwrap()
    }

    pub fn entry(&self, entry_id: &str) -> ConfigEntry {
        self.entries.get(entry_id).unwrap()
    }

    pub fn only_entry(&self) -> ConfigEntry {
        let entries = self.entries.get_by_domain(DOMAIN, true);
        assert_eq!(entries.len(), 1, "expected exactly one entry");
        entries.into_iter().next().unwrap()
    }

    /// Continue a config flow
    pub async fn configure(&self, result: &FlowResult, input: Option<Value>) -> FlowResult {
        self.zwave
            .flow()
            .configure(&result.flow_id, input)
            .await
            .unwrap()
    }

    /// Let a config flow's background task finish, then poll it
    pub async fn finish_progress(&self, result: &FlowResult) -> FlowResult {
        self.zwave
            .flow()
            .wait_for_background(&result.flow_id)
            .await
            .unwrap();
        self.configure(result, None).await
    }

    /// Continue an options flow
    pub async fn configure_options(&self, result: &FlowResult, input: Option<Value>) -> FlowResult {
        self.zwave
            .options()
            .configure(&result.flow_id, input)
            .await
            .unwrap()
    }

    /// Let an options flow's background task finish, then poll it
    pub async fn finish_options_progress(&self, result: &FlowResult) -> FlowResult {
        self.zwave
            .options()
            .wait_for_background(&result.flow_id)
            .await
            .unwrap();
        self.configure_options(result, None).await
    }
}
