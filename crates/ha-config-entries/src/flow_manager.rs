//! Flow Manager
//!
//! Runs config and options flows: allocates flow ids, dispatches steps to
//! the handler, chains `progress_done` into the next step, and turns a
//! finished config flow into a persisted [`ConfigEntry`].
//!
//! The [`FlowRegistry`] is the process-wide record of flows in progress.
//! Discovery and unique-id claims are check-and-insert operations made under
//! its single lock, so two flows can never both believe they came first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::entry::{ConfigEntry, ConfigEntrySource};
use crate::flow::{
    FlowError, FlowResult, FlowResultType, ALREADY_CONFIGURED, ALREADY_IN_PROGRESS,
};
use crate::manager::ConfigEntries;

/// One step-driven wizard instance
#[async_trait]
pub trait FlowHandler: Send {
    /// Integration domain
    fn domain(&self) -> &str;

    /// First step to run for a flow started from `source`
    fn initial_step(&self, source: ConfigEntrySource) -> String {
        source.as_str().to_string()
    }

    /// Run `step_id` with optional user input
    async fn step(
        &mut self,
        step_id: &str,
        user_input: Option<Value>,
        scope: &FlowScope<'_>,
    ) -> Result<FlowResult, FlowError>;

    /// Wait for any background task the flow is polling
    async fn wait_for_background(&mut self) {}
}

/// A flow in progress, as seen by other flows
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub flow_id: String,
    pub handler: String,
    pub source: ConfigEntrySource,
    pub step_id: Option<String>,
    pub unique_id: Option<String>,
}

/// Process-wide record of flows in progress, in start order
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: Mutex<IndexMap<String, FlowRecord>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, FlowRecord>> {
        // A panic while holding the lock cannot leave a record half-written.
        self.flows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, record: FlowRecord) {
        self.lock().insert(record.flow_id.clone(), record);
    }

    fn remove(&self, flow_id: &str) -> Option<FlowRecord> {
        self.lock().shift_remove(flow_id)
    }

    fn set_step(&self, flow_id: &str, step_id: Option<String>) {
        if let Some(record) = self.lock().get_mut(flow_id) {
            record.step_id = step_id;
        }
    }

    pub fn get(&self, flow_id: &str) -> Option<FlowRecord> {
        self.lock().get(flow_id).cloned()
    }

    /// Flows in progress for a domain, oldest first
    pub fn in_progress(&self, handler: &str) -> Vec<FlowRecord> {
        self.lock()
            .values()
            .filter(|r| r.handler == handler)
            .cloned()
            .collect()
    }

    /// Claim the right to be the only flow of this domain.
    ///
    /// Succeeds only if no flow of the same domain was registered before
    /// `flow_id`.
    pub fn try_claim_discovery(&self, flow_id: &str) -> bool {
        let flows = self.lock();
        let Some((index, _, record)) = flows.get_full(flow_id) else {
            return false;
        };
        !flows
            .values()
            .take(index)
            .any(|other| other.handler == record.handler)
    }

    /// Attach `unique_id` to a flow.
    ///
    /// With `raise_on_progress`, aborts `already_in_progress` when another
    /// flow of the domain already holds the same unique id.
    pub fn try_claim_unique_id(
        &self,
        flow_id: &str,
        unique_id: &str,
        raise_on_progress: bool,
    ) -> Result<(), FlowError> {
        let mut flows = self.lock();
        let handler = flows
            .get(flow_id)
            .map(|r| r.handler.clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        if raise_on_progress
            && flows.values().any(|other| {
                other.flow_id != flow_id
                    && other.handler == handler
                    && other.unique_id.as_deref() == Some(unique_id)
            })
        {
            return Err(FlowError::abort(ALREADY_IN_PROGRESS));
        }

        if let Some(record) = flows.get_mut(flow_id) {
            record.unique_id = Some(unique_id.to_string());
        }
        Ok(())
    }
}

type SharedFlow = Arc<tokio::sync::Mutex<Box<dyn FlowHandler>>>;

/// Drives flows of one kind (config flows or options flows)
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    registry: FlowRegistry,
    flows: DashMap<String, SharedFlow>,
    /// Config flows persist their `create_entry` data; options flows
    /// update their entry themselves.
    creates_entries: bool,
}

impl FlowManager {
    /// Manager for flows that create new entries
    pub fn config(entries: Arc<ConfigEntries>) -> Self {
        Self::new(entries, true)
    }

    /// Manager for flows that reconfigure an existing entry
    pub fn options(entries: Arc<ConfigEntries>) -> Self {
        Self::new(entries, false)
    }

    fn new(entries: Arc<ConfigEntries>, creates_entries: bool) -> Self {
        Self {
            entries,
            registry: FlowRegistry::new(),
            flows: DashMap::new(),
            creates_entries,
        }
    }

    pub fn entries(&self) -> &Arc<ConfigEntries> {
        &self.entries
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    /// Flows in progress for a domain
    pub fn progress(&self, handler: &str) -> Vec<FlowRecord> {
        self.registry.in_progress(handler)
    }

    /// Start a flow and run its first step
    pub async fn init(
        &self,
        handler: Box<dyn FlowHandler>,
        source: ConfigEntrySource,
        data: Option<Value>,
    ) -> Result<FlowResult, FlowError> {
        let flow_id = Ulid::new().to_string();
        let step_id = handler.initial_step(source);
        let domain = handler.domain().to_string();

        self.registry.register(FlowRecord {
            flow_id: flow_id.clone(),
            handler: domain.clone(),
            source,
            step_id: None,
            unique_id: None,
        });
        self.flows
            .insert(flow_id.clone(), Arc::new(tokio::sync::Mutex::new(handler)));
        debug!("Started {} flow {} from {:?}", domain, flow_id, source);

        let result = self.run(&flow_id, step_id, data).await;
        if result.is_err() {
            self.abort(&flow_id);
        }
        result
    }

    /// Continue a flow with user input (or poll a progress step with `None`)
    pub async fn configure(
        &self,
        flow_id: &str,
        user_input: Option<Value>,
    ) -> Result<FlowResult, FlowError> {
        let record = self
            .registry
            .get(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        let step_id = record
            .step_id
            .ok_or_else(|| FlowError::UnknownStep(String::new()))?;
        self.run(flow_id, step_id, user_input).await
    }

    /// Block until the flow's background task (if any) has finished
    pub async fn wait_for_background(&self, flow_id: &str) -> Result<(), FlowError> {
        let flow = self.flow(flow_id)?;
        flow.lock().await.wait_for_background().await;
        Ok(())
    }

    /// Abandon a flow; its background tasks are cancelled when dropped.
    pub fn abort(&self, flow_id: &str) {
        self.registry.remove(flow_id);
        if self.flows.remove(flow_id).is_some() {
            info!("Aborted flow {}", flow_id);
        }
    }

    fn flow(&self, flow_id: &str) -> Result<SharedFlow, FlowError> {
        self.flows
            .get(flow_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    async fn run(
        &self,
        flow_id: &str,
        mut step_id: String,
        mut user_input: Option<Value>,
    ) -> Result<FlowResult, FlowError> {
        let flow = self.flow(flow_id)?;
        let mut handler = flow.lock().await;
        let domain = handler.domain().to_string();
        let source = self
            .registry
            .get(flow_id)
            .map(|r| r.source)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        loop {
            let scope = FlowScope {
                flow_id,
                domain: &domain,
                source,
                manager: self,
            };
            debug!("Flow {} running step {}", flow_id, step_id);

            let result = match handler.step(&step_id, user_input.take(), &scope).await {
                Ok(result) => result,
                Err(FlowError::Abort { reason }) => FlowResult::abort(&reason),
                Err(err) => return Err(err),
            };

            match result.result_type {
                FlowResultType::ProgressDone => {
                    step_id = result
                        .step_id
                        .ok_or_else(|| FlowError::UnknownStep(String::new()))?;
                }
                _ if result.is_terminal() => {
                    drop(handler);
                    return self.finish(flow_id, &domain, source, result).await;
                }
                _ => {
                    self.registry.set_step(flow_id, result.step_id.clone());
                    return Ok(self.fill(result, flow_id, &domain));
                }
            }
        }
    }

    async fn finish(
        &self,
        flow_id: &str,
        domain: &str,
        source: ConfigEntrySource,
        result: FlowResult,
    ) -> Result<FlowResult, FlowError> {
        let record = self.registry.remove(flow_id);
        self.flows.remove(flow_id);

        let mut result = self.fill(result, flow_id, domain);
        match result.result_type {
            FlowResultType::Abort => {
                info!(
                    "Flow {} ({}) aborted: {}",
                    flow_id,
                    domain,
                    result.reason.as_deref().unwrap_or_default()
                );
            }
            FlowResultType::CreateEntry if self.creates_entries => {
                let data: HashMap<String, Value> = match result.data.clone() {
                    Some(Value::Object(map)) => map.into_iter().collect(),
                    _ => HashMap::new(),
                };
                let mut entry =
                    ConfigEntry::new(domain, result.title.clone().unwrap_or_default())
                        .with_data(data)
                        .with_source(source);
                entry.unique_id = record.and_then(|r| r.unique_id);

                let entry = self.entries.add(entry).await?;
                if let Err(err) = self.entries.setup(&entry.entry_id).await {
                    warn!("Entry {} created but setup failed: {}", entry.entry_id, err);
                }
                result.entry_id = Some(entry.entry_id);
            }
            _ => {}
        }
        Ok(result)
    }

    fn fill(&self, mut result: FlowResult, flow_id: &str, domain: &str) -> FlowResult {
        result.flow_id = flow_id.to_string();
        result.handler = domain.to_string();
        result
    }
}

/// What a running step may see and do outside its own state
pub struct FlowScope<'a> {
    flow_id: &'a str,
    domain: &'a str,
    source: ConfigEntrySource,
    manager: &'a FlowManager,
}

impl FlowScope<'_> {
    pub fn flow_id(&self) -> &str {
        self.flow_id
    }

    pub fn source(&self) -> ConfigEntrySource {
        self.source
    }

    pub fn entries(&self) -> &ConfigEntries {
        &self.manager.entries
    }

    /// Configured entries of this domain
    pub fn current_entries(&self, include_ignore: bool) -> Vec<ConfigEntry> {
        self.manager
            .entries
            .get_by_domain(self.domain, include_ignore)
    }

    /// The unique id claimed by this flow, if any
    pub fn unique_id(&self) -> Option<String> {
        self.manager
            .registry
            .get(self.flow_id)
            .and_then(|r| r.unique_id)
    }

    /// Other flows of this domain in progress
    pub fn others_in_progress(&self) -> Vec<FlowRecord> {
        self.manager
            .registry
            .in_progress(self.domain)
            .into_iter()
            .filter(|r| r.flow_id != self.flow_id)
            .collect()
    }

    /// Claim discovery of this domain, aborting `already_in_progress` if an
    /// earlier flow is running.
    pub fn claim_discovery(&self) -> Result<(), FlowError> {
        if self.manager.registry.try_claim_discovery(self.flow_id) {
            Ok(())
        } else {
            Err(FlowError::abort(ALREADY_IN_PROGRESS))
        }
    }

    pub fn set_unique_id(&self, unique_id: &str, raise_on_progress: bool) -> Result<(), FlowError> {
        self.manager
            .registry
            .try_claim_unique_id(self.flow_id, unique_id, raise_on_progress)
    }

    /// Abort `already_configured` if an entry holds this flow's unique id,
    /// first merging `updates` into that entry and reloading it on change.
    pub async fn abort_if_unique_id_configured(
        &self,
        updates: HashMap<String, Value>,
    ) -> Result<(), FlowError> {
        let Some(unique_id) = self.unique_id() else {
            return Ok(());
        };
        let Some(entry) = self.manager.entries.get_by_unique_id(self.domain, &unique_id) else {
            return Ok(());
        };

        let (entry, changed) = self
            .manager
            .entries
            .update_data(&entry.entry_id, &updates)
            .await?;
        if changed && entry.is_loaded() {
            if let Err(err) = self.manager.entries.reload(&entry.entry_id).await {
                warn!("Reload of {} after update failed: {}", entry.entry_id, err);
            }
        }
        Err(FlowError::abort(ALREADY_CONFIGURED))
    }

    /// Abort every other flow of this domain
    pub fn abort_other_flows(&self) {
        for record in self.others_in_progress() {
            self.manager.abort(&record.flow_id);
        }
    }
}
