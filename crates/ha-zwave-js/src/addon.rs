//! Add-on Lifecycle Client
//!
//! Talks to the supervisor about the managed Z-Wave JS add-on: its state and
//! options, the discovery info it publishes, and the long-running
//! install/start/restart operations, which flows run as [`AddonTask`]s.

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::consts::ADDON_SLUG;
use crate::error::AddonError;

/// Installation state of the add-on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonState {
    NotInstalled,
    NotRunning,
    Running,
}

/// Persisted configuration of the add-on.
///
/// Keys this integration does not manage are kept in `extra` so a write
/// never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddonOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulate_hardware: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AddonOptions {
    /// Device path, treating an empty string as unset
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref().filter(|d| !d.is_empty())
    }

    /// Network key, treating an empty string as unset
    pub fn network_key(&self) -> Option<&str> {
        self.network_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// State and options of the add-on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonInfo {
    pub state: AddonState,
    #[serde(default)]
    pub options: AddonOptions,
    #[serde(default)]
    pub version: Option<String>,
}

/// Where the add-on's server listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonDiscoveryInfo {
    pub host: String,
    pub port: u16,
}

impl AddonDiscoveryInfo {
    pub fn ws_address(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Operations on the managed add-on
#[async_trait]
pub trait AddonApi: Send + Sync {
    async fn addon_info(&self) -> Result<AddonInfo, AddonError>;

    /// Discovery info published by the add-on; missing info is an error
    async fn discovery_info(&self) -> Result<AddonDiscoveryInfo, AddonError>;

    /// Replace the add-on options
    async fn set_options(&self, options: &AddonOptions) -> Result<(), AddonError>;

    async fn install(&self) -> Result<(), AddonError>;

    async fn start(&self) -> Result<(), AddonError>;

    async fn restart(&self) -> Result<(), AddonError>;

    async fn options(&self) -> Result<AddonOptions, AddonError> {
        Ok(self.addon_info().await?.options)
    }

    async fn is_installed(&self) -> Result<bool, AddonError> {
        Ok(self.addon_info().await?.state != AddonState::NotInstalled)
    }

    async fn is_running(&self) -> Result<bool, AddonError> {
        Ok(self.addon_info().await?.state == AddonState::Running)
    }
}

/// Supervisor response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SupervisorAddonInfo {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    options: AddonOptions,
}

#[derive(Debug, Deserialize)]
struct SupervisorDiscovery {
    #[serde(default)]
    discovery: Vec<SupervisorDiscoveryEntry>,
}

#[derive(Debug, Deserialize)]
struct SupervisorDiscoveryEntry {
    addon: String,
    config: AddonDiscoveryInfo,
}

/// [`AddonApi`] backed by the supervisor REST API
#[derive(Debug, Clone)]
pub struct SupervisorAddonClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    slug: String,
}

impl SupervisorAddonClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            slug: ADDON_SLUG.to_string(),
        }
    }

    pub fn with_slug(mut self, slug: &str) -> Self {
        self.slug = slug.to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>, AddonError> {
        debug!("Supervisor call: {} ({})", operation, self.slug);
        let envelope: Envelope<T> = request.send().await?.json().await?;
        if envelope.result != "ok" {
            return Err(AddonError::api(
                operation,
                envelope.message.unwrap_or(envelope.result),
            ));
        }
        Ok(envelope.data)
    }

    async fn post(&self, operation: &str, path: &str, body: Option<Value>) -> Result<(), AddonError> {
        let mut request = self.request(reqwest::Method::POST, path);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send::<Value>(operation, request).await?;
        Ok(())
    }
}

#[async_trait]
impl AddonApi for SupervisorAddonClient {
    async fn addon_info(&self) -> Result<AddonInfo, AddonError> {
        let path = format!("/addons/{}/info", self.slug);
        let data: SupervisorAddonInfo = self
            .send("addon_info", self.request(reqwest::Method::GET, &path))
            .await?
            .ok_or_else(|| AddonError::api("addon_info", "empty response"))?;

        let state = match (&data.version, data.state.as_deref()) {
            (None, _) => AddonState::NotInstalled,
            (Some(_), Some("started")) => AddonState::Running,
            (Some(_), _) => AddonState::NotRunning,
        };
        Ok(AddonInfo {
            state,
            options: data.options,
            version: data.version,
        })
    }

    async fn discovery_info(&self) -> Result<AddonDiscoveryInfo, AddonError> {
        let data: SupervisorDiscovery = self
            .send(
                "discovery_info",
                self.request(reqwest::Method::GET, "/discovery"),
            )
            .await?
            .ok_or_else(|| AddonError::MissingDiscoveryInfo(self.slug.clone()))?;

        data.discovery
            .into_iter()
            .find(|d| d.addon == self.slug)
            .map(|d| d.config)
            .ok_or_else(|| AddonError::MissingDiscoveryInfo(self.slug.clone()))
    }

    async fn set_options(&self, options: &AddonOptions) -> Result<(), AddonError> {
        let path = format!("/addons/{}/options", self.slug);
        self.post("set_options", &path, Some(json!({ "options": options })))
            .await
    }

    async fn install(&self) -> Result<(), AddonError> {
        info!("Installing add-on {}", self.slug);
        let path = format!("/addons/{}/install", self.slug);
        self.post("install", &path, None).await
    }

    async fn start(&self) -> Result<(), AddonError> {
        info!("Starting add-on {}", self.slug);
        let path = format!("/addons/{}/start", self.slug);
        self.post("start", &path, None).await
    }

    async fn restart(&self) -> Result<(), AddonError> {
        info!("Restarting add-on {}", self.slug);
        let path = format!("/addons/{}/restart", self.slug);
        self.post("restart", &path, None).await
    }
}

/// A background add-on operation owned by a flow.
///
/// Dropping the handle cancels the operation.
#[derive(Debug)]
pub struct AddonTask<T> {
    handle: Option<JoinHandle<T>>,
    output: Option<Result<T, JoinError>>,
}

impl<T: Send + 'static> AddonTask<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(future)),
            output: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.output.is_some() || self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Take the output if the task has finished, without waiting
    pub fn poll_result(&mut self) -> Option<Result<T, JoinError>> {
        if let Some(output) = self.output.take() {
            return Some(output);
        }
        let handle = self.handle.as_mut()?;
        if !handle.is_finished() {
            return None;
        }
        let output = handle.now_or_never()?;
        self.handle = None;
        Some(output)
    }

    /// Wait until the task has finished; the output stays available to
    /// [`poll_result`](Self::poll_result).
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            let output = handle.await;
            self.handle = None;
            self.output = Some(output);
        }
    }
}

impl<T> Drop for AddonTask<T> {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
