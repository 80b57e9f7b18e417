//! Version Prober
//!
//! Connects to a Z-Wave JS server, reads the version message the server
//! sends on connect, and closes the connection. The `homeId` in that message
//! identifies the physical Z-Wave network and is used as the entry's unique
//! id.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::ProbeError;

/// Version info sent by the server on connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub driver_version: String,
    pub server_version: String,
    pub home_id: u64,
    pub min_schema_version: u32,
    pub max_schema_version: u32,
}

impl VersionInfo {
    /// Unique id of the network this server controls
    pub fn unique_id(&self) -> String {
        self.home_id.to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerMessage {
    Version(VersionInfo),
    #[serde(other)]
    Other,
}

/// Reads the version message from a server
#[async_trait]
pub trait VersionProbe: Send + Sync {
    /// Connect to `url` and return the server's version info.
    ///
    /// Unbounded; callers apply the timeout via [`get_version_info`].
    async fn server_version(&self, url: &str) -> Result<VersionInfo, ProbeError>;
}

/// Probe over a real websocket connection
#[derive(Debug, Default, Clone, Copy)]
pub struct WsVersionProbe;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[async_trait]
impl VersionProbe for WsVersionProbe {
    async fn server_version(&self, url: &str) -> Result<VersionInfo, ProbeError> {
        let (mut ws, _) = connect_async(url)
            .await
            .map_err(|e| ProbeError::CannotConnect(e.to_string()))?;

        let outcome = read_version(&mut ws).await;
        if let Err(e) = ws.close(None).await {
            debug!("Closing connection to {} failed: {}", url, e);
        }
        outcome
    }
}

async fn read_version(ws: &mut WsStream) -> Result<VersionInfo, ProbeError> {
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| ProbeError::CannotConnect(e.to_string()))?;
        match msg {
            Message::Text(text) => {
                let parsed: ServerMessage = serde_json::from_str(&text)
                    .map_err(|e| ProbeError::CannotConnect(format!("invalid message: {}", e)))?;
                match parsed {
                    ServerMessage::Version(info) => return Ok(info),
                    ServerMessage::Other => {
                        return Err(ProbeError::CannotConnect(
                            "first message was not a version message".to_string(),
                        ))
                    }
                }
            }
            Message::Close(_) => break,
            _ => continue,
        }
    }
    Err(ProbeError::CannotConnect(
        "connection closed before version message".to_string(),
    ))
}

/// Check that `url` is a websocket URL
pub fn validate_ws_url(url: &str) -> Result<(), ProbeError> {
    let parsed = Url::parse(url).map_err(|_| ProbeError::InvalidAddress(url.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" if parsed.host_str().is_some() => Ok(()),
        _ => Err(ProbeError::InvalidAddress(url.to_string())),
    }
}

/// Probe `url` with a bound on the whole exchange.
///
/// A timeout is `CannotConnect`. Dropping the in-flight probe on timeout
/// drops its socket.
pub async fn get_version_info(
    probe: &dyn VersionProbe,
    url: &str,
    limit: Duration,
) -> Result<VersionInfo, ProbeError> {
    match timeout(limit, probe.server_version(url)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::CannotConnect(format!(
            "no version message from {} within {:?}",
            url, limit
        ))),
    }
}

/// Validate a user supplied URL and probe it
pub async fn validate_input(
    probe: &dyn VersionProbe,
    url: &str,
    limit: Duration,
) -> Result<VersionInfo, ProbeError> {
    validate_ws_url(url)?;
    get_version_info(probe, url, limit).await
}
