//! Z-Wave JS setup wizard
//!
//! Runs one config or options flow. Every flow result is printed to stdout
//! as a JSON line; when a form is shown, the next stdin line is read as the
//! form's JSON input. Logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ha_config_entries::{ConfigEntries, FlowError, FlowResult, FlowResultType, Storage};
use ha_zwave_js::consts::{ADDON_SLUG, DOMAIN};
use ha_zwave_js::{
    HassioServiceInfo, ServerConnection, SupervisorAddonClient, UsbServiceInfo, WsVersionProbe,
    ZwaveJs, ZwaveJsConfig, ZwaveJsContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "zwave-js-setup")]
#[command(about = "Connect to a Z-Wave JS server or set up its add-on")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "zwave_js.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a flow as the user
    User,
    /// Start a flow from a supervisor add-on discovery
    Hassio {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        addon: Option<String>,
    },
    /// Start a flow from a USB stick discovery
    Usb {
        #[arg(long)]
        device: String,
        #[arg(long)]
        vid: String,
        #[arg(long)]
        pid: String,
        #[arg(long)]
        serial_number: Option<String>,
        #[arg(long)]
        manufacturer: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Reconfigure an existing entry
    Options {
        /// Entry id; defaults to the only Z-Wave JS entry
        entry_id: Option<String>,
    },
    /// List configured entries
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = if args.config.exists() {
        ZwaveJsConfig::load(&args.config)?
    } else {
        debug!("No configuration at {}, using defaults", args.config.display());
        ZwaveJsConfig::default()
    };
    let timeouts = config.timeouts();

    let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(&config.config_dir))));
    entries.load().await.context("loading config entries")?;

    let probe = Arc::new(WsVersionProbe);
    entries.register_lifecycle(
        DOMAIN,
        Arc::new(ServerConnection::new(probe.clone(), timeouts.server_version)),
    );

    let mut ctx = ZwaveJsContext::new(probe).with_timeouts(timeouts);
    if let Some(supervisor) = &config.supervisor {
        info!("Managing add-on {} through {}", ADDON_SLUG, supervisor.url);
        ctx = ctx.with_addon(Arc::new(SupervisorAddonClient::new(
            &supervisor.url,
            config.supervisor_token(),
        )));
    }
    let zwave = ZwaveJs::new(entries.clone(), ctx);

    let (result, options) = match args.command {
        Command::List => {
            for entry in entries.get_by_domain(DOMAIN, true) {
                println!("{}", serde_json::to_string(&entry)?);
            }
            return Ok(());
        }
        Command::User => (zwave.start_user_flow().await?, false),
        Command::Hassio { host, port, addon } => (
            zwave
                .start_hassio_flow(&HassioServiceInfo { addon, host, port })
                .await?,
            false,
        ),
        Command::Usb {
            device,
            vid,
            pid,
            serial_number,
            manufacturer,
            description,
        } => {
            let info = UsbServiceInfo {
                device,
                vid,
                pid,
                serial_number,
                manufacturer,
                description,
            };
            (zwave.start_usb_flow(&info).await?, false)
        }
        Command::Options { entry_id } => {
            let entry_id = match entry_id {
                Some(id) => id,
                None => only_entry_id(&entries)?,
            };
            (zwave.start_options_flow(&entry_id).await?, true)
        }
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let last = drive(&zwave, result, options, &mut stdin, &mut stdout).await?;
    match last.result_type {
        FlowResultType::CreateEntry => info!("Flow finished"),
        _ => warn!(
            "Flow aborted: {}",
            last.reason.as_deref().unwrap_or("unknown")
        ),
    }
    Ok(())
}

fn only_entry_id(entries: &ConfigEntries) -> Result<String> {
    let mut found = entries.get_by_domain(DOMAIN, false);
    if found.len() != 1 {
        bail!("expected one {} entry, found {}; pass an entry id", DOMAIN, found.len());
    }
    Ok(found.remove(0).entry_id)
}

/// Run a flow until it finishes, reading form input line by line.
///
/// Input that is not JSON or that the step rejects is logged and the same
/// form is shown again.
async fn drive<R, W>(
    zwave: &ZwaveJs,
    mut result: FlowResult,
    options: bool,
    input: &mut Lines<R>,
    output: &mut W,
) -> Result<FlowResult>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let manager = if options { zwave.options() } else { zwave.flow() };

    loop {
        let line = serde_json::to_string(&result)?;
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;

        let user_input = match result.result_type {
            FlowResultType::CreateEntry | FlowResultType::Abort => return Ok(result),
            FlowResultType::Progress | FlowResultType::ProgressDone => {
                manager.wait_for_background(&result.flow_id).await?;
                None
            }
            FlowResultType::Form => {
                let Some(line) = input.next_line().await? else {
                    manager.abort(&result.flow_id);
                    bail!("input closed while step {:?} waited", result.step_id);
                };
                match form_input(&line) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!("Form input is not JSON: {}", err);
                        continue;
                    }
                }
            }
        };

        match manager.configure(&result.flow_id, user_input).await {
            Ok(next) => result = next,
            Err(FlowError::InvalidInput { step, message }) => {
                warn!("Input rejected by step {}: {}", step, message);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Parse one line of form input; a blank line submits an empty form
fn form_input(line: &str) -> serde_json::Result<Value> {
    let line = line.trim();
    if line.is_empty() {
        Ok(json!({}))
    } else {
        serde_json::from_str(line)
    }
}
