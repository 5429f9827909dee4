//! taskbridged
//!
//! Runs either side of taskbridge over Unix domain sockets: the orchestrator
//! that plans and dispatches signed task plans, or the connector that
//! verifies and executes them on a user's machine.

mod config;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use taskbridge_connector::Connector;
use taskbridge_executor::{builtin_registry, Executor, WorkflowSettings};
use taskbridge_orchestrator::{KeywordPlanner, Orchestrator};
use taskbridge_policy::ExecutionPolicy;
use taskbridge_protocol::crypto::{
    generate_keypair, load_or_generate_keypair, parse_signing_key, public_key_hex, save_keypair,
};
use taskbridge_protocol::{Message, ObjectiveRequest};
use taskbridge_transport::{Inbox, Transport, UnixTransport};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, resolve_config_path, TaskbridgeConfig};

const DEFAULT_DEVICE_KEY_DIR: &str = ".taskbridge/device";

#[derive(Parser, Debug)]
#[command(name = "taskbridged", version)]
#[command(about = "Signed task dispatch between an orchestrator and paired connectors")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Path to configuration (taskbridge.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the orchestrator
    Orchestrator {
        /// Socket path; overrides [orchestrator].socket
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Run a connector for this device
    Connector {
        /// Socket path; overrides [connector].socket
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Write a new Ed25519 keypair to a directory
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },
    /// Send one objective to an orchestrator and print the reply
    Submit {
        /// Orchestrator socket; defaults to [orchestrator].socket
        #[arg(long)]
        orchestrator: Option<PathBuf>,
        #[arg(long, default_value = "local_user")]
        user: String,
        /// Seconds to wait for the final reply
        #[arg(long, default_value_t = 120)]
        timeout: u64,
        objective: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = resolve_config_path(cli.config.clone());
    if let Some(path) = &config_path {
        info!("Using config {}", path.display());
    }
    let mut config = load_config(config_path.as_deref())?;
    config.apply_env(|name| std::env::var(name).ok());

    match cli.command {
        Command::Orchestrator { socket } => run_orchestrator(config, socket).await,
        Command::Connector { socket } => run_connector(config, socket).await,
        Command::Keygen { out } => keygen(&out),
        Command::Submit {
            orchestrator,
            user,
            timeout,
            objective,
        } => {
            let target = orchestrator.unwrap_or(config.orchestrator.socket);
            submit(&target, user, objective.join(" "), Duration::from_secs(timeout)).await
        }
    }
}

async fn run_orchestrator(config: TaskbridgeConfig, socket: Option<PathBuf>) -> Result<()> {
    let signing_key = match (
        &config.orchestrator.signing_key_hex,
        &config.orchestrator.key_dir,
    ) {
        (Some(hex), _) => Some(parse_signing_key(hex).context("invalid signing key")?),
        (None, Some(dir)) => Some(load_or_generate_keypair(dir)?),
        (None, None) => None,
    };
    if let Some(key) = &signing_key {
        info!(public_key = %public_key_hex(key), "Orchestrator signing key loaded");
    }

    let socket = socket.unwrap_or_else(|| config.orchestrator.socket.clone());
    let (transport, inbox) = UnixTransport::bind(&socket)?;
    let orchestrator = Orchestrator::new(
        Arc::new(transport),
        signing_key,
        config.orchestrator_config(),
    )?
    .with_planner(KeywordPlanner::new(
        config.workflows.default_scan_path.display().to_string(),
    ))
    .with_local_executor(build_executor(&config.workflows)?);

    serve(Arc::new(orchestrator).run(inbox), &socket).await;
    Ok(())
}

async fn run_connector(config: TaskbridgeConfig, socket: Option<PathBuf>) -> Result<()> {
    let connector_config = config.connector.clone();
    let key_dir = connector_config
        .key_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_KEY_DIR));
    let device_key = load_or_generate_keypair(&key_dir)?;

    let socket = socket.unwrap_or_else(|| connector_config.socket.clone());
    let (transport, inbox) = UnixTransport::bind(&socket)?;
    let connector = Arc::new(Connector::new(
        Arc::new(transport),
        &connector_config,
        device_key,
        ExecutionPolicy::new(config.execution.clone()),
        build_executor(&config.workflows)?,
    )?);

    if connector_config.orchestrator_public_key_hex.is_none() {
        if connector_config.allow_unverified_dispatch {
            warn!(verification = "bypassed", "No orchestrator key; unsigned plans will run");
        } else {
            warn!("No orchestrator key; every dispatch will be rejected");
        }
    }
    match &connector_config.orchestrator_address {
        Some(address) => {
            if let Err(e) = connector.pair(address).await {
                warn!("Pairing request to {} failed: {}", address, e);
            }
        }
        None => info!("No orchestrator_address configured; waiting to be contacted"),
    }

    serve(connector.run(inbox), &socket).await;
    Ok(())
}

async fn serve(run: impl std::future::Future<Output = ()>, socket: &Path) {
    tokio::select! {
        _ = run => {}
        _ = signal::ctrl_c() => info!("Shutdown requested"),
    }
    let _ = std::fs::remove_file(socket);
}

fn build_executor(settings: &WorkflowSettings) -> Result<Executor> {
    Ok(Executor::new(builtin_registry(settings)?))
}

fn keygen(out: &Path) -> Result<()> {
    let key = generate_keypair();
    save_keypair(out, &key)?;
    println!("{}", public_key_hex(&key));
    Ok(())
}

async fn submit(target: &Path, user_id: String, objective: String, wait: Duration) -> Result<()> {
    if objective.trim().is_empty() {
        bail!("objective must not be empty");
    }
    let reply_socket =
        std::env::temp_dir().join(format!("taskbridge-submit-{}.sock", std::process::id()));
    let (transport, mut inbox) = UnixTransport::bind(&reply_socket)?;

    let outcome = async {
        transport
            .send(
                &target.to_string_lossy(),
                Message::Objective(ObjectiveRequest {
                    user_id,
                    objective,
                    metadata: Default::default(),
                }),
            )
            .await?;
        wait_for_reply(&mut inbox, wait).await
    }
    .await;
    let _ = std::fs::remove_file(&reply_socket);

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

async fn wait_for_reply(
    inbox: &mut Inbox,
    wait: Duration,
) -> Result<taskbridge_protocol::ObjectiveResponse> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let envelope = tokio::time::timeout_at(deadline, inbox.recv())
            .await
            .context("timed out waiting for the orchestrator")?
            .context("reply socket closed")?;
        match envelope.body {
            Message::ObjectiveReply(reply) => return Ok(reply),
            other => warn!("Ignoring {} from {}", other.kind(), envelope.from),
        }
    }
}
