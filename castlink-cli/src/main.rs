//! castlink command-line client entry point.
//!
//! ```text
//! castlink resolve               Resolve and probe the configured host
//! castlink probe --port <port>   Timed TCP connect to host:port
//! castlink connect               Bring a session up, stop on Ctrl-C
//! castlink --config <path>       Use custom config TOML
//! castlink --gen-config [path]   Write default config (stdout without a path)
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use castlink_core::net::{
    connect_tcp_socket, is_private_network_address, resolve_host_name, url_safe_host,
    url_safe_string,
};
use castlink_core::{
    CallbackSet, ConnectionListener, DecoderFlags, ErrorCode, Session, Stage,
};

use castlink_cli::config::CliConfig;
use castlink_cli::probing::ProbingSubsystems;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "castlink", about = "Game-streaming host connection tool")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "castlink.toml")]
    config: PathBuf,

    /// Host name or address (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Write the default configuration to PATH, or print it when no
    /// path is given, and exit.
    #[arg(long, value_name = "PATH")]
    gen_config: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the host and print the address a session would use.
    Resolve,
    /// Connect to a TCP port on the host with the configured timeout.
    Probe {
        #[arg(short, long)]
        port: u16,
    },
    /// Bring a full session up and hold it until Ctrl-C.
    Connect,
}

// ── Listener ─────────────────────────────────────────────────────

/// Logs lifecycle events, remembers whether the connection dropped and
/// wakes `connect` when it does.
#[derive(Default)]
struct LoggingListener {
    terminated: Mutex<Option<ErrorCode>>,
    lost: Notify,
}

impl ConnectionListener for LoggingListener {
    fn stage_starting(&self, stage: Stage) {
        info!("starting {stage}");
    }

    fn stage_failed(&self, stage: Stage, code: ErrorCode) {
        error!("{stage} failed with code {code}");
    }

    fn connection_started(&self) {
        info!("connection established; press Ctrl-C to disconnect");
    }

    fn connection_terminated(&self, code: ErrorCode) {
        warn!("connection terminated with code {code}");
        if let Ok(mut slot) = self.terminated.lock() {
            *slot = Some(code);
        }
        self.lost.notify_one();
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.gen_config {
        Some(Some(path)) => {
            CliConfig::write_default(&path)?;
            println!("wrote default config to {}", path.display());
            return Ok(());
        }
        Some(None) => {
            println!("{}", CliConfig::default_toml()?);
            return Ok(());
        }
        None => {}
    }

    let mut config = CliConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.network.host = host;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("castlink v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Command::Resolve) {
        Command::Resolve => resolve(&config).await,
        Command::Probe { port } => probe(&config, port).await,
        Command::Connect => connect(config).await,
    }
}

// ── Subcommands ──────────────────────────────────────────────────

async fn resolve(config: &CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    let host = config.network.host.clone();
    let stream = config.stream_configuration();
    let addr = tokio::task::spawn_blocking(move || {
        resolve_host_name(&host, stream.address_family, stream.reachability)
    })
    .await??;

    let ip = addr.ip();
    let scope = if is_private_network_address(&ip) { "private" } else { "public" };
    println!("{} -> {} ({scope})", config.network.host, url_safe_host(&ip));
    Ok(())
}

async fn probe(config: &CliConfig, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let host = config.network.host.clone();
    let stream = config.stream_configuration();
    let timeout = config.connect_timeout();

    let (addr, elapsed) = tokio::task::spawn_blocking(move || {
        let mut addr = resolve_host_name(&host, stream.address_family, None)?;
        addr.set_port(port);
        let started = Instant::now();
        connect_tcp_socket(addr, timeout).map(|_| (addr, started.elapsed()))
    })
    .await??;

    println!("{} reachable in {elapsed:?}", url_safe_string(&addr));
    Ok(())
}

async fn connect(config: CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    let listener = Arc::new(LoggingListener::default());
    let callbacks = CallbackSet::new().with_listener(listener.clone());
    let subsystems = ProbingSubsystems::new(config.ports.clone(), config.connect_timeout());
    let session = Arc::new(Mutex::new(Session::new(Box::new(subsystems))));

    let started = tokio::task::spawn_blocking({
        let session = session.clone();
        let stream = config.stream_configuration();
        let host = config.network.host.clone();
        let version = config.network.server_major_version;
        move || {
            let mut session = session.lock().map_err(|_| "session lock poisoned")?;
            session
                .start(&host, &stream, &callbacks, None, DecoderFlags::empty(), version)
                .map_err(|e| e.to_string())
        }
    })
    .await?;
    started?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("disconnecting");
        }
        _ = listener.lost.notified() => {
            info!("tearing down after connection loss");
        }
    }

    tokio::task::spawn_blocking(move || {
        if let Ok(mut session) = session.lock() {
            session.stop();
        }
    })
    .await?;

    if let Ok(slot) = listener.terminated.lock() {
        if let Some(code) = *slot {
            return Err(format!("connection lost with code {code}").into());
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
