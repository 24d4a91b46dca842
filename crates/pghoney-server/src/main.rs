//! pghoney: a low-interaction PostgreSQL decoy.
//!
//! Speaks just enough of the startup handshake to collect usernames and
//! passwords from scanners, always refuses the login, and optionally mirrors
//! every inbound window to an hpfeeds broker.

mod config;
mod connection;
mod server;
mod telemetry;

use anyhow::Context;
use clap::Parser;
use config::ServerConfig;
use pghoney_core::UserRegistry;
use server::DecoyServer;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use telemetry::{queue, HpfeedsSink, LinearBackoff, TelemetryForwarder};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How long the forwarder may keep publishing after the listener is gone.
const FORWARDER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// pghoney: PostgreSQL decoy
#[derive(Parser, Debug)]
#[command(name = "pghoney", version, about = "Low-interaction PostgreSQL decoy")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "pghoney.toml")]
    config: String,

    /// Listen address
    #[arg(long)]
    address: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging (same as --log-level debug)
    #[arg(short, long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let server_config = match ServerConfig::load(
        Some(Path::new(&cli.config)),
        cli.address.as_deref(),
        cli.port,
        cli.debug,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(cli.log_level.as_deref(), cli.debug);
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    init_tracing(cli.log_level.as_deref(), server_config.debug);

    info!(version = env!("CARGO_PKG_VERSION"), "starting pghoney");

    if let Err(e) = run(server_config).await {
        error!(error = %format!("{e:#}"), "fatal");
        std::process::exit(1);
    }
    info!("pghoney stopped");
}

/// `RUST_LOG` wins, then `--log-level`, then `debug` when debugging.
fn init_tracing(log_level: Option<&str>, debug: bool) {
    use tracing_subscriber::EnvFilter;
    let fallback = log_level.unwrap_or(if debug { "debug" } else { "info" });
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let registry = Arc::new(UserRegistry::new(config.users.iter().cloned()));
    if registry.is_empty() {
        warn!("no users configured, every startup will be refused");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (events, forwarder) = match &config.hpfeeds {
        Some(hp) => {
            let (queue, rx) = queue::channel(hp.queue_capacity);
            let sink = HpfeedsSink::new(&hp.host, hp.port, &hp.ident, &hp.secret);
            let forwarder =
                TelemetryForwarder::new(sink, &hp.channel, rx, LinearBackoff::default());
            (Some(queue), Some(tokio::spawn(forwarder.run(shutdown_rx.clone()))))
        }
        None => {
            info!("hpfeeds disabled, telemetry off");
            (None, None)
        }
    };

    let server = DecoyServer::bind(&config, registry, events)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    // Returns after the drain; the server's EventQueue handles are gone by then.
    server.run(shutdown_rx).await;

    if let Some(handle) = forwarder {
        match tokio::time::timeout(FORWARDER_STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "telemetry forwarder failed"),
            Err(_) => warn!("telemetry forwarder did not stop in time, pending events lost"),
        }
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
