#![forbid(unsafe_code)]

//! `status-relay`: Server-Sent Events status relay binary.
//!
//! Bootstraps configuration and tracing, binds the HTTP listener, and serves
//! `/sse/{id}` streams until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use status_relay::config::GlobalConfig;
use status_relay::http::{server, AppState};
use status_relay::{AppError, Result};

/// How long in-flight streams may keep the process alive after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "status-relay", about = "SSE status relay server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the HTTP port from the configuration.
    #[arg(long)]
    port: Option<u16>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("status-relay server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.validate()?;
    info!(
        heartbeat_ms = config.stream.heartbeat_interval_ms,
        deadline_ms = config.stream.deadline_ms,
        with_completion = config.stream.with_completion,
        "configuration loaded"
    );

    // ── Bind listener ───────────────────────────────────
    let addr = config.bind_addr()?;
    let listener = server::bind(addr).await.map_err(|err| {
        error!(%err, "listener bind failed");
        err
    })?;

    let state = Arc::new(AppState::new(config));
    let ct = CancellationToken::new();
    let mut server_handle = tokio::spawn(server::serve(listener, Arc::clone(&state), ct.clone()));

    // ── Wait for shutdown signal or server failure ──────
    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
        }
        joined = &mut server_handle => {
            return flatten_server_result(joined);
        }
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await {
        Ok(joined) => flatten_server_result(joined)?,
        Err(_) => warn!(
            active_sessions = state.counters.active_sessions(),
            "streams still open after shutdown grace period; exiting"
        ),
    }

    info!("status-relay shut down");
    Ok(())
}

fn flatten_server_result(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|err| AppError::Listener(format!("server task failed: {err}")))?
}

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
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
