//! `execd` Daemon
//!
//! Runs commands on behalf of local callers and serves the `Executor` gRPC
//! API on a Unix socket. Unix only.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use execd_daemon::server::{GrpcServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "execd-daemon")]
#[command(version, about = "execd daemon - remote process execution over a Unix socket")]
struct Args {
    /// Unix socket to listen on
    #[arg(long, env = "EXECD_SOCKET")]
    socket: Option<PathBuf>,

    /// JSON settings file layered over the global config
    #[arg(long, env = "EXECD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "EXECD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// Kill and drop sessions idle for this many seconds (disabled by default).
    #[arg(long, env = "EXECD_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = execd_core::config::load_config(args.config.as_deref())?.daemon;
    if let Some(socket) = args.socket {
        settings.socket_path = Some(socket);
    }
    if let Some(level) = args.log_level {
        settings.log_level = level;
    }
    if args.idle_timeout.is_some() {
        settings.idle_session_timeout_secs = args.idle_timeout;
    }
    settings.log_json |= args.log_json;

    let log_filter = format!("execd_daemon={}", settings.log_level);
    execd_core::tracing_init::init_tracing(&log_filter, settings.log_json);

    let config = ServerConfig::from_daemon(&settings);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %config.socket_path.display(),
        idle_timeout = ?config.reaper.map(|r| r.max_idle),
        "Starting execd-daemon"
    );

    let server = GrpcServer::new(config);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
            _ = sigterm.recv() => info!("Received SIGTERM shutdown signal"),
        }
    };

    // Notify systemd that the daemon is about to serve. The `true` parameter
    // unsets $NOTIFY_SOCKET so spawned commands don't inherit it.
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        tracing::debug!(error = %e, "sd_notify unavailable");
    }

    server.serve_unix(shutdown).await?;
    info!("Daemon stopped");
    Ok(())
}
