use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use lspcmd_daemon::cache::{Caches, DEFAULT_HOVER_CACHE_BYTES, DEFAULT_SYMBOLS_CACHE_BYTES};
use lspcmd_daemon::config::ServerConfigs;
use lspcmd_daemon::ipc;
use lspcmd_daemon::{AppContext, Session};

#[derive(Parser)]
#[command(
    name = "lspcmdd",
    about = "Long-lived daemon multiplexing LSP servers behind one query/refactor RPC surface",
    version
)]
struct Args {
    /// Unix domain socket path to listen on.
    #[arg(long, env = "LSPCMD_SOCKET")]
    socket: Option<PathBuf>,

    /// Directory holding `servers.toml` (defaults to `$XDG_CONFIG_HOME/lspcmd`).
    #[arg(long, env = "LSPCMD_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LSPCMD_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log);

    info!(version = env!("CARGO_PKG_VERSION"), "lspcmdd starting");

    let configs = ServerConfigs::load(args.config_dir);
    let session = Arc::new(Session::new(configs));
    let caches = Arc::new(Caches::new(DEFAULT_HOVER_CACHE_BYTES, DEFAULT_SYMBOLS_CACHE_BYTES));
    let shutdown = Arc::new(Notify::new());

    let ctx = Arc::new(AppContext {
        session: session.clone(),
        caches,
        started_at: Instant::now(),
        shutdown: shutdown.clone(),
    });

    // Honor SIGTERM/Ctrl-C the same way the `shutdown` RPC does, so either
    // path drains workspaces and stops the accept loop identically.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("signal received — shutting down");
            shutdown.notify_waiters();
        });
    }

    let socket_path = args.socket.unwrap_or_else(ipc::default_socket_path);
    let result = ipc::run(ctx, &socket_path).await;
    if let Err(e) = &result {
        warn!(err = %e, "ipc server exited with error");
    }
    result
}

/// Resolves on SIGTERM (Unix) or Ctrl-C (all platforms) — mirrors the
/// teacher's `make_shutdown_future`.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

fn setup_logging(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(log_level.to_string())
        .compact()
        .init();
}
