//! Inbound RPC transport — the "external collaborator" spec.md §1/§6 treats
//! as thin glue: "line-delimited JSON over a socket".
//!
//! Kept deliberately minimal compared to the teacher's `ipc/mod.rs`: no
//! WebSocket upgrade, no auth handshake, no per-connection rate limiter —
//! those are the teacher's answer to "many untrusted remote clients", which
//! doesn't apply to a local daemon speaking to one CLI front-end over a Unix
//! domain socket. What's carried over is the *shape*: bind once, accept in a
//! loop, spawn one task per connection, decode a JSON envelope, dispatch by
//! method string, write the JSON result back — and a `tokio::select!` against
//! a shutdown signal so the accept loop actually stops.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::handlers::{self, AppContext};

#[derive(Deserialize)]
struct RpcRequest {
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Bind `socket_path` (removing a stale file left by an unclean previous
/// exit) and serve requests until `ctx.shutdown` fires.
pub async fn run(ctx: Arc<AppContext>, socket_path: &Path) -> anyhow::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(socket = %socket_path.display(), "IPC server listening");

    loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown.notified() => {
                info!("shutdown signal received — stopping IPC server");
                break;
            }

            conn = listener.accept() => {
                let stream = match conn {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(err = %e, "connection error");
                    }
                });
            }
        }
    }

    ctx.session.close_all().await;
    let _ = std::fs::remove_file(socket_path);
    info!("IPC server stopped");
    Ok(())
}

async fn handle_connection(stream: UnixStream, ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch_line(&line, &ctx).await;
        write_half.write_all(response.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }

    Ok(())
}

/// Decode one request line, dispatch it, and serialize the `{id, result}` or
/// `{id, error}` envelope. Never returns `Err` — malformed input becomes an
/// error envelope rather than dropping the connection.
async fn dispatch_line(line: &str, ctx: &AppContext) -> String {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return serde_json::json!({
                "id": Value::Null,
                "error": { "kind": "InvalidInput", "message": format!("parse error: {e}") },
            })
            .to_string();
        }
    };

    let id = request.id.unwrap_or(Value::Null);
    debug!(method = %request.method, "rpc dispatch");

    match handlers::dispatch(ctx, &request.method, request.params).await {
        Ok(result) => serde_json::json!({ "id": id, "result": result }).to_string(),
        Err(e) => serde_json::json!({
            "id": id,
            "error": { "kind": e.wire_kind(), "message": e.to_string() },
        })
        .to_string(),
    }
}

/// Default socket path: `$XDG_RUNTIME_DIR/lspcmd.sock`, falling back to
/// `/tmp/lspcmd-<user>.sock` when unset, mirroring the teacher's
/// `DaemonConfig` env-over-default layering for its port.
pub fn default_socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir).join("lspcmd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "lspcmd".to_string());
    PathBuf::from(format!("/tmp/lspcmd-{user}.sock"))
}
