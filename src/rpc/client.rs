//! JSON-RPC client — spec §4.B.
//!
//! One instance per child LSP process. A reader task decodes frames and
//! dispatches them (to a pending-request completion, a notification
//! listener, or the default server-to-client request table); a writer task
//! serializes everything going out so stdin sees one frame at a time no
//! matter how many callers are concurrently in `send_request`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::DaemonError;
use crate::rpc::frame::{read_frame, write_frame};

/// Default per-request deadline, overridable via `LSPCMD_REQUEST_TIMEOUT`.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub fn default_timeout() -> Duration {
    std::env::var("LSPCMD_REQUEST_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, DaemonError>>>>>;

/// A notification or server-to-client request forwarded to the owning
/// `Workspace`. `id` is `Some` for requests (a response is expected back
/// through [`LspClient::respond`]), `None` for notifications.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Running,
    Closed,
}

/// Transport-level JSON-RPC client bound to one child process's stdio.
pub struct LspClient {
    next_id: AtomicI64,
    pending: PendingMap,
    outgoing: mpsc::UnboundedSender<Value>,
    state: Arc<Mutex<ClientState>>,
    child: Arc<Mutex<Option<Child>>>,
    server_name: String,
}

impl LspClient {
    /// Spawn `command` with `args` in `cwd` and start the reader/writer
    /// tasks. Server-to-client requests and notifications are delivered on
    /// `server_messages`.
    pub async fn spawn(
        server_name: &str,
        command: &str,
        args: &[String],
        cwd: &std::path::Path,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), DaemonError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(DaemonError::Io)?;
        let stdin: ChildStdin = child.stdin.take().expect("piped stdin");
        let stdout: ChildStdout = child.stdout.take().expect("piped stdout");
        let stderr: ChildStderr = child.stderr.take().expect("piped stderr");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let state = Arc::new(Mutex::new(ClientState::Running));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Value>();
        let (server_tx, server_rx) = mpsc::unbounded_channel::<ServerMessage>();

        spawn_writer_task(stdin, outgoing_rx);
        spawn_reader_task(
            stdout,
            pending.clone(),
            server_tx,
            state.clone(),
            server_name.to_string(),
        );
        spawn_stderr_drain(stderr, server_name.to_string());

        Ok((
            Self {
                next_id: AtomicI64::new(1),
                pending,
                outgoing: outgoing_tx,
                state,
                child: Arc::new(Mutex::new(Some(child))),
                server_name: server_name.to_string(),
            },
            server_rx,
        ))
    }

    /// Send a request and await the correlated response, subject to
    /// `timeout`. On expiry the pending entry is removed; a late-arriving
    /// response is dropped.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, DaemonError> {
        if *self.state.lock().await != ClientState::Running {
            return Err(DaemonError::ConnectionClosed(self.server_name.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if self.outgoing.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(DaemonError::ConnectionClosed(self.server_name.clone()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DaemonError::ConnectionClosed(self.server_name.clone())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(DaemonError::Timeout(timeout))
            }
        }
    }

    /// Send a notification. Fire-and-forget; serialized after any
    /// already-enqueued request from this client.
    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), DaemonError> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.outgoing
            .send(message)
            .map_err(|_| DaemonError::ConnectionClosed(self.server_name.clone()))
    }

    /// Answer a server-to-client request received via `ServerMessage`.
    pub fn respond(&self, id: Value, result: Value) -> Result<(), DaemonError> {
        let message = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        self.outgoing
            .send(message)
            .map_err(|_| DaemonError::ConnectionClosed(self.server_name.clone()))
    }

    /// Answer a server-to-client request with a JSON-RPC error (used for
    /// unrecognized reverse-request methods — method-not-found).
    pub fn respond_error(&self, id: Value, code: i64, message: &str) -> Result<(), DaemonError> {
        let out = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        });
        self.outgoing
            .send(out)
            .map_err(|_| DaemonError::ConnectionClosed(self.server_name.clone()))
    }

    /// Fail every pending request with `ConnectionClosed` and mark the
    /// client closed. Called by the reader task on EOF, and on shutdown.
    pub async fn cancel_all_pending(&self, reason: DaemonError) {
        *self.state.lock().await = ClientState::Closed;
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(clone_error(&reason)));
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.state.lock().await == ClientState::Running
    }

    /// Best-effort `shutdown`/`exit` sequence, then kill if the process
    /// hasn't exited within the grace period.
    pub async fn shutdown(&self) {
        let _ = self
            .send_request("shutdown", Value::Null, Duration::from_secs(5))
            .await;
        let _ = self.send_notification("exit", Value::Null);
        self.cancel_all_pending(DaemonError::ConnectionClosed(self.server_name.clone()))
            .await;

        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            let exited = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
            if exited.is_err() {
                let _ = child.kill().await;
            }
        }
        *guard = None;
    }
}

fn clone_error(e: &DaemonError) -> DaemonError {
    match e {
        DaemonError::ConnectionClosed(s) => DaemonError::ConnectionClosed(s.clone()),
        DaemonError::Protocol(s) => DaemonError::Protocol(s.clone()),
        other => DaemonError::Protocol(other.to_string()),
    }
}

fn spawn_writer_task(stdin: ChildStdin, mut outgoing: mpsc::UnboundedReceiver<Value>) {
    tokio::spawn(async move {
        let mut stdin = stdin;
        while let Some(message) = outgoing.recv().await {
            if let Err(e) = write_frame(&mut stdin, &message).await {
                warn!(error = %e, "lsp writer: failed to send frame, stopping");
                break;
            }
        }
    });
}

fn spawn_reader_task(
    stdout: ChildStdout,
    pending: PendingMap,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    state: Arc<Mutex<ClientState>>,
    server_name: String,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(value)) => dispatch(&value, &pending, &server_tx).await,
                Ok(None) => {
                    debug!(server = %server_name, "lsp reader: EOF");
                    break;
                }
                Err(e) => {
                    warn!(server = %server_name, error = %e, "lsp reader: protocol error");
                    break;
                }
            }
        }

        *state.lock().await = ClientState::Closed;
        let mut pending = pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(DaemonError::ConnectionClosed(server_name.clone())));
        }
    });
}

async fn dispatch(
    value: &Value,
    pending: &PendingMap,
    server_tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let id = value.get("id").cloned();
    let method = value.get("method").and_then(|m| m.as_str());

    match (id, method) {
        (Some(id), None) => {
            // Response to one of our requests.
            let Some(numeric_id) = id.as_i64() else {
                return;
            };
            let sender = pending.lock().await.remove(&numeric_id);
            if let Some(tx) = sender {
                let result = if let Some(error) = value.get("error") {
                    let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown LSP error")
                        .to_string();
                    Err(DaemonError::LspResponse { code, message })
                } else {
                    Ok(value.get("result").cloned().unwrap_or(Value::Null))
                };
                let _ = tx.send(result);
            }
            // A response with no matching pending entry (already timed out)
            // is dropped silently, per §4.B Timeouts.
        }
        (id, Some(method)) => {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            let _ = server_tx.send(ServerMessage {
                id,
                method: method.to_string(),
                params,
            });
        }
        (None, None) => {
            // Malformed message with neither id nor method; nothing to do.
        }
    }
}

/// Background task draining a child's stderr into the tracing log sink so
/// the pipe never backs up and blocks the server.
fn spawn_stderr_drain(stderr: ChildStderr, server_name: String) {
    use tokio::io::AsyncBufReadExt;
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %server_name, "{line}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_initialize_roundtrip() {
        // `cat` echoes nothing useful as an LSP server, but we can at least
        // confirm the process spawns and a request times out cleanly rather
        // than hanging forever.
        let (client, _rx) = LspClient::spawn("test", "cat", &[], std::path::Path::new("."))
            .await
            .unwrap();
        let result = client
            .send_request("initialize", json!({}), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(DaemonError::Timeout(_))));
        client.shutdown().await;
    }

    #[test]
    fn default_timeout_parses_env_override() {
        std::env::set_var("LSPCMD_REQUEST_TIMEOUT", "7");
        assert_eq!(default_timeout(), Duration::from_secs(7));
        std::env::remove_var("LSPCMD_REQUEST_TIMEOUT");
        assert_eq!(default_timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }
}
