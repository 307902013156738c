//! Workspace — spec §4.D.
//!
//! One `Workspace` owns a single child LSP process for one `(root,
//! language)` pair: its [`LspClient`], the set of open documents, and its
//! negotiated capabilities. Grounded on the lifecycle `LspProxy::start_server`
//! / `stop_server` establish in `lsp_teacher_ref/proxy.rs`, generalized from
//! the teacher's synchronous `Mutex<HashMap>` pool entry to an owned,
//! async-native value the `Session` hands out behind an `Arc`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::config::LanguageServerConfig;
use crate::document::DocumentTracker;
use crate::error::DaemonError;
use crate::rpc::client::default_timeout;
use crate::rpc::{LspClient, ServerMessage};
use crate::uri::path_to_uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Created,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

/// One language server instance scoped to one workspace root.
pub struct Workspace {
    pub root: PathBuf,
    pub language_id: String,
    config: LanguageServerConfig,
    state: RwLock<WorkspaceState>,
    client: RwLock<Option<Arc<LspClient>>>,
    pub documents: DocumentTracker,
    capabilities: RwLock<Value>,
    ready_started: AtomicBool,
}

impl Workspace {
    pub fn new(root: PathBuf, config: LanguageServerConfig) -> Self {
        Self {
            root,
            language_id: config.language_id.clone(),
            config,
            state: RwLock::new(WorkspaceState::Created),
            client: RwLock::new(None),
            documents: DocumentTracker::new(),
            capabilities: RwLock::new(Value::Null),
            ready_started: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> WorkspaceState {
        *self.state.read().await
    }

    /// Spawn the configured server and run the `initialize` handshake.
    /// Idempotent: a second call while already starting or ready is a no-op.
    pub async fn start(&self) -> Result<(), DaemonError> {
        if self.ready_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.state.write().await = WorkspaceState::Starting;

        let (command, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| DaemonError::InvalidInput(format!("empty command for {}", self.language_id)))?;

        let (client, mut server_messages) =
            LspClient::spawn(&self.language_id, command, args, &self.root).await?;

        let root_uri = path_to_uri(&self.root);
        let init_result = client
            .send_request(
                "initialize",
                json!({
                    "processId": std::process::id(),
                    "rootUri": root_uri,
                    "rootPath": self.root.to_string_lossy(),
                    "capabilities": default_client_capabilities(),
                    "initializationOptions": self.config.init_options,
                }),
                default_timeout(),
            )
            .await;

        let result = match init_result {
            Ok(result) => result,
            Err(e) => {
                *self.state.write().await = WorkspaceState::Stopped;
                self.ready_started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        client.send_notification("initialized", json!({}))?;

        *self.capabilities.write().await = result.get("capabilities").cloned().unwrap_or(Value::Null);
        let client = Arc::new(client);
        *self.client.write().await = Some(client.clone());
        *self.state.write().await = WorkspaceState::Ready;

        // Drain server-to-client requests/notifications so the channel
        // doesn't back up, answering reverse requests from the default
        // table (§4.B) — a server blocked on e.g. `workDoneProgress/create`
        // would otherwise stall forever.
        let language_id = self.language_id.clone();
        tokio::spawn(async move {
            drain_server_messages(&language_id, client, &mut server_messages).await;
        });

        info!(language = %self.language_id, root = %self.root.display(), "workspace ready");
        Ok(())
    }

    /// Block until `start` has completed (or the process has already died).
    pub async fn wait_for_service_ready(&self, timeout: Duration) -> Result<(), DaemonError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.state().await {
                WorkspaceState::Ready => return Ok(()),
                WorkspaceState::Stopped => {
                    return Err(DaemonError::ConnectionClosed(self.language_id.clone()))
                }
                _ => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(DaemonError::Timeout(timeout));
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
    }

    pub async fn client(&self) -> Result<tokio::sync::RwLockReadGuard<'_, Option<Arc<LspClient>>>, DaemonError> {
        let guard = self.client.read().await;
        if guard.is_none() {
            return Err(DaemonError::ConnectionClosed(self.language_id.clone()));
        }
        Ok(guard)
    }

    pub async fn capabilities(&self) -> Value {
        self.capabilities.read().await.clone()
    }

    /// Reject documents outside this workspace's root — §4.D.
    pub fn contains_path(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    pub async fn ensure_document_open(&self, path: &Path) -> Result<(), DaemonError> {
        if !self.contains_path(path) {
            return Err(DaemonError::InvalidInput(format!(
                "{} is outside workspace root {}",
                path.display(),
                self.root.display()
            )));
        }
        let guard = self.client().await?;
        let client = guard.as_ref().unwrap();
        self.documents
            .ensure_open(client, path, &self.language_id)
            .await?;
        Ok(())
    }

    /// Close every open document, then gracefully shut down the client.
    pub async fn stop(&self) {
        *self.state.write().await = WorkspaceState::Stopping;
        if let Some(client) = self.client.read().await.as_ref() {
            self.documents.close_all(client).await;
            client.shutdown().await;
        }
        *self.client.write().await = None;
        self.ready_started.store(false, Ordering::SeqCst);
        *self.state.write().await = WorkspaceState::Stopped;
    }

    pub async fn restart(&self) -> Result<(), DaemonError> {
        self.stop().await;
        self.start().await
    }
}

/// Answers server-to-client requests from the default table (§4.B) even
/// though no feature of this daemon needs any of them acted on; a server
/// that never gets a reply here will sit blocked rather than proceed.
async fn drain_server_messages(
    language_id: &str,
    client: Arc<LspClient>,
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let Some(id) = msg.id else {
            // Notification — nothing to answer.
            continue;
        };

        let send_result = match default_response_for(&msg.method, &msg.params) {
            Ok(value) => client.respond(id, value),
            Err(method) => {
                warn!(language = %language_id, method = %method, "unrecognized server-to-client request");
                client.respond_error(id, -32601, &format!("method not found: {method}"))
            }
        };

        if let Err(e) = send_result {
            warn!(language = %language_id, error = %e, "failed to answer server-to-client request");
            break;
        }
    }
}

/// The default reverse-request table — §4.B, §9. `Err` carries the
/// unrecognized method name so the caller can answer method-not-found.
fn default_response_for(method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "window/workDoneProgress/create" => Ok(Value::Null),
        "client/registerCapability" => Ok(Value::Null),
        "workspace/configuration" => {
            let count = params
                .get("items")
                .and_then(|items| items.as_array())
                .map(|items| items.len())
                .unwrap_or(0);
            Ok(Value::Array(vec![Value::Null; count]))
        }
        other => Err(other.to_string()),
    }
}

/// Minimal client capabilities sufficient for the operations this daemon
/// issues (document sync, symbols, hover, definitions, call/type hierarchy,
/// rename via `workspace/applyEdit` is not advertised — edits are applied
/// locally, §4.I).
fn default_client_capabilities() -> Value {
    json!({
        "textDocument": {
            "synchronization": { "didSave": false, "willSave": false },
            "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
            "hover": { "contentFormat": ["markdown", "plaintext"] },
            "definition": { "linkSupport": false },
            "references": {},
            "callHierarchy": {},
            "typeHierarchy": {},
            "rename": {},
        },
        "workspace": {
            "workspaceFolders": false,
            "symbol": {},
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LanguageServerConfig {
        crate::config::builtin_defaults()
            .into_iter()
            .find(|c| c.language_id == "rust")
            .unwrap()
    }

    #[test]
    fn new_workspace_starts_in_created_state() {
        let ws = Workspace::new(PathBuf::from("/tmp/proj"), test_config());
        assert!(!ws.ready_started.load(Ordering::SeqCst));
    }

    #[test]
    fn contains_path_rejects_outside_root() {
        let ws = Workspace::new(PathBuf::from("/tmp/proj"), test_config());
        assert!(ws.contains_path(Path::new("/tmp/proj/src/main.rs")));
        assert!(!ws.contains_path(Path::new("/tmp/other/main.rs")));
    }

    #[test]
    fn default_response_for_work_done_progress_is_null() {
        assert_eq!(
            default_response_for("window/workDoneProgress/create", &Value::Null),
            Ok(Value::Null)
        );
    }

    #[test]
    fn default_response_for_register_capability_is_null() {
        assert_eq!(
            default_response_for("client/registerCapability", &json!({"registrations": []})),
            Ok(Value::Null)
        );
    }

    #[test]
    fn default_response_for_configuration_matches_item_count() {
        let params = json!({ "items": [{"section": "a"}, {"section": "b"}] });
        assert_eq!(
            default_response_for("workspace/configuration", &params),
            Ok(Value::Array(vec![Value::Null, Value::Null]))
        );
    }

    #[test]
    fn default_response_for_unknown_method_is_an_error() {
        assert_eq!(
            default_response_for("some/unknownMethod", &Value::Null),
            Err("some/unknownMethod".to_string())
        );
    }
}
