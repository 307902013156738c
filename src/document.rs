//! Document tracker — spec §4.C.
//!
//! Owned by a `Workspace`. Invariant: for every open document the server
//! has been sent exactly the text at the current version.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::json;
use tokio::sync::Mutex;

use crate::error::DaemonError;
use crate::rpc::LspClient;
use crate::uri::path_to_uri;

#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
    pub opened_at: Instant,
}

pub struct DocumentTracker {
    open: Mutex<HashMap<PathBuf, Document>>,
}

impl DocumentTracker {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Open `path` if not already open; a no-op otherwise (idempotent under
    /// concurrent callers — the lock serializes them and the second caller
    /// observes the first's entry).
    pub async fn ensure_open(
        &self,
        client: &LspClient,
        path: &Path,
        language_id: &str,
    ) -> Result<Document, DaemonError> {
        let mut open = self.open.lock().await;
        if let Some(doc) = open.get(path) {
            return Ok(doc.clone());
        }

        let text = tokio::fs::read_to_string(path).await.map_err(DaemonError::Io)?;
        let uri = path_to_uri(path);
        let doc = Document {
            path: path.to_path_buf(),
            uri: uri.clone(),
            language_id: language_id.to_string(),
            version: 1,
            text: text.clone(),
            opened_at: Instant::now(),
        };

        client.send_notification(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": 1,
                    "text": text,
                }
            }),
        )?;

        open.insert(path.to_path_buf(), doc.clone());
        Ok(doc)
    }

    /// Replace the open document's text wholesale and bump its version.
    /// Full-text `didChange` is simpler than incremental diffing and
    /// sufficient for this workload (§4.C).
    pub async fn update_text(
        &self,
        client: &LspClient,
        path: &Path,
        new_text: String,
    ) -> Result<(), DaemonError> {
        let mut open = self.open.lock().await;
        let doc = open
            .get_mut(path)
            .ok_or_else(|| DaemonError::InvalidInput(format!("document not open: {}", path.display())))?;
        doc.version += 1;
        doc.text = new_text.clone();

        client.send_notification(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": doc.uri, "version": doc.version },
                "contentChanges": [{ "text": new_text }],
            }),
        )
    }

    pub async fn close(&self, client: &LspClient, path: &Path) -> Result<(), DaemonError> {
        let mut open = self.open.lock().await;
        if let Some(doc) = open.remove(path) {
            client.send_notification(
                "textDocument/didClose",
                json!({ "textDocument": { "uri": doc.uri } }),
            )?;
        }
        Ok(())
    }

    pub async fn close_all(&self, client: &LspClient) {
        let paths: Vec<PathBuf> = self.open.lock().await.keys().cloned().collect();
        for path in paths {
            let _ = self.close(client, &path).await;
        }
    }

    pub async fn is_open(&self, path: &Path) -> bool {
        self.open.lock().await.contains_key(path)
    }

    pub async fn get(&self, path: &Path) -> Option<Document> {
        self.open.lock().await.get(path).cloned()
    }

    pub async fn open_paths(&self) -> Vec<PathBuf> {
        self.open.lock().await.keys().cloned().collect()
    }
}

impl Default for DocumentTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_starts_empty() {
        let tracker = DocumentTracker::new();
        assert_eq!(tracker.open.blocking_lock().len(), 0);
    }
}
