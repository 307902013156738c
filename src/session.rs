//! Session — spec §4.E.
//!
//! Top-level `rootPath -> (languageId -> Workspace)` registry, generalizing
//! the teacher's single global `LSP_PROXY: OnceLock<LspProxy>` pool
//! (`lsp_teacher_ref/handlers.rs`) into a value owned by the daemon rather
//! than a process-wide static, so multiple `Session`s can coexist in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::config::ServerConfigs;
use crate::error::DaemonError;
use crate::workspace::Workspace;

/// Single-flight latch per `(root, language)` so concurrent callers asking
/// for the same workspace block on one spawn instead of racing (§5).
type SpawnLatch = Arc<Mutex<()>>;

pub struct Session {
    configs: ServerConfigs,
    workspaces: RwLock<HashMap<(PathBuf, String), Arc<Workspace>>>,
    latches: Mutex<HashMap<(PathBuf, String), SpawnLatch>>,
}

impl Session {
    pub fn new(configs: ServerConfigs) -> Self {
        Self {
            configs,
            workspaces: RwLock::new(HashMap::new()),
            latches: Mutex::new(HashMap::new()),
        }
    }

    async fn latch_for(&self, key: &(PathBuf, String)) -> SpawnLatch {
        let mut latches = self.latches.lock().await;
        latches
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return the existing workspace for `(root, language_id)`, spawning one
    /// if absent. Concurrent callers for the same key observe exactly one
    /// spawn: the second caller blocks on the first's latch and then finds
    /// the workspace already registered.
    pub async fn get_or_create_workspace_for_language(
        &self,
        root: &Path,
        language_id: &str,
    ) -> Result<Arc<Workspace>, DaemonError> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let key = (root.clone(), language_id.to_string());

        if let Some(ws) = self.workspaces.read().await.get(&key) {
            return Ok(ws.clone());
        }

        let latch = self.latch_for(&key).await;
        let _guard = latch.lock().await;

        if let Some(ws) = self.workspaces.read().await.get(&key) {
            return Ok(ws.clone());
        }

        let config = self
            .configs
            .for_language(language_id)
            .ok_or_else(|| DaemonError::InvalidInput(format!("no server configured for language {language_id}")))?
            .clone();

        let workspace = Arc::new(Workspace::new(root.clone(), config));
        workspace.start().await?;

        self.workspaces.write().await.insert(key, workspace.clone());
        Ok(workspace)
    }

    /// Derive the language from `file_path`'s extension via the config
    /// collaborator, then delegate.
    pub async fn get_or_create_workspace(
        &self,
        file_path: &Path,
        root: &Path,
    ) -> Result<Arc<Workspace>, DaemonError> {
        let language_id = self.configs.language_for_file(file_path).ok_or_else(|| {
            DaemonError::InvalidInput(format!(
                "no language server configured for extension of {}",
                file_path.display()
            ))
        })?;
        self.get_or_create_workspace_for_language(root, &language_id).await
    }

    pub async fn workspace_for_language(
        &self,
        root: &Path,
        language_id: &str,
    ) -> Option<Arc<Workspace>> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        self.workspaces
            .read()
            .await
            .get(&(root, language_id.to_string()))
            .cloned()
    }

    pub async fn restart_workspace(&self, root: &Path, language_id: &str) -> Result<(), DaemonError> {
        let ws = self
            .workspace_for_language(root, language_id)
            .await
            .ok_or_else(|| DaemonError::NotFound(format!("no workspace for {language_id} at {}", root.display())))?;
        ws.restart().await
    }

    pub async fn remove_workspace(&self, root: &Path, language_id: &str) -> Result<(), DaemonError> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let key = (root, language_id.to_string());
        let removed = self.workspaces.write().await.remove(&key);
        if let Some(ws) = removed {
            ws.stop().await;
            Ok(())
        } else {
            Err(DaemonError::NotFound(format!(
                "no workspace for {language_id} at {}",
                key.0.display()
            )))
        }
    }

    /// Stop every workspace concurrently and wait for all of them.
    pub async fn close_all(&self) {
        let workspaces: Vec<Arc<Workspace>> = self.workspaces.write().await.drain().map(|(_, v)| v).collect();
        let stops = workspaces.iter().map(|ws| ws.stop());
        futures_util::future::join_all(stops).await;
    }

    pub async fn all_workspaces(&self) -> Vec<Arc<Workspace>> {
        self.workspaces.read().await.values().cloned().collect()
    }

    pub fn configs(&self) -> &ServerConfigs {
        &self.configs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_language_errors() {
        let session = Session::new(ServerConfigs::load(Some(PathBuf::from("/nonexistent"))));
        let result = session
            .get_or_create_workspace_for_language(Path::new("/tmp"), "cobol")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_extension_errors() {
        let session = Session::new(ServerConfigs::load(Some(PathBuf::from("/nonexistent"))));
        let result = session
            .get_or_create_workspace(Path::new("/tmp/README.md"), Path::new("/tmp"))
            .await;
        assert!(result.is_err());
    }
}
