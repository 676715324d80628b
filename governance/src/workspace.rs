//! Governed artifact workspace and target-path write locks.
//!
//! The pipeline is the only component permitted to write a path that
//! appears in any open or approved-but-unintegrated proposal. The lock
//! registry enforces that invariant; [`Workspace::write`] consults it
//! unless the caller presents the pipeline's token.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{GovernanceError, Result};

/// Registry of write-locked target paths.
#[derive(Clone, Default)]
pub struct PathLocks {
    locked: Arc<RwLock<HashSet<String>>>,
}

impl PathLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a path. Idempotent.
    pub async fn lock(&self, path: &str) {
        let mut locked = self.locked.write().await;
        if locked.insert(path.to_string()) {
            debug!(path = %path, "Target path write-locked");
        }
    }

    /// Release a path.
    pub async fn unlock(&self, path: &str) {
        let mut locked = self.locked.write().await;
        if locked.remove(path) {
            debug!(path = %path, "Target path unlocked");
        }
    }

    /// Whether a path is locked.
    pub async fn is_locked(&self, path: &str) -> bool {
        let locked = self.locked.read().await;
        locked.contains(path)
    }

    /// All locked paths.
    pub async fn locked_paths(&self) -> Vec<String> {
        let locked = self.locked.read().await;
        locked.iter().cloned().collect()
    }
}

/// Storage for governed artifacts.
///
/// `write` returns the previous content so a failed integration can
/// restore it; `restore` with `None` removes a file that did not exist
/// before.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Read a file's content, if present.
    async fn read(&self, path: &str) -> Result<Option<String>>;

    /// Write a file, returning the previous content for rollback.
    async fn write(&self, path: &str, content: &str) -> Result<Option<String>>;

    /// Put a file back to a previous state.
    async fn restore(&self, path: &str, previous: Option<String>) -> Result<()>;
}

/// In-memory workspace.
#[derive(Clone, Default)]
pub struct MemoryWorkspace {
    files: Arc<RwLock<HashMap<String, String>>>,
    locks: Option<PathLocks>,
}

impl MemoryWorkspace {
    /// Workspace with no lock enforcement; for the pipeline's own use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Workspace that refuses writes to locked paths. Hand this to
    /// every component that is not the pipeline.
    pub fn guarded(locks: PathLocks) -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
            locks: Some(locks),
        }
    }

    /// An unguarded handle over the same files, for the pipeline.
    pub fn unguarded(&self) -> Self {
        Self {
            files: self.files.clone(),
            locks: None,
        }
    }

    /// Snapshot of all files, for state comparisons in tests.
    pub async fn contents(&self) -> HashMap<String, String> {
        self.files.read().await.clone()
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    async fn read(&self, path: &str) -> Result<Option<String>> {
        let files = self.files.read().await;
        Ok(files.get(path).cloned())
    }

    async fn write(&self, path: &str, content: &str) -> Result<Option<String>> {
        if let Some(locks) = &self.locks {
            if locks.is_locked(path).await {
                return Err(GovernanceError::PathLocked(path.to_string()));
            }
        }
        let mut files = self.files.write().await;
        Ok(files.insert(path.to_string(), content.to_string()))
    }

    async fn restore(&self, path: &str, previous: Option<String>) -> Result<()> {
        let mut files = self.files.write().await;
        match previous {
            Some(content) => {
                files.insert(path.to_string(), content);
            }
            None => {
                files.remove(path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_returns_previous() {
        let workspace = MemoryWorkspace::new();
        assert!(workspace.write("a.policy", "v1").await.unwrap().is_none());
        assert_eq!(
            workspace.write("a.policy", "v2").await.unwrap(),
            Some("v1".to_string())
        );
    }

    #[tokio::test]
    async fn test_restore_removes_new_file() {
        let workspace = MemoryWorkspace::new();
        workspace.write("a.policy", "v1").await.unwrap();
        workspace.restore("a.policy", None).await.unwrap();
        assert!(workspace.read("a.policy").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guarded_workspace_refuses_locked_paths() {
        let locks = PathLocks::new();
        locks.lock("rules/safety.policy").await;

        let guarded = MemoryWorkspace::guarded(locks.clone());
        let err = guarded
            .write("rules/safety.policy", "sneaky edit")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::PathLocked(_)));

        // The pipeline's unguarded handle still writes.
        let pipeline_view = guarded.unguarded();
        pipeline_view
            .write("rules/safety.policy", "governed edit")
            .await
            .unwrap();

        // Unlocked paths write fine through the guard.
        guarded.write("docs/readme.md", "hello").await.unwrap();
    }
}
