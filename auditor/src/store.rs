//! Persistence seam for audit runs and violations.
//!
//! `persist_run` is the transactional unit: the run and all of its
//! violations land together or not at all. The engine never reports a
//! run complete unless persistence succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::types::{AuditRun, Violation};
use crate::{AuditError, Result};

/// Storage for audit history.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a run and its violations as one atomic unit.
    async fn persist_run(&self, run: &AuditRun, violations: &[Violation]) -> Result<()>;

    /// Completed runs for a scope key, newest first.
    async fn runs_for_scope(&self, scope_key: &str, limit: usize) -> Result<Vec<AuditRun>>;

    /// Violations recorded by a run.
    async fn violations_for_run(&self, run_id: &str) -> Result<Vec<Violation>>;

    /// All violations with no resolution.
    async fn open_violations(&self) -> Result<Vec<Violation>>;

    /// Mark a violation resolved.
    async fn resolve_violation(&self, violation_id: &str, notes: &str) -> Result<()>;
}

struct MemoryInner {
    runs: Vec<AuditRun>,
    violations_by_run: HashMap<String, Vec<String>>,
    violations: HashMap<String, Violation>,
}

/// In-memory audit store for tests and canary rehearsals.
#[derive(Clone)]
pub struct InMemoryAuditStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl InMemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner {
                runs: Vec::new(),
                violations_by_run: HashMap::new(),
                violations: HashMap::new(),
            })),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn persist_run(&self, run: &AuditRun, violations: &[Violation]) -> Result<()> {
        // Single write lock: the run and violations land together.
        let mut inner = self.inner.write().await;
        inner.runs.push(run.clone());
        let ids: Vec<String> = violations.iter().map(|v| v.id.clone()).collect();
        inner.violations_by_run.insert(run.id.clone(), ids);
        for violation in violations {
            inner.violations.insert(violation.id.clone(), violation.clone());
        }
        Ok(())
    }

    async fn runs_for_scope(&self, scope_key: &str, limit: usize) -> Result<Vec<AuditRun>> {
        let inner = self.inner.read().await;
        let mut runs: Vec<AuditRun> = inner
            .runs
            .iter()
            .filter(|r| r.scope.key() == scope_key)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn violations_for_run(&self, run_id: &str) -> Result<Vec<Violation>> {
        let inner = self.inner.read().await;
        let ids = inner
            .violations_by_run
            .get(run_id)
            .ok_or_else(|| AuditError::NotFound(format!("run {run_id}")))?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.violations.get(id))
            .cloned()
            .collect())
    }

    async fn open_violations(&self) -> Result<Vec<Violation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .violations
            .values()
            .filter(|v| v.is_open())
            .cloned()
            .collect())
    }

    async fn resolve_violation(&self, violation_id: &str, notes: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let violation = inner
            .violations
            .get_mut(violation_id)
            .ok_or_else(|| AuditError::NotFound(format!("violation {violation_id}")))?;
        violation.resolved_at = Some(Utc::now());
        violation.resolution_notes = Some(notes.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuditRunStatus, AuditScope};
    use constitution::Severity;

    fn run(scope: AuditScope) -> AuditRun {
        AuditRun {
            id: uuid::Uuid::new_v4().to_string(),
            source: "test".to_string(),
            commit_ref: None,
            scope,
            score: 1.0,
            passed: true,
            violations_found: 0,
            status: AuditRunStatus::Completed,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_persist_and_fetch() {
        let store = InMemoryAuditStore::new();
        let the_run = run(AuditScope::module("core"));
        let violation = Violation::new("r1", "s1", Severity::Error, "broken");

        store
            .persist_run(&the_run, std::slice::from_ref(&violation))
            .await
            .unwrap();

        let fetched = store.violations_for_run(&the_run.id).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, violation.id);

        let open = store.open_violations().await.unwrap();
        assert_eq!(open.len(), 1);

        store.resolve_violation(&violation.id, "fixed").await.unwrap();
        let open = store.open_violations().await.unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn test_runs_for_scope_newest_first() {
        let store = InMemoryAuditStore::new();
        let mut older = run(AuditScope::module("core"));
        older.started_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = run(AuditScope::module("core"));

        store.persist_run(&older, &[]).await.unwrap();
        store.persist_run(&newer, &[]).await.unwrap();

        let runs = store.runs_for_scope("core", 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id);
    }
}
