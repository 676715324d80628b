//! Persistence seams for proposals and tasks.
//!
//! The task store's `try_start` is the conditional commit that
//! enforces the scheduling invariants: the checks and the state flip
//! happen under one lock (or one transaction, in the relational
//! implementation), never as application-level check-then-act.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::proposal::{CanaryReport, Proposal, ProposalSignature};
use crate::scheduler::{Task, TaskStatus};
use crate::{GovernanceError, Result};

/// Storage for proposals and their signatures.
#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Insert a new proposal.
    async fn insert(&self, proposal: &Proposal) -> Result<()>;

    /// Get a proposal by id.
    async fn get(&self, id: &str) -> Result<Proposal>;

    /// Replace a proposal record.
    async fn update(&self, proposal: &Proposal) -> Result<()>;

    /// Add a signature, replacing any earlier one from the same approver.
    async fn add_signature(&self, signature: &ProposalSignature) -> Result<()>;

    /// All signatures for a proposal.
    async fn signatures(&self, proposal_id: &str) -> Result<Vec<ProposalSignature>>;

    /// Attach a canary verdict to a proposal.
    async fn attach_canary(&self, proposal_id: &str, report: &CanaryReport) -> Result<()>;

    /// Mark a proposal integrated; one atomic commit.
    async fn mark_integrated(&self, proposal_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Proposals holding the write lock for a path: open, or approved
    /// but not yet integrated.
    async fn active_for_path(&self, target_path: &str) -> Result<Vec<Proposal>>;
}

/// Storage for scheduled tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    async fn insert(&self, task: &Task) -> Result<()>;

    /// Get a task by id.
    async fn get(&self, id: &str) -> Result<Task>;

    /// Flip a task to `executing` iff the role invariants hold.
    ///
    /// Capacity and overlap are checked inside the same atomic commit
    /// that records the start; under concurrent calls for one role,
    /// exactly one wins.
    async fn try_start(&self, task_id: &str, max_concurrent: usize) -> Result<Task>;

    /// Record a task's terminal status.
    async fn complete(&self, task_id: &str, status: TaskStatus, at: DateTime<Utc>) -> Result<Task>;

    /// Direct children of a task.
    async fn children_of(&self, parent_id: &str) -> Result<Vec<Task>>;

    /// Tasks currently executing for a role.
    async fn executing_for_role(&self, role: &str) -> Result<Vec<Task>>;
}

struct ProposalInner {
    proposals: HashMap<String, Proposal>,
    signatures: HashMap<String, Vec<ProposalSignature>>,
}

/// In-memory proposal store.
#[derive(Clone)]
pub struct InMemoryProposalStore {
    inner: Arc<Mutex<ProposalInner>>,
}

impl InMemoryProposalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProposalInner {
                proposals: HashMap::new(),
                signatures: HashMap::new(),
            })),
        }
    }
}

impl Default for InMemoryProposalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProposalStore for InMemoryProposalStore {
    async fn insert(&self, proposal: &Proposal) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Proposal> {
        let inner = self.inner.lock().await;
        inner
            .proposals
            .get(id)
            .cloned()
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {id}")))
    }

    async fn update(&self, proposal: &Proposal) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.proposals.contains_key(&proposal.id) {
            return Err(GovernanceError::NotFound(format!("proposal {}", proposal.id)));
        }
        inner.proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn add_signature(&self, signature: &ProposalSignature) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.proposals.contains_key(&signature.proposal_id) {
            return Err(GovernanceError::NotFound(format!(
                "proposal {}",
                signature.proposal_id
            )));
        }
        let signatures = inner
            .signatures
            .entry(signature.proposal_id.clone())
            .or_default();
        signatures.retain(|s| s.approver != signature.approver);
        signatures.push(signature.clone());
        Ok(())
    }

    async fn signatures(&self, proposal_id: &str) -> Result<Vec<ProposalSignature>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .signatures
            .get(proposal_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn attach_canary(&self, proposal_id: &str, report: &CanaryReport) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let proposal = inner
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {proposal_id}")))?;
        proposal.last_canary = Some(report.clone());
        Ok(())
    }

    async fn mark_integrated(&self, proposal_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let proposal = inner
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {proposal_id}")))?;
        proposal.integrated_at = Some(at);
        Ok(())
    }

    async fn active_for_path(&self, target_path: &str) -> Result<Vec<Proposal>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .proposals
            .values()
            .filter(|p| p.target_path == target_path && p.holds_lock())
            .cloned()
            .collect())
    }
}

/// In-memory task store. One mutex makes `try_start` the conditional
/// commit the scheduler's invariants require.
#[derive(Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Task> {
        let tasks = self.tasks.lock().await;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| GovernanceError::NotFound(format!("task {id}")))
    }

    async fn try_start(&self, task_id: &str, max_concurrent: usize) -> Result<Task> {
        let mut tasks = self.tasks.lock().await;

        let role = tasks
            .get(task_id)
            .map(|t| t.role.clone())
            .ok_or_else(|| GovernanceError::NotFound(format!("task {task_id}")))?;

        let now = Utc::now();
        let executing: Vec<&Task> = tasks
            .values()
            .filter(|t| t.role == role && t.status == TaskStatus::Executing)
            .collect();

        if executing.len() >= max_concurrent {
            return Err(GovernanceError::CapacityExceeded {
                role,
                limit: max_concurrent,
            });
        }

        // An executing task holds [started_at, None): it overlaps any
        // interval starting now.
        let overlaps = executing
            .iter()
            .any(|t| t.completed_at.map(|end| end > now).unwrap_or(true));
        if overlaps {
            return Err(GovernanceError::OverlapConflict { role });
        }

        let task = tasks.get_mut(task_id).expect("checked above");
        task.status = TaskStatus::Executing;
        task.started_at = Some(now);
        Ok(task.clone())
    }

    async fn complete(&self, task_id: &str, status: TaskStatus, at: DateTime<Utc>) -> Result<Task> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("task {task_id}")))?;
        task.status = status;
        task.completed_at = Some(at);
        Ok(task.clone())
    }

    async fn children_of(&self, parent_id: &str) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().await;
        Ok(tasks
            .values()
            .filter(|t| t.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn executing_for_role(&self, role: &str) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().await;
        Ok(tasks
            .values()
            .filter(|t| t.role == role && t.status == TaskStatus::Executing)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{FileChange, RiskTier};

    #[tokio::test]
    async fn test_signature_replacement_per_approver() {
        let store = InMemoryProposalStore::new();
        let proposal = Proposal::new(
            "rules/x.policy",
            vec![FileChange::new("rules/x.policy", "content")],
            "why",
            RiskTier::Low,
            "agent",
        );
        store.insert(&proposal).await.unwrap();

        for bytes in [vec![1u8], vec![2u8]] {
            store
                .add_signature(&ProposalSignature {
                    proposal_id: proposal.id.clone(),
                    approver: "alice".to_string(),
                    signature: bytes,
                    signed_at: Utc::now(),
                    valid: true,
                })
                .await
                .unwrap();
        }

        let signatures = store.signatures(&proposal.id).await.unwrap();
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].signature, vec![2u8]);
    }

    #[tokio::test]
    async fn test_active_for_path_tracks_lock_holders() {
        let store = InMemoryProposalStore::new();
        let mut proposal = Proposal::new(
            "rules/x.policy",
            vec![FileChange::new("rules/x.policy", "content")],
            "why",
            RiskTier::Low,
            "agent",
        );
        store.insert(&proposal).await.unwrap();
        assert_eq!(store.active_for_path("rules/x.policy").await.unwrap().len(), 1);

        proposal.status = crate::proposal::ProposalStatus::Rejected;
        store.update(&proposal).await.unwrap();
        assert!(store.active_for_path("rules/x.policy").await.unwrap().is_empty());
    }
}
