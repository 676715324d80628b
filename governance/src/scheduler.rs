//! Task scheduling under role concurrency invariants.
//!
//! Starting a task is a conditional commit at the store layer: the
//! capacity and non-overlap checks happen inside the same atomic
//! operation that flips the task to `executing`, so two schedulers
//! racing on one role cannot both win.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::proposal::ProposalStatus;
use crate::store::{ProposalStore, TaskStore};
use crate::{GovernanceError, Result};

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Scheduled, not yet started
    Pending,
    /// Being decomposed or prepared
    Planning,
    /// Holding an execution slot for its role
    Executing,
    /// Work done, checks running
    Validating,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Waiting on its approval gate
    Blocked,
}

impl TaskStatus {
    /// Whether the task still counts as open work.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Completed | Self::Failed)
    }
}

/// How a task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The work succeeded
    Completed,
    /// The work failed
    Failed,
}

/// A unit of scheduled governed work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: String,
    /// What the task is meant to accomplish
    pub intent: String,
    /// Role the task is assigned to
    pub role: String,
    /// Parent task when this is a decomposition product
    pub parent_id: Option<String>,
    /// Lifecycle state
    pub status: TaskStatus,
    /// Proposal whose approval gates this task
    pub proposal_id: Option<String>,
    /// Whether the linked proposal must be approved before start
    pub requires_approval: bool,
    /// Retrieved-context references
    pub context_refs: Vec<String>,
    /// Complexity estimate, 1 to 10
    pub complexity: u8,
    /// When the task was scheduled
    pub created_at: DateTime<Utc>,
    /// When execution began
    pub started_at: Option<DateTime<Utc>>,
    /// When execution finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task.
    pub fn new(intent: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            intent: intent.into(),
            role: role.into(),
            parent_id: None,
            status: TaskStatus::Pending,
            proposal_id: None,
            requires_approval: false,
            context_refs: Vec::new(),
            complexity: 1,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Builder: make this a child of another task.
    pub fn child_of(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Builder: gate the task on a proposal's approval.
    pub fn gated_on(mut self, proposal_id: impl Into<String>) -> Self {
        self.proposal_id = Some(proposal_id.into());
        self.requires_approval = true;
        self
    }

    /// Builder: set the complexity estimate.
    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity;
        self
    }
}

/// Concurrency configuration for one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Role name
    pub role: String,
    /// Maximum concurrently executing tasks
    pub max_concurrent_tasks: usize,
}

/// Assigns governed work to roles and enforces execution invariants.
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    proposals: Option<Arc<dyn ProposalStore>>,
    caps: HashMap<String, usize>,
    default_cap: usize,
}

impl TaskScheduler {
    /// Create a scheduler over a task store.
    pub fn new(store: Arc<dyn TaskStore>, roles: Vec<RoleConfig>) -> Self {
        Self {
            store,
            proposals: None,
            caps: roles
                .into_iter()
                .map(|r| (r.role, r.max_concurrent_tasks))
                .collect(),
            default_cap: 1,
        }
    }

    /// Builder: consult a proposal store for approval gates.
    pub fn with_proposals(mut self, proposals: Arc<dyn ProposalStore>) -> Self {
        self.proposals = Some(proposals);
        self
    }

    /// Schedule a task; returns its id.
    pub async fn schedule(&self, task: Task) -> Result<String> {
        if task.intent.trim().is_empty() {
            return Err(GovernanceError::ValidationError(
                "task intent must not be empty".to_string(),
            ));
        }
        if let Some(parent_id) = &task.parent_id {
            // The parent must exist before decomposition products do.
            self.store.get(parent_id).await?;
        }

        let id = task.id.clone();
        info!(task_id = %id, role = %task.role, "Task scheduled");
        self.store.insert(&task).await?;
        Ok(id)
    }

    /// Start a task's execution.
    ///
    /// The capacity and overlap invariants are checked by the store
    /// inside one conditional commit; an approval-gated task will not
    /// start until its proposal is approved.
    pub async fn start(&self, task_id: &str) -> Result<Task> {
        let task = self.store.get(task_id).await?;

        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Planning | TaskStatus::Blocked)
        {
            return Err(GovernanceError::ValidationError(format!(
                "task {} cannot start from {:?}",
                task_id, task.status
            )));
        }

        if task.requires_approval {
            let proposal_id = task.proposal_id.as_deref().ok_or_else(|| {
                GovernanceError::ValidationError(format!(
                    "task {task_id} requires approval but links no proposal"
                ))
            })?;
            let proposals = self.proposals.as_ref().ok_or_else(|| {
                GovernanceError::Blocked(format!(
                    "task {task_id} is approval-gated but the scheduler has no proposal store"
                ))
            })?;
            let proposal = proposals.get(proposal_id).await?;
            if proposal.status != ProposalStatus::Approved {
                return Err(GovernanceError::Blocked(format!(
                    "proposal {} is {:?}, not approved",
                    proposal_id, proposal.status
                )));
            }
        }

        let cap = self
            .caps
            .get(&task.role)
            .copied()
            .unwrap_or(self.default_cap);

        let started = self.store.try_start(task_id, cap).await?;
        info!(task_id = %task_id, role = %started.role, "Task executing");
        Ok(started)
    }

    /// Finish a task with an outcome.
    pub async fn complete(&self, task_id: &str, outcome: TaskOutcome) -> Result<Task> {
        let task = self.store.get(task_id).await?;
        if !matches!(task.status, TaskStatus::Executing | TaskStatus::Validating) {
            return Err(GovernanceError::ValidationError(format!(
                "task {} cannot complete from {:?}",
                task_id, task.status
            )));
        }

        // A parent cannot complete over open children.
        let open_children = self
            .store
            .children_of(task_id)
            .await?
            .into_iter()
            .filter(|t| t.status.is_open())
            .count();
        if open_children > 0 {
            return Err(GovernanceError::ValidationError(format!(
                "task {task_id} has {open_children} open child task(s)"
            )));
        }

        let status = match outcome {
            TaskOutcome::Completed => TaskStatus::Completed,
            TaskOutcome::Failed => TaskStatus::Failed,
        };
        let completed = self.store.complete(task_id, status, Utc::now()).await?;
        info!(task_id = %task_id, status = ?status, "Task finished");
        Ok(completed)
    }

    /// The underlying task store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }
}
