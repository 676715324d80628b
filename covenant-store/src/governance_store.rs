//! [`governance::ProposalStore`] and [`governance::TaskStore`] backed
//! by SQLite.
//!
//! `try_start` is the conditional commit the scheduler's invariants
//! require: the capacity and overlap checks and the flip to
//! `executing` run inside one transaction, so concurrent starts for a
//! role cannot both commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governance::{
    CanaryReport, GovernanceError, Proposal, ProposalSignature, ProposalStatus, ProposalStore,
    RiskTier, Task, TaskStatus, TaskStore,
};
use rusqlite::{params, OptionalExtension, Transaction};

use crate::{parse_ts, parse_ts_opt, ts, ts_opt, SqliteStore, StoreError};

fn store_err(e: impl std::fmt::Display) -> GovernanceError {
    GovernanceError::Store(e.to_string())
}

fn proposal_status_str(status: ProposalStatus) -> &'static str {
    match status {
        ProposalStatus::Open => "open",
        ProposalStatus::Approved => "approved",
        ProposalStatus::Rejected => "rejected",
        ProposalStatus::Superseded => "superseded",
    }
}

fn parse_proposal_status(raw: &str) -> Result<ProposalStatus, StoreError> {
    Ok(match raw {
        "open" => ProposalStatus::Open,
        "approved" => ProposalStatus::Approved,
        "rejected" => ProposalStatus::Rejected,
        "superseded" => ProposalStatus::Superseded,
        other => {
            return Err(StoreError::Corrupt(format!(
                "unknown proposal status '{other}'"
            )))
        }
    })
}

fn parse_risk_tier(raw: &str) -> Result<RiskTier, StoreError> {
    Ok(match raw {
        "low" => RiskTier::Low,
        "medium" => RiskTier::Medium,
        "high" => RiskTier::High,
        other => return Err(StoreError::Corrupt(format!("unknown risk tier '{other}'"))),
    })
}

fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Planning => "planning",
        TaskStatus::Executing => "executing",
        TaskStatus::Validating => "validating",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Blocked => "blocked",
    }
}

fn parse_task_status(raw: &str) -> Result<TaskStatus, StoreError> {
    Ok(match raw {
        "pending" => TaskStatus::Pending,
        "planning" => TaskStatus::Planning,
        "executing" => TaskStatus::Executing,
        "validating" => TaskStatus::Validating,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "blocked" => TaskStatus::Blocked,
        other => return Err(StoreError::Corrupt(format!("unknown task status '{other}'"))),
    })
}

const PROPOSAL_COLUMNS: &str = "id, target_path, changes_json, content_hash, justification, \
     risk_tier, is_critical, status, integrated_at, created_by, created_at, canary_json";

fn row_to_proposal(row: &rusqlite::Row<'_>) -> Result<Proposal, StoreError> {
    let changes_json: String = row.get(2)?;
    let risk_tier: String = row.get(5)?;
    let status: String = row.get(7)?;
    let integrated_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(10)?;
    let canary_json: Option<String> = row.get(11)?;

    let last_canary: Option<CanaryReport> = canary_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(Proposal {
        id: row.get(0)?,
        target_path: row.get(1)?,
        changes: serde_json::from_str(&changes_json)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        content_hash: row.get(3)?,
        justification: row.get(4)?,
        risk_tier: parse_risk_tier(&risk_tier)?,
        is_critical: row.get::<_, i64>(6)? != 0,
        status: parse_proposal_status(&status)?,
        integrated_at: parse_ts_opt(integrated_at)?,
        created_by: row.get(9)?,
        created_at: parse_ts(&created_at)?,
        last_canary,
    })
}

const TASK_COLUMNS: &str = "id, intent, role, parent_id, status, proposal_id, \
     requires_approval, context_refs_json, complexity, created_at, started_at, completed_at";

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<Task, StoreError> {
    let status: String = row.get(4)?;
    let context_json: String = row.get(7)?;
    let created_at: String = row.get(9)?;
    let started_at: Option<String> = row.get(10)?;
    let completed_at: Option<String> = row.get(11)?;

    Ok(Task {
        id: row.get(0)?,
        intent: row.get(1)?,
        role: row.get(2)?,
        parent_id: row.get(3)?,
        status: parse_task_status(&status)?,
        proposal_id: row.get(5)?,
        requires_approval: row.get::<_, i64>(6)? != 0,
        context_refs: serde_json::from_str(&context_json)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        complexity: row.get::<_, i64>(8)? as u8,
        created_at: parse_ts(&created_at)?,
        started_at: parse_ts_opt(started_at)?,
        completed_at: parse_ts_opt(completed_at)?,
    })
}

fn upsert_proposal(tx: &Transaction<'_>, proposal: &Proposal) -> Result<(), GovernanceError> {
    tx.execute(
        "INSERT OR REPLACE INTO proposals (id, target_path, changes_json, content_hash,
           justification, risk_tier, is_critical, status, integrated_at, created_by,
           created_at, canary_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            proposal.id,
            proposal.target_path,
            serde_json::to_string(&proposal.changes).map_err(store_err)?,
            proposal.content_hash,
            proposal.justification,
            proposal.risk_tier.as_str(),
            proposal.is_critical as i64,
            proposal_status_str(proposal.status),
            ts_opt(proposal.integrated_at),
            proposal.created_by,
            ts(proposal.created_at),
            proposal
                .last_canary
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(store_err)?,
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

#[async_trait]
impl ProposalStore for SqliteStore {
    async fn insert(&self, proposal: &Proposal) -> governance::Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(store_err)?;
        upsert_proposal(&tx, proposal)?;
        tx.commit().map_err(store_err)
    }

    async fn get(&self, id: &str) -> governance::Result<Proposal> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = ?1"),
            params![id],
            |row| Ok(row_to_proposal(row)),
        )
        .optional()
        .map_err(store_err)?
        .ok_or_else(|| GovernanceError::NotFound(format!("proposal {id}")))?
        .map_err(store_err)
    }

    async fn update(&self, proposal: &Proposal) -> governance::Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(store_err)?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM proposals WHERE id = ?1",
                params![proposal.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        if exists.is_none() {
            return Err(GovernanceError::NotFound(format!(
                "proposal {}",
                proposal.id
            )));
        }

        upsert_proposal(&tx, proposal)?;
        tx.commit().map_err(store_err)
    }

    async fn add_signature(&self, signature: &ProposalSignature) -> governance::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO proposal_signatures
               (proposal_id, approver, signature_hex, signed_at, valid)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                signature.proposal_id,
                signature.approver,
                hex::encode(&signature.signature),
                ts(signature.signed_at),
                signature.valid as i64,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn signatures(&self, proposal_id: &str) -> governance::Result<Vec<ProposalSignature>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT proposal_id, approver, signature_hex, signed_at, valid
                 FROM proposal_signatures WHERE proposal_id = ?1",
            )
            .map_err(store_err)?;
        let mut rows = stmt.query(params![proposal_id]).map_err(store_err)?;
        let mut signatures = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let signature_hex: String = row.get(2).map_err(store_err)?;
            let signed_at: String = row.get(3).map_err(store_err)?;
            signatures.push(ProposalSignature {
                proposal_id: row.get(0).map_err(store_err)?,
                approver: row.get(1).map_err(store_err)?,
                signature: hex::decode(&signature_hex).map_err(store_err)?,
                signed_at: parse_ts(&signed_at).map_err(store_err)?,
                valid: row.get::<_, i64>(4).map_err(store_err)? != 0,
            });
        }
        Ok(signatures)
    }

    async fn attach_canary(
        &self,
        proposal_id: &str,
        report: &CanaryReport,
    ) -> governance::Result<()> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE proposals SET canary_json = ?1 WHERE id = ?2",
                params![
                    serde_json::to_string(report).map_err(store_err)?,
                    proposal_id
                ],
            )
            .map_err(store_err)?;
        if updated == 0 {
            return Err(GovernanceError::NotFound(format!("proposal {proposal_id}")));
        }
        Ok(())
    }

    async fn mark_integrated(
        &self,
        proposal_id: &str,
        at: DateTime<Utc>,
    ) -> governance::Result<()> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE proposals SET integrated_at = ?1
                 WHERE id = ?2 AND status = 'approved' AND integrated_at IS NULL",
                params![ts(at), proposal_id],
            )
            .map_err(store_err)?;
        if updated == 0 {
            return Err(GovernanceError::NotFound(format!(
                "approved un-integrated proposal {proposal_id}"
            )));
        }
        Ok(())
    }

    async fn active_for_path(&self, target_path: &str) -> governance::Result<Vec<Proposal>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROPOSAL_COLUMNS} FROM proposals
                 WHERE target_path = ?1
                   AND (status = 'open' OR (status = 'approved' AND integrated_at IS NULL))"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query(params![target_path]).map_err(store_err)?;
        let mut proposals = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            proposals.push(row_to_proposal(row).map_err(store_err)?);
        }
        Ok(proposals)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert(&self, task: &Task) -> governance::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO tasks (id, intent, role, parent_id, status, proposal_id,
               requires_approval, context_refs_json, complexity, created_at,
               started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                task.id,
                task.intent,
                task.role,
                task.parent_id,
                task_status_str(task.status),
                task.proposal_id,
                task.requires_approval as i64,
                serde_json::to_string(&task.context_refs).map_err(store_err)?,
                task.complexity as i64,
                ts(task.created_at),
                ts_opt(task.started_at),
                ts_opt(task.completed_at),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> governance::Result<Task> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            |row| Ok(row_to_task(row)),
        )
        .optional()
        .map_err(store_err)?
        .ok_or_else(|| GovernanceError::NotFound(format!("task {id}")))?
        .map_err(store_err)
    }

    async fn try_start(&self, task_id: &str, max_concurrent: usize) -> governance::Result<Task> {
        {
            let mut conn = self.lock();
            let tx = conn.transaction().map_err(store_err)?;

            let role: Option<String> = tx
                .query_row(
                    "SELECT role FROM tasks WHERE id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_err)?;
            let role = role.ok_or_else(|| GovernanceError::NotFound(format!("task {task_id}")))?;

            let executing: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM tasks WHERE role = ?1 AND status = 'executing'",
                    params![role],
                    |row| row.get(0),
                )
                .map_err(store_err)?;

            if executing as usize >= max_concurrent {
                return Err(GovernanceError::CapacityExceeded {
                    role,
                    limit: max_concurrent,
                });
            }
            // An executing task's interval is still open; any new start
            // would overlap it.
            if executing > 0 {
                return Err(GovernanceError::OverlapConflict { role });
            }

            tx.execute(
                "UPDATE tasks SET status = 'executing', started_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()), task_id],
            )
            .map_err(store_err)?;
            tx.commit().map_err(store_err)?;
        }

        TaskStore::get(self, task_id).await
    }

    async fn complete(
        &self,
        task_id: &str,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> governance::Result<Task> {
        {
            let conn = self.lock();
            let updated = conn
                .execute(
                    "UPDATE tasks SET status = ?1, completed_at = ?2 WHERE id = ?3",
                    params![task_status_str(status), ts(at), task_id],
                )
                .map_err(store_err)?;
            if updated == 0 {
                return Err(GovernanceError::NotFound(format!("task {task_id}")));
            }
        }
        TaskStore::get(self, task_id).await
    }

    async fn children_of(&self, parent_id: &str) -> governance::Result<Vec<Task>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE parent_id = ?1"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query(params![parent_id]).map_err(store_err)?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            tasks.push(row_to_task(row).map_err(store_err)?);
        }
        Ok(tasks)
    }

    async fn executing_for_role(&self, role: &str) -> governance::Result<Vec<Task>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE role = ?1 AND status = 'executing'"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query(params![role]).map_err(store_err)?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            tasks.push(row_to_task(row).map_err(store_err)?);
        }
        Ok(tasks)
    }
}
