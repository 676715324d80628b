//! [`auditor::AuditStore`] backed by SQLite.
//!
//! `persist_run` writes the run and every violation inside one
//! transaction: a crash mid-persist leaves no run at all, never a run
//! with half its violations.

use async_trait::async_trait;
use auditor::{AuditError, AuditRun, AuditRunStatus, AuditScope, AuditStore, Violation};
use chrono::Utc;
use constitution::Severity;
use rusqlite::{params, OptionalExtension};

use crate::{parse_ts, parse_ts_opt, ts, ts_opt, SqliteStore, StoreError};

fn store_err(e: impl std::fmt::Display) -> AuditError {
    AuditError::Store(e.to_string())
}

fn parse_severity(raw: &str) -> Result<Severity, StoreError> {
    Ok(match raw {
        "info" => Severity::Info,
        "warning" => Severity::Warning,
        "error" => Severity::Error,
        "critical" => Severity::Critical,
        other => return Err(StoreError::Corrupt(format!("unknown severity '{other}'"))),
    })
}

fn run_status_str(status: AuditRunStatus) -> &'static str {
    match status {
        AuditRunStatus::Completed => "completed",
        AuditRunStatus::Abandoned => "abandoned",
    }
}

fn parse_run_status(raw: &str) -> Result<AuditRunStatus, StoreError> {
    Ok(match raw {
        "completed" => AuditRunStatus::Completed,
        "abandoned" => AuditRunStatus::Abandoned,
        other => return Err(StoreError::Corrupt(format!("unknown run status '{other}'"))),
    })
}

fn row_to_violation(row: &rusqlite::Row<'_>) -> Result<Violation, StoreError> {
    let severity: String = row.get(5).map_err(StoreError::from)?;
    let detected_at: String = row.get(6).map_err(StoreError::from)?;
    let resolved_at: Option<String> = row.get(7).map_err(StoreError::from)?;

    Ok(Violation {
        id: row.get(0).map_err(StoreError::from)?,
        rule_id: row.get(1).map_err(StoreError::from)?,
        symbol_id: row.get(2).map_err(StoreError::from)?,
        task_id: row.get(3).map_err(StoreError::from)?,
        severity: parse_severity(&severity)?,
        description: row.get(4).map_err(StoreError::from)?,
        detected_at: parse_ts(&detected_at)?,
        resolved_at: parse_ts_opt(resolved_at)?,
        resolution_notes: row.get(8).map_err(StoreError::from)?,
    })
}

const VIOLATION_COLUMNS: &str =
    "id, rule_id, symbol_id, task_id, description, severity, detected_at, resolved_at, resolution_notes";

#[async_trait]
impl AuditStore for SqliteStore {
    async fn persist_run(&self, run: &AuditRun, violations: &[Violation]) -> auditor::Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(store_err)?;

        tx.execute(
            "INSERT INTO audit_runs (id, source, commit_ref, scope_key, scope_json, score,
               passed, violations_found, status, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.id,
                run.source,
                run.commit_ref,
                run.scope.key(),
                serde_json::to_string(&run.scope).map_err(store_err)?,
                run.score as f64,
                run.passed as i64,
                run.violations_found as i64,
                run_status_str(run.status),
                ts(run.started_at),
                ts(run.finished_at),
            ],
        )
        .map_err(store_err)?;

        for violation in violations {
            tx.execute(
                "INSERT INTO violations (id, run_id, rule_id, symbol_id, task_id, severity,
                   description, detected_at, resolved_at, resolution_notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    violation.id,
                    run.id,
                    violation.rule_id,
                    violation.symbol_id,
                    violation.task_id,
                    violation.severity.as_str(),
                    violation.description,
                    ts(violation.detected_at),
                    ts_opt(violation.resolved_at),
                    violation.resolution_notes,
                ],
            )
            .map_err(store_err)?;
        }

        tx.commit().map_err(store_err)
    }

    async fn runs_for_scope(&self, scope_key: &str, limit: usize) -> auditor::Result<Vec<AuditRun>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, source, commit_ref, scope_json, score, passed, violations_found,
                        status, started_at, finished_at
                 FROM audit_runs WHERE scope_key = ?1
                 ORDER BY started_at DESC LIMIT ?2",
            )
            .map_err(store_err)?;

        let mut rows = stmt
            .query(params![scope_key, limit as i64])
            .map_err(store_err)?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let scope_json: String = row.get(3).map_err(store_err)?;
            let status: String = row.get(7).map_err(store_err)?;
            let started_at: String = row.get(8).map_err(store_err)?;
            let finished_at: String = row.get(9).map_err(store_err)?;

            let scope: AuditScope = serde_json::from_str(&scope_json).map_err(store_err)?;
            runs.push(AuditRun {
                id: row.get(0).map_err(store_err)?,
                source: row.get(1).map_err(store_err)?,
                commit_ref: row.get(2).map_err(store_err)?,
                scope,
                score: row.get::<_, f64>(4).map_err(store_err)? as f32,
                passed: row.get::<_, i64>(5).map_err(store_err)? != 0,
                violations_found: row.get::<_, i64>(6).map_err(store_err)? as u32,
                status: parse_run_status(&status).map_err(store_err)?,
                started_at: parse_ts(&started_at).map_err(store_err)?,
                finished_at: parse_ts(&finished_at).map_err(store_err)?,
            });
        }
        Ok(runs)
    }

    async fn violations_for_run(&self, run_id: &str) -> auditor::Result<Vec<Violation>> {
        let conn = self.lock();

        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM audit_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        if exists.is_none() {
            return Err(AuditError::NotFound(format!("run {run_id}")));
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VIOLATION_COLUMNS} FROM violations WHERE run_id = ?1"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query(params![run_id]).map_err(store_err)?;
        let mut violations = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            violations.push(row_to_violation(row).map_err(store_err)?);
        }
        Ok(violations)
    }

    async fn open_violations(&self) -> auditor::Result<Vec<Violation>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VIOLATION_COLUMNS} FROM violations WHERE resolved_at IS NULL"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query([]).map_err(store_err)?;
        let mut violations = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            violations.push(row_to_violation(row).map_err(store_err)?);
        }
        Ok(violations)
    }

    async fn resolve_violation(&self, violation_id: &str, notes: &str) -> auditor::Result<()> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE violations SET resolved_at = ?1, resolution_notes = ?2 WHERE id = ?3",
                params![ts(Utc::now()), notes, violation_id],
            )
            .map_err(store_err)?;
        if updated == 0 {
            return Err(AuditError::NotFound(format!("violation {violation_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run(scope: AuditScope) -> AuditRun {
        AuditRun {
            id: uuid::Uuid::new_v4().to_string(),
            source: "test".to_string(),
            commit_ref: Some("abc123".to_string()),
            scope,
            score: 0.75,
            passed: false,
            violations_found: 1,
            status: AuditRunStatus::Completed,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_persist_run_transactional_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run = sample_run(AuditScope::module("core"));
        let violation = Violation::new("rule-1", "sym-1", Severity::Error, "broken");

        store
            .persist_run(&run, std::slice::from_ref(&violation))
            .await
            .unwrap();

        let runs = store.runs_for_scope("core", 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].commit_ref.as_deref(), Some("abc123"));

        let violations = store.violations_for_run(&run.id).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_duplicate_run_id_rejected_atomically() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run = sample_run(AuditScope::module("core"));
        store.persist_run(&run, &[]).await.unwrap();

        // Second persist with the same id fails and writes no violations.
        let violation = Violation::new("rule-1", "sym-1", Severity::Error, "broken");
        let err = store
            .persist_run(&run, std::slice::from_ref(&violation))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Store(_)));

        let open = store.open_violations().await.unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn test_resolution() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run = sample_run(AuditScope::full());
        let violation = Violation::new("rule-1", "sym-1", Severity::Warning, "untidy");
        store
            .persist_run(&run, std::slice::from_ref(&violation))
            .await
            .unwrap();

        store
            .resolve_violation(&violation.id, "cleaned up")
            .await
            .unwrap();

        assert!(store.open_violations().await.unwrap().is_empty());
        let stored = store.violations_for_run(&run.id).await.unwrap();
        assert_eq!(stored[0].resolution_notes.as_deref(), Some("cleaned up"));
    }
}
