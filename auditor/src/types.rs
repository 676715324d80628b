//! Violations, audit runs, and scopes.

use chrono::{DateTime, Utc};
use constitution::Severity;
use serde::{Deserialize, Serialize};

/// A recorded breach of a constitutional rule.
///
/// Open until `resolved_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Unique identifier
    pub id: String,
    /// Rule that was breached
    pub rule_id: String,
    /// Symbol the breach was found on
    pub symbol_id: String,
    /// Task in whose context the breach was found, if any
    pub task_id: Option<String>,
    /// Severity inherited from the rule
    pub severity: Severity,
    /// What went wrong
    pub description: String,
    /// When the breach was detected
    pub detected_at: DateTime<Utc>,
    /// When the breach was resolved, if it has been
    pub resolved_at: Option<DateTime<Utc>>,
    /// How it was resolved
    pub resolution_notes: Option<String>,
}

impl Violation {
    /// Create an open violation.
    pub fn new(
        rule_id: impl Into<String>,
        symbol_id: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.into(),
            symbol_id: symbol_id.into(),
            task_id: None,
            severity,
            description: description.into(),
            detected_at: Utc::now(),
            resolved_at: None,
            resolution_notes: None,
        }
    }

    /// Builder: attach the task context.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Whether the violation is still open.
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Drift identity: violations are the same finding when rule and
    /// symbol agree.
    pub fn drift_key(&self) -> (String, String) {
        (self.rule_id.clone(), self.symbol_id.clone())
    }
}

/// What part of the catalog a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditScope {
    /// Module prefix; empty covers the whole catalog
    pub module_prefix: String,
    /// Optional domain restriction
    pub domain: Option<String>,
}

impl AuditScope {
    /// Scope covering everything.
    pub fn full() -> Self {
        Self::default()
    }

    /// Scope covering one module subtree.
    pub fn module(prefix: impl Into<String>) -> Self {
        Self {
            module_prefix: prefix.into(),
            domain: None,
        }
    }

    /// Key used for the single-in-flight-audit guard and history
    /// lookups. Disjoint keys may audit concurrently.
    pub fn key(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}@{}", self.module_prefix, domain),
            None => self.module_prefix.clone(),
        }
    }
}

/// Terminal status of an audit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditRunStatus {
    /// Ran to completion; verdict and violations are meaningful
    Completed,
    /// Cancelled mid-run; no violations were persisted
    Abandoned,
}

/// One audit run. History is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    /// Unique identifier
    pub id: String,
    /// What triggered the run
    pub source: String,
    /// Commit reference the run evaluated, if known
    pub commit_ref: Option<String>,
    /// Scope the run covered
    pub scope: AuditScope,
    /// Normalized aggregate score in [0, 1]
    pub score: f32,
    /// Verdict; one blocking violation forces `false` regardless of score
    pub passed: bool,
    /// Violations emitted by this run
    pub violations_found: u32,
    /// Completed or abandoned
    pub status: AuditRunStatus,
    /// When evaluation started
    pub started_at: DateTime<Utc>,
    /// When evaluation finished
    pub finished_at: DateTime<Utc>,
}
