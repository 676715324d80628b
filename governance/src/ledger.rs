//! Decision ledger: governance decisions kept for later citation.
//!
//! Every approve, reject, and supersede lands here with the canary
//! verdict and signature count that justified it. Later proposals on
//! the same path cite prior decisions during review.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// What was decided about a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Quorum met, canary passed
    Approved,
    /// Terminally refused
    Rejected,
    /// Overridden by a later proposal
    Superseded,
    /// Integration committed
    Integrated,
}

/// One recorded governance decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Unique identifier
    pub id: String,
    /// Proposal the decision concerns
    pub proposal_id: String,
    /// Target path of that proposal
    pub target_path: String,
    /// The decision
    pub decision: Decision,
    /// Valid signatures present at decision time
    pub signature_count: usize,
    /// Whether the canary passed, when one ran
    pub canary_passed: Option<bool>,
    /// Free-text context
    pub notes: String,
    /// When the decision was made
    pub decided_at: DateTime<Utc>,
    /// How often later reviews cited this decision
    pub citation_count: u32,
}

impl DecisionRecord {
    /// Create a record for a proposal decision.
    pub fn new(
        proposal_id: impl Into<String>,
        target_path: impl Into<String>,
        decision: Decision,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            proposal_id: proposal_id.into(),
            target_path: target_path.into(),
            decision,
            signature_count: 0,
            canary_passed: None,
            notes: String::new(),
            decided_at: Utc::now(),
            citation_count: 0,
        }
    }

    /// Builder: set the signature count.
    pub fn with_signatures(mut self, count: usize) -> Self {
        self.signature_count = count;
        self
    }

    /// Builder: set the canary verdict.
    pub fn with_canary(mut self, passed: bool) -> Self {
        self.canary_passed = Some(passed);
        self
    }

    /// Builder: attach notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// Append-only ledger of governance decisions.
#[derive(Clone, Default)]
pub struct DecisionLedger {
    records: Arc<RwLock<Vec<DecisionRecord>>>,
    by_path: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl DecisionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a decision.
    pub async fn record(&self, record: DecisionRecord) {
        info!(
            proposal_id = %record.proposal_id,
            target_path = %record.target_path,
            decision = ?record.decision,
            "Governance decision recorded"
        );

        let mut by_path = self.by_path.write().await;
        by_path
            .entry(record.target_path.clone())
            .or_default()
            .push(record.id.clone());
        drop(by_path);

        let mut records = self.records.write().await;
        records.push(record);
    }

    /// Decisions for a target path, oldest first. Each lookup counts
    /// as a citation.
    pub async fn cite_for_path(&self, target_path: &str) -> Vec<DecisionRecord> {
        let by_path = self.by_path.read().await;
        let Some(ids) = by_path.get(target_path) else {
            return Vec::new();
        };
        let ids: Vec<String> = ids.clone();
        drop(by_path);

        let mut records = self.records.write().await;
        let mut cited = Vec::new();
        for record in records.iter_mut() {
            if ids.contains(&record.id) {
                record.citation_count += 1;
                cited.push(record.clone());
            }
        }
        cited
    }

    /// All decisions, oldest first.
    pub async fn all(&self) -> Vec<DecisionRecord> {
        let records = self.records.read().await;
        records.clone()
    }

    /// Count of recorded decisions.
    pub async fn len(&self) -> usize {
        let records = self.records.read().await;
        records.len()
    }

    /// Whether the ledger is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_cite() {
        let ledger = DecisionLedger::new();

        ledger
            .record(
                DecisionRecord::new("prop-1", "rules/safety.policy", Decision::Approved)
                    .with_signatures(2)
                    .with_canary(true),
            )
            .await;
        ledger
            .record(DecisionRecord::new("prop-2", "rules/other.policy", Decision::Rejected))
            .await;

        let cited = ledger.cite_for_path("rules/safety.policy").await;
        assert_eq!(cited.len(), 1);
        assert_eq!(cited[0].decision, Decision::Approved);
        assert_eq!(cited[0].citation_count, 1);

        let cited_again = ledger.cite_for_path("rules/safety.policy").await;
        assert_eq!(cited_again[0].citation_count, 2);
    }
}
