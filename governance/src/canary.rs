//! Canary audits: rehearsing a proposed change on isolated copies.
//!
//! The canary gate applies a proposal to cloned constitution and
//! catalog state and runs a full audit there. It owns a private audit
//! engine with its own history, so a rehearsal never contends with the
//! live engine's per-scope guard and never pollutes live drift
//! comparisons.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use auditor::{AuditConfig, AuditEngine, AuditScope, CheckRegistry, InMemoryAuditStore};
use catalog::CapabilityGraph;
use constitution::{
    parse_policy_yaml, parse_precedence_yaml, ConstitutionSnapshot, ConstitutionStore,
    DocumentContent, PolicyDocument, PrecedenceDocument,
};

use crate::proposal::{CanaryReport, FileChange, Proposal};
use crate::{GovernanceError, Result};

/// Approval gate that rehearses a proposal before it can be approved.
#[async_trait]
pub trait CanaryGate: Send + Sync {
    /// Apply the proposal to isolated copies and audit them.
    async fn rehearse(&self, proposal: &Proposal) -> Result<CanaryReport>;
}

/// Canary gate for constitutional-document proposals.
///
/// Document payloads (`.policy`, `.rules`, `.precedence`, `.yaml`,
/// `.yml`) are parsed and grafted onto a candidate constitution; other
/// payloads leave the constitution untouched and the rehearsal becomes
/// a re-audit of the current catalog under the current rules.
pub struct ConstitutionCanary {
    engine: AuditEngine,
    constitution: Arc<ConstitutionStore>,
    graph: CapabilityGraph,
}

impl ConstitutionCanary {
    /// Create a canary gate with a private audit engine.
    pub fn new(
        registry: CheckRegistry,
        config: AuditConfig,
        constitution: Arc<ConstitutionStore>,
        graph: CapabilityGraph,
    ) -> Self {
        Self {
            engine: AuditEngine::with_config(registry, Arc::new(InMemoryAuditStore::new()), config),
            constitution,
            graph,
        }
    }

    /// Build the candidate constitution with the proposal applied.
    async fn candidate_constitution(&self, proposal: &Proposal) -> Result<ConstitutionSnapshot> {
        let mut policies: Vec<PolicyDocument> = Vec::new();
        let mut precedence: Vec<PrecedenceDocument> = Vec::new();

        for (_, version) in self.constitution.documents().all_current().await {
            match version.content {
                DocumentContent::Policy(p) => policies.push(p),
                DocumentContent::Precedence(p) => precedence.push(p),
            }
        }

        for change in &proposal.changes {
            if !is_constitution_document(&change.path) {
                debug!(path = %change.path, "Non-document payload; constitution unchanged");
                continue;
            }
            match parse_change(change)? {
                DocumentContent::Policy(doc) => {
                    policies.retain(|p| p.id != doc.id);
                    policies.push(doc);
                }
                DocumentContent::Precedence(doc) => {
                    precedence.retain(|p| p.id != doc.id);
                    precedence.push(doc);
                }
            }
        }

        policies.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ConstitutionSnapshot::from_documents(policies, precedence))
    }
}

#[async_trait]
impl CanaryGate for ConstitutionCanary {
    async fn rehearse(&self, proposal: &Proposal) -> Result<CanaryReport> {
        let candidate = self.candidate_constitution(proposal).await?;
        // A detached clone; mutating or auditing it cannot touch live state.
        let catalog_snapshot = self.graph.snapshot().await;

        let outcome = self
            .engine
            .run(
                AuditScope::full(),
                &candidate,
                &catalog_snapshot,
                &format!("canary:{}", proposal.id),
            )
            .await?;

        info!(
            proposal_id = %proposal.id,
            run_id = %outcome.run.id,
            passed = outcome.run.passed,
            violations = outcome.violations.len(),
            "Canary rehearsal finished"
        );

        Ok(CanaryReport {
            run_id: outcome.run.id,
            passed: outcome.run.passed,
            score: outcome.run.score,
            violations: outcome.violations,
            executed_at: Utc::now(),
        })
    }
}

/// Whether a path carries a constitutional document.
pub fn is_constitution_document(path: &str) -> bool {
    [".policy", ".rules", ".precedence", ".yaml", ".yml"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// Parse a document payload, trying the policy grammar first.
pub fn parse_change(change: &FileChange) -> Result<DocumentContent> {
    if let Ok(doc) = parse_policy_yaml(&change.content) {
        return Ok(DocumentContent::Policy(doc));
    }
    match parse_precedence_yaml(&change.content) {
        Ok(doc) => Ok(DocumentContent::Precedence(doc)),
        Err(_) => Err(GovernanceError::ValidationError(format!(
            "payload at '{}' parses as neither policy nor precedence document",
            change.path
        ))),
    }
}
