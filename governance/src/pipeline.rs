//! The proposal/approval pipeline.
//!
//! The only path by which a governed artifact may change:
//! `open -> approved | rejected`, with `open/approved -> superseded`.
//! Approval requires the risk tier's signature quorum and a passing
//! canary rehearsal; integration applies the change as staged,
//! all-or-nothing work with full rollback on any stage failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use constitution::ConstitutionStore;

use crate::canary::{is_constitution_document, parse_change, CanaryGate};
use crate::config::ApprovalPolicy;
use crate::ledger::{Decision, DecisionLedger, DecisionRecord};
use crate::proposal::{
    signing_payload, FileChange, Proposal, ProposalSignature, ProposalStatus, RiskTier,
};
use crate::signing::CredentialVerifier;
use crate::store::ProposalStore;
use crate::workspace::{PathLocks, Workspace};
use crate::{GovernanceError, Result};

/// Re-ingestion hook invoked during integration.
///
/// Applies the written artifacts to the stores that index them, and
/// unwinds that application when a later stage fails.
#[async_trait]
pub trait Reingest: Send + Sync {
    /// Index the proposal's artifacts.
    async fn apply(&self, proposal: &Proposal) -> Result<()>;

    /// Unwind a prior `apply` for the same proposal.
    async fn rollback(&self, proposal: &Proposal) -> Result<()>;
}

/// Re-ingestion into the constitution store: document payloads are
/// published as new versions; rollback retracts them.
pub struct ConstitutionReingest {
    constitution: Arc<ConstitutionStore>,
    applied: tokio::sync::Mutex<std::collections::HashMap<String, Vec<String>>>,
}

impl ConstitutionReingest {
    /// Create a re-ingestion hook over a constitution store.
    pub fn new(constitution: Arc<ConstitutionStore>) -> Self {
        Self {
            constitution,
            applied: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl Reingest for ConstitutionReingest {
    async fn apply(&self, proposal: &Proposal) -> Result<()> {
        let mut published: Vec<String> = Vec::new();

        for change in &proposal.changes {
            if !is_constitution_document(&change.path) {
                continue;
            }
            let content = parse_change(change)?;
            let doc_id = match &content {
                constitution::DocumentContent::Policy(p) => p.id.clone(),
                constitution::DocumentContent::Precedence(p) => p.id.clone(),
            };

            match self.constitution.publish(&doc_id, content).await {
                Ok(_) => published.push(doc_id),
                Err(e) => {
                    // Unwind the partial publish before surfacing.
                    for doc_id in published.iter().rev() {
                        let _ = self.constitution.retract_last(doc_id).await;
                    }
                    return Err(e.into());
                }
            }
        }

        let mut applied = self.applied.lock().await;
        applied.insert(proposal.id.clone(), published);
        Ok(())
    }

    async fn rollback(&self, proposal: &Proposal) -> Result<()> {
        let mut applied = self.applied.lock().await;
        if let Some(published) = applied.remove(&proposal.id) {
            for doc_id in published.iter().rev() {
                self.constitution.retract_last(doc_id).await?;
            }
        }
        Ok(())
    }
}

/// Re-ingestion hook that indexes nothing. For pipelines whose
/// artifacts are re-ingested by an external scanner.
pub struct NoopReingest;

#[async_trait]
impl Reingest for NoopReingest {
    async fn apply(&self, _proposal: &Proposal) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self, _proposal: &Proposal) -> Result<()> {
        Ok(())
    }
}

/// The cryptographically gated state machine governing artifact change.
pub struct ProposalPipeline {
    store: Arc<dyn ProposalStore>,
    verifier: Arc<dyn CredentialVerifier>,
    canary: Arc<dyn CanaryGate>,
    workspace: Arc<dyn Workspace>,
    reingest: Arc<dyn Reingest>,
    locks: PathLocks,
    ledger: DecisionLedger,
    policy: ApprovalPolicy,
    signing_timeout: Duration,
}

impl ProposalPipeline {
    /// Assemble a pipeline.
    ///
    /// The workspace handle must be the pipeline's own unguarded one;
    /// every other writer goes through a guarded handle that respects
    /// [`PathLocks`].
    pub fn new(
        store: Arc<dyn ProposalStore>,
        verifier: Arc<dyn CredentialVerifier>,
        canary: Arc<dyn CanaryGate>,
        workspace: Arc<dyn Workspace>,
        reingest: Arc<dyn Reingest>,
        locks: PathLocks,
        policy: ApprovalPolicy,
        signing_timeout: Duration,
    ) -> Self {
        Self {
            store,
            verifier,
            canary,
            workspace,
            reingest,
            locks,
            ledger: DecisionLedger::new(),
            policy,
            signing_timeout,
        }
    }

    /// Open a proposal for a governed change.
    ///
    /// Any earlier proposal still holding the path's lock is
    /// superseded; the path stays locked for the new proposal.
    pub async fn create(
        &self,
        target_path: impl Into<String>,
        changes: Vec<FileChange>,
        justification: impl Into<String>,
        risk_tier: RiskTier,
        created_by: impl Into<String>,
    ) -> Result<Proposal> {
        let target_path = target_path.into();
        let justification = justification.into();

        if changes.is_empty() {
            return Err(GovernanceError::ValidationError(
                "a proposal must carry at least one file change".to_string(),
            ));
        }
        if justification.trim().is_empty() {
            return Err(GovernanceError::ValidationError(
                "a proposal must carry a justification".to_string(),
            ));
        }

        for earlier in self.store.active_for_path(&target_path).await? {
            let mut superseded = earlier;
            superseded.status = ProposalStatus::Superseded;
            self.store.update(&superseded).await?;
            self.ledger
                .record(DecisionRecord::new(
                    &superseded.id,
                    &target_path,
                    Decision::Superseded,
                ))
                .await;
            info!(
                superseded = %superseded.id,
                target_path = %target_path,
                "Earlier proposal superseded"
            );
        }

        let proposal = Proposal::new(target_path.clone(), changes, justification, risk_tier, created_by);
        self.store.insert(&proposal).await?;
        self.locks.lock(&target_path).await;

        info!(
            proposal_id = %proposal.id,
            target_path = %target_path,
            risk_tier = %risk_tier.as_str(),
            "Proposal opened"
        );
        Ok(proposal)
    }

    /// Record an approver's signature.
    ///
    /// Verification is bounded by the signing timeout and fails
    /// closed: a verifier that cannot answer in time is `Unavailable`,
    /// never an implicit pass. Invalid signatures are not stored.
    pub async fn sign(&self, proposal_id: &str, approver: &str, signature: &[u8]) -> Result<()> {
        let proposal = self.store.get(proposal_id).await?;
        if proposal.status != ProposalStatus::Open {
            return Err(GovernanceError::ValidationError(format!(
                "proposal {} is {:?}; signatures only attach while open",
                proposal_id, proposal.status
            )));
        }

        let payload = signing_payload(&proposal);
        let verdict = tokio::time::timeout(
            self.signing_timeout,
            self.verifier.verify(approver, &payload, signature),
        )
        .await
        .map_err(|_| {
            warn!(proposal_id = %proposal_id, approver = %approver, "Credential verification timed out");
            GovernanceError::Unavailable("credential verification timed out".to_string())
        })??;

        if !verdict {
            return Err(GovernanceError::InvalidSignature(approver.to_string()));
        }

        self.store
            .add_signature(&ProposalSignature {
                proposal_id: proposal_id.to_string(),
                approver: approver.to_string(),
                signature: signature.to_vec(),
                signed_at: Utc::now(),
                valid: true,
            })
            .await?;

        info!(proposal_id = %proposal_id, approver = %approver, "Signature recorded");
        Ok(())
    }

    /// Approve a proposal: quorum check, then canary rehearsal.
    ///
    /// A failed canary leaves the proposal open with the rehearsal's
    /// violations attached for operator review.
    pub async fn approve(&self, proposal_id: &str) -> Result<Proposal> {
        let mut proposal = self.store.get(proposal_id).await?;
        if proposal.status != ProposalStatus::Open {
            return Err(GovernanceError::ValidationError(format!(
                "proposal {} is {:?}; only open proposals approve",
                proposal_id, proposal.status
            )));
        }

        let signatures = self.store.signatures(proposal_id).await?;
        let have = signatures.iter().filter(|s| s.valid).count();
        let need = self.policy.required(proposal.risk_tier, proposal.is_critical);
        if have < need {
            return Err(GovernanceError::InsufficientSignatures { have, need });
        }

        let report = self.canary.rehearse(&proposal).await?;
        self.store.attach_canary(proposal_id, &report).await?;

        if !report.passed {
            warn!(
                proposal_id = %proposal_id,
                violations = report.violations.len(),
                "Canary rehearsal failed; proposal stays open"
            );
            return Err(GovernanceError::CanaryRejected {
                violations: report.violations.len(),
            });
        }

        proposal.last_canary = Some(report);
        proposal.status = ProposalStatus::Approved;
        self.store.update(&proposal).await?;
        self.ledger
            .record(
                DecisionRecord::new(proposal_id, &proposal.target_path, Decision::Approved)
                    .with_signatures(have)
                    .with_canary(true),
            )
            .await;

        info!(proposal_id = %proposal_id, signatures = have, "Proposal approved");
        Ok(proposal)
    }

    /// Integrate an approved proposal: write, re-ingest, commit, as
    /// one all-or-nothing unit.
    ///
    /// Any stage failure restores every earlier stage and surfaces
    /// [`GovernanceError::IntegrationFailure`]; the proposal stays
    /// approved and un-integrated, and is never retried automatically.
    pub async fn integrate(&self, proposal_id: &str) -> Result<Proposal> {
        let proposal = self.store.get(proposal_id).await?;
        if proposal.status != ProposalStatus::Approved {
            return Err(GovernanceError::ValidationError(format!(
                "proposal {} is {:?}; only approved proposals integrate",
                proposal_id, proposal.status
            )));
        }
        if proposal.integrated_at.is_some() {
            return Err(GovernanceError::ValidationError(format!(
                "proposal {proposal_id} is already integrated"
            )));
        }

        // Stage 1: file writes, tracking prior content for rollback.
        let mut written: Vec<(String, Option<String>)> = Vec::new();
        for change in &proposal.changes {
            match self.workspace.write(&change.path, &change.content).await {
                Ok(previous) => written.push((change.path.clone(), previous)),
                Err(e) => {
                    self.unwind_writes(&written).await;
                    return Err(GovernanceError::IntegrationFailure(format!(
                        "write to '{}' failed: {e}",
                        change.path
                    )));
                }
            }
        }

        // Stage 2: re-ingestion.
        if let Err(e) = self.reingest.apply(&proposal).await {
            self.unwind_writes(&written).await;
            return Err(GovernanceError::IntegrationFailure(format!(
                "re-ingestion failed: {e}"
            )));
        }

        // Stage 3: commit.
        if let Err(e) = self.store.mark_integrated(proposal_id, Utc::now()).await {
            let _ = self.reingest.rollback(&proposal).await;
            self.unwind_writes(&written).await;
            return Err(GovernanceError::IntegrationFailure(format!(
                "commit failed: {e}"
            )));
        }

        self.locks.unlock(&proposal.target_path).await;
        self.ledger
            .record(DecisionRecord::new(
                proposal_id,
                &proposal.target_path,
                Decision::Integrated,
            ))
            .await;

        info!(proposal_id = %proposal_id, files = proposal.changes.len(), "Proposal integrated");
        self.store.get(proposal_id).await
    }

    /// Terminally reject a proposal.
    pub async fn reject(&self, proposal_id: &str, reason: impl Into<String>) -> Result<Proposal> {
        let mut proposal = self.store.get(proposal_id).await?;
        if proposal.status != ProposalStatus::Open {
            return Err(GovernanceError::ValidationError(format!(
                "proposal {} is {:?}; only open proposals reject",
                proposal_id, proposal.status
            )));
        }

        proposal.status = ProposalStatus::Rejected;
        self.store.update(&proposal).await?;
        self.locks.unlock(&proposal.target_path).await;
        self.ledger
            .record(
                DecisionRecord::new(proposal_id, &proposal.target_path, Decision::Rejected)
                    .with_notes(reason),
            )
            .await;

        info!(proposal_id = %proposal_id, "Proposal rejected");
        Ok(proposal)
    }

    /// Paths currently write-locked by pending proposals.
    pub async fn locked_paths(&self) -> Vec<String> {
        self.locks.locked_paths().await
    }

    /// The decision ledger.
    pub fn ledger(&self) -> &DecisionLedger {
        &self.ledger
    }

    /// The proposal store.
    pub fn store(&self) -> &Arc<dyn ProposalStore> {
        &self.store
    }

    async fn unwind_writes(&self, written: &[(String, Option<String>)]) {
        for (path, previous) in written.iter().rev() {
            if let Err(e) = self.workspace.restore(path, previous.clone()).await {
                // Restoration failure leaves the workspace inconsistent;
                // nothing to do but make it loud.
                warn!(path = %path, error = %e, "Rollback restore failed");
            }
        }
    }
}
