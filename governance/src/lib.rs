//! Proposal pipeline and task scheduling for the Covenant Protocol.
//!
//! Every mutation to a governed artifact passes through the proposal
//! pipeline: justification, multi-signature approval against
//! registered credentials, a canary audit on isolated copies, and a
//! transactional integration with full rollback. The task scheduler
//! assigns governed work to roles under a concurrency cap and a
//! non-overlap invariant enforced at the storage layer.

pub mod canary;
pub mod config;
pub mod ledger;
pub mod pipeline;
pub mod proposal;
pub mod scheduler;
pub mod signing;
pub mod store;
pub mod workspace;

// Re-export main types
pub use canary::{CanaryGate, ConstitutionCanary};
pub use config::{ApprovalPolicy, GovernanceConfig};
pub use ledger::{Decision, DecisionLedger, DecisionRecord};
pub use pipeline::{ConstitutionReingest, NoopReingest, ProposalPipeline, Reingest};
pub use proposal::{
    content_hash, signing_payload, CanaryReport, FileChange, Proposal, ProposalSignature,
    ProposalStatus, RiskTier,
};
pub use scheduler::{RoleConfig, Task, TaskOutcome, TaskScheduler, TaskStatus};
pub use signing::{CredentialVerifier, Ed25519Verifier};
pub use store::{InMemoryProposalStore, InMemoryTaskStore, ProposalStore, TaskStore};
pub use workspace::{MemoryWorkspace, PathLocks, Workspace};

/// Error types for governance operations.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    /// Unknown proposal, task, or signer
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input or an illegal state transition
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A signature failed verification against the registered credential
    #[error("invalid signature from '{0}'")]
    InvalidSignature(String),

    /// Credential verification could not complete; fails closed
    #[error("credential verification unavailable: {0}")]
    Unavailable(String),

    /// The risk tier's signature quorum is not met
    #[error("insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures {
        /// Distinct valid signatures present
        have: usize,
        /// Signatures the risk tier requires
        need: usize,
    },

    /// The canary audit failed; the proposal stays open with the
    /// violations attached for operator review
    #[error("canary audit failed with {violations} violation(s)")]
    CanaryRejected {
        /// Number of violations the canary found
        violations: usize,
    },

    /// A path is under an open or unintegrated proposal
    #[error("path '{0}' is write-locked by a pending proposal")]
    PathLocked(String),

    /// A role is already at its concurrency cap
    #[error("role '{role}' is at its concurrency cap of {limit}")]
    CapacityExceeded {
        /// Role that hit the cap
        role: String,
        /// Configured cap
        limit: usize,
    },

    /// Starting would overlap another executing task for the role
    #[error("role '{role}' already has an executing task with an overlapping interval")]
    OverlapConflict {
        /// Role with the conflicting task
        role: String,
    },

    /// The task's approval gate is not satisfied
    #[error("task blocked: {0}")]
    Blocked(String),

    /// A stage of proposal integration failed; everything rolled back
    #[error("integration failure: {0}")]
    IntegrationFailure(String),

    /// Constitutional lookup or publish failed
    #[error(transparent)]
    Constitution(#[from] constitution::ConstitutionError),

    /// Catalog operation failed
    #[error(transparent)]
    Catalog(#[from] catalog::CatalogError),

    /// Audit engine failed
    #[error(transparent)]
    Audit(#[from] auditor::AuditError),

    /// Store failure
    #[error("store error: {0}")]
    Store(String),
}

/// Result alias for governance operations.
pub type Result<T> = std::result::Result<T, GovernanceError>;
