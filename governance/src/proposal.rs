//! Proposal and signature types.
//!
//! A proposal is the only vehicle by which a governed artifact may
//! change. Its content hash covers every file payload in path order,
//! and the signing payload binds approver signatures to that hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use auditor::Violation;

/// Risk classification of a proposed change.
///
/// Decides the signature quorum the approval requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Routine change
    Low,
    /// Elevated scrutiny
    Medium,
    /// Maximum scrutiny
    High,
}

impl RiskTier {
    /// String representation for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One file payload carried by a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    /// Path the content lands at
    pub path: String,
    /// Full replacement content
    pub content: String,
}

impl FileChange {
    /// Create a file change.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Lifecycle state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Collecting signatures
    Open,
    /// Quorum met and canary passed; awaiting integration
    Approved,
    /// Terminally refused
    Rejected,
    /// Overridden by a later proposal for the same path
    Superseded,
}

/// Verdict of a canary rehearsal, attached to the proposal for
/// operator review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryReport {
    /// Audit run the rehearsal executed
    pub run_id: String,
    /// Whether the rehearsal passed
    pub passed: bool,
    /// Audit score of the rehearsal
    pub score: f32,
    /// Violations the rehearsal found
    pub violations: Vec<Violation>,
    /// When the rehearsal ran
    pub executed_at: DateTime<Utc>,
}

/// A proposed change to a governed artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier
    pub id: String,
    /// Path the proposal governs; write-locked while pending
    pub target_path: String,
    /// File payloads the integration will write
    pub changes: Vec<FileChange>,
    /// SHA256 over all payloads in path order
    pub content_hash: String,
    /// Why the change should land
    pub justification: String,
    /// Risk classification
    pub risk_tier: RiskTier,
    /// Raises the signature quorum by one
    pub is_critical: bool,
    /// Lifecycle state
    pub status: ProposalStatus,
    /// Set once integration committed; an approved proposal without
    /// this is still pending integration
    pub integrated_at: Option<DateTime<Utc>>,
    /// Who created the proposal
    pub created_by: String,
    /// When it was created
    pub created_at: DateTime<Utc>,
    /// Most recent canary verdict
    pub last_canary: Option<CanaryReport>,
}

impl Proposal {
    /// Create an open proposal.
    pub fn new(
        target_path: impl Into<String>,
        changes: Vec<FileChange>,
        justification: impl Into<String>,
        risk_tier: RiskTier,
        created_by: impl Into<String>,
    ) -> Self {
        let hash = content_hash(&changes);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_path: target_path.into(),
            changes,
            content_hash: hash,
            justification: justification.into(),
            risk_tier,
            is_critical: false,
            status: ProposalStatus::Open,
            integrated_at: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
            last_canary: None,
        }
    }

    /// Builder: mark the proposal critical.
    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }

    /// Whether the proposal still holds its target path's write lock.
    pub fn holds_lock(&self) -> bool {
        matches!(self.status, ProposalStatus::Open)
            || (matches!(self.status, ProposalStatus::Approved) && self.integrated_at.is_none())
    }
}

/// A signature from one approver over a proposal's signing payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalSignature {
    /// Proposal the signature covers
    pub proposal_id: String,
    /// Approver identity
    pub approver: String,
    /// Raw signature bytes
    pub signature: Vec<u8>,
    /// When the signature was taken
    pub signed_at: DateTime<Utc>,
    /// Verification verdict at signing time
    pub valid: bool,
}

/// SHA256 over all file payloads in path order.
pub fn content_hash(changes: &[FileChange]) -> String {
    let mut ordered: Vec<&FileChange> = changes.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for change in ordered {
        hasher.update(change.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(change.content.as_bytes());
        hasher.update([1u8]);
    }
    hex::encode(hasher.finalize())
}

/// The bytes an approver signs: proposal id bound to content hash, so
/// a signature cannot be replayed onto different content.
pub fn signing_payload(proposal: &Proposal) -> Vec<u8> {
    format!("{}:{}", proposal.id, proposal.content_hash).into_bytes()
}
