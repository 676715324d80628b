//! Constitutional audit engine for the Covenant Protocol.
//!
//! The engine evaluates every applicable rule against the symbols in
//! scope, emits violations at each rule's declared severity, and
//! computes a pass/fail verdict. A single blocking-severity violation
//! fails the run regardless of score. Runs and their violations
//! persist as one transactional unit; consecutive runs are compared
//! for drift.
//!
//! The constitution arrives as an explicit snapshot argument, so a
//! canary rehearsal can audit an alternate constitution concurrently
//! with live audits.

pub mod check;
pub mod drift;
pub mod engine;
pub mod store;
pub mod types;

// Re-export main types
pub use check::{CheckFault, CheckOutcome, CheckRegistry, FnCheck, RuleCheck};
pub use drift::{classify_drift, DriftReport};
pub use engine::{AuditConfig, AuditEngine, AuditHistoryStats, AuditOutcome};
pub use store::{AuditStore, InMemoryAuditStore};
pub use types::*;

/// Error types for audit operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Unknown run or violation id
    #[error("not found: {0}")]
    NotFound(String),

    /// An audit is already in flight for the scope
    #[error("audit already in flight for scope '{0}'")]
    ScopeBusy(String),

    /// Constitutional lookup failed; a precedence conflict halts the
    /// run before anything persists
    #[error(transparent)]
    Constitution(#[from] constitution::ConstitutionError),

    /// The store failed to persist the run
    #[error("store error: {0}")]
    Store(String),
}

/// Result alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
