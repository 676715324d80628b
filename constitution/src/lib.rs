//! Constitutional document management for the Covenant Protocol.
//!
//! This crate holds the machine-readable constitution that governs
//! autonomous change: atomic rules, policy and standard aggregates, and
//! precedence documents. It exposes scope matching and the deterministic
//! conflict-resolution order used by the audit engine.
//!
//! # Key Components
//!
//! - [`DocumentStore`]: versioned, append-only storage for constitutional documents
//! - [`ConstitutionStore`]: in-memory index with immutable [`ConstitutionSnapshot`]s
//! - [`applicable_rules`]: scope-matched rule lookup with precedence resolution
//!
//! # Example
//!
//! ```ignore
//! use constitution::{ConstitutionStore, TargetScope};
//!
//! let store = ConstitutionStore::new();
//! store.publish("policy-core", policy.into()).await?;
//! let snapshot = store.snapshot().await;
//! let rules = constitution::applicable_rules(&snapshot, &target)?;
//! ```

pub mod conflict;
pub mod document;
pub mod scope;
pub mod snapshot;
pub mod types;

// Re-export main types
pub use conflict::{applicable_rules, ApplicableRule};
pub use document::{
    parse_policy_yaml, parse_precedence_yaml, DocumentContent, DocumentStore, DocumentVersion,
};
pub use scope::ScopePredicate;
pub use snapshot::{ConstitutionSnapshot, ConstitutionStore};
pub use types::*;

/// Error types for constitutional operations.
#[derive(Debug, thiserror::Error)]
pub enum ConstitutionError {
    /// Document not found
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Malformed document or rule definition
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Irreducible tie between contradictory rules. This is a
    /// constitutional defect and must surface to the operator.
    #[error("precedence conflict on subject '{subject}': rules '{rule_a}' and '{rule_b}' tie at level {level}")]
    PrecedenceConflict {
        /// Subject both rules govern
        subject: String,
        /// First tied rule id
        rule_a: String,
        /// Second tied rule id
        rule_b: String,
        /// Shared precedence level
        level: i32,
    },

    /// Stored hash does not match recomputed content hash
    #[error("hash mismatch for document {0}")]
    HashMismatch(String),
}

/// Result alias for constitutional operations.
pub type Result<T> = std::result::Result<T, ConstitutionError>;
