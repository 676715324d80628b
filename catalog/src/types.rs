//! Core types for symbols, capabilities, and their links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::StructuralSignature;

/// Kind of a discovered code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Free function
    Function,
    /// Method on a type
    Method,
    /// Class or type definition
    Class,
    /// Module or namespace
    Module,
}

impl SymbolKind {
    /// String representation for scope matching and persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Module => "module",
        }
    }
}

/// Lifecycle state of a symbol record.
///
/// States advance in order; deprecation can happen from any state and
/// is the only soft-delete mechanism the catalog has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolState {
    /// Freshly ingested, nothing known beyond structure
    Discovered,
    /// Assigned to a capability domain
    Classified,
    /// Linked to concrete capabilities
    Bound,
    /// Links confirmed by audit or review
    Verified,
    /// No longer present in the source tree
    Deprecated,
}

impl SymbolState {
    /// Whether `next` is a legal transition from this state.
    pub fn can_advance_to(&self, next: SymbolState) -> bool {
        if next == SymbolState::Deprecated {
            return true;
        }
        matches!(
            (self, next),
            (SymbolState::Discovered, SymbolState::Classified)
                | (SymbolState::Classified, SymbolState::Bound)
                | (SymbolState::Bound, SymbolState::Verified)
        )
    }
}

/// Health assessment of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No known problems
    Healthy,
    /// Known problems, still functional
    Degraded,
    /// Known to be broken
    Failing,
    /// Not yet assessed
    Unknown,
}

/// A discovered unit of code with a stable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    /// Stable identifier, never reused, survives renames
    pub id: String,
    /// Human-readable natural key; may change under refactor
    pub symbol_path: String,
    /// Module the symbol lives in
    pub module_path: String,
    /// Fully qualified name
    pub qualified_name: String,
    /// Kind of code unit
    pub kind: SymbolKind,
    /// Structural signature as supplied by the parser
    pub signature: StructuralSignature,
    /// Hash over normalized structure; naming- and format-insensitive
    pub fingerprint: String,
    /// Lifecycle state
    pub state: SymbolState,
    /// Health assessment
    pub health: HealthStatus,
    /// Whether the symbol is externally visible
    pub public: bool,
    /// Optional capability label from classification
    pub capability_hint: Option<String>,
    /// Optional free-text intent
    pub intent: Option<String>,
    /// Outgoing call references (dependency edges)
    pub calls: Vec<String>,
    /// Paths this symbol previously lived at
    pub previous_paths: Vec<String>,
    /// When the symbol was first ingested
    pub first_seen: DateTime<Utc>,
    /// When the record last changed
    pub last_modified: DateTime<Utc>,
}

/// Status of a declared capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    /// In service
    Active,
    /// Declared but not yet delivered
    Draft,
    /// Being retired
    Deprecated,
}

/// A named unit of system behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Unique identifier
    pub id: String,
    /// Domain the capability belongs to; (domain, name) is unique
    pub domain: String,
    /// Capability name within its domain
    pub name: String,
    /// Owning team or agent
    pub owner: String,
    /// Lifecycle status
    pub status: CapabilityStatus,
    /// Capabilities this one depends on
    pub depends_on: Vec<String>,
    /// Aggregate test coverage percentage
    pub coverage_percent: f32,
}

impl Capability {
    /// Create a draft capability.
    pub fn new(domain: impl Into<String>, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain: domain.into(),
            name: name.into(),
            owner: owner.into(),
            status: CapabilityStatus::Draft,
            depends_on: Vec::new(),
            coverage_percent: 0.0,
        }
    }
}

/// Provenance of a symbol-capability link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkSource {
    /// Entered by a human
    Manual,
    /// Produced by static rule matching
    Rule,
    /// Inferred during an audit run
    AuditorInfer,
    /// Produced by a semantic classifier
    LlmClassified,
}

impl LinkSource {
    /// String representation for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Rule => "rule",
            Self::AuditorInfer => "auditor-infer",
            Self::LlmClassified => "llm-classified",
        }
    }
}

/// A confidence-scored link between a symbol and a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolCapabilityLink {
    /// Linked symbol
    pub symbol_id: String,
    /// Linked capability
    pub capability_id: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Who or what produced the link
    pub source: LinkSource,
    /// Confirmed by audit or review
    pub verified: bool,
    /// When the link was created or last overwritten
    pub linked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_progression() {
        assert!(SymbolState::Discovered.can_advance_to(SymbolState::Classified));
        assert!(SymbolState::Classified.can_advance_to(SymbolState::Bound));
        assert!(SymbolState::Bound.can_advance_to(SymbolState::Verified));
        assert!(!SymbolState::Discovered.can_advance_to(SymbolState::Verified));
        assert!(!SymbolState::Verified.can_advance_to(SymbolState::Discovered));
    }

    #[test]
    fn test_deprecation_from_any_state() {
        for state in [
            SymbolState::Discovered,
            SymbolState::Classified,
            SymbolState::Bound,
            SymbolState::Verified,
        ] {
            assert!(state.can_advance_to(SymbolState::Deprecated));
        }
    }
}
