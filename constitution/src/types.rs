//! Core types for the constitutional document model.
//!
//! Rules are atomic statements; policies and standards aggregate rules
//! behind a scope predicate; precedence documents assign authority
//! levels used only for conflict resolution, never for execution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::ScopePredicate;

/// Severity attached to a rule and inherited by its violations.
///
/// Severity is mandatory on every rule; documents whose rules omit it
/// are rejected at publish time rather than defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational finding, never affects the verdict
    Info,
    /// Should be addressed, does not block
    Warning,
    /// Blocks the audit verdict
    Error,
    /// Blocks the audit verdict, highest urgency
    Critical,
}

impl Severity {
    /// Whether a violation at this severity forces a failed verdict.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }

    /// Weight used in the audit score aggregate.
    pub fn weight(&self) -> u32 {
        match self {
            Self::Info => 1,
            Self::Warning => 2,
            Self::Error => 4,
            Self::Critical => 8,
        }
    }

    /// String representation for logs and persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// How strongly a rule is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementStrength {
    /// Recorded but never gates a verdict on its own
    Advisory,
    /// Participates in pass/fail gating
    Blocking,
}

/// The stance a rule takes toward its subject.
///
/// Two applicable rules contradict each other when they share a subject
/// and take opposing stances; that is the case precedence resolution
/// exists to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStance {
    /// The subject must hold
    Mandates,
    /// The subject must not hold
    Prohibits,
}

impl RuleStance {
    /// Whether this stance contradicts another.
    pub fn contradicts(&self, other: &Self) -> bool {
        self != other
    }
}

/// An atomic constitutional statement.
///
/// Rules never aggregate other rules; aggregation is the job of
/// [`PolicyDocument`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier
    pub id: String,
    /// What aspect of the target this rule governs
    pub subject: String,
    /// The claim being made
    pub claim: String,
    /// Why the rule exists
    pub rationale: String,
    /// Enforcement strength
    pub strength: EnforcementStrength,
    /// Severity of a violation of this rule
    pub severity: Severity,
    /// Stance toward the subject
    pub stance: RuleStance,
    /// Reference to the external evaluation routine that checks this rule
    pub check_ref: String,
}

/// Kind of rule aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    /// Enforced aggregate
    Policy,
    /// Advisory-first aggregate; embedded rules default to advisory strength
    Standard,
}

/// An aggregate of rules plus the scope predicate they apply to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Policy or standard
    pub kind: AggregateKind,
    /// Which targets this aggregate applies to
    pub scope: ScopePredicate,
    /// Embedded rules
    pub rules: Vec<Rule>,
    /// When the document was last amended
    pub amended_at: DateTime<Utc>,
}

/// Assigns integer authority levels to policies and standards.
///
/// Lower level means higher authority. Used only during conflict
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecedenceDocument {
    /// Unique identifier
    pub id: String,
    /// Policy id to authority level
    pub levels: HashMap<String, i32>,
    /// When the document was last amended
    pub amended_at: DateTime<Utc>,
}

/// Scope descriptor for a rule-applicability query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetScope {
    /// Module path of the target, e.g. `core::auth::session`
    pub module_path: String,
    /// Optional capability domain
    pub domain: Option<String>,
    /// Optional symbol kind, e.g. `function`
    pub kind: Option<String>,
}

impl TargetScope {
    /// Create a scope for a bare module path.
    pub fn module(path: impl Into<String>) -> Self {
        Self {
            module_path: path.into(),
            ..Default::default()
        }
    }

    /// Builder: set the domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Builder: set the symbol kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}
