//! Scope predicates for policies and standards.
//!
//! A predicate decides whether an aggregate applies to a target, and
//! carries a deterministic specificity measure used as the second key
//! in conflict resolution: a narrower match outranks a wider one.

use serde::{Deserialize, Serialize};

use crate::types::TargetScope;

/// Predicate selecting the targets an aggregate applies to.
///
/// Empty fields match everything; each constraint narrows the match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopePredicate {
    /// Module path prefix, matched on path-segment boundaries
    pub module_prefix: Option<String>,
    /// Capability domain the target must belong to
    pub domain: Option<String>,
    /// Symbol kinds the predicate applies to; empty means all kinds
    #[serde(default)]
    pub kinds: Vec<String>,
}

impl ScopePredicate {
    /// Predicate matching every target.
    pub fn any() -> Self {
        Self::default()
    }

    /// Predicate matching a module subtree.
    pub fn module(prefix: impl Into<String>) -> Self {
        Self {
            module_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Builder: restrict to a domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Builder: restrict to symbol kinds.
    pub fn with_kinds(mut self, kinds: Vec<String>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Whether this predicate matches the given target.
    pub fn matches(&self, target: &TargetScope) -> bool {
        if let Some(prefix) = &self.module_prefix {
            if !module_prefix_matches(prefix, &target.module_path) {
                return false;
            }
        }

        if let Some(domain) = &self.domain {
            match &target.domain {
                Some(d) if d == domain => {}
                _ => return false,
            }
        }

        if !self.kinds.is_empty() {
            match &target.kind {
                Some(k) if self.kinds.iter().any(|allowed| allowed == k) => {}
                _ => return false,
            }
        }

        true
    }

    /// Deterministic specificity measure; larger means narrower.
    ///
    /// Module-prefix length dominates so that `core::auth` always
    /// outranks `core`, per the resolution order. Domain and kind
    /// constraints break ties between equal prefixes.
    pub fn specificity(&self) -> u32 {
        let prefix_len = self
            .module_prefix
            .as_ref()
            .map(|p| p.len() as u32)
            .unwrap_or(0);

        let mut score = prefix_len * 4;
        if self.domain.is_some() {
            score += 2;
        }
        if !self.kinds.is_empty() {
            score += 1;
        }
        score
    }
}

/// Segment-aware prefix match: `core::auth` matches `core::auth` and
/// `core::auth::session`, but not `core::authority`.
fn module_prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() || path == prefix {
        return true;
    }
    path.strip_prefix(prefix)
        .map(|rest| rest.starts_with("::"))
        .unwrap_or(false)
}
