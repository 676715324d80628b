//! Configuration for the governance layer.

use serde::{Deserialize, Serialize};

use crate::proposal::RiskTier;
use crate::scheduler::RoleConfig;

/// Configuration for pipeline, audit gating, and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Signature quorums per risk tier
    pub approval: ApprovalPolicy,
    /// Credential verification timeout (ms); elapsing fails closed
    pub signing_timeout_ms: u64,
    /// Audit verdict tunables
    pub audit: AuditSettings,
    /// Role concurrency configuration
    pub roles: Vec<RoleConfig>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            approval: ApprovalPolicy::default(),
            signing_timeout_ms: 5_000,
            audit: AuditSettings::default(),
            roles: vec![],
        }
    }
}

impl GovernanceConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Signature quorums per risk tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Signatures for low-risk proposals
    pub low: usize,
    /// Signatures for medium-risk proposals
    pub medium: usize,
    /// Signatures for high-risk proposals
    pub high: usize,
    /// Extra signatures when a proposal is marked critical
    pub critical_extra: usize,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            low: 1,
            medium: 2,
            high: 2,
            critical_extra: 1,
        }
    }
}

impl ApprovalPolicy {
    /// Signatures required for a proposal.
    pub fn required(&self, tier: RiskTier, is_critical: bool) -> usize {
        let base = match tier {
            RiskTier::Low => self.low,
            RiskTier::Medium => self.medium,
            RiskTier::High => self.high,
        };
        if is_critical {
            base + self.critical_extra
        } else {
            base
        }
    }
}

/// Audit verdict tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Minimum score for a passing run
    pub pass_threshold: f32,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            pass_threshold: 0.8,
        }
    }
}

impl AuditSettings {
    /// Convert into the audit engine's config.
    pub fn to_audit_config(&self) -> auditor::AuditConfig {
        auditor::AuditConfig {
            pass_threshold: self.pass_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quorums() {
        let policy = ApprovalPolicy::default();
        assert_eq!(policy.required(RiskTier::Low, false), 1);
        assert_eq!(policy.required(RiskTier::High, false), 2);
        assert_eq!(policy.required(RiskTier::High, true), 3);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = GovernanceConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = GovernanceConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.signing_timeout_ms, config.signing_timeout_ms);
        assert_eq!(parsed.approval.high, config.approval.high);
    }
}
