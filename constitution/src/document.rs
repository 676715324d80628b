//! Versioned storage for constitutional documents.
//!
//! Documents are immutable values: amendment appends a new version,
//! never edits one in place. Each version carries a SHA256 hash of its
//! content so integrity can be re-verified at any time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::types::{
    AggregateKind, EnforcementStrength, PolicyDocument, PrecedenceDocument, Rule, RuleStance,
    Severity,
};
use crate::{ConstitutionError, Result};

/// Content of a constitutional document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentContent {
    /// A policy or standard aggregate
    Policy(PolicyDocument),
    /// A precedence assignment document
    Precedence(PrecedenceDocument),
}

impl DocumentContent {
    /// When the contained document was last amended.
    pub fn amended_at(&self) -> DateTime<Utc> {
        match self {
            Self::Policy(p) => p.amended_at,
            Self::Precedence(p) => p.amended_at,
        }
    }
}

impl From<PolicyDocument> for DocumentContent {
    fn from(doc: PolicyDocument) -> Self {
        Self::Policy(doc)
    }
}

impl From<PrecedenceDocument> for DocumentContent {
    fn from(doc: PrecedenceDocument) -> Self {
        Self::Precedence(doc)
    }
}

/// One immutable version of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// Monotonic version number, starting at 1
    pub version: u32,
    /// SHA256 hash of the serialized content
    pub hash: String,
    /// The content itself
    pub content: DocumentContent,
    /// When this version was published
    pub published_at: DateTime<Utc>,
}

/// Append-only store of versioned documents keyed by document id.
pub struct DocumentStore {
    versions: Arc<RwLock<HashMap<String, Vec<DocumentVersion>>>>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            versions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish a new version of a document.
    ///
    /// Validates the content, computes its hash, and appends it as the
    /// new current version. Returns the version number.
    pub async fn publish(&self, doc_id: &str, content: DocumentContent) -> Result<u32> {
        validate_content(&content)?;
        let hash = hash_content(&content);

        let mut versions = self.versions.write().await;
        let history = versions.entry(doc_id.to_string()).or_default();
        let version = history.last().map(|v| v.version + 1).unwrap_or(1);

        tracing::info!(
            doc_id = %doc_id,
            version = version,
            hash = %hash,
            "Publishing document version"
        );

        history.push(DocumentVersion {
            version,
            hash,
            content,
            published_at: Utc::now(),
        });

        Ok(version)
    }

    /// Get the current version of a document.
    pub async fn current(&self, doc_id: &str) -> Result<DocumentVersion> {
        let versions = self.versions.read().await;
        versions
            .get(doc_id)
            .and_then(|h| h.last())
            .cloned()
            .ok_or_else(|| ConstitutionError::DocumentNotFound(doc_id.to_string()))
    }

    /// Get a specific version of a document.
    pub async fn version(&self, doc_id: &str, version: u32) -> Result<DocumentVersion> {
        let versions = self.versions.read().await;
        versions
            .get(doc_id)
            .and_then(|h| h.iter().find(|v| v.version == version))
            .cloned()
            .ok_or_else(|| ConstitutionError::DocumentNotFound(format!("{doc_id}@{version}")))
    }

    /// Full version history of a document, oldest first.
    pub async fn history(&self, doc_id: &str) -> Result<Vec<DocumentVersion>> {
        let versions = self.versions.read().await;
        versions
            .get(doc_id)
            .cloned()
            .ok_or_else(|| ConstitutionError::DocumentNotFound(doc_id.to_string()))
    }

    /// Recompute and check the stored hash of the current version.
    pub async fn verify(&self, doc_id: &str) -> Result<()> {
        let current = self.current(doc_id).await?;
        let recomputed = hash_content(&current.content);
        if recomputed != current.hash {
            tracing::warn!(
                doc_id = %doc_id,
                expected = %current.hash,
                actual = %recomputed,
                "Document hash mismatch"
            );
            return Err(ConstitutionError::HashMismatch(doc_id.to_string()));
        }
        Ok(())
    }

    /// Remove the most recent version of a document.
    ///
    /// Exists solely so a failed integration can unwind a publish it
    /// made moments earlier; amendment always goes through `publish`.
    /// Retracting the only version removes the document entirely.
    pub async fn retract_last(&self, doc_id: &str) -> Result<()> {
        let mut versions = self.versions.write().await;
        let history = versions
            .get_mut(doc_id)
            .ok_or_else(|| ConstitutionError::DocumentNotFound(doc_id.to_string()))?;

        let retracted = history.pop();
        tracing::warn!(
            doc_id = %doc_id,
            version = retracted.map(|v| v.version).unwrap_or(0),
            "Document version retracted"
        );

        if history.is_empty() {
            versions.remove(doc_id);
        }
        Ok(())
    }

    /// Current versions of all documents.
    pub async fn all_current(&self) -> Vec<(String, DocumentVersion)> {
        let versions = self.versions.read().await;
        versions
            .iter()
            .filter_map(|(id, h)| h.last().map(|v| (id.clone(), v.clone())))
            .collect()
    }

    /// All document ids in the store.
    pub async fn document_ids(&self) -> Vec<String> {
        let versions = self.versions.read().await;
        versions.keys().cloned().collect()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute SHA256 hash of serialized document content.
pub fn hash_content(content: &DocumentContent) -> String {
    let json = serde_json::to_string(content).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validate document content before publishing.
fn validate_content(content: &DocumentContent) -> Result<()> {
    match content {
        DocumentContent::Policy(policy) => {
            if policy.id.is_empty() {
                return Err(ConstitutionError::ValidationError(
                    "policy id must not be empty".to_string(),
                ));
            }
            for rule in &policy.rules {
                if rule.id.is_empty() || rule.subject.is_empty() {
                    return Err(ConstitutionError::ValidationError(format!(
                        "rule in policy '{}' missing id or subject",
                        policy.id
                    )));
                }
                if rule.check_ref.is_empty() {
                    return Err(ConstitutionError::ValidationError(format!(
                        "rule '{}' has no check reference",
                        rule.id
                    )));
                }
            }
            Ok(())
        }
        DocumentContent::Precedence(precedence) => {
            if precedence.id.is_empty() {
                return Err(ConstitutionError::ValidationError(
                    "precedence document id must not be empty".to_string(),
                ));
            }
            Ok(())
        }
    }
}

/// Raw rule as written in document YAML. Severity is optional at parse
/// time so its absence can be rejected with a clear error instead of a
/// serde failure.
#[derive(Debug, Deserialize)]
struct RawRule {
    id: String,
    subject: String,
    claim: String,
    #[serde(default)]
    rationale: String,
    strength: Option<EnforcementStrength>,
    severity: Option<Severity>,
    stance: RuleStance,
    check_ref: String,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    id: String,
    name: String,
    #[serde(default = "default_kind")]
    kind: AggregateKind,
    #[serde(default)]
    scope: crate::scope::ScopePredicate,
    #[serde(default)]
    rules: Vec<RawRule>,
    amended_at: Option<DateTime<Utc>>,
}

fn default_kind() -> AggregateKind {
    AggregateKind::Policy
}

/// Parse a policy or standard document from YAML.
///
/// Rules without a declared severity are rejected: a rule's severity
/// decides whether its violations block an audit, and guessing a
/// default would make that gate unpredictable.
pub fn parse_policy_yaml(yaml: &str) -> Result<PolicyDocument> {
    let raw: RawPolicy = serde_yaml::from_str(yaml)
        .map_err(|e| ConstitutionError::ValidationError(e.to_string()))?;

    let mut rules = Vec::with_capacity(raw.rules.len());
    for rule in raw.rules {
        let severity = rule.severity.ok_or_else(|| {
            ConstitutionError::ValidationError(format!(
                "rule '{}' declares no severity",
                rule.id
            ))
        })?;

        // Standards are advisory-first: unspecified strength stays advisory.
        let strength = rule.strength.unwrap_or(match raw.kind {
            AggregateKind::Standard => EnforcementStrength::Advisory,
            AggregateKind::Policy => EnforcementStrength::Blocking,
        });

        rules.push(Rule {
            id: rule.id,
            subject: rule.subject,
            claim: rule.claim,
            rationale: rule.rationale,
            strength,
            severity,
            stance: rule.stance,
            check_ref: rule.check_ref,
        });
    }

    Ok(PolicyDocument {
        id: raw.id,
        name: raw.name,
        kind: raw.kind,
        scope: raw.scope,
        rules,
        amended_at: raw.amended_at.unwrap_or_else(Utc::now),
    })
}

/// Parse a precedence document from YAML.
pub fn parse_precedence_yaml(yaml: &str) -> Result<PrecedenceDocument> {
    #[derive(Debug, Deserialize)]
    struct RawPrecedence {
        id: String,
        levels: HashMap<String, i32>,
        amended_at: Option<DateTime<Utc>>,
    }

    let raw: RawPrecedence = serde_yaml::from_str(yaml)
        .map_err(|e| ConstitutionError::ValidationError(e.to_string()))?;

    Ok(PrecedenceDocument {
        id: raw.id,
        levels: raw.levels,
        amended_at: raw.amended_at.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopePredicate;

    fn sample_policy() -> PolicyDocument {
        PolicyDocument {
            id: "policy-auth".to_string(),
            name: "Authentication policy".to_string(),
            kind: AggregateKind::Policy,
            scope: ScopePredicate::module("core::auth"),
            rules: vec![Rule {
                id: "rule-session-expiry".to_string(),
                subject: "session-expiry".to_string(),
                claim: "Sessions must expire".to_string(),
                rationale: "Stale sessions widen the attack surface".to_string(),
                strength: EnforcementStrength::Blocking,
                severity: Severity::Error,
                stance: RuleStance::Mandates,
                check_ref: "check:session-expiry".to_string(),
            }],
            amended_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_version() {
        let store = DocumentStore::new();

        let v1 = store
            .publish("policy-auth", sample_policy().into())
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let v2 = store
            .publish("policy-auth", sample_policy().into())
            .await
            .unwrap();
        assert_eq!(v2, 2);

        let current = store.current("policy-auth").await.unwrap();
        assert_eq!(current.version, 2);

        let history = store.history("policy-auth").await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_verify_detects_intact_document() {
        let store = DocumentStore::new();
        store
            .publish("policy-auth", sample_policy().into())
            .await
            .unwrap();
        store.verify("policy-auth").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_document() {
        let store = DocumentStore::new();
        let err = store.current("nope").await.unwrap_err();
        assert!(matches!(err, ConstitutionError::DocumentNotFound(_)));
    }

    #[test]
    fn test_parse_policy_rejects_missing_severity() {
        let yaml = r#"
id: policy-x
name: Policy X
rules:
  - id: rule-1
    subject: logging
    claim: All handlers log their entry
    stance: mandates
    check_ref: "check:logging"
"#;
        let err = parse_policy_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConstitutionError::ValidationError(_)));
        assert!(err.to_string().contains("severity"));
    }

    #[test]
    fn test_parse_standard_defaults_advisory() {
        let yaml = r#"
id: standard-naming
name: Naming standard
kind: standard
rules:
  - id: rule-snake
    subject: naming
    claim: Functions use snake_case
    severity: info
    stance: mandates
    check_ref: "check:naming"
"#;
        let doc = parse_policy_yaml(yaml).unwrap();
        assert_eq!(doc.kind, AggregateKind::Standard);
        assert_eq!(doc.rules[0].strength, EnforcementStrength::Advisory);
    }

    #[test]
    fn test_parse_precedence() {
        let yaml = r#"
id: precedence-root
levels:
  policy-auth: 0
  standard-naming: 10
"#;
        let doc = parse_precedence_yaml(yaml).unwrap();
        assert_eq!(doc.levels["policy-auth"], 0);
        assert_eq!(doc.levels["standard-naming"], 10);
    }
}
