//! Immutable constitution snapshots.
//!
//! The "current constitution" is never ambient global state: callers
//! take an [`Arc<ConstitutionSnapshot>`] and thread it through audit
//! calls explicitly. A canary audit can therefore evaluate against an
//! alternate snapshot while live audits keep using the current one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::document::{DocumentContent, DocumentStore};
use crate::types::{PolicyDocument, PrecedenceDocument, Rule};
use crate::Result;

/// An immutable index over the current versions of every document.
#[derive(Debug, Clone)]
pub struct ConstitutionSnapshot {
    /// Current policy and standard aggregates
    policies: Vec<PolicyDocument>,
    /// Merged precedence assignments: policy id to authority level
    precedence: HashMap<String, i32>,
    /// Deterministic hash of the snapshot contents
    snapshot_hash: String,
    /// When the snapshot was built
    built_at: DateTime<Utc>,
}

impl ConstitutionSnapshot {
    /// Build a snapshot from explicit documents.
    pub fn from_documents(
        policies: Vec<PolicyDocument>,
        precedence_docs: Vec<PrecedenceDocument>,
    ) -> Self {
        let precedence = merge_precedence(&precedence_docs);
        let snapshot_hash = hash_snapshot(&policies, &precedence);

        Self {
            policies,
            precedence,
            snapshot_hash,
            built_at: Utc::now(),
        }
    }

    /// Empty snapshot; every target has no applicable rules.
    pub fn empty() -> Self {
        Self::from_documents(Vec::new(), Vec::new())
    }

    /// All policy and standard aggregates.
    pub fn policies(&self) -> &[PolicyDocument] {
        &self.policies
    }

    /// Authority level for a policy; unassigned policies rank last.
    pub fn level_for(&self, policy_id: &str) -> i32 {
        self.precedence.get(policy_id).copied().unwrap_or(i32::MAX)
    }

    /// Look up a rule by id across all aggregates.
    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.policies
            .iter()
            .flat_map(|p| p.rules.iter())
            .find(|r| r.id == rule_id)
    }

    /// Deterministic hash of this snapshot, for audit records.
    pub fn snapshot_hash(&self) -> &str {
        &self.snapshot_hash
    }

    /// When this snapshot was built.
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}

/// Merge precedence documents into one assignment map.
///
/// When two documents assign the same policy, the later-amended
/// document wins; an exact tie keeps the lower (more authoritative)
/// level so a defect cannot quietly weaken authority.
fn merge_precedence(docs: &[PrecedenceDocument]) -> HashMap<String, i32> {
    let mut merged: HashMap<String, (i32, DateTime<Utc>)> = HashMap::new();

    for doc in docs {
        for (policy_id, level) in &doc.levels {
            match merged.get(policy_id) {
                Some((existing_level, existing_at)) => {
                    let replace = doc.amended_at > *existing_at
                        || (doc.amended_at == *existing_at && *level < *existing_level);
                    if replace {
                        merged.insert(policy_id.clone(), (*level, doc.amended_at));
                    }
                }
                None => {
                    merged.insert(policy_id.clone(), (*level, doc.amended_at));
                }
            }
        }
    }

    merged.into_iter().map(|(k, (level, _))| (k, level)).collect()
}

/// Deterministic hash over sorted policy ids, versions, and levels.
fn hash_snapshot(policies: &[PolicyDocument], precedence: &HashMap<String, i32>) -> String {
    let mut hasher = Sha256::new();

    let mut policy_lines: Vec<String> = policies
        .iter()
        .map(|p| {
            let json = serde_json::to_string(p).unwrap_or_default();
            format!("{}:{}", p.id, json)
        })
        .collect();
    policy_lines.sort();
    for line in policy_lines {
        hasher.update(line.as_bytes());
    }

    let mut level_lines: Vec<String> = precedence
        .iter()
        .map(|(id, level)| format!("{id}={level}"))
        .collect();
    level_lines.sort();
    for line in level_lines {
        hasher.update(line.as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// The live constitution: a document store plus a cached snapshot.
///
/// Reads take the cached snapshot without contention; publishing
/// rebuilds it. The pipeline is the only component expected to publish.
pub struct ConstitutionStore {
    documents: DocumentStore,
    snapshot: Arc<RwLock<Arc<ConstitutionSnapshot>>>,
}

impl ConstitutionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            documents: DocumentStore::new(),
            snapshot: Arc::new(RwLock::new(Arc::new(ConstitutionSnapshot::empty()))),
        }
    }

    /// The underlying document store.
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Publish a new document version and rebuild the snapshot.
    pub async fn publish(&self, doc_id: &str, content: DocumentContent) -> Result<u32> {
        let version = self.documents.publish(doc_id, content).await?;
        self.refresh().await;
        Ok(version)
    }

    /// Retract the latest version of a document and rebuild the
    /// snapshot. Integration rollback only.
    pub async fn retract_last(&self, doc_id: &str) -> Result<()> {
        self.documents.retract_last(doc_id).await?;
        self.refresh().await;
        Ok(())
    }

    /// Rebuild the cached snapshot from current document versions.
    pub async fn refresh(&self) {
        let mut policies = Vec::new();
        let mut precedence_docs = Vec::new();

        for (_, version) in self.documents.all_current().await {
            match version.content {
                DocumentContent::Policy(p) => policies.push(p),
                DocumentContent::Precedence(p) => precedence_docs.push(p),
            }
        }

        // Stable order keeps the snapshot hash deterministic.
        policies.sort_by(|a, b| a.id.cmp(&b.id));

        let rebuilt = Arc::new(ConstitutionSnapshot::from_documents(
            policies,
            precedence_docs,
        ));

        tracing::debug!(
            hash = %rebuilt.snapshot_hash(),
            policies = rebuilt.policies().len(),
            "Constitution snapshot rebuilt"
        );

        let mut guard = self.snapshot.write().await;
        *guard = rebuilt;
    }

    /// Current immutable snapshot.
    pub async fn snapshot(&self) -> Arc<ConstitutionSnapshot> {
        self.snapshot.read().await.clone()
    }
}

impl Default for ConstitutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopePredicate;
    use crate::types::{AggregateKind, EnforcementStrength, RuleStance, Severity};

    fn policy(id: &str) -> PolicyDocument {
        PolicyDocument {
            id: id.to_string(),
            name: id.to_string(),
            kind: AggregateKind::Policy,
            scope: ScopePredicate::any(),
            rules: vec![Rule {
                id: format!("{id}-rule"),
                subject: "subject".to_string(),
                claim: "claim".to_string(),
                rationale: String::new(),
                strength: EnforcementStrength::Blocking,
                severity: Severity::Error,
                stance: RuleStance::Mandates,
                check_ref: "check:noop".to_string(),
            }],
            amended_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_rebuild_on_publish() {
        let store = ConstitutionStore::new();
        let before = store.snapshot().await;
        assert!(before.policies().is_empty());

        store
            .publish("policy-a", policy("policy-a").into())
            .await
            .unwrap();

        let after = store.snapshot().await;
        assert_eq!(after.policies().len(), 1);
        assert_ne!(before.snapshot_hash(), after.snapshot_hash());

        // The earlier snapshot is unaffected: canary audits can keep
        // evaluating against it.
        assert!(before.policies().is_empty());
    }

    #[tokio::test]
    async fn test_unassigned_policy_ranks_last() {
        let store = ConstitutionStore::new();
        store
            .publish("policy-a", policy("policy-a").into())
            .await
            .unwrap();

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.level_for("policy-a"), i32::MAX);
    }

    #[test]
    fn test_merge_precedence_later_amendment_wins() {
        let older = PrecedenceDocument {
            id: "prec-1".to_string(),
            levels: [("policy-a".to_string(), 5)].into_iter().collect(),
            amended_at: Utc::now() - chrono::Duration::hours(1),
        };
        let newer = PrecedenceDocument {
            id: "prec-2".to_string(),
            levels: [("policy-a".to_string(), 2)].into_iter().collect(),
            amended_at: Utc::now(),
        };

        let merged = merge_precedence(&[older, newer]);
        assert_eq!(merged["policy-a"], 2);
    }
}
