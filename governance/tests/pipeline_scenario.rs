//! End-to-end exercise of the proposal pipeline against the real
//! canary gate, constitution store, and Ed25519 credentials.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use auditor::{AuditConfig, CheckOutcome, CheckRegistry};
use catalog::{CapabilityGraph, SourceUnit, SymbolCatalog, SymbolKind};
use constitution::{parse_policy_yaml, ConstitutionStore};
use governance::{
    signing_payload, ApprovalPolicy, ConstitutionCanary, ConstitutionReingest, Ed25519Verifier,
    FileChange, GovernanceError, InMemoryProposalStore, MemoryWorkspace, PathLocks,
    ProposalPipeline, ProposalStatus, RiskTier, Workspace,
};

const BASELINE_POLICY: &str = r#"
id: policy-safety
name: Safety policy
scope:
  module_prefix: core
rules:
  - id: rule-input-validation
    subject: input-validation
    claim: Externally reachable functions validate their inputs
    severity: error
    stance: mandates
    check_ref: "check:input-validation"
"#;

const AMENDED_POLICY: &str = r#"
id: policy-safety
name: Safety policy
scope:
  module_prefix: core
rules:
  - id: rule-input-validation
    subject: input-validation
    claim: Externally reachable functions validate their inputs
    severity: error
    stance: mandates
    check_ref: "check:input-validation"
  - id: rule-audit-trail
    subject: audit-trail
    claim: Mutating functions leave an audit trail
    severity: warning
    stance: mandates
    check_ref: "check:audit-trail"
"#;

const BREAKING_POLICY: &str = r#"
id: policy-safety
name: Safety policy
scope:
  module_prefix: core
rules:
  - id: rule-impossible
    subject: impossible
    claim: Nothing satisfies this rule
    severity: critical
    stance: mandates
    check_ref: "check:never-passes"
"#;

struct Fixture {
    constitution: Arc<ConstitutionStore>,
    workspace: MemoryWorkspace,
    pipeline: ProposalPipeline,
    alice: SigningKey,
    bob: SigningKey,
}

async fn fixture() -> Fixture {
    let constitution = Arc::new(ConstitutionStore::new());
    constitution
        .publish(
            "policy-safety",
            parse_policy_yaml(BASELINE_POLICY).unwrap().into(),
        )
        .await
        .unwrap();

    let catalog = SymbolCatalog::new();
    catalog
        .ingest(vec![
            SourceUnit::new("core::api::submit", SymbolKind::Function),
            SourceUnit::new("core::api::query", SymbolKind::Function),
        ])
        .await;
    let graph = CapabilityGraph::new(catalog);

    let mut registry = CheckRegistry::new();
    registry.register_fn("check:input-validation", |_| Ok(CheckOutcome::Pass));
    registry.register_fn("check:audit-trail", |_| Ok(CheckOutcome::Pass));
    registry.register_fn("check:never-passes", |_| {
        Ok(CheckOutcome::fail("no symbol satisfies this"))
    });

    let canary = ConstitutionCanary::new(
        registry,
        AuditConfig::default(),
        constitution.clone(),
        graph,
    );

    let alice = SigningKey::generate(&mut OsRng);
    let bob = SigningKey::generate(&mut OsRng);
    let verifier = Ed25519Verifier::new();
    verifier.register("alice", alice.verifying_key()).await;
    verifier.register("bob", bob.verifying_key()).await;

    let locks = PathLocks::new();
    let workspace = MemoryWorkspace::guarded(locks.clone());

    let pipeline = ProposalPipeline::new(
        Arc::new(InMemoryProposalStore::new()),
        Arc::new(verifier),
        Arc::new(canary),
        Arc::new(workspace.unguarded()),
        Arc::new(ConstitutionReingest::new(constitution.clone())),
        locks,
        ApprovalPolicy::default(),
        Duration::from_millis(500),
    );

    Fixture {
        constitution,
        workspace,
        pipeline,
        alice,
        bob,
    }
}

#[tokio::test]
async fn high_tier_amendment_end_to_end() {
    let fx = fixture().await;

    let proposal = fx
        .pipeline
        .create(
            "rules/safety.policy",
            vec![FileChange::new("rules/safety.policy", AMENDED_POLICY)],
            "require audit trails on mutating functions",
            RiskTier::High,
            "agent-1",
        )
        .await
        .unwrap();

    let payload = signing_payload(&proposal);

    // One valid signature: approval refused.
    fx.pipeline
        .sign(&proposal.id, "alice", &fx.alice.sign(&payload).to_bytes())
        .await
        .unwrap();
    let err = fx.pipeline.approve(&proposal.id).await.unwrap_err();
    assert!(matches!(
        err,
        GovernanceError::InsufficientSignatures { have: 1, need: 2 }
    ));

    // Second signature plus a clean canary: approved.
    fx.pipeline
        .sign(&proposal.id, "bob", &fx.bob.sign(&payload).to_bytes())
        .await
        .unwrap();
    let approved = fx.pipeline.approve(&proposal.id).await.unwrap();
    assert_eq!(approved.status, ProposalStatus::Approved);
    assert!(approved.last_canary.as_ref().unwrap().passed);

    // While pending, the target path is write-locked to everyone but
    // the pipeline.
    let err = fx
        .workspace
        .write("rules/safety.policy", "rogue write")
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::PathLocked(_)));

    // Integration lands the file and publishes the amended document.
    fx.pipeline.integrate(&proposal.id).await.unwrap();
    assert_eq!(
        fx.workspace.read("rules/safety.policy").await.unwrap(),
        Some(AMENDED_POLICY.to_string())
    );
    let snapshot = fx.constitution.snapshot().await;
    assert_eq!(snapshot.policies()[0].rules.len(), 2);

    // The lock is gone; the workspace accepts outside writes again.
    fx.workspace
        .write("rules/safety.policy", "post-integration edit")
        .await
        .unwrap();
}

#[tokio::test]
async fn breaking_amendment_is_stopped_by_canary() {
    let fx = fixture().await;

    let proposal = fx
        .pipeline
        .create(
            "rules/safety.policy",
            vec![FileChange::new("rules/safety.policy", BREAKING_POLICY)],
            "replace the policy wholesale",
            RiskTier::Low,
            "agent-1",
        )
        .await
        .unwrap();

    fx.pipeline
        .sign(
            &proposal.id,
            "alice",
            &fx.alice.sign(&signing_payload(&proposal)).to_bytes(),
        )
        .await
        .unwrap();

    let err = fx.pipeline.approve(&proposal.id).await.unwrap_err();
    assert!(matches!(err, GovernanceError::CanaryRejected { .. }));

    // The violations are attached for operator review, and the live
    // constitution never saw the candidate.
    let after = fx.pipeline.store().get(&proposal.id).await.unwrap();
    assert_eq!(after.status, ProposalStatus::Open);
    let report = after.last_canary.unwrap();
    assert!(!report.passed);
    assert!(!report.violations.is_empty());

    let snapshot = fx.constitution.snapshot().await;
    assert_eq!(snapshot.policies()[0].rules[0].id, "rule-input-validation");
}

#[tokio::test]
async fn failed_integration_leaves_no_trace() {
    let fx = fixture().await;

    // Second payload is malformed, so re-ingestion fails after the
    // first document published.
    let proposal = fx
        .pipeline
        .create(
            "rules/safety.policy",
            vec![
                FileChange::new("rules/safety.policy", AMENDED_POLICY),
                FileChange::new("rules/extra.policy", ": not a document :::"),
            ],
            "amendment with a corrupt payload",
            RiskTier::Low,
            "agent-1",
        )
        .await
        .unwrap();

    fx.pipeline
        .sign(
            &proposal.id,
            "alice",
            &fx.alice.sign(&signing_payload(&proposal)).to_bytes(),
        )
        .await
        .unwrap();

    // The canary also parses payloads; a corrupt one fails approval
    // outright, so force the state for the integration stage by using
    // a passing gate.
    struct AlwaysPasses;
    #[async_trait]
    impl governance::CanaryGate for AlwaysPasses {
        async fn rehearse(
            &self,
            _proposal: &governance::Proposal,
        ) -> governance::Result<governance::CanaryReport> {
            Ok(governance::CanaryReport {
                run_id: "stub".to_string(),
                passed: true,
                score: 1.0,
                violations: Vec::new(),
                executed_at: chrono::Utc::now(),
            })
        }
    }

    let locks = PathLocks::new();
    let workspace = MemoryWorkspace::guarded(locks.clone());
    workspace
        .unguarded()
        .write("rules/safety.policy", "original")
        .await
        .unwrap();
    let before_files = workspace.contents().await;
    let before_hash = fx.constitution.snapshot().await.snapshot_hash().to_string();

    let pipeline = ProposalPipeline::new(
        fx.pipeline.store().clone(),
        Arc::new(Ed25519Verifier::new()),
        Arc::new(AlwaysPasses),
        Arc::new(workspace.unguarded()),
        Arc::new(ConstitutionReingest::new(fx.constitution.clone())),
        locks,
        ApprovalPolicy::default(),
        Duration::from_millis(500),
    );

    // Approve through the stub gate (signature already counted).
    pipeline.approve(&proposal.id).await.unwrap();

    let err = pipeline.integrate(&proposal.id).await.unwrap_err();
    assert!(matches!(err, GovernanceError::IntegrationFailure(_)));

    // Files byte-identical, constitution hash unchanged, proposal
    // still approved and un-integrated.
    assert_eq!(workspace.contents().await, before_files);
    assert_eq!(
        fx.constitution.snapshot().await.snapshot_hash(),
        before_hash
    );
    let after = pipeline.store().get(&proposal.id).await.unwrap();
    assert_eq!(after.status, ProposalStatus::Approved);
    assert!(after.integrated_at.is_none());
}
