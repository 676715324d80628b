//! The audit evaluation pipeline.
//!
//! A run walks every symbol in scope, resolves the applicable rules
//! against an explicit constitution snapshot, and evaluates each rule
//! through the check registry. Failures become violations at the
//! rule's declared severity; a faulting check becomes an
//! error-severity violation naming the check. The run and its
//! violations persist as one unit through the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use constitution::{ConstitutionSnapshot, Severity, TargetScope};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use catalog::{CatalogSnapshot, Symbol};

use crate::check::{CheckOutcome, CheckRegistry};
use crate::drift::{classify_drift, DriftReport};
use crate::store::AuditStore;
use crate::types::{AuditRun, AuditRunStatus, AuditScope, Violation};
use crate::{AuditError, Result};

/// Tunables for the verdict computation.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Minimum score for a run to pass, given no blocking violations
    pub pass_threshold: f32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.8,
        }
    }
}

/// Result of a completed (or abandoned) audit run.
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    /// The persisted run record
    pub run: AuditRun,
    /// Violations emitted by the run; empty when abandoned
    pub violations: Vec<Violation>,
}

/// Summary of a scope's recent audit history.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditHistoryStats {
    /// Runs inspected
    pub total_runs: usize,
    /// Completed runs that passed
    pub passed: usize,
    /// Completed runs that failed
    pub failed: usize,
    /// Abandoned runs
    pub abandoned: usize,
    /// Mean score across inspected runs
    pub avg_score: f32,
    /// Violations emitted across inspected runs
    pub violations_found: u64,
}

/// Evaluates the constitution against catalog snapshots.
pub struct AuditEngine {
    registry: CheckRegistry,
    store: Arc<dyn AuditStore>,
    config: AuditConfig,
    in_flight: Arc<DashMap<String, ()>>,
}

impl AuditEngine {
    /// Create an engine with default configuration.
    pub fn new(registry: CheckRegistry, store: Arc<dyn AuditStore>) -> Self {
        Self {
            registry,
            store,
            config: AuditConfig::default(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(
        registry: CheckRegistry,
        store: Arc<dyn AuditStore>,
        config: AuditConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Run an audit over the given scope.
    ///
    /// The constitution and catalog arrive as explicit snapshots, so a
    /// canary rehearsal can pass alternates while live audits keep
    /// their own. A `PrecedenceConflict` halts the run with nothing
    /// persisted.
    pub async fn run(
        &self,
        scope: AuditScope,
        constitution: &ConstitutionSnapshot,
        snapshot: &CatalogSnapshot,
        source: &str,
    ) -> Result<AuditOutcome> {
        let never = AtomicBool::new(false);
        self.run_cancellable(scope, constitution, snapshot, source, &never)
            .await
    }

    /// Run an audit that can be cancelled mid-flight.
    ///
    /// Cancellation marks the run abandoned; no violations persist.
    pub async fn run_cancellable(
        &self,
        scope: AuditScope,
        constitution: &ConstitutionSnapshot,
        snapshot: &CatalogSnapshot,
        source: &str,
        cancel: &AtomicBool,
    ) -> Result<AuditOutcome> {
        let _guard = self.acquire_scope(&scope)?;
        let started_at = Utc::now();

        let mut symbols: Vec<&Symbol> = snapshot.live_in_module(&scope.module_prefix);
        symbols.sort_by(|a, b| a.symbol_path.cmp(&b.symbol_path));

        let mut violations: Vec<Violation> = Vec::new();
        let mut total_weight = 0u64;
        let mut passed_weight = 0u64;
        let mut abandoned = false;

        'symbols: for symbol in symbols {
            if cancel.load(Ordering::SeqCst) {
                abandoned = true;
                break 'symbols;
            }

            let target = target_for(symbol, snapshot);
            if let Some(required) = &scope.domain {
                if target.domain.as_deref() != Some(required.as_str()) {
                    continue;
                }
            }

            // A precedence conflict is a constitutional defect: halt,
            // persist nothing.
            let applicable = constitution::applicable_rules(constitution, &target)?;

            for rule in &applicable {
                let weight = rule.rule.severity.weight() as u64;
                match self.registry.evaluate(&rule.rule.check_ref, symbol) {
                    Ok(CheckOutcome::Pass) => {
                        total_weight += weight;
                        passed_weight += weight;
                    }
                    Ok(CheckOutcome::Fail { description }) => {
                        total_weight += weight;
                        debug!(
                            rule_id = %rule.rule.id,
                            symbol = %symbol.symbol_path,
                            severity = %rule.rule.severity.as_str(),
                            "Rule violated"
                        );
                        violations.push(Violation::new(
                            &rule.rule.id,
                            &symbol.id,
                            rule.rule.severity,
                            description,
                        ));
                    }
                    Err(fault) => {
                        // The checker's failure is never silently
                        // swallowed, and never aborts the rest.
                        total_weight += Severity::Error.weight() as u64;
                        warn!(
                            rule_id = %rule.rule.id,
                            check_ref = %rule.rule.check_ref,
                            "Check faulted during evaluation"
                        );
                        violations.push(Violation::new(
                            &rule.rule.id,
                            &symbol.id,
                            Severity::Error,
                            format!(
                                "check '{}' faulted while evaluating rule '{}': {}",
                                rule.rule.check_ref, rule.rule.id, fault
                            ),
                        ));
                    }
                }
            }
        }

        let score = if total_weight == 0 {
            1.0
        } else {
            passed_weight as f32 / total_weight as f32
        };

        let has_blocking = violations
            .iter()
            .any(|v| v.is_open() && v.severity.is_blocking());
        let passed = !abandoned && !has_blocking && score >= self.config.pass_threshold;

        let run = AuditRun {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            commit_ref: None,
            scope,
            score,
            passed,
            violations_found: if abandoned { 0 } else { violations.len() as u32 },
            status: if abandoned {
                AuditRunStatus::Abandoned
            } else {
                AuditRunStatus::Completed
            },
            started_at,
            finished_at: Utc::now(),
        };

        let persisted_violations: Vec<Violation> = if abandoned {
            Vec::new()
        } else {
            violations
        };

        // One transactional unit; a run that fails to persist is not
        // reported as complete.
        self.store.persist_run(&run, &persisted_violations).await?;

        info!(
            run_id = %run.id,
            scope = %run.scope.key(),
            score = run.score,
            passed = run.passed,
            violations = run.violations_found,
            status = ?run.status,
            "Audit run persisted"
        );

        Ok(AuditOutcome {
            run,
            violations: persisted_violations,
        })
    }

    /// Drift between the two most recent completed runs for a scope.
    pub async fn drift_since_last(&self, scope: &AuditScope) -> Result<DriftReport> {
        let runs = self.store.runs_for_scope(&scope.key(), 8).await?;
        let mut completed = runs
            .into_iter()
            .filter(|r| r.status == AuditRunStatus::Completed);

        let current = completed
            .next()
            .ok_or_else(|| AuditError::NotFound(format!("no runs for scope '{}'", scope.key())))?;
        let previous = match completed.next() {
            Some(run) => self.store.violations_for_run(&run.id).await?,
            None => Vec::new(),
        };
        let current = self.store.violations_for_run(&current.id).await?;

        Ok(classify_drift(&previous, &current))
    }

    /// Summary statistics over a scope's recent run history.
    pub async fn history_stats(&self, scope: &AuditScope, limit: usize) -> Result<AuditHistoryStats> {
        let runs = self.store.runs_for_scope(&scope.key(), limit).await?;

        let mut stats = AuditHistoryStats::default();
        let mut score_sum = 0.0f32;
        for run in &runs {
            stats.total_runs += 1;
            match run.status {
                AuditRunStatus::Abandoned => stats.abandoned += 1,
                AuditRunStatus::Completed if run.passed => stats.passed += 1,
                AuditRunStatus::Completed => stats.failed += 1,
            }
            score_sum += run.score;
            stats.violations_found += run.violations_found as u64;
        }
        if stats.total_runs > 0 {
            stats.avg_score = score_sum / stats.total_runs as f32;
        }
        Ok(stats)
    }

    /// The audit history store.
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    fn acquire_scope(&self, scope: &AuditScope) -> Result<ScopeGuard> {
        let key = scope.key();
        match self.in_flight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AuditError::ScopeBusy(key)),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(());
                Ok(ScopeGuard {
                    map: self.in_flight.clone(),
                    key,
                })
            }
        }
    }
}

/// Holds a scope's single-audit slot; released on drop, error paths
/// included.
#[derive(Debug)]
struct ScopeGuard {
    map: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Derive the rule-matching scope for a symbol.
///
/// The domain comes from the symbol's strongest capability link,
/// falling back to its classification hint.
fn target_for(symbol: &Symbol, snapshot: &CatalogSnapshot) -> TargetScope {
    let mut links = snapshot.links_for(&symbol.id);
    links.sort_by(|a, b| {
        b.verified
            .cmp(&a.verified)
            .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.capability_id.cmp(&b.capability_id))
    });

    let domain = links
        .first()
        .and_then(|link| {
            snapshot
                .capabilities
                .iter()
                .find(|c| c.id == link.capability_id)
                .map(|c| c.domain.clone())
        })
        .or_else(|| symbol.capability_hint.clone());

    TargetScope {
        module_path: symbol.module_path.clone(),
        domain,
        kind: Some(symbol.kind.as_str().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckFault;
    use crate::store::InMemoryAuditStore;
    use catalog::{SourceUnit, StructuralSignature, SymbolCatalog, SymbolKind};
    use constitution::{
        AggregateKind, EnforcementStrength, PolicyDocument, PrecedenceDocument, Rule, RuleStance,
        ScopePredicate,
    };

    fn rule(id: &str, subject: &str, severity: Severity, check_ref: &str) -> Rule {
        Rule {
            id: id.to_string(),
            subject: subject.to_string(),
            claim: format!("claim {id}"),
            rationale: String::new(),
            strength: EnforcementStrength::Blocking,
            severity,
            stance: RuleStance::Mandates,
            check_ref: check_ref.to_string(),
        }
    }

    fn constitution_with(rules: Vec<Rule>) -> ConstitutionSnapshot {
        ConstitutionSnapshot::from_documents(
            vec![PolicyDocument {
                id: "p-core".to_string(),
                name: "Core policy".to_string(),
                kind: AggregateKind::Policy,
                scope: ScopePredicate::any(),
                rules,
                amended_at: Utc::now(),
            }],
            vec![],
        )
    }

    async fn snapshot_with_paths(paths: &[&str]) -> CatalogSnapshot {
        let catalog = SymbolCatalog::new();
        let units = paths
            .iter()
            .map(|p| {
                SourceUnit::new(*p, SymbolKind::Function).with_signature(
                    StructuralSignature::with_params(vec![(*p).to_string()]),
                )
            })
            .collect();
        catalog.ingest(units).await;
        let graph = catalog::CapabilityGraph::new(catalog);
        graph.snapshot().await
    }

    #[tokio::test]
    async fn test_clean_run_passes() {
        let mut registry = CheckRegistry::new();
        registry.register_fn("check:ok", |_| Ok(CheckOutcome::Pass));

        let engine = AuditEngine::new(registry, Arc::new(InMemoryAuditStore::new()));
        let constitution = constitution_with(vec![rule("r1", "s1", Severity::Error, "check:ok")]);
        let snapshot = snapshot_with_paths(&["core::a", "core::b"]).await;

        let outcome = engine
            .run(AuditScope::full(), &constitution, &snapshot, "test")
            .await
            .unwrap();

        assert!(outcome.run.passed);
        assert!((outcome.run.score - 1.0).abs() < f32::EPSILON);
        assert!(outcome.violations.is_empty());
    }

    #[tokio::test]
    async fn test_single_blocking_violation_fails_regardless_of_score() {
        let mut registry = CheckRegistry::new();
        registry.register_fn("check:ok", |_| Ok(CheckOutcome::Pass));
        registry.register_fn("check:one-bad", |s: &Symbol| {
            if s.symbol_path == "core::bad" {
                Ok(CheckOutcome::fail("bad symbol"))
            } else {
                Ok(CheckOutcome::Pass)
            }
        });

        let engine = AuditEngine::new(registry, Arc::new(InMemoryAuditStore::new()));
        // Many passing info rules keep the score high; one critical failure
        // must still fail the run.
        let mut rules: Vec<Rule> = (0..20)
            .map(|i| rule(&format!("r-ok-{i}"), &format!("s-{i}"), Severity::Info, "check:ok"))
            .collect();
        rules.push(rule("r-crit", "s-crit", Severity::Critical, "check:one-bad"));
        let constitution = constitution_with(rules);

        let snapshot = snapshot_with_paths(&["core::bad", "core::fine"]).await;

        let outcome = engine
            .run(AuditScope::full(), &constitution, &snapshot, "test")
            .await
            .unwrap();

        assert!(outcome.run.score > 0.9);
        assert!(!outcome.run.passed);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_faulting_check_recorded_not_fatal() {
        let mut registry = CheckRegistry::new();
        registry.register_fn("check:faulty", |_| {
            Err(CheckFault("backend unreachable".to_string()))
        });
        registry.register_fn("check:ok", |_| Ok(CheckOutcome::Pass));

        let engine = AuditEngine::new(registry, Arc::new(InMemoryAuditStore::new()));
        let constitution = constitution_with(vec![
            rule("r-faulty", "s1", Severity::Info, "check:faulty"),
            rule("r-ok", "s2", Severity::Info, "check:ok"),
        ]);
        let snapshot = snapshot_with_paths(&["core::a"]).await;

        let outcome = engine
            .run(AuditScope::full(), &constitution, &snapshot, "test")
            .await
            .unwrap();

        // The fault surfaced as an error-severity violation and the
        // other rule still evaluated.
        assert!(!outcome.run.passed);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].severity, Severity::Error);
        assert!(outcome.violations[0].description.contains("check:faulty"));
    }

    #[tokio::test]
    async fn test_missing_check_recorded() {
        let engine = AuditEngine::new(CheckRegistry::new(), Arc::new(InMemoryAuditStore::new()));
        let constitution =
            constitution_with(vec![rule("r1", "s1", Severity::Warning, "check:ghost")]);
        let snapshot = snapshot_with_paths(&["core::a"]).await;

        let outcome = engine
            .run(AuditScope::full(), &constitution, &snapshot, "test")
            .await
            .unwrap();

        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_precedence_conflict_halts_run() {
        let mut registry = CheckRegistry::new();
        registry.register_fn("check:ok", |_| Ok(CheckOutcome::Pass));

        let store = Arc::new(InMemoryAuditStore::new());
        let engine = AuditEngine::new(registry, store.clone());

        let now = Utc::now();
        let conflicted = ConstitutionSnapshot::from_documents(
            vec![
                PolicyDocument {
                    id: "p-a".to_string(),
                    name: "A".to_string(),
                    kind: AggregateKind::Policy,
                    scope: ScopePredicate::any(),
                    rules: vec![rule("r-a", "shared", Severity::Error, "check:ok")],
                    amended_at: now,
                },
                PolicyDocument {
                    id: "p-b".to_string(),
                    name: "B".to_string(),
                    kind: AggregateKind::Policy,
                    scope: ScopePredicate::any(),
                    rules: vec![Rule {
                        stance: RuleStance::Prohibits,
                        ..rule("r-b", "shared", Severity::Error, "check:ok")
                    }],
                    amended_at: now,
                },
            ],
            vec![PrecedenceDocument {
                id: "prec".to_string(),
                levels: [("p-a".to_string(), 1), ("p-b".to_string(), 1)]
                    .into_iter()
                    .collect(),
                amended_at: now,
            }],
        );

        let snapshot = snapshot_with_paths(&["core::a"]).await;

        let err = engine
            .run(AuditScope::full(), &conflicted, &snapshot, "test")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuditError::Constitution(constitution::ConstitutionError::PrecedenceConflict { .. })
        ));

        // Nothing persisted.
        assert!(store.runs_for_scope("", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scope_busy_guard() {
        let mut registry = CheckRegistry::new();
        registry.register_fn("check:ok", |_| Ok(CheckOutcome::Pass));
        let engine = AuditEngine::new(registry, Arc::new(InMemoryAuditStore::new()));

        let guard = engine.acquire_scope(&AuditScope::module("core")).unwrap();
        let err = engine.acquire_scope(&AuditScope::module("core")).unwrap_err();
        assert!(matches!(err, AuditError::ScopeBusy(_)));

        // Disjoint scope proceeds.
        assert!(engine.acquire_scope(&AuditScope::module("web")).is_ok());

        drop(guard);
        assert!(engine.acquire_scope(&AuditScope::module("core")).is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_abandons_without_violations() {
        let mut registry = CheckRegistry::new();
        registry.register_fn("check:bad", |_| Ok(CheckOutcome::fail("always bad")));

        let store = Arc::new(InMemoryAuditStore::new());
        let engine = AuditEngine::new(registry, store.clone());
        let constitution = constitution_with(vec![rule("r1", "s1", Severity::Error, "check:bad")]);
        let snapshot = snapshot_with_paths(&["core::a", "core::b"]).await;

        let cancel = AtomicBool::new(true);
        let outcome = engine
            .run_cancellable(AuditScope::full(), &constitution, &snapshot, "test", &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.run.status, AuditRunStatus::Abandoned);
        assert_eq!(outcome.run.violations_found, 0);
        assert!(outcome.violations.is_empty());
        assert!(store
            .violations_for_run(&outcome.run.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_drift_between_runs() {
        let mut registry = CheckRegistry::new();
        let toggle = Arc::new(AtomicBool::new(true));
        let toggle_in_check = toggle.clone();
        registry.register_fn("check:toggle", move |_| {
            if toggle_in_check.load(Ordering::SeqCst) {
                Ok(CheckOutcome::fail("first-run finding"))
            } else {
                Ok(CheckOutcome::Pass)
            }
        });

        let engine = AuditEngine::new(registry, Arc::new(InMemoryAuditStore::new()));
        let constitution =
            constitution_with(vec![rule("r1", "s1", Severity::Warning, "check:toggle")]);
        let snapshot = snapshot_with_paths(&["core::a"]).await;

        engine
            .run(AuditScope::full(), &constitution, &snapshot, "first")
            .await
            .unwrap();

        toggle.store(false, Ordering::SeqCst);
        engine
            .run(AuditScope::full(), &constitution, &snapshot, "second")
            .await
            .unwrap();

        let drift = engine.drift_since_last(&AuditScope::full()).await.unwrap();
        assert!(drift.newly_introduced.is_empty());
        assert!(drift.persisting.is_empty());
        assert_eq!(drift.resolved.len(), 1);

        let stats = engine.history_stats(&AuditScope::full(), 10).await.unwrap();
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.violations_found, 1);
    }
}
