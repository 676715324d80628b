//! Rule applicability and precedence resolution.
//!
//! When two applicable rules take opposing stances on the same subject,
//! resolution follows a total order: authority level, then scope
//! specificity, then amendment recency. A tie on all three is a
//! constitutional defect and surfaces as
//! [`ConstitutionError::PrecedenceConflict`] instead of being silently
//! resolved.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::snapshot::ConstitutionSnapshot;
use crate::types::{Rule, TargetScope};
use crate::{ConstitutionError, Result};

/// A rule that applies to a target, with the resolution keys of the
/// aggregate it arrived through.
#[derive(Debug, Clone)]
pub struct ApplicableRule {
    /// The rule itself
    pub rule: Rule,
    /// Aggregate the rule arrived through
    pub policy_id: String,
    /// Human-readable aggregate name
    pub policy_name: String,
    /// Authority level of that aggregate; lower is more authoritative
    pub level: i32,
    /// Specificity of the matching scope predicate
    pub specificity: u32,
    /// When the aggregate was last amended
    pub amended_at: DateTime<Utc>,
}

impl ApplicableRule {
    /// Compare two applicable rules by authority.
    ///
    /// `Ordering::Less` means `self` is the more authoritative rule.
    /// Equality here means an irreducible tie.
    fn cmp_authority(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then(other.specificity.cmp(&self.specificity))
            .then(other.amended_at.cmp(&self.amended_at))
    }
}

/// Resolve the ordered set of rules applicable to a target.
///
/// Collects rules from every aggregate whose scope predicate matches,
/// settles contradictions by the precedence order, and returns the
/// survivors sorted by authority. The same rule id reachable through
/// two aggregates is kept once, through its most authoritative route.
pub fn applicable_rules(
    snapshot: &ConstitutionSnapshot,
    target: &TargetScope,
) -> Result<Vec<ApplicableRule>> {
    let mut collected: HashMap<String, ApplicableRule> = HashMap::new();

    for policy in snapshot.policies() {
        if !policy.scope.matches(target) {
            continue;
        }

        let level = snapshot.level_for(&policy.id);
        let specificity = policy.scope.specificity();

        for rule in &policy.rules {
            let candidate = ApplicableRule {
                rule: rule.clone(),
                policy_id: policy.id.clone(),
                policy_name: policy.name.clone(),
                level,
                specificity,
                amended_at: policy.amended_at,
            };

            match collected.get(&rule.id) {
                Some(existing) if existing.cmp_authority(&candidate) != Ordering::Greater => {}
                _ => {
                    collected.insert(rule.id.clone(), candidate);
                }
            }
        }
    }

    let mut rules: Vec<ApplicableRule> = collected.into_values().collect();

    // Group by subject and settle contradictory stances.
    let mut by_subject: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, applicable) in rules.iter().enumerate() {
        by_subject
            .entry(applicable.rule.subject.clone())
            .or_default()
            .push(idx);
    }

    let mut dropped: Vec<usize> = Vec::new();
    for (subject, indices) in &by_subject {
        let contradictory = indices
            .iter()
            .any(|&i| rules[i].rule.stance.contradicts(&rules[indices[0]].rule.stance));
        if !contradictory {
            continue;
        }

        let mut ordered: Vec<usize> = indices.clone();
        ordered.sort_by(|&a, &b| {
            rules[a]
                .cmp_authority(&rules[b])
                .then(rules[a].rule.id.cmp(&rules[b].rule.id))
        });

        let winner = ordered[0];
        for &idx in &ordered[1..] {
            if !rules[idx].rule.stance.contradicts(&rules[winner].rule.stance) {
                continue;
            }
            if rules[winner].cmp_authority(&rules[idx]) == Ordering::Equal {
                let mut pair = [rules[winner].rule.id.clone(), rules[idx].rule.id.clone()];
                pair.sort();
                return Err(ConstitutionError::PrecedenceConflict {
                    subject: subject.clone(),
                    rule_a: pair[0].clone(),
                    rule_b: pair[1].clone(),
                    level: rules[winner].level,
                });
            }
            tracing::debug!(
                subject = %subject,
                winner = %rules[winner].rule.id,
                overridden = %rules[idx].rule.id,
                "Contradiction resolved by precedence"
            );
            dropped.push(idx);
        }
    }

    dropped.sort_unstable();
    dropped.dedup();
    for idx in dropped.into_iter().rev() {
        rules.swap_remove(idx);
    }

    // Deterministic output order, independent of collection order.
    rules.sort_by(|a, b| {
        a.level
            .cmp(&b.level)
            .then(b.specificity.cmp(&a.specificity))
            .then(a.rule.id.cmp(&b.rule.id))
    });

    Ok(rules)
}

/// Human-readable explanation of how a contradiction was settled,
/// for operator review alongside audit output.
pub fn explain_resolution(rules: &[ApplicableRule], subject: &str) -> String {
    let on_subject: Vec<&ApplicableRule> =
        rules.iter().filter(|r| r.rule.subject == subject).collect();

    if on_subject.len() <= 1 {
        return "No conflict to resolve.".to_string();
    }

    let mut explanation = format!(
        "Subject '{}' is governed by {} rules:\n",
        subject,
        on_subject.len()
    );
    for applicable in &on_subject {
        explanation.push_str(&format!(
            "  - {} via {} (level {}, specificity {})\n",
            applicable.rule.id, applicable.policy_id, applicable.level, applicable.specificity
        ));
    }
    explanation.push_str(&format!(
        "\nResolution: '{}' holds by authority order.\n",
        on_subject[0].rule.id
    ));
    explanation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopePredicate;
    use crate::types::{
        AggregateKind, EnforcementStrength, PolicyDocument, PrecedenceDocument, RuleStance,
        Severity,
    };

    fn rule(id: &str, subject: &str, stance: RuleStance) -> Rule {
        Rule {
            id: id.to_string(),
            subject: subject.to_string(),
            claim: format!("claim for {id}"),
            rationale: String::new(),
            strength: EnforcementStrength::Blocking,
            severity: Severity::Error,
            stance,
            check_ref: format!("check:{id}"),
        }
    }

    fn policy(
        id: &str,
        scope: ScopePredicate,
        rules: Vec<Rule>,
        amended_at: DateTime<Utc>,
    ) -> PolicyDocument {
        PolicyDocument {
            id: id.to_string(),
            name: id.to_string(),
            kind: AggregateKind::Policy,
            scope,
            rules,
            amended_at,
        }
    }

    fn precedence(levels: &[(&str, i32)]) -> PrecedenceDocument {
        PrecedenceDocument {
            id: "prec".to_string(),
            levels: levels
                .iter()
                .map(|(id, l)| (id.to_string(), *l))
                .collect(),
            amended_at: Utc::now(),
        }
    }

    #[test]
    fn test_scope_filtering() {
        let now = Utc::now();
        let snapshot = ConstitutionSnapshot::from_documents(
            vec![
                policy(
                    "p-auth",
                    ScopePredicate::module("core::auth"),
                    vec![rule("r-auth", "sessions", RuleStance::Mandates)],
                    now,
                ),
                policy(
                    "p-billing",
                    ScopePredicate::module("core::billing"),
                    vec![rule("r-billing", "invoices", RuleStance::Mandates)],
                    now,
                ),
            ],
            vec![],
        );

        let rules = applicable_rules(&snapshot, &TargetScope::module("core::auth::session"))
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule.id, "r-auth");
    }

    #[test]
    fn test_lower_level_wins_contradiction() {
        let now = Utc::now();
        let snapshot = ConstitutionSnapshot::from_documents(
            vec![
                policy(
                    "p-high",
                    ScopePredicate::any(),
                    vec![rule("r-forbid", "unsafe-io", RuleStance::Prohibits)],
                    now,
                ),
                policy(
                    "p-low",
                    ScopePredicate::any(),
                    vec![rule("r-allow", "unsafe-io", RuleStance::Mandates)],
                    now,
                ),
            ],
            vec![precedence(&[("p-high", 0), ("p-low", 5)])],
        );

        let rules = applicable_rules(&snapshot, &TargetScope::module("core")).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule.id, "r-forbid");
    }

    #[test]
    fn test_resolution_independent_of_document_order() {
        let now = Utc::now();
        let a = policy(
            "p-high",
            ScopePredicate::any(),
            vec![rule("r-forbid", "unsafe-io", RuleStance::Prohibits)],
            now,
        );
        let b = policy(
            "p-low",
            ScopePredicate::any(),
            vec![rule("r-allow", "unsafe-io", RuleStance::Mandates)],
            now,
        );
        let prec = precedence(&[("p-high", 0), ("p-low", 5)]);

        let forward =
            ConstitutionSnapshot::from_documents(vec![a.clone(), b.clone()], vec![prec.clone()]);
        let reverse = ConstitutionSnapshot::from_documents(vec![b, a], vec![prec]);

        let target = TargetScope::module("core");
        let from_forward = applicable_rules(&forward, &target).unwrap();
        let from_reverse = applicable_rules(&reverse, &target).unwrap();

        assert_eq!(from_forward.len(), from_reverse.len());
        assert_eq!(from_forward[0].rule.id, from_reverse[0].rule.id);
    }

    #[test]
    fn test_specificity_breaks_level_tie() {
        let now = Utc::now();
        let snapshot = ConstitutionSnapshot::from_documents(
            vec![
                policy(
                    "p-wide",
                    ScopePredicate::module("core"),
                    vec![rule("r-wide", "retries", RuleStance::Prohibits)],
                    now,
                ),
                policy(
                    "p-narrow",
                    ScopePredicate::module("core::network"),
                    vec![rule("r-narrow", "retries", RuleStance::Mandates)],
                    now,
                ),
            ],
            vec![precedence(&[("p-wide", 3), ("p-narrow", 3)])],
        );

        let rules =
            applicable_rules(&snapshot, &TargetScope::module("core::network::client")).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule.id, "r-narrow");
    }

    #[test]
    fn test_recency_breaks_specificity_tie() {
        let older = Utc::now() - chrono::Duration::days(1);
        let newer = Utc::now();
        let snapshot = ConstitutionSnapshot::from_documents(
            vec![
                policy(
                    "p-old",
                    ScopePredicate::module("core"),
                    vec![rule("r-old", "telemetry", RuleStance::Prohibits)],
                    older,
                ),
                policy(
                    "p-new",
                    ScopePredicate::module("core"),
                    vec![rule("r-new", "telemetry", RuleStance::Mandates)],
                    newer,
                ),
            ],
            vec![precedence(&[("p-old", 3), ("p-new", 3)])],
        );

        let rules = applicable_rules(&snapshot, &TargetScope::module("core::metrics")).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule.id, "r-new");
    }

    #[test]
    fn test_irreducible_tie_surfaces_conflict() {
        let now = Utc::now();
        let snapshot = ConstitutionSnapshot::from_documents(
            vec![
                policy(
                    "p-a",
                    ScopePredicate::module("core"),
                    vec![rule("r-a", "caching", RuleStance::Prohibits)],
                    now,
                ),
                policy(
                    "p-b",
                    ScopePredicate::module("core"),
                    vec![rule("r-b", "caching", RuleStance::Mandates)],
                    now,
                ),
            ],
            vec![precedence(&[("p-a", 3), ("p-b", 3)])],
        );

        let err = applicable_rules(&snapshot, &TargetScope::module("core::cache")).unwrap_err();
        match err {
            ConstitutionError::PrecedenceConflict {
                subject,
                rule_a,
                rule_b,
                level,
            } => {
                assert_eq!(subject, "caching");
                assert_eq!(rule_a, "r-a");
                assert_eq!(rule_b, "r-b");
                assert_eq!(level, 3);
            }
            other => panic!("expected PrecedenceConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_same_stance_never_conflicts() {
        let now = Utc::now();
        let snapshot = ConstitutionSnapshot::from_documents(
            vec![
                policy(
                    "p-a",
                    ScopePredicate::module("core"),
                    vec![rule("r-a", "logging", RuleStance::Mandates)],
                    now,
                ),
                policy(
                    "p-b",
                    ScopePredicate::module("core"),
                    vec![rule("r-b", "logging", RuleStance::Mandates)],
                    now,
                ),
            ],
            vec![precedence(&[("p-a", 3), ("p-b", 3)])],
        );

        let rules = applicable_rules(&snapshot, &TargetScope::module("core::api")).unwrap();
        assert_eq!(rules.len(), 2);
    }
}
