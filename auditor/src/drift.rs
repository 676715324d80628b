//! Drift classification between consecutive audit runs.
//!
//! A pure function over two violation sets: no evaluation, no store
//! access. Findings are identified by (rule_id, symbol_id).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::Violation;

/// How the open-violation set changed between two runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftReport {
    /// Findings present now but not in the previous run
    pub newly_introduced: Vec<Violation>,
    /// Findings present in both runs
    pub persisting: Vec<Violation>,
    /// Findings from the previous run no longer present
    pub resolved: Vec<Violation>,
}

impl DriftReport {
    /// Whether anything changed between the runs.
    pub fn is_stable(&self) -> bool {
        self.newly_introduced.is_empty() && self.resolved.is_empty()
    }

    /// Net change in open findings.
    pub fn net_change(&self) -> i64 {
        self.newly_introduced.len() as i64 - self.resolved.len() as i64
    }
}

/// Classify violations by diffing (rule_id, symbol_id) sets.
pub fn classify_drift(previous: &[Violation], current: &[Violation]) -> DriftReport {
    let previous_keys: HashSet<(String, String)> =
        previous.iter().map(|v| v.drift_key()).collect();
    let current_keys: HashSet<(String, String)> = current.iter().map(|v| v.drift_key()).collect();

    DriftReport {
        newly_introduced: current
            .iter()
            .filter(|v| !previous_keys.contains(&v.drift_key()))
            .cloned()
            .collect(),
        persisting: current
            .iter()
            .filter(|v| previous_keys.contains(&v.drift_key()))
            .cloned()
            .collect(),
        resolved: previous
            .iter()
            .filter(|v| !current_keys.contains(&v.drift_key()))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constitution::Severity;

    fn violation(rule: &str, symbol: &str) -> Violation {
        Violation::new(rule, symbol, Severity::Warning, "finding")
    }

    #[test]
    fn test_classification() {
        let previous = vec![violation("r1", "s1"), violation("r2", "s1")];
        let current = vec![violation("r2", "s1"), violation("r3", "s2")];

        let report = classify_drift(&previous, &current);

        assert_eq!(report.newly_introduced.len(), 1);
        assert_eq!(report.newly_introduced[0].rule_id, "r3");
        assert_eq!(report.persisting.len(), 1);
        assert_eq!(report.persisting[0].rule_id, "r2");
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].rule_id, "r1");
        assert_eq!(report.net_change(), 0);
    }

    #[test]
    fn test_stable_when_sets_match() {
        let previous = vec![violation("r1", "s1")];
        let current = vec![violation("r1", "s1")];

        let report = classify_drift(&previous, &current);
        assert!(report.is_stable());
        assert_eq!(report.persisting.len(), 1);
    }

    #[test]
    fn test_empty_previous_is_all_new() {
        let current = vec![violation("r1", "s1"), violation("r2", "s2")];
        let report = classify_drift(&[], &current);
        assert_eq!(report.newly_introduced.len(), 2);
        assert!(report.resolved.is_empty());
    }
}
