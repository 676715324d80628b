//! Check registry: the seam between rules and their evaluation logic.
//!
//! Each rule carries a `check_ref` naming an external evaluation
//! routine. The engine resolves the reference here and treats the
//! check as a pure function of the target symbol. A faulting or
//! missing check is the checker's failure, not the symbol's pass.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use catalog::Symbol;

/// Outcome of evaluating one rule against one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The symbol satisfies the rule
    Pass,
    /// The symbol breaches the rule
    Fail {
        /// What the check observed
        description: String,
    },
}

impl CheckOutcome {
    /// Failure with a description.
    pub fn fail(description: impl Into<String>) -> Self {
        Self::Fail {
            description: description.into(),
        }
    }
}

/// A check's own fault, distinct from a rule failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("check faulted: {0}")]
pub struct CheckFault(pub String);

/// An evaluation routine referenced by rules.
///
/// Implementations must be pure over the symbol: no mutation, no
/// hidden state. The engine may invoke them in any order.
pub trait RuleCheck: Send + Sync {
    /// The reference rules use to name this check.
    fn check_ref(&self) -> &str;

    /// Evaluate the target symbol.
    fn evaluate(&self, symbol: &Symbol) -> Result<CheckOutcome, CheckFault>;
}

/// A check built from a closure.
pub struct FnCheck<F> {
    check_ref: String,
    f: F,
}

impl<F> FnCheck<F>
where
    F: Fn(&Symbol) -> Result<CheckOutcome, CheckFault> + Send + Sync,
{
    /// Wrap a closure as a check.
    pub fn new(check_ref: impl Into<String>, f: F) -> Self {
        Self {
            check_ref: check_ref.into(),
            f,
        }
    }
}

impl<F> RuleCheck for FnCheck<F>
where
    F: Fn(&Symbol) -> Result<CheckOutcome, CheckFault> + Send + Sync,
{
    fn check_ref(&self) -> &str {
        &self.check_ref
    }

    fn evaluate(&self, symbol: &Symbol) -> Result<CheckOutcome, CheckFault> {
        (self.f)(symbol)
    }
}

/// Registry of checks keyed by their reference.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<String, Arc<dyn RuleCheck>>,
}

impl CheckRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check under its reference.
    pub fn register(&mut self, check: Arc<dyn RuleCheck>) {
        self.checks.insert(check.check_ref().to_string(), check);
    }

    /// Register a closure-backed check.
    pub fn register_fn<F>(&mut self, check_ref: impl Into<String>, f: F)
    where
        F: Fn(&Symbol) -> Result<CheckOutcome, CheckFault> + Send + Sync + 'static,
    {
        let check = Arc::new(FnCheck::new(check_ref, f));
        self.register(check);
    }

    /// Whether a reference resolves.
    pub fn contains(&self, check_ref: &str) -> bool {
        self.checks.contains_key(check_ref)
    }

    /// Evaluate a check by reference, containing its faults.
    ///
    /// A panic inside the check is caught and reported as a
    /// [`CheckFault`]; one checker's crash must not starve the rest of
    /// the run. A missing reference is also the checker's fault.
    pub fn evaluate(&self, check_ref: &str, symbol: &Symbol) -> Result<CheckOutcome, CheckFault> {
        let check = self
            .checks
            .get(check_ref)
            .ok_or_else(|| CheckFault(format!("no check registered for '{check_ref}'")))?;

        match catch_unwind(AssertUnwindSafe(|| check.evaluate(symbol))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic with non-string payload".to_string());
                tracing::warn!(check_ref = %check_ref, panic = %message, "Check panicked");
                Err(CheckFault(format!("check '{check_ref}' panicked: {message}")))
            }
        }
    }
}
