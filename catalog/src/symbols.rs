//! The symbol catalog: identity-stable records of discovered code.
//!
//! Ingestion is the only mutation path for symbol structure. Identity
//! rules: a path match updates in place; a fingerprint match on a
//! vanished path is a move that preserves the identifier and its
//! links; anything else is an insert. Paths that disappear without a
//! fingerprint match are soft-deleted to `deprecated` with links
//! retained for audit history.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::fingerprint::structural_fingerprint;
use crate::ingest::{IngestReport, SourceUnit, UnitFailure};
use crate::types::{HealthStatus, Symbol, SymbolState};
use crate::{CatalogError, Result};

struct CatalogInner {
    /// All symbols ever seen, keyed by stable id
    symbols: HashMap<String, Symbol>,
    /// Live (non-deprecated) path to id
    by_path: HashMap<String, String>,
}

/// Identity-stable catalog of code symbols.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone)]
pub struct SymbolCatalog {
    inner: Arc<RwLock<CatalogInner>>,
}

impl SymbolCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CatalogInner {
                symbols: HashMap::new(),
                by_path: HashMap::new(),
            })),
        }
    }

    /// Ingest a batch of parsed source units.
    ///
    /// Partial-failure semantics: a malformed unit is reported in the
    /// result and the rest of the batch proceeds. The batch is applied
    /// under one write lock, so readers never observe a half-applied
    /// scan.
    pub async fn ingest(&self, units: Vec<SourceUnit>) -> IngestReport {
        let started_at = Utc::now();
        let mut failures = Vec::new();

        // First pass: validate and collect the paths present in this scan,
        // so a vanished path can be told apart from a renamed one.
        let mut valid = Vec::with_capacity(units.len());
        let mut scanned_paths: HashSet<String> = HashSet::new();
        for unit in units {
            match unit.validate() {
                Ok(()) => {
                    scanned_paths.insert(unit.symbol_path.clone());
                    valid.push(unit);
                }
                Err(reason) => {
                    debug!(path = %unit.symbol_path, reason = %reason, "Rejecting source unit");
                    failures.push(UnitFailure {
                        symbol_path: unit.symbol_path,
                        reason,
                    });
                }
            }
        }

        let mut inner = self.inner.write().await;
        let mut inserted = 0u32;
        let mut updated = 0u32;
        let mut moved = 0u32;
        let now = Utc::now();

        for unit in valid {
            let fingerprint = structural_fingerprint(unit.kind, &unit.signature);

            if let Some(id) = inner.by_path.get(&unit.symbol_path).cloned() {
                // Path match: update in place.
                let symbol = inner.symbols.get_mut(&id).expect("indexed symbol exists");
                symbol.module_path = unit.module_path;
                symbol.qualified_name = unit.qualified_name;
                symbol.kind = unit.kind;
                symbol.signature = unit.signature;
                symbol.fingerprint = fingerprint;
                symbol.public = unit.public;
                symbol.calls = unit.calls;
                if unit.capability_hint.is_some() {
                    symbol.capability_hint = unit.capability_hint;
                }
                if unit.intent.is_some() {
                    symbol.intent = unit.intent;
                }
                symbol.last_modified = now;
                updated += 1;
                continue;
            }

            // Fingerprint match on a path absent from this scan: a move.
            let moved_id = inner
                .symbols
                .values()
                .filter(|s| {
                    s.state != SymbolState::Deprecated
                        && s.fingerprint == fingerprint
                        && !scanned_paths.contains(&s.symbol_path)
                })
                .map(|s| (s.symbol_path.clone(), s.id.clone()))
                .min()
                .map(|(_, id)| id);

            if let Some(id) = moved_id {
                let symbol = inner.symbols.get_mut(&id).expect("indexed symbol exists");
                let old_path = std::mem::replace(&mut symbol.symbol_path, unit.symbol_path.clone());
                symbol.previous_paths.push(old_path.clone());
                symbol.module_path = unit.module_path;
                symbol.qualified_name = unit.qualified_name;
                symbol.public = unit.public;
                symbol.calls = unit.calls;
                symbol.last_modified = now;

                info!(
                    symbol_id = %id,
                    from = %old_path,
                    to = %unit.symbol_path,
                    "Symbol moved, identity preserved"
                );

                inner.by_path.remove(&old_path);
                inner.by_path.insert(unit.symbol_path, id);
                moved += 1;
                continue;
            }

            // New symbol.
            let symbol = Symbol {
                id: uuid::Uuid::new_v4().to_string(),
                symbol_path: unit.symbol_path.clone(),
                module_path: unit.module_path,
                qualified_name: unit.qualified_name,
                kind: unit.kind,
                signature: unit.signature,
                fingerprint,
                state: SymbolState::Discovered,
                health: HealthStatus::Unknown,
                public: unit.public,
                capability_hint: unit.capability_hint,
                intent: unit.intent,
                calls: unit.calls,
                previous_paths: Vec::new(),
                first_seen: now,
                last_modified: now,
            };
            inner.by_path.insert(unit.symbol_path, symbol.id.clone());
            inner.symbols.insert(symbol.id.clone(), symbol);
            inserted += 1;
        }

        // Any live path neither scanned nor consumed by a move is gone.
        let vanished: Vec<(String, String)> = inner
            .by_path
            .iter()
            .filter(|(path, _)| !scanned_paths.contains(*path))
            .map(|(path, id)| (path.clone(), id.clone()))
            .collect();

        let mut deprecated = 0u32;
        for (path, id) in vanished {
            let symbol = inner.symbols.get_mut(&id).expect("indexed symbol exists");
            symbol.state = SymbolState::Deprecated;
            symbol.last_modified = now;
            inner.by_path.remove(&path);
            deprecated += 1;

            info!(symbol_id = %id, path = %path, "Symbol deprecated");
        }

        let report = IngestReport {
            inserted,
            updated,
            moved,
            deprecated,
            failures,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            inserted = report.inserted,
            updated = report.updated,
            moved = report.moved,
            deprecated = report.deprecated,
            failed = report.failures.len(),
            "Ingestion batch applied"
        );

        report
    }

    /// Get a symbol by stable id.
    pub async fn get(&self, id: &str) -> Result<Symbol> {
        let inner = self.inner.read().await;
        inner
            .symbols
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("symbol {id}")))
    }

    /// Get a live symbol by its current path.
    pub async fn get_by_path(&self, path: &str) -> Result<Symbol> {
        let inner = self.inner.read().await;
        inner
            .by_path
            .get(path)
            .and_then(|id| inner.symbols.get(id))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("path {path}")))
    }

    /// All live (non-deprecated) symbols.
    pub async fn live_symbols(&self) -> Vec<Symbol> {
        let inner = self.inner.read().await;
        inner
            .symbols
            .values()
            .filter(|s| s.state != SymbolState::Deprecated)
            .cloned()
            .collect()
    }

    /// All symbols including deprecated ones.
    pub async fn all_symbols(&self) -> Vec<Symbol> {
        let inner = self.inner.read().await;
        inner.symbols.values().cloned().collect()
    }

    /// Advance a symbol's lifecycle state.
    pub async fn advance_state(&self, id: &str, next: SymbolState) -> Result<()> {
        let mut inner = self.inner.write().await;
        let symbol = inner
            .symbols
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(format!("symbol {id}")))?;

        if !symbol.state.can_advance_to(next) {
            return Err(CatalogError::ValidationError(format!(
                "symbol {} cannot advance from {:?} to {:?}",
                id, symbol.state, next
            )));
        }

        if next == SymbolState::Deprecated {
            let path = symbol.symbol_path.clone();
            symbol.state = next;
            symbol.last_modified = Utc::now();
            inner.by_path.remove(&path);
        } else {
            symbol.state = next;
            symbol.last_modified = Utc::now();
        }
        Ok(())
    }

    /// Update a symbol's health assessment.
    pub async fn set_health(&self, id: &str, health: HealthStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let symbol = inner
            .symbols
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(format!("symbol {id}")))?;
        symbol.health = health;
        symbol.last_modified = Utc::now();
        Ok(())
    }

    /// Whether a symbol id exists (in any state).
    pub async fn contains(&self, id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.symbols.contains_key(id)
    }

    /// Counts by lifecycle state.
    pub async fn stats(&self) -> CatalogStats {
        let inner = self.inner.read().await;
        let mut stats = CatalogStats::default();
        for symbol in inner.symbols.values() {
            stats.total += 1;
            match symbol.state {
                SymbolState::Discovered => stats.discovered += 1,
                SymbolState::Classified => stats.classified += 1,
                SymbolState::Bound => stats.bound += 1,
                SymbolState::Verified => stats.verified += 1,
                SymbolState::Deprecated => stats.deprecated += 1,
            }
        }
        stats
    }
}

impl Default for SymbolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Symbol counts by lifecycle state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogStats {
    /// All symbols ever seen
    pub total: usize,
    /// In `discovered`
    pub discovered: usize,
    /// In `classified`
    pub classified: usize,
    /// In `bound`
    pub bound: usize,
    /// In `verified`
    pub verified: usize,
    /// Soft-deleted
    pub deprecated: usize,
}
