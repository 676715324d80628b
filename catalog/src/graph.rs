//! The capability graph: confidence-scored links between symbols and
//! declared capabilities.
//!
//! Links are keyed by (symbol, capability, source): re-linking from the
//! same source overwrites the confidence instead of accumulating
//! duplicates, so a classifier can refine its opinion idempotently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::symbols::SymbolCatalog;
use crate::types::{Capability, LinkSource, Symbol, SymbolCapabilityLink, SymbolState};
use crate::{CatalogError, Result};

/// Link key: one opinion per (symbol, capability, source).
type LinkKey = (String, String, LinkSource);

struct GraphInner {
    capabilities: HashMap<String, Capability>,
    /// (domain, name) uniqueness index
    by_domain_name: HashMap<(String, String), String>,
    links: HashMap<LinkKey, SymbolCapabilityLink>,
}

/// Coverage summary for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    /// Links with `verified = true`, regardless of confidence
    pub verified_count: usize,
    /// All links to the capability
    pub total_links: usize,
}

/// Many-to-many graph between symbols and capabilities.
#[derive(Clone)]
pub struct CapabilityGraph {
    catalog: SymbolCatalog,
    inner: Arc<RwLock<GraphInner>>,
}

impl CapabilityGraph {
    /// Create a graph over the given catalog.
    pub fn new(catalog: SymbolCatalog) -> Self {
        Self {
            catalog,
            inner: Arc::new(RwLock::new(GraphInner {
                capabilities: HashMap::new(),
                by_domain_name: HashMap::new(),
                links: HashMap::new(),
            })),
        }
    }

    /// The catalog this graph is layered over.
    pub fn catalog(&self) -> &SymbolCatalog {
        &self.catalog
    }

    /// Register a capability. (domain, name) must be unique.
    pub async fn register_capability(&self, capability: Capability) -> Result<String> {
        let mut inner = self.inner.write().await;
        let key = (capability.domain.clone(), capability.name.clone());
        if inner.by_domain_name.contains_key(&key) {
            return Err(CatalogError::ValidationError(format!(
                "capability ({}, {}) already registered",
                capability.domain, capability.name
            )));
        }

        let id = capability.id.clone();
        info!(capability_id = %id, domain = %capability.domain, name = %capability.name, "Capability registered");
        inner.by_domain_name.insert(key, id.clone());
        inner.capabilities.insert(id.clone(), capability);
        Ok(id)
    }

    /// Get a capability by id.
    pub async fn capability(&self, id: &str) -> Result<Capability> {
        let inner = self.inner.read().await;
        inner
            .capabilities
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("capability {id}")))
    }

    /// Link a symbol to a capability with a confidence score.
    ///
    /// Idempotent per (symbol, capability, source): an existing link
    /// from the same source has its confidence overwritten and its
    /// `verified` flag reset, since the opinion changed.
    pub async fn link(
        &self,
        symbol_id: &str,
        capability_id: &str,
        confidence: f32,
        source: LinkSource,
    ) -> Result<SymbolCapabilityLink> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CatalogError::ValidationError(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }
        if !self.catalog.contains(symbol_id).await {
            return Err(CatalogError::NotFound(format!("symbol {symbol_id}")));
        }

        let mut inner = self.inner.write().await;
        if !inner.capabilities.contains_key(capability_id) {
            return Err(CatalogError::NotFound(format!(
                "capability {capability_id}"
            )));
        }

        let key = (symbol_id.to_string(), capability_id.to_string(), source);
        let link = SymbolCapabilityLink {
            symbol_id: symbol_id.to_string(),
            capability_id: capability_id.to_string(),
            confidence,
            source,
            verified: false,
            linked_at: Utc::now(),
        };

        debug!(
            symbol_id = %symbol_id,
            capability_id = %capability_id,
            confidence = confidence,
            source = %source.as_str(),
            "Symbol linked to capability"
        );

        inner.links.insert(key, link.clone());
        Self::recompute_coverage(&mut inner, capability_id);
        Ok(link)
    }

    /// Mark a link as verified.
    pub async fn verify_link(
        &self,
        symbol_id: &str,
        capability_id: &str,
        source: LinkSource,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (symbol_id.to_string(), capability_id.to_string(), source);
        let link = inner.links.get_mut(&key).ok_or_else(|| {
            CatalogError::NotFound(format!("link {symbol_id} -> {capability_id}"))
        })?;
        link.verified = true;
        Self::recompute_coverage(&mut inner, capability_id);
        Ok(())
    }

    /// Coverage summary for a capability.
    pub async fn coverage(&self, capability_id: &str) -> Result<Coverage> {
        let inner = self.inner.read().await;
        if !inner.capabilities.contains_key(capability_id) {
            return Err(CatalogError::NotFound(format!(
                "capability {capability_id}"
            )));
        }

        let mut coverage = Coverage {
            verified_count: 0,
            total_links: 0,
        };
        for link in inner.links.values() {
            if link.capability_id == capability_id {
                coverage.total_links += 1;
                if link.verified {
                    coverage.verified_count += 1;
                }
            }
        }
        Ok(coverage)
    }

    /// Non-deprecated symbols with zero links.
    pub async fn orphans(&self) -> Vec<Symbol> {
        let inner = self.inner.read().await;
        let linked: std::collections::HashSet<String> = inner
            .links
            .values()
            .map(|l| l.symbol_id.clone())
            .collect();
        drop(inner);

        self.catalog
            .live_symbols()
            .await
            .into_iter()
            .filter(|s| !linked.contains(s.id.as_str()))
            .collect()
    }

    /// All links for one symbol.
    pub async fn links_for_symbol(&self, symbol_id: &str) -> Vec<SymbolCapabilityLink> {
        let inner = self.inner.read().await;
        inner
            .links
            .values()
            .filter(|l| l.symbol_id == symbol_id)
            .cloned()
            .collect()
    }

    /// Immutable view of symbols, capabilities, and links for audits
    /// and canary rehearsals. A clone of the data, detached from live
    /// state.
    pub async fn snapshot(&self) -> CatalogSnapshot {
        let symbols = self.catalog.all_symbols().await;
        let inner = self.inner.read().await;
        CatalogSnapshot {
            symbols,
            capabilities: inner.capabilities.values().cloned().collect(),
            links: inner.links.values().cloned().collect(),
        }
    }

    fn recompute_coverage(inner: &mut GraphInner, capability_id: &str) {
        let mut total = 0usize;
        let mut verified = 0usize;
        for link in inner.links.values() {
            if link.capability_id == capability_id {
                total += 1;
                if link.verified {
                    verified += 1;
                }
            }
        }
        if let Some(capability) = inner.capabilities.get_mut(capability_id) {
            capability.coverage_percent = if total == 0 {
                0.0
            } else {
                verified as f32 / total as f32 * 100.0
            };
        }
    }
}

/// Detached view of the catalog and graph at one moment.
///
/// Audits evaluate against this, never against live state; a canary
/// rehearsal clones and mutates its own copy freely.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    /// All symbols, including deprecated ones
    pub symbols: Vec<Symbol>,
    /// All registered capabilities
    pub capabilities: Vec<Capability>,
    /// All links
    pub links: Vec<SymbolCapabilityLink>,
}

impl CatalogSnapshot {
    /// Empty snapshot.
    pub fn empty() -> Self {
        Self {
            symbols: Vec::new(),
            capabilities: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Live symbols under a module prefix; an empty prefix selects all.
    pub fn live_in_module(&self, prefix: &str) -> Vec<&Symbol> {
        self.symbols
            .iter()
            .filter(|s| s.state != SymbolState::Deprecated)
            .filter(|s| {
                prefix.is_empty()
                    || s.module_path == prefix
                    || s.module_path
                        .strip_prefix(prefix)
                        .map(|rest| rest.starts_with("::"))
                        .unwrap_or(false)
            })
            .collect()
    }

    /// Links for a symbol id.
    pub fn links_for(&self, symbol_id: &str) -> Vec<&SymbolCapabilityLink> {
        self.links
            .iter()
            .filter(|l| l.symbol_id == symbol_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::StructuralSignature;
    use crate::ingest::SourceUnit;
    use crate::types::SymbolKind;

    async fn graph_with_symbol(path: &str) -> (CapabilityGraph, String, String) {
        let catalog = SymbolCatalog::new();
        catalog
            .ingest(vec![SourceUnit::new(path, SymbolKind::Function)
                .with_signature(StructuralSignature::with_params(vec!["str".to_string()]))])
            .await;
        let symbol = catalog.get_by_path(path).await.unwrap();

        let graph = CapabilityGraph::new(catalog);
        let capability_id = graph
            .register_capability(Capability::new("identity", "login", "auth-team"))
            .await
            .unwrap();
        (graph, symbol.id, capability_id)
    }

    #[tokio::test]
    async fn test_link_idempotent_per_source() {
        let (graph, symbol_id, capability_id) = graph_with_symbol("core::auth::login").await;

        graph
            .link(&symbol_id, &capability_id, 0.5, LinkSource::Rule)
            .await
            .unwrap();
        graph
            .link(&symbol_id, &capability_id, 0.9, LinkSource::Rule)
            .await
            .unwrap();

        let coverage = graph.coverage(&capability_id).await.unwrap();
        assert_eq!(coverage.total_links, 1);

        let links = graph.links_for_symbol(&symbol_id).await;
        assert_eq!(links.len(), 1);
        assert!((links[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_distinct_sources_coexist() {
        let (graph, symbol_id, capability_id) = graph_with_symbol("core::auth::login").await;

        graph
            .link(&symbol_id, &capability_id, 0.5, LinkSource::Rule)
            .await
            .unwrap();
        graph
            .link(&symbol_id, &capability_id, 0.8, LinkSource::LlmClassified)
            .await
            .unwrap();

        let coverage = graph.coverage(&capability_id).await.unwrap();
        assert_eq!(coverage.total_links, 2);
    }

    #[tokio::test]
    async fn test_confidence_bounds() {
        let (graph, symbol_id, capability_id) = graph_with_symbol("core::auth::login").await;

        let err = graph
            .link(&symbol_id, &capability_id, 1.5, LinkSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::ValidationError(_)));

        let err = graph
            .link(&symbol_id, &capability_id, -0.1, LinkSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_unknown_ids_fail() {
        let (graph, symbol_id, capability_id) = graph_with_symbol("core::auth::login").await;

        let err = graph
            .link("no-such-symbol", &capability_id, 0.5, LinkSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));

        let err = graph
            .link(&symbol_id, "no-such-capability", 0.5, LinkSource::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_verified_coverage_ignores_confidence() {
        let (graph, symbol_id, capability_id) = graph_with_symbol("core::auth::login").await;

        graph
            .link(&symbol_id, &capability_id, 0.1, LinkSource::Manual)
            .await
            .unwrap();
        graph
            .verify_link(&symbol_id, &capability_id, LinkSource::Manual)
            .await
            .unwrap();

        let coverage = graph.coverage(&capability_id).await.unwrap();
        assert_eq!(coverage.verified_count, 1);

        let capability = graph.capability(&capability_id).await.unwrap();
        assert!((capability.coverage_percent - 100.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_orphans() {
        let catalog = SymbolCatalog::new();
        catalog
            .ingest(vec![
                SourceUnit::new("core::auth::login", SymbolKind::Function),
                SourceUnit::new("core::auth::logout", SymbolKind::Function),
            ])
            .await;

        let graph = CapabilityGraph::new(catalog.clone());
        let capability_id = graph
            .register_capability(Capability::new("identity", "login", "auth-team"))
            .await
            .unwrap();

        let login = catalog.get_by_path("core::auth::login").await.unwrap();
        graph
            .link(&login.id, &capability_id, 0.9, LinkSource::Manual)
            .await
            .unwrap();

        let orphans = graph.orphans().await;
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].symbol_path, "core::auth::logout");
    }

    #[tokio::test]
    async fn test_rename_preserves_links() {
        let (graph, symbol_id, capability_id) = graph_with_symbol("core::auth::login").await;
        graph
            .link(&symbol_id, &capability_id, 0.9, LinkSource::Manual)
            .await
            .unwrap();

        // Rename: same shape under a new path.
        graph
            .catalog()
            .ingest(vec![SourceUnit::new("core::auth::sign_in", SymbolKind::Function)
                .with_signature(StructuralSignature::with_params(vec!["str".to_string()]))])
            .await;

        let renamed = graph.catalog().get_by_path("core::auth::sign_in").await.unwrap();
        assert_eq!(renamed.id, symbol_id);

        let links = graph.links_for_symbol(&symbol_id).await;
        assert_eq!(links.len(), 1);
    }
}
