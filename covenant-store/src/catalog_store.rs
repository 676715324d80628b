//! Catalog snapshot persistence.
//!
//! The live catalog is in-memory; this module checkpoints it and
//! restores it across restarts. A checkpoint replaces the previous one
//! inside a single transaction so a crash mid-save cannot mix two
//! generations.

use catalog::{
    Capability, CapabilityStatus, CatalogSnapshot, HealthStatus, LinkSource, Symbol,
    SymbolCapabilityLink, SymbolKind, SymbolState,
};
use rusqlite::params;

use crate::{parse_ts, ts, Result, SqliteStore, StoreError};

impl SqliteStore {
    /// Replace the persisted catalog with the given snapshot.
    pub fn save_catalog(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM capability_links", [])?;
        tx.execute("DELETE FROM capabilities", [])?;
        tx.execute("DELETE FROM symbols", [])?;

        for symbol in &snapshot.symbols {
            tx.execute(
                "INSERT INTO symbols (id, symbol_path, module_path, qualified_name, kind,
                   signature_json, fingerprint, state, health, public, capability_hint,
                   intent, calls_json, previous_paths_json, first_seen, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    symbol.id,
                    symbol.symbol_path,
                    symbol.module_path,
                    symbol.qualified_name,
                    symbol.kind.as_str(),
                    serde_json::to_string(&symbol.signature)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    symbol.fingerprint,
                    state_str(symbol.state),
                    health_str(symbol.health),
                    symbol.public as i64,
                    symbol.capability_hint,
                    symbol.intent,
                    serde_json::to_string(&symbol.calls)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    serde_json::to_string(&symbol.previous_paths)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    ts(symbol.first_seen),
                    ts(symbol.last_modified),
                ],
            )?;
        }

        for capability in &snapshot.capabilities {
            tx.execute(
                "INSERT INTO capabilities (id, domain, name, owner, status, depends_on_json, coverage_percent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    capability.id,
                    capability.domain,
                    capability.name,
                    capability.owner,
                    capability_status_str(capability.status),
                    serde_json::to_string(&capability.depends_on)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    capability.coverage_percent as f64,
                ],
            )?;
        }

        for link in &snapshot.links {
            tx.execute(
                "INSERT INTO capability_links (symbol_id, capability_id, source, confidence, verified, linked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    link.symbol_id,
                    link.capability_id,
                    link.source.as_str(),
                    link.confidence as f64,
                    link.verified as i64,
                    ts(link.linked_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load the persisted catalog snapshot.
    pub fn load_catalog(&self) -> Result<CatalogSnapshot> {
        let conn = self.lock();

        let mut symbols = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, symbol_path, module_path, qualified_name, kind, signature_json,
                        fingerprint, state, health, public, capability_hint, intent,
                        calls_json, previous_paths_json, first_seen, last_modified
                 FROM symbols",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let kind: String = row.get(4)?;
                let signature_json: String = row.get(5)?;
                let state: String = row.get(7)?;
                let health: String = row.get(8)?;
                let calls_json: String = row.get(12)?;
                let previous_json: String = row.get(13)?;
                let first_seen: String = row.get(14)?;
                let last_modified: String = row.get(15)?;

                symbols.push(Symbol {
                    id: row.get(0)?,
                    symbol_path: row.get(1)?,
                    module_path: row.get(2)?,
                    qualified_name: row.get(3)?,
                    kind: parse_kind(&kind)?,
                    signature: serde_json::from_str(&signature_json)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    fingerprint: row.get(6)?,
                    state: parse_state(&state)?,
                    health: parse_health(&health)?,
                    public: row.get::<_, i64>(9)? != 0,
                    capability_hint: row.get(10)?,
                    intent: row.get(11)?,
                    calls: serde_json::from_str(&calls_json)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    previous_paths: serde_json::from_str(&previous_json)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    first_seen: parse_ts(&first_seen)?,
                    last_modified: parse_ts(&last_modified)?,
                });
            }
        }

        let mut capabilities = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, domain, name, owner, status, depends_on_json, coverage_percent
                 FROM capabilities",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(4)?;
                let depends_json: String = row.get(5)?;
                capabilities.push(Capability {
                    id: row.get(0)?,
                    domain: row.get(1)?,
                    name: row.get(2)?,
                    owner: row.get(3)?,
                    status: parse_capability_status(&status)?,
                    depends_on: serde_json::from_str(&depends_json)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    coverage_percent: row.get::<_, f64>(6)? as f32,
                });
            }
        }

        let mut links = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT symbol_id, capability_id, source, confidence, verified, linked_at
                 FROM capability_links",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let source: String = row.get(2)?;
                let linked_at: String = row.get(5)?;
                links.push(SymbolCapabilityLink {
                    symbol_id: row.get(0)?,
                    capability_id: row.get(1)?,
                    source: parse_link_source(&source)?,
                    confidence: row.get::<_, f64>(3)? as f32,
                    verified: row.get::<_, i64>(4)? != 0,
                    linked_at: parse_ts(&linked_at)?,
                });
            }
        }

        Ok(CatalogSnapshot {
            symbols,
            capabilities,
            links,
        })
    }
}

fn state_str(state: SymbolState) -> &'static str {
    match state {
        SymbolState::Discovered => "discovered",
        SymbolState::Classified => "classified",
        SymbolState::Bound => "bound",
        SymbolState::Verified => "verified",
        SymbolState::Deprecated => "deprecated",
    }
}

fn parse_state(raw: &str) -> Result<SymbolState> {
    Ok(match raw {
        "discovered" => SymbolState::Discovered,
        "classified" => SymbolState::Classified,
        "bound" => SymbolState::Bound,
        "verified" => SymbolState::Verified,
        "deprecated" => SymbolState::Deprecated,
        other => return Err(StoreError::Corrupt(format!("unknown state '{other}'"))),
    })
}

fn health_str(health: HealthStatus) -> &'static str {
    match health {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Failing => "failing",
        HealthStatus::Unknown => "unknown",
    }
}

fn parse_health(raw: &str) -> Result<HealthStatus> {
    Ok(match raw {
        "healthy" => HealthStatus::Healthy,
        "degraded" => HealthStatus::Degraded,
        "failing" => HealthStatus::Failing,
        "unknown" => HealthStatus::Unknown,
        other => return Err(StoreError::Corrupt(format!("unknown health '{other}'"))),
    })
}

fn parse_kind(raw: &str) -> Result<SymbolKind> {
    Ok(match raw {
        "function" => SymbolKind::Function,
        "method" => SymbolKind::Method,
        "class" => SymbolKind::Class,
        "module" => SymbolKind::Module,
        other => return Err(StoreError::Corrupt(format!("unknown kind '{other}'"))),
    })
}

fn capability_status_str(status: CapabilityStatus) -> &'static str {
    match status {
        CapabilityStatus::Active => "active",
        CapabilityStatus::Draft => "draft",
        CapabilityStatus::Deprecated => "deprecated",
    }
}

fn parse_capability_status(raw: &str) -> Result<CapabilityStatus> {
    Ok(match raw {
        "active" => CapabilityStatus::Active,
        "draft" => CapabilityStatus::Draft,
        "deprecated" => CapabilityStatus::Deprecated,
        other => return Err(StoreError::Corrupt(format!("unknown status '{other}'"))),
    })
}

fn parse_link_source(raw: &str) -> Result<LinkSource> {
    Ok(match raw {
        "manual" => LinkSource::Manual,
        "rule" => LinkSource::Rule,
        "auditor-infer" => LinkSource::AuditorInfer,
        "llm-classified" => LinkSource::LlmClassified,
        other => return Err(StoreError::Corrupt(format!("unknown link source '{other}'"))),
    })
}
