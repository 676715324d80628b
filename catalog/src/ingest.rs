//! Ingestion input and reporting types.
//!
//! Source units arrive pre-parsed from an external analyzer; the
//! catalog consumes their structure and never touches source text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::StructuralSignature;
use crate::types::SymbolKind;

/// A parsed source unit handed to the catalog by the external parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Natural key; unique among live symbols
    pub symbol_path: String,
    /// Module the unit lives in
    pub module_path: String,
    /// Fully qualified name
    pub qualified_name: String,
    /// Kind of unit
    pub kind: SymbolKind,
    /// Structural signature
    pub signature: StructuralSignature,
    /// Externally visible
    pub public: bool,
    /// Outgoing call references
    #[serde(default)]
    pub calls: Vec<String>,
    /// Optional capability label from the parser
    pub capability_hint: Option<String>,
    /// Optional free-text intent
    pub intent: Option<String>,
}

impl SourceUnit {
    /// Create a minimal unit for a path and kind.
    pub fn new(symbol_path: impl Into<String>, kind: SymbolKind) -> Self {
        let symbol_path = symbol_path.into();
        let module_path = symbol_path
            .rsplit_once("::")
            .map(|(module, _)| module.to_string())
            .unwrap_or_default();
        let qualified_name = symbol_path.clone();

        Self {
            symbol_path,
            module_path,
            qualified_name,
            kind,
            signature: StructuralSignature::default(),
            public: true,
            calls: Vec::new(),
            capability_hint: None,
            intent: None,
        }
    }

    /// Builder: set the structural signature.
    pub fn with_signature(mut self, signature: StructuralSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Builder: set outgoing calls.
    pub fn with_calls(mut self, calls: Vec<String>) -> Self {
        self.calls = calls;
        self
    }

    /// Reject units the catalog cannot record. The reason string ends
    /// up in the ingest report; the batch continues without the unit.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.symbol_path.trim().is_empty() {
            return Err("empty symbol path".to_string());
        }
        if self.qualified_name.trim().is_empty() {
            return Err("empty qualified name".to_string());
        }
        Ok(())
    }
}

/// A unit the catalog could not ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Path of the failed unit, as far as known
    pub symbol_path: String,
    /// Why ingestion rejected it
    pub reason: String,
}

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// New symbols inserted as `discovered`
    pub inserted: u32,
    /// Existing symbols updated in place
    pub updated: u32,
    /// Renames recognized through fingerprints
    pub moved: u32,
    /// Symbols soft-deleted because their path vanished
    pub deprecated: u32,
    /// Units rejected, with reasons; never aborts the batch
    pub failures: Vec<UnitFailure>,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// When the batch finished
    pub finished_at: DateTime<Utc>,
}

impl IngestReport {
    /// Total units that changed the catalog.
    pub fn applied(&self) -> u32 {
        self.inserted + self.updated + self.moved
    }
}
