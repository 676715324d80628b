//! Symbol catalog and capability graph for the Covenant Protocol.
//!
//! The catalog ingests parsed source units into identity-stable symbol
//! records: the identifier assigned at first sight survives renames and
//! refactors, detected through structural fingerprints. The capability
//! graph layers confidence-scored links between symbols and declared
//! capabilities on top, and computes coverage and orphan sets.
//!
//! The catalog never parses source itself; an external parser supplies
//! [`SourceUnit`] values.

pub mod fingerprint;
pub mod graph;
pub mod ingest;
pub mod symbols;
pub mod types;

// Re-export main types
pub use fingerprint::{structural_fingerprint, StructuralSignature};
pub use graph::{CapabilityGraph, CatalogSnapshot, Coverage};
pub use ingest::{IngestReport, SourceUnit, UnitFailure};
pub use symbols::{CatalogStats, SymbolCatalog};
pub use types::*;

/// Error types for catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Unknown symbol or capability id
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input, e.g. confidence out of range
    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Result alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
