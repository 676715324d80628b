//! Structural fingerprints for duplicate and rename detection.
//!
//! A fingerprint hashes the normalized shape of a code unit, not its
//! text: identifier names and formatting never enter the hash. Two
//! units with the same shape fingerprint identically, which is what
//! lets the catalog recognize a rename as a move rather than a
//! delete-and-insert.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::SymbolKind;

/// Structural signature of a code unit as supplied by the parser.
///
/// The tokens describe shape, not names: parameter type shapes,
/// control-flow constructs, return shape. The catalog treats them as
/// opaque beyond normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralSignature {
    /// Parameter count
    pub arity: u32,
    /// Normalized parameter shape tokens
    #[serde(default)]
    pub param_shape: Vec<String>,
    /// Return shape, if any
    pub returns: Option<String>,
    /// Control-flow construct tokens in order of appearance
    #[serde(default)]
    pub control_tokens: Vec<String>,
}

impl StructuralSignature {
    /// Signature of a unit with the given parameter shapes.
    pub fn with_params(params: Vec<String>) -> Self {
        Self {
            arity: params.len() as u32,
            param_shape: params,
            returns: None,
            control_tokens: Vec::new(),
        }
    }

    /// Builder: set the return shape.
    pub fn returning(mut self, returns: impl Into<String>) -> Self {
        self.returns = Some(returns.into());
        self
    }

    /// Builder: set control-flow tokens.
    pub fn with_control(mut self, tokens: Vec<String>) -> Self {
        self.control_tokens = tokens;
        self
    }
}

/// Compute the structural fingerprint of a code unit.
///
/// Tokens are lowercased and trimmed before hashing so that formatting
/// differences in the parser's output cannot split identical shapes.
pub fn structural_fingerprint(kind: SymbolKind, signature: &StructuralSignature) -> String {
    let mut hasher = Sha256::new();

    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(signature.arity.to_le_bytes());

    for token in normalized(&signature.param_shape) {
        hasher.update(token.as_bytes());
        hasher.update([1u8]);
    }

    if let Some(returns) = &signature.returns {
        hasher.update(returns.trim().to_lowercase().as_bytes());
    }
    hasher.update([2u8]);

    for token in normalized(&signature.control_tokens) {
        hasher.update(token.as_bytes());
        hasher.update([3u8]);
    }

    hex::encode(hasher.finalize())
}

fn normalized(tokens: &[String]) -> impl Iterator<Item = String> + '_ {
    tokens
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_format_insensitive() {
        let a = StructuralSignature::with_params(vec!["Str".to_string(), " Int ".to_string()]);
        let b = StructuralSignature::with_params(vec!["str".to_string(), "int".to_string()]);

        assert_eq!(
            structural_fingerprint(SymbolKind::Function, &a),
            structural_fingerprint(SymbolKind::Function, &b)
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_shape() {
        let two_params = StructuralSignature::with_params(vec!["str".to_string(), "int".to_string()]);
        let one_param = StructuralSignature::with_params(vec!["str".to_string()]);

        assert_ne!(
            structural_fingerprint(SymbolKind::Function, &two_params),
            structural_fingerprint(SymbolKind::Function, &one_param)
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_kind() {
        let sig = StructuralSignature::with_params(vec!["str".to_string()]);

        assert_ne!(
            structural_fingerprint(SymbolKind::Function, &sig),
            structural_fingerprint(SymbolKind::Method, &sig)
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_control_flow() {
        let plain = StructuralSignature::with_params(vec!["str".to_string()]);
        let looped = StructuralSignature::with_params(vec!["str".to_string()])
            .with_control(vec!["loop".to_string(), "branch".to_string()]);

        assert_ne!(
            structural_fingerprint(SymbolKind::Function, &plain),
            structural_fingerprint(SymbolKind::Function, &looped)
        );
    }
}
