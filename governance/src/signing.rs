//! Credential verification for proposal signatures.
//!
//! Verification is delegated to an external credential service behind
//! [`CredentialVerifier`]; the pipeline consumes only a boolean
//! verdict plus the signer's identity. [`Ed25519Verifier`] is the
//! registered-key implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tokio::sync::RwLock;
use tracing::debug;

use crate::Result;

/// Verifies a signature against an approver's registered credential.
///
/// Implementations may call out to an external identity service; the
/// pipeline bounds every call with a timeout and fails closed when it
/// elapses.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify `signature` over `payload` for `approver`.
    ///
    /// `Ok(false)` means the credential rejected the signature;
    /// `Err` means verification could not complete at all.
    async fn verify(&self, approver: &str, payload: &[u8], signature: &[u8]) -> Result<bool>;
}

/// Ed25519 verifier over locally registered public keys.
pub struct Ed25519Verifier {
    keys: Arc<RwLock<HashMap<String, VerifyingKey>>>,
}

impl Ed25519Verifier {
    /// Create a verifier with no registered keys.
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an approver's public key.
    pub async fn register(&self, approver: impl Into<String>, key: VerifyingKey) {
        let approver = approver.into();
        debug!(approver = %approver, "Approver credential registered");
        let mut keys = self.keys.write().await;
        keys.insert(approver, key);
    }

    /// Remove an approver's credential.
    pub async fn revoke(&self, approver: &str) {
        let mut keys = self.keys.write().await;
        keys.remove(approver);
    }
}

impl Default for Ed25519Verifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialVerifier for Ed25519Verifier {
    async fn verify(&self, approver: &str, payload: &[u8], signature: &[u8]) -> Result<bool> {
        let keys = self.keys.read().await;
        let Some(key) = keys.get(approver) else {
            // An unregistered approver is a rejected signature, not an
            // infrastructure failure.
            return Ok(false);
        };

        let signature = match Signature::from_slice(signature) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };

        Ok(key.verify(payload, &signature).is_ok())
    }
}
