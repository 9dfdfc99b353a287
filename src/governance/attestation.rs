//! Attestation checkers
//!
//! A checker answers one question: was this (digest, signature) pair
//! produced by someone we trust? Resolution logic reaches checkers by name
//! through a `CheckerTable` built fresh for every run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::members::Governance;
use crate::crypto::{self, CryptoError};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Key under which the governance checker is registered for resolution logic
pub const DEFAULT_CHECKER_NAME: &str = "dao";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckerError {
    /// Digest or signature missing or malformed
    InvalidInput(String),
    /// The checker could not complete (external recovery service, etc.)
    Unavailable(String),
}

impl std::fmt::Display for CheckerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckerError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            CheckerError::Unavailable(msg) => write!(f, "Checker unavailable: {}", msg),
        }
    }
}

impl std::error::Error for CheckerError {}

// ============================================================================
// CHECKER TRAIT
// ============================================================================

/// Verification capability injected into resolution logic.
///
/// `Ok(false)` is a normal verdict. Errors are reserved for inputs that
/// cannot be checked at all.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn verify(&self, digest: Option<&str>, signature: Option<&str>) -> Result<bool, CheckerError>;

    /// Short label for logs
    fn kind(&self) -> &str;
}

/// Name-keyed checkers handed to a single resolution run
pub type CheckerTable = BTreeMap<String, Arc<dyn Checker>>;

// ============================================================================
// GOVERNANCE SIGNATURE CHECKER
// ============================================================================

/// Recovers the signer of an attestation and tests governance membership
#[derive(Debug, Clone)]
pub struct SignatureAttestationChecker {
    governance: Arc<Governance>,
}

impl SignatureAttestationChecker {
    pub fn new(governance: Arc<Governance>) -> Self {
        Self { governance }
    }

    pub fn governance(&self) -> &Governance {
        &self.governance
    }
}

#[async_trait::async_trait]
impl Checker for SignatureAttestationChecker {
    async fn verify(&self, digest: Option<&str>, signature: Option<&str>) -> Result<bool, CheckerError> {
        let (digest, signature) = match (digest, signature) {
            (Some(d), Some(s)) => (d, s),
            (None, _) => return Err(CheckerError::InvalidInput("digest is required".into())),
            (_, None) => return Err(CheckerError::InvalidInput("signature is required".into())),
        };

        match crypto::recover_address(digest, signature) {
            Ok(signer) => {
                let verified = self.governance.is_member(&signer);
                debug!(%signer, verified, "recovered attestation signer");
                Ok(verified)
            }
            Err(CryptoError::Unrecoverable) => {
                debug!("attestation signature does not recover to a key");
                Ok(false)
            }
            Err(e) => Err(CheckerError::InvalidInput(e.to_string())),
        }
    }

    fn kind(&self) -> &str {
        "governance-signature"
    }
}

// ============================================================================
// STATIC CHECKER
// ============================================================================

/// Checker with a fixed verdict, for offline fixtures and dry runs.
/// Still enforces the missing-input precondition.
#[derive(Debug, Clone, Copy)]
pub struct StaticChecker {
    pub verdict: bool,
}

#[async_trait::async_trait]
impl Checker for StaticChecker {
    async fn verify(&self, digest: Option<&str>, signature: Option<&str>) -> Result<bool, CheckerError> {
        if digest.is_none() || signature.is_none() {
            return Err(CheckerError::InvalidInput("digest and signature are required".into()));
        }
        Ok(self.verdict)
    }

    fn kind(&self) -> &str {
        "static"
    }
}
