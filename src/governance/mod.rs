// ============================================================================
// Governance Module - Trusted Signers & Attestation Checks
// ============================================================================
//
// This module decides who may attest a game outcome:
//   - members: the immutable set of authorized signer addresses
//   - attestation: checkers that recover an attestation's signer and test
//     it against governance, plus the name-keyed checker table handed to
//     resolution logic
//
// ============================================================================

pub mod members;
pub mod attestation;

pub use members::*;
pub use attestation::*;
