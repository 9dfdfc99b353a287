//! Attestation Cryptography
//!
//! Keccak-256 hashing, EIP-191 personal-message digests and secp256k1
//! signer recovery. These are the only primitives the resolution sandbox
//! is allowed to reach, and the same primitives the governance checker
//! uses to decide who signed an attestation.
//!
//! Signing scheme:
//!   digest    = keccak256("\x19Ethereum Signed Message:\n" || len(data) || data)
//!   signature = r (32) || s (32) || v (1), v in {0, 1, 27, 28}
//!   address   = "0x" || hex(keccak256(uncompressed_pubkey[1..])[12..])

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Length of a message digest in bytes
pub const DIGEST_LEN: usize = 32;

/// Length of a recoverable signature (r || s || v) in bytes
pub const SIGNATURE_LEN: usize = 65;

/// Prefix applied to personal messages before hashing (EIP-191 version 0x45)
pub const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    InvalidHex(String),
    InvalidLength { what: &'static str, expected: usize, actual: usize },
    InvalidRecoveryId(u8),
    InvalidSecretKey,
    /// Signature bytes were well-formed but no public key could be recovered
    Unrecoverable,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::InvalidHex(msg) => write!(f, "Invalid hex: {}", msg),
            CryptoError::InvalidLength { what, expected, actual } => {
                write!(f, "Invalid {} length: expected {} bytes, got {}", what, expected, actual)
            }
            CryptoError::InvalidRecoveryId(v) => write!(f, "Invalid recovery id: {}", v),
            CryptoError::InvalidSecretKey => write!(f, "Invalid secret key"),
            CryptoError::Unrecoverable => write!(f, "Signature does not recover to a public key"),
        }
    }
}

impl std::error::Error for CryptoError {}

// ============================================================================
// HASHING
// ============================================================================

/// Raw keccak-256 of a byte slice
pub fn keccak256(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    Keccak256::digest(bytes).into()
}

/// EIP-191 personal-message digest of arbitrary bytes
pub fn hash_message(message: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// `0x`-prefixed lowercase hex
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode hex with or without a `0x` prefix
pub fn decode_hex(input: &str) -> Result<Vec<u8>, CryptoError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(body).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

/// Bytes a script-supplied text stands for: decoded bytes for `0x` hex,
/// UTF-8 bytes otherwise.
pub fn text_bytes(text: &str) -> Vec<u8> {
    if text.starts_with("0x") && text.len() > 2 {
        if let Ok(bytes) = decode_hex(text) {
            return bytes;
        }
    }
    text.as_bytes().to_vec()
}

pub fn parse_digest(input: &str) -> Result<[u8; DIGEST_LEN], CryptoError> {
    let bytes = decode_hex(input)?;
    bytes.as_slice().try_into().map_err(|_| CryptoError::InvalidLength {
        what: "digest",
        expected: DIGEST_LEN,
        actual: bytes.len(),
    })
}

fn parse_signature(input: &str) -> Result<RecoverableSignature, CryptoError> {
    let bytes = decode_hex(input)?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidLength {
            what: "signature",
            expected: SIGNATURE_LEN,
            actual: bytes.len(),
        });
    }

    let v = bytes[64];
    let normalized = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => return Err(CryptoError::InvalidRecoveryId(other)),
    };
    let recovery_id = RecoveryId::from_i32(normalized as i32)
        .map_err(|_| CryptoError::InvalidRecoveryId(v))?;

    // Out-of-range r/s values are still a well-formed attestation
    RecoverableSignature::from_compact(&bytes[..64], recovery_id)
        .map_err(|_| CryptoError::Unrecoverable)
}

// ============================================================================
// RECOVERY
// ============================================================================

/// Address of a secp256k1 public key
pub fn address_from_pubkey(public_key: &PublicKey) -> String {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    to_hex(&hash[12..])
}

/// Recover the signer address from a raw 32-byte digest and a 65-byte signature
pub fn recover_address(digest: &str, signature: &str) -> Result<String, CryptoError> {
    let digest = parse_digest(digest)?;
    let signature = parse_signature(signature)?;

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(digest);
    let public_key = secp
        .recover_ecdsa(&message, &signature)
        .map_err(|_| CryptoError::Unrecoverable)?;

    Ok(address_from_pubkey(&public_key))
}

/// Recover the signer of a personal message (`personal_sign` semantics)
pub fn verify_message(message: &[u8], signature: &str) -> Result<String, CryptoError> {
    recover_address(&to_hex(&hash_message(message)), signature)
}

// ============================================================================
// SIGNING
// ============================================================================

/// A secp256k1 key able to produce attestations.
///
/// Keys derive deterministically from a seed and a name, so fixtures and
/// the CLI produce the same addresses on every run.
#[derive(Clone)]
pub struct AttestationSigner {
    pub name: String,
    secret_key: SecretKey,
    pub address: String,
}

impl AttestationSigner {
    pub fn from_secret_bytes(name: &str, secret: &[u8]) -> Result<Self, CryptoError> {
        let secret_key = SecretKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Ok(Self {
            name: name.to_string(),
            secret_key,
            address: address_from_pubkey(&public_key),
        })
    }

    /// Derive a key as keccak256(seed || name)
    pub fn from_seed(seed: &[u8], name: &str) -> Result<Self, CryptoError> {
        let mut hasher = Keccak256::new();
        hasher.update(seed);
        hasher.update(name.as_bytes());
        let derived: [u8; 32] = hasher.finalize().into();
        Self::from_secret_bytes(name, &derived)
    }

    /// Sign a raw 32-byte digest, returning `0x` hex of r || s || v (v = 27/28)
    pub fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> String {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(*digest);
        let (recovery_id, compact) = secp
            .sign_ecdsa_recoverable(&message, &self.secret_key)
            .serialize_compact();

        let mut bytes = Vec::with_capacity(SIGNATURE_LEN);
        bytes.extend_from_slice(&compact);
        bytes.push(27 + recovery_id.to_i32() as u8);
        to_hex(&bytes)
    }

    /// `personal_sign` over arbitrary data
    pub fn sign_message(&self, message: &[u8]) -> String {
        self.sign_digest(&hash_message(message))
    }
}

impl std::fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish()
    }
}
