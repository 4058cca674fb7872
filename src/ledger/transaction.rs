//! Transaction model and wire codec.
//!
//! Callers submit a transaction *kind*: the commands they want run,
//! without sender or fee information. Sponsorship fills in the rest and
//! produces full transaction bytes. Kinds and transactions travel as
//! MessagePack, base64-encoded where they cross HTTP.
//!
//! Digests and signatures are computed over tagged SHA-256 so bytes
//! signed here can never be replayed in another context that happens to
//! share the byte layout.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Address, ResourceRef};
use crate::keys::ED25519_FLAG;
use crate::types::{Result, TurnstileError};

/// Domain tag for transaction digests
const TX_DIGEST_DOMAIN: &[u8] = b"turnstile-tx-v1";

/// Domain tag for the signing intent wrapped around transaction bytes
const INTENT_DOMAIN: &[u8] = b"turnstile-intent-v1";

/// Wire signature length: flag byte, 64 signature bytes, 32 key bytes
pub const WIRE_SIGNATURE_LEN: usize = 1 + 64 + 32;

// =============================================================================
// Commands and Kinds
// =============================================================================

/// One command inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Invoke an on-chain function, named `package::module::function`.
    Call {
        target: String,
        arguments: Vec<serde_json::Value>,
    },
    /// Move resources to another account.
    Transfer {
        resources: Vec<String>,
        recipient: Address,
    },
}

/// The sponsorable part of a transaction: commands only, no sender and
/// no fee information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionKind {
    pub commands: Vec<Command>,
}

impl TransactionKind {
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| TurnstileError::Internal(format!("Failed to encode kind: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| TurnstileError::InvalidRequest(format!("Undecodable transaction kind: {e}")))
    }

    pub fn encode_base64(&self) -> Result<String> {
        Ok(BASE64.encode(self.encode()?))
    }

    pub fn decode_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
            TurnstileError::InvalidRequest(format!("Invalid transaction kind base64: {e}"))
        })?;
        Self::decode(&bytes)
    }
}

/// Whether a call target has the `package::module::function` shape with a
/// hex package id.
pub fn is_well_formed_target(target: &str) -> bool {
    let parts: Vec<&str> = target.split("::").collect();
    parts.len() == 3
        && parts.iter().all(|part| !part.is_empty())
        && parts[0].starts_with("0x")
        && parts[0].len() > 2
        && parts[0][2..].chars().all(|c| c.is_ascii_hexdigit())
}

// =============================================================================
// Full Transactions
// =============================================================================

/// Fee payment attached by the sponsor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasData {
    pub payment: Vec<ResourceRef>,
    pub owner: Address,
    pub price: u64,
    pub budget: u64,
}

/// A complete transaction ready for signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub sender: Address,
    pub gas: GasData,
    pub expiration_epoch: Option<u64>,
}

impl Transaction {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| TurnstileError::Internal(format!("Failed to encode transaction: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| TurnstileError::Internal(format!("Undecodable transaction: {e}")))
    }
}

// =============================================================================
// Digests and Signatures
// =============================================================================

/// Digest of final transaction bytes, as base58.
///
/// This is the handle the execute phase uses to find its envelope, and
/// must match what the ledger reports for the same bytes.
pub fn digest(transaction_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(TX_DIGEST_DOMAIN);
    hasher.update(transaction_bytes);
    bs58::encode(hasher.finalize()).into_string()
}

fn intent_digest(transaction_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(INTENT_DOMAIN);
    hasher.update(transaction_bytes);
    hasher.finalize().into()
}

/// Sign transaction bytes, producing the wire form
/// `base64(flag || signature || public_key)`.
pub fn sign_transaction_bytes(key: &SigningKey, transaction_bytes: &[u8]) -> String {
    let signature = key.sign(&intent_digest(transaction_bytes));

    let mut out = Vec::with_capacity(WIRE_SIGNATURE_LEN);
    out.push(ED25519_FLAG);
    out.extend_from_slice(&signature.to_bytes());
    out.extend_from_slice(&key.verifying_key().to_bytes());
    BASE64.encode(out)
}

/// Check a wire signature against transaction bytes and return the
/// signer's address.
///
/// Used before relaying an envelope, so all failures surface as
/// [`TurnstileError::Execution`].
pub fn verify_wire_signature(signature_b64: &str, transaction_bytes: &[u8]) -> Result<Address> {
    let decoded = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| TurnstileError::Execution(format!("Undecodable signature: {e}")))?;
    if decoded.len() != WIRE_SIGNATURE_LEN {
        return Err(TurnstileError::Execution(format!(
            "Signature must be {WIRE_SIGNATURE_LEN} bytes, got {}",
            decoded.len()
        )));
    }
    if decoded[0] != ED25519_FLAG {
        return Err(TurnstileError::Execution(format!(
            "Unsupported signature scheme flag: 0x{:02x}",
            decoded[0]
        )));
    }

    let signature = Signature::from_slice(&decoded[1..65])
        .map_err(|e| TurnstileError::Execution(format!("Malformed signature: {e}")))?;
    let key_bytes: [u8; 32] = decoded[65..]
        .try_into()
        .map_err(|_| TurnstileError::Execution("Malformed signer key".into()))?;
    let public = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| TurnstileError::Execution(format!("Malformed signer key: {e}")))?;

    public
        .verify(&intent_digest(transaction_bytes), &signature)
        .map_err(|_| TurnstileError::Execution("Signature does not verify".into()))?;

    Ok(Address::from_ed25519(&public))
}

// =============================================================================
// Tests
// =============================================================================
