//! Identity-token claims and on-chain address derivation.
//!
//! Addresses are a pure function of the token's issuer, the key claim
//! (subject), the audience, and the per-subject salt. Nobody holds a
//! conventional private key for them, so every byte that enters the
//! derivation is fixed here: length-prefixed fields, big-endian integers,
//! and domain-separation tags per hash. Two independent implementations
//! of this module must agree byte for byte or logins land on different
//! addresses.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::keys::extended_public_key_bytes;
use crate::ledger::Address;
use crate::types::{Result, TurnstileError};

// =============================================================================
// Constants
// =============================================================================

/// Domain tag for login nonce digests
const NONCE_DOMAIN: &[u8] = b"turnstile-nonce-v1";

/// Domain tag for address seed digests
const SEED_DOMAIN: &[u8] = b"turnstile-seed-v1";

/// Scheme flag for keyless-account addresses
const KEYLESS_ADDRESS_FLAG: u8 = 0x05;

/// Login nonce length in base64url characters (20 digest bytes)
pub const NONCE_LEN: usize = 27;

/// Claim that anchors address derivation
pub const KEY_CLAIM_NAME: &str = "sub";

// =============================================================================
// Token Claims
// =============================================================================

/// Audience claim, which providers encode as a string or a list.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// The audience used for derivation. For a list this is the first
    /// entry, which providers put the client id in.
    pub fn primary(&self) -> Option<&str> {
        match self {
            Self::One(aud) => Some(aud.as_str()),
            Self::Many(auds) => auds.first().map(String::as_str),
        }
    }
}

/// Claims read out of a provider id token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    /// Nonce the provider echoed back, when present
    #[serde(default)]
    pub nonce: Option<String>,
}

impl IdTokenClaims {
    /// The audience string bound into address derivation.
    pub fn audience(&self) -> Result<&str> {
        self.aud
            .primary()
            .filter(|aud| !aud.is_empty())
            .ok_or_else(|| TurnstileError::InvalidToken("Token has an empty audience".into()))
    }
}

/// Decode an id token structurally, without verifying the provider's
/// signature.
///
/// Signature verification happens inside the proving service, which
/// attests to the token against the provider's published keys. Here the
/// token is only parsed for the claims that drive derivation, so a token
/// that is structurally broken or missing those claims is rejected.
pub fn decode_id_token(token: &str) -> Result<IdTokenClaims> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<IdTokenClaims>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|e| TurnstileError::InvalidToken(format!("Undecodable token: {e}")))?;

    let claims = data.claims;
    if claims.iss.is_empty() {
        return Err(TurnstileError::InvalidToken("Token has an empty issuer".into()));
    }
    if claims.sub.is_empty() {
        return Err(TurnstileError::InvalidToken("Token has an empty subject".into()));
    }
    claims.audience()?;
    Ok(claims)
}

// =============================================================================
// Nonce
// =============================================================================

/// Compute the login nonce binding an ephemeral key to its validity
/// window.
///
/// The nonce is the first 20 bytes of a tagged SHA-256 over the extended
/// public key, the epoch deadline, and the session randomness, encoded as
/// unpadded base64url. Everyone who recomputes it must get the same
/// [`NONCE_LEN`] characters.
pub fn compute_nonce(public: &VerifyingKey, max_epoch: u64, randomness: u128) -> String {
    let mut hasher = Sha256::new();
    hasher.update(NONCE_DOMAIN);
    hasher.update(extended_public_key_bytes(public));
    hasher.update(max_epoch.to_be_bytes());
    hasher.update(randomness.to_be_bytes());
    let digest = hasher.finalize();

    URL_SAFE_NO_PAD.encode(&digest[..20])
}

// =============================================================================
// Address Seed and Address
// =============================================================================

/// Compute the address seed for a key claim under a salt.
///
/// Returned as lowercase hex of a tagged SHA-256. Each variable-length
/// field is length-prefixed so adjacent fields can never be confused for
/// one another.
pub fn compute_address_seed(
    salt: u128,
    claim_name: &str,
    claim_value: &str,
    audience: &str,
) -> String {
    hex::encode(seed_digest(salt, claim_name, claim_value, audience))
}

fn seed_digest(salt: u128, claim_name: &str, claim_value: &str, audience: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SEED_DOMAIN);
    for field in [claim_name, claim_value, audience] {
        hasher.update((field.len() as u16).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update(salt.to_be_bytes());
    hasher.finalize().into()
}

/// Derive the on-chain address for a set of token claims and a salt.
pub fn derive_address_from_claims(claims: &IdTokenClaims, salt: u128) -> Result<Address> {
    let audience = claims.audience()?;
    let seed = seed_digest(salt, KEY_CLAIM_NAME, &claims.sub, audience);

    let iss = claims.iss.as_bytes();
    if iss.len() > u8::MAX as usize {
        return Err(TurnstileError::InvalidToken(format!(
            "Issuer is too long for derivation: {} bytes",
            iss.len()
        )));
    }

    let mut hasher = Sha256::new();
    hasher.update([KEYLESS_ADDRESS_FLAG]);
    hasher.update([iss.len() as u8]);
    hasher.update(iss);
    hasher.update(seed);
    let digest: [u8; 32] = hasher.finalize().into();

    Ok(Address::from(digest))
}

/// Derive the on-chain address directly from an id token.
pub fn derive_address(token: &str, salt: u128) -> Result<Address> {
    let claims = decode_id_token(token)?;
    derive_address_from_claims(&claims, salt)
}

// =============================================================================
// Tests
// =============================================================================
