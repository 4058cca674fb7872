//! Key material for keyless logins and sponsor signing.
//!
//! # Algorithms
//!
//! - **Ephemeral login keys**: Ed25519, generated fresh for every login
//!   attempt and discarded when the session expires
//! - **Sponsor keys**: Ed25519, decoded from operator-held secret material
//!
//! The ephemeral public key travels in an "extended" form: a one-byte
//! scheme flag followed by the 32 raw key bytes, base64-encoded. Peers
//! that recompute the login nonce must see byte-identical extended keys,
//! so the encoding here is the canonical one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::types::{Result, TurnstileError};

// =============================================================================
// Constants
// =============================================================================

/// Scheme flag prepended to Ed25519 public keys and signatures
pub const ED25519_FLAG: u8 = 0x00;

/// Ed25519 secret key length (32 bytes)
pub const SECRET_KEY_LEN: usize = 32;

/// Ed25519 public key length (32 bytes)
pub const PUBLIC_KEY_LEN: usize = 32;

/// Extended public key length (flag byte + public key)
pub const EXTENDED_PUBLIC_KEY_LEN: usize = 1 + PUBLIC_KEY_LEN;

/// Prefix for base58-encoded sponsor secret keys
pub const SPONSOR_KEY_PREFIX: &str = "ed25519:";

// =============================================================================
// Ephemeral Keypairs
// =============================================================================

/// Short-lived Ed25519 keypair backing one login attempt.
///
/// The secret half never leaves this struct except through
/// [`EphemeralKeypair::secret_base64`], which the session store uses to
/// persist the key for the lifetime of the login session.
pub struct EphemeralKeypair {
    signing: SigningKey,
}

impl EphemeralKeypair {
    /// Generate a fresh keypair from the OS random number generator.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from its 32 secret bytes.
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_LEN]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    /// Rebuild a keypair from the base64 form produced by
    /// [`EphemeralKeypair::secret_base64`].
    pub fn from_secret_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            BASE64
                .decode(encoded)
                .map_err(|e| TurnstileError::KeyFormat(format!("Invalid key base64: {e}")))?,
        );
        let secret: [u8; SECRET_KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            TurnstileError::KeyFormat(format!(
                "Expected {} secret bytes, got {}",
                SECRET_KEY_LEN,
                decoded.len()
            ))
        })?;
        Ok(Self::from_secret_bytes(&secret))
    }

    /// The verifying half of the keypair.
    pub fn public(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Borrow the inner signing key for raw signature operations.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// Base64 of the 32 secret bytes, for persistence in a session record.
    pub fn secret_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE64.encode(self.signing.to_bytes()))
    }

    /// Extended public key: base64 of `flag || public_key_bytes`.
    pub fn extended_public_key(&self) -> String {
        BASE64.encode(extended_public_key_bytes(&self.public()))
    }
}

impl std::fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &BASE64.encode(self.public().to_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Extended public key bytes: scheme flag followed by the raw key.
pub fn extended_public_key_bytes(public: &VerifyingKey) -> [u8; EXTENDED_PUBLIC_KEY_LEN] {
    let mut out = [0u8; EXTENDED_PUBLIC_KEY_LEN];
    out[0] = ED25519_FLAG;
    out[1..].copy_from_slice(&public.to_bytes());
    out
}

/// Generate a 128-bit random value for login nonces and account salts.
///
/// Uses the OS cryptographically secure random number generator. The value
/// travels as a decimal string on the wire and as 16 big-endian bytes
/// inside hash preimages.
pub fn generate_randomness() -> u128 {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    u128::from_be_bytes(bytes)
}

// =============================================================================
// Sponsor Keys
// =============================================================================

/// Decode an operator-supplied sponsor secret key.
///
/// Two encodings are accepted:
///
/// - `ed25519:<base58>` where the payload is either the 32 secret bytes or
///   a 64-byte secret-then-public concatenation
/// - plain base64 of the 32 secret bytes, optionally preceded by the
///   scheme flag byte
///
/// # Errors
///
/// Returns [`TurnstileError::KeyFormat`] for unknown encodings, wrong
/// lengths, or a 64-byte payload whose public half does not match its
/// secret half.
pub fn decode_sponsor_key(encoded: &str) -> Result<SigningKey> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(TurnstileError::KeyFormat("Empty sponsor key".into()));
    }

    if let Some(payload) = encoded.strip_prefix(SPONSOR_KEY_PREFIX) {
        let decoded = Zeroizing::new(
            bs58::decode(payload)
                .into_vec()
                .map_err(|e| TurnstileError::KeyFormat(format!("Invalid key base58: {e}")))?,
        );
        return signing_key_from_decoded(&decoded);
    }

    let decoded = Zeroizing::new(
        BASE64
            .decode(encoded)
            .map_err(|e| TurnstileError::KeyFormat(format!("Invalid key base64: {e}")))?,
    );

    // A flag-prefixed export carries the scheme byte before the secret.
    if decoded.len() == SECRET_KEY_LEN + 1 {
        if decoded[0] != ED25519_FLAG {
            return Err(TurnstileError::KeyFormat(format!(
                "Unsupported key scheme flag: 0x{:02x}",
                decoded[0]
            )));
        }
        return signing_key_from_decoded(&decoded[1..]);
    }

    signing_key_from_decoded(&decoded)
}

fn signing_key_from_decoded(decoded: &[u8]) -> Result<SigningKey> {
    match decoded.len() {
        SECRET_KEY_LEN => {
            let secret: [u8; SECRET_KEY_LEN] = decoded
                .try_into()
                .map_err(|_| TurnstileError::KeyFormat("Invalid secret key length".into()))?;
            Ok(SigningKey::from_bytes(&secret))
        }
        len if len == SECRET_KEY_LEN + PUBLIC_KEY_LEN => {
            let secret: [u8; SECRET_KEY_LEN] = decoded[..SECRET_KEY_LEN]
                .try_into()
                .map_err(|_| TurnstileError::KeyFormat("Invalid secret key length".into()))?;
            let key = SigningKey::from_bytes(&secret);
            if key.verifying_key().to_bytes() != decoded[SECRET_KEY_LEN..] {
                return Err(TurnstileError::KeyFormat(
                    "Keypair public half does not match secret half".into(),
                ));
            }
            Ok(key)
        }
        len => Err(TurnstileError::KeyFormat(format!(
            "Expected {} or {} key bytes, got {}",
            SECRET_KEY_LEN,
            SECRET_KEY_LEN + PUBLIC_KEY_LEN,
            len
        ))),
    }
}

// =============================================================================
// Tests
// =============================================================================
