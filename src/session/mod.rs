//! Login session and account salt persistence.
//!
//! A login attempt leaves exactly one record behind: the ephemeral secret
//! key, the epoch deadline, the nonce randomness, and the nonce itself.
//! Starting a new attempt replaces the record; completing or expiring an
//! attempt removes it.
//!
//! Account salts live in the same store under a per-subject key. A salt is
//! written once and never rotated, because rotating it would move the
//! subject to a different on-chain address.
//!
//! When a seal key is configured, session records are encrypted with
//! ChaCha20-Poly1305 before they reach the backing store. A record that
//! fails authentication is rejected outright. There is no plaintext
//! fallback once sealing is on.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::{generate_randomness, EphemeralKeypair};
use crate::store::KeyValueStore;
use crate::types::{Result, TurnstileError};

// =============================================================================
// Constants
// =============================================================================

/// Store key for the single active login session
const SESSION_KEY: &str = "login/session";

/// Store key prefix for per-subject account salts
const SALT_KEY_PREFIX: &str = "salt/";

/// ChaCha20-Poly1305 nonce length
const SEAL_NONCE_LEN: usize = 12;

/// Seal key length (32 bytes)
const SEAL_KEY_LEN: usize = 32;

/// Account salt length when stored (16 big-endian bytes)
const SALT_LEN: usize = 16;

// =============================================================================
// Login Session Record
// =============================================================================

/// State of one in-flight login attempt.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct LoginSession {
    /// Base64 of the ephemeral Ed25519 secret key
    pub ephemeral_secret: String,
    /// First epoch at which this session is no longer honored
    pub max_epoch: u64,
    /// Randomness bound into the login nonce
    pub randomness: u128,
    /// The nonce sent to the identity provider
    pub nonce: String,
}

impl LoginSession {
    /// Rebuild the ephemeral keypair held by this session.
    pub fn keypair(&self) -> Result<EphemeralKeypair> {
        EphemeralKeypair::from_secret_base64(&self.ephemeral_secret)
    }

    /// Whether the session's epoch deadline has passed.
    pub fn is_expired(&self, current_epoch: u64) -> bool {
        current_epoch >= self.max_epoch
    }
}

impl std::fmt::Debug for LoginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginSession")
            .field("ephemeral_secret", &"<redacted>")
            .field("max_epoch", &self.max_epoch)
            .field("nonce", &self.nonce)
            .finish()
    }
}

// =============================================================================
// Session Seal
// =============================================================================

/// ChaCha20-Poly1305 wrapper for session records at rest.
pub struct SessionSeal {
    cipher: ChaCha20Poly1305,
}

impl SessionSeal {
    pub fn new(key: &[u8; SEAL_KEY_LEN]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Build a seal from an operator-supplied base64 key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| TurnstileError::Config(format!("Invalid seal key base64: {e}")))?;
        let key: [u8; SEAL_KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            TurnstileError::Config(format!(
                "Seal key must be {SEAL_KEY_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self::new(&key))
    }

    /// Encrypt a record. Output is `nonce || ciphertext`.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; SEAL_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| TurnstileError::Internal(format!("Session seal failed: {e}")))?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a record. A record that fails authentication is rejected,
    /// never passed through as plaintext.
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() <= SEAL_NONCE_LEN {
            return Err(TurnstileError::Store(
                "Sealed session record is truncated".into(),
            ));
        }
        let (nonce, ciphertext) = sealed.split_at(SEAL_NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                TurnstileError::Store(
                    "Session record failed authentication; refusing to use it".into(),
                )
            })
    }
}

// =============================================================================
// Session Store
// =============================================================================

/// Persistence for the active login session and account salts.
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    seal: Option<SessionSeal>,
}

impl SessionStore {
    /// Store session records as plain bytes.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, seal: None }
    }

    /// Store session records sealed with the given key.
    pub fn sealed(store: Arc<dyn KeyValueStore>, seal: SessionSeal) -> Self {
        Self {
            store,
            seal: Some(seal),
        }
    }

    /// Persist a new login session, replacing any previous one.
    pub async fn begin_session(&self, session: &LoginSession) -> Result<()> {
        let plain = serde_json::to_vec(session)
            .map_err(|e| TurnstileError::Internal(format!("Failed to encode session: {e}")))?;
        let bytes = match &self.seal {
            Some(seal) => seal.seal(&plain)?,
            None => plain,
        };
        self.store.set(SESSION_KEY, bytes).await
    }

    /// Load the active login session.
    ///
    /// # Errors
    ///
    /// - [`TurnstileError::NoSession`] when no login attempt is in flight
    /// - [`TurnstileError::Store`] when the record is corrupt or fails
    ///   seal authentication
    pub async fn load_session(&self) -> Result<LoginSession> {
        let bytes = self
            .store
            .get(SESSION_KEY)
            .await?
            .ok_or(TurnstileError::NoSession)?;
        let plain = match &self.seal {
            Some(seal) => seal.open(&bytes)?,
            None => bytes,
        };
        serde_json::from_slice(&plain)
            .map_err(|e| TurnstileError::Store(format!("Corrupt session record: {e}")))
    }

    /// Drop the active login session, if any.
    pub async fn clear_session(&self) -> Result<()> {
        self.store.delete(SESSION_KEY).await
    }

    /// Fetch the salt for an account subject, creating it on first login.
    ///
    /// The salt is generated from OS randomness and stored with
    /// `put_if_absent`, so concurrent first logins for the same subject
    /// still agree on a single salt.
    pub async fn get_or_create_salt(&self, subject: &str) -> Result<u128> {
        let key = format!("{SALT_KEY_PREFIX}{subject}");
        let candidate = generate_randomness();

        let stored = self
            .store
            .put_if_absent(&key, candidate.to_be_bytes().to_vec())
            .await?;
        let bytes: [u8; SALT_LEN] = stored.as_slice().try_into().map_err(|_| {
            TurnstileError::Store(format!(
                "Corrupt salt record for subject: expected {SALT_LEN} bytes, got {}",
                stored.len()
            ))
        })?;
        let salt = u128::from_be_bytes(bytes);

        if salt == candidate {
            debug!(subject, "created account salt");
        } else {
            debug!(subject, "reusing stored account salt");
        }
        Ok(salt)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn sample_session() -> LoginSession {
        let keypair = EphemeralKeypair::generate();
        LoginSession {
            ephemeral_secret: keypair.secret_base64().to_string(),
            max_epoch: 42,
            randomness: 0x00ff_1122_3344_5566_7788_99aa_bbcc_ddee,
            nonce: "test-nonce".into(),
        }
    }

    fn memory_store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let store = memory_store();
        let session = sample_session();

        store.begin_session(&session).await.unwrap();
        let loaded = store.load_session().await.unwrap();

        assert_eq!(loaded.ephemeral_secret, session.ephemeral_secret);
        assert_eq!(loaded.max_epoch, session.max_epoch);
        assert_eq!(loaded.randomness, session.randomness);
        assert_eq!(loaded.nonce, session.nonce);
    }

    #[tokio::test]
    async fn test_load_without_begin_is_no_session() {
        let store = memory_store();
        assert!(matches!(
            store.load_session().await,
            Err(TurnstileError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_new_session_replaces_previous() {
        let store = memory_store();
        let first = sample_session();
        let mut second = sample_session();
        second.nonce = "second-nonce".into();

        store.begin_session(&first).await.unwrap();
        store.begin_session(&second).await.unwrap();

        let loaded = store.load_session().await.unwrap();
        assert_eq!(loaded.nonce, "second-nonce");
    }

    #[tokio::test]
    async fn test_clear_session() {
        let store = memory_store();
        store.begin_session(&sample_session()).await.unwrap();
        store.clear_session().await.unwrap();

        assert!(matches!(
            store.load_session().await,
            Err(TurnstileError::NoSession)
        ));
    }

    #[test]
    fn test_expiry_boundary() {
        let mut session = sample_session();
        session.max_epoch = 5;

        assert!(!session.is_expired(4));
        assert!(session.is_expired(5));
        assert!(session.is_expired(6));
    }

    #[tokio::test]
    async fn test_salt_is_stable_per_subject() {
        let store = memory_store();

        let first = store.get_or_create_salt("google-oauth2|12345").await.unwrap();
        let second = store.get_or_create_salt("google-oauth2|12345").await.unwrap();
        assert_eq!(first, second);

        let other = store.get_or_create_salt("google-oauth2|67890").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_sealed_roundtrip() {
        let store = SessionStore::sealed(Arc::new(MemoryStore::new()), SessionSeal::new(&[7u8; 32]));
        let session = sample_session();

        store.begin_session(&session).await.unwrap();
        let loaded = store.load_session().await.unwrap();
        assert_eq!(loaded.nonce, session.nonce);
    }

    #[tokio::test]
    async fn test_sealed_record_is_not_plaintext() {
        let backing = Arc::new(MemoryStore::new());
        let store = SessionStore::sealed(backing.clone(), SessionSeal::new(&[7u8; 32]));
        let session = sample_session();

        store.begin_session(&session).await.unwrap();
        let raw = backing.get("login/session").await.unwrap().unwrap();

        assert!(!String::from_utf8_lossy(&raw).contains(&session.nonce));
    }

    #[tokio::test]
    async fn test_wrong_seal_key_is_rejected() {
        let backing = Arc::new(MemoryStore::new());
        let writer = SessionStore::sealed(backing.clone(), SessionSeal::new(&[7u8; 32]));
        writer.begin_session(&sample_session()).await.unwrap();

        let reader = SessionStore::sealed(backing, SessionSeal::new(&[8u8; 32]));
        assert!(matches!(
            reader.load_session().await,
            Err(TurnstileError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_record_is_rejected() {
        let backing = Arc::new(MemoryStore::new());
        let store = SessionStore::sealed(backing.clone(), SessionSeal::new(&[7u8; 32]));
        store.begin_session(&sample_session()).await.unwrap();

        let mut raw = backing.get("login/session").await.unwrap().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        backing.set("login/session", raw).await.unwrap();

        assert!(matches!(
            store.load_session().await,
            Err(TurnstileError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_plaintext_record_is_rejected_once_sealing_is_on() {
        let backing = Arc::new(MemoryStore::new());
        let plain = SessionStore::new(backing.clone());
        plain.begin_session(&sample_session()).await.unwrap();

        let sealed = SessionStore::sealed(backing, SessionSeal::new(&[7u8; 32]));
        assert!(matches!(
            sealed.load_session().await,
            Err(TurnstileError::Store(_))
        ));
    }

    #[test]
    fn test_seal_key_length_is_checked() {
        let short = BASE64.encode([1u8; 16]);
        assert!(matches!(
            SessionSeal::from_base64(&short),
            Err(TurnstileError::Config(_))
        ));

        let ok = BASE64.encode([1u8; 32]);
        assert!(SessionSeal::from_base64(&ok).is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let session = sample_session();
        let rendered = format!("{session:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&session.ephemeral_secret));
    }
}
