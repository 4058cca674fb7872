//! Keyless login flow.
//!
//! A login runs in two halves. `begin` mints an ephemeral keypair, binds
//! it into a nonce, persists the session, and hands back the provider
//! redirect URL. `complete` takes the id token the provider returned,
//! checks it against the stored session, settles the account salt, and
//! derives the on-chain address. The session record is consumed on
//! completion; signing material lives on in the returned
//! [`DerivedAccount`] until its epoch window closes.

use std::sync::Arc;

use tracing::info;

use crate::identity::{compute_nonce, decode_id_token, derive_address_from_claims};
use crate::keys::{generate_randomness, EphemeralKeypair};
use crate::ledger::{transaction, Address, LedgerClient};
use crate::prover::ProofInputs;
use crate::session::{LoginSession, SessionStore};
use crate::types::{Result, TurnstileError};

/// How many epochs past the current one an ephemeral key stays usable
pub const DEFAULT_VALIDITY_EPOCHS: u64 = 2;

// =============================================================================
// Configuration
// =============================================================================

/// OAuth parameters for the provider redirect.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub scope: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: String::new(),
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            scope: "openid email profile".to_string(),
        }
    }
}

impl OAuthConfig {
    fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(TurnstileError::Config("OAuth client id is not set".into()));
        }
        if self.redirect_uri.is_empty() {
            return Err(TurnstileError::Config("OAuth redirect URI is not set".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Everything the caller needs to send the user to the provider.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: String,
    pub nonce: String,
    pub max_epoch: u64,
}

/// A completed login: the derived account plus the material needed to
/// sign and prove on its behalf.
pub struct DerivedAccount {
    pub address: Address,
    pub keypair: EphemeralKeypair,
    pub max_epoch: u64,
    pub randomness: u128,
    pub salt: u128,
    pub id_token: String,
}

impl DerivedAccount {
    /// Counter-sign transaction bytes with the ephemeral key.
    pub fn sign_transaction(&self, transaction_bytes: &[u8]) -> String {
        transaction::sign_transaction_bytes(self.keypair.signing_key(), transaction_bytes)
    }

    /// Assemble the inputs for a proof request over this account.
    pub fn proof_inputs(&self, current_epoch: u64) -> ProofInputs<'_> {
        ProofInputs {
            jwt: &self.id_token,
            ephemeral: &self.keypair,
            max_epoch: self.max_epoch,
            randomness: self.randomness,
            salt: self.salt,
            current_epoch,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Drives login attempts against one identity provider and one network.
pub struct LoginService {
    oauth: OAuthConfig,
    sessions: SessionStore,
    ledger: Arc<dyn LedgerClient>,
    validity_epochs: u64,
}

impl LoginService {
    pub fn new(oauth: OAuthConfig, sessions: SessionStore, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            oauth,
            sessions,
            ledger,
            validity_epochs: DEFAULT_VALIDITY_EPOCHS,
        }
    }

    pub fn with_validity_epochs(mut self, epochs: u64) -> Self {
        self.validity_epochs = epochs;
        self
    }

    /// Start a login attempt.
    ///
    /// Mints fresh key material, persists the session (replacing any
    /// earlier attempt), and returns the provider redirect carrying the
    /// nonce.
    pub async fn begin(&self) -> Result<LoginRedirect> {
        self.oauth.validate()?;

        let keypair = EphemeralKeypair::generate();
        let current_epoch = self.ledger.latest_epoch().await?;
        let max_epoch = current_epoch + self.validity_epochs;
        let randomness = generate_randomness();
        let nonce = compute_nonce(&keypair.public(), max_epoch, randomness);

        let session = LoginSession {
            ephemeral_secret: keypair.secret_base64().to_string(),
            max_epoch,
            randomness,
            nonce: nonce.clone(),
        };
        self.sessions.begin_session(&session).await?;

        let query = serde_urlencoded::to_string([
            ("client_id", self.oauth.client_id.as_str()),
            ("response_type", "id_token"),
            ("redirect_uri", self.oauth.redirect_uri.as_str()),
            ("scope", self.oauth.scope.as_str()),
            ("nonce", nonce.as_str()),
        ])
        .map_err(|e| TurnstileError::Internal(format!("Failed to encode redirect: {e}")))?;
        let url = format!("{}?{}", self.oauth.authorize_url, query);

        info!(current_epoch, max_epoch, "login attempt started");

        Ok(LoginRedirect {
            url,
            nonce,
            max_epoch,
        })
    }

    /// Complete a login attempt with the id token the provider returned.
    ///
    /// The stored session is checked for self-consistency and expiry, the
    /// token's nonce must match the attempt, and the salt settled for the
    /// token's subject decides the derived address. The session record is
    /// removed on success and on expiry.
    pub async fn complete(&self, id_token: &str) -> Result<DerivedAccount> {
        let session = self.sessions.load_session().await?;
        let keypair = session.keypair()?;

        // A record whose nonce cannot be recomputed from its own key
        // material was tampered with or torn.
        let recomputed = compute_nonce(&keypair.public(), session.max_epoch, session.randomness);
        if recomputed != session.nonce {
            return Err(TurnstileError::Store(
                "Session nonce does not match its key material".into(),
            ));
        }

        let current_epoch = self.ledger.latest_epoch().await?;
        if session.is_expired(current_epoch) {
            self.sessions.clear_session().await?;
            return Err(TurnstileError::SessionExpired(format!(
                "Login attempt expired at epoch {}, network is at {current_epoch}",
                session.max_epoch
            )));
        }

        let claims = decode_id_token(id_token)?;
        if let Some(token_nonce) = &claims.nonce {
            if token_nonce != &session.nonce {
                return Err(TurnstileError::InvalidToken(
                    "Token nonce does not match this login attempt".into(),
                ));
            }
        }

        let salt = self.sessions.get_or_create_salt(&claims.sub).await?;
        let address = derive_address_from_claims(&claims, salt)?;

        self.sessions.clear_session().await?;
        info!(%address, max_epoch = session.max_epoch, "login completed");

        Ok(DerivedAccount {
            address,
            keypair,
            max_epoch: session.max_epoch,
            randomness: session.randomness,
            salt,
            id_token: id_token.to_string(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NONCE_LEN;
    use crate::ledger::ResourceRef;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StaticLedger {
        epoch: AtomicU64,
    }

    impl StaticLedger {
        fn at_epoch(epoch: u64) -> Arc<Self> {
            Arc::new(Self {
                epoch: AtomicU64::new(epoch),
            })
        }

        fn advance_to(&self, epoch: u64) {
            self.epoch.store(epoch, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LedgerClient for StaticLedger {
        async fn latest_epoch(&self) -> Result<u64> {
            Ok(self.epoch.load(Ordering::SeqCst))
        }

        async fn owned_fee_resources(
            &self,
            _owner: &Address,
            _limit: usize,
        ) -> Result<Vec<ResourceRef>> {
            Ok(vec![])
        }

        async fn execute_transaction(
            &self,
            _transaction_b64: &str,
            _signatures: &[String],
        ) -> Result<serde_json::Value> {
            Err(TurnstileError::Execution("not available here".into()))
        }
    }

    fn make_token(sub: &str, nonce: Option<&str>) -> String {
        let mut claims = json!({
            "iss": "https://accounts.example.test",
            "sub": sub,
            "aud": "client-1",
        });
        if let Some(nonce) = nonce {
            claims["nonce"] = json!(nonce);
        }
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(json!({"alg": "RS256", "typ": "JWT"}).to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string()),
            URL_SAFE_NO_PAD.encode(b"unchecked-signature"),
        )
    }

    fn service(ledger: Arc<StaticLedger>) -> LoginService {
        let oauth = OAuthConfig {
            client_id: "client-1".into(),
            redirect_uri: "http://localhost:3000/".into(),
            ..Default::default()
        };
        LoginService::new(oauth, SessionStore::new(Arc::new(MemoryStore::new())), ledger)
    }

    #[tokio::test]
    async fn test_begin_builds_provider_redirect() {
        let service = service(StaticLedger::at_epoch(5));
        let redirect = service.begin().await.unwrap();

        assert_eq!(redirect.max_epoch, 5 + DEFAULT_VALIDITY_EPOCHS);
        assert_eq!(redirect.nonce.len(), NONCE_LEN);

        let (base, query) = redirect.url.split_once('?').unwrap();
        assert_eq!(base, "https://accounts.google.com/o/oauth2/v2/auth");

        let params: HashMap<String, String> = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["response_type"], "id_token");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/");
        assert_eq!(params["scope"], "openid email profile");
        assert_eq!(params["nonce"], redirect.nonce);
    }

    #[tokio::test]
    async fn test_begin_requires_oauth_config() {
        let ledger = StaticLedger::at_epoch(5);
        let unconfigured = LoginService::new(
            OAuthConfig::default(),
            SessionStore::new(Arc::new(MemoryStore::new())),
            ledger,
        );

        assert!(matches!(
            unconfigured.begin().await,
            Err(TurnstileError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_without_begin_is_no_session() {
        let service = service(StaticLedger::at_epoch(5));
        let result = service.complete(&make_token("subject-1", None)).await;
        assert!(matches!(result, Err(TurnstileError::NoSession)));
    }

    #[tokio::test]
    async fn test_new_attempt_supersedes_previous() {
        let service = service(StaticLedger::at_epoch(5));

        let first = service.begin().await.unwrap();
        let second = service.begin().await.unwrap();
        assert_ne!(first.nonce, second.nonce);

        // A token minted for the first attempt no longer matches
        let stale = service
            .complete(&make_token("subject-1", Some(&first.nonce)))
            .await;
        assert!(matches!(stale, Err(TurnstileError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_complete_derives_stable_address() {
        let service = service(StaticLedger::at_epoch(5));

        let first = service.begin().await.unwrap();
        let account_a = service
            .complete(&make_token("subject-1", Some(&first.nonce)))
            .await
            .unwrap();

        // A whole new attempt for the same subject lands on the same
        // address because the salt is settled once.
        let second = service.begin().await.unwrap();
        let account_b = service
            .complete(&make_token("subject-1", Some(&second.nonce)))
            .await
            .unwrap();
        assert_eq!(account_a.address, account_b.address);
        assert_eq!(account_a.salt, account_b.salt);

        // A different subject lands elsewhere
        let third = service.begin().await.unwrap();
        let account_c = service
            .complete(&make_token("subject-2", Some(&third.nonce)))
            .await
            .unwrap();
        assert_ne!(account_a.address, account_c.address);
    }

    #[tokio::test]
    async fn test_complete_consumes_the_session() {
        let service = service(StaticLedger::at_epoch(5));
        let redirect = service.begin().await.unwrap();
        let token = make_token("subject-1", Some(&redirect.nonce));

        service.complete(&token).await.unwrap();
        assert!(matches!(
            service.complete(&token).await,
            Err(TurnstileError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_expired_attempt_is_rejected_and_cleared() {
        let ledger = StaticLedger::at_epoch(5);
        let service = service(ledger.clone());

        let redirect = service.begin().await.unwrap();
        ledger.advance_to(redirect.max_epoch);

        let token = make_token("subject-1", Some(&redirect.nonce));
        assert!(matches!(
            service.complete(&token).await,
            Err(TurnstileError::SessionExpired(_))
        ));
        assert!(matches!(
            service.complete(&token).await,
            Err(TurnstileError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_token_without_nonce_is_accepted() {
        let service = service(StaticLedger::at_epoch(5));
        service.begin().await.unwrap();

        let account = service.complete(&make_token("subject-1", None)).await;
        assert!(account.is_ok());
    }

    #[tokio::test]
    async fn test_derived_account_signs_transactions() {
        let service = service(StaticLedger::at_epoch(5));
        let redirect = service.begin().await.unwrap();
        let account = service
            .complete(&make_token("subject-1", Some(&redirect.nonce)))
            .await
            .unwrap();

        let payload = b"transaction-bytes";
        let signature = account.sign_transaction(payload);
        let signer = transaction::verify_wire_signature(&signature, payload).unwrap();
        assert_eq!(signer, Address::from_ed25519(&account.keypair.public()));
    }

    #[tokio::test]
    async fn test_proof_inputs_reflect_the_account() {
        let service = service(StaticLedger::at_epoch(5));
        let redirect = service.begin().await.unwrap();
        let account = service
            .complete(&make_token("subject-1", Some(&redirect.nonce)))
            .await
            .unwrap();

        let inputs = account.proof_inputs(6);
        assert_eq!(inputs.max_epoch, redirect.max_epoch);
        assert_eq!(inputs.salt, account.salt);
        assert_eq!(inputs.current_epoch, 6);
        assert_eq!(inputs.jwt, account.id_token);
    }
}
