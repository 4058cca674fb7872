//! Sponsored-transaction coordination.
//!
//! The handshake runs in two phases. *Create* takes a transaction kind
//! and a sender, wraps it with the sponsor's fee payment, signs it with
//! the sponsor key, and parks the result as a pending envelope keyed by
//! digest. *Execute* takes that digest plus the sender's counter
//! signature and relays the fully signed transaction to the ledger.
//!
//! Envelopes are single use. Execute consumes the envelope before it
//! talks to the ledger, so a failed or replayed execution always starts
//! over at create. Fee resources attached to an envelope are reserved
//! until the envelope executes, fails, or times out, which keeps two
//! concurrent creates from spending the same resource.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use ed25519_dalek::SigningKey;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::keys::decode_sponsor_key;
use crate::ledger::transaction::{self, Command, GasData, Transaction, TransactionKind};
use crate::ledger::{Address, LedgerClient, ResourceRef};
use crate::types::{Result, TurnstileError};

/// Fee price attached to sponsored transactions
pub const DEFAULT_FEE_PRICE: u64 = 1000;

// =============================================================================
// Configuration
// =============================================================================

/// Operator policy for the sponsorship surface.
#[derive(Debug, Clone)]
pub struct SponsorConfig {
    /// Encoded sponsor secret key, absent when sponsorship is disabled
    pub key_material: Option<String>,
    /// Call targets the sponsor is willing to pay for
    pub allowed_call_targets: Vec<String>,
    /// Network this gateway sponsors on
    pub network: String,
    /// Fee budget attached to every sponsored transaction
    pub fee_budget: u64,
    /// Most fee resources attached to one transaction
    pub max_fee_resources: usize,
    /// How long a created envelope stays executable
    pub envelope_ttl: Duration,
}

impl Default for SponsorConfig {
    fn default() -> Self {
        Self {
            key_material: None,
            allowed_call_targets: vec![],
            network: "testnet".to_string(),
            fee_budget: 10_000_000,
            max_fee_resources: 8,
            envelope_ttl: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Envelopes
// =============================================================================

/// Result of the create phase, handed back to the caller.
#[derive(Debug, Clone)]
pub struct SponsoredTransaction {
    pub transaction_bytes_b64: String,
    pub digest: String,
    pub sender: Address,
    pub sponsor_address: Address,
    pub sponsor_signature: String,
    pub fee_payment: Vec<ResourceRef>,
}

/// A created envelope waiting for its sender signature.
struct PendingEnvelope {
    transaction_bytes: Vec<u8>,
    sender: Address,
    sponsor_signature: String,
    fee_resource_ids: Vec<String>,
    created_at: Instant,
}

/// Frees a set of fee reservations when dropped.
///
/// Execute arms one as soon as it takes an envelope out of the pending
/// map. Once the envelope is out, the TTL sweep can no longer reach its
/// reservations, so releasing has to survive every exit from execute,
/// including the future being dropped at an await when the caller
/// disconnects mid-relay.
struct ReservationGuard<'a> {
    coordinator: &'a SponsorshipCoordinator,
    ids: Vec<String>,
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release_fee_payment(&self.ids);
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Owns the sponsor key, the pending envelopes, and the fee reservations.
pub struct SponsorshipCoordinator {
    config: SponsorConfig,
    ledger: Arc<dyn LedgerClient>,
    /// Envelopes by transaction digest
    pending: DashMap<String, PendingEnvelope>,
    /// Fee resource id -> digest of the envelope holding it
    reserved: DashMap<String, String>,
    /// Serializes resource selection so concurrent creates cannot pick
    /// the same fee resources
    selection: Mutex<()>,
}

impl SponsorshipCoordinator {
    pub fn new(config: SponsorConfig, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            config,
            ledger,
            pending: DashMap::new(),
            reserved: DashMap::new(),
            selection: Mutex::new(()),
        }
    }

    /// Decode the operator's sponsor key.
    pub fn sponsor_key(&self) -> Result<SigningKey> {
        let material = self
            .config
            .key_material
            .as_deref()
            .filter(|material| !material.trim().is_empty())
            .ok_or_else(|| TurnstileError::SponsorKey("No sponsor key configured".into()))?;
        decode_sponsor_key(material).map_err(|e| TurnstileError::SponsorKey(e.to_string()))
    }

    /// Whether this gateway can sponsor at all.
    pub fn is_configured(&self) -> bool {
        self.sponsor_key().is_ok()
    }

    /// Number of envelopes waiting for execution.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Create phase: wrap a transaction kind with sponsor gas and a
    /// sponsor signature, and park the envelope for execution.
    pub async fn create(
        &self,
        kind_b64: &str,
        sender: Address,
        network: Option<&str>,
    ) -> Result<SponsoredTransaction> {
        self.ensure_network(network)?;

        let sponsor = self.sponsor_key()?;
        let sponsor_address = Address::from_ed25519(&sponsor.verifying_key());

        let kind = TransactionKind::decode_base64(kind_b64)?;
        self.ensure_allowed(&kind)?;

        let fee_payment = self.reserve_fee_payment(&sponsor_address).await?;
        let fee_resource_ids: Vec<String> =
            fee_payment.iter().map(|resource| resource.id.clone()).collect();

        let tx = Transaction {
            kind,
            sender,
            gas: GasData {
                payment: fee_payment.clone(),
                owner: sponsor_address,
                price: DEFAULT_FEE_PRICE,
                budget: self.config.fee_budget,
            },
            expiration_epoch: None,
        };
        let transaction_bytes = match tx.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.release_fee_payment(&fee_resource_ids);
                return Err(e);
            }
        };

        let digest = transaction::digest(&transaction_bytes);
        let sponsor_signature = transaction::sign_transaction_bytes(&sponsor, &transaction_bytes);

        // Tag the reservations with the digest they now belong to
        for id in &fee_resource_ids {
            self.reserved.insert(id.clone(), digest.clone());
        }
        self.pending.insert(
            digest.clone(),
            PendingEnvelope {
                transaction_bytes: transaction_bytes.clone(),
                sender,
                sponsor_signature: sponsor_signature.clone(),
                fee_resource_ids,
                created_at: Instant::now(),
            },
        );

        info!(
            %sender,
            digest = %digest,
            fee_resources = fee_payment.len(),
            "sponsorship envelope created"
        );

        Ok(SponsoredTransaction {
            transaction_bytes_b64: BASE64.encode(&transaction_bytes),
            digest,
            sender,
            sponsor_address,
            sponsor_signature,
            fee_payment,
        })
    }

    /// Execute phase: attach the sender's signature to a pending envelope
    /// and relay it.
    ///
    /// The envelope is consumed immediately. Whatever happens next, a
    /// retry has to start over at create.
    pub async fn execute(
        &self,
        digest: &str,
        sender_signature: &str,
    ) -> Result<serde_json::Value> {
        let (_, envelope) = self.pending.remove(digest).ok_or_else(|| {
            TurnstileError::Execution(format!("No pending sponsorship for digest {digest}"))
        })?;

        // The envelope's reservations now belong to this call alone.
        // The guard hands them back on every path out, early return or
        // the future being dropped mid-await alike.
        let _reservations = ReservationGuard {
            coordinator: self,
            ids: envelope.fee_resource_ids,
        };

        if envelope.created_at.elapsed() >= self.config.envelope_ttl {
            warn!(digest, "rejected execution of an expired envelope");
            return Err(TurnstileError::Execution(
                "Sponsorship envelope expired; request a new one".into(),
            ));
        }

        // The key behind a keyless sender is attested by its proof, which
        // only the relay can check. Locally the signature must at least
        // verify over these exact bytes, which pins it to this envelope.
        let signer =
            transaction::verify_wire_signature(sender_signature, &envelope.transaction_bytes)
                .map_err(|e| {
                    warn!(digest, error = %e, "rejected sender signature");
                    e
                })?;

        debug!(digest, signer = %signer, sender = %envelope.sender, "relaying co-signed envelope");

        let result = self
            .ledger
            .execute_transaction(
                &BASE64.encode(&envelope.transaction_bytes),
                &[sender_signature.to_string(), envelope.sponsor_signature.clone()],
            )
            .await;

        match result {
            Ok(receipt) => {
                info!(digest, sender = %envelope.sender, "sponsored transaction executed");
                Ok(receipt)
            }
            Err(e) => {
                warn!(digest, error = %e, "sponsored execution failed");
                Err(e)
            }
        }
    }

    /// Drop envelopes that outlived their TTL and free their fee
    /// resources. Returns how many were removed.
    pub fn expire_stale(&self) -> usize {
        let ttl = self.config.envelope_ttl;
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().created_at.elapsed() >= ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for digest in stale {
            if let Some((_, envelope)) = self.pending.remove(&digest) {
                self.release_fee_payment(&envelope.fee_resource_ids);
                removed += 1;
                warn!(
                    digest = %digest,
                    age_secs = envelope.created_at.elapsed().as_secs(),
                    "expired sponsorship envelope"
                );
            }
        }
        removed
    }

    fn ensure_network(&self, requested: Option<&str>) -> Result<()> {
        if let Some(network) = requested {
            if !network.is_empty() && network != self.config.network {
                return Err(TurnstileError::InvalidRequest(format!(
                    "Unsupported network {network:?}, this gateway sponsors on {:?}",
                    self.config.network
                )));
            }
        }
        Ok(())
    }

    /// Every command must be a call to an allow-listed target. Anything
    /// else gets a free veto before the sponsor key touches it.
    fn ensure_allowed(&self, kind: &TransactionKind) -> Result<()> {
        if kind.commands.is_empty() {
            return Err(TurnstileError::InvalidRequest(
                "Transaction kind has no commands".into(),
            ));
        }
        for command in &kind.commands {
            match command {
                Command::Call { target, .. } => {
                    if !self
                        .config
                        .allowed_call_targets
                        .iter()
                        .any(|allowed| allowed == target)
                    {
                        return Err(TurnstileError::InvalidRequest(format!(
                            "Call target {target} is not sponsored here"
                        )));
                    }
                }
                Command::Transfer { .. } => {
                    return Err(TurnstileError::InvalidRequest(
                        "Only pre-approved contract calls can be sponsored".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Pick un-reserved fee resources for one envelope, holding the
    /// selection lock across query and reservation.
    async fn reserve_fee_payment(&self, sponsor_address: &Address) -> Result<Vec<ResourceRef>> {
        let _guard = self.selection.lock().await;

        // Fetch enough that already-reserved resources can be skipped
        let fetch_limit = self.config.max_fee_resources + self.reserved.len();
        let candidates = self
            .ledger
            .owned_fee_resources(sponsor_address, fetch_limit)
            .await?;
        if candidates.is_empty() {
            return Err(TurnstileError::SponsorInsolvent(
                "Sponsor account holds no fee resources".into(),
            ));
        }

        let selected: Vec<ResourceRef> = candidates
            .into_iter()
            .filter(|resource| !self.reserved.contains_key(&resource.id))
            .take(self.config.max_fee_resources)
            .collect();
        if selected.is_empty() {
            return Err(TurnstileError::SponsorInsolvent(
                "All sponsor fee resources are reserved by in-flight envelopes".into(),
            ));
        }

        for resource in &selected {
            self.reserved.insert(resource.id.clone(), String::new());
        }
        Ok(selected)
    }

    fn release_fee_payment(&self, ids: &[String]) {
        for id in ids {
            self.reserved.remove(id);
        }
    }
}

/// Periodically sweep expired envelopes.
pub fn spawn_expiry_task(
    coordinator: Arc<SponsorshipCoordinator>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = coordinator.expire_stale();
            if removed > 0 {
                debug!(removed, "swept expired sponsorship envelopes");
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================
