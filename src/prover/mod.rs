//! Zero-knowledge proof orchestration.
//!
//! The proving service takes an id token plus the ephemeral key material
//! and returns a proof bundle. Deployed provers disagree on field
//! spelling (camelCase vs snake_case) and on whether they echo the
//! address seed back, so responses are normalized into one canonical
//! [`ZkCredential`] at this boundary and nowhere else.
//!
//! The address seed is always recomputed locally. A prover that reports a
//! different seed is lying about the account it proved, and the login is
//! aborted rather than patched over.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identity::{compute_address_seed, decode_id_token, KEY_CLAIM_NAME};
use crate::keys::EphemeralKeypair;
use crate::types::{Result, TurnstileError};

/// Configuration for the proof orchestrator
#[derive(Debug, Clone)]
pub struct ProverConfig {
    /// Proving service endpoint
    pub url: String,
    /// Timeout for proof requests (default: 30 seconds)
    pub request_timeout: Duration,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8200/v1".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Canonical Credential
// =============================================================================

/// Groth16 proof points as the prover reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPoints {
    pub a: Vec<String>,
    pub b: Vec<Vec<String>>,
    pub c: Vec<String>,
}

/// Issuer claim encoding carried alongside the proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerClaim {
    pub value: String,
    pub index_mod4: u8,
}

/// Where the credential's address seed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedSource {
    Prover,
    Local,
}

/// Normalized proof bundle, ready to assemble a login signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkCredential {
    pub proof_points: ProofPoints,
    pub issuer_claim: IssuerClaim,
    pub header_encoding: String,
    pub address_seed: String,
    pub seed_source: SeedSource,
}

// =============================================================================
// Wire Shapes
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofRequestBody<'a> {
    jwt: &'a str,
    extended_ephemeral_public_key: String,
    max_epoch: u64,
    jwt_randomness: String,
    salt: String,
    key_claim_name: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProverResponse {
    #[serde(default, alias = "proof_points")]
    proof_points: Option<ProofPoints>,
    #[serde(default, alias = "iss_base64_details")]
    iss_base64_details: Option<RawIssuerClaim>,
    #[serde(default, alias = "header_base64")]
    header_base64: Option<String>,
    #[serde(default, alias = "address_seed")]
    address_seed: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIssuerClaim {
    #[serde(default)]
    value: Option<String>,
    #[serde(default, alias = "index_mod_4")]
    index_mod4: Option<u8>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Inputs for one proof request.
pub struct ProofInputs<'a> {
    pub jwt: &'a str,
    pub ephemeral: &'a EphemeralKeypair,
    pub max_epoch: u64,
    pub randomness: u128,
    pub salt: u128,
    pub current_epoch: u64,
}

/// Client for the external proving service.
pub struct ProofOrchestrator {
    config: ProverConfig,
    http_client: reqwest::Client,
}

impl ProofOrchestrator {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(ProverConfig {
            url: url.into(),
            ..Default::default()
        })
    }

    pub fn with_config(config: ProverConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("turnstile/0.1")
            .build()
            .unwrap_or_default();

        Self {
            config,
            http_client,
        }
    }

    /// Request a proof for a login session and normalize the response.
    ///
    /// # Errors
    ///
    /// - [`TurnstileError::SessionExpired`] before any network call when
    ///   the ephemeral key's epoch window has already closed
    /// - [`TurnstileError::InvalidToken`] when the id token cannot supply
    ///   the claims the seed needs
    /// - [`TurnstileError::ProverUnavailable`] / [`TurnstileError::Timeout`]
    ///   for transport-level failures
    /// - [`TurnstileError::ProverResponse`] when the response is missing
    ///   required fields
    /// - [`TurnstileError::AddressSeedMismatch`] when the prover reports a
    ///   seed that disagrees with the locally derived one
    pub async fn request_proof(&self, inputs: ProofInputs<'_>) -> Result<ZkCredential> {
        ensure_not_expired(inputs.current_epoch, inputs.max_epoch)?;

        let claims = decode_id_token(inputs.jwt)?;
        let local_seed = compute_address_seed(
            inputs.salt,
            KEY_CLAIM_NAME,
            &claims.sub,
            claims.audience()?,
        );

        let body = ProofRequestBody {
            jwt: inputs.jwt,
            extended_ephemeral_public_key: inputs.ephemeral.extended_public_key(),
            max_epoch: inputs.max_epoch,
            jwt_randomness: inputs.randomness.to_string(),
            salt: inputs.salt.to_string(),
            key_claim_name: KEY_CLAIM_NAME,
        };

        debug!(url = %self.config.url, max_epoch = inputs.max_epoch, "requesting proof");

        let response = self
            .http_client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TurnstileError::Timeout(format!("Proof request timed out: {e}"))
                } else {
                    TurnstileError::ProverUnavailable(format!("Proving service unreachable: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let snippet: String = detail.chars().take(200).collect();
            return Err(TurnstileError::ProverUnavailable(format!(
                "Proving service returned status {status}: {snippet}"
            )));
        }

        let raw: RawProverResponse = response
            .json()
            .await
            .map_err(|e| TurnstileError::ProverResponse(format!("Undecodable response: {e}")))?;

        debug!(
            has_proof_points = raw.proof_points.is_some(),
            has_issuer_claim = raw.iss_base64_details.is_some(),
            has_header = raw.header_base64.is_some(),
            has_address_seed = raw.address_seed.is_some(),
            "prover response received"
        );

        normalize_response(raw, &local_seed)
    }
}

/// Reject proof requests for an ephemeral key whose window has closed.
fn ensure_not_expired(current_epoch: u64, max_epoch: u64) -> Result<()> {
    if current_epoch >= max_epoch {
        return Err(TurnstileError::SessionExpired(format!(
            "Ephemeral key expired at epoch {max_epoch}, network is at {current_epoch}"
        )));
    }
    Ok(())
}

/// Collapse a raw prover response into the canonical credential.
fn normalize_response(raw: RawProverResponse, local_seed: &str) -> Result<ZkCredential> {
    let proof_points = raw
        .proof_points
        .ok_or_else(|| TurnstileError::ProverResponse("Response carried no proof points".into()))?;
    if proof_points.a.is_empty() || proof_points.b.is_empty() || proof_points.c.is_empty() {
        return Err(TurnstileError::ProverResponse(
            "Response carried empty proof points".into(),
        ));
    }

    let issuer = raw
        .iss_base64_details
        .ok_or_else(|| TurnstileError::ProverResponse("Response carried no issuer claim".into()))?;
    let issuer_claim = IssuerClaim {
        value: issuer.value.filter(|v| !v.is_empty()).ok_or_else(|| {
            TurnstileError::ProverResponse("Issuer claim is missing its value".into())
        })?,
        index_mod4: issuer.index_mod4.ok_or_else(|| {
            TurnstileError::ProverResponse("Issuer claim is missing its index".into())
        })?,
    };

    let header_encoding = raw
        .header_base64
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TurnstileError::ProverResponse("Response carried no header".into()))?;

    let (address_seed, seed_source) = match raw.address_seed.as_deref().map(canonical_seed) {
        Some(prover_seed) => {
            if prover_seed != local_seed {
                let reported: String = prover_seed.chars().take(8).collect();
                let derived: String = local_seed.chars().take(8).collect();
                return Err(TurnstileError::AddressSeedMismatch(format!(
                    "Prover reported seed {reported}..., local derivation is {derived}...",
                )));
            }
            (prover_seed, SeedSource::Prover)
        }
        None => {
            warn!("prover response omitted the address seed, using local derivation");
            (local_seed.to_string(), SeedSource::Local)
        }
    };

    Ok(ZkCredential {
        proof_points,
        issuer_claim,
        header_encoding,
        address_seed,
        seed_source,
    })
}

/// Seeds compare as lowercase hex without a 0x prefix.
fn canonical_seed(seed: &str) -> String {
    let trimmed = seed.trim();
    trimmed
        .strip_prefix("0x")
        .unwrap_or(trimmed)
        .to_lowercase()
}

// =============================================================================
// Tests
// =============================================================================
