//! Sponsorship endpoint
//!
//! A single POST /sponsor endpoint carries both phases of the protocol.
//! The body shape decides which phase runs:
//! - create:  { network?, transactionKindBytes, sender }
//! - execute: { digest, signature }
//!
//! A body that mixes fields from both phases is rejected rather than
//! guessed at. Every error response carries the same three fields:
//! message, code, and retryable.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ledger::Address;
use crate::server::AppState;
use crate::sponsor::SponsoredTransaction;
use crate::types::{Result, TurnstileError};

/// Largest accepted request body. Transaction kinds are small; anything
/// beyond this is not a legitimate sponsorship request.
const MAX_BODY_BYTES: usize = 512 * 1024;

// =============================================================================
// Request / response shapes
// =============================================================================

/// Raw POST /sponsor body before phase classification.
///
/// Every field is optional at the serde level so classification can see
/// exactly which fields the caller sent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorRequestBody {
    /// Create phase: base64 transaction kind. The alias covers the
    /// long-form field name some client SDKs emit.
    #[serde(default, alias = "transactionBlockKindBytes")]
    pub transaction_kind_bytes: Option<String>,
    /// Create phase: keyless sender address
    #[serde(default)]
    pub sender: Option<String>,
    /// Create phase: network guard, checked against the gateway's own
    #[serde(default)]
    pub network: Option<String>,
    /// Execute phase: digest returned by the create phase
    #[serde(default)]
    pub digest: Option<String>,
    /// Execute phase: wire-format sender signature
    #[serde(default)]
    pub signature: Option<String>,
}

/// A sponsor request resolved to exactly one protocol phase.
#[derive(Debug)]
pub enum SponsorAction {
    Create {
        transaction_kind_bytes: String,
        sender: Address,
        network: Option<String>,
    },
    Execute {
        digest: String,
        signature: String,
    },
}

/// Create phase response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponseBody {
    /// Full sponsored transaction, base64
    pub bytes: String,
    /// Digest the execute phase must present
    pub digest: String,
    /// Wire-format sponsor signature over the sponsored bytes
    pub sponsor_signature: String,
    /// Address paying the fees
    pub sponsor_address: Address,
}

impl From<SponsoredTransaction> for CreateResponseBody {
    fn from(sponsored: SponsoredTransaction) -> Self {
        Self {
            bytes: sponsored.transaction_bytes_b64,
            digest: sponsored.digest,
            sponsor_signature: sponsored.sponsor_signature,
            sponsor_address: sponsored.sponsor_address,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Decide which phase a body belongs to from the fields it carries.
///
/// Presence drives classification; emptiness is a validation error
/// within the chosen phase. A body naming fields from both phases is
/// ambiguous and rejected outright.
pub fn classify(body: SponsorRequestBody) -> Result<SponsorAction> {
    let has_create = body.transaction_kind_bytes.is_some() || body.sender.is_some();
    let has_execute = body.digest.is_some() || body.signature.is_some();

    match (has_create, has_execute) {
        (true, true) => Err(TurnstileError::InvalidRequest(
            "Request mixes create fields (transactionKindBytes/sender) with execute fields (digest/signature)"
                .into(),
        )),
        (false, false) => Err(TurnstileError::InvalidRequest(
            "Request is neither a create (transactionKindBytes + sender) nor an execute (digest + signature)"
                .into(),
        )),
        (true, false) => {
            let transaction_kind_bytes =
                non_empty(body.transaction_kind_bytes).ok_or_else(|| {
                    TurnstileError::InvalidRequest(
                        "Create requests need both transactionKindBytes and sender".into(),
                    )
                })?;
            let sender_raw = non_empty(body.sender).ok_or_else(|| {
                TurnstileError::InvalidRequest(
                    "Create requests need both transactionKindBytes and sender".into(),
                )
            })?;
            Ok(SponsorAction::Create {
                transaction_kind_bytes,
                sender: sender_raw.parse()?,
                network: body.network,
            })
        }
        (false, true) => {
            let digest = non_empty(body.digest).ok_or_else(|| {
                TurnstileError::InvalidRequest(
                    "Execute requests need both digest and signature".into(),
                )
            })?;
            let signature = non_empty(body.signature).ok_or_else(|| {
                TurnstileError::InvalidRequest(
                    "Execute requests need both digest and signature".into(),
                )
            })?;
            Ok(SponsorAction::Execute { digest, signature })
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// =============================================================================
// Handler
// =============================================================================

/// Handle POST /sponsor for both protocol phases.
pub async fn handle_sponsor_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let body: SponsorRequestBody = match parse_json_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    let action = match classify(body) {
        Ok(action) => action,
        Err(e) => return error_response(&e),
    };

    match action {
        SponsorAction::Create {
            transaction_kind_bytes,
            sender,
            network,
        } => {
            match state
                .coordinator
                .create(&transaction_kind_bytes, sender, network.as_deref())
                .await
            {
                Ok(sponsored) => {
                    json_response(StatusCode::OK, &CreateResponseBody::from(sponsored))
                }
                Err(e) => error_response(&e),
            }
        }
        SponsorAction::Execute { digest, signature } => {
            // The relay receipt passes through untouched so callers see
            // exactly what the ledger reported
            match state.coordinator.execute(&digest, &signature).await {
                Ok(receipt) => json_response(StatusCode::OK, &receipt),
                Err(e) => error_response(&e),
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn parse_json_body<T: for<'de> Deserialize<'de>>(req: Request<Incoming>) -> Result<T> {
    let body = req
        .collect()
        .await
        .map_err(|e| TurnstileError::InvalidRequest(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > MAX_BODY_BYTES {
        return Err(TurnstileError::InvalidRequest(
            "Request body too large".into(),
        ));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| TurnstileError::InvalidRequest(format!("Invalid JSON: {}", e)))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"message":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-cache")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(r#"{"message":"Internal error"}"#)))
                .unwrap()
        })
}

/// Build uniform error response: { message, code, retryable }
pub fn error_response(err: &TurnstileError) -> Response<Full<Bytes>> {
    let (status, body) = err.to_status_code_and_body();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-cache")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(
                    r#"{"message":"Internal error","code":"internal","retryable":false}"#,
                )))
                .unwrap()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: &str = "0x7f3a9b2c4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f8";

    fn body_from(json: &str) -> SponsorRequestBody {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_classify_create() {
        let body = body_from(&format!(
            r#"{{"transactionKindBytes": "AAEC", "sender": "{SENDER}"}}"#
        ));
        match classify(body).unwrap() {
            SponsorAction::Create {
                transaction_kind_bytes,
                sender,
                network,
            } => {
                assert_eq!(transaction_kind_bytes, "AAEC");
                assert_eq!(sender.to_string(), SENDER);
                assert!(network.is_none());
            }
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_create_with_network() {
        let body = body_from(&format!(
            r#"{{"network": "testnet", "transactionKindBytes": "AAEC", "sender": "{SENDER}"}}"#
        ));
        match classify(body).unwrap() {
            SponsorAction::Create { network, .. } => {
                assert_eq!(network.as_deref(), Some("testnet"));
            }
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_accepts_long_form_kind_field() {
        let body = body_from(&format!(
            r#"{{"transactionBlockKindBytes": "AAEC", "sender": "{SENDER}"}}"#
        ));
        assert!(matches!(
            classify(body).unwrap(),
            SponsorAction::Create { .. }
        ));
    }

    #[test]
    fn test_classify_execute() {
        let body = body_from(r#"{"digest": "9uKx", "signature": "AJ8z"}"#);
        match classify(body).unwrap() {
            SponsorAction::Execute { digest, signature } => {
                assert_eq!(digest, "9uKx");
                assert_eq!(signature, "AJ8z");
            }
            other => panic!("expected execute, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_mixed_phases() {
        let body = body_from(&format!(
            r#"{{"transactionKindBytes": "AAEC", "sender": "{SENDER}", "digest": "9uKx", "signature": "AJ8z"}}"#
        ));
        let err = classify(body).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidRequest(_)));
        assert!(err.to_string().contains("mixes"));
    }

    #[test]
    fn test_classify_rejects_partial_overlap_as_mixed() {
        // A sender plus a digest is neither phase and must not be guessed at
        let body = body_from(&format!(r#"{{"sender": "{SENDER}", "digest": "9uKx"}}"#));
        assert!(classify(body).is_err());
    }

    #[test]
    fn test_classify_rejects_empty_body() {
        let body = body_from(r#"{}"#);
        let err = classify(body).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidRequest(_)));
    }

    #[test]
    fn test_classify_network_alone_is_not_a_phase() {
        let body = body_from(r#"{"network": "testnet"}"#);
        assert!(classify(body).is_err());
    }

    #[test]
    fn test_classify_rejects_create_missing_sender() {
        let body = body_from(r#"{"transactionKindBytes": "AAEC"}"#);
        let err = classify(body).unwrap_err();
        assert!(err.to_string().contains("transactionKindBytes and sender"));
    }

    #[test]
    fn test_classify_rejects_empty_strings() {
        let body = body_from(&format!(
            r#"{{"transactionKindBytes": "", "sender": "{SENDER}"}}"#
        ));
        assert!(classify(body).is_err());

        let body = body_from(r#"{"digest": "9uKx", "signature": "  "}"#);
        assert!(classify(body).is_err());
    }

    #[test]
    fn test_classify_rejects_malformed_sender() {
        let body = body_from(r#"{"transactionKindBytes": "AAEC", "sender": "not-an-address"}"#);
        let err = classify(body).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidRequest(_)));
    }

    #[test]
    fn test_create_response_uses_camel_case_keys() {
        let sponsored = SponsoredTransaction {
            transaction_bytes_b64: "AAEC".to_string(),
            digest: "9uKx".to_string(),
            sender: SENDER.parse().unwrap(),
            sponsor_address: SENDER.parse().unwrap(),
            sponsor_signature: "AJ8z".to_string(),
            fee_payment: vec![],
        };
        let json = serde_json::to_value(CreateResponseBody::from(sponsored)).unwrap();
        assert!(json.get("sponsorSignature").is_some());
        assert!(json.get("sponsorAddress").is_some());
        assert!(json.get("bytes").is_some());
        assert!(json.get("digest").is_some());
        assert!(json.get("fee_payment").is_none());
    }

    #[test]
    fn test_error_body_shape() {
        let response = error_response(&TurnstileError::InvalidRequest("bad shape".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = error_response(&TurnstileError::Ledger("connect refused".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_body_fields() {
        let response = error_response(&TurnstileError::Ledger("connect refused".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "ledger");
        assert_eq!(body["retryable"], true);
        assert!(body["message"].as_str().unwrap().contains("connect refused"));
    }
}
