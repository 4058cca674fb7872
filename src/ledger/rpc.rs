//! JSON-RPC ledger client.
//!
//! Speaks plain JSON-RPC 2.0 over HTTP. Transport failures map to
//! [`TurnstileError::Ledger`] or [`TurnstileError::Timeout`]; an error
//! returned by the relay for an execution maps to
//! [`TurnstileError::Execution`] so callers can tell "the network is
//! down" apart from "the network said no".

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Address, LedgerClient, ResourceRef};
use crate::types::{Result, TurnstileError};

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcLedgerConfig {
    /// Ledger RPC endpoint
    pub url: String,
    /// Timeout for RPC requests (default: 30 seconds)
    pub request_timeout: Duration,
}

impl Default for RpcLedgerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9000".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Ledger client backed by a JSON-RPC endpoint.
pub struct RpcLedgerClient {
    config: RpcLedgerConfig,
    http_client: reqwest::Client,
}

impl RpcLedgerClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(RpcLedgerConfig {
            url: url.into(),
            ..Default::default()
        })
    }

    pub fn with_config(config: RpcLedgerConfig) -> Self {
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

    /// Issue one RPC call. The outer error covers transport problems, the
    /// inner one an error object returned by the node.
    async fn call(&self, method: &str, params: Value) -> Result<std::result::Result<Value, String>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        debug!(method, url = %self.config.url, "ledger rpc call");

        let response = self
            .http_client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TurnstileError::Timeout(format!("Ledger RPC timed out: {e}"))
                } else {
                    TurnstileError::Ledger(format!("Ledger RPC unreachable: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TurnstileError::Ledger(format!(
                "Ledger RPC returned status {status}"
            )));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| TurnstileError::Ledger(format!("Malformed RPC envelope: {e}")))?;

        match (envelope.result, envelope.error) {
            (_, Some(err)) => Ok(Err(format!("{} (code {})", err.message, err.code))),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => Err(TurnstileError::Ledger(
                "RPC envelope carried neither result nor error".into(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn latest_epoch(&self) -> Result<u64> {
        let result = self
            .call("ledger_getSystemState", json!([]))
            .await?
            .map_err(TurnstileError::Ledger)?;
        epoch_from_value(&result)
    }

    async fn owned_fee_resources(&self, owner: &Address, limit: usize) -> Result<Vec<ResourceRef>> {
        let result = self
            .call(
                "ledger_getOwnedResources",
                json!([owner.to_string(), limit]),
            )
            .await?
            .map_err(TurnstileError::Ledger)?;
        resources_from_value(result)
    }

    async fn execute_transaction(
        &self,
        transaction_b64: &str,
        signatures: &[String],
    ) -> Result<Value> {
        self.call(
            "ledger_executeTransaction",
            json!([transaction_b64, signatures]),
        )
        .await?
        .map_err(|message| TurnstileError::Execution(format!("Relay rejected: {message}")))
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    message: String,
}

/// Pull the epoch out of a system-state result. Nodes report it as a
/// number or a decimal string depending on version.
fn epoch_from_value(value: &Value) -> Result<u64> {
    let epoch = value.get("epoch").ok_or_else(|| {
        TurnstileError::Ledger("System state response has no epoch field".into())
    })?;

    if let Some(number) = epoch.as_u64() {
        return Ok(number);
    }
    if let Some(text) = epoch.as_str() {
        return text
            .parse()
            .map_err(|e| TurnstileError::Ledger(format!("Unparseable epoch {text:?}: {e}")));
    }
    Err(TurnstileError::Ledger(format!(
        "Unexpected epoch value: {epoch}"
    )))
}

/// Resource listings arrive either bare or wrapped in a data page.
fn resources_from_value(value: Value) -> Result<Vec<ResourceRef>> {
    let listing = match value {
        Value::Object(mut map) => map
            .remove("data")
            .ok_or_else(|| TurnstileError::Ledger("Resource response has no data field".into()))?,
        other => other,
    };
    serde_json::from_value(listing)
        .map_err(|e| TurnstileError::Ledger(format!("Malformed resource listing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_accepts_number_and_string() {
        assert_eq!(epoch_from_value(&json!({"epoch": 42})).unwrap(), 42);
        assert_eq!(epoch_from_value(&json!({"epoch": "42"})).unwrap(), 42);
    }

    #[test]
    fn test_epoch_rejects_other_shapes() {
        assert!(epoch_from_value(&json!({})).is_err());
        assert!(epoch_from_value(&json!({"epoch": true})).is_err());
        assert!(epoch_from_value(&json!({"epoch": "soon"})).is_err());
    }

    #[test]
    fn test_resources_accept_bare_and_paged_listings() {
        let entry = json!({"id": "0xf00d", "version": 3, "digest": "9WzSXdp"});

        let bare = resources_from_value(json!([entry])).unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].id, "0xf00d");
        assert_eq!(bare[0].version, 3);

        let paged = resources_from_value(json!({"data": [entry]})).unwrap();
        assert_eq!(paged, bare);
    }

    #[test]
    fn test_resources_reject_malformed_listings() {
        assert!(resources_from_value(json!({"items": []})).is_err());
        assert!(resources_from_value(json!([{"id": 5}])).is_err());
    }

    #[test]
    fn test_rpc_envelope_shapes() {
        let ok: RpcEnvelope = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":7}"#).unwrap();
        assert_eq!(ok.result, Some(json!(7)));
        assert!(ok.error.is_none());

        let err: RpcEnvelope = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"no gas"}}"#,
        )
        .unwrap();
        let err = err.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "no gas");
    }
}
