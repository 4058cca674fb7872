//! Gateway configuration.
//!
//! Every knob is a clap argument with an environment fallback, so the
//! same binary runs from a shell, a systemd unit, or a container
//! without a config file.

use clap::Parser;
use std::net::SocketAddr;

use crate::keys::decode_sponsor_key;
use crate::ledger::transaction::is_well_formed_target;

/// Turnstile - sponsored-transaction gateway for keyless ledger accounts
#[derive(Parser, Debug, Clone)]
#[command(name = "turnstile")]
#[command(about = "Sponsored-transaction gateway for keyless ledger accounts")]
pub struct Args {
    /// Socket address the HTTP server binds
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Ledger network this gateway sponsors on
    /// Create requests naming a different network are rejected
    #[arg(long, env = "NETWORK", default_value = "testnet")]
    pub network: String,

    /// Ledger JSON-RPC endpoint
    #[arg(long, env = "LEDGER_RPC_URL", default_value = "http://127.0.0.1:9000")]
    pub ledger_rpc_url: String,

    /// Encoded sponsor secret key (ed25519:<base58> or base64)
    /// Without one the gateway starts but every sponsorship request fails
    #[arg(long, env = "SPONSOR_KEY")]
    pub sponsor_key: Option<String>,

    /// Comma-separated list of call targets the sponsor will pay for
    /// e.g. "0xabc::survey::submit_response,0xabc::survey::register"
    #[arg(long, env = "ALLOWED_CALL_TARGETS")]
    pub allowed_call_targets: Option<String>,

    /// Fee budget attached to every sponsored transaction
    #[arg(long, env = "FEE_BUDGET", default_value = "10000000")]
    pub fee_budget: u64,

    /// Most fee resources attached to one sponsored transaction
    #[arg(long, env = "MAX_FEE_RESOURCES", default_value = "8")]
    pub max_fee_resources: usize,

    /// Seconds a created envelope stays executable
    #[arg(long, env = "ENVELOPE_TTL_SECS", default_value = "300")]
    pub envelope_ttl_secs: u64,

    /// Request timeout in milliseconds for outbound ledger calls
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Allow-listed call targets, split out of the comma-separated form
    pub fn allowed_call_target_list(&self) -> Vec<String> {
        if let Some(ref targets) = self.allowed_call_targets {
            targets
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else {
            vec![]
        }
    }

    /// Check the configuration before the server starts.
    ///
    /// A present-but-undecodable sponsor key and malformed allow-list
    /// entries are operator mistakes and fail startup. An absent key is
    /// allowed so health probes stay reachable on misconfigured nodes.
    pub fn validate(&self) -> Result<(), String> {
        if self.network.trim().is_empty() {
            return Err("NETWORK must not be empty".to_string());
        }

        if let Some(ref key) = self.sponsor_key {
            if !key.trim().is_empty() {
                decode_sponsor_key(key)
                    .map_err(|e| format!("SPONSOR_KEY is not a usable ed25519 key: {}", e))?;
            }
        }

        for target in self.allowed_call_target_list() {
            if !is_well_formed_target(&target) {
                return Err(format!(
                    "ALLOWED_CALL_TARGETS entry '{}' is not a package::module::function target",
                    target
                ));
            }
        }

        if self.fee_budget == 0 {
            return Err("FEE_BUDGET must be greater than zero".to_string());
        }

        if self.max_fee_resources == 0 {
            return Err("MAX_FEE_RESOURCES must be at least 1".to_string());
        }

        if self.envelope_ttl_secs == 0 {
            return Err("ENVELOPE_TTL_SECS must be at least 1".to_string());
        }

        Ok(())
    }
}
