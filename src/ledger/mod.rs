//! Ledger-facing types and client.
//!
//! The coordinator only needs three things from the chain: the current
//! epoch, the sponsor's spendable fee resources, and a way to relay a
//! fully signed transaction. Those live behind [`LedgerClient`] so tests
//! can drive the sponsorship flow against a scripted ledger.

pub mod rpc;
pub mod transaction;

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use rpc::{RpcLedgerClient, RpcLedgerConfig};

use crate::keys::ED25519_FLAG;
use crate::types::{Result, TurnstileError};

// =============================================================================
// Address
// =============================================================================

/// 32-byte account address, rendered as 0x-prefixed lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 32]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Address of a plain Ed25519 account: tagged SHA-256 of the scheme
    /// flag and the public key.
    pub fn from_ed25519(public: &VerifyingKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([ED25519_FLAG]);
        hasher.update(public.to_bytes());
        Self(hasher.finalize().into())
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::str::FromStr for Address {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self> {
        let hex_part = s.strip_prefix("0x").unwrap_or(s);
        let decoded = hex::decode(hex_part)
            .map_err(|e| TurnstileError::InvalidRequest(format!("Invalid address hex: {e}")))?;
        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            TurnstileError::InvalidRequest(format!(
                "Address must be 32 bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = TurnstileError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({self})")
    }
}

// =============================================================================
// Fee Resources
// =============================================================================

/// Reference to a spendable on-chain resource the sponsor can attach as
/// fee payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    pub version: u64,
    pub digest: String,
}

// =============================================================================
// Client Trait
// =============================================================================

/// The slice of ledger behavior the gateway depends on.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current epoch number of the network.
    async fn latest_epoch(&self) -> Result<u64>;

    /// Spendable fee resources owned by `owner`, newest first, capped at
    /// `limit` entries.
    async fn owned_fee_resources(&self, owner: &Address, limit: usize) -> Result<Vec<ResourceRef>>;

    /// Relay a fully signed transaction. The receipt is passed through
    /// verbatim.
    async fn execute_transaction(
        &self,
        transaction_b64: &str,
        signatures: &[String],
    ) -> Result<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_address_parse_and_display() {
        let hex64 = "ab".repeat(32);
        let with_prefix: Address = format!("0x{hex64}").parse().unwrap();
        let without_prefix: Address = hex64.parse().unwrap();

        assert_eq!(with_prefix, without_prefix);
        assert_eq!(with_prefix.to_string(), format!("0x{hex64}"));
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("zz".repeat(32).parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_serde_uses_hex_string() {
        let address: Address = format!("0x{}", "cd".repeat(32)).parse().unwrap();
        let encoded = serde_json::to_string(&address).unwrap();
        assert_eq!(encoded, format!("\"0x{}\"", "cd".repeat(32)));

        let decoded: Address = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, address);
    }

    #[test]
    fn test_ed25519_address_is_stable() {
        let key = SigningKey::generate(&mut OsRng);
        let a = Address::from_ed25519(&key.verifying_key());
        let b = Address::from_ed25519(&key.verifying_key());
        assert_eq!(a, b);

        let other = SigningKey::generate(&mut OsRng);
        assert_ne!(a, Address::from_ed25519(&other.verifying_key()));
    }
}
