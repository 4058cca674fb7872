//! Turnstile - sponsored-transaction gateway for keyless ledger accounts
//!
//! Turnstile lets people who signed in with an OAuth provider act on a
//! ledger without holding tokens or managing keys. A login-derived keyless
//! address signs with an ephemeral key attested by a zero-knowledge proof,
//! and a sponsor account pays the fees for an allow-listed set of
//! contract calls.
//!
//! ## Services
//!
//! - **Login**: ephemeral-key login flow deriving stable keyless addresses
//!   from OAuth identity tokens
//! - **Prover**: zero-knowledge proof requests with a local address-seed
//!   cross-check
//! - **Sponsor**: two-phase create/execute protocol paying fees for
//!   allow-listed contract calls
//! - **Gateway**: HTTP surface exposing the sponsorship protocol and
//!   health probes

pub mod config;
pub mod identity;
pub mod keys;
pub mod ledger;
pub mod login;
pub mod prover;
pub mod routes;
pub mod server;
pub mod session;
pub mod sponsor;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, TurnstileError};
