//! HTTP routes for Turnstile

pub mod health;
pub mod sponsor;

pub use health::{health_check, readiness_check, version_info};
pub use sponsor::handle_sponsor_request;
