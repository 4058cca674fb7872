//! Turnstile - sponsorship gateway for keyless ledger accounts

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use turnstile::{config::Args, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // RUST_LOG wins over --log-level when both are set
    let default_filter = format!("turnstile={},info", args.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {e}");
        std::process::exit(1);
    }

    banner(&args);

    let state = match server::AppState::new(args) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run(state).await {
        error!("Server error: {e:?}");
        std::process::exit(1);
    }

    Ok(())
}

fn banner(args: &Args) {
    let key_state = if args.sponsor_key.is_some() {
        "configured"
    } else {
        "NOT CONFIGURED"
    };

    info!("======================================");
    info!("  Turnstile - Sponsorship Gateway");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Network: {}", args.network);
    info!("Ledger RPC: {}", args.ledger_rpc_url);
    info!("Sponsor key: {}", key_state);
    info!(
        "Allowed call targets: {}",
        args.allowed_call_target_list().len()
    );
    info!("Fee budget: {}", args.fee_budget);
    info!("Envelope TTL: {}s", args.envelope_ttl_secs);
    info!("======================================");
}
