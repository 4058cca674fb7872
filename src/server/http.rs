//! HTTP front door.
//!
//! One hyper http1 listener serves the whole surface: liveness and
//! readiness probes, build info, and the POST /sponsor endpoint that
//! carries both phases of the sponsorship handshake.

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::ledger::{RpcLedgerClient, RpcLedgerConfig};
use crate::routes;
use crate::sponsor::{spawn_expiry_task, SponsorConfig, SponsorshipCoordinator};
use crate::types::TurnstileError;

/// How often expired sponsorship envelopes are swept out
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// State every request handler can reach.
pub struct AppState {
    pub args: Args,
    /// Holds pending envelopes and fee reservations
    pub coordinator: Arc<SponsorshipCoordinator>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Build application state from parsed arguments.
    ///
    /// The ledger client is constructed here so every subsystem shares
    /// one HTTP connection pool.
    pub fn new(args: Args) -> Result<Self, TurnstileError> {
        let ledger = Arc::new(RpcLedgerClient::with_config(RpcLedgerConfig {
            url: args.ledger_rpc_url.clone(),
            request_timeout: Duration::from_millis(args.request_timeout_ms),
        }));

        let coordinator = Arc::new(SponsorshipCoordinator::new(
            SponsorConfig {
                key_material: args.sponsor_key.clone(),
                allowed_call_targets: args.allowed_call_target_list(),
                network: args.network.clone(),
                fee_budget: args.fee_budget,
                max_fee_resources: args.max_fee_resources,
                envelope_ttl: Duration::from_secs(args.envelope_ttl_secs),
            },
            ledger,
        ));

        Ok(Self {
            args,
            coordinator,
            started_at: Instant::now(),
        })
    }
}

/// Run the HTTP server until the process is stopped.
pub async fn run(state: Arc<AppState>) -> Result<(), TurnstileError> {
    let listener = TcpListener::bind(state.args.listen).await.map_err(|e| {
        TurnstileError::Config(format!("Failed to bind {}: {}", state.args.listen, e))
    })?;

    info!(
        "Turnstile listening on {} (network: {})",
        state.args.listen, state.args.network
    );

    if !state.coordinator.is_configured() {
        warn!("No usable sponsor key configured - sponsorship requests will fail");
    }

    spawn_expiry_task(Arc::clone(&state.coordinator), EXPIRY_SWEEP_INTERVAL);
    info!(
        "Envelope expiry sweep enabled (ttl: {}s, sweep every {}s)",
        state.args.envelope_ttl_secs,
        EXPIRY_SWEEP_INTERVAL.as_secs()
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state))
        }

        (Method::GET, "/version") => routes::version_info(),

        // Both phases of the handshake arrive here
        (Method::POST, "/sponsor") => {
            routes::handle_sponsor_request(Arc::clone(&state), req).await
        }

        (Method::OPTIONS, _) => preflight_response(),

        // /sponsor speaks POST only
        (_, "/sponsor") => method_not_allowed_response(),

        _ => not_found_response(&path),
    };

    Ok(response)
}

/// Browsers probe with OPTIONS before posting JSON cross-origin.
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "message": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn method_not_allowed_response() -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "message": "Method not allowed",
    });

    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Allow", "POST, OPTIONS")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
