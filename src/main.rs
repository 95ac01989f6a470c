//! Tollgate -- metering reverse proxy for the Anthropic Messages API.
//!
//! This is the application entry point. It wires together all modules:
//!   - Configuration from the environment
//!   - Tracing/logging setup
//!   - Billing integration (balance cache + usage reporter)
//!   - Background tasks (cache janitor, retry scanner)
//!   - HTTP server with graceful shutdown on SIGTERM / SIGINT

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tollgate::api;
use tollgate::auth::TokenVerifier;
use tollgate::billing::{
    BalanceCache, BillingClient, UsageReporter, JANITOR_INTERVAL, RETRY_SCAN_INTERVAL,
};
use tollgate::config::Config;
use tollgate::pricing::PricingTable;
use tollgate::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration; missing required variables abort startup.
    let config = Config::from_env().context("invalid configuration")?;

    // 2. Initialize tracing/logging.
    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.anthropic_api_url,
        billing = %config.domestic_api_url,
        "Starting tollgate"
    );

    // 3. Shared HTTP client (billing and upstream egress).
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    // 4. Billing integration.
    let billing = BillingClient::new(http.clone(), config.domestic_api_url.clone());
    let balance = Arc::new(BalanceCache::new(billing.clone(), config.balance_gate));
    let reporter = Arc::new(UsageReporter::new(billing, Arc::clone(&balance)));

    // 5. Background tasks: cache janitor + retry scanner.
    let _janitor = Arc::clone(&balance).spawn_janitor(JANITOR_INTERVAL);
    let _scanner = Arc::clone(&reporter).spawn_scanner(RETRY_SCAN_INTERVAL);
    tracing::debug!("Background tasks spawned");

    // 6. Build shared application state.
    let state = AppState {
        verifier: Arc::new(TokenVerifier::new(&config.jwt_secret)),
        pricing: Arc::new(PricingTable::new()),
        balance,
        reporter,
        http,
        config: Arc::new(config),
    };

    // 7. Bind and serve with graceful shutdown.
    let listen_addr = state.config.listen_addr();
    let app = build_app(state);
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

/// Build the application router with the global middleware stack.
fn build_app(state: AppState) -> Router {
    api::build_api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Set up the tracing subscriber. RUST_LOG takes precedence over the
/// built-in default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tollgate=info,tower_http=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
