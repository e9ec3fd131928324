//! The HTTP surface named in §6: a webhook that carries operator commands,
//! a health probe, a status summary, and a read-only market-data endpoint.
//! Per §9's "cyclic loading" note, this crate only *binds* the
//! [`alerter::CommandRouter`] — it never depends on anything the router
//! itself doesn't already need, so construction order stays leaves-first
//! in the binary's `main`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use control_surface::ControlSurface;
use database::MarketStore;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod error;
pub mod handlers;

pub use error::AppError;

/// Shared state every handler can reach. Built once at startup by the
/// binary's bootstrap builder and wrapped in `Arc` so cloning the state
/// per-request is cheap.
pub struct AppState {
    pub market_store: Arc<MarketStore>,
    pub control_surface: Arc<ControlSurface>,
    pub command_router: Arc<alerter::CommandRouter>,
    pub notifier: Option<Arc<alerter::TelegramNotifier>>,
    /// Shared secret the operator platform signs webhook bodies with
    /// (§4.9, §6). Compared against `X-Line-Signature` in constant time.
    pub webhook_secret: String,
}

/// Assembles the router described in §6. Kept separate from [`serve`] so
/// tests can exercise routes against an in-memory `AppState` without
/// binding a socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/webhook", post(handlers::webhook))
        .route("/api/status", get(handlers::status))
        .route("/api/market/:symbol", get(handlers::market))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Binds and serves the router. Errors here are startup failures — the
/// binary's `main` turns them into exit code `1` (§6).
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);
    tracing::info!(%addr, "web server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
