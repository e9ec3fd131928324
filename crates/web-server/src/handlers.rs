use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use database::{SortOrder, Table};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use crate::{error::AppError, AppState};

type HmacSha256 = Hmac<Sha256>;

/// `GET /health` (§6): `200 {status:healthy,...}` when both the database
/// and the control surface answer within their timeouts, `503` otherwise
/// with each dependency's error folded into its own string.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let db_result = state.market_store.count(Table::OhlcvBars).await;
    let cache_result = state.control_surface.ping().await;

    let database = match &db_result {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("error: {e}"),
    };
    let cache = match &cache_result {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {e}"),
    };

    let healthy = db_result.is_ok() && cache_result.is_ok();
    let status = if healthy { "healthy" } else { "unhealthy" };
    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (code, Json(json!({ "status": status, "database": database, "cache": cache }))).into_response()
}

/// `GET /api/status` (§6): row counts plus cache reachability, the same
/// numbers the `/status` chat command reports (§4.9).
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let ohlcv_bars = state.market_store.count(Table::OhlcvBars).await.unwrap_or(-1);
    let chain_metrics = state.market_store.count(Table::ChainMetrics).await.unwrap_or(-1);
    let exchange_netflows = state.market_store.count(Table::ExchangeNetflows).await.unwrap_or(-1);
    let cache_connected = state.control_surface.ping().await.is_ok();

    Json(json!({
        "status": "running",
        "database": {
            "ohlcv_records": ohlcv_bars,
            "chain_metrics": chain_metrics,
            "netflow_records": exchange_netflows,
        },
        "cache": { "connected": cache_connected },
    }))
}

#[derive(Debug, Deserialize)]
pub struct MarketParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default = "default_timeframe")]
    timeframe: String,
}
fn default_limit() -> i64 {
    100
}
fn default_timeframe() -> String {
    "1m".to_string()
}

#[derive(Debug, Serialize)]
pub struct MarketResponse {
    symbol: String,
    timeframe: String,
    count: usize,
    data: Vec<database::OhlcvRow>,
}

/// `GET /api/market/<symbol>?limit=&timeframe=` (§6): latest bars
/// descending, straight off `MarketStore::query_bars`.
pub async fn market(
    Path(symbol): Path<String>,
    Query(params): Query<MarketParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<MarketResponse>, AppError> {
    let rows = state
        .market_store
        .query_bars(&symbol, &params.timeframe, SortOrder::Descending, params.limit)
        .await?;

    Ok(Json(MarketResponse {
        symbol,
        timeframe: params.timeframe,
        count: rows.len(),
        data: rows,
    }))
}

/// The operator-platform webhook body (§6): a batch of events, each
/// optionally carrying a text message. Unrecognized fields are ignored —
/// only `events[].message.text` feeds the command router.
#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    message: Option<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    text: Option<String>,
}

/// `POST /api/webhook` (§4.9, §6). Verifies `X-Line-Signature` — a
/// base64-encoded HMAC-SHA256 of the raw body under the configured
/// secret — before touching the body's contents; a bad signature is a
/// `400` with no body, never a parse attempt. Each event with a text
/// message is handed to the `CommandRouter` in order; the reply is
/// pushed back through the notifier, best-effort.
pub async fn webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get("X-Line-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !verify_signature(&state.webhook_secret, &body, signature) {
        tracing::warn!("webhook signature verification failed");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let parsed: WebhookBody = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to parse webhook body");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "status": "error", "message": e.to_string() })))
                .into_response();
        }
    };

    for event in parsed.events {
        let Some(text) = event.message.and_then(|m| m.text) else {
            continue;
        };
        let reply = state.command_router.handle(&text).await;
        if let Some(notifier) = &state.notifier {
            if let Err(e) = notifier.send(alerter::NotifierMessage::Text(&reply)).await {
                tracing::warn!(error = ?e, "failed to push webhook command reply");
            }
        }
    }

    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

/// Constant-time HMAC-SHA256 verification over the raw body bytes. The
/// header carries the tag base64-encoded; a malformed header (not valid
/// base64, wrong length) is simply a verification failure, not a panic.
fn verify_signature(secret: &str, body: &[u8], header_signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(header_signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
