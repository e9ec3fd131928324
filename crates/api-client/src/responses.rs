use core_types::OrderSide;
use rust_decimal::Decimal;
use serde::Deserialize;

// Using `#[serde(rename_all = "camelCase")]` to automatically map from JSON camelCase to Rust snake_case.

/// The response from a successful `POST /api/v3/order` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub client_order_id: String,
    pub order_id: i64,
    pub executed_qty: Decimal,
    #[serde(default)]
    pub cummulative_quote_qty: Decimal,
    pub orig_qty: Decimal,
    #[serde(default)]
    pub price: Decimal,
    pub side: OrderSide,
    pub status: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
}

/// A single asset's balance from `GET /api/v3/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<BalanceResponse>,
}

/// A best bid/ask snapshot from `GET /api/v3/ticker/bookTicker`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerResponse {
    pub symbol: String,
    #[serde(rename = "bidPrice")]
    pub bid_price: Decimal,
    #[serde(rename = "askPrice")]
    pub ask_price: Decimal,
}

/// Represents an error response from the Binance API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}
