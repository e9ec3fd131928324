use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::{OrderSide, OrderType};

/// One OHLCV candle for a single symbol/interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
    pub interval: String,
}

/// A request to place an order, prior to gateway submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

/// A transient trade signal emitted by the scan job and consumed by the
/// executor. `features` carries the named inputs for the ML filter, when
/// present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Signal {
    pub symbol: String,
    pub side: OrderSide,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub features: Option<HashMap<String, f64>>,
}

impl Default for OrderSide {
    fn default() -> Self {
        OrderSide::Buy
    }
}

/// An open position, either held in the backtest portfolio or read back
/// from a live venue (in which case `entry_price` may be unknown).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_updated: DateTime<Utc>,
}
