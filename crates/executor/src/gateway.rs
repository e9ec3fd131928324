//! The uniform capability over live and simulated venues (§4.1). Both
//! [`crate::simulated::SimulatedGateway`] and [`crate::live::LiveGateway`]
//! implement [`ExchangeGateway`]; callers above this layer (TradeExecutor,
//! BacktestEngine) never know which one they hold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Kline, OrderSide, OrderType, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ExecutorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Closed,
    Open,
    Rejected,
}

/// The gateway's uniform order receipt (§4.1 step 7). Also the persisted
/// shape of one entry in the simulated venue's `order_history` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub timestamp_ms: i64,
}

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn fetch_balance(&self) -> Result<HashMap<String, Balance>, ExecutorError>;

    /// Simulated variant always consults a live price source — simulation
    /// covers only the ledger, never prices (§4.1).
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExecutorError>;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Kline>, ExecutorError>;

    /// For `type=limit` with a price, execution price is that price; for
    /// market or a missing price, a buy uses `ask` and a sell uses `bid`
    /// (§4.1). The simulated implementation performs its six steps as a
    /// single atomic critical section.
    async fn create_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Result<OrderRecord, ExecutorError>;

    /// `Ok(None)` when the venue has no native position capability — the
    /// caller then derives positions from non-quote balances with unknown
    /// entry price (§4.1, §9 "entry-price sourcing").
    async fn fetch_positions(&self) -> Result<Option<Vec<Position>>, ExecutorError>;
}
