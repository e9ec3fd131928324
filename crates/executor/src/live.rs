//! The live venue: a thin adapter from [`api_client::ApiClient`] to
//! [`ExchangeGateway`] (§4.1). Holds no state of its own — every call is a
//! pass-through to the exchange, with venue errors folded into
//! `ExecutorError::VenueError`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Kline, OrderRequest, OrderSide, OrderType, Position};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ExecutorError;
use crate::gateway::{Balance, ExchangeGateway, OrderRecord, OrderStatus, Ticker};

pub struct LiveGateway {
    client: Arc<dyn api_client::ApiClient>,
}

impl LiveGateway {
    pub fn new(client: Arc<dyn api_client::ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExchangeGateway for LiveGateway {
    async fn fetch_balance(&self) -> Result<HashMap<String, Balance>, ExecutorError> {
        let balances = self
            .client
            .get_account_balance()
            .await
            .map_err(|e| ExecutorError::VenueError(e.to_string()))?;

        Ok(balances
            .into_iter()
            .map(|b| {
                (
                    b.asset,
                    Balance {
                        free: b.free,
                        used: b.locked,
                        total: b.free + b.locked,
                    },
                )
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExecutorError> {
        let t = self
            .client
            .fetch_ticker(symbol)
            .await
            .map_err(|e| ExecutorError::VenueError(e.to_string()))?;
        Ok(Ticker {
            last: (t.bid_price + t.ask_price) / Decimal::TWO,
            bid: t.bid_price,
            ask: t.ask_price,
        })
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        _since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Kline>, ExecutorError> {
        self.client
            .fetch_klines(symbol, timeframe, limit.min(u16::MAX as u32) as u16)
            .await
            .map_err(|e| ExecutorError::VenueError(e.to_string()))
    }

    async fn create_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Result<OrderRecord, ExecutorError> {
        let request = OrderRequest {
            client_order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity: amount,
            price,
        };

        let response = self
            .client
            .place_order(&request)
            .await
            .map_err(|e| ExecutorError::VenueError(e.to_string()))?;

        let status = match response.status.as_str() {
            "FILLED" => OrderStatus::Closed,
            "NEW" | "PARTIALLY_FILLED" => OrderStatus::Open,
            _ => OrderStatus::Rejected,
        };

        let execution_price = if response.executed_qty > Decimal::ZERO {
            response.cummulative_quote_qty / response.executed_qty
        } else {
            response.price
        };

        Ok(OrderRecord {
            order_id: response.order_id.to_string(),
            symbol: response.symbol,
            side: response.side,
            amount: response.executed_qty,
            price: execution_price,
            status,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    /// Spot markets carry no native position concept; callers derive
    /// positions from non-quote balances instead (§4.1, §9).
    async fn fetch_positions(&self) -> Result<Option<Vec<Position>>, ExecutorError> {
        Ok(None)
    }
}
