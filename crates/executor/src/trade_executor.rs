//! The integrating component (§4.7): gates every order through the kill
//! switch and the panic threshold, fans strategy signals out through the
//! optional ML filter, and monitors/closes open positions.

use std::sync::Arc;

use async_trait::async_trait;
use core_types::{OrderSide, OrderType, Signal};
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::ExecutorError;
use crate::gateway::ExchangeGateway;
use ml_filter::{Features, MLFilter, Recommendation};

/// A best-effort sink for operator-facing notifications fired by the
/// executor. Never returns an error — a failed alert must never fail the
/// trade it describes; implementers log their own delivery failures.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, event: ExecutorAlert);
}

#[derive(Debug, Clone)]
pub enum ExecutorAlert {
    StopLoss { symbol: String, entry: Decimal, current: Decimal },
    TakeProfit { symbol: String, entry: Decimal, current: Decimal },
    TradeFilled { symbol: String, side: OrderSide, amount: Decimal, price: Decimal },
}

#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Success {
        order_id: String,
        symbol: String,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
        timestamp_ms: i64,
    },
    Error {
        error: String,
        symbol: String,
        side: OrderSide,
    },
}

#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Placed(OrderOutcome),
    Filtered {
        symbol: String,
        probability: f64,
        recommendation: Recommendation,
    },
    Suspended,
}

#[derive(Debug, Clone)]
pub enum PositionAction {
    StopLoss { symbol: String, outcome: OrderOutcome },
    TakeProfit { symbol: String, outcome: OrderOutcome },
    Skipped { symbol: String },
    Held { symbol: String },
}

#[derive(Debug, Clone)]
pub struct CloseResult {
    pub symbol: String,
    pub outcome: OrderOutcome,
}

/// `current ≤ entry × (1 − stop_loss_pct)` (§4.7, §8 scenario 6).
pub fn should_stop_loss(entry: Decimal, current: Decimal, stop_loss_pct: Decimal) -> bool {
    current <= entry * (Decimal::ONE - stop_loss_pct)
}

/// `current ≥ entry × (1 + take_profit_min)` (§4.7, §8 scenario 6).
pub fn should_take_profit(entry: Decimal, current: Decimal, take_profit_min: Decimal) -> bool {
    current >= entry * (Decimal::ONE + take_profit_min)
}

#[derive(Debug, Clone)]
pub struct TradeExecutorConfig {
    pub max_position_size: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_min: Decimal,
    pub take_profit_max: Decimal,
    pub panic_threshold: Decimal,
    pub quote_asset: String,
}

pub struct TradeExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    control_surface: Arc<control_surface::ControlSurface>,
    ml_filter: Option<Arc<MLFilter>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    config: TradeExecutorConfig,
}

impl TradeExecutor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        control_surface: Arc<control_surface::ControlSurface>,
        ml_filter: Option<Arc<MLFilter>>,
        alert_sink: Option<Arc<dyn AlertSink>>,
        config: TradeExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            control_surface,
            ml_filter,
            alert_sink,
            config,
        }
    }

    async fn notify(&self, event: ExecutorAlert) {
        if let Some(sink) = &self.alert_sink {
            sink.alert(event).await;
        }
    }

    /// The entry point (§4.7). Gate sequence, in order, short-circuit on
    /// failure: kill switch, then (buys only) panic threshold, then
    /// dispatch through the gateway.
    pub async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
        panic_score: Option<Decimal>,
    ) -> Result<OrderOutcome, ExecutorError> {
        if !self.control_surface.is_trading_enabled().await {
            return Err(ExecutorError::TradingSuspended);
        }

        if side == OrderSide::Buy {
            if let Some(score) = panic_score {
                if score > self.config.panic_threshold {
                    return Err(ExecutorError::PanicTooHigh {
                        score,
                        threshold: self.config.panic_threshold,
                    });
                }
            }
        }

        match self
            .gateway
            .create_order(symbol, order_type, side, amount, price)
            .await
        {
            Ok(record) => {
                self.notify(ExecutorAlert::TradeFilled {
                    symbol: record.symbol.clone(),
                    side: record.side,
                    amount: record.amount,
                    price: record.price,
                })
                .await;
                Ok(OrderOutcome::Success {
                    order_id: record.order_id,
                    symbol: record.symbol,
                    side: record.side,
                    amount: record.amount,
                    price: record.price,
                    timestamp_ms: record.timestamp_ms,
                })
            }
            Err(e) => Ok(OrderOutcome::Error {
                error: e.to_string(),
                symbol: symbol.to_string(),
                side,
            }),
        }
    }

    /// Per scan-tick fan-out (§4.7). Re-checks the kill switch once at
    /// entry; if suspended, every signal is reported `Suspended` without
    /// individually hitting the gateway.
    pub async fn execute_strategy(
        &self,
        signals: &[Signal],
        panic_score: Option<Decimal>,
        use_ml_filter: bool,
        ml_threshold: f64,
    ) -> Vec<SignalOutcome> {
        if !self.control_surface.is_trading_enabled().await {
            return signals.iter().map(|_| SignalOutcome::Suspended).collect();
        }

        let mut outcomes = Vec::with_capacity(signals.len());
        for signal in signals {
            if use_ml_filter && signal.side == OrderSide::Buy {
                if let (Some(filter), Some(features)) = (&self.ml_filter, &signal.features) {
                    let decision = filter.decide(&Features::Named(features.clone()), Some(ml_threshold));
                    if decision.probability < ml_threshold {
                        outcomes.push(SignalOutcome::Filtered {
                            symbol: signal.symbol.clone(),
                            probability: decision.probability,
                            recommendation: decision.recommendation,
                        });
                        continue;
                    }
                }
            }

            let order_type = if signal.price.is_some() { OrderType::Limit } else { OrderType::Market };
            let outcome = self
                .place_order(&signal.symbol, signal.side, signal.amount, signal.price, order_type, panic_score)
                .await;

            match outcome {
                Ok(o) => outcomes.push(SignalOutcome::Placed(o)),
                Err(ExecutorError::TradingSuspended) => outcomes.push(SignalOutcome::Suspended),
                Err(e) => outcomes.push(SignalOutcome::Placed(OrderOutcome::Error {
                    error: e.to_string(),
                    symbol: signal.symbol.clone(),
                    side: signal.side,
                })),
            }
        }
        outcomes
    }

    /// Derives positions from the gateway's native capability if present,
    /// else from non-quote balances with an unknown entry price (§4.1, §9).
    async fn resolve_positions(&self) -> Result<Vec<(String, Decimal, Option<Decimal>)>, ExecutorError> {
        if let Some(positions) = self.gateway.fetch_positions().await? {
            return Ok(positions
                .into_iter()
                .map(|p| (p.symbol, p.quantity, Some(p.entry_price)))
                .collect());
        }

        let balances = self.gateway.fetch_balance().await?;
        Ok(balances
            .into_iter()
            .filter(|(asset, _)| asset != &self.config.quote_asset)
            .filter(|(_, balance)| balance.total > Decimal::ZERO)
            .map(|(asset, balance)| (format!("{asset}/{}", self.config.quote_asset), balance.total, None))
            .collect())
    }

    async fn close_for_monitor(&self, symbol: &str, amount: Decimal) -> OrderOutcome {
        match self
            .place_order(symbol, OrderSide::Sell, amount, None, OrderType::Market, None)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => OrderOutcome::Error {
                error: e.to_string(),
                symbol: symbol.to_string(),
                side: OrderSide::Sell,
            },
        }
    }

    /// Compares each open position's current price against its stop-loss
    /// and take-profit levels and closes on trigger (§4.7). Sells here go
    /// through the normal gate sequence, so a tripped kill switch still
    /// blocks them.
    pub async fn monitor_positions(&self) -> Result<Vec<PositionAction>, ExecutorError> {
        let positions = self.resolve_positions().await?;
        let mut actions = Vec::with_capacity(positions.len());

        for (symbol, amount, entry_price) in positions {
            let Some(entry) = entry_price else {
                warn!(symbol = %symbol, "position has no known entry price; skipping stop-loss/take-profit evaluation");
                actions.push(PositionAction::Skipped { symbol });
                continue;
            };

            let ticker = self.gateway.fetch_ticker(&symbol).await?;
            let current = ticker.last;

            if should_stop_loss(entry, current, self.config.stop_loss_pct) {
                self.notify(ExecutorAlert::StopLoss { symbol: symbol.clone(), entry, current }).await;
                let outcome = self.close_for_monitor(&symbol, amount).await;
                actions.push(PositionAction::StopLoss { symbol, outcome });
            } else if should_take_profit(entry, current, self.config.take_profit_min) {
                self.notify(ExecutorAlert::TakeProfit { symbol: symbol.clone(), entry, current }).await;
                let outcome = self.close_for_monitor(&symbol, amount).await;
                actions.push(PositionAction::TakeProfit { symbol, outcome });
            } else {
                actions.push(PositionAction::Held { symbol });
            }
        }

        Ok(actions)
    }

    /// Market-sells every non-quote balance, bypassing the kill switch —
    /// `/panic` disables trading first and must still be able to liquidate
    /// (§4.7, §6). Never raises; individual failures become per-position
    /// error records, and the call is idempotent when there are no
    /// positions.
    pub async fn close_all_positions(&self) -> Vec<CloseResult> {
        let positions = match self.resolve_positions().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "close_all_positions: failed to resolve open positions");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(positions.len());
        for (symbol, amount, _) in positions {
            if amount <= Decimal::ZERO {
                continue;
            }
            let outcome = match self
                .gateway
                .create_order(&symbol, OrderType::Market, OrderSide::Sell, amount, None)
                .await
            {
                Ok(record) => OrderOutcome::Success {
                    order_id: record.order_id,
                    symbol: record.symbol,
                    side: record.side,
                    amount: record.amount,
                    price: record.price,
                    timestamp_ms: record.timestamp_ms,
                },
                Err(e) => OrderOutcome::Error {
                    error: e.to_string(),
                    symbol: symbol.clone(),
                    side: OrderSide::Sell,
                },
            };
            results.push(CloseResult { symbol, outcome });
        }
        results
    }

    /// `free_quote × max_position_size / price` (§4.7).
    pub async fn max_position(&self, _symbol: &str, price: Decimal) -> Result<Decimal, ExecutorError> {
        if price.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let balances = self.gateway.fetch_balance().await?;
        let free_quote = balances
            .get(&self.config.quote_asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO);
        Ok(free_quote * self.config.max_position_size / price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stop_loss_boundary_matches_spec() {
        let entry = dec!(100);
        let stop_loss_pct = dec!(0.05);
        assert!(should_stop_loss(entry, dec!(95), stop_loss_pct));
        assert!(!should_stop_loss(entry, dec!(95.01), stop_loss_pct));
    }

    #[test]
    fn take_profit_boundary_matches_spec() {
        let entry = dec!(100);
        let take_profit_min = dec!(0.10);
        assert!(should_take_profit(entry, dec!(110), take_profit_min));
        assert!(!should_take_profit(entry, dec!(109.99), take_profit_min));
    }
}
