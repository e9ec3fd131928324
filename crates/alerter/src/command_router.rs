//! Inbound operator commands (§4.9 table). Text has already cleared the
//! webhook's HMAC check by the time it reaches [`CommandRouter::handle`];
//! this module only interprets the four recognized prefixes.

use std::sync::Arc;

use control_surface::ControlSurface;
use database::{MarketStore, Table};
use executor::TradeExecutor;

/// Replies with store counts and cache reachability for `/status` (§6
/// `GET /api/status`, reused verbatim for the chat command).
pub struct StatusReport {
    pub ohlcv_bars: i64,
    pub chain_metrics: i64,
    pub exchange_netflows: i64,
    pub cache_reachable: bool,
}

impl StatusReport {
    fn render(&self) -> String {
        format!(
            "*Status*\nOHLCV bars: `{}`\nChain metrics: `{}`\nExchange netflows: `{}`\ncache: `{}`",
            self.ohlcv_bars,
            self.chain_metrics,
            self.exchange_netflows,
            if self.cache_reachable { "reachable" } else { "unreachable" },
        )
    }
}

pub struct CommandRouter {
    control_surface: Arc<ControlSurface>,
    trade_executor: Arc<TradeExecutor>,
    market_store: Arc<MarketStore>,
}

impl CommandRouter {
    pub fn new(control_surface: Arc<ControlSurface>, trade_executor: Arc<TradeExecutor>, market_store: Arc<MarketStore>) -> Self {
        Self { control_surface, trade_executor, market_store }
    }

    /// Dispatches one inbound text command and returns the reply to push
    /// back to the operator chat. Never raises — store/cache errors are
    /// folded into the reply text, per §7's "jobs never propagate" spirit
    /// extended to operator-facing handlers.
    pub async fn handle(&self, text: &str) -> String {
        let command = text.trim();
        match command {
            "/status" => self.status().await,
            "/stop" => self.stop().await,
            "/start" => self.start().await,
            "/panic" => self.panic().await,
            _ => "usage: /status | /stop | /start | /panic".to_string(),
        }
    }

    async fn status(&self) -> String {
        let ohlcv_bars = self.market_store.count(Table::OhlcvBars).await.unwrap_or(-1);
        let chain_metrics = self.market_store.count(Table::ChainMetrics).await.unwrap_or(-1);
        let exchange_netflows = self.market_store.count(Table::ExchangeNetflows).await.unwrap_or(-1);
        let cache_reachable = self.control_surface.ping().await.is_ok();

        StatusReport { ohlcv_bars, chain_metrics, exchange_netflows, cache_reachable }.render()
    }

    async fn stop(&self) -> String {
        match self.control_surface.disable().await {
            Ok(()) => "trading disabled".to_string(),
            Err(e) => format!("failed to disable trading: {e}"),
        }
    }

    async fn start(&self) -> String {
        match self.control_surface.enable().await {
            Ok(()) => "trading enabled".to_string(),
            Err(e) => format!("failed to enable trading: {e}"),
        }
    }

    /// `/panic`: disable trading, then liquidate every open position
    /// regardless of the kill switch just set — `close_all_positions`
    /// bypasses the gate it itself just tripped (§4.7).
    async fn panic(&self) -> String {
        let disable_result = self.control_surface.disable().await;
        let closed = self.trade_executor.close_all_positions().await;
        let failures = closed.iter().filter(|c| matches!(c.outcome, executor::OrderOutcome::Error { .. })).count();

        match disable_result {
            Ok(()) => format!("panic: trading disabled, closed {} position(s), {} failed", closed.len(), failures),
            Err(e) => format!("panic: trading disable FAILED ({e}), closed {} position(s), {} failed", closed.len(), failures),
        }
    }
}
