//! The simulated venue (§3 "Virtual ledger", §4.1). Balances, an
//! append-only order log, and a monotonic order-id counter, persisted as a
//! single JSON snapshot file overwritten atomically after every order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Kline, OrderSide, OrderType, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ExecutorError;
use crate::gateway::{Balance, ExchangeGateway, OrderRecord, OrderStatus, Ticker};

/// The live price source the simulated venue consults for `fetch_ticker`
/// and for resolving a market order's execution price. Simulation covers
/// only the ledger, never prices (§4.1).
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn ticker(&self, symbol: &str) -> Result<Ticker, ExecutorError>;
}

/// Adapts any [`api_client::ApiClient`] into a [`PriceSource`] so the
/// paper-trading gateway can see real market prices without placing real
/// orders against the venue.
pub struct ApiPriceSource(pub Arc<dyn api_client::ApiClient>);

#[async_trait]
impl PriceSource for ApiPriceSource {
    async fn ticker(&self, symbol: &str) -> Result<Ticker, ExecutorError> {
        let t = self
            .0
            .fetch_ticker(symbol)
            .await
            .map_err(|e| ExecutorError::VenueError(e.to_string()))?;
        Ok(Ticker {
            last: (t.bid_price + t.ask_price) / Decimal::TWO,
            bid: t.bid_price,
            ask: t.ask_price,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LedgerSnapshot {
    balances: HashMap<String, Decimal>,
    order_history: Vec<OrderRecord>,
    order_id_counter: u64,
}

struct LedgerState {
    balances: HashMap<String, Decimal>,
    order_log: Vec<OrderRecord>,
    order_id_counter: u64,
}

impl From<LedgerSnapshot> for LedgerState {
    fn from(s: LedgerSnapshot) -> Self {
        Self {
            balances: s.balances,
            order_log: s.order_history,
            order_id_counter: s.order_id_counter,
        }
    }
}

impl From<&LedgerState> for LedgerSnapshot {
    fn from(s: &LedgerState) -> Self {
        Self {
            balances: s.balances.clone(),
            order_history: s.order_log.clone(),
            order_id_counter: s.order_id_counter,
        }
    }
}

/// The simulated exchange gateway. Initialized from a configured starting
/// quote balance and a snapshot file if one exists; mutated only by order
/// submission, with the snapshot rewritten after each mutation.
pub struct SimulatedGateway {
    state: Mutex<LedgerState>,
    snapshot_path: PathBuf,
    price_source: Arc<dyn PriceSource>,
}

impl SimulatedGateway {
    pub async fn new(
        initial_quote_balance: Decimal,
        quote_asset: impl Into<String>,
        snapshot_path: impl Into<PathBuf>,
        price_source: Arc<dyn PriceSource>,
    ) -> Result<Self, ExecutorError> {
        let snapshot_path = snapshot_path.into();
        let state = match Self::load_snapshot(&snapshot_path).await? {
            Some(snapshot) => snapshot.into(),
            None => {
                let mut balances = HashMap::new();
                balances.insert(quote_asset.into(), initial_quote_balance);
                LedgerState {
                    balances,
                    order_log: Vec::new(),
                    order_id_counter: 0,
                }
            }
        };

        Ok(Self {
            state: Mutex::new(state),
            snapshot_path,
            price_source,
        })
    }

    async fn load_snapshot(path: &Path) -> Result<Option<LedgerSnapshot>, ExecutorError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExecutorError::Io(e)),
        }
    }

    async fn persist(&self, state: &LedgerState) -> Result<(), ExecutorError> {
        let snapshot: LedgerSnapshot = state.into();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = self.snapshot_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = self.snapshot_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.snapshot_path).await?;
        Ok(())
    }

    fn split_symbol(symbol: &str) -> Result<(&str, &str), ExecutorError> {
        symbol
            .split_once('/')
            .ok_or_else(|| ExecutorError::InvalidSymbol(symbol.to_string()))
    }
}

#[async_trait]
impl ExchangeGateway for SimulatedGateway {
    async fn fetch_balance(&self) -> Result<HashMap<String, Balance>, ExecutorError> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .iter()
            .map(|(asset, total)| {
                (
                    asset.clone(),
                    Balance {
                        free: *total,
                        used: Decimal::ZERO,
                        total: *total,
                    },
                )
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExecutorError> {
        self.price_source.ticker(symbol).await
    }

    async fn fetch_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: &str,
        _since: Option<DateTime<Utc>>,
        _limit: u32,
    ) -> Result<Vec<Kline>, ExecutorError> {
        Err(ExecutorError::VenueError(
            "the simulated gateway does not serve OHLCV history; read bars from the MarketStore instead".to_string(),
        ))
    }

    /// Performs the six steps of §4.1 as a single critical section under
    /// `state`'s lock: no other call may observe balances mutated without
    /// the log and snapshot also reflecting the change.
    async fn create_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Result<OrderRecord, ExecutorError> {
        let (base, quote) = Self::split_symbol(symbol)?;
        let mut state = self.state.lock().await;

        // 1. resolve execution price
        let execution_price = match (order_type, price) {
            (OrderType::Limit, Some(p)) => p,
            _ => {
                let ticker = self.price_source.ticker(symbol).await?;
                match side {
                    OrderSide::Buy => ticker.ask,
                    OrderSide::Sell => ticker.bid,
                }
            }
        };

        // 2. cost
        let cost = amount * execution_price;

        // 3. sufficiency check
        let (debit_asset, debit_amount, credit_asset, credit_amount) = match side {
            OrderSide::Buy => (quote, cost, base, amount),
            OrderSide::Sell => (base, amount, quote, cost),
        };
        let available = *state.balances.get(debit_asset).unwrap_or(&Decimal::ZERO);
        if available < debit_amount {
            return Err(ExecutorError::InsufficientBalance {
                asset: debit_asset.to_string(),
                required: debit_amount,
                available,
            });
        }

        // 4. debit / credit
        *state.balances.entry(debit_asset.to_string()).or_insert(Decimal::ZERO) -= debit_amount;
        *state.balances.entry(credit_asset.to_string()).or_insert(Decimal::ZERO) += credit_amount;

        // 5. append to the log with a fresh id
        state.order_id_counter += 1;
        let record = OrderRecord {
            order_id: state.order_id_counter.to_string(),
            symbol: symbol.to_string(),
            side,
            amount,
            price: execution_price,
            status: OrderStatus::Closed,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        state.order_log.push(record.clone());

        // 6. persist the snapshot
        self.persist(&state).await?;

        Ok(record)
    }

    async fn fetch_positions(&self) -> Result<Option<Vec<Position>>, ExecutorError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct FixedPriceSource {
        bid: Decimal,
        ask: Decimal,
    }

    #[async_trait]
    impl PriceSource for FixedPriceSource {
        async fn ticker(&self, _symbol: &str) -> Result<Ticker, ExecutorError> {
            Ok(Ticker {
                last: (self.bid + self.ask) / Decimal::TWO,
                bid: self.bid,
                ask: self.ask,
            })
        }
    }

    fn temp_snapshot_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("zenith-ledger-test-{name}-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn paper_buy_fully_updates_ledger() {
        let path = temp_snapshot_path("buy");
        let price_source = Arc::new(FixedPriceSource { bid: dec!(49990), ask: dec!(50000) });
        let gateway = SimulatedGateway::new(dec!(10000), "USDT", &path, price_source).await.unwrap();

        let record = gateway
            .create_order("BTC/USDT", OrderType::Limit, OrderSide::Buy, dec!(0.1), Some(dec!(50000)))
            .await
            .unwrap();

        assert_eq!(record.status, OrderStatus::Closed);
        let balances = gateway.fetch_balance().await.unwrap();
        assert_eq!(balances["USDT"].total, dec!(5000));
        assert_eq!(balances["BTC"].total, dec!(0.1));

        let state = gateway.state.lock().await;
        assert_eq!(state.order_log.len(), 1);
        drop(state);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected_and_ledger_unchanged() {
        let path = temp_snapshot_path("insufficient");
        let price_source = Arc::new(FixedPriceSource { bid: dec!(49990), ask: dec!(50000) });
        let gateway = SimulatedGateway::new(dec!(1000), "USDT", &path, price_source).await.unwrap();

        let result = gateway
            .create_order("BTC/USDT", OrderType::Limit, OrderSide::Buy, dec!(1.0), Some(dec!(50000)))
            .await;

        assert!(matches!(result, Err(ExecutorError::InsufficientBalance { .. })));
        let balances = gateway.fetch_balance().await.unwrap();
        assert_eq!(balances["USDT"].total, dec!(1000));
        assert!(!balances.contains_key("BTC"));

        let state = gateway.state.lock().await;
        assert_eq!(state.order_log.len(), 0);
        drop(state);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn snapshot_reload_reproduces_in_memory_state() {
        let path = temp_snapshot_path("reload");
        let price_source = Arc::new(FixedPriceSource { bid: dec!(49990), ask: dec!(50000) });
        {
            let gateway = SimulatedGateway::new(dec!(10000), "USDT", &path, Arc::clone(&price_source) as Arc<dyn PriceSource>).await.unwrap();
            gateway
                .create_order("BTC/USDT", OrderType::Limit, OrderSide::Buy, dec!(0.1), Some(dec!(50000)))
                .await
                .unwrap();
        }

        let reloaded = SimulatedGateway::new(dec!(999), "USDT", &path, price_source as Arc<dyn PriceSource>).await.unwrap();
        let balances = reloaded.fetch_balance().await.unwrap();
        assert_eq!(balances["USDT"].total, dec!(5000));
        assert_eq!(balances["BTC"].total, dec!(0.1));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
