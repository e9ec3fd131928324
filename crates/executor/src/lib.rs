//! # Executor
//!
//! Order dispatch against either venue behind a single [`ExchangeGateway`]
//! trait: [`SimulatedGateway`] for paper trading (a persisted virtual
//! ledger) and [`LiveGateway`] for the real exchange. [`TradeExecutor`]
//! gates every order through the kill switch and panic threshold, fans
//! scan-tick signals through the optional ML filter, and monitors/closes
//! open positions.

pub mod error;
pub mod gateway;
pub mod live;
pub mod simulated;
pub mod trade_executor;

pub use error::ExecutorError;
pub use gateway::{Balance, ExchangeGateway, OrderRecord, OrderStatus, Ticker};
pub use live::LiveGateway;
pub use simulated::{ApiPriceSource, PriceSource, SimulatedGateway};
pub use trade_executor::{
    should_stop_loss, should_take_profit, AlertSink, CloseResult, ExecutorAlert, OrderOutcome,
    PositionAction, SignalOutcome, TradeExecutor, TradeExecutorConfig,
};
