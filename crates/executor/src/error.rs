use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Raised by `place_order` when the kill switch reads `false` (§7). Not
    /// retried — the caller re-checks on its own next attempt.
    #[error("trading is currently suspended")]
    TradingSuspended,

    /// Raised when a buy's panic score exceeds the configured threshold
    /// (§4.7 gate 2). Never raised for sells.
    #[error("panic score {score} exceeds threshold {threshold}")]
    PanicTooHigh { score: Decimal, threshold: Decimal },

    /// The simulated gateway's `create_order` refuses for lack of funds
    /// (§4.1 step 3). Always turned into an error order record, never a crash.
    #[error("insufficient balance: need {required} {asset}, have {available} available")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    /// The live gateway's venue returned an error or timed out.
    #[error("exchange venue error: {0}")]
    VenueError(String),

    #[error("exchange call timed out")]
    Timeout,

    #[error("malformed trading pair symbol (expected BASE/QUOTE): {0}")]
    InvalidSymbol(String),

    #[error("i/o error persisting ledger snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize ledger snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}
