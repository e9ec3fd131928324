use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    /// `TransientStoreError` (§7): the store is unreachable or a query
    /// timed out. Callers upserting a batch must treat this as a full
    /// rollback, never a partial write.
    #[error("Database unavailable: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid OHLCV bar for {symbol} at {open_time_ms}: {reason}")]
    InvalidBar {
        symbol: String,
        open_time_ms: i64,
        reason: String,
    },

    #[error("The requested data was not found in the database.")]
    NotFound,
}
