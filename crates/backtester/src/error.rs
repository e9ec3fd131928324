use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("database error while loading historical bars: {0}")]
    Database(#[from] database::DbError),

    #[error("fewer than two bars available for the requested range")]
    InsufficientData,
}
