use chrono::{DateTime, Utc};
use core_types::Kline;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use crate::error::DbError;

/// Sort order for [`MarketStore::query_bars`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One persisted OHLCV bar, keyed by `(venue, symbol, timeframe,
/// open_time_ms)` per §3. Rows are immutable once written; the unique
/// index on the natural key is what makes `upsert_bars` idempotent.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct OhlcvRow {
    pub venue: String,
    pub symbol: String,
    pub timeframe: String,
    pub open_time_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OhlcvRow {
    /// `low <= open,close <= high` and `volume >= 0` — the invariant the
    /// fetch job must hold before ever calling `upsert_bars` (§8).
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
    }
}

impl From<&OhlcvRow> for Kline {
    fn from(row: &OhlcvRow) -> Self {
        let open_time = DateTime::from_timestamp_millis(row.open_time_ms).unwrap_or(row.created_at);
        Kline {
            open_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            close_time: open_time,
            interval: row.timeframe.clone(),
        }
    }
}

/// One chain-metric reading, keyed by `(asset, metric_name, source,
/// timestamp_s)` per §3.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ChainMetricRow {
    pub asset: String,
    pub metric_name: String,
    pub source: String,
    pub timestamp_s: i64,
    pub value: f64,
    pub exchange_netflow: Option<f64>,
    pub whale_inflow_count: Option<i64>,
    pub extra: Option<JsonValue>,
}

/// One exchange-netflow reading. `netflow` is a derived invariant: every
/// write must satisfy `netflow == inflow - outflow` (§3, enforced again by
/// the migration's CHECK constraint as defense in depth).
#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize, Deserialize)]
pub struct NetflowRow {
    pub asset: String,
    pub venue: String,
    pub timestamp_s: i64,
    pub inflow: f64,
    pub outflow: f64,
    pub netflow: f64,
}

impl NetflowRow {
    pub fn new(asset: impl Into<String>, venue: impl Into<String>, timestamp_s: i64, inflow: f64, outflow: f64) -> Self {
        Self {
            asset: asset.into(),
            venue: venue.into(),
            timestamp_s,
            inflow,
            outflow,
            netflow: inflow - outflow,
        }
    }
}

/// The result of an [`MarketStore::upsert_bars`] batch: how many rows were
/// newly inserted versus skipped because an identical key already existed
/// (idempotent replay, §4.2 — "the older row wins").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertReport {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Tables the fetch/scan jobs count through `/api/status` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    OhlcvBars,
    ChainMetrics,
    ExchangeNetflows,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::OhlcvBars => "ohlcv_bars",
            Table::ChainMetrics => "chain_metrics",
            Table::ExchangeNetflows => "exchange_netflows",
        }
    }
}

/// The row store described in §4.2: idempotent upsert and range queries
/// over OHLCV bars, chain metrics, and exchange netflows, backed by
/// Postgres via `sqlx`.
#[derive(Debug, Clone)]
pub struct MarketStore {
    pool: PgPool,
}

impl MarketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent batch insert. A batch either fully commits or fully rolls
    /// back (§4.2); a key collision within the batch is not an error — it
    /// is counted in `UpsertReport::duplicates` and the existing row (the
    /// "older row") is left untouched.
    pub async fn upsert_bars(&self, rows: &[OhlcvRow]) -> Result<UpsertReport, DbError> {
        if rows.is_empty() {
            return Ok(UpsertReport::default());
        }
        for row in rows {
            if !row.is_valid() {
                return Err(DbError::InvalidBar {
                    symbol: row.symbol.clone(),
                    open_time_ms: row.open_time_ms,
                    reason: "low <= open,close <= high and volume >= 0 violated".to_string(),
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        let mut duplicates = 0usize;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO ohlcv_bars (venue, symbol, timeframe, open_time_ms, open, high, low, close, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (venue, symbol, timeframe, open_time_ms) DO NOTHING
                "#,
            )
            .bind(&row.venue)
            .bind(&row.symbol)
            .bind(&row.timeframe)
            .bind(row.open_time_ms)
            .bind(row.open)
            .bind(row.high)
            .bind(row.low)
            .bind(row.close)
            .bind(row.volume)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                inserted += 1;
            } else {
                duplicates += 1;
            }
        }

        tx.commit().await?;
        Ok(UpsertReport { inserted, duplicates })
    }

    pub async fn query_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        order: SortOrder,
        limit: i64,
    ) -> Result<Vec<OhlcvRow>, DbError> {
        let rows = match order {
            SortOrder::Ascending => {
                sqlx::query_as::<_, OhlcvRow>(
                    r#"
                    SELECT venue, symbol, timeframe, open_time_ms, open, high, low, close, volume, created_at
                    FROM ohlcv_bars WHERE symbol = $1 AND timeframe = $2
                    ORDER BY open_time_ms ASC LIMIT $3
                    "#,
                )
                .bind(symbol)
                .bind(timeframe)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            SortOrder::Descending => {
                sqlx::query_as::<_, OhlcvRow>(
                    r#"
                    SELECT venue, symbol, timeframe, open_time_ms, open, high, low, close, volume, created_at
                    FROM ohlcv_bars WHERE symbol = $1 AND timeframe = $2
                    ORDER BY open_time_ms DESC LIMIT $3
                    "#,
                )
                .bind(symbol)
                .bind(timeframe)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn count(&self, table: Table) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Upserts one chain-metric reading. Duplicate natural keys are a
    /// quiet per-row skip, never an error.
    pub async fn upsert_chain_metric(&self, row: &ChainMetricRow) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chain_metrics (asset, metric_name, source, timestamp_s, value, exchange_netflow, whale_inflow_count, extra)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (asset, metric_name, source, timestamp_s) DO NOTHING
            "#,
        )
        .bind(&row.asset)
        .bind(&row.metric_name)
        .bind(&row.source)
        .bind(row.timestamp_s)
        .bind(row.value)
        .bind(row.exchange_netflow)
        .bind(row.whale_inflow_count)
        .bind(&row.extra)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn upsert_netflow(&self, row: &NetflowRow) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO exchange_netflows (asset, venue, timestamp_s, inflow, outflow, netflow)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (asset, venue, timestamp_s) DO NOTHING
            "#,
        )
        .bind(&row.asset)
        .bind(&row.venue)
        .bind(row.timestamp_s)
        .bind(row.inflow)
        .bind(row.outflow)
        .bind(row.netflow)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn latest_netflows(&self, asset: &str, n: i64) -> Result<Vec<NetflowRow>, DbError> {
        let rows = sqlx::query_as::<_, NetflowRow>(
            r#"
            SELECT asset, venue, timestamp_s, inflow, outflow, netflow
            FROM exchange_netflows WHERE asset = $1
            ORDER BY timestamp_s DESC LIMIT $2
            "#,
        )
        .bind(asset)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open_time_ms: i64) -> OhlcvRow {
        OhlcvRow {
            venue: "sim".to_string(),
            symbol: "BTC/USDT".to_string(),
            timeframe: "1m".to_string(),
            open_time_ms,
            open: Decimal::from(100),
            high: Decimal::from(110),
            low: Decimal::from(95),
            close: Decimal::from(105),
            volume: Decimal::from(10),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn valid_bar_passes_ohlc_invariant() {
        assert!(bar(1).is_valid());
    }

    #[test]
    fn bar_with_high_below_close_is_invalid() {
        let mut b = bar(1);
        b.high = Decimal::from(100);
        b.close = Decimal::from(105);
        assert!(!b.is_valid());
    }

    #[test]
    fn negative_volume_is_invalid() {
        let mut b = bar(1);
        b.volume = Decimal::from(-1);
        assert!(!b.is_valid());
    }

    #[test]
    fn netflow_row_derives_invariant() {
        let row = NetflowRow::new("BTC", "binance", 1_700_000_000, 120.0, 45.0);
        assert_eq!(row.netflow, 75.0);
    }
}
