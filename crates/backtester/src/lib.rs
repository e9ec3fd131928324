//! Offline strategy replay (§4.10). [`BacktestEngine`] reads historical
//! bars from the [`database::MarketStore`] and hands them to [`simulate`],
//! a pure function with no gateway I/O: a single-position, long-only
//! portfolio driven by one of two named rules (RSI 30/70 or a Bollinger
//! band touch), with configurable commission and slippage.

use chrono::{DateTime, Utc};
use core_types::Kline;
use database::{MarketStore, SortOrder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub mod error;
pub use error::BacktestError;

/// The two rules named in §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Buy when RSI(14) drops below 30 (oversold); sell when it rises
    /// above 70 (overbought).
    RsiThreshold,
    /// Buy when close touches or crosses below the lower Bollinger band;
    /// sell on a touch of the upper band.
    BollingerTouch,
}

#[derive(Debug, Clone, Copy)]
pub struct BacktestConfig {
    pub rule: Rule,
    pub initial_capital: Decimal,
    pub commission_pct: Decimal,
    pub slippage_pct: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            rule: Rule::RsiThreshold,
            initial_capital: Decimal::from(10_000),
            commission_pct: Decimal::new(1, 3),  // 0.001
            slippage_pct: Decimal::new(5, 4),    // 0.0005
        }
    }
}

/// The output named in §4.10: `{total_return, sharpe, max_drawdown,
/// win_rate, total_trades, equity_curve}`.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    /// `(final_equity - initial_capital) / initial_capital`.
    pub total_return: Decimal,
    /// `None` when fewer than two equity-curve returns exist to compute a
    /// standard deviation from.
    pub sharpe: Option<f64>,
    /// Largest peak-to-trough drawdown of the equity curve, as a fraction.
    pub max_drawdown: Decimal,
    /// Fraction of *closed* round trips that were profitable; `0` if none
    /// closed.
    pub win_rate: Decimal,
    pub total_trades: usize,
    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Buy,
    Sell,
}

fn rsi_signal(closes: &[f64]) -> Option<Side> {
    if closes.len() < 15 {
        return None;
    }
    let value = indicator_kit::rsi(closes, 14);
    if value < 30.0 {
        Some(Side::Buy)
    } else if value > 70.0 {
        Some(Side::Sell)
    } else {
        None
    }
}

fn bollinger_signal(closes: &[f64]) -> Option<Side> {
    if closes.len() < 20 {
        return None;
    }
    let (upper, _middle, lower) = indicator_kit::bollinger(closes, 20, 2.0);
    let last = *closes.last().unwrap_or(&0.0);
    if last <= lower {
        Some(Side::Buy)
    } else if last >= upper {
        Some(Side::Sell)
    } else {
        None
    }
}

/// Simulates a single-position, long-only portfolio over `bars` under
/// `config`, entirely in-process (§4.10 — "no gateway I/O").
///
/// On every bar, the configured [`Rule`] is evaluated against the closes
/// seen so far; a `Buy` signal while flat opens the full position (less
/// commission, with slippage applied against the fill), a `Sell` signal
/// while holding closes it. The equity curve marks the open position to
/// the bar's close on every step, whether or not a trade fired.
pub fn simulate(bars: &[Kline], config: BacktestConfig) -> Result<BacktestReport, BacktestError> {
    if bars.len() < 2 {
        return Err(BacktestError::InsufficientData);
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close.to_f64().unwrap_or(0.0)).collect();
    let one = Decimal::ONE;

    let mut cash = config.initial_capital;
    let mut position: Option<(Decimal, Decimal)> = None; // (quantity, entry_price)
    let mut equity_curve = Vec::with_capacity(bars.len());
    let mut trade_returns: Vec<Decimal> = Vec::new();

    for (i, bar) in bars.iter().enumerate() {
        let window = &closes[..=i];
        let signal = match config.rule {
            Rule::RsiThreshold => rsi_signal(window),
            Rule::BollingerTouch => bollinger_signal(window),
        };

        match (position, signal) {
            (None, Some(Side::Buy)) => {
                let fill_price = bar.close * (one + config.slippage_pct);
                let commission = cash * config.commission_pct;
                let spendable = cash - commission;
                if fill_price > Decimal::ZERO && spendable > Decimal::ZERO {
                    let quantity = spendable / fill_price;
                    position = Some((quantity, fill_price));
                    cash = Decimal::ZERO;
                }
            }
            (Some((quantity, entry_price)), Some(Side::Sell)) => {
                let fill_price = bar.close * (one - config.slippage_pct);
                let proceeds = quantity * fill_price;
                let commission = proceeds * config.commission_pct;
                cash = proceeds - commission;
                if entry_price > Decimal::ZERO {
                    trade_returns.push((fill_price - entry_price) / entry_price);
                }
                position = None;
            }
            _ => {}
        }

        let mark_to_market = match position {
            Some((quantity, _)) => cash + quantity * bar.close,
            None => cash,
        };
        equity_curve.push((bar.close_time, mark_to_market));
    }

    let final_equity = equity_curve.last().map(|(_, e)| *e).unwrap_or(config.initial_capital);
    let total_return = if config.initial_capital > Decimal::ZERO {
        (final_equity - config.initial_capital) / config.initial_capital
    } else {
        Decimal::ZERO
    };

    let mut peak = config.initial_capital;
    let mut max_drawdown = Decimal::ZERO;
    for (_, equity) in &equity_curve {
        if *equity > peak {
            peak = *equity;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - *equity) / peak;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }

    let win_rate = if trade_returns.is_empty() {
        Decimal::ZERO
    } else {
        let wins = trade_returns.iter().filter(|r| **r > Decimal::ZERO).count();
        Decimal::from(wins) / Decimal::from(trade_returns.len())
    };

    let sharpe = sharpe_ratio(&equity_curve);

    Ok(BacktestReport {
        total_return,
        sharpe,
        max_drawdown,
        win_rate,
        total_trades: trade_returns.len(),
        equity_curve,
    })
}

/// Non-annualized Sharpe (risk-free rate 0) over the equity curve's
/// bar-to-bar percentage returns. `None` when fewer than two returns exist
/// or their standard deviation is zero.
fn sharpe_ratio(equity_curve: &[(DateTime<Utc>, Decimal)]) -> Option<f64> {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].1.to_f64()?;
            let cur = w[1].1.to_f64()?;
            if prev == 0.0 {
                None
            } else {
                Some((cur - prev) / prev)
            }
        })
        .collect();

    if returns.len() < 2 {
        return None;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        None
    } else {
        Some(mean / std_dev)
    }
}

/// Loads bars from the [`MarketStore`] and replays them through [`simulate`].
/// Entirely offline once the query returns — no further gateway I/O (§4.10).
pub struct BacktestEngine {
    store: MarketStore,
}

impl BacktestEngine {
    pub fn new(store: MarketStore) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: i64,
        config: BacktestConfig,
    ) -> Result<BacktestReport, BacktestError> {
        let rows = self.store.query_bars(symbol, timeframe, SortOrder::Ascending, limit).await?;
        let bars: Vec<Kline> = rows.iter().map(Kline::from).collect();
        simulate(&bars, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(close_time: DateTime<Utc>, close: f64) -> Kline {
        Kline {
            open_time: close_time,
            open: Decimal::try_from(close).unwrap(),
            high: Decimal::try_from(close * 1.01).unwrap(),
            low: Decimal::try_from(close * 0.99).unwrap(),
            close: Decimal::try_from(close).unwrap(),
            volume: dec!(1000),
            close_time,
            interval: "1h".to_string(),
        }
    }

    fn series(closes: &[f64]) -> Vec<Kline> {
        let base = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(base + chrono::Duration::hours(i as i64), c))
            .collect()
    }

    #[test]
    fn fewer_than_two_bars_is_an_error() {
        let bars = series(&[100.0]);
        let result = simulate(&bars, BacktestConfig::default());
        assert!(matches!(result, Err(BacktestError::InsufficientData)));
    }

    #[test]
    fn equity_curve_has_one_point_per_bar() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 - i as f64 * 0.5).collect();
        let bars = series(&closes);
        let report = simulate(&bars, BacktestConfig::default()).unwrap();
        assert_eq!(report.equity_curve.len(), bars.len());
    }

    #[test]
    fn rsi_rule_round_trips_a_dip_and_recovery_into_a_winning_trade() {
        // A deep decline (pushes RSI below 30) followed by a strong
        // recovery (pushes RSI above 70) should open and then close one
        // profitable long.
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 3.0).collect();
        closes.extend((0..20).map(|i| closes[closes.len() - 1] + i as f64 * 3.0));
        let bars = series(&closes);

        let config = BacktestConfig {
            rule: Rule::RsiThreshold,
            commission_pct: Decimal::ZERO,
            slippage_pct: Decimal::ZERO,
            ..BacktestConfig::default()
        };
        let report = simulate(&bars, config).unwrap();

        assert!(report.total_trades >= 1);
        assert!(report.total_return > Decimal::ZERO);
    }

    #[test]
    fn flat_price_series_never_trades_on_either_rule() {
        let bars = series(&vec![100.0; 40]);
        for rule in [Rule::RsiThreshold, Rule::BollingerTouch] {
            let config = BacktestConfig { rule, ..BacktestConfig::default() };
            let report = simulate(&bars, config).unwrap();
            assert_eq!(report.total_trades, 0);
            assert_eq!(report.total_return, Decimal::ZERO);
        }
    }

    #[test]
    fn max_drawdown_is_non_negative_and_bounded() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 10.0).collect();
        let bars = series(&closes);
        let report = simulate(&bars, BacktestConfig::default()).unwrap();
        assert!(report.max_drawdown >= Decimal::ZERO);
        assert!(report.max_drawdown <= Decimal::ONE);
    }
}
