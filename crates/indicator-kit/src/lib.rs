//! Pure technical-analysis functions over numeric sequences. No I/O, no
//! state held across calls — every function re-derives its result from the
//! slice it is given, which keeps the scan job's signal path trivially
//! testable.

use core_types::Kline;
use rust_decimal::prelude::ToPrimitive;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::Next;

/// Exponentially smoothed RSI, result in `[0, 100]`. Feeding an empty slice
/// returns the neutral value `50.0`.
pub fn rsi(close: &[f64], period: usize) -> f64 {
    if close.is_empty() {
        return 50.0;
    }
    let mut indicator = RelativeStrengthIndex::new(period).unwrap_or_else(|_| RelativeStrengthIndex::new(14).unwrap());
    let mut last = 50.0;
    for &c in close {
        last = indicator.next(c);
    }
    last
}

pub fn sma(x: &[f64], period: usize) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let mut indicator = SimpleMovingAverage::new(period).unwrap_or_else(|_| SimpleMovingAverage::new(1).unwrap());
    let mut last = 0.0;
    for &v in x {
        last = indicator.next(v);
    }
    last
}

pub fn ema(x: &[f64], period: usize) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let mut indicator = ExponentialMovingAverage::new(period).unwrap_or_else(|_| ExponentialMovingAverage::new(1).unwrap());
    let mut last = 0.0;
    for &v in x {
        last = indicator.next(v);
    }
    last
}

/// `(upper, middle, lower)` Bollinger bands.
pub fn bollinger(close: &[f64], period: usize, k: f64) -> (f64, f64, f64) {
    if close.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut indicator = BollingerBands::new(period, k).unwrap_or_else(|_| BollingerBands::new(20, 2.0).unwrap());
    let mut out = indicator.next(close[0]);
    for &c in &close[1..] {
        out = indicator.next(c);
    }
    (out.upper, out.average, out.lower)
}

/// `(upper - lower) / middle`.
pub fn bollinger_width(upper: f64, middle: f64, lower: f64) -> f64 {
    if middle == 0.0 {
        return 0.0;
    }
    (upper - lower) / middle
}

/// `(macd, signal, histogram)`; `histogram = macd - signal`.
pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> (f64, f64, f64) {
    if close.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut indicator = MovingAverageConvergenceDivergence::new(fast, slow, signal)
        .unwrap_or_else(|_| MovingAverageConvergenceDivergence::new(12, 26, 9).unwrap());
    let mut out = indicator.next(close[0]);
    for &c in &close[1..] {
        out = indicator.next(c);
    }
    (out.macd, out.signal, out.histogram)
}

/// Wilder-smoothed average true range over `period` bars.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> f64 {
    let n = high.len().min(low.len()).min(close.len());
    if n == 0 {
        return 0.0;
    }
    let mut true_ranges = Vec::with_capacity(n);
    for i in 0..n {
        let tr = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        true_ranges.push(tr);
    }
    wilder_smooth(&true_ranges, period)
}

fn wilder_smooth(values: &[f64], period: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let p = period.max(1).min(values.len());
    let mut smoothed = values[..p].iter().sum::<f64>() / p as f64;
    for v in &values[p..] {
        smoothed = (smoothed * (p as f64 - 1.0) + v) / p as f64;
    }
    smoothed
}

fn pct_returns(close: &[f64]) -> Vec<f64> {
    close.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

fn std_dev(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let mean = x.iter().sum::<f64>() / x.len() as f64;
    let variance = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / x.len() as f64;
    variance.sqrt()
}

/// Rolling standard deviation of returns over the trailing `window`,
/// optionally annualized by `annualization_factor` (e.g. `sqrt(365*24)` for
/// hourly bars).
pub fn volatility(close: &[f64], window: usize) -> f64 {
    let returns = pct_returns(close);
    if returns.is_empty() {
        return 0.0;
    }
    let start = returns.len().saturating_sub(window);
    std_dev(&returns[start..])
}

pub fn volatility_annualized(close: &[f64], window: usize, annualization_factor: f64) -> f64 {
    volatility(close, window) * annualization_factor
}

/// Rolling `(x - mean) / std` over the trailing `window`, evaluated at the
/// series' most recent point.
pub fn onchain_zscore(series: &[f64], window: usize) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let start = series.len().saturating_sub(window);
    let slice = &series[start..];
    let mean = slice.iter().sum::<f64>() / slice.len() as f64;
    let sd = std_dev(slice);
    if sd == 0.0 {
        return 0.0;
    }
    (series[series.len() - 1] - mean) / sd
}

#[derive(Debug, Clone, Copy)]
pub struct CompositeWeights {
    pub rsi: f64,
    pub trend: f64,
    pub volatility: f64,
    pub volume: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            rsi: 0.30,
            trend: 0.30,
            volatility: 0.20,
            volume: 0.20,
        }
    }
}

fn rolling_volatility_series(closes: &[f64], window: usize) -> Vec<f64> {
    let returns = pct_returns(closes);
    (1..=returns.len())
        .map(|i| std_dev(&returns[i.saturating_sub(window)..i]))
        .collect()
}

/// Blends momentum (RSI), trend (MACD crossover), calm (inverse volatility)
/// and participation (relative volume) into a single `[0, 100]` score, with
/// an optional on-chain netflow adjustment.
pub fn composite_score(bars: &[Kline], weights: &CompositeWeights, onchain_z: Option<f64>) -> f64 {
    if bars.len() < 2 {
        return 0.0;
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close.to_f64().unwrap_or(0.0)).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume.to_f64().unwrap_or(0.0)).collect();

    let rsi_score = rsi(&closes, 14);

    let (macd_value, signal_value, _histogram) = macd(&closes, 12, 26, 9);
    let trend_score = if macd_value > signal_value { 100.0 } else { 0.0 };

    let vol_series = rolling_volatility_series(&closes, 20);
    let current_vol = *vol_series.last().unwrap_or(&0.0);
    let max_vol = vol_series.iter().cloned().fold(0.0_f64, f64::max);
    let volatility_score = if max_vol > 0.0 {
        (1.0 - current_vol / max_vol) * 100.0
    } else {
        100.0
    };

    let volume_sma = sma(&volumes, 20);
    let volume_score = if volume_sma > 0.0 {
        (*volumes.last().unwrap_or(&0.0) / volume_sma * 50.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let mut score = weights.rsi * rsi_score
        + weights.trend * trend_score
        + weights.volatility * volatility_score
        + weights.volume * volume_score;

    if let Some(z) = onchain_z {
        if z > 2.0 {
            score -= 20.0;
        } else if z < -2.0 {
            score += 10.0;
        }
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bar(close: f64, volume: f64) -> Kline {
        Kline {
            open_time: Utc::now(),
            open: dec!(0),
            high: rust_decimal::Decimal::try_from(close * 1.01).unwrap(),
            low: rust_decimal::Decimal::try_from(close * 0.99).unwrap(),
            close: rust_decimal::Decimal::try_from(close).unwrap(),
            volume: rust_decimal::Decimal::try_from(volume).unwrap(),
            close_time: Utc::now(),
            interval: "1h".to_string(),
        }
    }

    #[test]
    fn rsi_of_monotonic_uptrend_is_high() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(rsi(&closes, 14) > 70.0);
    }

    #[test]
    fn rsi_empty_is_neutral() {
        assert_eq!(rsi(&[], 14), 50.0);
    }

    #[test]
    fn onchain_zscore_of_flat_series_is_zero() {
        let series = vec![1.0; 30];
        assert_eq!(onchain_zscore(&series, 30), 0.0);
    }

    #[test]
    fn composite_score_stays_within_bounds() {
        let bars: Vec<Kline> = (0..60).map(|i| bar(100.0 + (i as f64).sin() * 5.0, 1000.0 + i as f64 * 10.0)).collect();
        let weights = CompositeWeights::default();
        let score = composite_score(&bars, &weights, None);
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn onchain_adjustment_orders_scores_as_specified() {
        let bars: Vec<Kline> = (0..60).map(|i| bar(100.0 + (i as f64).sin() * 5.0, 1000.0 + i as f64 * 10.0)).collect();
        let weights = CompositeWeights::default();
        let bearish_inflow = composite_score(&bars, &weights, Some(2.5));
        let baseline = composite_score(&bars, &weights, None);
        let bullish_outflow = composite_score(&bars, &weights, Some(-2.5));
        assert!(bearish_inflow < baseline);
        assert!(baseline < bullish_outflow);
    }
}
