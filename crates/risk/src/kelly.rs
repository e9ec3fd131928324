use crate::error::RiskError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Kelly-criterion position sizer with volatility damping.
///
/// Constructed once from configuration and reused across ticks; every
/// operation is a pure calculation, no state mutation.
#[derive(Debug, Clone)]
pub struct KellyRiskSizer {
    fraction: Decimal,
    max_position: Decimal,
    min_position: Decimal,
}

impl KellyRiskSizer {
    pub fn new(fraction: Decimal, max_position: Decimal) -> Result<Self, RiskError> {
        if fraction <= Decimal::ZERO || fraction > dec!(1) {
            return Err(RiskError::InvalidParameters(
                "fraction must be in (0, 1]".to_string(),
            ));
        }
        if max_position <= Decimal::ZERO || max_position > dec!(1) {
            return Err(RiskError::InvalidParameters(
                "max_position must be in (0, 1]".to_string(),
            ));
        }
        Ok(Self {
            fraction,
            max_position,
            min_position: Decimal::ZERO,
        })
    }

    /// `(win_rate*odds - (1-win_rate)) / odds`, scaled by `fraction`, clipped
    /// to `[min_position, max_position]`. Non-positive `odds` yields `0`.
    pub fn calculate(&self, win_rate: Decimal, odds: Decimal) -> Decimal {
        if odds <= Decimal::ZERO {
            return self.min_position;
        }
        let raw = (win_rate * odds - (dec!(1) - win_rate)) / odds;
        let sized = raw * self.fraction;
        sized.clamp(self.min_position, self.max_position)
    }

    /// Damps the raw Kelly size by `1 / (1 + k*vol)`.
    pub fn calculate_with_volatility(&self, win_rate: Decimal, odds: Decimal, vol: Decimal, k: Decimal) -> Decimal {
        let base = self.calculate(win_rate, odds);
        let damped = base / (dec!(1) + k * vol);
        damped.clamp(self.min_position, self.max_position)
    }

    /// Infers `win_rate` and `odds = avg_win/avg_loss` from a trailing window
    /// of percentage returns, and volatility as their sample standard
    /// deviation, then delegates to `calculate_with_volatility`.
    pub fn calculate_from_returns(&self, returns: &[Decimal], lookback: usize) -> Decimal {
        if returns.is_empty() {
            return self.min_position;
        }
        let start = returns.len().saturating_sub(lookback);
        let window = &returns[start..];
        if window.is_empty() {
            return self.min_position;
        }

        let wins: Vec<Decimal> = window.iter().copied().filter(|r| *r > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = window.iter().copied().filter(|r| *r < Decimal::ZERO).collect();

        if losses.is_empty() {
            return self.min_position;
        }

        let win_rate = Decimal::from(wins.len() as u64) / Decimal::from(window.len() as u64);
        let avg_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            wins.iter().sum::<Decimal>() / Decimal::from(wins.len() as u64)
        };
        let avg_loss = (losses.iter().sum::<Decimal>() / Decimal::from(losses.len() as u64)).abs();

        if avg_loss.is_zero() {
            return self.min_position;
        }
        let odds = avg_win / avg_loss;

        let mean = window.iter().sum::<Decimal>() / Decimal::from(window.len() as u64);
        let variance = window
            .iter()
            .map(|r| (*r - mean) * (*r - mean))
            .sum::<Decimal>()
            / Decimal::from(window.len() as u64);
        let vol = variance.to_f64().unwrap_or(0.0).sqrt();
        let vol = Decimal::from_f64_retain(vol).unwrap_or(Decimal::ZERO);

        self.calculate_with_volatility(win_rate, odds, vol, dec!(2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> KellyRiskSizer {
        KellyRiskSizer::new(dec!(1.0), dec!(1.0)).unwrap()
    }

    #[test]
    fn full_edge_full_kelly() {
        assert_eq!(sizer().calculate(dec!(1.0), dec!(1.0)), dec!(1.0));
    }

    #[test]
    fn coin_flip_is_zero() {
        assert_eq!(sizer().calculate(dec!(0.5), dec!(1.0)), dec!(0.0));
    }

    #[test]
    fn half_fraction_scales_result() {
        let half = KellyRiskSizer::new(dec!(0.5), dec!(1.0)).unwrap();
        assert_eq!(half.calculate(dec!(0.6), dec!(1.0)), dec!(0.1));
    }

    #[test]
    fn losing_edge_clips_to_zero() {
        assert_eq!(sizer().calculate(dec!(0.3), dec!(1.0)), dec!(0.0));
    }

    #[test]
    fn zero_odds_is_zero() {
        assert_eq!(sizer().calculate(dec!(0.9), dec!(0.0)), dec!(0.0));
    }

    #[test]
    fn volatility_damping_shrinks_size() {
        let undamped = sizer().calculate(dec!(0.8), dec!(1.0));
        let damped = sizer().calculate_with_volatility(dec!(0.8), dec!(1.0), dec!(0.5), dec!(2.0));
        assert!(damped < undamped);
        assert!(damped >= Decimal::ZERO);
    }

    #[test]
    fn returns_with_no_losses_returns_zero() {
        let returns = vec![dec!(0.01), dec!(0.02), dec!(0.03)];
        assert_eq!(sizer().calculate_from_returns(&returns, 50), Decimal::ZERO);
    }

    #[test]
    fn result_is_always_within_bounds() {
        let sizer = KellyRiskSizer::new(dec!(0.5), dec!(0.25)).unwrap();
        for wr in [0.0, 0.1, 0.5, 0.9, 1.0] {
            for odds in [0.0, 0.5, 1.0, 3.0, 10.0] {
                let size = sizer.calculate(Decimal::from_f64_retain(wr).unwrap(), Decimal::from_f64_retain(odds).unwrap());
                assert!(size >= Decimal::ZERO && size <= dec!(0.25));
            }
        }
    }
}
