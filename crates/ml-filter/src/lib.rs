//! The process-wide ML predictor (§4.5). `MLFilter` is constructed once at
//! startup, attempts to load a serialized [`bundle::ModelBundle`], and
//! degrades to a `disabled` state on any load failure rather than failing
//! startup — a broken or missing model must never stop the bot, only make
//! every buy signal pass through at the neutral probability `0.5`.
//!
//! Reads are lock-free: [`arc_swap::ArcSwap`] gives every `predict`/`decide`
//! call an atomic snapshot of the current state with no contention against
//! concurrent `reload()` calls, matching the "singleton inference model"
//! design note — one mutable cell, many lock-free readers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

pub mod bundle;
pub mod error;

pub use bundle::ModelBundle;
pub use error::MlFilterError;

/// The lifecycle states named in §4.5. `Uninitialized` only exists between
/// struct construction and the first load attempt inside `new` — by the
/// time `MLFilter::new` returns, the filter is always `Ready` or `Disabled`.
enum State {
    Ready(ModelBundle),
    Disabled,
}

/// Either a named feature map or a positional vector, the two input shapes
/// `predict` accepts per §4.5. A positional vector is interpreted in the
/// order of the loaded bundle's `feature_names`.
pub enum Features {
    Named(HashMap<String, f64>),
    Vector(Vec<f64>),
}

impl Features {
    fn resolve(&self, feature_names: &[String]) -> Vec<f64> {
        match self {
            Features::Named(map) => feature_names
                .iter()
                .map(|name| map.get(name).copied().unwrap_or(0.0))
                .map(coerce)
                .collect(),
            Features::Vector(v) => {
                let mut out: Vec<f64> = feature_names
                    .iter()
                    .enumerate()
                    .map(|(i, _)| v.get(i).copied().unwrap_or(0.0))
                    .collect();
                out.iter_mut().for_each(|x| *x = coerce(*x));
                out
            }
        }
    }
}

fn coerce(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Avoid,
}

fn recommendation_for(probability: f64) -> Recommendation {
    if probability >= 0.7 {
        Recommendation::StrongBuy
    } else if probability >= 0.6 {
        Recommendation::Buy
    } else if probability >= 0.4 {
        Recommendation::Hold
    } else {
        Recommendation::Avoid
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub probability: f64,
    pub should_trade: bool,
    pub recommendation: Recommendation,
    /// Distance of `probability` from the decision boundary `0.5`, scaled
    /// into `[0, 1]` — how confidently the model leans one way or the other.
    pub confidence: f64,
}

/// The process-wide singleton predictor. Construct exactly one and share it
/// (e.g. behind an `Arc`) across every scan tick; `predict`/`decide` are
/// read-only and safe for concurrent callers per §5.
pub struct MLFilter {
    model_path: PathBuf,
    state: ArcSwap<State>,
    threshold_millis: AtomicU64,
}

const DEFAULT_THRESHOLD: f64 = 0.6;

impl MLFilter {
    /// Attempts to load the bundle at `model_path`; on any failure the
    /// filter comes up `disabled` and logs the cause rather than
    /// propagating it (`ModelLoadError` degrades gracefully, per §7).
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        let model_path = model_path.into();
        let state = Self::attempt_load(&model_path);
        Self {
            model_path,
            state: ArcSwap::from_pointee(state),
            threshold_millis: AtomicU64::new((DEFAULT_THRESHOLD * 1000.0) as u64),
        }
    }

    fn attempt_load(path: &Path) -> State {
        match ModelBundle::load(path) {
            Ok(bundle) => {
                tracing::info!(version = %bundle.version, "ml filter model loaded");
                State::Ready(bundle)
            }
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "ml filter model load failed; disabling filter (probability fixed at 0.5)");
                State::Disabled
            }
        }
    }

    /// Re-attempts loading the configured path, e.g. after an operator
    /// drops a freshly trained bundle into place.
    pub fn reload(&self) {
        let state = Self::attempt_load(&self.model_path);
        self.state.store(Arc::new(state));
    }

    pub fn is_ready(&self) -> bool {
        matches!(**self.state.load(), State::Ready(_))
    }

    pub fn set_threshold(&self, threshold: f64) -> Result<(), MlFilterError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MlFilterError::InvalidThreshold(threshold));
        }
        self.threshold_millis
            .store((threshold * 1000.0) as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_millis.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// `probability ∈ [0, 1]`; `0.5` whenever the filter is disabled.
    pub fn predict(&self, features: &Features) -> f64 {
        match &**self.state.load() {
            State::Ready(bundle) => {
                let resolved = features.resolve(&bundle.feature_names);
                bundle.predict_raw(&resolved).clamp(0.0, 1.0)
            }
            State::Disabled => 0.5,
        }
    }

    /// Uses the filter's stored threshold (set via [`MLFilter::set_threshold`],
    /// default `0.6`) unless `threshold` is given explicitly.
    pub fn decide(&self, features: &Features, threshold: Option<f64>) -> Decision {
        let probability = self.predict(features);
        let threshold = threshold.unwrap_or_else(|| self.threshold());
        Decision {
            probability,
            should_trade: probability >= threshold,
            recommendation: recommendation_for(probability),
            confidence: (probability - 0.5).abs() * 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_filter() -> MLFilter {
        MLFilter::new("/nonexistent/path/to/model.bin")
    }

    #[test]
    fn disabled_filter_predicts_neutral() {
        let filter = disabled_filter();
        assert!(!filter.is_ready());
        let features = Features::Vector(vec![1.0, 2.0, 3.0]);
        assert_eq!(filter.predict(&features), 0.5);
    }

    #[test]
    fn disabled_filter_rejects_buy_below_threshold() {
        let filter = disabled_filter();
        let decision = filter.decide(&Features::Vector(vec![]), Some(0.6));
        assert!(!decision.should_trade);
        assert_eq!(decision.recommendation, Recommendation::Hold);
    }

    #[test]
    fn predict_is_always_in_unit_interval() {
        let filter = disabled_filter();
        for v in [vec![], vec![f64::NAN], vec![1e9, -1e9]] {
            let p = filter.predict(&Features::Vector(v));
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let filter = disabled_filter();
        assert!(filter.set_threshold(1.5).is_err());
        assert!(filter.set_threshold(-0.1).is_err());
        assert!(filter.set_threshold(0.6).is_ok());
    }

    #[test]
    fn recommendation_bands_match_spec() {
        assert_eq!(recommendation_for(0.75), Recommendation::StrongBuy);
        assert_eq!(recommendation_for(0.65), Recommendation::Buy);
        assert_eq!(recommendation_for(0.5), Recommendation::Hold);
        assert_eq!(recommendation_for(0.1), Recommendation::Avoid);
    }
}
