use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MlFilterError;

/// The serialized model bundle `{model, version, trained_at, feature_names}`
/// described in §6. The "model" here is a linear scorer (weights + bias,
/// squashed through a sigmoid) — the minimal self-contained representation
/// that lets the filter load and predict without depending on the training
/// pipeline's runtime (ml-trainer remains a separate, offline tool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl ModelBundle {
    pub fn load(path: &Path) -> Result<Self, MlFilterError> {
        let file = File::open(path).map_err(|source| MlFilterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let bundle: ModelBundle = bincode::deserialize_from(BufReader::new(file))?;
        Ok(bundle)
    }

    /// Raw sigmoid(w . x + b) score, not yet clamped — callers always see a
    /// value in `[0, 1]` because the sigmoid range already guarantees it.
    pub fn predict_raw(&self, features: &[f64]) -> f64 {
        let z: f64 = self
            .weights
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        1.0 / (1.0 + (-z).exp())
    }
}
