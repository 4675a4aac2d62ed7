pub mod artifact;
pub mod logistic;
pub mod trainer;

pub use artifact::{ArtifactStore, ModelArtifact};
pub use logistic::{LogisticModel, LogisticParams};
pub use trainer::{TrainConfig, Trainer};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::db::models::MergedRow;

/// Classifier inputs, in the order every artifact records them
pub const FEATURE_NAMES: [&str; 7] = [
    "total_distance_m",
    "hsr_distance_m",
    "max_speed_kmh",
    "age",
    "weight_kg",
    "injury_history_index",
    "last_vma_test",
];

pub fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Feature vector of a merged row, in `FEATURE_NAMES` order
pub fn feature_vector(row: &MergedRow) -> Vec<f64> {
    vec![
        row.total_distance_m,
        row.hsr_distance_m,
        row.max_speed_kmh,
        row.age as f64,
        row.weight_kg,
        row.injury_history_index as f64,
        row.last_vma_test,
    ]
}

/// A binary classifier the trainer can fit and the scoring service can query.
pub trait Classifier: Send + Sync {
    fn fit(&mut self, x: &[Vec<f64>], y: &[bool]) -> Result<()>;

    fn predict(&self, x: &[f64]) -> Result<bool>;

    /// Probability of the positive class
    fn predict_probability(&self, x: &[f64]) -> Result<f64>;

    /// One weight per input feature, when the model can rank them
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }
}

/// Serialisable fitted model stored inside an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedModel {
    Logistic(LogisticModel),
}

impl FittedModel {
    /// Number of inputs the model was fitted on
    pub fn dimension(&self) -> usize {
        match self {
            FittedModel::Logistic(m) => m.dimension(),
        }
    }
}

impl Classifier for FittedModel {
    fn fit(&mut self, x: &[Vec<f64>], y: &[bool]) -> Result<()> {
        match self {
            FittedModel::Logistic(m) => m.fit(x, y),
        }
    }

    fn predict(&self, x: &[f64]) -> Result<bool> {
        match self {
            FittedModel::Logistic(m) => m.predict(x),
        }
    }

    fn predict_probability(&self, x: &[f64]) -> Result<f64> {
        match self {
            FittedModel::Logistic(m) => m.predict_probability(x),
        }
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            FittedModel::Logistic(m) => m.feature_importances(),
        }
    }
}
