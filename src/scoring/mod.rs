//! Risk scoring service.
//!
//! The service is built once at startup in one of two states. `Ready` holds
//! an immutable fitted model shared by every request; `Unloaded` refuses all
//! scoring. There is no transition after construction: a newer artifact is
//! picked up by restarting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::model::artifact::EvaluationSummary;
use crate::model::{feature_names, ArtifactStore, Classifier};

pub const MESSAGE_AT_RISK: &str = "Attention, charge élevée détectée.";
pub const MESSAGE_FIT: &str = "Joueur apte.";

/// One day of athlete metrics. Every field is required and unknown fields
/// are rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringRequest {
    pub total_distance_m: f64,
    pub hsr_distance_m: f64,
    pub max_speed_kmh: f64,
    pub age: u32,
    pub weight_kg: f64,
    pub injury_history_index: u32,
    pub last_vma_test: f64,
}

impl ScoringRequest {
    /// Deserialize and range-check a request body
    pub fn parse(body: &Value) -> Result<Self, PipelineError> {
        let req: ScoringRequest = serde_json::from_value(body.clone())
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        req.validate()?;
        Ok(req)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let floats = [
            ("total_distance_m", self.total_distance_m),
            ("hsr_distance_m", self.hsr_distance_m),
            ("max_speed_kmh", self.max_speed_kmh),
            ("weight_kg", self.weight_kg),
            ("last_vma_test", self.last_vma_test),
        ];
        for (name, v) in floats {
            if !v.is_finite() {
                return Err(PipelineError::Validation(format!("{name} must be a finite number")));
            }
        }
        for (name, v) in &floats[..3] {
            if *v < 0.0 {
                return Err(PipelineError::Validation(format!("{name} must be >= 0, got {v}")));
            }
        }
        Ok(())
    }

    /// Values in the order of `names`. Fails on a name this request does not
    /// carry.
    pub fn feature_vector(&self, names: &[String]) -> Result<Vec<f64>, String> {
        names
            .iter()
            .map(|name| match name.as_str() {
                "total_distance_m" => Ok(self.total_distance_m),
                "hsr_distance_m" => Ok(self.hsr_distance_m),
                "max_speed_kmh" => Ok(self.max_speed_kmh),
                "age" => Ok(self.age as f64),
                "weight_kg" => Ok(self.weight_kg),
                "injury_history_index" => Ok(self.injury_history_index as f64),
                "last_vma_test" => Ok(self.last_vma_test),
                other => Err(format!("model expects unknown feature '{other}'")),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "FAIBLE")]
    Low,
    #[serde(rename = "MODÉRÉ")]
    Moderate,
    #[serde(rename = "CRITIQUE")]
    Critical,
}

impl RiskLevel {
    /// Bucket an unrounded probability
    pub fn from_probability(p: f64) -> Self {
        if p > 0.7 {
            RiskLevel::Critical
        } else if p > 0.3 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "FAIBLE",
            RiskLevel::Moderate => "MODÉRÉ",
            RiskLevel::Critical => "CRITIQUE",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScoreResult {
    pub risk_prediction: u8,
    /// Rounded to two decimals
    pub risk_probability: f64,
    pub risk_level: RiskLevel,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Validation(PipelineError),

    #[error(transparent)]
    Inference(PipelineError),
}

/// Metadata of the artifact a `Ready` service was built from
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub evaluation: EvaluationSummary,
}

pub struct LoadedModel {
    classifier: Arc<dyn Classifier>,
    info: ModelInfo,
}

pub enum ServiceState {
    Unloaded { reason: String },
    Ready(Arc<LoadedModel>),
}

pub struct RiskScoringService {
    state: ServiceState,
}

impl RiskScoringService {
    /// Load the latest artifact. Any failure leaves the service `Unloaded`.
    pub fn start(store: &ArtifactStore) -> Self {
        match store.load_latest(&feature_names()) {
            Ok(artifact) => {
                info!(
                    "Scoring service ready: model {} ({} features, test accuracy {:.3})",
                    artifact.version,
                    artifact.feature_names.len(),
                    artifact.evaluation.accuracy
                );
                let info = ModelInfo {
                    version: artifact.version,
                    trained_at: artifact.trained_at,
                    feature_names: artifact.feature_names,
                    evaluation: artifact.evaluation,
                };
                Self::ready(Arc::new(artifact.model), info)
            }
            Err(e) => {
                error!("Scoring service unloaded: {}", e);
                Self::unloaded(e.to_string())
            }
        }
    }

    pub fn ready(classifier: Arc<dyn Classifier>, info: ModelInfo) -> Self {
        RiskScoringService {
            state: ServiceState::Ready(Arc::new(LoadedModel { classifier, info })),
        }
    }

    pub fn unloaded(reason: impl Into<String>) -> Self {
        RiskScoringService {
            state: ServiceState::Unloaded {
                reason: reason.into(),
            },
        }
    }

    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    pub fn model_info(&self) -> Option<&ModelInfo> {
        match &self.state {
            ServiceState::Ready(loaded) => Some(&loaded.info),
            ServiceState::Unloaded { .. } => None,
        }
    }

    /// Score one request body. Validation happens before the classifier is
    /// touched; classifier failures are reported per request.
    pub fn score(&self, body: &Value) -> Result<RiskScoreResult, ScoringError> {
        let loaded = match &self.state {
            ServiceState::Ready(loaded) => loaded,
            ServiceState::Unloaded { reason } => {
                return Err(ScoringError::Unavailable(reason.clone()))
            }
        };
        let request = ScoringRequest::parse(body).map_err(|e| {
            warn!("Rejected scoring request: {}", e);
            ScoringError::Validation(e)
        })?;

        infer(loaded, &request).map_err(|cause| {
            let err = PipelineError::Inference(cause);
            error!("{}", err);
            ScoringError::Inference(err)
        })
    }
}

fn infer(loaded: &LoadedModel, request: &ScoringRequest) -> Result<RiskScoreResult, String> {
    let x = request.feature_vector(&loaded.info.feature_names)?;
    let probability = loaded
        .classifier
        .predict_probability(&x)
        .map_err(|e| format!("{e:#}"))?;
    if !(0.0..=1.0).contains(&probability) {
        return Err(format!("classifier returned probability {probability}"));
    }
    let at_risk = loaded.classifier.predict(&x).map_err(|e| format!("{e:#}"))?;

    Ok(RiskScoreResult {
        risk_prediction: u8::from(at_risk),
        risk_probability: (probability * 100.0).round() / 100.0,
        risk_level: RiskLevel::from_probability(probability),
        message: (if at_risk { MESSAGE_AT_RISK } else { MESSAGE_FIT }).to_string(),
    })
}

/// Model info for a classifier built outside an artifact
#[cfg(test)]
pub(crate) fn test_info() -> ModelInfo {
    ModelInfo {
        version: "test".to_string(),
        trained_at: Utc::now(),
        feature_names: feature_names(),
        evaluation: EvaluationSummary {
            train_rows: 0,
            test_rows: 0,
            accuracy: 0.0,
            log_loss: 0.0,
            brier: 0.0,
            label_incidence: 0.0,
            feature_importance: vec![],
        },
    }
}

/// Classifier that returns a fixed probability and counts calls
#[cfg(test)]
pub(crate) struct FixedClassifier {
    pub probability: f64,
    pub fail: bool,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FixedClassifier {
    pub(crate) fn new(probability: f64) -> Self {
        FixedClassifier {
            probability,
            fail: false,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
impl Classifier for FixedClassifier {
    fn fit(&mut self, _x: &[Vec<f64>], _y: &[bool]) -> anyhow::Result<()> {
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> anyhow::Result<bool> {
        Ok(self.predict_probability(x)? >= 0.5)
    }

    fn predict_probability(&self, x: &[f64]) -> anyhow::Result<f64> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("feature matrix has {} columns", x.len());
        }
        Ok(self.probability)
    }
}

#[cfg(test)]
pub(crate) fn sample_body() -> Value {
    serde_json::json!({
        "total_distance_m": 8500.0,
        "hsr_distance_m": 400.0,
        "max_speed_kmh": 28.5,
        "age": 24,
        "weight_kg": 75.0,
        "injury_history_index": 1,
        "last_vma_test": 18.0
    })
}
