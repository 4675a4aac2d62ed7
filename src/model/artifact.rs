use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::FittedModel;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::labels::{LabelStats, RuleSet};

const FILE_PREFIX: &str = "injury_risk_model-";
const FILE_SUFFIX: &str = ".json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Held-out evaluation of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub train_rows: usize,
    pub test_rows: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
    /// Share of positive labels across the whole labeled dataset
    pub label_incidence: f64,
    /// Descending importance; empty when the model cannot rank features
    pub feature_importance: Vec<FeatureImportance>,
}

/// Everything needed to serve one trained model. Never modified after it is
/// written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub trained_at: DateTime<Utc>,
    /// Exact input order the model expects
    pub feature_names: Vec<String>,
    pub model: FittedModel,
    pub evaluation: EvaluationSummary,
    /// Label provenance
    pub label_rules: RuleSet,
    pub label_stats: LabelStats,
    pub seed: u64,
}

impl ModelArtifact {
    pub fn version_for(trained_at: DateTime<Utc>) -> String {
        trained_at.format("%Y%m%dT%H%M%S%3fZ").to_string()
    }

    /// Reject artifacts whose inputs differ, in name or order, from `expected`
    pub fn check_schema(&self, expected: &[String]) -> Result<(), String> {
        if self.feature_names != expected {
            return Err(format!(
                "feature list {:?} does not match expected {:?}",
                self.feature_names, expected
            ));
        }
        if self.model.dimension() != expected.len() {
            return Err(format!(
                "model expects {} inputs, feature list has {}",
                self.model.dimension(),
                expected.len()
            ));
        }
        Ok(())
    }
}

/// Directory of versioned artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        ArtifactStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{version}{FILE_SUFFIX}"))
    }

    /// Write a new artifact. Fails instead of overwriting an existing
    /// version.
    pub fn save(&self, artifact: &ModelArtifact) -> PipelineResult<PathBuf> {
        let target = self.path_for(&artifact.version);
        let target_display = target.display().to_string();
        fs::create_dir_all(&self.dir).map_err(|e| PipelineError::artifact(&target_display, e))?;

        let tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| PipelineError::artifact(&target_display, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, artifact)
                .map_err(|e| PipelineError::artifact(&target_display, e))?;
            writer.flush().map_err(|e| PipelineError::artifact(&target_display, e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| PipelineError::artifact(&target_display, e))?;
        tmp.persist_noclobber(&target)
            .map_err(|e| PipelineError::artifact(&target_display, e.error))?;

        info!("Model artifact written: {}", target_display);
        Ok(target)
    }

    /// Path of the most recent artifact in the directory
    pub fn latest_path(&self) -> PipelineResult<PathBuf> {
        let dir_display = self.dir.display().to_string();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| PipelineError::artifact(&dir_display, format!("cannot list: {e}")))?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
            .collect();
        // Versions are zero-padded UTC timestamps, so name order is time order
        names.sort();
        names
            .pop()
            .map(|name| self.dir.join(name))
            .ok_or_else(|| PipelineError::artifact(&dir_display, "no model artifact found"))
    }

    /// Load the latest artifact and check it against the expected inputs
    pub fn load_latest(&self, expected_features: &[String]) -> PipelineResult<ModelArtifact> {
        let path = self.latest_path()?;
        load_file(&path, expected_features)
    }
}

fn load_file(path: &Path, expected_features: &[String]) -> PipelineResult<ModelArtifact> {
    let path_display = path.display().to_string();
    let raw = fs::read(path).map_err(|e| PipelineError::artifact(&path_display, e))?;
    let artifact: ModelArtifact = serde_json::from_slice(&raw)
        .map_err(|e| PipelineError::artifact(&path_display, format!("corrupt artifact: {e}")))?;
    artifact
        .check_schema(expected_features)
        .map_err(|reason| PipelineError::artifact(&path_display, reason))?;
    Ok(artifact)
}

/// Small fitted artifact over the standard feature list
#[cfg(test)]
pub(crate) fn sample_artifact(trained_at: DateTime<Utc>) -> ModelArtifact {
    use crate::model::{feature_names, Classifier, LogisticModel, LogisticParams};

    let x: Vec<Vec<f64>> = (0..40)
        .map(|i| {
            let i = i as f64;
            vec![5000.0 + i * 100.0, 300.0 + i * 10.0, 28.0, 25.0, 75.0, 1.0, 18.0]
        })
        .collect();
    let y: Vec<bool> = (0..40).map(|i| i >= 30).collect();
    let mut model = LogisticModel::new(LogisticParams::default());
    model.fit(&x, &y).unwrap();
    ModelArtifact {
        version: ModelArtifact::version_for(trained_at),
        trained_at,
        feature_names: feature_names(),
        model: FittedModel::Logistic(model),
        evaluation: EvaluationSummary {
            train_rows: 32,
            test_rows: 8,
            accuracy: 1.0,
            log_loss: 0.1,
            brier: 0.02,
            label_incidence: 0.25,
            feature_importance: vec![],
        },
        label_rules: RuleSet::default(),
        label_stats: LabelStats {
            rows: 40,
            positives: 10,
            incidence: 0.25,
            mean_ratio: 1.0,
        },
        seed: 42,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::feature_names;
    use chrono::TimeZone;

    #[test]
    fn save_then_load_latest_picks_newest_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let older = sample_artifact(Utc.with_ymd_and_hms(2026, 1, 1, 6, 0, 0).unwrap());
        let newer = sample_artifact(Utc.with_ymd_and_hms(2026, 1, 2, 6, 0, 0).unwrap());
        store.save(&newer).unwrap();
        store.save(&older).unwrap();

        let loaded = store.load_latest(&feature_names()).unwrap();
        assert_eq!(loaded.version, newer.version);
        assert_eq!(loaded.trained_at, newer.trained_at);
        assert_eq!(loaded.model.dimension(), 7);
    }

    #[test]
    fn existing_version_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let artifact = sample_artifact(Utc.with_ymd_and_hms(2026, 1, 1, 6, 0, 0).unwrap());
        store.save(&artifact).unwrap();
        let err = store.save(&artifact).unwrap_err();
        assert!(matches!(err, PipelineError::Artifact { .. }));
    }

    #[test]
    fn empty_directory_has_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactStore::new(dir.path())
            .load_latest(&feature_names())
            .unwrap_err();
        assert!(err.to_string().contains("no model artifact found"));
    }

    #[test]
    fn missing_directory_is_an_artifact_error() {
        let err = ArtifactStore::new("/nonexistent/models")
            .load_latest(&feature_names())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Artifact { .. }));
    }

    #[test]
    fn corrupt_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("injury_risk_model-20260101T000000000Z.json"), "{not json").unwrap();
        let err = ArtifactStore::new(dir.path())
            .load_latest(&feature_names())
            .unwrap_err();
        assert!(err.to_string().contains("corrupt artifact"));
    }

    #[test]
    fn reordered_feature_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut artifact = sample_artifact(Utc.with_ymd_and_hms(2026, 1, 1, 6, 0, 0).unwrap());
        artifact.feature_names.swap(0, 1);
        store.save(&artifact).unwrap();

        let err = store.load_latest(&feature_names()).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
