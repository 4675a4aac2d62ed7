use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, warn};

use super::artifact::{EvaluationSummary, FeatureImportance};
use super::logistic::clamp_prob;
use super::{
    feature_names, feature_vector, ArtifactStore, Classifier, FittedModel, LogisticModel,
    LogisticParams, ModelArtifact,
};
use crate::db::models::LabeledRow;
use crate::db::Database;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::features::{workload_ratios, FeatureConfig};
use crate::pipeline::labels::{synthesize, RuleSet};

const STAGE: &str = "train";

#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Share of rows held out for evaluation
    pub test_fraction: f64,
    /// Drives both label synthesis and the train/test split
    pub seed: u64,
    pub params: LogisticParams,
    pub features: FeatureConfig,
    pub rules: RuleSet,
}

/// Deterministic shuffle-then-cut split. Returns `(train, test)` indices.
/// The test side gets `max(1, round(n * test_fraction))` rows and the train
/// side always keeps at least one.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    if n < 2 {
        return (idx, Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);
    let test_len = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
    let train = idx.split_off(test_len);
    (train, idx)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
}

/// Accuracy, log-loss and Brier score of `model` on `(x, y)`
pub fn evaluate(model: &dyn Classifier, x: &[Vec<f64>], y: &[bool]) -> anyhow::Result<Scores> {
    if x.is_empty() {
        anyhow::bail!("cannot evaluate on an empty partition");
    }
    let n = x.len() as f64;
    let mut correct = 0usize;
    let mut log_loss = 0.0;
    let mut brier = 0.0;
    for (row, &label) in x.iter().zip(y) {
        let p = model.predict_probability(row)?;
        if model.predict(row)? == label {
            correct += 1;
        }
        let t = if label { 1.0 } else { 0.0 };
        let pc = clamp_prob(p);
        log_loss -= t * pc.ln() + (1.0 - t) * (1.0 - pc).ln();
        brier += (p - t).powi(2);
    }
    Ok(Scores {
        accuracy: correct as f64 / n,
        log_loss: log_loss / n,
        brier: brier / n,
    })
}

fn has_both_classes<'a>(labels: impl Iterator<Item = &'a bool>) -> bool {
    let (mut pos, mut neg) = (false, false);
    for &l in labels {
        if l {
            pos = true;
        } else {
            neg = true;
        }
    }
    pos && neg
}

fn training_error(rows: usize, reason: impl Into<String>) -> PipelineError {
    PipelineError::Training {
        stage: STAGE,
        rows,
        reason: reason.into(),
    }
}

/// Fit a fresh classifier on the labeled rows and score it on a held-out
/// partition. Refuses datasets where evaluation would be meaningless.
pub fn fit_and_evaluate(
    labeled: &[LabeledRow],
    config: &TrainConfig,
) -> PipelineResult<(FittedModel, EvaluationSummary)> {
    let n = labeled.len();
    if n == 0 {
        return Err(training_error(0, "labeled dataset is empty"));
    }
    if n < 2 {
        return Err(training_error(n, "need at least 2 rows to hold out a test partition"));
    }
    if !has_both_classes(labeled.iter().map(|l| &l.is_risk)) {
        return Err(training_error(n, "labeled dataset contains a single class"));
    }

    let x: Vec<Vec<f64>> = labeled.iter().map(|l| feature_vector(&l.row)).collect();
    let y: Vec<bool> = labeled.iter().map(|l| l.is_risk).collect();
    let (train_idx, test_idx) = split_indices(n, config.test_fraction, config.seed);

    let x_train: Vec<Vec<f64>> = train_idx.iter().map(|&i| x[i].clone()).collect();
    let y_train: Vec<bool> = train_idx.iter().map(|&i| y[i]).collect();
    let x_test: Vec<Vec<f64>> = test_idx.iter().map(|&i| x[i].clone()).collect();
    let y_test: Vec<bool> = test_idx.iter().map(|&i| y[i]).collect();

    if !has_both_classes(y_train.iter()) {
        return Err(training_error(n, "training partition contains a single class"));
    }
    info!("Split: {} train rows, {} test rows", x_train.len(), x_test.len());

    let mut model = FittedModel::Logistic(LogisticModel::new(config.params));
    model
        .fit(&x_train, &y_train)
        .map_err(|e| training_error(n, format!("fit failed: {e:#}")))?;
    let scores = evaluate(&model, &x_test, &y_test)
        .map_err(|e| training_error(n, format!("evaluation failed: {e:#}")))?;

    let mut feature_importance: Vec<FeatureImportance> = model
        .feature_importances()
        .map(|weights| {
            feature_names()
                .into_iter()
                .zip(weights)
                .map(|(feature, importance)| FeatureImportance { feature, importance })
                .collect()
        })
        .unwrap_or_default();
    feature_importance.sort_by(|a, b| b.importance.total_cmp(&a.importance));

    let positives = y.iter().filter(|&&l| l).count();
    let summary = EvaluationSummary {
        train_rows: x_train.len(),
        test_rows: x_test.len(),
        accuracy: scores.accuracy,
        log_loss: scores.log_loss,
        brier: scores.brier,
        label_incidence: positives as f64 / n as f64,
        feature_importance,
    };
    Ok((model, summary))
}

/// Training stage: derive features, synthesize labels, fit, evaluate and
/// publish a new immutable artifact.
pub struct Trainer {
    db: Database,
    artifacts: ArtifactStore,
    config: TrainConfig,
}

impl Trainer {
    pub fn new(db: Database, artifacts: ArtifactStore, config: TrainConfig) -> Self {
        Trainer {
            db,
            artifacts,
            config,
        }
    }

    pub fn run(&self) -> PipelineResult<(ModelArtifact, PathBuf)> {
        let merged = self
            .db
            .load_merged_rows()
            .map_err(|e| PipelineError::storage(STAGE, format!("{e:#}")))?;
        if merged.is_empty() {
            return Err(training_error(0, "merged table is empty; run ingestion first"));
        }
        if let Ok(Some((completed_at, report))) = self.db.last_ingestion_run() {
            info!(
                "Training on ingestion run of {} ({} merged rows)",
                completed_at, report.merged_rows
            );
        }

        let ratios = workload_ratios(&merged, &self.config.features);
        let (labeled, label_stats) = synthesize(&merged, &ratios, &self.config.rules, self.config.seed);
        let (model, evaluation) = fit_and_evaluate(&labeled, &self.config)?;
        self.db
            .replace_labeled_rows(&labeled)
            .map_err(|e| PipelineError::storage(STAGE, format!("{e:#}")))?;
        info!(
            "Evaluation: accuracy={:.3}, log_loss={:.3}, brier={:.3}",
            evaluation.accuracy, evaluation.log_loss, evaluation.brier
        );
        if evaluation.feature_importance.is_empty() {
            warn!("Model does not expose feature importances");
        }
        for (rank, fi) in evaluation.feature_importance.iter().enumerate() {
            info!("  #{} {:<22} {:.3}", rank + 1, fi.feature, fi.importance);
        }

        let trained_at = Utc::now();
        let artifact = ModelArtifact {
            version: ModelArtifact::version_for(trained_at),
            trained_at,
            feature_names: feature_names(),
            model,
            evaluation,
            label_rules: self.config.rules.clone(),
            label_stats,
            seed: self.config.seed,
        };
        let path = self.artifacts.save(&artifact)?;
        info!("Training complete: model version {}", artifact.version);
        Ok((artifact, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{IngestionReport, MergedRow};
    use crate::pipeline::features::WorkloadRatioMode;
    use crate::pipeline::labels::{RiskRule, RuleFeature};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn merged(player: &str, day: u32, hsr: f64) -> MergedRow {
        MergedRow {
            date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            player_id: player.to_string(),
            total_distance_m: 5000.0 + hsr * 2.0,
            hsr_distance_m: hsr,
            max_speed_kmh: 28.0,
            age: 25,
            weight_kg: 75.0,
            injury_history_index: 1,
            last_vma_test: 18.0,
        }
    }

    fn labeled(hsr: f64, is_risk: bool) -> LabeledRow {
        LabeledRow {
            row: merged("A", 1, hsr),
            workload_ratio: 1.0,
            risk_probability: 0.5,
            is_risk,
        }
    }

    fn config() -> TrainConfig {
        TrainConfig {
            test_fraction: 0.2,
            seed: 42,
            params: LogisticParams::default(),
            features: FeatureConfig {
                mode: WorkloadRatioMode::Baseline,
                baseline_m: 7500.0,
            },
            // HSR alone decides the label almost surely
            rules: RuleSet {
                base_rate: 0.05,
                cap: 0.95,
                rules: vec![RiskRule::new("hsr", RuleFeature::HsrDistanceM, 800.0, 0.90)],
            },
        }
    }

    #[test]
    fn split_is_deterministic_and_disjoint() {
        let (train_a, test_a) = split_indices(50, 0.2, 7);
        let (train_b, test_b) = split_indices(50, 0.2, 7);
        assert_eq!((train_a.clone(), test_a.clone()), (train_b, test_b));
        assert_eq!(test_a.len(), 10);
        assert_eq!(train_a.len(), 40);

        let mut all: Vec<usize> = train_a.into_iter().chain(test_a).collect();
        all.sort();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn split_always_holds_out_at_least_one_row() {
        let (train, test) = split_indices(3, 0.01, 1);
        assert_eq!(test.len(), 1);
        assert_eq!(train.len(), 2);

        let (train, test) = split_indices(2, 0.99, 1);
        assert_eq!((train.len(), test.len()), (1, 1));
    }

    #[test]
    fn empty_dataset_is_a_training_error() {
        let err = fit_and_evaluate(&[], &config()).unwrap_err();
        assert!(matches!(err, PipelineError::Training { rows: 0, .. }));
    }

    #[test]
    fn single_class_dataset_is_a_training_error() {
        let rows: Vec<_> = (0..20).map(|i| labeled(i as f64 * 10.0, false)).collect();
        let err = fit_and_evaluate(&rows, &config()).unwrap_err();
        assert!(err.to_string().contains("single class"));
    }

    #[test]
    fn single_row_is_a_training_error() {
        let err = fit_and_evaluate(&[labeled(900.0, true)], &config()).unwrap_err();
        assert!(matches!(err, PipelineError::Training { rows: 1, .. }));
    }

    #[test]
    fn fit_ranks_the_deciding_feature_first() {
        let rows: Vec<_> = (0..100)
            .map(|i| {
                let hsr = 300.0 + i as f64 * 10.0;
                labeled(hsr, hsr > 800.0)
            })
            .collect();
        let (model, summary) = fit_and_evaluate(&rows, &config()).unwrap();

        assert_eq!(model.dimension(), 7);
        assert_eq!((summary.train_rows, summary.test_rows), (80, 20));
        assert!(summary.accuracy >= 0.8);
        assert!(summary.brier < 0.25);
        assert_relative_eq!(summary.label_incidence, 0.49, epsilon = 1e-12);
        // hsr and total distance carry the same signal; constants carry none
        let top: Vec<&str> = summary.feature_importance[..2]
            .iter()
            .map(|f| f.feature.as_str())
            .collect();
        assert!(top.contains(&"hsr_distance_m"));
        assert!(top.contains(&"total_distance_m"));
    }

    #[test]
    fn evaluate_scores_a_perfect_model() {
        let rows: Vec<_> = (0..100)
            .map(|i| {
                let hsr = 300.0 + i as f64 * 10.0;
                labeled(hsr, hsr > 800.0)
            })
            .collect();
        let (model, _) = fit_and_evaluate(&rows, &config()).unwrap();
        let x = vec![feature_vector(&merged("A", 1, 1200.0)), feature_vector(&merged("A", 1, 300.0))];
        let scores = evaluate(&model, &x, &[true, false]).unwrap();
        assert_relative_eq!(scores.accuracy, 1.0, epsilon = 1e-12);
        assert!(scores.log_loss < 0.5);
    }

    #[test]
    fn run_labels_trains_and_publishes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("athlete.db");
        let db = Database::open(db_path.to_str().unwrap()).unwrap();
        let rows: Vec<_> = (1..=30)
            .flat_map(|d| {
                vec![
                    merged("A", d, if d % 2 == 0 { 1000.0 } else { 200.0 }),
                    merged("B", d, if d % 2 == 0 { 200.0 } else { 1100.0 }),
                ]
            })
            .collect();
        let report = IngestionReport {
            merged_rows: rows.len(),
            ..Default::default()
        };
        db.replace_ingestion(&[], &[], &rows, &report).unwrap();

        let store = ArtifactStore::new(dir.path().join("models"));
        let trainer = Trainer::new(db, store.clone(), config());
        let (artifact, path) = trainer.run().unwrap();

        assert!(path.exists());
        assert_eq!(artifact.evaluation.test_rows, 12);
        assert_eq!(artifact.label_stats.rows, 60);
        assert_eq!(artifact.seed, 42);
        let loaded = store.load_latest(&feature_names()).unwrap();
        assert_eq!(loaded.version, artifact.version);

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM labeled_rows", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 60);
    }

    #[test]
    fn run_without_ingestion_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("athlete.db").to_str().unwrap()).unwrap();
        let trainer = Trainer::new(db, ArtifactStore::new(dir.path().join("models")), config());
        let err = trainer.run().unwrap_err();
        assert!(matches!(err, PipelineError::Training { rows: 0, .. }));
        assert!(!dir.path().join("models").exists());
    }

    #[test]
    fn single_class_run_keeps_previous_labeled_table() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("athlete.db");
        let db = Database::open(db_path.to_str().unwrap()).unwrap();
        db.replace_labeled_rows(&[labeled(900.0, true)]).unwrap();
        let rows: Vec<_> = (1..=10).map(|d| merged("A", d, 300.0)).collect();
        db.replace_ingestion(&[], &[], &rows, &IngestionReport::default())
            .unwrap();

        let mut cfg = config();
        cfg.rules = RuleSet {
            base_rate: 0.0,
            cap: 0.95,
            rules: vec![],
        };
        let trainer = Trainer::new(db, ArtifactStore::new(dir.path().join("models")), cfg);
        let err = trainer.run().unwrap_err();
        assert!(matches!(err, PipelineError::Training { .. }));

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM labeled_rows", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert!(!dir.path().join("models").exists());
    }
}
