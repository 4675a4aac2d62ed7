use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::model::{LogisticParams, TrainConfig};
use crate::pipeline::features::{FeatureConfig, WorkloadRatioMode};
use crate::pipeline::ingest::IngestConfig;
use crate::pipeline::labels::{RiskRule, RuleFeature, RuleSet};
use crate::pipeline::simulate::SimulationConfig;

/// Athlete injury-risk pipeline and scoring service
#[derive(Parser, Debug, Clone)]
#[command(name = "athlete-risk", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// SQLite database path (relational store)
    #[arg(long, env = "DATABASE_PATH", default_value = "athlete.db", global = true)]
    pub database_path: String,

    /// Document store directory (raw JSON collections)
    #[arg(long, env = "DOCUMENT_STORE_DIR", default_value = "lake", global = true)]
    pub document_store_dir: PathBuf,

    /// Directory holding the raw source exports
    #[arg(long, env = "RAW_DATA_DIR", default_value = "data", global = true)]
    pub raw_data_dir: PathBuf,

    /// Wellness survey API; when unset the raw export file is read instead
    #[arg(long, env = "WELLNESS_API_URL", global = true)]
    pub wellness_api_url: Option<String>,

    /// Directory of versioned model artifacts
    #[arg(long, env = "ARTIFACT_DIR", default_value = "models", global = true)]
    pub artifact_dir: PathBuf,

    /// Scoring service listen address
    #[arg(long, env = "SCORING_ADDR", default_value = "0.0.0.0:8000", global = true)]
    pub scoring_addr: String,

    /// Daily distance (m) the baseline workload ratio divides by
    #[arg(long, env = "WORKLOAD_BASELINE_M", default_value = "7500", global = true)]
    pub workload_baseline_m: f64,

    /// Workload ratio formula
    #[arg(
        long,
        env = "WORKLOAD_RATIO_MODE",
        value_enum,
        default_value = "baseline",
        global = true
    )]
    pub workload_ratio_mode: WorkloadRatioMode,

    /// Label probability before any rule fires
    #[arg(long, env = "LABEL_BASE_RATE", default_value = "0.05", global = true)]
    pub label_base_rate: f64,

    /// Upper clip for the label probability
    #[arg(long, env = "LABEL_CAP", default_value = "0.95", global = true)]
    pub label_cap: f64,

    #[arg(long, env = "LABEL_RATIO_THRESHOLD", default_value = "1.3", global = true)]
    pub label_ratio_threshold: f64,

    #[arg(long, env = "LABEL_RATIO_INCREMENT", default_value = "0.30", global = true)]
    pub label_ratio_increment: f64,

    #[arg(long, env = "LABEL_HSR_THRESHOLD", default_value = "800", global = true)]
    pub label_hsr_threshold: f64,

    #[arg(long, env = "LABEL_HSR_INCREMENT", default_value = "0.20", global = true)]
    pub label_hsr_increment: f64,

    #[arg(long, env = "LABEL_HISTORY_THRESHOLD", default_value = "2", global = true)]
    pub label_history_threshold: f64,

    #[arg(long, env = "LABEL_HISTORY_INCREMENT", default_value = "0.15", global = true)]
    pub label_history_increment: f64,

    #[arg(long, env = "LABEL_AGE_THRESHOLD", default_value = "30", global = true)]
    pub label_age_threshold: f64,

    #[arg(long, env = "LABEL_AGE_INCREMENT", default_value = "0.10", global = true)]
    pub label_age_increment: f64,

    /// JSON rule file replacing the four threshold rules above
    #[arg(long, env = "LABEL_RULES_PATH", global = true)]
    pub label_rules_path: Option<PathBuf>,

    /// Seed for label synthesis, the train/test split and the simulator
    #[arg(long, env = "RNG_SEED", default_value = "42", global = true)]
    pub rng_seed: u64,

    /// Share of labeled rows held out for evaluation (strictly between 0 and 1)
    #[arg(long, env = "TEST_FRACTION", default_value = "0.2", global = true)]
    pub test_fraction: f64,

    #[arg(long, env = "TRAIN_MAX_ITERS", default_value = "400", global = true)]
    pub train_max_iters: usize,

    #[arg(long, env = "TRAIN_LEARNING_RATE", default_value = "0.5", global = true)]
    pub train_learning_rate: f64,

    /// L2 penalty on standardised coefficients
    #[arg(long, env = "TRAIN_L2", default_value = "0.001", global = true)]
    pub train_l2: f64,

    /// Minimum merged / cleaned telemetry ratio before the join is rejected
    #[arg(long, env = "MIN_JOIN_COVERAGE", default_value = "0.5", global = true)]
    pub min_join_coverage: f64,

    /// Simulated squad size
    #[arg(long, env = "SIM_PLAYERS", default_value = "100", global = true)]
    pub sim_players: u32,

    /// Simulated days per athlete
    #[arg(long, env = "SIM_DAYS", default_value = "30", global = true)]
    pub sim_days: u32,

    #[arg(long, env = "SIM_START_DATE", default_value = "2026-01-01", global = true)]
    pub sim_start_date: NaiveDate,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Write synthetic raw exports into RAW_DATA_DIR
    Simulate,
    /// Load, clean and merge the raw sources
    Ingest,
    /// Derive features, synthesize labels, train and publish a model
    Train,
    /// Ingest then train
    Run,
    /// Serve risk scoring over HTTP
    Serve,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.workload_baseline_m.is_finite() && self.workload_baseline_m > 0.0) {
            anyhow::bail!("workload_baseline_m must be positive");
        }
        if !(0.0..=1.0).contains(&self.label_base_rate) {
            anyhow::bail!("label_base_rate must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.label_cap) {
            anyhow::bail!("label_cap must be between 0.0 and 1.0");
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            anyhow::bail!("test_fraction must be strictly between 0.0 and 1.0");
        }
        if self.train_max_iters == 0 {
            anyhow::bail!("train_max_iters must be at least 1");
        }
        if !(self.train_learning_rate.is_finite() && self.train_learning_rate > 0.0) {
            anyhow::bail!("train_learning_rate must be positive");
        }
        if !(self.train_l2.is_finite() && self.train_l2 >= 0.0) {
            anyhow::bail!("train_l2 must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.min_join_coverage) {
            anyhow::bail!("min_join_coverage must be between 0.0 and 1.0");
        }
        if self.sim_players == 0 || self.sim_days == 0 {
            anyhow::bail!("sim_players and sim_days must be at least 1");
        }
        Ok(())
    }

    pub fn ingest(&self) -> IngestConfig {
        IngestConfig {
            min_join_coverage: self.min_join_coverage,
        }
    }

    pub fn features(&self) -> FeatureConfig {
        FeatureConfig {
            mode: self.workload_ratio_mode,
            baseline_m: self.workload_baseline_m,
        }
    }

    /// The rule file when one is configured, otherwise the four threshold
    /// rules built from the environment
    pub fn rules(&self) -> anyhow::Result<RuleSet> {
        if let Some(path) = &self.label_rules_path {
            return RuleSet::from_file(path);
        }
        let rules = RuleSet {
            base_rate: self.label_base_rate,
            cap: self.label_cap,
            rules: vec![
                RiskRule::new(
                    "overload",
                    RuleFeature::WorkloadRatio,
                    self.label_ratio_threshold,
                    self.label_ratio_increment,
                ),
                RiskRule::new(
                    "high_speed_running",
                    RuleFeature::HsrDistanceM,
                    self.label_hsr_threshold,
                    self.label_hsr_increment,
                ),
                RiskRule::new(
                    "fragile_profile",
                    RuleFeature::InjuryHistoryIndex,
                    self.label_history_threshold,
                    self.label_history_increment,
                ),
                RiskRule::new(
                    "age",
                    RuleFeature::Age,
                    self.label_age_threshold,
                    self.label_age_increment,
                ),
            ],
        };
        rules.validate().context("invalid label rule parameters")?;
        Ok(rules)
    }

    pub fn train(&self) -> anyhow::Result<TrainConfig> {
        Ok(TrainConfig {
            test_fraction: self.test_fraction,
            seed: self.rng_seed,
            params: LogisticParams {
                max_iters: self.train_max_iters,
                learning_rate: self.train_learning_rate,
                l2: self.train_l2,
            },
            features: self.features(),
            rules: self.rules()?,
        })
    }

    pub fn simulation(&self) -> SimulationConfig {
        SimulationConfig {
            players: self.sim_players,
            days: self.sim_days,
            start_date: self.sim_start_date,
            seed: self.rng_seed,
        }
    }
}
