//! Weak-supervision injury labels.
//!
//! No ground-truth injuries exist, so each row's label is drawn from an
//! additive probability model: a base rate plus one increment per rule whose
//! feature exceeds its threshold, clipped to `[0, cap]`.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::db::models::{LabeledRow, MergedRow};

/// Synthesized incidence outside this band usually means the rules need
/// recalibrating.
pub const TARGET_INCIDENCE: (f64, f64) = (0.10, 0.20);

/// Inputs a rule can test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFeature {
    WorkloadRatio,
    TotalDistanceM,
    HsrDistanceM,
    MaxSpeedKmh,
    Age,
    WeightKg,
    InjuryHistoryIndex,
    LastVmaTest,
}

impl RuleFeature {
    fn value(&self, row: &MergedRow, workload_ratio: f64) -> f64 {
        match self {
            RuleFeature::WorkloadRatio => workload_ratio,
            RuleFeature::TotalDistanceM => row.total_distance_m,
            RuleFeature::HsrDistanceM => row.hsr_distance_m,
            RuleFeature::MaxSpeedKmh => row.max_speed_kmh,
            RuleFeature::Age => row.age as f64,
            RuleFeature::WeightKg => row.weight_kg,
            RuleFeature::InjuryHistoryIndex => row.injury_history_index as f64,
            RuleFeature::LastVmaTest => row.last_vma_test,
        }
    }
}

/// Adds `increment` when `feature > threshold`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub name: String,
    pub feature: RuleFeature,
    pub threshold: f64,
    pub increment: f64,
}

impl RiskRule {
    pub fn new(name: &str, feature: RuleFeature, threshold: f64, increment: f64) -> Self {
        RiskRule {
            name: name.to_string(),
            feature,
            threshold,
            increment,
        }
    }

    pub fn fires(&self, row: &MergedRow, workload_ratio: f64) -> bool {
        self.feature.value(row, workload_ratio) > self.threshold
    }
}

/// Ordered rule list with its base rate and cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub base_rate: f64,
    pub cap: f64,
    pub rules: Vec<RiskRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet {
            base_rate: 0.05,
            cap: 0.95,
            rules: vec![
                RiskRule::new("overload", RuleFeature::WorkloadRatio, 1.3, 0.30),
                RiskRule::new("high_speed_running", RuleFeature::HsrDistanceM, 800.0, 0.20),
                RiskRule::new("fragile_profile", RuleFeature::InjuryHistoryIndex, 2.0, 0.15),
                RiskRule::new("age", RuleFeature::Age, 30.0, 0.10),
            ],
        }
    }
}

impl RuleSet {
    /// Load a JSON rule file (`{"base_rate":..,"cap":..,"rules":[..]}`)
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label rules {}", path.display()))?;
        let rules: RuleSet = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse label rules {}", path.display()))?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.base_rate) {
            bail!("label base rate must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.cap) {
            bail!("label cap must be between 0.0 and 1.0");
        }
        for rule in &self.rules {
            if !rule.threshold.is_finite() || !rule.increment.is_finite() {
                bail!("label rule '{}' has a non-finite threshold or increment", rule.name);
            }
        }
        Ok(())
    }

    /// Label-draw probability for one row, always within `[0, cap]`
    pub fn evaluate(&self, row: &MergedRow, workload_ratio: f64) -> f64 {
        let raw = self
            .rules
            .iter()
            .filter(|rule| rule.fires(row, workload_ratio))
            .fold(self.base_rate, |p, rule| p + rule.increment);
        raw.clamp(0.0, self.cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    pub rows: usize,
    pub positives: usize,
    pub incidence: f64,
    pub mean_ratio: f64,
}

/// Draw one Bernoulli label per row from a generator seeded with `seed`.
/// Same rows, ratios and seed give the same labels.
pub fn synthesize(
    rows: &[MergedRow],
    ratios: &[f64],
    rules: &RuleSet,
    seed: u64,
) -> (Vec<LabeledRow>, LabelStats) {
    debug_assert_eq!(rows.len(), ratios.len());
    let mut rng = StdRng::seed_from_u64(seed);
    let labeled: Vec<LabeledRow> = rows
        .iter()
        .zip(ratios)
        .map(|(row, &ratio)| {
            let p = rules.evaluate(row, ratio);
            LabeledRow {
                row: row.clone(),
                workload_ratio: ratio,
                risk_probability: p,
                is_risk: rng.gen_bool(p),
            }
        })
        .collect();

    let n = labeled.len();
    let positives = labeled.iter().filter(|l| l.is_risk).count();
    let stats = LabelStats {
        rows: n,
        positives,
        incidence: if n > 0 { positives as f64 / n as f64 } else { 0.0 },
        mean_ratio: if n > 0 {
            ratios.iter().sum::<f64>() / n as f64
        } else {
            0.0
        },
    };

    info!(
        "Label synthesis: {} rows, mean workload ratio {:.2}, incidence {:.1}% (target {:.0}-{:.0}%)",
        stats.rows,
        stats.mean_ratio,
        stats.incidence * 100.0,
        TARGET_INCIDENCE.0 * 100.0,
        TARGET_INCIDENCE.1 * 100.0
    );
    if n > 0 && !(TARGET_INCIDENCE.0..=TARGET_INCIDENCE.1).contains(&stats.incidence) {
        warn!(
            "Synthesized incidence {:.1}% is outside the target band; consider recalibrating the label rules",
            stats.incidence * 100.0
        );
    }
    (labeled, stats)
}
