//! Workload-intensity ratio.
//!
//! `Baseline` divides the day's distance by a fixed constant. It is a proxy:
//! the sports-science acute:chronic workload ratio compares a rolling 7-day
//! load against a rolling 28-day load per athlete, which is what `Rolling`
//! computes. `Baseline` stays the default so labels match the historical
//! pipeline.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::models::MergedRow;

const ACUTE_DAYS: i64 = 7;
const CHRONIC_DAYS: i64 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadRatioMode {
    /// Day distance over a fixed baseline
    Baseline,
    /// Trailing 7-day mean distance over trailing 28-day mean distance
    Rolling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureConfig {
    pub mode: WorkloadRatioMode,
    /// Meters; only used by `Baseline`
    pub baseline_m: f64,
}

/// Workload ratio for every row, in input order
pub fn workload_ratios(rows: &[MergedRow], config: &FeatureConfig) -> Vec<f64> {
    match config.mode {
        WorkloadRatioMode::Baseline => rows
            .iter()
            .map(|r| baseline_ratio(r.total_distance_m, config.baseline_m))
            .collect(),
        WorkloadRatioMode::Rolling => rolling_ratios(rows),
    }
}

pub fn baseline_ratio(total_distance_m: f64, baseline_m: f64) -> f64 {
    total_distance_m / baseline_m
}

/// Calendar-window means per athlete. Missing days count as zero load, both
/// windows include the current day, and the ratio is 0 when the chronic mean
/// is 0.
fn rolling_ratios(rows: &[MergedRow]) -> Vec<f64> {
    let mut by_player: HashMap<&str, Vec<(chrono::NaiveDate, f64)>> = HashMap::new();
    for r in rows {
        by_player
            .entry(r.player_id.as_str())
            .or_default()
            .push((r.date, r.total_distance_m));
    }

    rows.iter()
        .map(|r| {
            let history = &by_player[r.player_id.as_str()];
            let window_sum = |days: i64| -> f64 {
                let start = r.date - Duration::days(days - 1);
                history
                    .iter()
                    .filter(|(d, _)| *d >= start && *d <= r.date)
                    .map(|(_, load)| load)
                    .sum()
            };
            let acute = window_sum(ACUTE_DAYS) / ACUTE_DAYS as f64;
            let chronic = window_sum(CHRONIC_DAYS) / CHRONIC_DAYS as f64;
            if chronic > 0.0 {
                acute / chronic
            } else {
                0.0
            }
        })
        .collect()
}
