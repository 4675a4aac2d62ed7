//! Synthetic raw exports for demos and end-to-end runs.
//!
//! Produces the same three files the real vendors deliver: the GPS CSV, the
//! wellness survey JSON and the medical CSV. Match days carry heavier loads
//! and roughly 5% of sessions get the sensor-fault distance.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::models::SessionType;
use crate::sources::{
    WellnessDocument, WellnessMetrics, WellnessUser, MEDICAL_FILE, TELEMETRY_FILE, WELLNESS_FILE,
};

/// Distance the vest reports when its sensor fails
pub const SENSOR_FAULT_DISTANCE_M: f64 = -100.0;
const SENSOR_FAULT_RATE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    pub players: u32,
    pub days: u32,
    pub start_date: NaiveDate,
    pub seed: u64,
}

/// Row of the GPS export, in the vendor's column order
#[derive(Debug, Serialize)]
struct TelemetryExportRow {
    date: NaiveDate,
    player_id: String,
    session_type: SessionType,
    duration_min: u32,
    total_distance_m: f64,
    hsr_distance_m: f64,
    max_speed_kmh: f64,
}

#[derive(Debug, Serialize)]
struct MedicalExportRow {
    player_id: String,
    age: u32,
    weight_kg: f64,
    injury_history_index: u32,
    last_vma_test: f64,
    medical_clearance: &'static str,
}

/// Normal distribution sampled with the Box-Muller transform
#[derive(Debug, Clone, Copy)]
struct Gaussian {
    mean: f64,
    sd: f64,
}

impl Gaussian {
    fn new(mean: f64, sd: f64) -> Self {
        Gaussian { mean, sd }
    }

    fn sample(&self, rng: &mut impl Rng) -> f64 {
        // (0, 1] keeps ln finite
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        self.mean + z * self.sd
    }
}

/// Session length range and load distributions for one kind of session
struct SessionProfile {
    minutes: (u32, u32),
    distance: Gaussian,
    hsr: Gaussian,
    max_speed: Gaussian,
}

impl SessionProfile {
    fn new(minutes: (u32, u32), distance: (f64, f64), hsr: (f64, f64), speed: (f64, f64)) -> Self {
        SessionProfile {
            minutes,
            distance: Gaussian::new(distance.0, distance.1),
            hsr: Gaussian::new(hsr.0, hsr.1),
            max_speed: Gaussian::new(speed.0, speed.1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationSummary {
    pub telemetry_rows: usize,
    pub sensor_faults: usize,
    pub wellness_documents: usize,
    pub medical_profiles: usize,
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (v * f).round() / f
}

fn player_ids(config: &SimulationConfig) -> Vec<String> {
    (1..=config.players).map(|i| format!("Player_{i}")).collect()
}

fn is_match_day(day: u32) -> bool {
    day % 7 == 6
}

fn is_post_match_day(day: u32) -> bool {
    day % 7 == 0
}

fn simulate_telemetry(
    config: &SimulationConfig,
    players: &[String],
    rng: &mut StdRng,
) -> (Vec<TelemetryExportRow>, usize) {
    let matches = SessionProfile::new((90, 100), (10500.0, 1000.0), (800.0, 200.0), (31.5, 2.0));
    let training = SessionProfile::new((60, 90), (6000.0, 1500.0), (300.0, 100.0), (28.0, 3.0));

    let mut rows = Vec::with_capacity(players.len() * config.days as usize);
    let mut faults = 0usize;
    for day in 0..config.days {
        let date = config.start_date + Duration::days(day as i64);
        let (session_type, profile) = if is_match_day(day) {
            (SessionType::Match, &matches)
        } else {
            (SessionType::Training, &training)
        };
        for player_id in players {
            let duration_min = rng.gen_range(profile.minutes.0..=profile.minutes.1);
            let mut distance = profile.distance.sample(rng);
            let hsr = profile.hsr.sample(rng);
            let max_speed = profile.max_speed.sample(rng);
            if rng.gen_bool(SENSOR_FAULT_RATE) {
                distance = SENSOR_FAULT_DISTANCE_M;
                faults += 1;
            }
            rows.push(TelemetryExportRow {
                date,
                player_id: player_id.clone(),
                session_type,
                duration_min,
                total_distance_m: round_to(distance, 2),
                hsr_distance_m: round_to(hsr, 2),
                max_speed_kmh: round_to(max_speed, 2),
            });
        }
    }
    (rows, faults)
}

fn simulate_wellness(
    config: &SimulationConfig,
    players: &[String],
    rng: &mut StdRng,
) -> Vec<WellnessDocument> {
    let survey_time = NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default();
    let mut docs = Vec::with_capacity(players.len() * config.days as usize);
    for day in 0..config.days {
        let date = config.start_date + Duration::days(day as i64);
        let timestamp = date.and_time(survey_time).and_utc();
        let post_match = is_post_match_day(day);
        for player_id in players {
            let fatigue = if post_match { rng.gen_range(6..=9) } else { rng.gen_range(1..=4) };
            let sleep_quality = rng.gen_range(1..=10);
            let soreness = if post_match { rng.gen_range(5..=9) } else { rng.gen_range(1..=3) };
            let mood = rng.gen_range(1..=10);
            docs.push(WellnessDocument {
                timestamp,
                user: WellnessUser {
                    id: player_id.clone(),
                    name: Some(format!("Name_{player_id}")),
                },
                metrics: WellnessMetrics {
                    fatigue,
                    sleep_quality,
                    soreness,
                    mood,
                },
                comments: (soreness > 8).then(|| "Leg pain".to_string()),
            });
        }
    }
    docs
}

fn simulate_medical(players: &[String], rng: &mut StdRng) -> Vec<MedicalExportRow> {
    let vma = Gaussian::new(18.0, 1.5);
    players
        .iter()
        .map(|player_id| {
            let injury_history_index = rng.gen_range(0..=5);
            MedicalExportRow {
                player_id: player_id.clone(),
                age: rng.gen_range(18..=34),
                weight_kg: rng.gen_range(65..=95) as f64,
                injury_history_index,
                last_vma_test: round_to(vma.sample(rng), 1),
                medical_clearance: if injury_history_index < 4 { "Yes" } else { "Monitor" },
            }
        })
        .collect()
}

/// Write `path` through a temporary sibling so readers never see a partial
/// export.
fn write_atomically(path: &Path, write: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to stage {}", path.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    write_atomically(path, |out| {
        let mut writer = csv::Writer::from_writer(out);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// Generate all three exports into `dir`
pub fn generate(config: &SimulationConfig, dir: &Path) -> Result<SimulationSummary> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let players = player_ids(config);

    let (telemetry, sensor_faults) = simulate_telemetry(config, &players, &mut rng);
    let wellness = simulate_wellness(config, &players, &mut rng);
    let medical = simulate_medical(&players, &mut rng);

    let path_of = |name: &str| -> PathBuf { dir.join(name) };
    write_csv(&path_of(TELEMETRY_FILE), &telemetry)?;
    write_atomically(&path_of(WELLNESS_FILE), |out| {
        serde_json::to_writer_pretty(out, &wellness)?;
        Ok(())
    })?;
    write_csv(&path_of(MEDICAL_FILE), &medical)?;

    let summary = SimulationSummary {
        telemetry_rows: telemetry.len(),
        sensor_faults,
        wellness_documents: wellness.len(),
        medical_profiles: medical.len(),
    };
    info!(
        "Simulated {} players x {} days into {}: {} GPS rows ({} sensor faults), {} wellness documents",
        config.players,
        config.days,
        dir.display(),
        summary.telemetry_rows,
        summary.sensor_faults,
        summary.wellness_documents
    );
    Ok(summary)
}
