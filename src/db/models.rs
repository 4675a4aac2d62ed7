use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Kind of on-pitch session recorded by the GPS vest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    Training,
    Match,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Training => "Training",
            SessionType::Match => "Match",
        }
    }
}

/// One wearable session per athlete per day, as exported by the GPS vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub player_id: String,
    pub date: NaiveDate,
    pub session_type: SessionType,
    pub duration_min: u32,
    /// Negative values are sensor faults
    pub total_distance_m: f64,
    /// Meters covered above the high-speed threshold
    pub hsr_distance_m: f64,
    pub max_speed_kmh: f64,
}

/// Daily wellness questionnaire answers (scales of 1 to 10)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellnessRecord {
    pub player_id: String,
    pub date: NaiveDate,
    pub fatigue: u8,
    pub sleep_quality: u8,
    pub soreness: u8,
    pub mood: u8,
    pub comment: Option<String>,
}

/// Static medical file and physical-test results, one per athlete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalProfile {
    pub player_id: String,
    pub age: u32,
    pub weight_kg: f64,
    /// 0 = never injured, 5 = very fragile
    pub injury_history_index: u32,
    /// Maximal aerobic speed (km/h) from the last field test
    pub last_vma_test: f64,
}

/// Cleaned telemetry joined with the athlete's medical profile.
/// `(player_id, date)` is unique across a merged table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    pub date: NaiveDate,
    pub player_id: String,
    pub total_distance_m: f64,
    pub hsr_distance_m: f64,
    pub max_speed_kmh: f64,
    pub age: u32,
    pub weight_kg: f64,
    pub injury_history_index: u32,
    pub last_vma_test: f64,
}

impl MergedRow {
    pub fn join(telemetry: &TelemetryRecord, medical: &MedicalProfile) -> Self {
        MergedRow {
            date: telemetry.date,
            player_id: telemetry.player_id.clone(),
            total_distance_m: telemetry.total_distance_m,
            hsr_distance_m: telemetry.hsr_distance_m,
            max_speed_kmh: telemetry.max_speed_kmh,
            age: medical.age,
            weight_kg: medical.weight_kg,
            injury_history_index: medical.injury_history_index,
            last_vma_test: medical.last_vma_test,
        }
    }
}

/// A merged row with its derived workload ratio and synthesized label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    #[serde(flatten)]
    pub row: MergedRow,
    pub workload_ratio: f64,
    /// Probability the label was drawn from, kept for diagnostics
    pub risk_probability: f64,
    pub is_risk: bool,
}

/// Counters produced by one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub raw_telemetry: usize,
    pub dropped_sensor_faults: usize,
    pub dropped_duplicates: usize,
    /// Cleaned telemetry rows whose player has no medical profile
    pub unmatched_rows: usize,
    /// Repeated `player_id` rows in the medical export after the first
    pub dropped_duplicate_profiles: usize,
    pub medical_profiles: usize,
    pub wellness_documents: usize,
    pub merged_rows: usize,
}
