pub mod files;
pub mod wellness_api;

pub use files::FileWellnessSource;
pub use wellness_api::HttpWellnessSource;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::db::models::{MedicalProfile, TelemetryRecord, WellnessRecord};
use crate::error::{PipelineError, PipelineResult};

pub const TELEMETRY_FILE: &str = "gps_logs_raw.csv";
pub const WELLNESS_FILE: &str = "wellness_api_response.json";
pub const MEDICAL_FILE: &str = "medical_tests.csv";

const STAGE: &str = "ingest";

/// Survey document as delivered by the wellness app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellnessDocument {
    pub timestamp: DateTime<Utc>,
    pub user: WellnessUser,
    pub metrics: WellnessMetrics,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellnessUser {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellnessMetrics {
    pub fatigue: u8,
    pub sleep_quality: u8,
    pub soreness: u8,
    pub mood: u8,
}

impl WellnessDocument {
    pub fn to_record(&self) -> WellnessRecord {
        WellnessRecord {
            player_id: self.user.id.clone(),
            date: self.timestamp.date_naive(),
            fatigue: self.metrics.fatigue,
            sleep_quality: self.metrics.sleep_quality,
            soreness: self.metrics.soreness,
            mood: self.metrics.mood,
            comment: self.comments.clone(),
        }
    }
}

/// Trait every wellness backend must implement.
#[async_trait]
pub trait WellnessSource: Send + Sync {
    /// Return every survey document currently exposed by the backend.
    async fn fetch_wellness(&self) -> Result<Vec<WellnessDocument>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Everything one ingestion run reads, before cleaning
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub telemetry: Vec<TelemetryRecord>,
    pub medical: Vec<MedicalProfile>,
    pub wellness: Vec<WellnessDocument>,
}

/// The three required raw sources
#[derive(Clone)]
pub struct RawSources {
    pub telemetry_path: PathBuf,
    pub medical_path: PathBuf,
    pub wellness: Arc<dyn WellnessSource>,
}

impl RawSources {
    pub fn new(
        telemetry_path: PathBuf,
        medical_path: PathBuf,
        wellness: Arc<dyn WellnessSource>,
    ) -> Self {
        RawSources {
            telemetry_path,
            medical_path,
            wellness,
        }
    }

    /// Read all sources concurrently. Any failure fails the whole batch.
    pub async fn load(&self) -> PipelineResult<RawBatch> {
        let telemetry = async {
            files::read_telemetry_csv(&self.telemetry_path)
                .await
                .map_err(|e| PipelineError::unavailable(STAGE, "telemetry", format!("{e:#}")))
        };
        let medical = async {
            files::read_medical_csv(&self.medical_path)
                .await
                .map_err(|e| PipelineError::unavailable(STAGE, "medical", format!("{e:#}")))
        };
        let wellness = async {
            self.wellness.fetch_wellness().await.map_err(|e| {
                PipelineError::unavailable(STAGE, self.wellness.name(), format!("{e:#}"))
            })
        };

        let (telemetry, medical, wellness) = tokio::try_join!(telemetry, medical, wellness)?;
        info!(
            "Loaded raw sources: {} telemetry rows, {} medical profiles, {} wellness documents ({})",
            telemetry.len(),
            medical.len(),
            wellness.len(),
            self.wellness.name()
        );
        Ok(RawBatch {
            telemetry,
            medical,
            wellness,
        })
    }
}
