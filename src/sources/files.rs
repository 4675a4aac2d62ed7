use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use super::{WellnessDocument, WellnessSource};
use crate::db::models::{MedicalProfile, TelemetryRecord};

/// GPS vendor CSV export
pub async fn read_telemetry_csv(path: &Path) -> Result<Vec<TelemetryRecord>> {
    read_csv(path).await
}

/// Medical staff CSV export. Columns beyond the profile are ignored.
pub async fn read_medical_csv(path: &Path) -> Result<Vec<MedicalProfile>> {
    read_csv(path).await
}

async fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(raw.as_slice());
    let mut rows = Vec::new();
    for (i, record) in reader.deserialize().enumerate() {
        // Header is line 1
        let row: T = record.with_context(|| format!("{}: bad row at line {}", path.display(), i + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Wellness survey dump saved by the app's export job
pub struct FileWellnessSource {
    path: PathBuf,
}

impl FileWellnessSource {
    pub fn new(path: PathBuf) -> Self {
        FileWellnessSource { path }
    }
}

#[async_trait]
impl WellnessSource for FileWellnessSource {
    fn name(&self) -> &str {
        "wellness-file"
    }

    async fn fetch_wellness(&self) -> Result<Vec<WellnessDocument>> {
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let docs = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SessionType;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn reads_gps_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.csv");
        std::fs::write(
            &path,
            "date,player_id,session_type,duration_min,total_distance_m,hsr_distance_m,max_speed_kmh\n\
             2026-01-07,Player_1,Match,95,10432.5,812.1,31.2\n\
             2026-01-08,Player_1,Training,70,-100,290.0,27.4\n",
        )
        .unwrap();

        let rows = read_telemetry_csv(&path).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_type, SessionType::Match);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2026, 1, 7).unwrap());
        assert_eq!(rows[1].total_distance_m, -100.0);
    }

    #[tokio::test]
    async fn medical_export_ignores_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medical.csv");
        std::fs::write(
            &path,
            "player_id,age,weight_kg,injury_history_index,last_vma_test,medical_clearance\n\
             Player_1,31,78,4,17.6,Monitor\n",
        )
        .unwrap();

        let rows = read_medical_csv(&path).await.unwrap();
        assert_eq!(rows[0].age, 31);
        assert_eq!(rows[0].injury_history_index, 4);
        assert_eq!(rows[0].weight_kg, 78.0);
    }

    #[tokio::test]
    async fn malformed_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medical.csv");
        std::fs::write(
            &path,
            "player_id,age,weight_kg,injury_history_index,last_vma_test\n\
             Player_1,old,78,4,17.6\n",
        )
        .unwrap();
        let err = read_medical_csv(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = read_telemetry_csv(Path::new("/nonexistent/gps.csv"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[tokio::test]
    async fn reads_wellness_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wellness.json");
        std::fs::write(
            &path,
            r#"[{"timestamp":"2026-01-08T08:00:00Z","user":{"id":"Player_1","name":"Name_Player_1"},
                "metrics":{"fatigue":7,"sleep_quality":5,"soreness":9,"mood":4},"comments":"Leg pain"}]"#,
        )
        .unwrap();

        let docs = FileWellnessSource::new(path).fetch_wellness().await.unwrap();
        let record = docs[0].to_record();
        assert_eq!(record.player_id, "Player_1");
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2026, 1, 8).unwrap());
        assert_eq!(record.soreness, 9);
        assert_eq!(record.comment.as_deref(), Some("Leg pain"));
    }
}
