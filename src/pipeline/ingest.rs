//! Ingestion & normalization: clean raw telemetry, join it with medical
//! profiles and publish the merged table.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::db::models::{IngestionReport, MedicalProfile, MergedRow, TelemetryRecord};
use crate::db::Database;
use crate::docstore::DocumentStore;
use crate::error::{PipelineError, PipelineResult};
use crate::sources::{RawBatch, RawSources};

const STAGE: &str = "ingest";

pub const TELEMETRY_COLLECTION: &str = "telemetry_raw";
pub const WELLNESS_COLLECTION: &str = "wellness_raw";
pub const WELLNESS_DAILY_COLLECTION: &str = "wellness_daily";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Minimum `merged / cleaned` ratio below which the join is considered
    /// broken
    pub min_join_coverage: f64,
}

/// Output of the cleaning rule
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedTelemetry {
    pub rows: Vec<TelemetryRecord>,
    /// Negative or non-finite readings
    pub dropped_sensor_faults: usize,
    /// Repeated `(player_id, date)` keys after the first
    pub dropped_duplicates: usize,
}

/// Drop sensor faults and repeated keys. Nothing is imputed.
pub fn clean_telemetry(raw: Vec<TelemetryRecord>) -> CleanedTelemetry {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut out = CleanedTelemetry {
        rows: Vec::with_capacity(raw.len()),
        ..Default::default()
    };
    for row in raw {
        if is_sensor_fault(&row) {
            debug!(
                "{}",
                PipelineError::DataQuality(format!(
                    "sensor fault for {} on {} (distance {})",
                    row.player_id, row.date, row.total_distance_m
                ))
            );
            out.dropped_sensor_faults += 1;
            continue;
        }
        if !seen.insert((row.player_id.clone(), row.date)) {
            debug!(
                "{}",
                PipelineError::DataQuality(format!(
                    "duplicate session for {} on {}",
                    row.player_id, row.date
                ))
            );
            out.dropped_duplicates += 1;
            continue;
        }
        out.rows.push(row);
    }
    out
}

fn is_sensor_fault(row: &TelemetryRecord) -> bool {
    let readings = [row.total_distance_m, row.hsr_distance_m, row.max_speed_kmh];
    row.total_distance_m < 0.0 || readings.iter().any(|v| !v.is_finite())
}

/// Keep the first profile of each `player_id`; the second value is how many
/// repeats were dropped.
pub fn dedupe_profiles(medical: &[MedicalProfile]) -> (Vec<MedicalProfile>, usize) {
    let mut seen = HashSet::with_capacity(medical.len());
    let mut kept = Vec::with_capacity(medical.len());
    for profile in medical {
        if seen.insert(profile.player_id.as_str()) {
            kept.push(profile.clone());
        } else {
            debug!(
                "{}",
                PipelineError::DataQuality(format!(
                    "duplicate medical profile for {}",
                    profile.player_id
                ))
            );
        }
    }
    let dropped = medical.len() - kept.len();
    (kept, dropped)
}

/// Inner join on `player_id`. Telemetry rows without a profile are dropped;
/// the second value is how many.
pub fn inner_join(
    telemetry: &[TelemetryRecord],
    medical: &[MedicalProfile],
) -> (Vec<MergedRow>, usize) {
    let profiles: HashMap<&str, &MedicalProfile> =
        medical.iter().map(|m| (m.player_id.as_str(), m)).collect();
    let mut unmatched = 0usize;
    let merged = telemetry
        .iter()
        .filter_map(|t| match profiles.get(t.player_id.as_str()) {
            Some(m) => Some(MergedRow::join(t, m)),
            None => {
                unmatched += 1;
                None
            }
        })
        .collect();
    (merged, unmatched)
}

/// Tables produced by one normalization pass, ready to publish
#[derive(Debug, Clone)]
pub struct Normalized {
    pub cleaned: CleanedTelemetry,
    pub medical: Vec<MedicalProfile>,
    pub merged: Vec<MergedRow>,
    pub report: IngestionReport,
}

/// Clean and merge an already-loaded batch. Pure apart from logging.
pub fn normalize(batch: &RawBatch, config: &IngestConfig) -> PipelineResult<Normalized> {
    let raw_telemetry = batch.telemetry.len();
    let cleaned = clean_telemetry(batch.telemetry.clone());
    if cleaned.dropped_sensor_faults > 0 {
        warn!(
            "Telemetry cleaning: {} sensor-fault rows dropped out of {}",
            cleaned.dropped_sensor_faults, raw_telemetry
        );
    }
    if cleaned.dropped_duplicates > 0 {
        warn!(
            "Telemetry cleaning: {} duplicate (player_id, date) rows dropped",
            cleaned.dropped_duplicates
        );
    }

    let (medical, dropped_duplicate_profiles) = dedupe_profiles(&batch.medical);
    if dropped_duplicate_profiles > 0 {
        warn!(
            "Medical export: {} repeated player_id rows dropped, first profile kept",
            dropped_duplicate_profiles
        );
    }

    let (merged, unmatched_rows) = inner_join(&cleaned.rows, &medical);
    if unmatched_rows > 0 {
        info!("{} telemetry rows have no medical profile and were left out", unmatched_rows);
    }
    check_join(cleaned.rows.len(), merged.len(), config.min_join_coverage)?;

    let report = IngestionReport {
        raw_telemetry,
        dropped_sensor_faults: cleaned.dropped_sensor_faults,
        dropped_duplicates: cleaned.dropped_duplicates,
        unmatched_rows,
        dropped_duplicate_profiles,
        medical_profiles: medical.len(),
        wellness_documents: batch.wellness.len(),
        merged_rows: merged.len(),
    };
    Ok(Normalized {
        cleaned,
        medical,
        merged,
        report,
    })
}

fn check_join(cleaned: usize, merged: usize, min_coverage: f64) -> PipelineResult<()> {
    if merged == 0 {
        return Err(PipelineError::Join {
            stage: STAGE,
            merged,
            cleaned,
            reason: "merged table is empty".to_string(),
        });
    }
    let coverage = merged as f64 / cleaned as f64;
    if coverage < min_coverage {
        return Err(PipelineError::Join {
            stage: STAGE,
            merged,
            cleaned,
            reason: format!("coverage {coverage:.2} below minimum {min_coverage:.2}"),
        });
    }
    Ok(())
}

/// Ingestion stage: load every source, normalize, then publish. Nothing is
/// written unless every step before publishing succeeded. The relational
/// tables are committed before the raw archives are replaced, so a failed
/// commit leaves both stores as they were.
pub struct Ingestor {
    sources: RawSources,
    db: Database,
    documents: DocumentStore,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        sources: RawSources,
        db: Database,
        documents: DocumentStore,
        config: IngestConfig,
    ) -> Self {
        Ingestor {
            sources,
            db,
            documents,
            config,
        }
    }

    pub async fn run(&self) -> PipelineResult<IngestionReport> {
        let batch = self.sources.load().await?;
        let Normalized {
            cleaned,
            medical,
            merged,
            report,
        } = normalize(&batch, &self.config)?;

        self.db
            .replace_ingestion(&cleaned.rows, &medical, &merged, &report)
            .map_err(|e| PipelineError::storage(STAGE, format!("relational store: {e:#}")))?;

        let wellness_daily: Vec<_> = batch.wellness.iter().map(|d| d.to_record()).collect();
        self.documents
            .replace_collection(WELLNESS_COLLECTION, &batch.wellness)
            .and_then(|_| {
                self.documents
                    .replace_collection(WELLNESS_DAILY_COLLECTION, &wellness_daily)
            })
            .and_then(|_| {
                self.documents
                    .replace_collection(TELEMETRY_COLLECTION, &batch.telemetry)
            })
            .map_err(|e| PipelineError::storage(STAGE, format!("document store: {e:#}")))?;

        info!(
            "Ingestion complete: raw={}, sensor_faults={}, duplicates={}, unmatched={}, duplicate_profiles={}, merged={}",
            report.raw_telemetry,
            report.dropped_sensor_faults,
            report.dropped_duplicates,
            report.unmatched_rows,
            report.dropped_duplicate_profiles,
            report.merged_rows
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SessionType;
    use crate::sources::{FileWellnessSource, WellnessDocument};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn telemetry(player: &str, day: u32, distance: f64) -> TelemetryRecord {
        TelemetryRecord {
            player_id: player.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            session_type: SessionType::Training,
            duration_min: 75,
            total_distance_m: distance,
            hsr_distance_m: 300.0,
            max_speed_kmh: 28.0,
        }
    }

    fn profile(player: &str) -> MedicalProfile {
        MedicalProfile {
            player_id: player.to_string(),
            age: 25,
            weight_kg: 76.0,
            injury_history_index: 1,
            last_vma_test: 18.2,
        }
    }

    fn config() -> IngestConfig {
        IngestConfig {
            min_join_coverage: 0.0,
        }
    }

    #[test]
    fn negative_distances_are_dropped_and_counted() {
        let raw = vec![
            telemetry("A", 1, 6000.0),
            telemetry("A", 2, -100.0),
            telemetry("B", 1, -0.5),
            telemetry("B", 2, 0.0),
        ];
        let cleaned = clean_telemetry(raw);
        assert_eq!(cleaned.dropped_sensor_faults, 2);
        assert_eq!(cleaned.rows.len(), 2);
        assert!(cleaned.rows.iter().all(|r| r.total_distance_m >= 0.0));
    }

    #[test]
    fn non_finite_readings_count_as_sensor_faults() {
        let mut nan_speed = telemetry("A", 2, 6000.0);
        nan_speed.max_speed_kmh = f64::NAN;
        let cleaned = clean_telemetry(vec![telemetry("A", 1, f64::NAN), nan_speed]);
        assert_eq!(cleaned.dropped_sensor_faults, 2);
        assert!(cleaned.rows.is_empty());
    }

    #[test]
    fn duplicate_keys_keep_first_occurrence() {
        let cleaned = clean_telemetry(vec![
            telemetry("A", 1, 6000.0),
            telemetry("A", 1, 7000.0),
        ]);
        assert_eq!(cleaned.dropped_duplicates, 1);
        assert_eq!(cleaned.rows, vec![telemetry("A", 1, 6000.0)]);
    }

    #[test]
    fn join_keeps_only_players_with_profiles() {
        // Telemetry for {A, B}, profiles for {A, C}
        let t = vec![
            telemetry("A", 1, 6000.0),
            telemetry("B", 1, 6500.0),
            telemetry("A", 2, 7000.0),
        ];
        let m = vec![profile("A"), profile("C")];
        let (merged, unmatched) = inner_join(&t, &m);
        assert_eq!(unmatched, 1);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|r| r.player_id == "A"));
        assert_eq!(merged[1].total_distance_m, 7000.0);
        assert_eq!(merged[1].last_vma_test, 18.2);
    }

    #[test]
    fn repeated_profiles_keep_first_and_are_counted() {
        let mut second = profile("A");
        second.age = 33;
        let batch = RawBatch {
            telemetry: vec![telemetry("A", 1, 6000.0)],
            medical: vec![profile("A"), second, profile("B")],
            wellness: vec![],
        };
        let out = normalize(&batch, &config()).unwrap();
        assert_eq!(out.report.dropped_duplicate_profiles, 1);
        assert_eq!(out.report.medical_profiles, 2);
        assert_eq!(out.medical, vec![profile("A"), profile("B")]);
        assert_eq!(out.merged.len(), 1);
        assert_eq!(out.merged[0].age, 25);
    }

    #[test]
    fn empty_join_is_fatal() {
        let batch = RawBatch {
            telemetry: vec![telemetry("B", 1, 6000.0)],
            medical: vec![profile("C")],
            wellness: vec![],
        };
        let err = normalize(&batch, &config()).unwrap_err();
        assert!(matches!(err, PipelineError::Join { merged: 0, cleaned: 1, .. }));
    }

    #[test]
    fn low_join_coverage_is_fatal() {
        let batch = RawBatch {
            telemetry: vec![
                telemetry("A", 1, 6000.0),
                telemetry("B", 1, 6000.0),
                telemetry("C", 1, 6000.0),
                telemetry("D", 1, 6000.0),
            ],
            medical: vec![profile("A")],
            wellness: vec![],
        };
        let cfg = IngestConfig {
            min_join_coverage: 0.5,
        };
        let err = normalize(&batch, &cfg).unwrap_err();
        assert!(matches!(err, PipelineError::Join { merged: 1, cleaned: 4, .. }));
    }

    #[test]
    fn report_counts_every_drop() {
        let batch = RawBatch {
            telemetry: vec![
                telemetry("A", 1, 6000.0),
                telemetry("A", 2, -100.0),
                telemetry("A", 2, 5000.0),
                telemetry("A", 2, 5100.0),
                telemetry("B", 1, 6000.0),
            ],
            medical: vec![profile("A")],
            wellness: vec![],
        };
        let Normalized { merged, report, .. } = normalize(&batch, &config()).unwrap();
        assert_eq!(report.raw_telemetry, 5);
        assert_eq!(report.dropped_sensor_faults, 1);
        assert_eq!(report.dropped_duplicates, 1);
        assert_eq!(report.unmatched_rows, 1);
        assert_eq!(report.merged_rows, 2);
        assert_eq!(merged.len(), 2);
    }

    fn write_sources(dir: &std::path::Path, with_medical: bool) -> RawSources {
        write_sources_with(
            dir,
            with_medical.then_some(
                "player_id,age,weight_kg,injury_history_index,last_vma_test\n\
                 A,25,76,1,18.2\n\
                 B,32,81,3,17.1\n",
            ),
        )
    }

    fn write_sources_with(dir: &std::path::Path, medical_csv: Option<&str>) -> RawSources {
        let gps = dir.join("gps.csv");
        std::fs::write(
            &gps,
            "date,player_id,session_type,duration_min,total_distance_m,hsr_distance_m,max_speed_kmh\n\
             2026-01-01,A,Training,70,6000,300,28\n\
             2026-01-02,A,Training,70,-100,300,28\n\
             2026-01-01,B,Match,95,10500,800,31\n",
        )
        .unwrap();
        let medical = dir.join("medical.csv");
        if let Some(csv) = medical_csv {
            std::fs::write(&medical, csv).unwrap();
        }
        let wellness = dir.join("wellness.json");
        let doc: WellnessDocument = serde_json::from_str(
            r#"{"timestamp":"2026-01-01T08:00:00Z","user":{"id":"A","name":"Name_A"},
                "metrics":{"fatigue":2,"sleep_quality":8,"soreness":1,"mood":7},"comments":null}"#,
        )
        .unwrap();
        std::fs::write(&wellness, serde_json::to_string(&vec![doc]).unwrap()).unwrap();
        RawSources::new(gps, medical, Arc::new(FileWellnessSource::new(wellness)))
    }

    #[tokio::test]
    async fn run_publishes_merged_table_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let sources = write_sources(dir.path(), true);
        let db = Database::open(dir.path().join("a.db").to_str().unwrap()).unwrap();
        let docs = DocumentStore::open(dir.path().join("lake")).unwrap();

        let report = Ingestor::new(sources, db.clone(), docs.clone(), config())
            .run()
            .await
            .unwrap();
        assert_eq!(report.dropped_sensor_faults, 1);
        assert_eq!(report.merged_rows, 2);
        assert_eq!(report.wellness_documents, 1);
        assert_eq!(db.load_merged_rows().unwrap().len(), 2);

        let archived: Vec<TelemetryRecord> = docs.read_collection(TELEMETRY_COLLECTION).unwrap();
        assert_eq!(archived.len(), 3);
        let daily: Vec<crate::db::models::WellnessRecord> =
            docs.read_collection(WELLNESS_DAILY_COLLECTION).unwrap();
        assert_eq!(daily[0].player_id, "A");
    }

    #[tokio::test]
    async fn missing_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sources = write_sources(dir.path(), false);
        let db = Database::open(dir.path().join("a.db").to_str().unwrap()).unwrap();
        let docs = DocumentStore::open(dir.path().join("lake")).unwrap();

        let err = Ingestor::new(sources, db.clone(), docs.clone(), config())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
        assert!(db.load_merged_rows().unwrap().is_empty());
        assert!(db.last_ingestion_run().unwrap().is_none());
        let archived: Vec<TelemetryRecord> = docs.read_collection(TELEMETRY_COLLECTION).unwrap();
        assert!(archived.is_empty());
    }

    #[tokio::test]
    async fn repeated_medical_rows_are_published_once() {
        let dir = tempfile::tempdir().unwrap();
        let sources = write_sources_with(
            dir.path(),
            Some(
                "player_id,age,weight_kg,injury_history_index,last_vma_test\n\
                 A,25,76,1,18.2\n\
                 A,40,90,4,15.0\n\
                 B,32,81,3,17.1\n",
            ),
        );
        let db = Database::open(dir.path().join("a.db").to_str().unwrap()).unwrap();
        let docs = DocumentStore::open(dir.path().join("lake")).unwrap();

        let report = Ingestor::new(sources, db.clone(), docs, config())
            .run()
            .await
            .unwrap();
        assert_eq!(report.dropped_duplicate_profiles, 1);
        assert_eq!(report.medical_profiles, 2);

        let rows = db.load_merged_rows().unwrap();
        let a = rows.iter().find(|r| r.player_id == "A").unwrap();
        assert_eq!(a.age, 25);
        let (_, last) = db.last_ingestion_run().unwrap().unwrap();
        assert_eq!(last.dropped_duplicate_profiles, 1);
    }

    #[tokio::test]
    async fn failed_commit_leaves_archives_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sources = write_sources(dir.path(), true);
        let db = Database::open(dir.path().join("a.db").to_str().unwrap()).unwrap();
        let docs = DocumentStore::open(dir.path().join("lake")).unwrap();

        // A table the staging swap cannot drop makes the commit fail
        {
            let conn = rusqlite::Connection::open(dir.path().join("a.db")).unwrap();
            conn.execute_batch(
                "CREATE VIEW merged_rows__staging AS SELECT 1 AS blocked;",
            )
            .unwrap();
        }

        let err = Ingestor::new(sources, db.clone(), docs.clone(), config())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage { .. }));
        let archived: Vec<TelemetryRecord> = docs.read_collection(TELEMETRY_COLLECTION).unwrap();
        assert!(archived.is_empty());
        assert!(db.last_ingestion_run().unwrap().is_none());
    }
}
