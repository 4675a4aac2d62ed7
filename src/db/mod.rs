use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(&schema_sql())?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    // ── Ingestion output ─────────────────────────────────────────────────────

    /// Replace the cleaned telemetry, medical and merged tables in one
    /// transaction and record the run. Readers see either the previous
    /// tables or the new ones, never a partial write.
    pub fn replace_ingestion(
        &self,
        telemetry: &[TelemetryRecord],
        medical: &[MedicalProfile],
        merged: &[MergedRow],
        report: &IngestionReport,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        stage_table(&tx, "telemetry_metrics", TELEMETRY_COLUMNS)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO telemetry_metrics__staging (
                    date, player_id, session_type, duration_min,
                    total_distance_m, hsr_distance_m, max_speed_kmh
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?;
            for t in telemetry {
                stmt.execute(params![
                    t.date,
                    t.player_id,
                    t.session_type.as_str(),
                    t.duration_min,
                    t.total_distance_m,
                    t.hsr_distance_m,
                    t.max_speed_kmh,
                ])?;
            }
        }
        swap_in(&tx, "telemetry_metrics")?;

        stage_table(&tx, "medical_profiles", MEDICAL_COLUMNS)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO medical_profiles__staging (
                    player_id, age, weight_kg, injury_history_index, last_vma_test
                 ) VALUES (?1,?2,?3,?4,?5)",
            )?;
            for m in medical {
                stmt.execute(params![
                    m.player_id,
                    m.age,
                    m.weight_kg,
                    m.injury_history_index,
                    m.last_vma_test,
                ])?;
            }
        }
        swap_in(&tx, "medical_profiles")?;

        stage_table(&tx, "merged_rows", MERGED_COLUMNS)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO merged_rows__staging (
                    date, player_id, total_distance_m, hsr_distance_m, max_speed_kmh,
                    age, weight_kg, injury_history_index, last_vma_test
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            )?;
            for r in merged {
                stmt.execute(params![
                    r.date,
                    r.player_id,
                    r.total_distance_m,
                    r.hsr_distance_m,
                    r.max_speed_kmh,
                    r.age,
                    r.weight_kg,
                    r.injury_history_index,
                    r.last_vma_test,
                ])?;
            }
        }
        swap_in(&tx, "merged_rows")?;

        tx.execute(
            "INSERT INTO ingestion_runs (
                completed_at, raw_telemetry, dropped_sensor_faults, dropped_duplicates,
                unmatched_rows, dropped_duplicate_profiles, medical_profiles,
                wellness_documents, merged_rows
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                Utc::now(),
                report.raw_telemetry as i64,
                report.dropped_sensor_faults as i64,
                report.dropped_duplicates as i64,
                report.unmatched_rows as i64,
                report.dropped_duplicate_profiles as i64,
                report.medical_profiles as i64,
                report.wellness_documents as i64,
                report.merged_rows as i64,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Load the merged training table, ordered by athlete then date
    pub fn load_merged_rows(&self) -> Result<Vec<MergedRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT date, player_id, total_distance_m, hsr_distance_m, max_speed_kmh,
                    age, weight_kg, injury_history_index, last_vma_test
             FROM merged_rows ORDER BY player_id, date",
        )?;
        let rows = stmt
            .query_map([], map_merged_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Most recent successful ingestion run, if any
    pub fn last_ingestion_run(&self) -> Result<Option<(DateTime<Utc>, IngestionReport)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT completed_at, raw_telemetry, dropped_sensor_faults, dropped_duplicates,
                    unmatched_rows, dropped_duplicate_profiles, medical_profiles,
                    wellness_documents, merged_rows
             FROM ingestion_runs ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            let count = |i: usize| -> rusqlite::Result<usize> { Ok(row.get::<_, i64>(i)? as usize) };
            Ok((
                row.get::<_, DateTime<Utc>>(0)?,
                IngestionReport {
                    raw_telemetry: count(1)?,
                    dropped_sensor_faults: count(2)?,
                    dropped_duplicates: count(3)?,
                    unmatched_rows: count(4)?,
                    dropped_duplicate_profiles: count(5)?,
                    medical_profiles: count(6)?,
                    wellness_documents: count(7)?,
                    merged_rows: count(8)?,
                },
            ))
        })?;
        Ok(rows.next().transpose()?)
    }

    // ── Labeled table ────────────────────────────────────────────────────────

    /// Replace the labeled diagnostics table
    pub fn replace_labeled_rows(&self, rows: &[LabeledRow]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        stage_table(&tx, "labeled_rows", LABELED_COLUMNS)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO labeled_rows__staging (
                    date, player_id, total_distance_m, hsr_distance_m, max_speed_kmh,
                    age, weight_kg, injury_history_index, last_vma_test,
                    workload_ratio, risk_probability, is_risk
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            )?;
            for l in rows {
                let r = &l.row;
                stmt.execute(params![
                    r.date,
                    r.player_id,
                    r.total_distance_m,
                    r.hsr_distance_m,
                    r.max_speed_kmh,
                    r.age,
                    r.weight_kg,
                    r.injury_history_index,
                    r.last_vma_test,
                    l.workload_ratio,
                    l.risk_probability,
                    l.is_risk,
                ])?;
            }
        }
        swap_in(&tx, "labeled_rows")?;
        tx.commit()?;
        Ok(())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

/// Create an empty staging copy of `table`, discarding leftovers from an
/// earlier aborted run.
fn stage_table(tx: &Transaction, table: &str, columns: &str) -> rusqlite::Result<()> {
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table}__staging;
         CREATE TABLE {table}__staging ({columns});"
    ))
}

fn swap_in(tx: &Transaction, table: &str) -> rusqlite::Result<()> {
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table};
         ALTER TABLE {table}__staging RENAME TO {table};"
    ))
}

fn map_merged_row(row: &rusqlite::Row) -> rusqlite::Result<MergedRow> {
    Ok(MergedRow {
        date: row.get(0)?,
        player_id: row.get(1)?,
        total_distance_m: row.get(2)?,
        hsr_distance_m: row.get(3)?,
        max_speed_kmh: row.get(4)?,
        age: row.get(5)?,
        weight_kg: row.get(6)?,
        injury_history_index: row.get(7)?,
        last_vma_test: row.get(8)?,
    })
}

const TELEMETRY_COLUMNS: &str = "
    date             TEXT    NOT NULL,
    player_id        TEXT    NOT NULL,
    session_type     TEXT    NOT NULL,
    duration_min     INTEGER NOT NULL,
    total_distance_m REAL    NOT NULL CHECK (total_distance_m >= 0),
    hsr_distance_m   REAL    NOT NULL,
    max_speed_kmh    REAL    NOT NULL,
    PRIMARY KEY (player_id, date)";

const MEDICAL_COLUMNS: &str = "
    player_id            TEXT    PRIMARY KEY,
    age                  INTEGER NOT NULL,
    weight_kg            REAL    NOT NULL,
    injury_history_index INTEGER NOT NULL,
    last_vma_test        REAL    NOT NULL";

const MERGED_COLUMNS: &str = "
    date                 TEXT    NOT NULL,
    player_id            TEXT    NOT NULL,
    total_distance_m     REAL    NOT NULL,
    hsr_distance_m       REAL    NOT NULL,
    max_speed_kmh        REAL    NOT NULL,
    age                  INTEGER NOT NULL,
    weight_kg            REAL    NOT NULL,
    injury_history_index INTEGER NOT NULL,
    last_vma_test        REAL    NOT NULL,
    PRIMARY KEY (player_id, date)";

const LABELED_COLUMNS: &str = "
    date                 TEXT    NOT NULL,
    player_id            TEXT    NOT NULL,
    total_distance_m     REAL    NOT NULL,
    hsr_distance_m       REAL    NOT NULL,
    max_speed_kmh        REAL    NOT NULL,
    age                  INTEGER NOT NULL,
    weight_kg            REAL    NOT NULL,
    injury_history_index INTEGER NOT NULL,
    last_vma_test        REAL    NOT NULL,
    workload_ratio       REAL    NOT NULL,
    risk_probability     REAL    NOT NULL,
    is_risk              INTEGER NOT NULL,
    PRIMARY KEY (player_id, date)";

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
fn schema_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS telemetry_metrics ({TELEMETRY_COLUMNS});
         CREATE TABLE IF NOT EXISTS medical_profiles ({MEDICAL_COLUMNS});
         CREATE TABLE IF NOT EXISTS merged_rows ({MERGED_COLUMNS});
         CREATE TABLE IF NOT EXISTS labeled_rows ({LABELED_COLUMNS});
         CREATE TABLE IF NOT EXISTS ingestion_runs (
             id                    INTEGER PRIMARY KEY AUTOINCREMENT,
             completed_at          TEXT    NOT NULL,
             raw_telemetry         INTEGER NOT NULL,
             dropped_sensor_faults INTEGER NOT NULL,
             dropped_duplicates    INTEGER NOT NULL,
             unmatched_rows        INTEGER NOT NULL,
             dropped_duplicate_profiles INTEGER NOT NULL,
             medical_profiles      INTEGER NOT NULL,
             wellness_documents    INTEGER NOT NULL,
             merged_rows           INTEGER NOT NULL
         );"
    )
}
