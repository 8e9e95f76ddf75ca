//! SQLite-backed audit store.
//!
//! Uses rusqlite with a single connection behind a `Mutex`, which is fine
//! for SQLite (it serializes writes anyway). Async callers go through
//! `spawn_blocking` so a slow disk never stalls the runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use super::{migrations, AuditError, AuditRecord, AuditSink, RecordType};

/// Thread-safe audit store handle. Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        migrations::run_all(&mut conn)?;

        log::info!("Audit store opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run_all(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, AuditError>
    where
        F: FnOnce(&Connection) -> Result<T, AuditError>,
    {
        let conn = self.conn.lock().map_err(|_| AuditError::LockPoisoned)?;
        f(&conn)
    }

    /// Inserts one record.
    pub fn insert(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let payload = serde_json::to_string(&record.payload)?;
        let duration_ms = record.duration_ms.map(|d| d as i64);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_records
                     (run_id, stage_name, record_type, payload, created_at, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.run_id,
                    record.stage_name,
                    record.record_type.as_str(),
                    payload,
                    record.created_at.to_rfc3339(),
                    duration_ms,
                ],
            )?;
            Ok(())
        })
    }

    /// All records of a run, in insertion order.
    pub fn records_for_run(&self, run_id: &str) -> Result<Vec<AuditRecord>, AuditError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, stage_name, record_type, payload, created_at, duration_ms
                 FROM audit_records WHERE run_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![run_id], RawRecord::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawRecord::into_record).collect()
        })
    }

    /// Counts records of one type for a run.
    pub fn count_by_type(&self, run_id: &str, record_type: RecordType) -> Result<u64, AuditError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM audit_records WHERE run_id = ?1 AND record_type = ?2",
                params![run_id, record_type.as_str()],
                |r| r.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    /// Sum of recorded stage timings for a run, in milliseconds.
    pub fn total_stage_time_ms(&self, run_id: &str) -> Result<u64, AuditError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(duration_ms), 0) FROM audit_records
                 WHERE run_id = ?1 AND record_type = ?2",
                params![run_id, RecordType::StageTiming.as_str()],
                |r| r.get(0),
            )?;
            Ok(total.max(0) as u64)
        })
    }
}

#[async_trait]
impl AuditSink for SqliteAuditStore {
    async fn check_ready(&self) -> Result<(), AuditError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
                Ok(())
            })
        })
        .await
        .map_err(|e| AuditError::Task(e.to_string()))?
    }

    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.insert(&record))
            .await
            .map_err(|e| AuditError::Task(e.to_string()))?
    }
}

/// A raw audit row before type conversion.
struct RawRecord {
    run_id: String,
    stage_name: String,
    record_type: String,
    payload: String,
    created_at: String,
    duration_ms: Option<i64>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            run_id: row.get("run_id")?,
            stage_name: row.get("stage_name")?,
            record_type: row.get("record_type")?,
            payload: row.get("payload")?,
            created_at: row.get("created_at")?,
            duration_ms: row.get("duration_ms")?,
        })
    }

    fn into_record(self) -> Result<AuditRecord, AuditError> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                AuditError::Sqlite(rusqlite::Error::FromSqlConversionFailure(
                    4,
                    Type::Text,
                    Box::new(e),
                ))
            })?;
        Ok(AuditRecord {
            run_id: self.run_id,
            stage_name: self.stage_name,
            record_type: self.record_type.parse()?,
            payload: serde_json::from_str(&self.payload)?,
            duration_ms: self.duration_ms.map(|d| d.max(0) as u64),
            created_at,
        })
    }
}
