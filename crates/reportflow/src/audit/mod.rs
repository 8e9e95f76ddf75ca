//! Audit persistence for run and stage events.
//!
//! Writes are best-effort: [`record`] logs and swallows failures so that
//! persistence never changes the outcome of a run. The only call whose
//! failure matters is [`AuditSink::check_ready`] at run start.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod error;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use error::AuditError;
pub use memory::MemoryAuditSink;
pub use sqlite::SqliteAuditStore;

/// Stage name used for run-level records.
pub const RUN_SCOPE: &str = "pipeline";

/// Kind of audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    RunStarted,
    RunCompleted,
    RunFailed,
    StageStarted,
    StageCompleted,
    StageFailed,
    StageTiming,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::RunStarted => "run_started",
            RecordType::RunCompleted => "run_completed",
            RecordType::RunFailed => "run_failed",
            RecordType::StageStarted => "stage_started",
            RecordType::StageCompleted => "stage_completed",
            RecordType::StageFailed => "stage_failed",
            RecordType::StageTiming => "stage_timing",
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run_started" => Ok(RecordType::RunStarted),
            "run_completed" => Ok(RecordType::RunCompleted),
            "run_failed" => Ok(RecordType::RunFailed),
            "stage_started" => Ok(RecordType::StageStarted),
            "stage_completed" => Ok(RecordType::StageCompleted),
            "stage_failed" => Ok(RecordType::StageFailed),
            "stage_timing" => Ok(RecordType::StageTiming),
            other => Err(AuditError::UnknownRecordType(other.to_string())),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: String,
    pub stage_name: String,
    pub record_type: RecordType,
    pub payload: Value,
    /// Set on timing, completion and failure records.
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        run_id: impl Into<String>,
        stage_name: impl Into<String>,
        record_type: RecordType,
        payload: Value,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage_name: stage_name.into(),
            record_type,
            payload,
            duration_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Verifies the backing store is reachable.
    async fn check_ready(&self) -> Result<(), AuditError>;

    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Appends a record, logging and discarding any failure.
pub async fn record(sink: &dyn AuditSink, record: AuditRecord) {
    let run_id = record.run_id.clone();
    let record_type = record.record_type;
    if let Err(e) = sink.append(record).await {
        tracing::warn!(
            run_id = %run_id,
            record_type = %record_type,
            error = %e,
            "Failed to persist audit record"
        );
    }
}

/// Sink that accepts and drops everything.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn check_ready(&self) -> Result<(), AuditError> {
        Ok(())
    }

    async fn append(&self, _record: AuditRecord) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Returns the canonical audit database path: `~/.reportflow/data/audit.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".reportflow").join("data").join("audit.db"))
}
