//! In-memory audit sink for embedding and tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AuditError, AuditRecord, AuditSink, RecordType};

#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    unreachable: AtomicBool,
    failing_writes: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose readiness check fails.
    pub fn unreachable() -> Self {
        let sink = Self::default();
        sink.unreachable.store(true, Ordering::Relaxed);
        sink
    }

    /// A sink that is reachable but rejects every append.
    pub fn with_failing_writes() -> Self {
        let sink = Self::default();
        sink.failing_writes.store(true, Ordering::Relaxed);
        sink
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn records_of(&self, record_type: RecordType) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.record_type == record_type)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn check_ready(&self) -> Result<(), AuditError> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(AuditError::Unavailable("memory sink marked unreachable".into()));
        }
        Ok(())
    }

    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        if self.failing_writes.load(Ordering::Relaxed) {
            return Err(AuditError::Unavailable("memory sink rejects writes".into()));
        }
        self.records
            .lock()
            .map_err(|_| AuditError::LockPoisoned)?
            .push(record);
        Ok(())
    }
}
