//! Versioned schema for the audit store.
//!
//! Applied versions are kept in `audit_schema_version`. Each pending step
//! runs in its own transaction together with its bookkeeping row.

use rusqlite::{params, Connection};

use super::error::AuditError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    /// `(table, column)` whose presence means the step is already applied.
    unless_column: Option<(&'static str, &'static str)>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_audit_records_table",
        sql: include_str!("sql/001_create_audit_records.sql"),
        unless_column: None,
    },
    Migration {
        version: 2,
        description: "index_audit_records",
        sql: include_str!("sql/002_index_audit_records.sql"),
        unless_column: None,
    },
    Migration {
        version: 3,
        description: "add_duration_ms_to_audit_records",
        sql: include_str!("sql/003_add_duration_ms.sql"),
        unless_column: Some(("audit_records", "duration_ms")),
    },
];

/// Brings the audit schema up to date.
pub fn run_all(conn: &mut Connection) -> Result<(), AuditError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit_schema_version (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = current_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);

    for migration in pending {
        let tx = conn.transaction()?;

        let already_present = match migration.unless_column {
            Some((table, column)) => column_exists(&tx, table, column)?,
            None => false,
        };
        if already_present {
            log::debug!("Audit schema v{} already present", migration.version);
        } else {
            log::info!(
                "Applying audit schema v{}: {}",
                migration.version,
                migration.description
            );
            tx.execute_batch(migration.sql)
                .map_err(|e| AuditError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        }

        tx.execute(
            "INSERT INTO audit_schema_version (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

pub(crate) fn current_version(conn: &Connection) -> Result<u32, AuditError> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM audit_schema_version",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, AuditError> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |r| r.get(0),
    )?;
    Ok(found > 0)
}
