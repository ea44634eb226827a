//! Reconcile state store.
//!
//! SQLite table keyed by partition holding the last observed highwater and
//! the outcome of the previous reconcile pass. The store answers the single
//! question the reconcile loop cares about: does this partition need
//! another pass?

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS reconcile_state (
    partition TEXT PRIMARY KEY,
    last_highwater INTEGER NOT NULL,
    manifest_revision INTEGER NOT NULL,
    ledger_record_count INTEGER NOT NULL,
    processed_count INTEGER NOT NULL,
    missing_count INTEGER NOT NULL,
    replayed_count INTEGER NOT NULL,
    status TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileState {
    pub partition: String,
    pub last_highwater: u64,
    pub manifest_revision: u64,
    pub ledger_record_count: u64,
    pub processed_count: u64,
    pub missing_count: u64,
    pub replayed_count: u64,
    pub status: String,
    pub duration_ms: u64,
}

pub struct ReconcileStateStore {
    conn: Mutex<Connection>,
}

impl ReconcileStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open reconcile state db at {:?}", path.as_ref()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("apply reconcile state schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory reconcile db")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("apply reconcile state schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, partition: &str) -> Result<Option<ReconcileState>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT partition, last_highwater, manifest_revision, ledger_record_count,
                    processed_count, missing_count, replayed_count, status, duration_ms
             FROM reconcile_state WHERE partition = ?1",
            params![partition],
            |row| {
                Ok(ReconcileState {
                    partition: row.get(0)?,
                    last_highwater: row.get::<_, i64>(1)? as u64,
                    manifest_revision: row.get::<_, i64>(2)? as u64,
                    ledger_record_count: row.get::<_, i64>(3)? as u64,
                    processed_count: row.get::<_, i64>(4)? as u64,
                    missing_count: row.get::<_, i64>(5)? as u64,
                    replayed_count: row.get::<_, i64>(6)? as u64,
                    status: row.get(7)?,
                    duration_ms: row.get::<_, i64>(8)? as u64,
                })
            },
        )
        .optional()
        .context("query reconcile state")
    }

    /// Whether the partition needs reconciling against the current ledger
    /// position. Returns `(needs_reconcile, reason)`.
    pub fn needs_reconcile(
        &self,
        partition: &str,
        current_highwater: u64,
        current_revision: u64,
    ) -> Result<(bool, String)> {
        match self.get(partition)? {
            None => Ok((true, "never_reconciled".to_string())),
            Some(state) => {
                if current_highwater > state.last_highwater
                    || current_revision != state.manifest_revision
                {
                    Ok((
                        true,
                        format!(
                            "highwater_increased ({} -> {current_highwater}, rev {} -> {current_revision})",
                            state.last_highwater, state.manifest_revision
                        ),
                    ))
                } else if state.status == "FAILED" {
                    Ok((true, "previous_run_failed".to_string()))
                } else {
                    Ok((false, "up_to_date".to_string()))
                }
            }
        }
    }

    pub fn save(&self, state: &ReconcileState) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reconcile_state
                (partition, last_highwater, manifest_revision, ledger_record_count,
                 processed_count, missing_count, replayed_count, status, duration_ms, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(partition) DO UPDATE SET
                last_highwater = excluded.last_highwater,
                manifest_revision = excluded.manifest_revision,
                ledger_record_count = excluded.ledger_record_count,
                processed_count = excluded.processed_count,
                missing_count = excluded.missing_count,
                replayed_count = excluded.replayed_count,
                status = excluded.status,
                duration_ms = excluded.duration_ms,
                updated_at = excluded.updated_at",
            params![
                state.partition,
                state.last_highwater as i64,
                state.manifest_revision as i64,
                state.ledger_record_count as i64,
                state.processed_count as i64,
                state.missing_count as i64,
                state.replayed_count as i64,
                state.status,
                state.duration_ms as i64,
                Utc::now().timestamp(),
            ],
        )
        .context("upsert reconcile state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(partition: &str, highwater: u64, revision: u64, status: &str) -> ReconcileState {
        ReconcileState {
            partition: partition.into(),
            last_highwater: highwater,
            manifest_revision: revision,
            ledger_record_count: highwater,
            processed_count: highwater,
            missing_count: 0,
            replayed_count: 0,
            status: status.into(),
            duration_ms: 5,
        }
    }

    #[test]
    fn unknown_partition_needs_reconcile() {
        let store = ReconcileStateStore::open_in_memory().unwrap();
        let (needs, reason) = store.needs_reconcile("2025-06-01", 10, 1).unwrap();
        assert!(needs);
        assert_eq!(reason, "never_reconciled");
    }

    #[test]
    fn highwater_growth_triggers_rereconcile() {
        let store = ReconcileStateStore::open_in_memory().unwrap();
        store.save(&state("2025-06-01", 10, 1, "COMPLETED")).unwrap();

        let (needs, _) = store.needs_reconcile("2025-06-01", 10, 1).unwrap();
        assert!(!needs);

        let (needs, reason) = store.needs_reconcile("2025-06-01", 12, 1).unwrap();
        assert!(needs);
        assert!(reason.contains("highwater_increased"));

        let (needs, _) = store.needs_reconcile("2025-06-01", 10, 2).unwrap();
        assert!(needs, "revision change must trigger reconcile");
    }

    #[test]
    fn failed_run_is_retried() {
        let store = ReconcileStateStore::open_in_memory().unwrap();
        store.save(&state("2025-06-01", 10, 1, "FAILED")).unwrap();
        let (needs, reason) = store.needs_reconcile("2025-06-01", 10, 1).unwrap();
        assert!(needs);
        assert_eq!(reason, "previous_run_failed");
    }

    #[test]
    fn save_is_upsert() {
        let store = ReconcileStateStore::open_in_memory().unwrap();
        store.save(&state("2025-06-01", 10, 1, "COMPLETED")).unwrap();
        store.save(&state("2025-06-01", 15, 2, "PARTIAL")).unwrap();
        let loaded = store.get("2025-06-01").unwrap().unwrap();
        assert_eq!(loaded.last_highwater, 15);
        assert_eq!(loaded.status, "PARTIAL");
    }
}
