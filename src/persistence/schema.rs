// src/persistence/schema.rs

//! Database schema and version check.

use rusqlite::Connection;

use crate::errors::{CyclerunError, Result};

/// Stored in `PRAGMA user_version`. A database with any other non-zero
/// version is refused.
pub const SCHEMA_VERSION: i64 = 2;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workflow_params (
    key TEXT PRIMARY KEY,
    value TEXT
);
CREATE TABLE IF NOT EXISTS workflow_flows (
    flow_num INTEGER PRIMARY KEY,
    start_time TEXT NOT NULL,
    description TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS task_pool (
    cycle TEXT NOT NULL,
    name TEXT NOT NULL,
    flow_nums TEXT NOT NULL,
    status TEXT NOT NULL,
    is_held INTEGER NOT NULL,
    is_queued INTEGER NOT NULL,
    is_runahead INTEGER NOT NULL,
    definition_removed INTEGER NOT NULL,
    xtriggers TEXT NOT NULL,
    PRIMARY KEY (cycle, name, flow_nums)
);
CREATE TABLE IF NOT EXISTS task_states (
    cycle TEXT NOT NULL,
    name TEXT NOT NULL,
    flow_nums TEXT NOT NULL,
    submit_num INTEGER NOT NULL,
    try_num INTEGER NOT NULL,
    submit_try_num INTEGER NOT NULL,
    status TEXT NOT NULL,
    is_manual_submit INTEGER NOT NULL,
    job_ref TEXT,
    platform TEXT,
    time_submit TEXT,
    time_start TEXT,
    time_finish TEXT,
    PRIMARY KEY (cycle, name, flow_nums)
);
CREATE TABLE IF NOT EXISTS task_outputs (
    cycle TEXT NOT NULL,
    name TEXT NOT NULL,
    flow_nums TEXT NOT NULL,
    submit_num INTEGER NOT NULL,
    outputs TEXT NOT NULL,
    PRIMARY KEY (cycle, name, flow_nums)
);
CREATE TABLE IF NOT EXISTS task_prerequisites (
    cycle TEXT NOT NULL,
    name TEXT NOT NULL,
    flow_nums TEXT NOT NULL,
    prereq_cycle TEXT NOT NULL,
    prereq_name TEXT NOT NULL,
    prereq_output TEXT NOT NULL,
    satisfied TEXT NOT NULL,
    PRIMARY KEY (cycle, name, flow_nums, prereq_cycle, prereq_name, prereq_output)
);
CREATE TABLE IF NOT EXISTS task_action_timers (
    cycle TEXT NOT NULL,
    name TEXT NOT NULL,
    flow_nums TEXT NOT NULL,
    kind TEXT NOT NULL,
    fire_time TEXT NOT NULL,
    PRIMARY KEY (cycle, name, flow_nums)
);
CREATE TABLE IF NOT EXISTS task_jobs (
    cycle TEXT NOT NULL,
    name TEXT NOT NULL,
    submit_num INTEGER NOT NULL,
    flow_nums TEXT NOT NULL,
    try_num INTEGER NOT NULL,
    is_manual_submit INTEGER NOT NULL,
    platform TEXT,
    job_ref TEXT,
    time_submit TEXT,
    submit_status INTEGER,
    time_run TEXT,
    time_run_exit TEXT,
    run_status INTEGER,
    run_signal TEXT,
    PRIMARY KEY (cycle, name, submit_num)
);
CREATE TABLE IF NOT EXISTS task_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cycle TEXT NOT NULL,
    name TEXT NOT NULL,
    flow_nums TEXT NOT NULL,
    event TEXT NOT NULL,
    old_status TEXT NOT NULL,
    new_status TEXT NOT NULL,
    time TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS xtriggers (
    signature TEXT PRIMARY KEY,
    results TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS broadcast_states (
    point TEXT NOT NULL,
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (point, namespace, key)
);
";

/// Create the schema on a fresh database, or check the version of an
/// existing one.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    match found {
        0 => {
            let existing: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )?;
            if existing > 0 {
                return Err(CyclerunError::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION,
                });
            }
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            Ok(())
        }
        v if v == SCHEMA_VERSION => Ok(()),
        _ => Err(CyclerunError::SchemaMismatch {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_then_accepts_its_own_schema() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn refuses_other_versions_and_foreign_databases() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 7).unwrap();
        assert!(matches!(
            ensure_schema(&conn),
            Err(CyclerunError::SchemaMismatch { found: 7, .. })
        ));

        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE other (x INTEGER);").unwrap();
        assert!(matches!(
            ensure_schema(&conn),
            Err(CyclerunError::SchemaMismatch { found: 0, .. })
        ));
    }
}
