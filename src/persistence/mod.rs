// src/persistence/mod.rs

//! SQLite persistence of the scheduler state.
//!
//! The core never touches the database. Each loop iteration it hands over a
//! [`PersistBatch`] of row changes; the async shell commits the batch in a
//! single transaction before any of that iteration's jobs are dispatched.
//! On restart, [`restart::rehydrate`] rebuilds the pool from the tables.
//!
//! Point-in-time tables (`task_pool`, `task_prerequisites`,
//! `task_action_timers`) hold exactly the live pool. History tables
//! (`task_states`, `task_outputs`, `task_jobs`, `task_events`) keep rows
//! after a proxy is pruned.

pub mod restart;
pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::broadcast::BroadcastRow;
use crate::errors::Result;
use crate::task::flow::FlowRecord;
use crate::task::{FlowNums, StateChange, TaskId, TaskProxy};

pub use restart::{Restored, rehydrate};

pub const PARAM_INITIAL_POINT: &str = "icp";
pub const PARAM_FINAL_POINT: &str = "fcp";
pub const PARAM_STOP_POINT: &str = "stopcp";
pub const PARAM_STOP_TASK: &str = "stop_task";
pub const PARAM_HOLD_POINT: &str = "holdcp";
pub const PARAM_IS_HELD: &str = "is_held";
pub const PARAM_CYCLE_POINT_TZ: &str = "cycle_point_tz";
pub const PARAM_FINGERPRINT: &str = "config_fingerprint";

pub(crate) fn time_str(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub(crate) fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrereqRow {
    pub prereq_point: String,
    pub prereq_name: String,
    pub prereq_output: String,
    pub satisfied: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRow {
    pub kind: String,
    pub fire_time: String,
}

/// One proxy as stored across `task_pool`, `task_states`, `task_outputs`,
/// `task_prerequisites` and `task_action_timers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    pub point: String,
    pub name: String,
    pub flow_nums: String,
    pub status: String,
    pub is_held: bool,
    pub is_queued: bool,
    pub is_runahead: bool,
    pub is_manual_submit: bool,
    pub definition_removed: bool,
    pub submit_num: u32,
    pub try_num: u32,
    pub submit_try_num: u32,
    pub job_ref: Option<String>,
    pub platform: Option<String>,
    /// `{"label": time}` of completed outputs.
    pub outputs: String,
    pub prerequisites: Vec<PrereqRow>,
    /// `{"label": satisfied}`.
    pub xtriggers: String,
    pub timer: Option<TimerRow>,
    pub time_submit: Option<String>,
    pub time_start: Option<String>,
    pub time_finish: Option<String>,
}

impl From<&TaskProxy> for ProxyRecord {
    fn from(p: &TaskProxy) -> Self {
        // A condition shared by several prerequisites is one row; any
        // satisfied copy wins.
        let mut conditions: BTreeMap<(String, String, String), String> = BTreeMap::new();
        for prereq in &p.prerequisites {
            for (key, state) in prereq.conditions() {
                let slot = conditions
                    .entry((key.point.to_string(), key.task.clone(), key.output.clone()))
                    .or_insert_with(|| state.as_db_str().to_string());
                if state.is_satisfied() {
                    *slot = state.as_db_str().to_string();
                }
            }
        }
        let prerequisites = conditions
            .into_iter()
            .map(|((prereq_point, prereq_name, prereq_output), satisfied)| PrereqRow {
                prereq_point,
                prereq_name,
                prereq_output,
                satisfied,
            })
            .collect();

        Self {
            point: p.id.point.to_string(),
            name: p.id.name.clone(),
            flow_nums: p.flow_nums.to_db_string(),
            status: p.status().as_str().to_string(),
            is_held: p.is_held,
            is_queued: p.is_queued,
            is_runahead: p.is_runahead,
            is_manual_submit: p.is_manual_submit,
            definition_removed: p.definition_removed,
            submit_num: p.submit_num,
            try_num: p.try_num,
            submit_try_num: p.submit_try_num,
            job_ref: p.job_ref.clone(),
            platform: p.platform.clone(),
            outputs: p.outputs.to_json(),
            prerequisites,
            xtriggers: serde_json::to_string(&p.xtriggers).unwrap_or_else(|_| "{}".to_string()),
            timer: p.retry.map(|r| TimerRow {
                kind: r.kind.as_str().to_string(),
                fire_time: time_str(r.fire_at),
            }),
            time_submit: p.submitted_time.map(time_str),
            time_start: p.started_time.map(time_str),
            time_finish: p.finished_time.map(time_str),
        }
    }
}

/// A row of `task_outputs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub point: String,
    pub name: String,
    pub flow_nums: String,
    pub submit_num: u32,
    pub outputs: String,
}

/// A change to one `task_jobs` row. `None` fields keep their stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobRow {
    pub point: String,
    pub name: String,
    pub submit_num: u32,
    pub flow_nums: String,
    pub try_num: u32,
    pub is_manual_submit: bool,
    pub platform: Option<String>,
    pub job_ref: Option<String>,
    pub time_submit: Option<String>,
    /// 0 = submitted, 1 = submission failed.
    pub submit_status: Option<i32>,
    pub time_run: Option<String>,
    pub time_run_exit: Option<String>,
    /// 0 = succeeded, 1 = failed.
    pub run_status: Option<i32>,
    pub run_signal: Option<String>,
}

/// A row of `task_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub point: String,
    pub name: String,
    pub flow_nums: String,
    pub event: String,
    pub old_status: String,
    pub new_status: String,
    pub time: String,
}

/// Everything one loop iteration changed.
#[derive(Debug, Clone, Default)]
pub struct PersistBatch {
    /// `None` deletes the parameter.
    pub params: Vec<(String, Option<String>)>,
    pub flows: Vec<FlowRecord>,
    /// Applied before `upserts`.
    pub deletes: Vec<(TaskId, FlowNums)>,
    pub upserts: Vec<ProxyRecord>,
    pub jobs: Vec<JobRow>,
    pub events: Vec<StateChange>,
    pub xtrigger_upserts: Vec<(String, BTreeMap<String, String>)>,
    pub xtrigger_deletes: Vec<String>,
    /// Replaces all broadcast rows when set.
    pub broadcasts: Option<Vec<BroadcastRow>>,
}

impl PersistBatch {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
            && self.flows.is_empty()
            && self.deletes.is_empty()
            && self.upserts.is_empty()
            && self.jobs.is_empty()
            && self.events.is_empty()
            && self.xtrigger_upserts.is_empty()
            && self.xtrigger_deletes.is_empty()
            && self.broadcasts.is_none()
    }
}

/// The workflow database.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        schema::ensure_schema(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::ensure_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True if the database holds no workflow yet.
    pub fn is_fresh(&self) -> Result<bool> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM workflow_params", [], |row| row.get(0))?;
        Ok(n == 0)
    }

    /// Apply a batch in one transaction.
    pub fn commit(&mut self, batch: &PersistBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;

        for (key, value) in &batch.params {
            match value {
                Some(v) => tx.execute(
                    "INSERT INTO workflow_params (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, v],
                )?,
                None => tx.execute("DELETE FROM workflow_params WHERE key = ?1", params![key])?,
            };
        }

        for flow in &batch.flows {
            tx.execute(
                "INSERT OR REPLACE INTO workflow_flows (flow_num, start_time, description)
                 VALUES (?1, ?2, ?3)",
                params![flow.number, time_str(flow.start_time), flow.description],
            )?;
        }

        for (id, flows) in &batch.deletes {
            let (cycle, name, flows) = (id.point.to_string(), &id.name, flows.to_db_string());
            for table in ["task_pool", "task_prerequisites", "task_action_timers"] {
                tx.execute(
                    &format!("DELETE FROM {table} WHERE cycle = ?1 AND name = ?2 AND flow_nums = ?3"),
                    params![cycle, name, flows],
                )?;
            }
        }

        for r in &batch.upserts {
            tx.execute(
                "INSERT OR REPLACE INTO task_pool
                 (cycle, name, flow_nums, status, is_held, is_queued, is_runahead, definition_removed, xtriggers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    r.point,
                    r.name,
                    r.flow_nums,
                    r.status,
                    r.is_held,
                    r.is_queued,
                    r.is_runahead,
                    r.definition_removed,
                    r.xtriggers
                ],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO task_states
                 (cycle, name, flow_nums, submit_num, try_num, submit_try_num, status, is_manual_submit,
                  job_ref, platform, time_submit, time_start, time_finish)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    r.point,
                    r.name,
                    r.flow_nums,
                    r.submit_num,
                    r.try_num,
                    r.submit_try_num,
                    r.status,
                    r.is_manual_submit,
                    r.job_ref,
                    r.platform,
                    r.time_submit,
                    r.time_start,
                    r.time_finish
                ],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO task_outputs (cycle, name, flow_nums, submit_num, outputs)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![r.point, r.name, r.flow_nums, r.submit_num, r.outputs],
            )?;
            tx.execute(
                "DELETE FROM task_prerequisites WHERE cycle = ?1 AND name = ?2 AND flow_nums = ?3",
                params![r.point, r.name, r.flow_nums],
            )?;
            for pre in &r.prerequisites {
                tx.execute(
                    "INSERT INTO task_prerequisites
                     (cycle, name, flow_nums, prereq_cycle, prereq_name, prereq_output, satisfied)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        r.point,
                        r.name,
                        r.flow_nums,
                        pre.prereq_point,
                        pre.prereq_name,
                        pre.prereq_output,
                        pre.satisfied
                    ],
                )?;
            }
            match &r.timer {
                Some(t) => tx.execute(
                    "INSERT OR REPLACE INTO task_action_timers (cycle, name, flow_nums, kind, fire_time)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![r.point, r.name, r.flow_nums, t.kind, t.fire_time],
                )?,
                None => tx.execute(
                    "DELETE FROM task_action_timers WHERE cycle = ?1 AND name = ?2 AND flow_nums = ?3",
                    params![r.point, r.name, r.flow_nums],
                )?,
            };
        }

        for j in &batch.jobs {
            tx.execute(
                "INSERT INTO task_jobs
                 (cycle, name, submit_num, flow_nums, try_num, is_manual_submit, platform, job_ref,
                  time_submit, submit_status, time_run, time_run_exit, run_status, run_signal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(cycle, name, submit_num) DO UPDATE SET
                    platform = COALESCE(excluded.platform, platform),
                    job_ref = COALESCE(excluded.job_ref, job_ref),
                    time_submit = COALESCE(excluded.time_submit, time_submit),
                    submit_status = COALESCE(excluded.submit_status, submit_status),
                    time_run = COALESCE(excluded.time_run, time_run),
                    time_run_exit = COALESCE(excluded.time_run_exit, time_run_exit),
                    run_status = COALESCE(excluded.run_status, run_status),
                    run_signal = COALESCE(excluded.run_signal, run_signal)",
                params![
                    j.point,
                    j.name,
                    j.submit_num,
                    j.flow_nums,
                    j.try_num,
                    j.is_manual_submit,
                    j.platform,
                    j.job_ref,
                    j.time_submit,
                    j.submit_status,
                    j.time_run,
                    j.time_run_exit,
                    j.run_status,
                    j.run_signal
                ],
            )?;
        }

        for e in &batch.events {
            tx.execute(
                "INSERT INTO task_events (cycle, name, flow_nums, event, old_status, new_status, time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    e.id.point.to_string(),
                    e.id.name,
                    e.flow_nums.to_db_string(),
                    e.action.as_str(),
                    e.old.as_str(),
                    e.new.as_str(),
                    time_str(e.time)
                ],
            )?;
        }

        for (signature, results) in &batch.xtrigger_upserts {
            let json = serde_json::to_string(results).map_err(anyhow::Error::from)?;
            tx.execute(
                "INSERT OR REPLACE INTO xtriggers (signature, results) VALUES (?1, ?2)",
                params![signature, json],
            )?;
        }
        for signature in &batch.xtrigger_deletes {
            tx.execute("DELETE FROM xtriggers WHERE signature = ?1", params![signature])?;
        }

        if let Some(rows) = &batch.broadcasts {
            tx.execute("DELETE FROM broadcast_states", [])?;
            for b in rows {
                tx.execute(
                    "INSERT INTO broadcast_states (point, namespace, key, value) VALUES (?1, ?2, ?3, ?4)",
                    params![b.point, b.namespace, b.key, b.value],
                )?;
            }
        }

        tx.commit()?;
        debug!(
            upserts = batch.upserts.len(),
            deletes = batch.deletes.len(),
            jobs = batch.jobs.len(),
            events = batch.events.len(),
            "committed"
        );
        Ok(())
    }

    pub fn load_params(&self) -> Result<BTreeMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM workflow_params WHERE value IS NOT NULL")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            out.insert(k, v);
        }
        Ok(out)
    }

    pub fn load_flows(&self) -> Result<Vec<FlowRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT flow_num, start_time, description FROM workflow_flows ORDER BY flow_num")?;
        let rows = stmt.query_map([], |row| {
            let start: String = row.get(1)?;
            Ok(FlowRecord {
                number: row.get(0)?,
                start_time: parse_time(&start).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                description: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// The live pool, with prerequisites and timers attached.
    pub fn load_pool(&self) -> Result<Vec<ProxyRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.cycle, p.name, p.flow_nums, p.status, p.is_held, p.is_queued, p.is_runahead,
                    p.definition_removed, p.xtriggers,
                    s.submit_num, s.try_num, s.submit_try_num, s.is_manual_submit, s.job_ref, s.platform,
                    s.time_submit, s.time_start, s.time_finish,
                    COALESCE(o.outputs, '{}'),
                    t.kind, t.fire_time
             FROM task_pool p
             LEFT JOIN task_states s
                ON s.cycle = p.cycle AND s.name = p.name AND s.flow_nums = p.flow_nums
             LEFT JOIN task_outputs o
                ON o.cycle = p.cycle AND o.name = p.name AND o.flow_nums = p.flow_nums
             LEFT JOIN task_action_timers t
                ON t.cycle = p.cycle AND t.name = p.name AND t.flow_nums = p.flow_nums
             ORDER BY p.cycle, p.name, p.flow_nums",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: Option<String> = row.get(19)?;
            let fire_time: Option<String> = row.get(20)?;
            Ok(ProxyRecord {
                point: row.get(0)?,
                name: row.get(1)?,
                flow_nums: row.get(2)?,
                status: row.get(3)?,
                is_held: row.get(4)?,
                is_queued: row.get(5)?,
                is_runahead: row.get(6)?,
                definition_removed: row.get(7)?,
                xtriggers: row.get(8)?,
                submit_num: row.get::<_, Option<u32>>(9)?.unwrap_or(0),
                try_num: row.get::<_, Option<u32>>(10)?.unwrap_or(1),
                submit_try_num: row.get::<_, Option<u32>>(11)?.unwrap_or(1),
                is_manual_submit: row.get::<_, Option<bool>>(12)?.unwrap_or(false),
                job_ref: row.get(13)?,
                platform: row.get(14)?,
                time_submit: row.get(15)?,
                time_start: row.get(16)?,
                time_finish: row.get(17)?,
                outputs: row.get(18)?,
                prerequisites: Vec::new(),
                timer: kind.zip(fire_time).map(|(kind, fire_time)| TimerRow { kind, fire_time }),
            })
        })?;
        let mut records: Vec<ProxyRecord> = rows.collect::<std::result::Result<_, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT prereq_cycle, prereq_name, prereq_output, satisfied FROM task_prerequisites
             WHERE cycle = ?1 AND name = ?2 AND flow_nums = ?3
             ORDER BY prereq_cycle, prereq_name, prereq_output",
        )?;
        for r in records.iter_mut() {
            let rows = stmt.query_map(params![r.point, r.name, r.flow_nums], |row| {
                Ok(PrereqRow {
                    prereq_point: row.get(0)?,
                    prereq_name: row.get(1)?,
                    prereq_output: row.get(2)?,
                    satisfied: row.get(3)?,
                })
            })?;
            r.prerequisites = rows.collect::<std::result::Result<_, _>>()?;
        }
        Ok(records)
    }

    pub fn load_outputs(&self) -> Result<Vec<OutputRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT cycle, name, flow_nums, submit_num, outputs FROM task_outputs")?;
        let rows = stmt.query_map([], |row| {
            Ok(OutputRow {
                point: row.get(0)?,
                name: row.get(1)?,
                flow_nums: row.get(2)?,
                submit_num: row.get(3)?,
                outputs: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Highest submit number per `(cycle, name)` across all flows.
    pub fn load_submit_nums(&self) -> Result<Vec<(String, String, u32)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT cycle, name, MAX(submit_num) FROM task_jobs GROUP BY cycle, name")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn load_xtriggers(&self) -> Result<Vec<(String, BTreeMap<String, String>)>> {
        let mut stmt = self.conn.prepare("SELECT signature, results FROM xtriggers")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            let (signature, json) = row?;
            let results = serde_json::from_str(&json).map_err(anyhow::Error::from)?;
            out.push((signature, results));
        }
        Ok(out)
    }

    pub fn load_broadcasts(&self) -> Result<Vec<BroadcastRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT point, namespace, key, value FROM broadcast_states ORDER BY point, namespace, key")?;
        let rows = stmt.query_map([], |row| {
            Ok(BroadcastRow {
                point: row.get(0)?,
                namespace: row.get(1)?,
                key: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Every job row, oldest submission first.
    pub fn load_jobs(&self) -> Result<Vec<JobRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT cycle, name, submit_num, flow_nums, try_num, is_manual_submit, platform, job_ref,
                    time_submit, submit_status, time_run, time_run_exit, run_status, run_signal
             FROM task_jobs ORDER BY cycle, name, submit_num",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(JobRow {
                point: row.get(0)?,
                name: row.get(1)?,
                submit_num: row.get(2)?,
                flow_nums: row.get(3)?,
                try_num: row.get(4)?,
                is_manual_submit: row.get(5)?,
                platform: row.get(6)?,
                job_ref: row.get(7)?,
                time_submit: row.get(8)?,
                submit_status: row.get(9)?,
                time_run: row.get(10)?,
                time_run_exit: row.get(11)?,
                run_status: row.get(12)?,
                run_signal: row.get(13)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// The transition log, in insertion order.
    pub fn load_events(&self) -> Result<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT cycle, name, flow_nums, event, old_status, new_status, time FROM task_events ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EventRow {
                point: row.get(0)?,
                name: row.get(1)?,
                flow_nums: row.get(2)?,
                event: row.get(3)?,
                old_status: row.get(4)?,
                new_status: row.get(5)?,
                time: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycling::CyclePoint;
    use crate::task::{TaskAction, TaskStatus};

    fn record(point: &str, status: &str) -> ProxyRecord {
        ProxyRecord {
            point: point.to_string(),
            name: "foo".to_string(),
            flow_nums: "[1]".to_string(),
            status: status.to_string(),
            is_held: false,
            is_queued: false,
            is_runahead: false,
            is_manual_submit: false,
            definition_removed: false,
            submit_num: 1,
            try_num: 1,
            submit_try_num: 1,
            job_ref: Some("42".to_string()),
            platform: Some("localhost".to_string()),
            outputs: r#"{"submitted":"2020-01-01T00:00:00+00:00"}"#.to_string(),
            prerequisites: vec![PrereqRow {
                prereq_point: "0".to_string(),
                prereq_name: "foo".to_string(),
                prereq_output: "succeeded".to_string(),
                satisfied: "pre-initial".to_string(),
            }],
            xtriggers: "{}".to_string(),
            timer: None,
            time_submit: None,
            time_start: None,
            time_finish: None,
        }
    }

    #[test]
    fn pool_rows_round_trip_and_delete_keeps_history() {
        let mut store = Store::open_in_memory().unwrap();
        let batch = PersistBatch {
            upserts: vec![record("1", "submitted")],
            ..Default::default()
        };
        store.commit(&batch).unwrap();
        assert_eq!(store.load_pool().unwrap(), vec![record("1", "submitted")]);

        let batch = PersistBatch {
            deletes: vec![(TaskId::new(CyclePoint::Integer(1), "foo"), FlowNums::single(1))],
            ..Default::default()
        };
        store.commit(&batch).unwrap();
        assert!(store.load_pool().unwrap().is_empty());
        assert_eq!(store.load_outputs().unwrap().len(), 1);
    }

    #[test]
    fn job_updates_merge_into_one_row() {
        let mut store = Store::open_in_memory().unwrap();
        let submit = JobRow {
            point: "1".into(),
            name: "foo".into(),
            submit_num: 1,
            flow_nums: "[1]".into(),
            try_num: 1,
            time_submit: Some("t0".into()),
            submit_status: Some(0),
            ..Default::default()
        };
        let exit = JobRow {
            run_status: Some(1),
            time_run_exit: Some("t1".into()),
            ..submit.clone()
        };
        let exit = JobRow {
            time_submit: None,
            submit_status: None,
            ..exit
        };
        store
            .commit(&PersistBatch {
                jobs: vec![submit, exit],
                ..Default::default()
            })
            .unwrap();
        let jobs = store.load_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].submit_status, Some(0));
        assert_eq!(jobs[0].time_submit.as_deref(), Some("t0"));
        assert_eq!(jobs[0].run_status, Some(1));
        assert_eq!(store.load_submit_nums().unwrap(), vec![("1".into(), "foo".into(), 1)]);
    }

    #[test]
    fn params_events_and_broadcasts() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.is_fresh().unwrap());
        let change = StateChange {
            id: TaskId::new(CyclePoint::Integer(1), "foo"),
            flow_nums: FlowNums::single(1),
            action: TaskAction::Prepare,
            old: TaskStatus::Waiting,
            new: TaskStatus::Preparing,
            time: Utc::now(),
        };
        store
            .commit(&PersistBatch {
                params: vec![(PARAM_STOP_POINT.into(), Some("5".into()))],
                events: vec![change],
                broadcasts: Some(vec![BroadcastRow {
                    point: "*".into(),
                    namespace: "root".into(),
                    key: "script".into(),
                    value: "true".into(),
                }]),
                ..Default::default()
            })
            .unwrap();
        store
            .commit(&PersistBatch {
                params: vec![(PARAM_STOP_POINT.into(), None)],
                broadcasts: Some(Vec::new()),
                ..Default::default()
            })
            .unwrap();
        assert!(store.load_params().unwrap().is_empty());
        assert!(store.load_broadcasts().unwrap().is_empty());
        let events = store.load_events().unwrap();
        assert_eq!(events[0].new_status, "preparing");
        assert_eq!(events[0].event, "prepare");
    }

    #[test]
    fn file_databases_use_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("cyclerun.db");
        let store = Store::open(&path).unwrap();
        let mode: String = store
            .conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        drop(store);
        assert!(Store::open(&path).is_ok());
    }
}
