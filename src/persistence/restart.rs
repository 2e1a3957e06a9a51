// src/persistence/restart.rs

//! Rebuilding a pool from the database.

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::broadcast::BroadcastRow;
use crate::errors::{CyclerunError, Result};
use crate::persistence::{ProxyRecord, Store, parse_time};
use crate::pool::{Pool, ProxyKey};
use crate::task::flow::FlowRecord;
use crate::task::prerequisite::{ConditionKey, Satisfaction};
use crate::task::{FlowNums, PendingRetry, RetryKind, TaskId, TaskProxy, TaskStatus};

/// Everything besides the pool that a restart hands back to the scheduler.
#[derive(Debug, Default)]
pub struct Restored {
    pub params: BTreeMap<String, String>,
    pub flows: Vec<FlowRecord>,
    pub broadcasts: Vec<BroadcastRow>,
    pub xtriggers: Vec<(String, BTreeMap<String, String>)>,
    /// Proxies with a pending retry timer.
    pub timers: Vec<(ProxyKey, PendingRetry)>,
    /// Submitted or running when the scheduler went down.
    pub poll: Vec<ProxyKey>,
    /// Preparing when the scheduler went down; submit again.
    pub resubmit: Vec<ProxyKey>,
    /// Stored proxies whose task no longer exists.
    pub dropped: Vec<String>,
}

/// Load the stored pool into `pool`, which must be empty and built from the
/// current configuration.
pub fn rehydrate(pool: &mut Pool, store: &Store) -> Result<Restored> {
    let mut restored = Restored {
        params: store.load_params()?,
        flows: store.load_flows()?,
        broadcasts: store.load_broadcasts()?,
        xtriggers: store.load_xtriggers()?,
        ..Default::default()
    };

    let cycling = pool.cycling().clone();
    for row in store.load_outputs()? {
        let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(&row.outputs) else {
            continue;
        };
        if map.is_empty() {
            continue;
        }
        let point = cycling.parse_point(&row.point)?;
        let flows = parse_flows(&row.flow_nums)?;
        pool.output_index_mut()
            .record(&point, &row.name, &flows, row.submit_num, map.into_keys().collect());
    }

    for (point, name, submit_num) in store.load_submit_nums()? {
        let point = cycling.parse_point(&point)?;
        pool.note_submit_num(TaskId::new(point, name), submit_num);
    }

    for record in store.load_pool()? {
        let Some(proxy) = rebuild(pool, &record)? else {
            warn!(task = %format!("{}/{}", record.point, record.name), "task definition removed; dropping stored proxy");
            restored.dropped.push(format!("{}/{}", record.point, record.name));
            continue;
        };
        let status = proxy.status();
        let retry = proxy.retry;
        let key = pool.insert(proxy);
        if let Some(retry) = retry {
            restored.timers.push((key, retry));
        }
        match status {
            TaskStatus::Submitted | TaskStatus::Running => restored.poll.push(key),
            TaskStatus::Preparing => restored.resubmit.push(key),
            _ => {}
        }
    }

    info!(
        proxies = pool.len(),
        dropped = restored.dropped.len(),
        "restored task pool"
    );
    Ok(restored)
}

fn parse_flows(s: &str) -> Result<FlowNums> {
    FlowNums::from_db_str(s).map_err(|e| CyclerunError::Other(anyhow::anyhow!("bad flow_nums '{s}': {e}")))
}

/// A proxy from its stored record, or `None` if its task is gone.
fn rebuild(pool: &Pool, record: &ProxyRecord) -> Result<Option<TaskProxy>> {
    let Some(def) = pool.defs().get(&record.name).cloned() else {
        return Ok(None);
    };
    let cycling = pool.cycling();
    let point = cycling.parse_point(&record.point)?;
    let flows = parse_flows(&record.flow_nums)?;
    let status = TaskStatus::from_str(&record.status).map_err(|e| CyclerunError::Other(anyhow::anyhow!(e)))?;

    let mut proxy = TaskProxy::new(def, point, flows, pool.initial_point());
    proxy.restore_status(status);
    proxy.is_held = record.is_held;
    proxy.is_queued = record.is_queued;
    proxy.is_runahead = record.is_runahead;
    proxy.is_manual_submit = record.is_manual_submit;
    proxy.definition_removed = record.definition_removed;
    proxy.submit_num = record.submit_num;
    proxy.try_num = record.try_num;
    proxy.submit_try_num = record.submit_try_num;
    proxy.job_ref = record.job_ref.clone();
    proxy.platform = record.platform.clone();
    proxy.submitted_time = record.time_submit.as_deref().and_then(parse_time);
    proxy.started_time = record.time_start.as_deref().and_then(parse_time);
    proxy.finished_time = record.time_finish.as_deref().and_then(parse_time);
    proxy.poll_pending = status == TaskStatus::Submitted || status == TaskStatus::Running;

    proxy
        .outputs
        .restore_json(&record.outputs)
        .map_err(anyhow::Error::from)?;

    for row in &record.prerequisites {
        let Some(state) = Satisfaction::from_db_str(&row.satisfied) else {
            debug!(task = %proxy.id, state = %row.satisfied, "unknown prerequisite state");
            continue;
        };
        let key = ConditionKey {
            task: row.prereq_name.clone(),
            point: cycling.parse_point(&row.prereq_point)?,
            output: row.prereq_output.clone(),
        };
        for prereq in proxy.prerequisites.iter_mut() {
            prereq.restore_state(&key, state);
        }
    }

    if let Ok(flags) = serde_json::from_str::<BTreeMap<String, bool>>(&record.xtriggers) {
        for (label, ok) in proxy.xtriggers.iter_mut() {
            *ok = flags.get(label).copied().unwrap_or(false);
        }
    }

    proxy.retry = record.timer.as_ref().and_then(|t| {
        Some(PendingRetry {
            kind: RetryKind::from_db_str(&t.kind)?,
            fire_at: parse_time(&t.fire_time)?,
        })
    });
    Ok(Some(proxy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::config::WorkflowConfig;
    use crate::config::model::RawWorkflowConfig;
    use crate::cycling::CyclePoint;
    use crate::persistence::PersistBatch;
    use crate::task::{TaskAction, outputs};

    fn config(src: &str) -> WorkflowConfig {
        let raw: RawWorkflowConfig = toml::from_str(src).unwrap();
        WorkflowConfig::try_from(raw).unwrap()
    }

    const FLOW: &str = r#"
        [scheduling]
        cycling_mode = "integer"
        initial_cycle_point = "1"
        [scheduling.graph."P1"]
        a = ""
        b = "a"
    "#;

    fn commit(pool: &mut Pool, store: &mut Store) {
        let (upserts, deletes) = pool.take_dirty();
        store
            .commit(&PersistBatch {
                upserts,
                deletes,
                ..Default::default()
            })
            .unwrap();
        pool.mark_persisted();
    }

    #[test]
    fn restores_an_identical_pool() {
        let cfg = config(FLOW);
        let mut store = Store::open_in_memory().unwrap();
        let mut pool = Pool::new(&cfg);
        let flows = FlowNums::single(1);
        pool.spawn_initial(&flows);
        pool.release_runahead();
        let now = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let a = pool.find(&TaskId::new(CyclePoint::Integer(1), "a"), &flows).unwrap();
        pool.transition(a, TaskAction::Prepare, now).unwrap();
        pool.next_submit_num(a);
        pool.transition(a, TaskAction::JobSubmitted, now).unwrap();
        pool.complete_output(a, outputs::SUBMITTED, now);
        pool.hold(a, now);
        commit(&mut pool, &mut store);

        let mut again = Pool::new(&cfg);
        let restored = rehydrate(&mut again, &store).unwrap();
        assert_eq!(again.snapshot(), pool.snapshot());
        assert_eq!(restored.poll.len(), 1);
        assert!(again.get(restored.poll[0]).unwrap().poll_pending);
        assert_eq!(again.next_submit_num(restored.poll[0]), Some(2));
    }

    #[test]
    fn drops_proxies_of_removed_tasks() {
        let mut store = Store::open_in_memory().unwrap();
        let mut pool = Pool::new(&config(FLOW));
        pool.spawn_initial(&FlowNums::single(1));
        commit(&mut pool, &mut store);

        let narrower = config(
            r#"
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            [scheduling.graph."P1"]
            b = ""
        "#,
        );
        let mut again = Pool::new(&narrower);
        let restored = rehydrate(&mut again, &store).unwrap();
        assert!(!restored.dropped.is_empty());
        assert!(again.iter().all(|(_, p)| p.name() == "b"));
    }
}
