// src/pool/mod.rs

//! The task pool.
//!
//! Proxies live in an arena keyed by a stable [`ProxyKey`], with a secondary
//! index by `point/name`. Several proxies may share a `point/name` as long as
//! their flows are disjoint; spawning into an overlapping flow merges
//! instead. All spawning, pruning and status changes go through `Pool` so
//! that every change lands in the dirty set that persistence drains.

pub mod matcher;
pub mod output_index;
pub mod queue;
pub mod reload;
pub mod runahead;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::model::{RunaheadLimit, WorkflowConfig};
use crate::cycling::{CyclePoint, CyclingContext};
use crate::persistence::ProxyRecord;
use crate::task::outputs;
use crate::task::prerequisite::{ConditionKey, Satisfaction};
use crate::task::{FlowNums, StateChange, TaskAction, TaskId, TaskProxy, TaskStatus, TransitionError};
use crate::taskdef::{TaskDef, TaskDefStore};

pub use output_index::OutputIndex;
pub use queue::TaskQueues;

/// Stable arena key of a proxy. Never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyKey(pub u64);

/// Upper bound on pre-initial instances spawned per graph section at start.
const MAX_PRE_INITIAL_SPAWN: usize = 1_000;

#[derive(Debug)]
pub struct Pool {
    defs: Arc<TaskDefStore>,
    cycling: CyclingContext,
    runahead: RunaheadLimit,
    proxies: BTreeMap<ProxyKey, TaskProxy>,
    index: HashMap<TaskId, Vec<ProxyKey>>,
    next_key: u64,
    queues: TaskQueues,
    output_index: OutputIndex,
    /// Highest submit number per `point/name`, across flows.
    submit_nums: HashMap<TaskId, u32>,
    runahead_limit_point: Option<CyclePoint>,
    stop_point: Option<CyclePoint>,
    hold_point: Option<CyclePoint>,
    hold_all: bool,
    changes: Vec<StateChange>,
    dirty: BTreeSet<ProxyKey>,
    in_commit: BTreeSet<ProxyKey>,
    deleted: Vec<(TaskId, FlowNums)>,
}

impl Pool {
    pub fn new(config: &WorkflowConfig) -> Self {
        Self {
            defs: config.defs.clone(),
            cycling: config.cycling.clone(),
            runahead: config.runahead.clone(),
            proxies: BTreeMap::new(),
            index: HashMap::new(),
            next_key: 1,
            queues: TaskQueues::new(&config.queues),
            output_index: OutputIndex::new(),
            submit_nums: HashMap::new(),
            runahead_limit_point: None,
            stop_point: config.stop_point.clone(),
            hold_point: config.hold_point.clone(),
            hold_all: false,
            changes: Vec::new(),
            dirty: BTreeSet::new(),
            in_commit: BTreeSet::new(),
            deleted: Vec::new(),
        }
    }

    pub fn defs(&self) -> &Arc<TaskDefStore> {
        &self.defs
    }

    pub fn cycling(&self) -> &CyclingContext {
        &self.cycling
    }

    pub fn initial_point(&self) -> &CyclePoint {
        &self.cycling.initial
    }

    pub fn final_point(&self) -> Option<&CyclePoint> {
        self.cycling.final_point.as_ref()
    }

    pub fn stop_point(&self) -> Option<&CyclePoint> {
        self.stop_point.as_ref()
    }

    pub fn set_stop_point(&mut self, point: Option<CyclePoint>) {
        self.stop_point = point;
    }

    pub fn hold_point(&self) -> Option<&CyclePoint> {
        self.hold_point.as_ref()
    }

    pub fn set_hold_point(&mut self, point: Option<CyclePoint>) {
        self.hold_point = point;
    }

    pub fn is_hold_all(&self) -> bool {
        self.hold_all
    }

    pub fn set_hold_all(&mut self, hold: bool) {
        self.hold_all = hold;
    }

    pub fn runahead_limit_point(&self) -> Option<&CyclePoint> {
        self.runahead_limit_point.as_ref()
    }

    pub fn output_index(&self) -> &OutputIndex {
        &self.output_index
    }

    pub(crate) fn output_index_mut(&mut self) -> &mut OutputIndex {
        &mut self.output_index
    }

    pub fn queues(&self) -> &TaskQueues {
        &self.queues
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn get(&self, key: ProxyKey) -> Option<&TaskProxy> {
        self.proxies.get(&key)
    }

    /// Mutable access; marks the proxy dirty for persistence.
    pub fn get_mut(&mut self, key: ProxyKey) -> Option<&mut TaskProxy> {
        let proxy = self.proxies.get_mut(&key)?;
        self.dirty.insert(key);
        Some(proxy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProxyKey, &TaskProxy)> {
        self.proxies.iter().map(|(k, p)| (*k, p))
    }

    pub fn keys(&self) -> Vec<ProxyKey> {
        self.proxies.keys().copied().collect()
    }

    pub fn keys_for(&self, id: &TaskId) -> &[ProxyKey] {
        self.index.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The proxy for `id` whose flows overlap `flows`.
    pub fn find(&self, id: &TaskId, flows: &FlowNums) -> Option<ProxyKey> {
        self.keys_for(id).iter().copied().find(|k| {
            self.proxies
                .get(k)
                .is_some_and(|p| p.flow_nums.overlaps(flows) || (flows.is_none() && p.flow_nums.is_none()))
        })
    }

    /// Union of the flows of every proxy in the pool.
    pub fn active_flows(&self) -> FlowNums {
        let mut flows = FlowNums::none();
        for p in self.proxies.values() {
            flows.merge(&p.flow_nums);
        }
        flows
    }

    /// Insert a proxy built elsewhere (restart).
    pub(crate) fn insert(&mut self, proxy: TaskProxy) -> ProxyKey {
        let key = ProxyKey(self.next_key);
        self.next_key += 1;
        let submits = self.submit_nums.entry(proxy.id.clone()).or_insert(0);
        *submits = (*submits).max(proxy.submit_num);
        self.index.entry(proxy.id.clone()).or_default().push(key);
        if proxy.is_queued {
            self.queues
                .push(key, &proxy.def.queue, proxy.id.point.clone(), proxy.def.decl_index);
        }
        self.proxies.insert(key, proxy);
        self.dirty.insert(key);
        key
    }

    pub(crate) fn note_submit_num(&mut self, id: TaskId, submit_num: u32) {
        let n = self.submit_nums.entry(id).or_insert(0);
        *n = (*n).max(submit_num);
    }

    /// Spawn `def` at `point` in `flows`, or merge into an existing proxy
    /// whose flows overlap. Returns `None` if nothing was spawned or merged:
    /// past the final point, not on a sequence, or already run in these
    /// flows.
    pub fn spawn(&mut self, def: &Arc<TaskDef>, point: CyclePoint, flows: FlowNums) -> Option<ProxyKey> {
        if self.final_point().is_some_and(|f| point > *f) || !def.is_valid_point(&point) {
            return None;
        }
        let id = TaskId::new(point.clone(), def.name.clone());
        if let Some(key) = self.find(&id, &flows) {
            if let Some(proxy) = self.proxies.get_mut(&key) {
                let before = proxy.flow_nums.clone();
                if proxy.flow_nums.merge(&flows) {
                    debug!(task = %id, flow = %proxy.flow_nums, "merged flows");
                    // Rows are keyed by flow; the old row goes.
                    self.deleted.push((id, before));
                    self.dirty.insert(key);
                }
            }
            return Some(key);
        }
        if self.output_index.has_run_in(&point, &def.name, &flows) {
            debug!(task = %id, flow = %flows, "already ran in this flow; not spawning");
            return None;
        }

        let mut proxy = TaskProxy::new(def.clone(), point.clone(), flows, self.initial_point());
        proxy.is_held = self.hold_all || self.hold_point.as_ref().is_some_and(|h| point > *h);
        let key = ProxyKey(self.next_key);
        self.next_key += 1;
        info!(task = %id, flow = %proxy.flow_nums, held = proxy.is_held, "spawned");
        self.index.entry(id).or_default().push(key);
        self.proxies.insert(key, proxy);
        self.dirty.insert(key);
        self.satisfy_from_known_outputs(key);
        Some(key)
    }

    /// Spawn every parentless instance at workflow start.
    pub fn spawn_initial(&mut self, flows: &FlowNums) {
        let initial = self.initial_point().clone();
        let defs: Vec<Arc<TaskDef>> = self.defs.iter().cloned().collect();
        for def in defs {
            self.spawn_parentless(&def, &initial, flows);
        }
    }

    /// Spawn the first parentless instance of each of `def`'s sequences at
    /// or after `from`. A triggered sequence counts as parentless while all
    /// its conditions fall before the initial point.
    pub(crate) fn spawn_parentless(&mut self, def: &Arc<TaskDef>, from: &CyclePoint, flows: &FlowNums) {
        let initial = self.initial_point().clone();
        for section in &def.sections {
            let Some(mut point) = section.sequence.get_first_point(from) else {
                continue;
            };
            let Some(trigger) = &section.trigger else {
                self.spawn(def, point, flows.clone());
                continue;
            };
            for _ in 0..MAX_PRE_INITIAL_SPAWN {
                let pre_initial_only = trigger
                    .prerequisite_at(&point, &initial)
                    .conditions()
                    .all(|(_, s)| s == Satisfaction::PreInitial);
                if !pre_initial_only {
                    break;
                }
                self.spawn(def, point.clone(), flows.clone());
                match section.sequence.get_next_point(&point) {
                    Some(next) => point = next,
                    None => break,
                }
            }
        }
    }

    /// Spawn the next instance on each parentless sequence through `key`'s
    /// point.
    pub(crate) fn spawn_next_parentless(&mut self, key: ProxyKey) {
        let Some(proxy) = self.proxies.get(&key) else {
            return;
        };
        if proxy.flow_nums.is_none() || proxy.definition_removed {
            return;
        }
        let def = proxy.def.clone();
        let point = proxy.id.point.clone();
        let flows = proxy.flow_nums.clone();
        let nexts: Vec<CyclePoint> = def
            .sections
            .iter()
            .filter(|s| s.trigger.is_none() && s.sequence.is_valid(&point))
            .filter_map(|s| s.sequence.get_next_point(&point))
            .collect();
        for next in nexts {
            self.spawn(&def, next, flows.clone());
        }
    }

    /// Apply a status transition and record it.
    pub fn transition(&mut self, key: ProxyKey, action: TaskAction, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let Some(proxy) = self.proxies.get_mut(&key) else {
            return Ok(());
        };
        let old = proxy.apply(action, now)?;
        let new = proxy.status();
        if old == new {
            info!(task = %proxy.id, submit_num = proxy.submit_num, flow = %proxy.flow_nums, "{action} ({new})");
        } else {
            info!(task = %proxy.id, submit_num = proxy.submit_num, flow = %proxy.flow_nums, "{old} => {new}");
        }
        if !proxy.is_queued {
            self.queues.remove(key);
        }
        self.changes.push(StateChange {
            id: proxy.id.clone(),
            flow_nums: proxy.flow_nums.clone(),
            action,
            old,
            new,
            time: now,
        });
        self.dirty.insert(key);
        Ok(())
    }

    /// Record output `label` of `key`, spawn its children and satisfy them.
    /// Returns false if the output was already recorded.
    pub fn complete_output(&mut self, key: ProxyKey, label: &str, now: DateTime<Utc>) -> bool {
        let Some(proxy) = self.proxies.get_mut(&key) else {
            return false;
        };
        if !proxy.outputs.complete(label, now) {
            return false;
        }
        self.dirty.insert(key);
        let (id, flows, submit_num) = (proxy.id.clone(), proxy.flow_nums.clone(), proxy.submit_num);
        let definition_removed = proxy.definition_removed;
        debug!(task = %id, output = %label, "output completed");
        self.output_index.record(
            &id.point,
            &id.name,
            &flows,
            submit_num,
            BTreeSet::from([label.to_string()]),
        );

        if flows.is_none() || definition_removed {
            return true;
        }
        let condition = ConditionKey {
            task: id.name.clone(),
            point: id.point.clone(),
            output: label.to_string(),
        };
        let edges = self.defs.children_of(&id.name, label).to_vec();
        for edge in edges {
            let Some(child_def) = self.defs.get(&edge.child).cloned() else {
                continue;
            };
            let Some(child_point) = edge.child_point(&id.point) else {
                continue;
            };
            let on_sequence = child_def
                .sections
                .get(edge.section)
                .is_some_and(|s| s.sequence.is_valid(&child_point));
            if !on_sequence {
                continue;
            }
            if let Some(child) = self.spawn(&child_def, child_point, flows.clone()) {
                if let Some(c) = self.proxies.get_mut(&child) {
                    if c.satisfy(&condition) {
                        self.dirty.insert(child);
                    }
                }
            }
        }
        true
    }

    /// Remove a proxy from the pool.
    pub fn remove(&mut self, key: ProxyKey, reason: &str) -> Option<TaskProxy> {
        let proxy = self.proxies.remove(&key)?;
        if let Some(keys) = self.index.get_mut(&proxy.id) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.index.remove(&proxy.id);
            }
        }
        self.queues.remove(key);
        self.dirty.remove(&key);
        self.in_commit.remove(&key);
        info!(task = %proxy.id, flow = %proxy.flow_nums, "removed from pool ({reason})");
        self.deleted.push((proxy.id.clone(), proxy.flow_nums.clone()));
        Some(proxy)
    }

    /// Prune final proxies whose outputs are durable and that nothing still
    /// waits on.
    pub fn prune_removable(&mut self) -> usize {
        let candidates: Vec<ProxyKey> = self
            .proxies
            .iter()
            .filter(|(k, p)| {
                !self.dirty.contains(k)
                    && !self.in_commit.contains(k)
                    && p.is_final()
                    && (p.is_complete() || p.definition_removed || p.flow_nums.is_none())
            })
            .map(|(k, _)| *k)
            .collect();
        let mut pruned = 0;
        for key in candidates {
            let Some(p) = self.proxies.get(&key) else {
                continue;
            };
            let (name, point) = (p.id.name.clone(), p.id.point.clone());
            let needed = self
                .proxies
                .iter()
                .any(|(k, other)| *k != key && other.waits_on(&name, &point));
            if !needed && self.remove(key, "finished").is_some() {
                pruned += 1;
            }
        }
        pruned
    }

    /// Next submit number for `key`, unique across flows of `point/name`.
    pub fn next_submit_num(&mut self, key: ProxyKey) -> Option<u32> {
        let proxy = self.proxies.get_mut(&key)?;
        let id = proxy.id.clone();
        let floor = self
            .submit_nums
            .get(&id)
            .copied()
            .unwrap_or(0)
            .max(self.output_index.max_submit_num(&id.point, &id.name));
        let n = proxy.next_submit_num(floor);
        self.submit_nums.insert(id, n);
        self.dirty.insert(key);
        Some(n)
    }

    /// Proxies matching a glob over `point/name`.
    pub fn matching(&self, patterns: &globset::GlobSet) -> Vec<ProxyKey> {
        self.proxies
            .iter()
            .filter(|(_, p)| patterns.is_match(p.id.to_string()))
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn hold(&mut self, key: ProxyKey, now: DateTime<Utc>) {
        if self.proxies.get(&key).is_some_and(|p| !p.is_held) {
            // Hold applies to every status.
            let _ = self.transition(key, TaskAction::Hold, now);
        }
    }

    pub fn release(&mut self, key: ProxyKey, now: DateTime<Utc>) {
        if self.proxies.get(&key).is_some_and(|p| p.is_held) {
            let _ = self.transition(key, TaskAction::Release, now);
        }
    }

    pub fn take_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.changes)
    }

    /// Records of proxies changed since the last call, plus deleted rows.
    pub fn take_dirty(&mut self) -> (Vec<ProxyRecord>, Vec<(TaskId, FlowNums)>) {
        let keys = std::mem::take(&mut self.dirty);
        let records = keys
            .iter()
            .filter_map(|k| self.proxies.get(k))
            .map(ProxyRecord::from)
            .collect();
        self.in_commit.extend(keys);
        (records, std::mem::take(&mut self.deleted))
    }

    /// The batch from the last [`Pool::take_dirty`] is durable.
    pub fn mark_persisted(&mut self) {
        self.in_commit.clear();
    }

    /// Every proxy as it would be persisted, in a stable order.
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        let mut records: Vec<ProxyRecord> = self.proxies.values().map(ProxyRecord::from).collect();
        records.sort_by(|a, b| (&a.point, &a.name, &a.flow_nums).cmp(&(&b.point, &b.name, &b.flow_nums)));
        records
    }

    /// Oldest point in the pool.
    pub fn min_point(&self) -> Option<CyclePoint> {
        self.proxies.values().map(|p| p.id.point.clone()).min()
    }

    /// Forget in-memory outputs no current proxy can reach back to.
    pub fn housekeep_output_index(&mut self) {
        let Some(min) = self.min_point() else {
            return;
        };
        let before = match self.defs.max_past_offset() {
            Some(offset) => min.add(offset),
            None => Some(min),
        };
        if let Some(before) = before {
            self.output_index.housekeep(&before);
        }
    }

    pub(crate) fn warn_orphaned_definition(&self, key: ProxyKey) {
        if let Some(p) = self.proxies.get(&key) {
            warn!(task = %p.id, status = %p.status(), "task definition removed");
        }
    }

    /// Outputs with the standard "succeeded" label, for stop-task checks.
    pub fn has_succeeded(&self, id: &TaskId) -> bool {
        self.keys_for(id)
            .iter()
            .filter_map(|k| self.proxies.get(k))
            .any(|p| p.outputs.is_completed(outputs::SUCCEEDED))
            || self.output_index.is_completed(
                &ConditionKey {
                    task: id.name.clone(),
                    point: id.point.clone(),
                    output: outputs::SUCCEEDED.to_string(),
                },
                &FlowNums::none(),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::config::model::RawWorkflowConfig;

    fn pool(src: &str) -> Pool {
        let raw: RawWorkflowConfig = toml::from_str(src).unwrap();
        Pool::new(&WorkflowConfig::try_from(raw).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    const CHAIN: &str = r#"
        [scheduling]
        cycling_mode = "integer"
        initial_cycle_point = "1"
        final_cycle_point = "2"
        [scheduling.graph."P1"]
        a = ""
        b = "a"
    "#;

    #[test]
    fn spawn_respects_the_final_point_and_merges_overlapping_flows() {
        let mut pool = pool(CHAIN);
        let def = pool.defs().get("b").cloned().unwrap();
        let cycling = pool.cycling().clone();
        let p1 = cycling.parse_point("1").unwrap();

        assert!(pool.spawn(&def, cycling.parse_point("3").unwrap(), FlowNums::single(1)).is_none());

        let key = pool.spawn(&def, p1.clone(), FlowNums::single(1)).unwrap();
        let merged = pool.spawn(&def, p1.clone(), FlowNums::new([1, 2])).unwrap();
        assert_eq!(key, merged);
        assert_eq!(pool.get(key).unwrap().flow_nums, FlowNums::new([1, 2]));

        let other = pool.spawn(&def, p1.clone(), FlowNums::single(3)).unwrap();
        assert_ne!(other, key);
        assert_eq!(pool.keys_for(&TaskId::new(p1, "b")).len(), 2);
    }

    #[test]
    fn finished_proxies_are_pruned_only_once_durable() {
        let mut pool = pool(CHAIN);
        pool.spawn_initial(&FlowNums::single(1));
        let keys = pool.keys();
        assert_eq!(keys.len(), 1);
        let a = keys[0];
        let a_id = pool.get(a).unwrap().id.clone();

        pool.transition(a, TaskAction::Prepare, now()).unwrap();
        pool.transition(a, TaskAction::JobSubmitted, now()).unwrap();
        pool.transition(a, TaskAction::JobStarted, now()).unwrap();
        pool.transition(a, TaskAction::JobSucceeded, now()).unwrap();
        assert!(pool.complete_output(a, outputs::SUCCEEDED, now()));
        assert!(!pool.complete_output(a, outputs::SUCCEEDED, now()));
        assert_eq!(pool.len(), 2, "1/b spawned on demand");

        assert_eq!(pool.prune_removable(), 0, "dirty");
        let (records, _) = pool.take_dirty();
        assert_eq!(records.len(), 2);
        assert_eq!(pool.prune_removable(), 0, "not yet committed");

        pool.mark_persisted();
        assert_eq!(pool.prune_removable(), 1);
        assert!(pool.keys_for(&a_id).is_empty());
        assert!(pool.has_succeeded(&a_id));

        let (_, deleted) = pool.take_dirty();
        assert_eq!(deleted, vec![(a_id, FlowNums::single(1))]);
    }

    #[test]
    fn hold_takes_a_proxy_out_of_its_queue() {
        let mut pool = pool(
            r#"
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            [scheduling.graph."R1"]
            a = ""
            "#,
        );
        pool.spawn_initial(&FlowNums::single(1));
        pool.release_runahead();
        pool.queue_ready();
        let a = pool.keys()[0];
        assert!(pool.get(a).unwrap().is_queued);

        pool.hold(a, now());
        pool.hold(a, now());
        let p = pool.get(a).unwrap();
        assert!(p.is_held && !p.is_queued);
        assert!(pool.release_queued().is_empty());

        pool.release(a, now());
        pool.queue_ready();
        assert_eq!(pool.release_queued(), vec![a]);

        let logged: Vec<(TaskAction, TaskStatus)> = pool.take_changes().iter().map(|c| (c.action, c.new)).collect();
        assert_eq!(
            logged,
            vec![(TaskAction::Hold, TaskStatus::Waiting), (TaskAction::Release, TaskStatus::Waiting)]
        );
    }
}
