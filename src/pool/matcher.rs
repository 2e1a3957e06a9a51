// src/pool/matcher.rs

//! Dependency matching and queue admission.
//!
//! Conditions are satisfied in two ways:
//! - push: [`Pool::complete_output`] satisfies the children it spawns;
//! - pull: a newly spawned proxy looks its conditions up in the live pool
//!   first and then in the output index, which still holds the outputs of
//!   pruned proxies.

use std::collections::HashMap;

use tracing::debug;

use crate::pool::{Pool, ProxyKey};
use crate::task::prerequisite::ConditionKey;
use crate::task::{FlowNums, TaskId};

impl Pool {
    /// True if the output named by `key` exists in `flows`, in the live pool
    /// or in the output index.
    pub fn resolve_condition(&self, key: &ConditionKey, flows: &FlowNums) -> bool {
        let id = TaskId::new(key.point.clone(), key.task.clone());
        let live = self
            .keys_for(&id)
            .iter()
            .filter_map(|k| self.proxies.get(k))
            .filter(|p| flows.is_none() || p.flow_nums.overlaps(flows))
            .any(|p| p.outputs.is_completed(&key.output));
        live || self.output_index.is_completed(key, flows)
    }

    /// Satisfy every condition of `key` whose output already exists.
    pub(crate) fn satisfy_from_known_outputs(&mut self, key: ProxyKey) {
        let Some(proxy) = self.proxies.get(&key) else {
            return;
        };
        let flows = proxy.flow_nums.clone();
        let found: Vec<ConditionKey> = proxy
            .unsatisfied_conditions()
            .filter(|c| self.resolve_condition(c, &flows))
            .cloned()
            .collect();
        if found.is_empty() {
            return;
        }
        if let Some(proxy) = self.proxies.get_mut(&key) {
            for condition in &found {
                proxy.satisfy(condition);
            }
            debug!(task = %proxy.id, satisfied = found.len(), "satisfied from recorded outputs");
            self.dirty.insert(key);
        }
    }

    /// Move every proxy whose prerequisites and xtriggers are met into its
    /// queue. Returns the newly queued keys.
    pub fn queue_ready(&mut self) -> Vec<ProxyKey> {
        let ready: Vec<ProxyKey> = self
            .proxies
            .iter()
            .filter(|(_, p)| p.is_ready_to_queue())
            .map(|(k, _)| *k)
            .collect();
        for key in &ready {
            if let Some(p) = self.proxies.get_mut(key) {
                p.is_queued = true;
                self.queues
                    .push(*key, &p.def.queue, p.id.point.clone(), p.def.decl_index);
                debug!(task = %p.id, queue = %p.def.queue, "queued");
                self.dirty.insert(*key);
            }
        }
        ready
    }

    /// Release queued proxies up to each queue's limit, oldest point first.
    pub fn release_queued(&mut self) -> Vec<ProxyKey> {
        let mut active: HashMap<String, usize> = HashMap::new();
        for p in self.proxies.values().filter(|p| p.is_active()) {
            *active.entry(p.def.queue.clone()).or_insert(0) += 1;
        }
        let released = self.queues.release(&active);
        for key in &released {
            if let Some(p) = self.proxies.get_mut(key) {
                p.is_queued = false;
                self.dirty.insert(*key);
            }
        }
        released
    }

    /// Unmet prerequisites of every waiting proxy, for stall reports.
    pub fn unmet_prerequisites(&self) -> Vec<(TaskId, Vec<String>)> {
        self.proxies
            .values()
            .filter(|p| !p.is_final() && !p.is_active())
            .map(|p| (p.id.clone(), p.unmet()))
            .filter(|(_, unmet)| !unmet.is_empty())
            .collect()
    }
}
