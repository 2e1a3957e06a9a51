// src/pool/reload.rs

//! Applying a new, already validated configuration to a live pool.
//!
//! Validation happens before anything here runs, so a reload that gets this
//! far cannot fail: the pool is either untouched (bad config, rejected by
//! the caller) or fully switched over.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::config::model::WorkflowConfig;
use crate::pool::{Pool, ProxyKey};
use crate::task::{FlowNums, TaskId, TaskProxy};
use crate::taskdef::TaskDef;

/// What a reload changed in the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Inactive proxies whose definition vanished.
    pub removed: Vec<TaskId>,
    /// Active proxies left to finish without a definition.
    pub orphaned: Vec<TaskId>,
    /// Task names new in this configuration.
    pub added: Vec<String>,
}

impl Pool {
    /// Switch the pool to `config`.
    pub fn reload(&mut self, config: &WorkflowConfig) -> ReloadSummary {
        let old_names: BTreeSet<String> = self.defs.names().map(str::to_string).collect();
        self.defs = config.defs.clone();
        self.cycling = config.cycling.clone();
        self.runahead = config.runahead.clone();

        let mut summary = ReloadSummary::default();
        for key in self.keys() {
            let Some((id, active)) = self.proxies.get(&key).map(|p| (p.id.clone(), p.is_active())) else {
                continue;
            };
            match self.defs.get(&id.name).cloned() {
                Some(def) => self.rebind(key, def),
                None if active => {
                    if let Some(p) = self.proxies.get_mut(&key) {
                        p.definition_removed = true;
                    }
                    self.dirty.insert(key);
                    self.warn_orphaned_definition(key);
                    summary.orphaned.push(id);
                }
                None => {
                    if let Some(removed) = self.remove(key, "definition removed") {
                        summary.removed.push(removed.id);
                    }
                }
            }
        }

        let proxies = &self.proxies;
        self.queues
            .reconfigure(&config.queues, |key| proxies.get(&key).map(|p| p.def.queue.clone()));

        let from = self
            .runahead_base()
            .unwrap_or_else(|| self.cycling.initial.clone());
        let mut flows = self.active_flows();
        if flows.is_none() {
            flows = FlowNums::single(1);
        }
        let new_defs: Vec<Arc<TaskDef>> = self
            .defs
            .iter()
            .filter(|d| !old_names.contains(&d.name))
            .cloned()
            .collect();
        for def in new_defs {
            summary.added.push(def.name.clone());
            self.spawn_parentless(&def, &from, &flows);
        }

        info!(
            removed = summary.removed.len(),
            orphaned = summary.orphaned.len(),
            added = summary.added.len(),
            "pool reloaded"
        );
        summary
    }

    /// Rebuild a proxy's definition-derived parts, keeping everything it
    /// has already achieved.
    fn rebind(&mut self, key: ProxyKey, def: Arc<TaskDef>) {
        let initial = self.cycling.initial.clone();
        let Some(proxy) = self.proxies.get_mut(&key) else {
            return;
        };
        let fresh = TaskProxy::new(def.clone(), proxy.id.point.clone(), FlowNums::none(), &initial);

        let mut prerequisites = fresh.prerequisites;
        for old in &proxy.prerequisites {
            for (condition, state) in old.conditions().filter(|(_, s)| s.is_satisfied()) {
                for p in prerequisites.iter_mut() {
                    p.restore_state(condition, state);
                }
            }
        }

        let mut outputs = fresh.outputs;
        for (label, at) in proxy.outputs.completed() {
            outputs.complete(label, at);
        }

        let mut xtriggers = fresh.xtriggers;
        for (label, ok) in xtriggers.iter_mut() {
            *ok = proxy.xtriggers.get(label).copied().unwrap_or(false);
        }

        proxy.def = def;
        proxy.prerequisites = prerequisites;
        proxy.outputs = outputs;
        proxy.xtriggers = xtriggers;
        proxy.definition_removed = false;
        self.dirty.insert(key);
    }
}
