#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cyclerun::config::loader::fingerprint;
use cyclerun::config::{RawWorkflowConfig, WorkflowConfig};
use toml::{Table, Value};

/// Builder for workflow files, to simplify test setup.
///
/// Produces the TOML text a user would write, so tests exercise the same
/// decoding and validation path as a real run.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    scheduler: Table,
    scheduling: Table,
    graph: Table,
    queues: Table,
    runtime: Table,
}

impl WorkflowBuilder {
    fn new(mode: &str, initial: &str) -> Self {
        let mut scheduling = Table::new();
        scheduling.insert("cycling_mode".into(), Value::String(mode.into()));
        scheduling.insert("initial_cycle_point".into(), Value::String(initial.into()));
        Self {
            scheduler: Table::new(),
            scheduling,
            graph: Table::new(),
            queues: Table::new(),
            runtime: Table::new(),
        }
    }

    pub fn integer(initial: &str) -> Self {
        Self::new("integer", initial)
    }

    pub fn datetime(initial: &str) -> Self {
        Self::new("datetime", initial)
    }

    pub fn final_point(mut self, point: &str) -> Self {
        self.scheduling
            .insert("final_cycle_point".into(), Value::String(point.into()));
        self
    }

    pub fn stop_after(mut self, point: &str) -> Self {
        self.scheduling
            .insert("stop_after_cycle_point".into(), Value::String(point.into()));
        self
    }

    pub fn runahead(mut self, limit: &str) -> Self {
        self.scheduling
            .insert("runahead_limit".into(), Value::String(limit.into()));
        self
    }

    pub fn stall_timeout(mut self, timeout: &str, abort: bool) -> Self {
        self.scheduler
            .insert("stall_timeout".into(), Value::String(timeout.into()));
        self.scheduler
            .insert("abort_on_stall_timeout".into(), Value::Boolean(abort));
        self
    }

    /// Add `task = "trigger"` under the `sequence` recurrence.
    pub fn graph(mut self, sequence: &str, task: &str, trigger: &str) -> Self {
        let section = self
            .graph
            .entry(sequence.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if let Value::Table(section) = section {
            section.insert(task.into(), Value::String(trigger.into()));
        }
        self
    }

    /// Set `key = value` in `[runtime.<namespace>]`.
    pub fn runtime(mut self, namespace: &str, key: &str, value: impl Into<Value>) -> Self {
        let section = self
            .runtime
            .entry(namespace.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if let Value::Table(section) = section {
            section.insert(key.into(), value.into());
        }
        self
    }

    pub fn queue(mut self, name: &str, limit: i64, members: &[&str]) -> Self {
        let mut queue = Table::new();
        queue.insert("limit".into(), Value::Integer(limit));
        queue.insert(
            "members".into(),
            Value::Array(members.iter().map(|m| Value::String((*m).into())).collect()),
        );
        self.queues.insert(name.into(), Value::Table(queue));
        self
    }

    pub fn to_toml(&self) -> String {
        let mut scheduling = self.scheduling.clone();
        scheduling.insert("graph".into(), Value::Table(self.graph.clone()));
        if !self.queues.is_empty() {
            scheduling.insert("queues".into(), Value::Table(self.queues.clone()));
        }
        let mut root = Table::new();
        if !self.scheduler.is_empty() {
            root.insert("scheduler".into(), Value::Table(self.scheduler.clone()));
        }
        root.insert("scheduling".into(), Value::Table(scheduling));
        if !self.runtime.is_empty() {
            root.insert("runtime".into(), Value::Table(self.runtime.clone()));
        }
        toml::to_string(&root).expect("workflow builder produced unserialisable TOML")
    }

    /// Decode and validate, exactly as the loader does.
    pub fn build(&self) -> WorkflowConfig {
        let text = self.to_toml();
        let raw: RawWorkflowConfig = toml::from_str(&text).expect("builder TOML must decode");
        WorkflowConfig::try_from(raw)
            .expect("Failed to build valid config from builder")
            .with_fingerprint(fingerprint(&text))
    }

    /// Write `flow.toml` into `dir` and return its path.
    pub fn write_to(&self, dir: &Path) -> PathBuf {
        let path = dir.join("flow.toml");
        std::fs::write(&path, self.to_toml()).expect("failed to write workflow file");
        path
    }
}
