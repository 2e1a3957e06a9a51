// src/task/proxy.rs

//! A task definition instantiated at one cycle point, in one set of flows.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cycling::CyclePoint;
use crate::task::flow::FlowNums;
use crate::task::outputs::TaskOutputs;
use crate::task::prerequisite::{ConditionKey, Prerequisite};
use crate::task::state::{TaskAction, TaskStatus, TransitionError, next_status};
use crate::task::TaskId;
use crate::taskdef::TaskDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryKind {
    Execution,
    Submission,
}

impl RetryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryKind::Execution => "execution-retry",
            RetryKind::Submission => "submission-retry",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "execution-retry" => Some(RetryKind::Execution),
            "submission-retry" => Some(RetryKind::Submission),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRetry {
    pub kind: RetryKind,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TaskProxy {
    pub id: TaskId,
    pub def: Arc<TaskDef>,
    pub flow_nums: FlowNums,
    status: TaskStatus,
    pub prerequisites: Vec<Prerequisite>,
    pub outputs: TaskOutputs,
    /// Xtrigger label => satisfied.
    pub xtriggers: BTreeMap<String, bool>,
    pub submit_num: u32,
    /// Execution try of the current or next job, from 1.
    pub try_num: u32,
    pub submit_try_num: u32,
    pub is_held: bool,
    pub is_queued: bool,
    pub is_runahead: bool,
    pub is_manual_submit: bool,
    pub job_ref: Option<String>,
    pub platform: Option<String>,
    pub retry: Option<PendingRetry>,
    pub kill_requested: bool,
    /// The definition vanished on reload; the proxy may finish but spawns
    /// nothing.
    pub definition_removed: bool,
    /// Restarted as submitted/running; status is unconfirmed until polled.
    pub poll_pending: bool,
    pub submitted_time: Option<DateTime<Utc>>,
    pub started_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
}

impl TaskProxy {
    pub fn new(def: Arc<TaskDef>, point: CyclePoint, flow_nums: FlowNums, initial: &CyclePoint) -> Self {
        let prerequisites = def.build_prerequisites(&point, initial);
        let outputs = def.new_outputs();
        let xtriggers = def
            .xtriggers_at(&point)
            .into_iter()
            .map(|label| (label, false))
            .collect();
        Self {
            id: TaskId::new(point, def.name.clone()),
            def,
            flow_nums,
            status: TaskStatus::Waiting,
            prerequisites,
            outputs,
            xtriggers,
            submit_num: 0,
            try_num: 1,
            submit_try_num: 1,
            is_held: false,
            is_queued: false,
            is_runahead: true,
            is_manual_submit: false,
            job_ref: None,
            platform: None,
            retry: None,
            kill_requested: false,
            definition_removed: false,
            poll_pending: false,
            submitted_time: None,
            started_time: None,
            finished_time: None,
        }
    }

    pub fn point(&self) -> &CyclePoint {
        &self.id.point
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Apply `action`, returning the previous status.
    pub fn apply(&mut self, action: TaskAction, now: DateTime<Utc>) -> Result<TaskStatus, TransitionError> {
        let old = self.status;
        let new = next_status(old, action)?;
        self.status = new;
        match action {
            TaskAction::Hold => {
                self.is_held = true;
                self.is_queued = false;
            }
            TaskAction::Release => self.is_held = false,
            TaskAction::ForceTrigger => {
                self.is_held = false;
                self.is_manual_submit = true;
                self.retry = None;
            }
            TaskAction::Kill if new.is_active() => self.kill_requested = true,
            TaskAction::Kill => {
                self.retry = None;
                self.is_held = true;
                self.is_queued = false;
            }
            _ => {}
        }
        match new {
            TaskStatus::Preparing => {
                self.is_queued = false;
                self.is_runahead = false;
            }
            TaskStatus::Submitted => self.submitted_time = Some(now),
            TaskStatus::Running => self.started_time = Some(now),
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::SubmitFailed => {
                self.finished_time = Some(now)
            }
            TaskStatus::Waiting => {}
        }
        Ok(old)
    }

    /// Restart only: take the status recorded in the database.
    pub(crate) fn restore_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    pub fn is_complete(&self) -> bool {
        self.outputs.all_required_complete()
    }

    /// Final, but without all required outputs.
    pub fn is_incomplete(&self) -> bool {
        self.is_final() && !self.is_complete()
    }

    pub fn prereqs_satisfied(&self) -> bool {
        self.prerequisites.iter().all(Prerequisite::is_satisfied)
    }

    pub fn xtriggers_satisfied(&self) -> bool {
        self.xtriggers.values().all(|ok| *ok)
    }

    /// Eligible for a queue this iteration.
    pub fn is_ready_to_queue(&self) -> bool {
        self.status == TaskStatus::Waiting
            && !self.is_held
            && !self.is_runahead
            && !self.is_queued
            && self.retry.is_none()
            && self.prereqs_satisfied()
            && self.xtriggers_satisfied()
    }

    pub fn satisfy(&mut self, key: &ConditionKey) -> bool {
        let mut changed = false;
        for p in self.prerequisites.iter_mut() {
            changed |= p.satisfy(key);
        }
        changed
    }

    pub fn force_satisfy(&mut self) {
        for p in self.prerequisites.iter_mut() {
            p.force_satisfy();
        }
        for ok in self.xtriggers.values_mut() {
            *ok = true;
        }
    }

    /// Unsatisfied condition keys across all prerequisites.
    pub fn unsatisfied_conditions(&self) -> impl Iterator<Item = &ConditionKey> {
        self.prerequisites.iter().flat_map(Prerequisite::unsatisfied)
    }

    /// True if an unsatisfied condition still waits on `task` at `point`.
    pub fn waits_on(&self, task: &str, point: &CyclePoint) -> bool {
        self.unsatisfied_conditions()
            .any(|k| k.task == task && k.point == *point)
    }

    /// Human-readable unmet prerequisites and xtriggers, for stall reports.
    pub fn unmet(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .prerequisites
            .iter()
            .filter(|p| !p.is_satisfied())
            .map(|p| p.to_string())
            .collect();
        out.extend(
            self.xtriggers
                .iter()
                .filter(|(_, ok)| !**ok)
                .map(|(label, _)| format!("xtrigger @{label}")),
        );
        out
    }

    /// Start a new job: bump the submit number.
    pub fn next_submit_num(&mut self, floor: u32) -> u32 {
        self.submit_num = self.submit_num.max(floor) + 1;
        self.submit_num
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::config::model::RawWorkflowConfig;
    use crate::task::outputs;

    fn foo_def() -> Arc<TaskDef> {
        let raw: RawWorkflowConfig = toml::from_str(
            r#"
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            [scheduling.xtriggers]
            ready = { function = "echo", kwargs = { succeed = "true" } }
            [scheduling.graph."P1"]
            foo = "foo[-P1] & @ready"
            "#,
        )
        .unwrap();
        let cfg = WorkflowConfig::try_from(raw).unwrap();
        cfg.defs.get("foo").unwrap().clone()
    }

    #[test]
    fn new_proxy_waits_in_runahead() {
        let p = TaskProxy::new(foo_def(), CyclePoint::Integer(2), FlowNums::single(1), &CyclePoint::Integer(1));
        assert_eq!(p.status(), TaskStatus::Waiting);
        assert!(p.is_runahead);
        assert!(!p.prereqs_satisfied());
        assert_eq!(p.xtriggers.get("ready"), Some(&false));
        assert_eq!(p.id.to_string(), "2/foo");
    }

    #[test]
    fn ready_once_prerequisites_and_xtriggers_are_met() {
        let mut p = TaskProxy::new(foo_def(), CyclePoint::Integer(2), FlowNums::single(1), &CyclePoint::Integer(1));
        p.is_runahead = false;
        let key = ConditionKey {
            task: "foo".to_string(),
            point: CyclePoint::Integer(1),
            output: outputs::SUCCEEDED.to_string(),
        };
        assert!(p.satisfy(&key));
        assert!(!p.is_ready_to_queue());
        p.xtriggers.insert("ready".to_string(), true);
        assert!(p.is_ready_to_queue());
        assert_eq!(p.unmet(), Vec::<String>::new());
    }

    #[test]
    fn final_without_required_outputs_is_incomplete() {
        let mut p = TaskProxy::new(foo_def(), CyclePoint::Integer(1), FlowNums::single(1), &CyclePoint::Integer(1));
        let now = Utc::now();
        for action in [
            TaskAction::Prepare,
            TaskAction::JobSubmitted,
            TaskAction::JobStarted,
            TaskAction::JobFailed,
        ] {
            p.apply(action, now).unwrap();
        }
        assert!(p.is_incomplete());
        assert!(p.finished_time.is_some());
        assert!(p.apply(TaskAction::JobStarted, now).is_err());
        assert_eq!(p.status(), TaskStatus::Failed);
    }
}
