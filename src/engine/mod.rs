// src/engine/mod.rs

//! The scheduler loop.
//!
//! The loop is split the same way as the rest of the crate:
//! - [`core`] holds the synchronous, deterministic [`CoreRuntime`]: it
//!   applies events to the pool and, once per iteration, returns the
//!   commands the shell must carry out (persist, submit, kill, poll, call
//!   xtriggers, exit);
//! - [`event_handlers`] applies single events (job events, commands,
//!   reloads) to a [`SchedulerContext`];
//! - [`hooks`] dispatches workflow events and state changes to handlers;
//! - [`runtime`] is the async shell around the core: it owns the event
//!   channel, the database and the job submitter.

use std::collections::BTreeMap;

use crate::config::WorkflowConfig;
use crate::persistence::PersistBatch;
use crate::retry::{XtriggerCall, XtriggerOutcome};
use crate::task::{FlowNums, TaskId};
use crate::types::{FlowOption, StopMode};

pub mod core;
pub mod event_handlers;
pub mod hooks;
pub mod runtime;

pub use core::{CoreOptions, CoreRuntime, SchedulerContext};
pub use hooks::{HandlerRegistry, StateChangeSink, WorkflowEvent, WorkflowEventHandler};
pub use runtime::Runtime;

/// What a job reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEventKind {
    Submitted { job_ref: String },
    SubmitFailed { reason: String },
    Started,
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        signal: Option<String>,
    },
    /// A message line from the job; may complete a custom output.
    Message(String),
}

/// A status report for one job, identified by `point/name` and submit
/// number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub id: TaskId,
    pub submit_num: u32,
    pub kind: JobEventKind,
}

impl JobEvent {
    pub fn new(id: TaskId, submit_num: u32, kind: JobEventKind) -> Self {
        Self { id, submit_num, kind }
    }
}

/// Everything a submitter needs to run one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: TaskId,
    pub flow_nums: FlowNums,
    pub submit_num: u32,
    pub try_num: u32,
    pub script: String,
    pub platform: String,
    pub env: BTreeMap<String, String>,
}

impl JobSpec {
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id.clone(),
            submit_num: self.submit_num,
            job_ref: None,
        }
    }
}

/// A submitted job, for poll and kill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: TaskId,
    pub submit_num: u32,
    pub job_ref: Option<String>,
}

/// Manual interventions. Task arguments are `point/name` globs, except for
/// `Trigger`, which takes exact ids so that absent tasks can be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hold { tasks: Vec<String> },
    Release { tasks: Vec<String> },
    HoldAll,
    ReleaseAll,
    /// Hold every task after this point; `None` clears it.
    HoldAfter { point: Option<String> },
    Trigger { tasks: Vec<String>, flow: FlowOption },
    Kill { tasks: Vec<String> },
    Remove { tasks: Vec<String> },
    SetStopPoint { point: Option<String> },
    SetStopTask { task: Option<String> },
    BroadcastPut {
        points: Vec<String>,
        namespaces: Vec<String>,
        settings: BTreeMap<String, String>,
    },
    /// `None` matches everything.
    BroadcastClear {
        points: Option<Vec<String>>,
        namespaces: Option<Vec<String>>,
    },
    /// Re-read the configuration file.
    Reload,
    Stop { mode: StopMode },
}

/// Events flowing into the runtime from submitters, xtrigger workers, the
/// config watcher and the operator.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    Job(JobEvent),
    XtriggerResult {
        signature: String,
        outcome: XtriggerOutcome,
    },
    Command(Command),
    /// The configuration file changed; the shell reloads and validates it.
    ReloadRequested,
    /// A reload that validated.
    ConfigLoaded(Box<WorkflowConfig>),
    /// A reload that failed to load or validate.
    ConfigRejected(String),
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
    /// No event; time passed.
    Tick,
}

/// Why the core asked to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Nothing left to do at or before the stop point.
    Completed,
    Stopped(StopMode),
    StopTask(TaskId),
    Aborted(String),
}

/// Command produced by the core, to be executed by the shell in order.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Commit before anything else of this iteration happens.
    Persist(PersistBatch),
    SubmitJobs(Vec<JobSpec>),
    KillJobs(Vec<JobHandle>),
    PollJobs(Vec<JobHandle>),
    CallXtriggers(Vec<XtriggerCall>),
    RequestExit(ExitReason),
}

/// Result of one loop iteration.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the shell should keep running.
    pub keep_running: bool,
}
