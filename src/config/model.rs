// src/config/model.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::cycling::{CyclePoint, CyclingContext, Interval, IsoDuration};
use crate::retry::xtrigger::XtriggerDef;
use crate::taskdef::TaskDefStore;
use crate::types::CyclingMode;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduling]
/// cycling_mode = "integer"
/// initial_cycle_point = "1"
///
/// [scheduling.graph."P1"]
/// foo = "foo[-P1]"
/// bar = "foo"
///
/// [runtime.foo]
/// script = "echo foo"
/// ```
///
/// This is the *unchecked* shape. [`WorkflowConfig`] is produced from it by
/// validation (see `config::validate`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawWorkflowConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    pub scheduling: SchedulingSection,

    /// Runtime namespaces: tasks, families and `root`.
    #[serde(default)]
    pub runtime: BTreeMap<String, RuntimeSection>,
}

/// `[scheduler]` section: settings of the running scheduler itself.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Time zone date-time points are normalised to (`Z`, `+0530`).
    #[serde(default = "default_cycle_point_tz")]
    pub cycle_point_tz: String,

    /// Longest sleep between loop iterations.
    #[serde(default = "default_main_loop_interval")]
    pub main_loop_interval: String,

    #[serde(default)]
    pub stall_timeout: Option<String>,

    #[serde(default)]
    pub abort_on_stall_timeout: bool,
}

fn default_cycle_point_tz() -> String {
    "Z".to_string()
}

fn default_main_loop_interval() -> String {
    "PT1S".to_string()
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            cycle_point_tz: default_cycle_point_tz(),
            main_loop_interval: default_main_loop_interval(),
            stall_timeout: None,
            abort_on_stall_timeout: false,
        }
    }
}

/// `[scheduling]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SchedulingSection {
    #[serde(default)]
    pub cycling_mode: CyclingMode,

    pub initial_cycle_point: String,

    #[serde(default)]
    pub final_cycle_point: Option<String>,

    #[serde(default)]
    pub stop_after_cycle_point: Option<String>,

    #[serde(default)]
    pub hold_after_cycle_point: Option<String>,

    /// `"5"` = five active cycle points, `"P4"`/`"PT12H"` = interval span.
    #[serde(default = "default_runahead_limit")]
    pub runahead_limit: String,

    #[serde(default)]
    pub queues: BTreeMap<String, QueueSection>,

    #[serde(default)]
    pub xtriggers: BTreeMap<String, XtriggerSection>,

    /// Recurrence expression => (task name => trigger expression).
    #[serde(default)]
    pub graph: BTreeMap<String, BTreeMap<String, String>>,
}

pub(crate) fn default_runahead_limit() -> String {
    DEFAULT_RUNAHEAD_POINTS.to_string()
}

pub const DEFAULT_RUNAHEAD_POINTS: usize = 5;
pub const DEFAULT_QUEUE_LIMIT: usize = 100;
pub const DEFAULT_QUEUE: &str = "default";

/// `[scheduling.queues.<name>]`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueueSection {
    /// Maximum active members; `0` means unlimited.
    #[serde(default)]
    pub limit: usize,

    /// Task or family names.
    #[serde(default)]
    pub members: Vec<String>,
}

/// `[scheduling.xtriggers.<label>]`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct XtriggerSection {
    pub function: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub kwargs: BTreeMap<String, String>,

    /// Minimum time between calls while unsatisfied.
    #[serde(default)]
    pub interval: Option<String>,
}

/// `[runtime.<namespace>]`. Unset fields inherit from parents, then `root`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeSection {
    #[serde(default)]
    pub inherit: Vec<String>,

    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub platform: Option<String>,

    /// e.g. `"3*PT1S, PT1M"`.
    #[serde(default)]
    pub execution_retry_delays: Option<String>,

    #[serde(default)]
    pub submission_retry_delays: Option<String>,

    /// Custom output label => message text.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,

    #[serde(default)]
    pub required_outputs: Option<Vec<String>>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// How far ahead of the oldest incomplete point work may be released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunaheadLimit {
    /// Number of distinct active cycle points.
    Points(usize),
    /// Maximum span from the oldest incomplete point.
    Span(Interval),
}

/// A named queue after validation, with families expanded to tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDef {
    pub name: String,
    pub limit: usize,
    pub members: Vec<String>,
}

/// Settings of the scheduler loop itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub main_loop_interval: IsoDuration,
    pub stall_timeout: Option<IsoDuration>,
    pub abort_on_stall_timeout: bool,
}

/// Validated, fully resolved workflow configuration.
///
/// Produced via `WorkflowConfig::try_from(RawWorkflowConfig)`; every field
/// is already parsed into its typed form.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub scheduler: SchedulerSettings,
    pub cycling: CyclingContext,
    pub runahead: RunaheadLimit,
    pub stop_point: Option<CyclePoint>,
    pub hold_point: Option<CyclePoint>,
    pub queues: Vec<QueueDef>,
    pub xtriggers: BTreeMap<String, XtriggerDef>,
    pub defs: Arc<TaskDefStore>,
    /// blake3 fingerprint of the source text, when loaded from a file.
    pub fingerprint: Option<String>,
}

impl WorkflowConfig {
    pub fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}
