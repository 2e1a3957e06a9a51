// src/taskdef/mod.rs

//! Task definition store.
//!
//! Built once per (re)configuration from the raw graph and runtime sections,
//! then shared immutably (`Arc`) by every proxy. Family references in
//! triggers are expanded to member conditions here, so the matcher only ever
//! sees plain `(task, offset, output)` dependencies.

pub mod trigger;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::config::model::{DEFAULT_QUEUE, DEFAULT_QUEUE_LIMIT, QueueDef, RawWorkflowConfig};
use crate::cycling::{CyclePoint, CyclingContext, Interval, IsoDuration, Sequence, parse_duration_list};
use crate::errors::{CyclerunError, Result};
use crate::task::outputs::{self, STANDARD_OUTPUTS, TaskOutputs, standard_output};
use crate::task::prerequisite::{ConditionKey, PrereqExpr, Prerequisite, Satisfaction};

use self::trigger::{TriggerAst, TriggerRef, parse_trigger};

pub const ROOT_NAMESPACE: &str = "root";

/// A resolved upstream dependency: `task[offset]:output`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub task: String,
    pub offset: Option<Interval>,
    pub output: String,
}

impl Dependency {
    /// The upstream point this dependency refers to from `point`.
    pub fn target_point(&self, point: &CyclePoint) -> Option<CyclePoint> {
        match &self.offset {
            None => Some(point.clone()),
            Some(offset) => point.add(offset),
        }
    }

    /// True when the dependency refers to the same cycle point.
    pub fn is_same_point(&self) -> bool {
        self.offset.as_ref().is_none_or(Interval::is_null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepExpr {
    Dep(Dependency),
    And(Vec<DepExpr>),
    Or(Vec<DepExpr>),
}

impl DepExpr {
    pub fn dependencies(&self) -> Vec<&Dependency> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Dependency>) {
        match self {
            DepExpr::Dep(d) => out.push(d),
            DepExpr::And(terms) | DepExpr::Or(terms) => {
                for t in terms {
                    t.collect(out);
                }
            }
        }
    }

    fn lower(
        &self,
        point: &CyclePoint,
        initial: &CyclePoint,
        conds: &mut Vec<(ConditionKey, Satisfaction)>,
    ) -> PrereqExpr {
        match self {
            DepExpr::Dep(d) => {
                let (target, state) = match d.target_point(point) {
                    Some(t) if t >= *initial => (t, Satisfaction::Unsatisfied),
                    Some(t) => (t, Satisfaction::PreInitial),
                    None => (point.clone(), Satisfaction::PreInitial),
                };
                let key = ConditionKey {
                    task: d.task.clone(),
                    point: target,
                    output: d.output.clone(),
                };
                let idx = match conds.iter().position(|(k, _)| *k == key) {
                    Some(idx) => idx,
                    None => {
                        conds.push((key, state));
                        conds.len() - 1
                    }
                };
                PrereqExpr::Cond(idx)
            }
            DepExpr::And(terms) => {
                PrereqExpr::All(terms.iter().map(|t| t.lower(point, initial, conds)).collect())
            }
            DepExpr::Or(terms) => {
                PrereqExpr::Any(terms.iter().map(|t| t.lower(point, initial, conds)).collect())
            }
        }
    }

    /// Prerequisite for an instance at `point`. Conditions before `initial`
    /// are satisfied from the start.
    pub fn prerequisite_at(&self, point: &CyclePoint, initial: &CyclePoint) -> Prerequisite {
        let mut conds = Vec::new();
        let expr = self.lower(point, initial, &mut conds);
        Prerequisite::new(conds, expr)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task)?;
        if let Some(offset) = self.offset.as_ref().filter(|o| !o.is_null()) {
            write!(f, "[{offset}]")?;
        }
        write!(f, ":{}", self.output)
    }
}

impl fmt::Display for DepExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (terms, op) = match self {
            DepExpr::Dep(d) => return write!(f, "{d}"),
            DepExpr::And(terms) => (terms, " & "),
            DepExpr::Or(terms) => (terms, " | "),
        };
        let parts: Vec<String> = terms
            .iter()
            .map(|t| match t {
                DepExpr::Dep(_) => t.to_string(),
                _ => format!("({t})"),
            })
            .collect();
        write!(f, "{}", parts.join(op))
    }
}

/// One `recurrence => trigger` line for a task.
#[derive(Debug, Clone)]
pub struct GraphSection {
    pub sequence: Sequence,
    pub trigger: Option<DepExpr>,
    pub xtriggers: Vec<String>,
}

/// Job settings after namespace inheritance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskRuntime {
    pub script: String,
    pub platform: String,
    pub env: BTreeMap<String, String>,
    pub execution_retry_delays: Vec<IsoDuration>,
    pub submission_retry_delays: Vec<IsoDuration>,
}

#[derive(Debug, Clone)]
pub struct TaskDef {
    pub name: String,
    /// Position in the store's sorted name order; tie-break for queue release.
    pub decl_index: usize,
    /// Runtime namespaces, most specific first, ending in `root`.
    pub namespaces: Vec<String>,
    pub sections: Vec<GraphSection>,
    /// Custom output label => message.
    pub outputs: BTreeMap<String, String>,
    pub required_outputs: BTreeSet<String>,
    pub runtime: TaskRuntime,
    pub queue: String,
}

impl TaskDef {
    pub fn is_valid_point(&self, point: &CyclePoint) -> bool {
        self.sections.iter().any(|s| s.sequence.is_valid(point))
    }

    pub fn sections_at<'a>(&'a self, point: &'a CyclePoint) -> impl Iterator<Item = &'a GraphSection> {
        self.sections.iter().filter(move |s| s.sequence.is_valid(point))
    }

    /// Earliest point at or after `from` on any of the task's sequences.
    pub fn first_point(&self, from: &CyclePoint) -> Option<CyclePoint> {
        self.sections
            .iter()
            .filter_map(|s| s.sequence.get_first_point(from))
            .min()
    }

    pub fn next_point(&self, point: &CyclePoint) -> Option<CyclePoint> {
        self.sections
            .iter()
            .filter_map(|s| s.sequence.get_next_point(point))
            .min()
    }

    /// Union of the prerequisites of every sequence firing at `point`.
    pub fn build_prerequisites(&self, point: &CyclePoint, initial: &CyclePoint) -> Vec<Prerequisite> {
        self.sections_at(point)
            .filter_map(|s| s.trigger.as_ref())
            .map(|t| t.prerequisite_at(point, initial))
            .collect()
    }

    pub fn xtriggers_at(&self, point: &CyclePoint) -> Vec<String> {
        let labels: BTreeSet<&String> = self
            .sections_at(point)
            .flat_map(|s| s.xtriggers.iter())
            .collect();
        labels.into_iter().cloned().collect()
    }

    /// True if every condition at `point` refers to a pre-initial point.
    pub fn is_parentless_at(&self, point: &CyclePoint, initial: &CyclePoint) -> bool {
        self.build_prerequisites(point, initial)
            .iter()
            .all(|p| p.conditions().all(|(_, s)| s == Satisfaction::PreInitial))
    }

    pub fn new_outputs(&self) -> TaskOutputs {
        TaskOutputs::new(
            self.outputs.iter().map(|(l, m)| (l.as_str(), m.as_str())),
            self.required_outputs.clone(),
        )
    }
}

/// Edge from a parent output to a child section that depends on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEdge {
    pub child: String,
    pub section: usize,
    pub offset: Option<Interval>,
}

impl ChildEdge {
    /// The child point that depends on the parent at `parent_point`.
    pub fn child_point(&self, parent_point: &CyclePoint) -> Option<CyclePoint> {
        match &self.offset {
            None => Some(parent_point.clone()),
            Some(offset) => parent_point.sub(offset),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskDefStore {
    defs: BTreeMap<String, Arc<TaskDef>>,
    families: BTreeMap<String, Vec<String>>,
    children: HashMap<(String, String), Vec<ChildEdge>>,
    max_future_offset: Option<Interval>,
    max_past_offset: Option<Interval>,
}

impl TaskDefStore {
    pub fn get(&self, name: &str) -> Option<&Arc<TaskDef>> {
        self.defs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TaskDef>> {
        self.defs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn is_family(&self, name: &str) -> bool {
        self.families.contains_key(name)
    }

    pub fn family_members(&self, family: &str) -> &[String] {
        self.families.get(family).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Child sections that depend on `parent:output`.
    pub fn children_of(&self, parent: &str, output: &str) -> &[ChildEdge] {
        self.children
            .get(&(parent.to_string(), output.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Largest positive offset any trigger looks ahead by.
    pub fn max_future_offset(&self) -> Option<&Interval> {
        self.max_future_offset.as_ref()
    }

    /// Most negative offset any trigger looks back by.
    pub fn max_past_offset(&self) -> Option<&Interval> {
        self.max_past_offset.as_ref()
    }

    /// Build the store from raw configuration. Also resolves queue
    /// membership, since queues may name families.
    pub fn build(
        raw: &RawWorkflowConfig,
        ctx: &CyclingContext,
        xtrigger_labels: &BTreeSet<String>,
    ) -> Result<(Self, Vec<QueueDef>)> {
        // Every task named on the left of a graph line, with its sections.
        let mut graph_lines: BTreeMap<String, Vec<(Sequence, String)>> = BTreeMap::new();
        for (recurrence, lines) in &raw.scheduling.graph {
            let sequence = ctx.parse_sequence(recurrence)?;
            for (task, trigger) in lines {
                validate_task_name(task)?;
                graph_lines
                    .entry(task.clone())
                    .or_default()
                    .push((sequence.clone(), trigger.clone()));
            }
        }
        if graph_lines.is_empty() {
            return Err(CyclerunError::config("the graph defines no tasks"));
        }

        for ns in raw.runtime.keys() {
            if ns != ROOT_NAMESPACE && !graph_lines.contains_key(ns) {
                let used = raw.runtime.values().any(|r| r.inherit.contains(ns));
                if !used {
                    warn!(namespace = %ns, "runtime namespace is not used by any task");
                }
            }
        }

        // Namespaces and runtime per task.
        let mut resolved: BTreeMap<String, Resolved> = BTreeMap::new();
        let mut families: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for task in graph_lines.keys() {
            let namespaces = linearize(task, raw)?;
            for ns in &namespaces[1..] {
                if ns == ROOT_NAMESPACE {
                    continue;
                }
                if graph_lines.contains_key(ns) {
                    return Err(CyclerunError::config(format!(
                        "'{ns}' is inherited by '{task}' so it is a family and cannot appear in the graph as a task"
                    )));
                }
                families.entry(ns.clone()).or_default().push(task.clone());
            }
            resolved.insert(task.clone(), resolve_runtime(task, namespaces, raw)?);
        }

        // Triggers, now that every task's outputs are known.
        let mut sections: BTreeMap<String, Vec<GraphSection>> = BTreeMap::new();
        for (task, lines) in &graph_lines {
            let mut out = Vec::new();
            let mut any_in_bounds = false;
            for (sequence, src) in lines {
                let parsed = parse_trigger(src)?;
                for label in &parsed.xtriggers {
                    if !xtrigger_labels.contains(label) {
                        return Err(CyclerunError::config(format!(
                            "task '{task}' uses undefined xtrigger '@{label}'"
                        )));
                    }
                }
                let trigger = parsed
                    .expr
                    .as_ref()
                    .map(|ast| resolve_ast(ast, ctx, &resolved, &families))
                    .transpose()?;
                if sequence.is_out_of_bounds() {
                    warn!(
                        task = %task,
                        recurrence = %sequence.expr(),
                        "recurrence is outside the initial and final cycle points"
                    );
                } else {
                    any_in_bounds = true;
                }
                out.push(GraphSection {
                    sequence: sequence.clone(),
                    trigger,
                    xtriggers: parsed.xtriggers,
                });
            }
            if !any_in_bounds {
                return Err(CyclerunError::config(format!(
                    "task '{task}' has no recurrence inside the initial and final cycle points"
                )));
            }
            sections.insert(task.clone(), out);
        }

        let (queues, assignment) = resolve_queues(raw, &graph_lines, &families)?;

        let mut defs = BTreeMap::new();
        let mut children: HashMap<(String, String), Vec<ChildEdge>> = HashMap::new();
        let mut max_future_offset: Option<Interval> = None;
        let mut max_past_offset: Option<Interval> = None;
        for (decl_index, (name, sections)) in sections.into_iter().enumerate() {
            for (idx, section) in sections.iter().enumerate() {
                let Some(trigger) = &section.trigger else {
                    continue;
                };
                for dep in trigger.dependencies() {
                    let edges = children
                        .entry((dep.task.clone(), dep.output.clone()))
                        .or_default();
                    let edge = ChildEdge {
                        child: name.clone(),
                        section: idx,
                        offset: dep.offset,
                    };
                    if !edges.contains(&edge) {
                        edges.push(edge);
                    }
                    let Some(offset) = dep.offset.filter(|o| !o.is_null()) else {
                        continue;
                    };
                    let slot = if offset.is_negative() {
                        &mut max_past_offset
                    } else {
                        &mut max_future_offset
                    };
                    let larger = slot
                        .is_none_or(|m| offset.magnitude_hint().abs() > m.magnitude_hint().abs());
                    if larger {
                        *slot = Some(offset);
                    }
                }
            }
            let Some(r) = resolved.remove(&name) else {
                continue;
            };
            let queue = assignment
                .get(&name)
                .cloned()
                .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
            defs.insert(
                name.clone(),
                Arc::new(TaskDef {
                    name,
                    decl_index,
                    namespaces: r.namespaces,
                    sections,
                    outputs: r.outputs,
                    required_outputs: r.required_outputs,
                    runtime: r.runtime,
                    queue,
                }),
            );
        }

        Ok((
            Self {
                defs,
                families,
                children,
                max_future_offset,
                max_past_offset,
            },
            queues,
        ))
    }
}

struct Resolved {
    namespaces: Vec<String>,
    outputs: BTreeMap<String, String>,
    required_outputs: BTreeSet<String>,
    runtime: TaskRuntime,
}

fn validate_task_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '%' | '.'))
        && name != ROOT_NAMESPACE;
    if valid {
        Ok(())
    } else {
        Err(CyclerunError::config(format!("invalid task name '{name}'")))
    }
}

/// Namespaces of `task`, most specific first, ending in `root`.
fn linearize(task: &str, raw: &RawWorkflowConfig) -> Result<Vec<String>> {
    fn visit(
        ns: &str,
        raw: &RawWorkflowConfig,
        stack: &mut Vec<String>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        if stack.iter().any(|s| s == ns) {
            return Err(CyclerunError::config(format!(
                "circular inheritance: {} -> {ns}",
                stack.join(" -> ")
            )));
        }
        if !out.iter().any(|s| s == ns) {
            out.push(ns.to_string());
        }
        stack.push(ns.to_string());
        if let Some(section) = raw.runtime.get(ns) {
            for parent in &section.inherit {
                if parent != ROOT_NAMESPACE && !raw.runtime.contains_key(parent) {
                    return Err(CyclerunError::config(format!(
                        "'{ns}' inherits from undefined namespace '{parent}'"
                    )));
                }
                if parent != ROOT_NAMESPACE {
                    visit(parent, raw, stack, out)?;
                }
            }
        }
        stack.pop();
        Ok(())
    }

    let mut out = Vec::new();
    visit(task, raw, &mut Vec::new(), &mut out)?;
    out.push(ROOT_NAMESPACE.to_string());
    Ok(out)
}

fn resolve_runtime(task: &str, namespaces: Vec<String>, raw: &RawWorkflowConfig) -> Result<Resolved> {
    let mut runtime = TaskRuntime {
        platform: "localhost".to_string(),
        ..TaskRuntime::default()
    };
    let mut outputs = BTreeMap::new();
    let mut required: Option<Vec<String>> = None;

    for ns in namespaces.iter().rev() {
        let Some(section) = raw.runtime.get(ns) else {
            continue;
        };
        if let Some(script) = &section.script {
            runtime.script = script.clone();
        }
        if let Some(platform) = &section.platform {
            runtime.platform = platform.clone();
        }
        if let Some(delays) = &section.execution_retry_delays {
            runtime.execution_retry_delays = parse_duration_list(delays)?;
        }
        if let Some(delays) = &section.submission_retry_delays {
            runtime.submission_retry_delays = parse_duration_list(delays)?;
        }
        runtime
            .env
            .extend(section.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        outputs.extend(section.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(req) = &section.required_outputs {
            required = Some(req.clone());
        }
    }

    for label in outputs.keys() {
        if STANDARD_OUTPUTS.contains(&label.as_str()) || standard_output(label).is_some() {
            return Err(CyclerunError::config(format!(
                "task '{task}': custom output '{label}' clashes with a standard output"
            )));
        }
    }

    let mut required_outputs = BTreeSet::new();
    for label in required.unwrap_or_else(|| vec![outputs::SUCCEEDED.to_string()]) {
        let label = match standard_output(&label) {
            Some(std) => std.to_string(),
            None if outputs.contains_key(&label) => label,
            None => {
                return Err(CyclerunError::config(format!(
                    "task '{task}': required output '{label}' is not declared"
                )));
            }
        };
        required_outputs.insert(label);
    }
    if required_outputs.contains(outputs::SUCCEEDED) && required_outputs.contains(outputs::FAILED) {
        return Err(CyclerunError::config(format!(
            "task '{task}': 'succeeded' and 'failed' cannot both be required"
        )));
    }

    Ok(Resolved {
        namespaces,
        outputs,
        required_outputs,
        runtime,
    })
}

fn resolve_ast(
    ast: &TriggerAst,
    ctx: &CyclingContext,
    tasks: &BTreeMap<String, Resolved>,
    families: &BTreeMap<String, Vec<String>>,
) -> Result<DepExpr> {
    match ast {
        TriggerAst::Ref(r) => resolve_ref(r, ctx, tasks, families),
        TriggerAst::And(terms) => Ok(DepExpr::And(
            terms
                .iter()
                .map(|t| resolve_ast(t, ctx, tasks, families))
                .collect::<Result<_>>()?,
        )),
        TriggerAst::Or(terms) => Ok(DepExpr::Or(
            terms
                .iter()
                .map(|t| resolve_ast(t, ctx, tasks, families))
                .collect::<Result<_>>()?,
        )),
        // Filtered out by the trigger parser.
        TriggerAst::Xtrigger(label) => Err(CyclerunError::config(format!(
            "xtrigger '@{label}' is not allowed here"
        ))),
    }
}

fn resolve_ref(
    r: &TriggerRef,
    ctx: &CyclingContext,
    tasks: &BTreeMap<String, Resolved>,
    families: &BTreeMap<String, Vec<String>>,
) -> Result<DepExpr> {
    let offset = r
        .offset
        .as_deref()
        .map(|o| ctx.parse_interval(o))
        .transpose()?
        .filter(|o| !o.is_null());

    if let Some(task) = tasks.get(&r.name) {
        let qualifier = r.qualifier.as_deref().unwrap_or(outputs::SUCCEEDED);
        let output = match standard_output(qualifier) {
            Some(std) => std.to_string(),
            None if task.outputs.contains_key(qualifier) => qualifier.to_string(),
            None => {
                return Err(CyclerunError::config(format!(
                    "trigger refers to undefined output '{}:{qualifier}'",
                    r.name
                )));
            }
        };
        return Ok(DepExpr::Dep(Dependency {
            task: r.name.clone(),
            offset,
            output,
        }));
    }

    let Some(members) = families.get(&r.name) else {
        return Err(CyclerunError::config(format!(
            "trigger refers to unknown task or family '{}'",
            r.name
        )));
    };

    let qualifier = r.qualifier.as_deref().unwrap_or("succeed-all");
    let (what, how) = qualifier.rsplit_once('-').ok_or_else(|| {
        CyclerunError::config(format!("invalid family qualifier '{}:{qualifier}'", r.name))
    })?;
    let outs: &[&str] = match what {
        "succeed" => &[outputs::SUCCEEDED],
        "fail" => &[outputs::FAILED],
        "finish" => &[outputs::SUCCEEDED, outputs::FAILED],
        "start" => &[outputs::STARTED],
        "submit" => &[outputs::SUBMITTED],
        "submit-fail" => &[outputs::SUBMIT_FAILED],
        _ => {
            return Err(CyclerunError::config(format!(
                "invalid family qualifier '{}:{qualifier}'",
                r.name
            )));
        }
    };

    let per_member: Vec<DepExpr> = members
        .iter()
        .map(|m| {
            let deps: Vec<DepExpr> = outs
                .iter()
                .map(|o| {
                    DepExpr::Dep(Dependency {
                        task: m.clone(),
                        offset,
                        output: (*o).to_string(),
                    })
                })
                .collect();
            if deps.len() == 1 {
                deps.into_iter().next().unwrap_or(DepExpr::Or(Vec::new()))
            } else {
                DepExpr::Or(deps)
            }
        })
        .collect();

    match how {
        "all" => Ok(DepExpr::And(per_member)),
        "any" => Ok(DepExpr::Or(per_member)),
        _ => Err(CyclerunError::config(format!(
            "invalid family qualifier '{}:{qualifier}'",
            r.name
        ))),
    }
}

type QueueAssignment = BTreeMap<String, String>;

fn resolve_queues(
    raw: &RawWorkflowConfig,
    tasks: &BTreeMap<String, Vec<(Sequence, String)>>,
    families: &BTreeMap<String, Vec<String>>,
) -> Result<(Vec<QueueDef>, QueueAssignment)> {
    let mut assignment = QueueAssignment::new();
    for (queue, section) in &raw.scheduling.queues {
        if queue == DEFAULT_QUEUE {
            continue;
        }
        for member in &section.members {
            if tasks.contains_key(member) {
                assignment.insert(member.clone(), queue.clone());
            } else if let Some(fam) = families.get(member) {
                for task in fam {
                    assignment.insert(task.clone(), queue.clone());
                }
            } else {
                return Err(CyclerunError::config(format!(
                    "queue '{queue}' names unknown task or family '{member}'"
                )));
            }
        }
    }

    let default_limit = raw
        .scheduling
        .queues
        .get(DEFAULT_QUEUE)
        .map(|q| q.limit)
        .unwrap_or(DEFAULT_QUEUE_LIMIT);
    let mut queues = vec![QueueDef {
        name: DEFAULT_QUEUE.to_string(),
        limit: default_limit,
        members: tasks
            .keys()
            .filter(|t| !assignment.contains_key(*t))
            .cloned()
            .collect(),
    }];
    for (queue, section) in &raw.scheduling.queues {
        if queue == DEFAULT_QUEUE {
            continue;
        }
        queues.push(QueueDef {
            name: queue.clone(),
            limit: section.limit,
            members: assignment
                .iter()
                .filter(|(_, q)| *q == queue)
                .map(|(t, _)| t.clone())
                .collect(),
        });
    }
    Ok((queues, assignment))
}
