// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{RawWorkflowConfig, RunaheadLimit, SchedulerSettings, WorkflowConfig};
use crate::cycling::point::parse_utc_offset;
use crate::cycling::{CyclePoint, CyclingContext, Interval, IsoDuration};
use crate::errors::{CyclerunError, Result};
use crate::retry::xtrigger::XtriggerDef;
use crate::taskdef::TaskDefStore;

/// Offset of a dependency as (months, seconds), so that a sum around a
/// cycle is zero exactly when it lands back on the starting point.
type OffsetSum = (i64, i64);

impl TryFrom<RawWorkflowConfig> for WorkflowConfig {
    type Error = CyclerunError;

    fn try_from(raw: RawWorkflowConfig) -> std::result::Result<Self, Self::Error> {
        let tz = parse_utc_offset(&raw.scheduler.cycle_point_tz)?;
        let cycling = CyclingContext::new(
            raw.scheduling.cycling_mode,
            &raw.scheduling.initial_cycle_point,
            raw.scheduling.final_cycle_point.as_deref(),
            tz,
        )?;

        let xtriggers = validate_xtriggers(&raw, &cycling)?;
        let labels: BTreeSet<String> = xtriggers.keys().cloned().collect();
        let (defs, queues) = TaskDefStore::build(&raw, &cycling, &labels)?;
        validate_same_point_cycles(&defs)?;
        validate_offset_cycles(&defs)?;

        let runahead = parse_runahead(&raw.scheduling.runahead_limit, &cycling)?;
        let stop_point = optional_point(&cycling, raw.scheduling.stop_after_cycle_point.as_deref(), "stop")?;
        let hold_point = optional_point(&cycling, raw.scheduling.hold_after_cycle_point.as_deref(), "hold")?;
        let scheduler = validate_scheduler(&raw)?;

        Ok(WorkflowConfig {
            scheduler,
            cycling,
            runahead,
            stop_point,
            hold_point,
            queues,
            xtriggers,
            defs: Arc::new(defs),
            fingerprint: None,
        })
    }
}

fn validate_xtriggers(
    raw: &RawWorkflowConfig,
    cycling: &CyclingContext,
) -> Result<BTreeMap<String, XtriggerDef>> {
    raw.scheduling
        .xtriggers
        .iter()
        .map(|(label, section)| Ok((label.clone(), XtriggerDef::from_section(label, section, cycling)?)))
        .collect()
}

/// Same-point dependency cycles can never be satisfied, so they are
/// rejected here rather than left to stall at runtime.
fn validate_same_point_cycles(defs: &TaskDefStore) -> Result<()> {
    // Edge direction: upstream -> downstream.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for def in defs.iter() {
        graph.add_node(def.name.as_str());
    }

    for def in defs.iter() {
        for section in &def.sections {
            let Some(trigger) = &section.trigger else {
                continue;
            };
            for dep in trigger.dependencies() {
                if !dep.is_same_point() {
                    continue;
                }
                if dep.task == def.name {
                    return Err(CyclerunError::DependencyCycle(format!(
                        "task '{}' depends on itself at the same cycle point",
                        def.name
                    )));
                }
                graph.add_edge(dep.task.as_str(), def.name.as_str(), ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(CyclerunError::DependencyCycle(format!(
            "same-point dependency cycle involving task '{}'",
            cycle.node_id()
        ))),
    }
}

fn offset_sum(offset: Option<&Interval>) -> OffsetSum {
    match offset {
        None => (0, 0),
        Some(Interval::Integer(i)) => (0, *i),
        Some(Interval::Duration(d)) => {
            let sign = if d.negative { -1 } else { 1 };
            let months = i64::from(d.years) * 12 + i64::from(d.months);
            let seconds = ((i64::from(d.weeks) * 7 + i64::from(d.days)) * 24 + i64::from(d.hours)) * 3600
                + i64::from(d.minutes) * 60
                + i64::from(d.seconds);
            (sign * months, sign * seconds)
        }
    }
}

/// Cycles whose offsets add up to nothing, e.g. `a = "b[-P1]"` with
/// `b = "a[+P1]"`: every instance would wait on itself.
fn validate_offset_cycles(defs: &TaskDefStore) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    let mut offsets: BTreeMap<(&str, &str), BTreeSet<OffsetSum>> = BTreeMap::new();
    for def in defs.iter() {
        graph.add_node(def.name.as_str());
        for section in &def.sections {
            let Some(trigger) = &section.trigger else {
                continue;
            };
            for dep in trigger.dependencies() {
                graph.add_edge(dep.task.as_str(), def.name.as_str(), ());
                offsets
                    .entry((dep.task.as_str(), def.name.as_str()))
                    .or_default()
                    .insert(offset_sum(dep.offset.as_ref()));
            }
        }
    }

    for component in tarjan_scc(&graph) {
        for (i, &start) in component.iter().enumerate() {
            // Cycles through an earlier member were already walked from it.
            let allowed: BTreeSet<&str> = component[i..].iter().copied().collect();
            if has_zero_cycle(start, start, (0, 0), &allowed, &offsets, &mut BTreeSet::new()) {
                let mut names = component.clone();
                names.sort_unstable();
                return Err(CyclerunError::DependencyCycle(format!(
                    "dependency cycle through cycle offsets returns to the same point: {}",
                    names.join(", ")
                )));
            }
        }
    }
    Ok(())
}

fn has_zero_cycle<'a>(
    start: &'a str,
    at: &'a str,
    sum: OffsetSum,
    allowed: &BTreeSet<&'a str>,
    offsets: &BTreeMap<(&'a str, &'a str), BTreeSet<OffsetSum>>,
    visited: &mut BTreeSet<&'a str>,
) -> bool {
    for (&(from, to), sums) in offsets.range((at, "")..) {
        if from != at {
            break;
        }
        if !allowed.contains(to) {
            continue;
        }
        for step in sums {
            let next = (sum.0.saturating_add(step.0), sum.1.saturating_add(step.1));
            if to == start {
                if next == (0, 0) {
                    return true;
                }
                continue;
            }
            if visited.insert(to) {
                let found = has_zero_cycle(start, to, next, allowed, offsets, visited);
                visited.remove(to);
                if found {
                    return true;
                }
            }
        }
    }
    false
}

/// `"5"` is a count of active points; anything else is an interval span.
fn parse_runahead(s: &str, cycling: &CyclingContext) -> Result<RunaheadLimit> {
    let s = s.trim();
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        let n: usize = s
            .parse()
            .map_err(|_| CyclerunError::config(format!("invalid runahead limit '{s}'")))?;
        if n == 0 {
            return Err(CyclerunError::config("runahead limit must be at least 1 cycle point"));
        }
        return Ok(RunaheadLimit::Points(n));
    }
    let span: Interval = cycling.parse_interval(s)?;
    if span.is_negative() {
        return Err(CyclerunError::config(format!("runahead limit '{s}' is negative")));
    }
    Ok(RunaheadLimit::Span(span))
}

fn optional_point(
    cycling: &CyclingContext,
    s: Option<&str>,
    what: &str,
) -> Result<Option<CyclePoint>> {
    let Some(s) = s else {
        return Ok(None);
    };
    let point = cycling.parse_point(s)?;
    if point < cycling.initial {
        return Err(CyclerunError::config(format!(
            "{what} point {point} is before the initial cycle point {}",
            cycling.initial
        )));
    }
    Ok(Some(point))
}

fn validate_scheduler(raw: &RawWorkflowConfig) -> Result<SchedulerSettings> {
    let main_loop_interval = IsoDuration::parse(&raw.scheduler.main_loop_interval)?;
    if main_loop_interval.exact_seconds().is_none_or(|s| s <= 0) {
        return Err(CyclerunError::config(format!(
            "[scheduler].main_loop_interval must be a positive exact duration (got {})",
            raw.scheduler.main_loop_interval
        )));
    }
    let stall_timeout = raw
        .scheduler
        .stall_timeout
        .as_deref()
        .map(IsoDuration::parse)
        .transpose()?;
    if raw.scheduler.abort_on_stall_timeout && stall_timeout.is_none() {
        return Err(CyclerunError::config(
            "[scheduler].abort_on_stall_timeout requires stall_timeout",
        ));
    }
    Ok(SchedulerSettings {
        main_loop_interval,
        stall_timeout,
        abort_on_stall_timeout: raw.scheduler.abort_on_stall_timeout,
    })
}
