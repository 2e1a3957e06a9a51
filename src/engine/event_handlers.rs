// src/engine/event_handlers.rs

//! Applying single events to a [`SchedulerContext`].
//!
//! Job events are matched to a proxy by `point/name` and submit number. An
//! event whose submit number no proxy carries is stale and dropped, as is
//! one that would move a proxy backwards (a `started` after `succeeded`).
//! Events that skip a step (`succeeded` straight from `preparing`) imply
//! the steps in between.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::engine::core::SchedulerContext;
use crate::engine::hooks::WorkflowEvent;
use crate::engine::{Command, ExitReason, JobEvent, JobEventKind, JobSpec, RuntimeEvent};
use crate::persistence::{
    JobRow, PARAM_FINGERPRINT, PARAM_HOLD_POINT, PARAM_IS_HELD, PARAM_STOP_POINT, PARAM_STOP_TASK, time_str,
};
use crate::pool::ProxyKey;
use crate::retry::retry_delay;
use crate::task::outputs;
use crate::task::{FlowNums, PendingRetry, RetryKind, TaskAction, TaskId, TaskProxy, TaskStatus};
use crate::types::{FlowOption, StopMode};

/// Platform used when a task names none.
pub const DEFAULT_PLATFORM: &str = "localhost";

pub fn handle_event(ctx: &mut SchedulerContext, event: RuntimeEvent) {
    match event {
        RuntimeEvent::Job(job) => handle_job_event(ctx, job),
        RuntimeEvent::XtriggerResult { signature, outcome } => ctx.xtriggers.on_result(&signature, outcome),
        RuntimeEvent::Command(command) => handle_command(ctx, command),
        RuntimeEvent::ReloadRequested | RuntimeEvent::Tick => {}
        RuntimeEvent::ConfigLoaded(config) => apply_reload(ctx, *config),
        RuntimeEvent::ConfigRejected(reason) => {
            ctx.hooks.dispatch(&WorkflowEvent::ReloadFailed { reason });
        }
        RuntimeEvent::ShutdownRequested => ctx.request_stop(StopMode::Now, ExitReason::Stopped(StopMode::Now)),
    }
}

/// Move `key` to preparing (if needed), allocate its submit number and
/// build the job.
pub(crate) fn prepare_job(ctx: &mut SchedulerContext, key: ProxyKey, now: DateTime<Utc>) -> Option<JobSpec> {
    let proxy = ctx.pool.get(key)?;
    let action = match proxy.status() {
        TaskStatus::Preparing => None,
        TaskStatus::Waiting if !proxy.is_manual_submit => Some(TaskAction::Prepare),
        _ => Some(TaskAction::ForceTrigger),
    };
    if let Some(action) = action {
        if let Err(err) = ctx.pool.transition(key, action, now) {
            warn!(error = %err, "not submitting");
            return None;
        }
    }
    let submit_num = ctx.pool.next_submit_num(key)?;

    let proxy = ctx.pool.get(key)?;
    let runtime = ctx
        .broadcasts
        .effective_runtime(&proxy.def, proxy.point())
        .unwrap_or_else(|err| {
            warn!(task = %proxy.id, error = %err, "ignoring broadcast settings");
            proxy.def.runtime.clone()
        });
    let platform = if runtime.platform.is_empty() {
        DEFAULT_PLATFORM.to_string()
    } else {
        runtime.platform.clone()
    };
    let spec = JobSpec {
        id: proxy.id.clone(),
        flow_nums: proxy.flow_nums.clone(),
        submit_num,
        try_num: proxy.try_num,
        script: runtime.script,
        platform: platform.clone(),
        env: runtime.env,
    };
    ctx.out.jobs.push(JobRow {
        platform: Some(platform.clone()),
        ..job_row(proxy)
    });
    if let Some(p) = ctx.pool.get_mut(key) {
        p.platform = Some(platform);
        p.job_ref = None;
    }
    info!(task = %spec.id, submit_num, try_num = spec.try_num, "submitting job");
    Some(spec)
}

fn job_row(proxy: &TaskProxy) -> JobRow {
    JobRow {
        point: proxy.id.point.to_string(),
        name: proxy.id.name.clone(),
        submit_num: proxy.submit_num,
        flow_nums: proxy.flow_nums.to_db_string(),
        try_num: proxy.try_num,
        is_manual_submit: proxy.is_manual_submit,
        ..Default::default()
    }
}

fn apply(ctx: &mut SchedulerContext, key: ProxyKey, action: TaskAction, now: DateTime<Utc>) -> bool {
    match ctx.pool.transition(key, action, now) {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "ignoring job event");
            false
        }
    }
}

fn status_of(ctx: &SchedulerContext, key: ProxyKey) -> Option<TaskStatus> {
    ctx.pool.get(key).map(TaskProxy::status)
}

pub fn handle_job_event(ctx: &mut SchedulerContext, event: JobEvent) {
    let now = ctx.now();
    let keys = ctx.pool.keys_for(&event.id).to_vec();
    let found = keys
        .iter()
        .copied()
        .find(|k| ctx.pool.get(*k).is_some_and(|p| p.submit_num == event.submit_num));
    let Some(key) = found else {
        debug!(task = %event.id, submit_num = event.submit_num, "no proxy for job event; discarding");
        return;
    };
    if ctx.pool.get(key).is_some_and(|p| p.poll_pending) {
        if let Some(p) = ctx.pool.get_mut(key) {
            p.poll_pending = false;
        }
    }
    let Some(status) = status_of(ctx, key) else {
        return;
    };

    match event.kind {
        JobEventKind::Submitted { job_ref } => {
            if status == TaskStatus::Preparing {
                job_submitted(ctx, key, Some(job_ref), now);
            } else {
                debug!(task = %event.id, %status, "duplicate submitted event");
            }
        }
        JobEventKind::Started => {
            if matches!(status, TaskStatus::Preparing | TaskStatus::Submitted) {
                catch_up(ctx, key, now);
            } else {
                debug!(task = %event.id, %status, "late started event");
            }
        }
        JobEventKind::Succeeded => {
            catch_up(ctx, key, now);
            if status_of(ctx, key) == Some(TaskStatus::Running) {
                job_succeeded(ctx, key, now);
            } else {
                debug!(task = %event.id, %status, "late succeeded event");
            }
        }
        JobEventKind::Failed { exit_code, signal } => {
            catch_up(ctx, key, now);
            if status_of(ctx, key) == Some(TaskStatus::Running) {
                job_failed(ctx, key, exit_code, signal, now);
            } else {
                debug!(task = %event.id, %status, "late failed event");
            }
        }
        JobEventKind::SubmitFailed { reason } => {
            if matches!(status, TaskStatus::Preparing | TaskStatus::Submitted) {
                job_submit_failed(ctx, key, &reason, now);
            } else {
                debug!(task = %event.id, %status, "late submit-failed event");
            }
        }
        JobEventKind::Message(text) => job_message(ctx, key, &text, now),
    }
}

/// Bring a preparing or submitted proxy to running.
fn catch_up(ctx: &mut SchedulerContext, key: ProxyKey, now: DateTime<Utc>) {
    if status_of(ctx, key) == Some(TaskStatus::Preparing) {
        job_submitted(ctx, key, None, now);
    }
    if status_of(ctx, key) == Some(TaskStatus::Submitted) {
        job_started(ctx, key, now);
    }
}

fn job_submitted(ctx: &mut SchedulerContext, key: ProxyKey, job_ref: Option<String>, now: DateTime<Utc>) {
    if !apply(ctx, key, TaskAction::JobSubmitted, now) {
        return;
    }
    if job_ref.is_some() {
        if let Some(p) = ctx.pool.get_mut(key) {
            p.job_ref = job_ref.clone();
        }
    }
    ctx.pool.complete_output(key, outputs::SUBMITTED, now);
    let Some(p) = ctx.pool.get(key) else {
        return;
    };
    let kill = p.kill_requested;
    ctx.out.jobs.push(JobRow {
        job_ref,
        time_submit: Some(time_str(now)),
        submit_status: Some(0),
        ..job_row(p)
    });
    if kill {
        if let Some(handle) = ctx.job_handle(key) {
            ctx.out.kills.push(handle);
        }
    }
}

fn job_started(ctx: &mut SchedulerContext, key: ProxyKey, now: DateTime<Utc>) {
    if !apply(ctx, key, TaskAction::JobStarted, now) {
        return;
    }
    ctx.pool.complete_output(key, outputs::STARTED, now);
    if let Some(p) = ctx.pool.get(key) {
        ctx.out.jobs.push(JobRow {
            time_run: Some(time_str(now)),
            ..job_row(p)
        });
    }
}

fn job_succeeded(ctx: &mut SchedulerContext, key: ProxyKey, now: DateTime<Utc>) {
    if !apply(ctx, key, TaskAction::JobSucceeded, now) {
        return;
    }
    ctx.pool.complete_output(key, outputs::SUCCEEDED, now);
    if let Some(p) = ctx.pool.get(key) {
        ctx.out.jobs.push(JobRow {
            time_run_exit: Some(time_str(now)),
            run_status: Some(0),
            ..job_row(p)
        });
    }
    report_if_incomplete(ctx, key);
}

fn job_failed(
    ctx: &mut SchedulerContext,
    key: ProxyKey,
    exit_code: Option<i32>,
    signal: Option<String>,
    now: DateTime<Utc>,
) {
    if !apply(ctx, key, TaskAction::JobFailed, now) {
        return;
    }
    let Some(p) = ctx.pool.get(key) else {
        return;
    };
    info!(task = %p.id, exit_code = ?exit_code, signal = ?signal, "job failed");
    ctx.out.jobs.push(JobRow {
        time_run_exit: Some(time_str(now)),
        run_status: Some(1),
        run_signal: signal,
        ..job_row(p)
    });

    if p.kill_requested {
        if let Some(p) = ctx.pool.get_mut(key) {
            p.kill_requested = false;
        }
        ctx.pool.hold(key, now);
    } else {
        let delays = ctx
            .broadcasts
            .effective_runtime(&p.def, p.point())
            .map(|r| r.execution_retry_delays)
            .unwrap_or_else(|_| p.def.runtime.execution_retry_delays.clone());
        if let Some(delay) = retry_delay(&delays, p.try_num) {
            arm_retry(ctx, key, RetryKind::Execution, delay, now);
            return;
        }
    }
    ctx.pool.complete_output(key, outputs::FAILED, now);
    report_if_incomplete(ctx, key);
}

fn job_submit_failed(ctx: &mut SchedulerContext, key: ProxyKey, reason: &str, now: DateTime<Utc>) {
    if !apply(ctx, key, TaskAction::JobSubmitFailed, now) {
        return;
    }
    let Some(p) = ctx.pool.get(key) else {
        return;
    };
    warn!(task = %p.id, submit_num = p.submit_num, %reason, "job submission failed");
    ctx.out.jobs.push(JobRow {
        time_submit: Some(time_str(now)),
        submit_status: Some(1),
        ..job_row(p)
    });

    if p.kill_requested {
        if let Some(p) = ctx.pool.get_mut(key) {
            p.kill_requested = false;
        }
        ctx.pool.hold(key, now);
    } else {
        let delays = ctx
            .broadcasts
            .effective_runtime(&p.def, p.point())
            .map(|r| r.submission_retry_delays)
            .unwrap_or_else(|_| p.def.runtime.submission_retry_delays.clone());
        if let Some(delay) = retry_delay(&delays, p.submit_try_num) {
            arm_retry(ctx, key, RetryKind::Submission, delay, now);
            return;
        }
    }
    ctx.pool.complete_output(key, outputs::SUBMIT_FAILED, now);
    report_if_incomplete(ctx, key);
}

fn arm_retry(
    ctx: &mut SchedulerContext,
    key: ProxyKey,
    kind: RetryKind,
    delay: crate::cycling::IsoDuration,
    now: DateTime<Utc>,
) {
    if !apply(ctx, key, TaskAction::Retry, now) {
        return;
    }
    let fire_at = now + delay.to_time_delta();
    let Some(p) = ctx.pool.get_mut(key) else {
        return;
    };
    p.retry = Some(PendingRetry { kind, fire_at });
    let try_num = match kind {
        RetryKind::Execution => {
            p.try_num += 1;
            p.try_num
        }
        RetryKind::Submission => {
            p.submit_try_num += 1;
            p.submit_try_num
        }
    };
    let id = p.id.clone();
    ctx.timers.arm(key, fire_at);
    ctx.hooks.dispatch(&WorkflowEvent::Retrying {
        id,
        kind,
        try_num,
        delay,
    });
}

fn job_message(ctx: &mut SchedulerContext, key: ProxyKey, text: &str, now: DateTime<Utc>) {
    let Some(p) = ctx.pool.get(key) else {
        return;
    };
    let Some(label) = p.outputs.label_for_message(text).map(str::to_string) else {
        debug!(task = %p.id, message = %text, "job message");
        return;
    };
    match p.status() {
        TaskStatus::Preparing | TaskStatus::Submitted => catch_up(ctx, key, now),
        TaskStatus::Running => {}
        status if status.is_final() => {}
        status => {
            debug!(task = %p.id, %status, output = %label, "ignoring output message");
            return;
        }
    }
    ctx.pool.complete_output(key, &label, now);
}

fn report_if_incomplete(ctx: &mut SchedulerContext, key: ProxyKey) {
    let Some(p) = ctx.pool.get(key) else {
        return;
    };
    if p.is_incomplete() {
        let missing = p.outputs.missing_required().into_iter().map(str::to_string).collect();
        let id = p.id.clone();
        ctx.hooks.dispatch(&WorkflowEvent::TaskIncomplete { id, missing });
    }
}

fn glob_set(patterns: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => warn!(%pattern, error = %err, "invalid task pattern"),
        }
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(err) => {
            warn!(error = %err, "invalid task patterns");
            None
        }
    }
}

fn matching(ctx: &SchedulerContext, patterns: &[String]) -> Vec<ProxyKey> {
    let keys = glob_set(patterns).map(|set| ctx.pool.matching(&set)).unwrap_or_default();
    if keys.is_empty() {
        warn!(patterns = %patterns.join(" "), "no tasks matched");
    }
    keys
}

pub fn handle_command(ctx: &mut SchedulerContext, command: Command) {
    info!(?command, "command");
    let now = ctx.now();
    match command {
        Command::Hold { tasks } => {
            for key in matching(ctx, &tasks) {
                ctx.pool.hold(key, now);
            }
        }
        Command::Release { tasks } => {
            for key in matching(ctx, &tasks) {
                ctx.pool.release(key, now);
            }
        }
        Command::HoldAll => {
            ctx.pool.set_hold_all(true);
            for key in ctx.pool.keys() {
                ctx.pool.hold(key, now);
            }
            ctx.set_param(PARAM_IS_HELD, Some("1".to_string()));
        }
        Command::ReleaseAll => {
            ctx.pool.set_hold_all(false);
            for key in ctx.pool.keys() {
                ctx.pool.release(key, now);
            }
            ctx.set_param(PARAM_IS_HELD, None);
        }
        Command::HoldAfter { point } => hold_after(ctx, point.as_deref(), now),
        Command::Trigger { tasks, flow } => trigger(ctx, &tasks, flow, now),
        Command::Kill { tasks } => {
            for key in matching(ctx, &tasks) {
                kill(ctx, key, now);
            }
        }
        Command::Remove { tasks } => {
            for key in matching(ctx, &tasks) {
                ctx.request_kill(key);
                ctx.pool.remove(key, "removed by request");
            }
        }
        Command::SetStopPoint { point } => {
            let parsed = match point.as_deref().map(|p| ctx.pool.cycling().parse_point(p)).transpose() {
                Ok(p) => p,
                Err(err) => {
                    warn!(error = %err, "invalid stop point");
                    return;
                }
            };
            info!(stop_point = ?parsed.as_ref().map(ToString::to_string), "stop point set");
            ctx.set_param(PARAM_STOP_POINT, parsed.as_ref().map(ToString::to_string));
            ctx.pool.set_stop_point(parsed);
        }
        Command::SetStopTask { task } => {
            let parsed = match task.as_deref().map(|t| TaskId::parse(t, ctx.pool.cycling())).transpose() {
                Ok(t) => t,
                Err(err) => {
                    warn!(error = %err, "invalid stop task");
                    return;
                }
            };
            ctx.set_param(PARAM_STOP_TASK, parsed.as_ref().map(ToString::to_string));
            ctx.stop_task = parsed;
        }
        Command::BroadcastPut {
            points,
            namespaces,
            settings,
        } => {
            let cycling = ctx.pool.cycling().clone();
            match ctx.broadcasts.put(&points, &namespaces, &settings, &cycling) {
                Ok(n) => {
                    info!(settings = n, "broadcast applied");
                    ctx.out.broadcasts_changed = true;
                }
                Err(err) => warn!(error = %err, "broadcast rejected"),
            }
        }
        Command::BroadcastClear { points, namespaces } => {
            let cycling = ctx.pool.cycling().clone();
            match ctx
                .broadcasts
                .clear(points.as_deref(), namespaces.as_deref(), &cycling)
            {
                Ok(n) => {
                    info!(settings = n, "broadcast cleared");
                    ctx.out.broadcasts_changed |= n > 0;
                }
                Err(err) => warn!(error = %err, "broadcast clear rejected"),
            }
        }
        Command::Reload => debug!("reload is carried out by the runtime"),
        Command::Stop { mode } => ctx.request_stop(mode, ExitReason::Stopped(mode)),
    }
}

fn hold_after(ctx: &mut SchedulerContext, point: Option<&str>, now: DateTime<Utc>) {
    let parsed = match point.map(|p| ctx.pool.cycling().parse_point(p)).transpose() {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "invalid hold point");
            return;
        }
    };
    ctx.set_param(PARAM_HOLD_POINT, parsed.as_ref().map(ToString::to_string));
    if let Some(limit) = &parsed {
        let beyond: Vec<ProxyKey> = ctx
            .pool
            .iter()
            .filter(|(_, p)| p.point() > limit)
            .map(|(k, _)| k)
            .collect();
        for key in beyond {
            ctx.pool.hold(key, now);
        }
    }
    ctx.pool.set_hold_point(parsed);
}

fn kill(ctx: &mut SchedulerContext, key: ProxyKey, now: DateTime<Utc>) {
    let retrying = ctx.pool.get(key).is_some_and(|p| p.retry.is_some());
    if retrying {
        if apply(ctx, key, TaskAction::Kill, now) {
            if let Some(p) = ctx.pool.get(key) {
                info!(task = %p.id, "retry cancelled");
            }
        }
        return;
    }
    ctx.request_kill(key);
}

fn trigger(ctx: &mut SchedulerContext, tasks: &[String], flow: FlowOption, now: DateTime<Utc>) {
    if ctx.stop_mode.is_some() {
        warn!("stopping; not triggering");
        return;
    }
    let flows = match flow {
        FlowOption::All => {
            let active = ctx.pool.active_flows();
            if active.is_none() { FlowNums::single(1) } else { active }
        }
        FlowOption::New => {
            let record = ctx.flows.new_flow("triggered", now);
            let flows = FlowNums::single(record.number);
            ctx.out.flows.push(record);
            flows
        }
        FlowOption::Number(n) => {
            if let Some(record) = ctx.flows.ensure(n, "triggered", now) {
                ctx.out.flows.push(record);
            }
            FlowNums::single(n)
        }
        FlowOption::None => FlowNums::none(),
    };

    for task in tasks {
        let id = match TaskId::parse(task, ctx.pool.cycling()) {
            Ok(id) => id,
            Err(err) => {
                warn!(%task, error = %err, "cannot trigger");
                continue;
            }
        };
        let Some(def) = ctx.pool.defs().get(&id.name).cloned() else {
            warn!(task = %id, "cannot trigger: no such task");
            continue;
        };
        if !def.is_valid_point(&id.point) {
            warn!(task = %id, "cannot trigger: not on any of the task's sequences");
            continue;
        }
        let existing = match flow {
            FlowOption::All => ctx.pool.keys_for(&id).first().copied(),
            _ => ctx.pool.find(&id, &flows),
        };
        let key = match existing {
            Some(key) => {
                if ctx.pool.get(key).is_some_and(TaskProxy::is_active) {
                    warn!(task = %id, "already active; not triggering");
                    continue;
                }
                key
            }
            None => {
                let proxy = TaskProxy::new(def.clone(), id.point.clone(), flows.clone(), ctx.pool.initial_point());
                ctx.pool.insert(proxy)
            }
        };
        if let Some(p) = ctx.pool.get_mut(key) {
            if p.is_final() {
                p.outputs = def.new_outputs();
            }
            p.force_satisfy();
        }
        if let Err(err) = ctx.pool.transition(key, TaskAction::ForceTrigger, now) {
            warn!(task = %id, error = %err, "cannot trigger");
            continue;
        }
        info!(task = %id, "triggered");
        ctx.out.submit.push(key);
    }
}

fn apply_reload(ctx: &mut SchedulerContext, config: WorkflowConfig) {
    let summary = ctx.pool.reload(&config);
    ctx.xtriggers.set_defs(config.xtriggers.clone());
    if let Some(fingerprint) = &config.fingerprint {
        ctx.set_param(PARAM_FINGERPRINT, Some(fingerprint.clone()));
    }
    ctx.config = config;
    ctx.hooks.dispatch(&WorkflowEvent::Reloaded(summary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeDelta, TimeZone};

    use crate::clock::ManualClock;
    use crate::config::RawWorkflowConfig;
    use crate::cycling::CyclePoint;
    use crate::engine::core::{CoreOptions, CoreRuntime};
    use crate::engine::{CoreCommand, CoreStep};

    fn config(src: &str) -> WorkflowConfig {
        let raw: RawWorkflowConfig = toml::from_str(src).unwrap();
        WorkflowConfig::try_from(raw).unwrap()
    }

    fn started(src: &str) -> (CoreRuntime, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let mut core = CoreRuntime::new(config(src), Arc::new(clock.clone()), CoreOptions::default()).unwrap();
        core.start();
        core.mark_persisted();
        (core, clock)
    }

    fn id(point: i64, name: &str) -> TaskId {
        TaskId::new(CyclePoint::Integer(point), name)
    }

    fn job(core: &mut CoreRuntime, id: &TaskId, submit_num: u32, kind: JobEventKind) {
        core.handle(RuntimeEvent::Job(JobEvent::new(id.clone(), submit_num, kind)));
    }

    fn submitted(step: &CoreStep) -> Vec<(String, u32, u32)> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::SubmitJobs(jobs) => Some(
                    jobs.iter()
                        .map(|j| (j.id.to_string(), j.submit_num, j.try_num))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn proxy<'a>(core: &'a CoreRuntime, id: &TaskId) -> &'a TaskProxy {
        let key = core.pool().keys_for(id)[0];
        core.pool().get(key).unwrap()
    }

    const RETRYING: &str = r#"
        [scheduling]
        cycling_mode = "integer"
        initial_cycle_point = "1"
        final_cycle_point = "1"
        [scheduling.graph."R1"]
        a = ""
        [runtime.a]
        execution_retry_delays = "2*PT5S"
    "#;

    #[test]
    fn failures_retry_after_the_configured_delays() {
        let (mut core, clock) = started(RETRYING);
        let a = id(1, "a");
        for (submit_num, expected_try) in [(1, 1), (2, 2)] {
            job(&mut core, &a, submit_num, JobEventKind::Started);
            job(
                &mut core,
                &a,
                submit_num,
                JobEventKind::Failed {
                    exit_code: Some(1),
                    signal: None,
                },
            );
            let step = core.iterate();
            assert!(submitted(&step).is_empty());
            let p = proxy(&core, &a);
            assert_eq!(p.status(), TaskStatus::Waiting);
            assert_eq!(p.try_num, expected_try + 1);
            clock.advance(TimeDelta::seconds(5));
            let step = core.iterate();
            assert_eq!(submitted(&step), vec![("1/a".to_string(), submit_num + 1, expected_try + 1)]);
        }
        job(&mut core, &a, 3, JobEventKind::Started);
        job(
            &mut core,
            &a,
            3,
            JobEventKind::Failed {
                exit_code: Some(1),
                signal: None,
            },
        );
        assert_eq!(proxy(&core, &a).status(), TaskStatus::Failed);
        assert!(proxy(&core, &a).outputs.is_completed(outputs::FAILED));
    }

    #[test]
    fn killed_jobs_are_held_and_not_retried() {
        let (mut core, _) = started(RETRYING);
        let a = id(1, "a");
        job(&mut core, &a, 1, JobEventKind::Started);
        core.handle(RuntimeEvent::Command(Command::Kill {
            tasks: vec!["1/a".to_string()],
        }));
        let step = core.iterate();
        assert!(step.commands.iter().any(|c| matches!(c, CoreCommand::KillJobs(k) if k.len() == 1)));
        job(
            &mut core,
            &a,
            1,
            JobEventKind::Failed {
                exit_code: None,
                signal: Some("SIGKILL".into()),
            },
        );
        let p = proxy(&core, &a);
        assert_eq!(p.status(), TaskStatus::Failed);
        assert!(p.is_held);
        assert!(p.retry.is_none());
    }

    #[test]
    fn custom_outputs_complete_from_messages() {
        let (mut core, _) = started(
            r#"
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            final_cycle_point = "1"
            [scheduling.graph."R1"]
            a = ""
            b = "a:ready"
            [runtime.a.outputs]
            ready = "data ready"
            "#,
        );
        let a = id(1, "a");
        job(&mut core, &a, 1, JobEventKind::Message("data ready".into()));
        assert_eq!(proxy(&core, &a).status(), TaskStatus::Running);
        let step = core.iterate();
        assert_eq!(submitted(&step), vec![("1/b".to_string(), 1, 1)]);
    }

    #[test]
    fn trigger_reruns_a_finished_task_in_a_new_flow() {
        let (mut core, _) = started(
            r#"
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            [scheduling.graph."P1"]
            a = ""
            "#,
        );
        let a = id(1, "a");
        job(&mut core, &a, 1, JobEventKind::Succeeded);
        core.handle(RuntimeEvent::Command(Command::Trigger {
            tasks: vec!["1/a".to_string()],
            flow: FlowOption::New,
        }));
        let step = core.iterate();
        let jobs = submitted(&step);
        assert!(jobs.contains(&("1/a".to_string(), 2, 1)));
        assert!(core.context().flows.records().any(|r| r.number == 2));
    }

    #[test]
    fn hold_and_release_by_glob() {
        let (mut core, _) = started(
            r#"
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            runahead_limit = "3"
            [scheduling.graph."P1"]
            a = ""
            "#,
        );
        core.handle(RuntimeEvent::Command(Command::Hold {
            tasks: vec!["*/a".to_string()],
        }));
        assert!(core.pool().iter().all(|(_, p)| p.is_held));
        core.handle(RuntimeEvent::Command(Command::Release {
            tasks: vec!["2/*".to_string()],
        }));
        assert!(!proxy(&core, &id(2, "a")).is_held);
        assert!(proxy(&core, &id(1, "a")).is_held);
    }

    #[test]
    fn rejected_reload_keeps_the_pool() {
        let (mut core, _) = started(RETRYING);
        let before = core.snapshot();
        core.handle(RuntimeEvent::ConfigRejected("bad graph".into()));
        assert_eq!(core.snapshot(), before);
    }
}
