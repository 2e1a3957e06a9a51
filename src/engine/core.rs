// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! [`CoreRuntime`] consumes [`RuntimeEvent`]s and, once per loop
//! iteration, produces the [`CoreCommand`]s the shell must carry out. It
//! has no channels, no Tokio types and performs no IO; time comes from an
//! injected [`Clock`]. One iteration:
//!
//! 1. fire due retry timers;
//! 2. release proxies within the runahead limit;
//! 3. evaluate xtriggers and queue ready proxies;
//! 4. release queues and prepare jobs;
//! 5. check for stop, auto shutdown and stall;
//! 6. prune and housekeep;
//! 7. collect everything that changed into one [`PersistBatch`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::broadcast::Broadcasts;
use crate::clock::Clock;
use crate::config::WorkflowConfig;
use crate::engine::event_handlers::{handle_event, prepare_job};
use crate::engine::hooks::{HandlerRegistry, WorkflowEvent};
use crate::engine::{CoreCommand, CoreStep, ExitReason, JobHandle, RuntimeEvent};
use crate::errors::Result;
use crate::persistence::{
    JobRow, PARAM_CYCLE_POINT_TZ, PARAM_FINAL_POINT, PARAM_FINGERPRINT, PARAM_HOLD_POINT, PARAM_INITIAL_POINT,
    PARAM_IS_HELD, PARAM_STOP_POINT, PARAM_STOP_TASK, PersistBatch, ProxyRecord, Store, rehydrate,
};
use crate::pool::{Pool, ProxyKey};
use crate::retry::{RetryTimers, XtriggerManager};
use crate::task::flow::FlowRecord;
use crate::task::{FlowManager, FlowNums, RetryKind, TaskAction, TaskId, TaskStatus};
use crate::types::StopMode;

/// Start-up options that are not part of the workflow configuration.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Substituted for `%(workflow)s` in xtrigger arguments.
    pub workflow: String,
    /// Start with every task held.
    pub hold_start: bool,
    /// Overrides the configured (or, on restart, persisted) stop point.
    pub stop_point: Option<String>,
    pub stop_task: Option<String>,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            workflow: "cyclerun".to_string(),
            hold_start: false,
            stop_point: None,
            stop_task: None,
        }
    }
}

/// Work collected by event handlers for the next iteration.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    /// Proxies to submit without waiting for a queue.
    pub submit: Vec<ProxyKey>,
    pub kills: Vec<JobHandle>,
    pub polls: Vec<JobHandle>,
    pub jobs: Vec<JobRow>,
    pub params: Vec<(String, Option<String>)>,
    pub flows: Vec<FlowRecord>,
    pub broadcasts_changed: bool,
}

#[derive(Debug, Default)]
struct StallState {
    since: Option<DateTime<Utc>>,
    timeout_fired: bool,
}

/// Everything the loop works on, passed explicitly to every handler.
#[derive(Debug)]
pub struct SchedulerContext {
    pub config: WorkflowConfig,
    pub pool: Pool,
    pub clock: Arc<dyn Clock>,
    pub broadcasts: Broadcasts,
    pub flows: FlowManager,
    pub timers: RetryTimers,
    pub xtriggers: XtriggerManager,
    pub hooks: HandlerRegistry,
    pub stop_mode: Option<StopMode>,
    pub stop_task: Option<TaskId>,
    pub(crate) stop_reason: Option<ExitReason>,
    pub(crate) out: Outbox,
}

impl SchedulerContext {
    fn new(config: WorkflowConfig, clock: Arc<dyn Clock>, workflow: &str) -> Self {
        Self {
            pool: Pool::new(&config),
            xtriggers: XtriggerManager::new(config.xtriggers.clone(), workflow),
            config,
            clock,
            broadcasts: Broadcasts::new(),
            flows: FlowManager::new(),
            timers: RetryTimers::new(),
            hooks: HandlerRegistry::with_logging(),
            stop_mode: None,
            stop_task: None,
            stop_reason: None,
            out: Outbox::default(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn set_param(&mut self, key: &str, value: Option<String>) {
        self.out.params.push((key.to_string(), value));
    }

    pub(crate) fn job_handle(&self, key: ProxyKey) -> Option<JobHandle> {
        self.pool.get(key).map(|p| JobHandle {
            id: p.id.clone(),
            submit_num: p.submit_num,
            job_ref: p.job_ref.clone(),
        })
    }

    /// Escalate the stop mode; a later, milder request does not soften it.
    pub(crate) fn request_stop(&mut self, mode: StopMode, reason: ExitReason) {
        let mode = self.stop_mode.map_or(mode, |current| current.max(mode));
        info!(%mode, "stop requested");
        self.stop_mode = Some(mode);
        if self.stop_reason.is_none() || mode != StopMode::Clean {
            self.stop_reason = Some(reason);
        }
        if mode == StopMode::Kill {
            let active: Vec<ProxyKey> = self
                .pool
                .iter()
                .filter(|(_, p)| p.is_active())
                .map(|(k, _)| k)
                .collect();
            for key in active {
                self.request_kill(key);
            }
        }
    }

    /// Flag an active proxy for killing and queue the kill if its job exists.
    pub(crate) fn request_kill(&mut self, key: ProxyKey) {
        if !self.pool.get(key).is_some_and(|p| p.is_active() && !p.kill_requested) {
            return;
        }
        let now = self.now();
        if let Err(err) = self.pool.transition(key, TaskAction::Kill, now) {
            warn!(error = %err, "cannot kill");
            return;
        }
        let Some(p) = self.pool.get(key) else {
            return;
        };
        let has_job = matches!(p.status(), TaskStatus::Submitted | TaskStatus::Running);
        info!(task = %p.id, submit_num = p.submit_num, "kill requested");
        if has_job {
            if let Some(handle) = self.job_handle(key) {
                self.out.kills.push(handle);
            }
        }
    }
}

#[derive(Debug)]
pub struct CoreRuntime {
    ctx: SchedulerContext,
    restarted: bool,
    started: bool,
    hold_start: bool,
    stall: StallState,
}

impl CoreRuntime {
    /// A fresh run of `config`. Nothing is spawned until [`CoreRuntime::start`].
    pub fn new(config: WorkflowConfig, clock: Arc<dyn Clock>, options: CoreOptions) -> Result<Self> {
        let mut ctx = SchedulerContext::new(config, clock, &options.workflow);
        if let Some(point) = &options.stop_point {
            let point = ctx.pool.cycling().parse_point(point)?;
            ctx.pool.set_stop_point(Some(point));
        }
        if let Some(task) = &options.stop_task {
            ctx.stop_task = Some(TaskId::parse(task, ctx.pool.cycling())?);
        }
        Ok(Self {
            ctx,
            restarted: false,
            started: false,
            hold_start: options.hold_start,
            stall: StallState::default(),
        })
    }

    /// Rebuild the run recorded in `store`. Command-line stop point and stop
    /// task override the persisted ones.
    pub fn restart(config: WorkflowConfig, clock: Arc<dyn Clock>, options: CoreOptions, store: &Store) -> Result<Self> {
        let mut ctx = SchedulerContext::new(config, clock, &options.workflow);
        let restored = rehydrate(&mut ctx.pool, store)?;
        let params = &restored.params;
        let cycling = ctx.pool.cycling().clone();

        if let Some(icp) = params.get(PARAM_INITIAL_POINT) {
            if *icp != cycling.initial.to_string() {
                warn!(stored = %icp, configured = %cycling.initial, "initial cycle point changed since the last run");
            }
        }

        let stop_point = match &options.stop_point {
            Some(p) => Some(cycling.parse_point(p)?),
            None => params
                .get(PARAM_STOP_POINT)
                .map(|p| cycling.parse_point(p))
                .transpose()?,
        };
        ctx.pool.set_stop_point(stop_point);
        let hold_point = params
            .get(PARAM_HOLD_POINT)
            .map(|p| cycling.parse_point(p))
            .transpose()?;
        ctx.pool.set_hold_point(hold_point);
        ctx.pool
            .set_hold_all(params.get(PARAM_IS_HELD).is_some_and(|v| v == "1"));
        ctx.stop_task = match &options.stop_task {
            Some(t) => Some(TaskId::parse(t, &cycling)?),
            None => params
                .get(PARAM_STOP_TASK)
                .map(|t| TaskId::parse(t, &cycling))
                .transpose()?,
        };

        ctx.flows.restore(restored.flows);
        ctx.broadcasts.restore(restored.broadcasts);
        ctx.xtriggers.restore(restored.xtriggers);
        for (key, retry) in restored.timers {
            ctx.timers.arm(key, retry.fire_at);
        }
        for key in restored.poll {
            if let Some(handle) = ctx.job_handle(key) {
                ctx.out.polls.push(handle);
            }
        }
        ctx.out.submit.extend(restored.resubmit);
        if let Some(stop) = &options.stop_point {
            ctx.set_param(PARAM_STOP_POINT, Some(stop.clone()));
        }
        if let Some(task) = &ctx.stop_task {
            let task = task.to_string();
            ctx.set_param(PARAM_STOP_TASK, Some(task));
        }
        if let Some(fp) = ctx.config.fingerprint.clone() {
            ctx.set_param(PARAM_FINGERPRINT, Some(fp));
        }

        Ok(Self {
            ctx,
            restarted: true,
            started: false,
            hold_start: options.hold_start,
            stall: StallState::default(),
        })
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SchedulerContext {
        &mut self.ctx
    }

    pub fn pool(&self) -> &Pool {
        &self.ctx.pool
    }

    pub fn hooks_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.ctx.hooks
    }

    /// The pool as it would be persisted.
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.ctx.pool.snapshot()
    }

    pub fn main_loop_interval(&self) -> TimeDelta {
        self.ctx.config.scheduler.main_loop_interval.to_time_delta()
    }

    /// Spawn the initial tasks (fresh runs only) and run the first iteration.
    pub fn start(&mut self) -> CoreStep {
        if !self.started {
            self.started = true;
            let now = self.ctx.now();
            if self.hold_start {
                self.ctx.pool.set_hold_all(true);
                self.ctx.set_param(PARAM_IS_HELD, Some("1".to_string()));
                if self.restarted {
                    for key in self.ctx.pool.keys() {
                        self.ctx.pool.hold(key, now);
                    }
                }
            }
            if !self.restarted {
                self.seed(now);
            }
            let restart = self.restarted;
            self.ctx.hooks.dispatch(&WorkflowEvent::Startup { restart });
        }
        self.iterate()
    }

    fn seed(&mut self, now: DateTime<Utc>) {
        let ctx = &mut self.ctx;
        let flow = ctx.flows.new_flow("original flow", now);
        let flows = FlowNums::single(flow.number);
        ctx.out.flows.push(flow);

        let cycling = ctx.pool.cycling().clone();
        ctx.set_param(PARAM_INITIAL_POINT, Some(cycling.initial.to_string()));
        ctx.set_param(PARAM_FINAL_POINT, cycling.final_point.as_ref().map(ToString::to_string));
        ctx.set_param(PARAM_CYCLE_POINT_TZ, Some(cycling.tz.to_string()));
        let stop = ctx.pool.stop_point().map(ToString::to_string);
        ctx.set_param(PARAM_STOP_POINT, stop);
        let hold = ctx.pool.hold_point().map(ToString::to_string);
        ctx.set_param(PARAM_HOLD_POINT, hold);
        let stop_task = ctx.stop_task.as_ref().map(ToString::to_string);
        ctx.set_param(PARAM_STOP_TASK, stop_task);
        let fingerprint = ctx.config.fingerprint.clone();
        ctx.set_param(PARAM_FINGERPRINT, fingerprint);

        ctx.pool.spawn_initial(&flows);
        info!(initial = %cycling.initial, tasks = ctx.pool.len(), "spawned initial tasks");
    }

    /// Apply one event without running an iteration.
    pub fn handle(&mut self, event: RuntimeEvent) {
        handle_event(&mut self.ctx, event);
    }

    /// Apply one event and run an iteration.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        self.handle(event);
        self.iterate()
    }

    /// One pass of the scheduler loop.
    pub fn iterate(&mut self) -> CoreStep {
        let now = self.ctx.now();
        self.fire_due_timers(now);
        self.ctx.pool.release_runahead();

        let ctx = &mut self.ctx;
        let pass = ctx.xtriggers.evaluate(ctx.pool.iter(), now);
        for (key, label) in pass.satisfied {
            if let Some(p) = ctx.pool.get_mut(key) {
                p.xtriggers.insert(label, true);
            }
        }
        ctx.pool.queue_ready();

        let mut release = std::mem::take(&mut ctx.out.submit);
        if ctx.stop_mode.is_none() {
            release.extend(ctx.pool.release_queued());
        } else {
            release.retain(|k| ctx.pool.get(*k).is_some_and(|p| p.status() == TaskStatus::Preparing));
        }
        let mut seen = HashSet::new();
        release.retain(|k| seen.insert(*k));
        let jobs: Vec<_> = release
            .into_iter()
            .filter_map(|key| prepare_job(ctx, key, now))
            .collect();

        let busy = !jobs.is_empty() || !pass.calls.is_empty();
        let exit = self.check_progress(now, busy);

        let ctx = &mut self.ctx;
        ctx.pool.prune_removable();
        ctx.pool.housekeep_output_index();
        if let Some(oldest) = ctx.pool.min_point() {
            let cycling = ctx.pool.cycling().clone();
            if ctx.broadcasts.expire(&oldest, &cycling) > 0 {
                ctx.out.broadcasts_changed = true;
            }
        }
        ctx.xtriggers.housekeep(ctx.pool.iter().map(|(_, p)| p));

        let batch = self.take_persist_batch();
        let ctx = &mut self.ctx;
        let mut commands = Vec::new();
        if !batch.is_empty() {
            commands.push(CoreCommand::Persist(batch));
        }
        if !jobs.is_empty() {
            commands.push(CoreCommand::SubmitJobs(jobs));
        }
        let kills = std::mem::take(&mut ctx.out.kills);
        if !kills.is_empty() {
            commands.push(CoreCommand::KillJobs(kills));
        }
        let polls = std::mem::take(&mut ctx.out.polls);
        if !polls.is_empty() {
            commands.push(CoreCommand::PollJobs(polls));
        }
        if !pass.calls.is_empty() {
            commands.push(CoreCommand::CallXtriggers(pass.calls));
        }

        let keep_running = exit.is_none();
        if let Some(reason) = exit {
            ctx.hooks.dispatch(&WorkflowEvent::Shutdown {
                reason: format!("{reason:?}"),
            });
            commands.push(CoreCommand::RequestExit(reason));
        }
        CoreStep {
            commands,
            keep_running,
        }
    }

    /// Everything changed since the last batch. Publishes the state changes
    /// to the registered sinks.
    pub fn take_persist_batch(&mut self) -> PersistBatch {
        let ctx = &mut self.ctx;
        let events = ctx.pool.take_changes();
        ctx.hooks.publish(&events);
        let (upserts, deletes) = ctx.pool.take_dirty();
        let (xtrigger_upserts, xtrigger_deletes) = ctx.xtriggers.take_dirty();
        let broadcasts = std::mem::take(&mut ctx.out.broadcasts_changed).then(|| ctx.broadcasts.rows());
        PersistBatch {
            params: std::mem::take(&mut ctx.out.params),
            flows: std::mem::take(&mut ctx.out.flows),
            deletes,
            upserts,
            jobs: std::mem::take(&mut ctx.out.jobs),
            events,
            xtrigger_upserts,
            xtrigger_deletes,
            broadcasts,
        }
    }

    /// The last batch is committed; its proxies may now be pruned.
    pub fn mark_persisted(&mut self) {
        self.ctx.pool.mark_persisted();
    }

    /// Earliest time something is due without any new event.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        let stall_deadline = match (&self.stall.since, &self.ctx.config.scheduler.stall_timeout) {
            (Some(since), Some(timeout)) if !self.stall.timeout_fired => Some(*since + timeout.to_time_delta()),
            _ => None,
        };
        [self.ctx.timers.next_due(), stall_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    fn fire_due_timers(&mut self, now: DateTime<Utc>) {
        let ctx = &mut self.ctx;
        for (key, fire_at) in ctx.timers.pop_due(now) {
            let Some(retry) = ctx
                .pool
                .get(key)
                .and_then(|p| p.retry)
                .filter(|r| r.fire_at == fire_at)
            else {
                continue;
            };
            let Some(p) = ctx.pool.get_mut(key) else {
                continue;
            };
            p.retry = None;
            info!(task = %p.id, kind = retry.kind.as_str(), "retry timer fired");
            if retry.kind == RetryKind::Submission && !p.is_held {
                ctx.out.submit.push(key);
            }
        }
    }

    /// Stop, auto shutdown and stall detection.
    fn check_progress(&mut self, now: DateTime<Utc>, busy: bool) -> Option<ExitReason> {
        let ctx = &mut self.ctx;

        if let Some(task) = ctx.stop_task.clone() {
            if ctx.pool.has_succeeded(&task) {
                info!(task = %task, "stop task succeeded");
                ctx.stop_task = None;
                ctx.set_param(PARAM_STOP_TASK, None);
                ctx.request_stop(StopMode::Clean, ExitReason::StopTask(task));
            }
        }

        let any_active = ctx.pool.iter().any(|(_, p)| p.is_active());
        if let Some(mode) = ctx.stop_mode {
            let done = match mode {
                StopMode::NowNow => true,
                StopMode::Now => !ctx.pool.iter().any(|(_, p)| p.status() == TaskStatus::Preparing),
                StopMode::Clean | StopMode::Kill => !any_active,
            };
            if !done {
                return None;
            }
            let orphaned: Vec<TaskId> = ctx
                .pool
                .iter()
                .filter(|(_, p)| p.is_active())
                .map(|(_, p)| p.id.clone())
                .collect();
            if mode == StopMode::NowNow && !orphaned.is_empty() {
                ctx.hooks.dispatch(&WorkflowEvent::OrphanedJobs { ids: orphaned });
            } else if !orphaned.is_empty() {
                info!(jobs = orphaned.len(), "leaving active jobs for the next restart to poll");
            }
            return Some(ctx.stop_reason.clone().unwrap_or(ExitReason::Stopped(mode)));
        }

        let horizon = ctx.pool.stop_point().or(ctx.pool.final_point()).cloned();
        let within = |point: &crate::cycling::CyclePoint| horizon.as_ref().is_none_or(|h| point <= h);
        let unfinished = ctx
            .pool
            .iter()
            .any(|(_, p)| !p.definition_removed && within(p.point()) && !(p.is_final() && p.is_complete()));
        if !any_active && !busy && !unfinished && (horizon.is_some() || ctx.pool.is_empty()) {
            if let Some(stop) = ctx.pool.stop_point().cloned() {
                info!(stop_point = %stop, "reached stop point");
                ctx.pool.set_stop_point(None);
                ctx.set_param(PARAM_STOP_POINT, None);
            }
            return Some(ExitReason::Completed);
        }

        let can_progress = any_active
            || busy
            || !ctx.pool.queues().is_empty()
            || ctx.xtriggers.has_in_flight()
            || ctx.pool.iter().any(|(_, p)| {
                p.retry.is_some()
                    || (p.status() == TaskStatus::Waiting
                        && !p.is_runahead
                        && p.prereqs_satisfied()
                        && (p.is_held || !p.xtriggers_satisfied()))
            });
        if can_progress {
            if self.stall.since.take().is_some() {
                info!("workflow no longer stalled");
            }
            self.stall.timeout_fired = false;
            return None;
        }

        let since = match self.stall.since {
            Some(since) => since,
            None => {
                let unmet: Vec<(TaskId, Vec<String>)> = ctx
                    .pool
                    .unmet_prerequisites()
                    .into_iter()
                    .filter(|(id, _)| within(&id.point))
                    .collect();
                let incomplete: Vec<TaskId> = ctx
                    .pool
                    .iter()
                    .filter(|(_, p)| p.is_incomplete() && !p.definition_removed)
                    .map(|(_, p)| p.id.clone())
                    .collect();
                ctx.hooks.dispatch(&WorkflowEvent::Stalled { unmet, incomplete });
                self.stall.since = Some(now);
                now
            }
        };

        let settings = &ctx.config.scheduler;
        if let Some(timeout) = settings.stall_timeout {
            if !self.stall.timeout_fired && now >= since + timeout.to_time_delta() {
                self.stall.timeout_fired = true;
                ctx.hooks.dispatch(&WorkflowEvent::StallTimeout);
                if settings.abort_on_stall_timeout {
                    let reason = format!("stall timeout ({timeout}) reached");
                    ctx.hooks.dispatch(&WorkflowEvent::Aborted { reason: reason.clone() });
                    return Some(ExitReason::Aborted(reason));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::clock::ManualClock;
    use crate::config::model::RawWorkflowConfig;
    use crate::engine::{JobEvent, JobEventKind};

    fn config(src: &str) -> WorkflowConfig {
        let raw: RawWorkflowConfig = toml::from_str(src).unwrap();
        WorkflowConfig::try_from(raw).unwrap()
    }

    fn core(src: &str) -> (CoreRuntime, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let core = CoreRuntime::new(config(src), Arc::new(clock.clone()), CoreOptions::default()).unwrap();
        (core, clock)
    }

    fn submitted(step: &CoreStep) -> Vec<String> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::SubmitJobs(jobs) => Some(jobs.iter().map(|j| j.id.to_string()).collect::<Vec<_>>()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn run_job(core: &mut CoreRuntime, id: &str, submit_num: u32, last: JobEventKind) -> CoreStep {
        let cycling = core.pool().cycling().clone();
        let id = TaskId::parse(id, &cycling).unwrap();
        for kind in [
            JobEventKind::Submitted {
                job_ref: "1".to_string(),
            },
            JobEventKind::Started,
            last,
        ] {
            core.handle(RuntimeEvent::Job(JobEvent::new(id.clone(), submit_num, kind)));
        }
        let step = core.iterate();
        core.mark_persisted();
        step
    }

    const CHAIN: &str = r#"
        [scheduling]
        cycling_mode = "integer"
        initial_cycle_point = "1"
        final_cycle_point = "1"
        [scheduling.graph."R1"]
        a = ""
        b = "a"
    "#;

    #[test]
    fn runs_a_chain_to_completion() {
        let (mut core, _) = core(CHAIN);
        let step = core.start();
        assert_eq!(submitted(&step), vec!["1/a"]);
        assert!(matches!(step.commands[0], CoreCommand::Persist(_)));
        core.mark_persisted();

        let step = run_job(&mut core, "1/a", 1, JobEventKind::Succeeded);
        assert_eq!(submitted(&step), vec!["1/b"]);
        let step = run_job(&mut core, "1/b", 1, JobEventKind::Succeeded);
        assert!(!step.keep_running);
        assert!(matches!(
            step.commands.last(),
            Some(CoreCommand::RequestExit(ExitReason::Completed))
        ));
    }

    #[test]
    fn stale_and_duplicate_events_are_discarded() {
        let (mut core, _) = core(CHAIN);
        core.start();
        core.mark_persisted();
        let id = TaskId::new(crate::cycling::CyclePoint::Integer(1), "a");
        core.handle(RuntimeEvent::Job(JobEvent::new(id.clone(), 0, JobEventKind::Succeeded)));
        core.handle(RuntimeEvent::Job(JobEvent::new(id.clone(), 1, JobEventKind::Started)));
        core.handle(RuntimeEvent::Job(JobEvent::new(
            id.clone(),
            1,
            JobEventKind::Submitted { job_ref: "9".into() },
        )));
        let key = core.pool().keys_for(&id)[0];
        assert_eq!(core.pool().get(key).unwrap().status(), TaskStatus::Running);
    }

    #[test]
    fn failed_task_stalls_then_aborts_after_timeout() {
        let (mut core, clock) = core(
            r#"
            [scheduler]
            stall_timeout = "PT10S"
            abort_on_stall_timeout = true
            [scheduling]
            cycling_mode = "integer"
            initial_cycle_point = "1"
            final_cycle_point = "1"
            [scheduling.graph."R1"]
            a = ""
            "#,
        );
        core.start();
        core.mark_persisted();
        let step = run_job(
            &mut core,
            "1/a",
            1,
            JobEventKind::Failed {
                exit_code: Some(1),
                signal: None,
            },
        );
        assert!(step.keep_running);
        assert!(core.next_wakeup().is_some());
        clock.advance(TimeDelta::seconds(11));
        let step = core.iterate();
        assert!(matches!(
            step.commands.last(),
            Some(CoreCommand::RequestExit(ExitReason::Aborted(_)))
        ));
    }

    #[test]
    fn clean_stop_waits_for_active_jobs() {
        let (mut core, _) = core(CHAIN);
        core.start();
        core.mark_persisted();
        let step = core.step(RuntimeEvent::Command(crate::engine::Command::Stop {
            mode: StopMode::Clean,
        }));
        assert!(step.keep_running);
        let step = run_job(&mut core, "1/a", 1, JobEventKind::Succeeded);
        assert!(submitted(&step).is_empty());
        assert!(!step.keep_running);
    }
}
