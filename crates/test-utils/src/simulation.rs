//! A deterministic, single-threaded driver for [`CoreRuntime`].
//!
//! Plays the role of the async runtime without any real time or
//! processes: commands are applied directly, job events come from a
//! [`Plan`], and the clock only moves when nothing else can happen.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use cyclerun::clock::ManualClock;
use cyclerun::config::WorkflowConfig;
use cyclerun::engine::hooks::WorkflowEvent;
use cyclerun::engine::{
    CoreCommand, CoreOptions, CoreRuntime, CoreStep, ExitReason, JobEvent, JobEventKind, JobHandle,
    JobSpec, RuntimeEvent, WorkflowEventHandler,
};
use cyclerun::persistence::Store;
use cyclerun::retry::XtriggerRegistry;

use crate::fake_submitter::{JobOutcome, Plan, events_for};

/// Collects every workflow event, for assertions.
#[derive(Debug, Default)]
pub struct EventRecorder(std::sync::Mutex<Vec<WorkflowEvent>>);

impl EventRecorder {
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl WorkflowEventHandler for EventRecorder {
    fn handle(&self, event: &WorkflowEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

pub struct Simulation {
    core: CoreRuntime,
    clock: ManualClock,
    store: Store,
    plan: Plan,
    pending: VecDeque<RuntimeEvent>,
    submitted: Vec<JobSpec>,
    hung: Vec<JobHandle>,
    xtriggers: XtriggerRegistry,
    recorder: Arc<EventRecorder>,
}

fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

impl Simulation {
    fn wrap(mut core: CoreRuntime, clock: ManualClock, store: Store, plan: Plan) -> Self {
        let recorder = Arc::new(EventRecorder::default());
        core.hooks_mut().add_handler(recorder.clone());
        Self {
            core,
            clock,
            store,
            plan,
            pending: VecDeque::new(),
            submitted: Vec::new(),
            hung: Vec::new(),
            xtriggers: XtriggerRegistry::with_builtins(),
            recorder,
        }
    }

    /// A fresh run against an in-memory database.
    pub fn fresh(config: WorkflowConfig, plan: Plan) -> Self {
        let store = Store::open_in_memory().expect("in-memory store");
        Self::fresh_with(config, CoreOptions::default(), store, plan)
    }

    pub fn fresh_with(config: WorkflowConfig, options: CoreOptions, store: Store, plan: Plan) -> Self {
        let clock = ManualClock::new(start_time());
        let core = CoreRuntime::new(config, Arc::new(clock.clone()), options).expect("core");
        Self::wrap(core, clock, store, plan)
    }

    /// Restart the run recorded in `store`.
    pub fn restart(config: WorkflowConfig, options: CoreOptions, store: Store, plan: Plan) -> Self {
        let clock = ManualClock::new(start_time());
        let core = CoreRuntime::restart(config, Arc::new(clock.clone()), options, &store).expect("restart");
        Self::wrap(core, clock, store, plan)
    }

    /// Use `registry` for xtrigger calls.
    pub fn with_xtriggers(mut self, registry: XtriggerRegistry) -> Self {
        self.xtriggers = registry;
        self
    }

    /// Run the first iteration. Returns the exit reason if it already ended.
    pub fn start(&mut self) -> Option<ExitReason> {
        let step = self.core.start();
        self.execute(step)
    }

    /// Feed queued events and iterate until the core exits. When nothing
    /// is pending the clock jumps to the next wake-up, or by one main loop
    /// interval. Gives up after `max_iterations`.
    pub fn run_until_exit(&mut self, max_iterations: usize) -> Option<ExitReason> {
        for _ in 0..max_iterations {
            if self.pending.is_empty() {
                let now = self.core.context().now();
                match self.core.next_wakeup() {
                    Some(at) if at > now => self.clock.set(at),
                    Some(_) => {}
                    None => self.clock.advance(self.core.main_loop_interval()),
                }
            }
            while let Some(event) = self.pending.pop_front() {
                self.core.handle(event);
            }
            let step = self.core.iterate();
            if let Some(reason) = self.execute(step) {
                return Some(reason);
            }
        }
        None
    }

    /// Carry out one iteration's commands, as the async runtime would.
    pub fn execute(&mut self, step: CoreStep) -> Option<ExitReason> {
        let mut exit = None;
        for command in step.commands {
            match command {
                CoreCommand::Persist(batch) => {
                    self.store.commit(&batch).expect("commit");
                    self.core.mark_persisted();
                }
                CoreCommand::SubmitJobs(jobs) => {
                    for spec in jobs {
                        let outcome = (self.plan)(&spec);
                        if outcome == JobOutcome::Hang {
                            self.hung.push(spec.handle());
                        }
                        self.pending
                            .extend(events_for(&spec, &outcome).into_iter().map(RuntimeEvent::Job));
                        self.submitted.push(spec);
                    }
                }
                CoreCommand::KillJobs(handles) => {
                    for handle in handles {
                        if self.take_hung(&handle) {
                            self.pending.push_back(RuntimeEvent::Job(JobEvent::new(
                                handle.id,
                                handle.submit_num,
                                JobEventKind::Failed {
                                    exit_code: None,
                                    signal: Some("SIGKILL".to_string()),
                                },
                            )));
                        }
                    }
                }
                CoreCommand::PollJobs(handles) => {
                    for handle in handles {
                        let alive = self
                            .hung
                            .iter()
                            .any(|h| h.id == handle.id && h.submit_num == handle.submit_num);
                        let kind = if alive {
                            JobEventKind::Started
                        } else {
                            JobEventKind::Failed {
                                exit_code: None,
                                signal: Some("job lost".to_string()),
                            }
                        };
                        self.pending
                            .push_back(RuntimeEvent::Job(JobEvent::new(handle.id, handle.submit_num, kind)));
                    }
                }
                CoreCommand::CallXtriggers(calls) => {
                    for call in calls {
                        let outcome = self.xtriggers.call(&call);
                        self.pending.push_back(RuntimeEvent::XtriggerResult {
                            signature: call.signature.clone(),
                            outcome,
                        });
                    }
                }
                CoreCommand::RequestExit(reason) => exit = Some(reason),
            }
        }
        if step.keep_running {
            None
        } else {
            Some(exit.unwrap_or(ExitReason::Completed))
        }
    }

    fn take_hung(&mut self, handle: &JobHandle) -> bool {
        let before = self.hung.len();
        self.hung
            .retain(|h| h.id != handle.id || h.submit_num != handle.submit_num);
        self.hung.len() < before
    }

    /// Report `kind` for every hung job. Returns how many there were.
    pub fn finish_hung(&mut self, kind: JobEventKind) -> usize {
        let hung = std::mem::take(&mut self.hung);
        for handle in &hung {
            self.pending.push_back(RuntimeEvent::Job(JobEvent::new(
                handle.id.clone(),
                handle.submit_num,
                kind.clone(),
            )));
        }
        hung.len()
    }

    pub fn send(&mut self, event: RuntimeEvent) {
        self.pending.push_back(event);
    }

    pub fn core(&self) -> &CoreRuntime {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut CoreRuntime {
        &mut self.core
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Every job submitted so far, in order.
    pub fn submitted(&self) -> &[JobSpec] {
        &self.submitted
    }

    /// `point/name` of every submitted job, in order.
    pub fn submitted_ids(&self) -> Vec<String> {
        self.submitted.iter().map(|j| j.id.to_string()).collect()
    }

    pub fn hung(&self) -> &[JobHandle] {
        &self.hung
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.recorder.events()
    }

    pub fn into_store(self) -> Store {
        self.store
    }
}
