// src/engine/runtime.rs

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::load_and_validate;
use crate::errors::{CyclerunError, Result};
use crate::exec::JobSubmitter;
use crate::persistence::Store;
use crate::retry::{XtriggerCall, XtriggerOutcome, XtriggerRegistry};

use super::core::CoreRuntime;
use super::{Command, CoreCommand, ExitReason, RuntimeEvent};

/// Drives the [`CoreRuntime`] from `RuntimeEvent`s and carries out the
/// commands it returns: commits to the database, talks to the job
/// submitter and runs xtrigger functions on the blocking pool.
///
/// All scheduling semantics live in the core; this is only the IO shell.
pub struct Runtime<S: JobSubmitter> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    submitter: S,
    store: Store,
    xtriggers: XtriggerRegistry,
    config_path: Option<PathBuf>,
}

impl<S: JobSubmitter> fmt::Debug for Runtime<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("store", &self.store.path())
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

impl<S: JobSubmitter> Runtime<S> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        submitter: S,
        store: Store,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            submitter,
            store,
            xtriggers: XtriggerRegistry::with_builtins(),
            config_path: None,
        }
    }

    /// Use `registry` for xtrigger calls instead of the built-ins alone.
    pub fn with_xtriggers(mut self, registry: XtriggerRegistry) -> Self {
        self.xtriggers = registry;
        self
    }

    /// The file re-read on `ReloadRequested` and `Command::Reload`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Main event loop. Returns why the core stopped; an abort is an error.
    pub async fn run(mut self) -> Result<ExitReason> {
        info!("cyclerun runtime started");

        let mut step = self.core.start();
        loop {
            let exit = self.execute(step.commands).await?;
            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                return match exit {
                    Some(ExitReason::Aborted(reason)) => Err(CyclerunError::Aborted(reason)),
                    Some(reason) => Ok(reason),
                    None => Ok(ExitReason::Completed),
                };
            }

            let event = self.wait_for_event().await;
            self.dispatch(event);
            while let Ok(event) = self.event_rx.try_recv() {
                self.dispatch(event);
            }
            step = self.core.iterate();
        }
    }

    /// Next event, or `Tick` once the sleep is up.
    async fn wait_for_event(&mut self) -> RuntimeEvent {
        let sleep = self.sleep_duration();
        match tokio::time::timeout(sleep, self.event_rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => RuntimeEvent::Tick,
        }
    }

    fn sleep_duration(&self) -> Duration {
        let max = self.core.main_loop_interval().to_std().unwrap_or(Duration::from_secs(1));
        match self.core.next_wakeup() {
            Some(at) => (at - self.core.context().now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(max),
            None => max,
        }
    }

    fn dispatch(&mut self, event: RuntimeEvent) {
        debug!(?event, "runtime received event");
        match event {
            RuntimeEvent::ReloadRequested | RuntimeEvent::Command(Command::Reload) => {
                let loaded = self.reload();
                self.core.handle(loaded);
            }
            event => self.core.handle(event),
        }
    }

    fn reload(&self) -> RuntimeEvent {
        let Some(path) = &self.config_path else {
            return RuntimeEvent::ConfigRejected("no configuration file to reload".to_string());
        };
        info!(path = %path.display(), "reloading configuration");
        match load_and_validate(path) {
            Ok(config) => RuntimeEvent::ConfigLoaded(Box::new(config)),
            Err(err) => RuntimeEvent::ConfigRejected(err.to_string()),
        }
    }

    /// Execute one iteration's commands in order.
    async fn execute(&mut self, commands: Vec<CoreCommand>) -> Result<Option<ExitReason>> {
        let mut exit = None;
        for command in commands {
            match command {
                CoreCommand::Persist(batch) => {
                    self.store.commit(&batch)?;
                    self.core.mark_persisted();
                }
                CoreCommand::SubmitJobs(jobs) => {
                    debug!(jobs = jobs.len(), "submitting jobs");
                    self.submitter.submit(jobs).await?;
                }
                CoreCommand::KillJobs(jobs) => self.submitter.kill(jobs).await?,
                CoreCommand::PollJobs(jobs) => self.submitter.poll(jobs).await?,
                CoreCommand::CallXtriggers(calls) => {
                    for call in calls {
                        self.spawn_xtrigger(call);
                    }
                }
                CoreCommand::RequestExit(reason) => {
                    info!(?reason, "core issued RequestExit command");
                    exit = Some(reason);
                }
            }
        }
        Ok(exit)
    }

    fn spawn_xtrigger(&self, call: XtriggerCall) {
        let registry = self.xtriggers.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let signature = call.signature.clone();
            let outcome = tokio::task::spawn_blocking(move || registry.call(&call))
                .await
                .unwrap_or_else(|err| XtriggerOutcome::Failed(err.to_string()));
            if tx
                .send(RuntimeEvent::XtriggerResult { signature, outcome })
                .await
                .is_err()
            {
                warn!("runtime gone before xtrigger result arrived");
            }
        });
    }
}
