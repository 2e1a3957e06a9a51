// src/engine/hooks.rs

//! Workflow event handlers and state-change sinks.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cycling::IsoDuration;
use crate::pool::reload::ReloadSummary;
use crate::task::{RetryKind, StateChange, TaskId};

/// Workflow-level events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    Startup {
        restart: bool,
    },
    Shutdown {
        reason: String,
    },
    /// Nothing can progress without intervention.
    Stalled {
        unmet: Vec<(TaskId, Vec<String>)>,
        incomplete: Vec<TaskId>,
    },
    StallTimeout,
    Retrying {
        id: TaskId,
        kind: RetryKind,
        try_num: u32,
        delay: IsoDuration,
    },
    Reloaded(ReloadSummary),
    ReloadFailed {
        reason: String,
    },
    TaskIncomplete {
        id: TaskId,
        missing: Vec<String>,
    },
    /// Jobs left behind by a `now` or `now-now` stop.
    OrphanedJobs {
        ids: Vec<TaskId>,
    },
    Aborted {
        reason: String,
    },
}

pub trait WorkflowEventHandler: Send + Sync {
    fn handle(&self, event: &WorkflowEvent);
}

/// Receives every proxy status change, in order.
pub trait StateChangeSink: Send + Sync {
    fn publish(&self, change: &StateChange);
}

/// Writes each workflow event as one log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl WorkflowEventHandler for LogHandler {
    fn handle(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::Startup { restart } => info!(restart, "workflow started"),
            WorkflowEvent::Shutdown { reason } => info!(%reason, "workflow shutting down"),
            WorkflowEvent::Stalled { unmet, incomplete } => {
                for (id, conditions) in unmet {
                    warn!(task = %id, unmet = %conditions.join(", "), "unmet prerequisites");
                }
                for id in incomplete {
                    warn!(task = %id, "incomplete task");
                }
                warn!(unmet = unmet.len(), incomplete = incomplete.len(), "workflow stalled");
            }
            WorkflowEvent::StallTimeout => warn!("stall timeout"),
            WorkflowEvent::Retrying {
                id,
                kind,
                try_num,
                delay,
            } => info!(task = %id, kind = kind.as_str(), try_num, %delay, "retrying"),
            WorkflowEvent::Reloaded(summary) => info!(
                added = summary.added.len(),
                removed = summary.removed.len(),
                orphaned = summary.orphaned.len(),
                "configuration reloaded"
            ),
            WorkflowEvent::ReloadFailed { reason } => {
                error!(%reason, "reload failed; keeping the current configuration")
            }
            WorkflowEvent::TaskIncomplete { id, missing } => {
                warn!(task = %id, missing = %missing.join(", "), "task finished incomplete")
            }
            WorkflowEvent::OrphanedJobs { ids } => {
                let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                warn!(jobs = %ids.join(", "), "orphaned active jobs")
            }
            WorkflowEvent::Aborted { reason } => error!(%reason, "workflow aborted"),
        }
    }
}

/// Logs each state change at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StateChangeSink for LogSink {
    fn publish(&self, change: &StateChange) {
        debug!(
            task = %change.id,
            flow = %change.flow_nums,
            action = %change.action,
            old = %change.old,
            new = %change.new,
            "state change"
        );
    }
}

/// Forwards state changes to a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StateChange>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StateChange>) -> Self {
        Self { tx }
    }
}

impl StateChangeSink for ChannelSink {
    fn publish(&self, change: &StateChange) {
        if self.tx.send(change.clone()).is_err() {
            debug!("state change receiver dropped");
        }
    }
}

/// The single dispatch point for workflow events and state changes.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn WorkflowEventHandler>>,
    sinks: Vec<Arc<dyn StateChangeSink>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with [`LogHandler`] and [`LogSink`].
    pub fn with_logging() -> Self {
        let mut registry = Self::new();
        registry.add_handler(Arc::new(LogHandler));
        registry.add_sink(Arc::new(LogSink));
        registry
    }

    pub fn add_handler(&mut self, handler: Arc<dyn WorkflowEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn add_sink(&mut self, sink: Arc<dyn StateChangeSink>) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&self, event: &WorkflowEvent) {
        for handler in &self.handlers {
            handler.handle(event);
        }
    }

    pub fn publish(&self, changes: &[StateChange]) {
        for change in changes {
            for sink in &self.sinks {
                sink.publish(change);
            }
        }
    }
}
