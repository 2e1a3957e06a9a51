// src/exec/backend.rs

//! Pluggable job submission.
//!
//! The runtime talks to a `JobSubmitter` rather than to processes. Results
//! come back asynchronously as `RuntimeEvent::Job` on the runtime channel.
//!
//! - `LocalJobSubmitter` runs jobs as local shell processes through the
//!   executor loop in [`super::executor_loop`].
//! - Tests provide their own `JobSubmitter` that records submissions and
//!   emits job events directly.

use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::engine::{JobHandle, JobSpec, RuntimeEvent};
use crate::errors::Result;

use super::executor_loop::{JobRequest, spawn_executor};

/// Boxed future returned by every [`JobSubmitter`] method.
pub type SubmitFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Trait abstracting where and how jobs run.
pub trait JobSubmitter: Send {
    /// Start these jobs. Each must eventually report `Submitted` or
    /// `SubmitFailed`.
    fn submit(&mut self, jobs: Vec<JobSpec>) -> SubmitFuture<'_>;

    /// Ask for the current state of these jobs; the answer arrives as job
    /// events.
    fn poll(&mut self, jobs: Vec<JobHandle>) -> SubmitFuture<'_>;

    /// Kill these jobs. A killed job reports `Failed`.
    fn kill(&mut self, jobs: Vec<JobHandle>) -> SubmitFuture<'_>;
}

/// Runs jobs as `sh -c` processes on this host.
#[derive(Debug, Clone)]
pub struct LocalJobSubmitter {
    tx: mpsc::Sender<JobRequest>,
}

impl LocalJobSubmitter {
    /// Spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let tx = spawn_executor(runtime_tx);
        Self { tx }
    }

    fn send_all(&self, requests: Vec<JobRequest>) -> SubmitFuture<'static> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();
        Box::pin(async move {
            for request in requests {
                tx.send(request)
                    .await
                    .map_err(|_| anyhow!("job executor loop has stopped"))?;
            }
            Ok(())
        })
    }
}

impl JobSubmitter for LocalJobSubmitter {
    fn submit(&mut self, jobs: Vec<JobSpec>) -> SubmitFuture<'_> {
        self.send_all(jobs.into_iter().map(JobRequest::Submit).collect())
    }

    fn poll(&mut self, jobs: Vec<JobHandle>) -> SubmitFuture<'_> {
        self.send_all(jobs.into_iter().map(JobRequest::Poll).collect())
    }

    fn kill(&mut self, jobs: Vec<JobHandle>) -> SubmitFuture<'_> {
        self.send_all(jobs.into_iter().map(JobRequest::Kill).collect())
    }
}
