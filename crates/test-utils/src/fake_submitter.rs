use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use cyclerun::engine::{JobEvent, JobEventKind, JobHandle, JobSpec, RuntimeEvent};
use cyclerun::exec::{JobSubmitter, SubmitFuture};

/// What a fake job does once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeed,
    Fail,
    SubmitFail,
    /// Submitted and started, then nothing until polled or killed.
    Hang,
    /// Emit these messages, then succeed.
    Messages(Vec<String>),
}

/// Decides the outcome of each submitted job.
pub type Plan = Arc<dyn Fn(&JobSpec) -> JobOutcome + Send + Sync>;

/// Every job succeeds.
pub fn always_succeed() -> Plan {
    Arc::new(|_| JobOutcome::Succeed)
}

/// The job events a fake job with `outcome` reports, in order.
pub fn events_for(spec: &JobSpec, outcome: &JobOutcome) -> Vec<JobEvent> {
    let event = |kind| JobEvent::new(spec.id.clone(), spec.submit_num, kind);
    let submitted = event(JobEventKind::Submitted {
        job_ref: format!("fake-{}", spec.submit_num),
    });
    match outcome {
        JobOutcome::SubmitFail => vec![event(JobEventKind::SubmitFailed {
            reason: "fake submission failure".to_string(),
        })],
        JobOutcome::Hang => vec![submitted, event(JobEventKind::Started)],
        JobOutcome::Succeed => vec![submitted, event(JobEventKind::Started), event(JobEventKind::Succeeded)],
        JobOutcome::Fail => vec![
            submitted,
            event(JobEventKind::Started),
            event(JobEventKind::Failed {
                exit_code: Some(1),
                signal: None,
            }),
        ],
        JobOutcome::Messages(messages) => {
            let mut events = vec![submitted, event(JobEventKind::Started)];
            events.extend(messages.iter().map(|m| event(JobEventKind::Message(m.clone()))));
            events.push(event(JobEventKind::Succeeded));
            events
        }
    }
}

/// A submitter that:
/// - records every job it is given
/// - immediately reports the job events its [`Plan`] dictates.
pub struct FakeSubmitter {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    plan: Plan,
    submitted: Arc<Mutex<Vec<JobSpec>>>,
    hung: Arc<Mutex<Vec<JobHandle>>>,
}

impl FakeSubmitter {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, plan: Plan) -> Self {
        Self {
            runtime_tx,
            plan,
            submitted: Arc::default(),
            hung: Arc::default(),
        }
    }

    /// Shared view of the submitted jobs, usable after the submitter moved
    /// into a runtime.
    pub fn submitted(&self) -> Arc<Mutex<Vec<JobSpec>>> {
        Arc::clone(&self.submitted)
    }

    fn send(&self, events: Vec<JobEvent>) -> SubmitFuture<'static> {
        let tx = self.runtime_tx.clone();
        Box::pin(async move {
            for event in events {
                tx.send(RuntimeEvent::Job(event))
                    .await
                    .map_err(|_| anyhow::anyhow!("runtime channel closed"))?;
            }
            Ok(())
        })
    }
}

impl JobSubmitter for FakeSubmitter {
    fn submit(&mut self, jobs: Vec<JobSpec>) -> SubmitFuture<'_> {
        let mut events = Vec::new();
        for spec in jobs {
            let outcome = (self.plan)(&spec);
            if outcome == JobOutcome::Hang {
                self.hung.lock().unwrap().push(spec.handle());
            }
            events.extend(events_for(&spec, &outcome));
            self.submitted.lock().unwrap().push(spec);
        }
        self.send(events)
    }

    fn poll(&mut self, jobs: Vec<JobHandle>) -> SubmitFuture<'_> {
        let hung = self.hung.lock().unwrap().clone();
        let events = jobs
            .into_iter()
            .map(|handle| {
                let kind = if hung
                    .iter()
                    .any(|h| h.id == handle.id && h.submit_num == handle.submit_num)
                {
                    JobEventKind::Started
                } else {
                    JobEventKind::Failed {
                        exit_code: None,
                        signal: Some("job lost".to_string()),
                    }
                };
                JobEvent::new(handle.id, handle.submit_num, kind)
            })
            .collect();
        self.send(events)
    }

    fn kill(&mut self, jobs: Vec<JobHandle>) -> SubmitFuture<'_> {
        let mut hung = self.hung.lock().unwrap();
        let mut events = Vec::new();
        for handle in jobs {
            let before = hung.len();
            hung.retain(|h| h.id != handle.id || h.submit_num != handle.submit_num);
            if hung.len() < before {
                events.push(JobEvent::new(
                    handle.id,
                    handle.submit_num,
                    JobEventKind::Failed {
                        exit_code: None,
                        signal: Some("SIGKILL".to_string()),
                    },
                ));
            }
        }
        drop(hung);
        self.send(events)
    }
}
