// src/exec/executor_loop.rs

//! Main executor loop that manages running job processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::{JobEvent, JobEventKind, JobHandle, JobSpec, RuntimeEvent};
use crate::exec::task_runner::run_job;
use crate::task::TaskId;

/// A request from [`super::LocalJobSubmitter`].
#[derive(Debug, Clone)]
pub enum JobRequest {
    Submit(JobSpec),
    Poll(JobHandle),
    Kill(JobHandle),
}

/// Last terminal event of each task's most recent job, for polls that
/// arrive after the process exited.
pub type Outcomes = Arc<Mutex<HashMap<TaskId, (u32, JobEventKind)>>>;

/// Handle for a running job process.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

type JobKey = (TaskId, u32);

/// Spawn the background executor loop and return its request sender.
///
/// Each job runs in its own Tokio task. Kill requests reach the job
/// through a oneshot channel.
pub fn spawn_executor(runtime_tx: mpsc::Sender<RuntimeEvent>) -> mpsc::Sender<JobRequest> {
    let (tx, mut rx) = mpsc::channel::<JobRequest>(32);

    tokio::spawn(async move {
        info!("job executor loop started");
        let mut active: HashMap<JobKey, ActiveJob> = HashMap::new();
        let outcomes: Outcomes = Arc::default();

        while let Some(request) = rx.recv().await {
            active.retain(|_, job| !job.handle.is_finished());
            match request {
                JobRequest::Submit(spec) => submit(spec, &mut active, &outcomes, &runtime_tx),
                JobRequest::Poll(handle) => poll(handle, &active, &outcomes, &runtime_tx),
                JobRequest::Kill(handle) => kill(&handle, &mut active),
            }
        }

        info!("job executor loop finished (channel closed)");
    });

    tx
}

fn submit(
    spec: JobSpec,
    active: &mut HashMap<JobKey, ActiveJob>,
    outcomes: &Outcomes,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let key = (spec.id.clone(), spec.submit_num);
    if active.contains_key(&key) {
        debug!(task = %spec.id, submit_num = spec.submit_num, "job already running; ignoring resubmission");
        return;
    }
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let outcomes = outcomes.clone();
    let handle = tokio::spawn(async move {
        let id = spec.id.clone();
        run_job(spec, rt_tx, cancel_rx, outcomes).await;
        debug!(task = %id, "job runner future finished");
    });
    active.insert(
        key,
        ActiveJob {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

/// The result goes out from its own task so that a full runtime channel
/// never stalls the request loop.
fn poll(
    handle: JobHandle,
    active: &HashMap<JobKey, ActiveJob>,
    outcomes: &Outcomes,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let key = (handle.id.clone(), handle.submit_num);
    let kind = if active.contains_key(&key) {
        JobEventKind::Started
    } else {
        let finished = outcomes
            .lock()
            .ok()
            .and_then(|map| map.get(&handle.id).cloned())
            .filter(|(submit_num, _)| *submit_num == handle.submit_num);
        match finished {
            Some((_, kind)) => kind,
            None => JobEventKind::Failed {
                exit_code: None,
                signal: Some("job lost".to_string()),
            },
        }
    };
    debug!(task = %handle.id, submit_num = handle.submit_num, ?kind, "poll result");
    let event = RuntimeEvent::Job(JobEvent::new(handle.id, handle.submit_num, kind));
    let rt_tx = runtime_tx.clone();
    tokio::spawn(async move {
        if rt_tx.send(event).await.is_err() {
            debug!("runtime gone; dropping poll result");
        }
    });
}

fn kill(handle: &JobHandle, active: &mut HashMap<JobKey, ActiveJob>) {
    let key = (handle.id.clone(), handle.submit_num);
    let Some(job) = active.get_mut(&key) else {
        debug!(task = %handle.id, submit_num = handle.submit_num, "kill: no such running job");
        return;
    };
    info!(task = %handle.id, submit_num = handle.submit_num, "killing job");
    if let Some(cancel) = job.cancel.take() {
        if cancel.send(()).is_err() {
            debug!(task = %handle.id, "job already finished while killing");
        }
    } else {
        debug!(task = %handle.id, "kill already requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::cycling::CyclePoint;

    #[tokio::test]
    async fn polls_keep_flowing_while_the_runtime_is_busy() {
        let (rt_tx, mut rt_rx) = mpsc::channel::<RuntimeEvent>(1);
        let requests = spawn_executor(rt_tx);

        let send_all = async {
            for point in 1..=100 {
                let handle = JobHandle {
                    id: TaskId::new(CyclePoint::Integer(point), "foo"),
                    submit_num: 1,
                    job_ref: None,
                };
                requests.send(JobRequest::Poll(handle)).await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), send_all)
            .await
            .expect("request channel blocked on an undrained runtime channel");

        let mut lost = 0;
        while lost < 100 {
            let event = tokio::time::timeout(Duration::from_secs(5), rt_rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let RuntimeEvent::Job(JobEvent {
                kind: JobEventKind::Failed { signal: Some(signal), .. },
                ..
            }) = event
            {
                assert_eq!(signal, "job lost");
                lost += 1;
            }
        }
    }
}
