// src/exec/task_runner.rs

//! Individual job process runner.

use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::{JobEvent, JobEventKind, JobSpec, RuntimeEvent};
use crate::exec::executor_loop::Outcomes;

/// Stdout prefix that turns a line into a job message.
pub const MESSAGE_PREFIX: &str = "CYCLERUN_MESSAGE:";

/// Run one job, reporting `Submitted`, `Started`, any messages and a final
/// `Succeeded`/`Failed` (or `SubmitFailed` if the process cannot start).
///
/// If the cancel channel fires the process is killed and reported as
/// failed by `SIGKILL`.
pub async fn run_job(
    spec: JobSpec,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
    outcomes: Outcomes,
) {
    let id = spec.id.clone();
    let submit_num = spec.submit_num;
    let kind = match run_job_inner(&spec, &runtime_tx, cancel_rx).await {
        Ok(kind) => kind,
        Err(err) => {
            error!(task = %id, submit_num, error = %err, "job execution error");
            JobEventKind::Failed {
                exit_code: None,
                signal: None,
            }
        }
    };
    if let Ok(mut map) = outcomes.lock() {
        map.insert(id.clone(), (submit_num, kind.clone()));
    }
    if let Err(err) = send(&runtime_tx, &spec, kind).await {
        debug!(task = %id, error = %err, "runtime gone; dropping job outcome");
    }
}

async fn send(tx: &mpsc::Sender<RuntimeEvent>, spec: &JobSpec, kind: JobEventKind) -> Result<()> {
    tx.send(RuntimeEvent::Job(JobEvent::new(spec.id.clone(), spec.submit_num, kind)))
        .await
        .with_context(|| format!("sending job event for '{}' to runtime", spec.id))
}

fn build_command(spec: &JobSpec) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&spec.script);
    cmd.envs(&spec.env)
        .env("CYCLE_POINT", spec.id.point.to_string())
        .env("TASK_NAME", &spec.id.name)
        .env("TASK_ID", spec.id.to_string())
        .env("SUBMIT_NUM", spec.submit_num.to_string())
        .env("TRY_NUM", spec.try_num.to_string())
        .env("FLOW_NUMS", spec.flow_nums.to_string());
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn run_job_inner(
    spec: &JobSpec,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<JobEventKind> {
    info!(
        task = %spec.id,
        submit_num = spec.submit_num,
        try_num = spec.try_num,
        platform = %spec.platform,
        "starting job process"
    );

    let mut child = match build_command(spec).spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(task = %spec.id, error = %err, "could not start job process");
            return Ok(JobEventKind::SubmitFailed {
                reason: err.to_string(),
            });
        }
    };
    let job_ref = child.id().map(|pid| pid.to_string()).unwrap_or_default();
    send(runtime_tx, spec, JobEventKind::Submitted { job_ref }).await?;
    send(runtime_tx, spec, JobEventKind::Started).await?;

    let stdout_task = child.stdout.take().map(|stdout| {
        let tx = runtime_tx.clone();
        let spec = spec.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match line.strip_prefix(MESSAGE_PREFIX) {
                    Some(message) => {
                        let message = message.trim().to_string();
                        if send(&tx, &spec, JobEventKind::Message(message)).await.is_err() {
                            break;
                        }
                    }
                    None => debug!(task = %spec.id, "stdout: {}", line),
                }
            }
        })
    });

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let id = spec.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %id, "stderr: {}", line);
            }
        });
    }

    let kind = tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("waiting for job of '{}'", spec.id))?;
            exit_kind(spec, status)
        }
        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(task = %spec.id, submit_num = spec.submit_num, "kill requested; killing process");
                    if let Err(e) = child.kill().await {
                        warn!(task = %spec.id, error = %e, "failed to kill job process");
                    }
                    JobEventKind::Failed { exit_code: None, signal: Some("SIGKILL".to_string()) }
                }
                Err(_) => {
                    debug!(task = %spec.id, "cancel channel closed; waiting for job");
                    let status = child.wait().await.with_context(|| format!("waiting for job of '{}'", spec.id))?;
                    exit_kind(spec, status)
                }
            }
        }
    };

    // Messages must reach the runtime before the final event.
    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    Ok(kind)
}

fn exit_kind(spec: &JobSpec, status: ExitStatus) -> JobEventKind {
    info!(
        task = %spec.id,
        submit_num = spec.submit_num,
        exit_code = ?status.code(),
        success = status.success(),
        "job process exited"
    );
    if status.success() {
        return JobEventKind::Succeeded;
    }
    JobEventKind::Failed {
        exit_code: status.code(),
        signal: signal_name(&status),
    }
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|s| format!("signal {s}"))
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::cycling::CyclePoint;
    use crate::task::{FlowNums, TaskId};

    fn spec(script: &str) -> JobSpec {
        JobSpec {
            id: TaskId::new(CyclePoint::Integer(3), "foo"),
            flow_nums: FlowNums::single(1),
            submit_num: 1,
            try_num: 1,
            script: script.to_string(),
            platform: "localhost".to_string(),
            env: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
        }
    }

    async fn kinds(script: &str) -> Vec<JobEventKind> {
        let (tx, mut rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        run_job(spec(script), tx, cancel_rx, Outcomes::default()).await;
        let mut kinds = Vec::new();
        while let Ok(RuntimeEvent::Job(event)) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn reports_messages_before_success() {
        let kinds = kinds(r#"test "$CYCLE_POINT/$TASK_NAME $GREETING" = "3/foo hi" && echo "CYCLERUN_MESSAGE: file written""#).await;
        assert!(matches!(kinds[0], JobEventKind::Submitted { .. }));
        assert_eq!(
            kinds[1..],
            [
                JobEventKind::Started,
                JobEventKind::Message("file written".to_string()),
                JobEventKind::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn reports_exit_code_on_failure() {
        let kinds = kinds("exit 3").await;
        assert_eq!(
            kinds.last(),
            Some(&JobEventKind::Failed {
                exit_code: Some(3),
                signal: None
            })
        );
    }
}
