// tests/runtime_fake_submitter.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cyclerun::clock::SystemClock;
use cyclerun::engine::hooks::WorkflowEvent;
use cyclerun::engine::{Command, CoreOptions, CoreRuntime, ExitReason, JobSpec, Runtime, RuntimeEvent};
use cyclerun::errors::CyclerunError;
use cyclerun::persistence::Store;
use cyclerun::types::StopMode;
use cyclerun_test_utils::builders::WorkflowBuilder;
use cyclerun_test_utils::fake_submitter::{FakeSubmitter, JobOutcome, always_succeed};
use cyclerun_test_utils::simulation::EventRecorder;
use cyclerun_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Very simple chain: a -> b -> c, one cycle.
fn simple_chain() -> WorkflowBuilder {
    WorkflowBuilder::integer("1")
        .final_point("1")
        .graph("R1", "a", "")
        .graph("R1", "b", "a")
        .graph("R1", "c", "b")
}

#[tokio::test]
async fn runtime_with_fake_submitter_runs_simple_chain() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = Store::open(dir.path().join("cyclerun.db"))?;

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);
    let submitter = FakeSubmitter::new(rt_tx.clone(), always_succeed());
    let submitted = submitter.submitted();

    let core = CoreRuntime::new(simple_chain().build(), Arc::new(SystemClock), CoreOptions::default())?;
    let runtime = Runtime::new(core, rt_rx, rt_tx, submitter, store);

    let reason = with_timeout(runtime.run()).await?;
    assert_eq!(reason, ExitReason::Completed);

    let ids: Vec<String> = submitted.lock().unwrap().iter().map(|j| j.id.to_string()).collect();
    assert_eq!(ids, vec!["1/a", "1/b", "1/c"]);

    let store = Store::open(dir.path().join("cyclerun.db"))?;
    assert_eq!(store.load_jobs()?.len(), 3);
    assert!(!store.is_fresh()?);
    Ok(())
}

#[tokio::test]
async fn stall_timeout_abort_is_an_error() -> TestResult {
    init_tracing();

    let cfg = simple_chain().stall_timeout("PT0S", true).build();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);
    let plan = Arc::new(|spec: &JobSpec| {
        if spec.id.name == "b" {
            JobOutcome::Fail
        } else {
            JobOutcome::Succeed
        }
    });
    let submitter = FakeSubmitter::new(rt_tx.clone(), plan);
    let core = CoreRuntime::new(cfg, Arc::new(SystemClock), CoreOptions::default())?;
    let runtime = Runtime::new(core, rt_rx, rt_tx, submitter, Store::open_in_memory()?);

    let result = with_timeout(runtime.run()).await;
    assert!(matches!(result, Err(CyclerunError::Aborted(_))), "result: {result:?}");
    Ok(())
}

#[tokio::test]
async fn bad_reload_is_rejected_and_kill_stop_ends_the_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = simple_chain().write_to(dir.path());

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);
    let plan = Arc::new(|spec: &JobSpec| {
        if spec.id.name == "b" {
            JobOutcome::Hang
        } else {
            JobOutcome::Succeed
        }
    });
    let submitter = FakeSubmitter::new(rt_tx.clone(), plan);
    let submitted = submitter.submitted();

    let cfg = cyclerun::config::load_and_validate(&path)?;
    let mut core = CoreRuntime::new(cfg, Arc::new(SystemClock), CoreOptions::default())?;
    let recorder = Arc::new(EventRecorder::default());
    core.hooks_mut().add_handler(recorder.clone());
    let runtime = Runtime::new(core, rt_rx, rt_tx.clone(), submitter, Store::open_in_memory()?)
        .with_config_path(&path);
    let handle = tokio::spawn(runtime.run());

    with_timeout(async {
        while submitted.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    std::fs::write(&path, "[scheduling]\ncycling_mode = \"integer\"\n")?;
    rt_tx.send(RuntimeEvent::ReloadRequested).await?;
    rt_tx
        .send(RuntimeEvent::Command(Command::Stop { mode: StopMode::Kill }))
        .await?;

    let reason = with_timeout(handle).await??;
    assert_eq!(reason, ExitReason::Stopped(StopMode::Kill));

    let events = recorder.events();
    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::ReloadFailed { .. })));
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::Reloaded(_))));
    let ids: Vec<String> = submitted.lock().unwrap().iter().map(|j| j.id.to_string()).collect();
    assert_eq!(ids, vec!["1/a", "1/b"]);
    Ok(())
}
