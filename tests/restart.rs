// tests/restart.rs

use std::error::Error;
use std::sync::Arc;

use cyclerun::engine::hooks::WorkflowEvent;
use cyclerun::engine::{Command, CoreOptions, ExitReason, JobSpec, RuntimeEvent};
use cyclerun::persistence::Store;
use cyclerun::task::TaskStatus;
use cyclerun::types::StopMode;
use cyclerun_test_utils::builders::WorkflowBuilder;
use cyclerun_test_utils::fake_submitter::{JobOutcome, always_succeed};
use cyclerun_test_utils::init_tracing;
use cyclerun_test_utils::simulation::Simulation;

type TestResult = Result<(), Box<dyn Error>>;

fn chain() -> WorkflowBuilder {
    WorkflowBuilder::integer("1")
        .final_point("5")
        .graph("P1", "a", "a[-P1]")
}

#[test]
fn restart_continues_where_the_run_stopped() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("cyclerun.db");

    let options = CoreOptions {
        stop_point: Some("3".to_string()),
        ..CoreOptions::default()
    };
    let mut sim = Simulation::fresh_with(chain().build(), options, Store::open(&db)?, always_succeed());
    sim.start();
    assert_eq!(sim.run_until_exit(50), Some(ExitReason::Completed));
    assert_eq!(sim.submitted_ids(), vec!["1/a", "2/a", "3/a"]);
    let before = sim.core().snapshot();
    drop(sim);

    let mut sim = Simulation::restart(chain().build(), CoreOptions::default(), Store::open(&db)?, always_succeed());
    assert_eq!(sim.core().snapshot(), before);

    sim.start();
    assert_eq!(sim.run_until_exit(50), Some(ExitReason::Completed));
    assert_eq!(sim.submitted_ids(), vec!["4/a", "5/a"]);
    assert!(
        sim.events()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::Startup { restart: true }))
    );

    // One job per point across both runs.
    let jobs = sim.store().load_jobs()?;
    let points: Vec<&str> = jobs.iter().map(|j| j.point.as_str()).collect();
    assert_eq!(points, vec!["1", "2", "3", "4", "5"]);
    assert!(jobs.iter().all(|j| j.submit_num == 1 && j.run_status == Some(0)));
    Ok(())
}

#[test]
fn restart_stop_point_override_wins() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("cyclerun.db");

    let options = CoreOptions {
        stop_point: Some("2".to_string()),
        ..CoreOptions::default()
    };
    let mut sim = Simulation::fresh_with(chain().build(), options, Store::open(&db)?, always_succeed());
    sim.start();
    assert_eq!(sim.run_until_exit(50), Some(ExitReason::Completed));
    drop(sim);

    let options = CoreOptions {
        stop_point: Some("4".to_string()),
        ..CoreOptions::default()
    };
    let mut sim = Simulation::restart(chain().build(), options, Store::open(&db)?, always_succeed());
    sim.start();
    assert_eq!(sim.run_until_exit(50), Some(ExitReason::Completed));
    assert_eq!(sim.submitted_ids(), vec!["3/a", "4/a"]);
    Ok(())
}

#[test]
fn jobs_orphaned_by_a_stop_now_are_polled_on_restart() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("cyclerun.db");

    let hang = Arc::new(|_: &JobSpec| JobOutcome::Hang);
    let mut sim = Simulation::fresh_with(chain().build(), CoreOptions::default(), Store::open(&db)?, hang);
    sim.start();
    assert_eq!(sim.run_until_exit(3), None);
    sim.send(RuntimeEvent::Command(Command::Stop { mode: StopMode::Now }));
    assert_eq!(sim.run_until_exit(3), Some(ExitReason::Stopped(StopMode::Now)));
    // Only "now now" warns about the jobs it leaves behind.
    assert!(
        !sim.events()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::OrphanedJobs { .. }))
    );
    drop(sim);

    // The job is gone by the time we come back.
    let mut sim = Simulation::restart(chain().build(), CoreOptions::default(), Store::open(&db)?, always_succeed());
    let running: Vec<TaskStatus> = sim.core().pool().iter().map(|(_, p)| p.status()).collect();
    assert_eq!(running, vec![TaskStatus::Running]);

    sim.start();
    sim.run_until_exit(3);
    let states: Vec<(String, TaskStatus)> = sim
        .core()
        .pool()
        .iter()
        .map(|(_, p)| (p.id.to_string(), p.status()))
        .collect();
    assert_eq!(states, vec![("1/a".to_string(), TaskStatus::Failed)]);
    assert!(sim.submitted().is_empty());
    Ok(())
}

#[test]
fn now_now_warns_about_orphaned_jobs() -> TestResult {
    init_tracing();
    let hang = Arc::new(|_: &JobSpec| JobOutcome::Hang);
    let mut sim = Simulation::fresh(chain().build(), hang);
    sim.start();
    assert_eq!(sim.run_until_exit(3), None);
    sim.send(RuntimeEvent::Command(Command::Stop { mode: StopMode::NowNow }));
    assert_eq!(sim.run_until_exit(3), Some(ExitReason::Stopped(StopMode::NowNow)));
    let orphaned: Vec<String> = sim
        .events()
        .into_iter()
        .filter_map(|e| match e {
            WorkflowEvent::OrphanedJobs { ids } => Some(ids),
            _ => None,
        })
        .flatten()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(orphaned, vec!["1/a"]);
    Ok(())
}
