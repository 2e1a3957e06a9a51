// tests/scenarios.rs

use std::error::Error;
use std::sync::Arc;

use cyclerun::engine::hooks::WorkflowEvent;
use cyclerun::engine::{Command, ExitReason, JobEventKind, RuntimeEvent};
use cyclerun::persistence::PARAM_STOP_POINT;
use cyclerun::task::TaskStatus;
use cyclerun::types::FlowOption;
use cyclerun_test_utils::builders::WorkflowBuilder;
use cyclerun_test_utils::fake_submitter::{JobOutcome, always_succeed};
use cyclerun_test_utils::init_tracing;
use cyclerun_test_utils::simulation::Simulation;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn yearly_chain_stops_after_the_stop_point() -> TestResult {
    init_tracing();

    let cfg = WorkflowBuilder::datetime("2015")
        .stop_after("2018")
        .graph("P1Y", "foo", "foo[-P1Y]")
        .build();
    let mut sim = Simulation::fresh(cfg, always_succeed());
    assert_eq!(sim.start(), None);
    assert_eq!(sim.run_until_exit(100), Some(ExitReason::Completed));

    let ran: Vec<String> = sim.submitted().iter().map(|j| j.id.point.to_string()).collect();
    assert_eq!(
        ran,
        vec!["20150101T0000Z", "20160101T0000Z", "20170101T0000Z", "20180101T0000Z"]
    );

    let cycling = sim.core().pool().cycling().clone();
    let left: Vec<_> = sim
        .core()
        .pool()
        .iter()
        .filter(|(_, p)| !p.is_final())
        .map(|(_, p)| (p.id.clone(), p.status()))
        .collect();
    assert_eq!(left.len(), 1, "pool: {left:?}");
    assert_eq!(left[0].0.name, "foo");
    assert_eq!(left[0].0.point, cycling.parse_point("2019")?);
    assert_eq!(left[0].1, TaskStatus::Waiting);

    // The stop point is spent once reached.
    assert!(!sim.store().load_params()?.contains_key(PARAM_STOP_POINT));
    Ok(())
}

#[test]
fn execution_retries_are_recorded_per_submit() -> TestResult {
    init_tracing();

    let cfg = WorkflowBuilder::integer("1")
        .final_point("1")
        .graph("R1", "foo", "")
        .runtime("foo", "execution_retry_delays", "3*PT1S")
        .build();
    let plan = Arc::new(|spec: &cyclerun::engine::JobSpec| {
        if spec.submit_num <= 3 {
            JobOutcome::Fail
        } else {
            JobOutcome::Succeed
        }
    });
    let mut sim = Simulation::fresh(cfg, plan);
    sim.start();
    assert_eq!(sim.run_until_exit(100), Some(ExitReason::Completed));

    let tries: Vec<u32> = sim.submitted().iter().map(|j| j.try_num).collect();
    assert_eq!(tries, vec![1, 2, 3, 4]);

    let jobs = sim.store().load_jobs()?;
    let statuses: Vec<(u32, Option<i32>)> = jobs.iter().map(|j| (j.submit_num, j.run_status)).collect();
    assert_eq!(
        statuses,
        vec![(1, Some(1)), (2, Some(1)), (3, Some(1)), (4, Some(0))]
    );

    let retries = sim
        .events()
        .into_iter()
        .filter(|e| matches!(e, WorkflowEvent::Retrying { .. }))
        .count();
    assert_eq!(retries, 3);
    Ok(())
}

#[test]
fn removing_a_running_task_lets_it_finish() -> TestResult {
    init_tracing();

    let base = WorkflowBuilder::integer("1").final_point("1").graph("R1", "a", "");
    let cfg = base.clone().graph("R1", "b", "a").build();
    let plan = Arc::new(|spec: &cyclerun::engine::JobSpec| {
        if spec.id.name == "b" {
            JobOutcome::Hang
        } else {
            JobOutcome::Succeed
        }
    });
    let mut sim = Simulation::fresh(cfg, plan);
    sim.start();
    assert_eq!(sim.run_until_exit(5), None);
    assert_eq!(sim.hung().len(), 1);
    assert_eq!(sim.hung()[0].id.to_string(), "1/b");

    sim.send(RuntimeEvent::ConfigLoaded(Box::new(base.build())));
    assert_eq!(sim.run_until_exit(2), None);

    assert_eq!(sim.finish_hung(JobEventKind::Succeeded), 1);
    assert_eq!(sim.run_until_exit(10), Some(ExitReason::Completed));

    let events = sim.events();
    let orphaned: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::Reloaded(summary) => Some(summary.orphaned.iter().map(ToString::to_string)),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(orphaned, vec!["1/b"]);
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::Stalled { .. })));

    let b_job = sim
        .store()
        .load_jobs()?
        .into_iter()
        .find(|j| j.name == "b")
        .ok_or("no job row for b")?;
    assert_eq!(b_job.run_status, Some(0));
    Ok(())
}

#[test]
fn rejected_reload_keeps_the_running_configuration() -> TestResult {
    init_tracing();

    let cfg = WorkflowBuilder::integer("1")
        .final_point("1")
        .graph("R1", "a", "")
        .graph("R1", "b", "a")
        .build();
    let plan = Arc::new(|spec: &cyclerun::engine::JobSpec| {
        if spec.id.name == "a" {
            JobOutcome::Hang
        } else {
            JobOutcome::Succeed
        }
    });
    let mut sim = Simulation::fresh(cfg, plan);
    sim.start();
    sim.run_until_exit(2);
    let before = sim.core().snapshot();

    sim.send(RuntimeEvent::ConfigRejected("graph has a cycle".to_string()));
    assert_eq!(sim.run_until_exit(1), None);
    assert_eq!(sim.core().snapshot(), before);
    assert!(
        sim.events()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::ReloadFailed { .. }))
    );

    sim.finish_hung(JobEventKind::Succeeded);
    assert_eq!(sim.run_until_exit(10), Some(ExitReason::Completed));
    assert_eq!(sim.submitted_ids(), vec!["1/a", "1/b"]);
    Ok(())
}

#[test]
fn custom_output_message_releases_a_dependant() -> TestResult {
    init_tracing();

    let cfg = WorkflowBuilder::integer("1")
        .final_point("1")
        .graph("R1", "a", "")
        .graph("R1", "b", "a:ready")
        .runtime("a", "outputs", toml::Value::Table(toml::Table::from_iter([(
            "ready".to_string(),
            toml::Value::String("data ready".to_string()),
        )])))
        .build();
    let plan = Arc::new(|spec: &cyclerun::engine::JobSpec| {
        if spec.id.name == "a" {
            JobOutcome::Messages(vec!["data ready".to_string()])
        } else {
            JobOutcome::Succeed
        }
    });
    let mut sim = Simulation::fresh(cfg, plan);
    sim.start();
    assert_eq!(sim.run_until_exit(20), Some(ExitReason::Completed));
    assert_eq!(sim.submitted_ids(), vec!["1/a", "1/b"]);
    Ok(())
}

#[test]
fn stall_timeout_can_abort_the_workflow() -> TestResult {
    init_tracing();

    let cfg = WorkflowBuilder::integer("1")
        .final_point("1")
        .stall_timeout("PT10M", true)
        .graph("R1", "a", "")
        .graph("R1", "b", "a")
        .build();
    let plan = Arc::new(|spec: &cyclerun::engine::JobSpec| {
        if spec.id.name == "a" {
            JobOutcome::Fail
        } else {
            JobOutcome::Succeed
        }
    });
    let mut sim = Simulation::fresh(cfg, plan);
    sim.start();
    let exit = sim.run_until_exit(20);
    assert!(matches!(exit, Some(ExitReason::Aborted(_))), "exit: {exit:?}");
    let events = sim.events();
    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::Stalled { .. })));
    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::StallTimeout)));
    assert_eq!(sim.submitted_ids(), vec!["1/a"]);
    Ok(())
}

#[test]
fn manual_interventions_land_in_the_transition_log() -> TestResult {
    init_tracing();

    let cfg = WorkflowBuilder::integer("1")
        .final_point("1")
        .graph("R1", "a", "")
        .runtime("a", "execution_retry_delays", "PT1H")
        .build();
    let plan = Arc::new(|spec: &cyclerun::engine::JobSpec| match spec.submit_num {
        1 => JobOutcome::Fail,
        2 => JobOutcome::Hang,
        _ => JobOutcome::Succeed,
    });
    let mut sim = Simulation::fresh(cfg, plan);
    sim.start();
    sim.run_until_exit(1);
    let a = || vec!["1/a".to_string()];

    // Retrying: a kill cancels the retry and holds.
    sim.send(RuntimeEvent::Command(Command::Kill { tasks: a() }));
    sim.run_until_exit(1);
    let p = sim.core().pool().iter().map(|(_, p)| p.clone()).next().ok_or("empty pool")?;
    assert!(p.is_held && p.retry.is_none());

    sim.send(RuntimeEvent::Command(Command::Release { tasks: a() }));
    sim.send(RuntimeEvent::Command(Command::Trigger {
        tasks: a(),
        flow: FlowOption::All,
    }));
    sim.run_until_exit(2);
    assert_eq!(sim.hung().len(), 1);

    sim.send(RuntimeEvent::Command(Command::Hold { tasks: a() }));
    sim.send(RuntimeEvent::Command(Command::Kill { tasks: a() }));
    sim.run_until_exit(2);
    sim.send(RuntimeEvent::Command(Command::Trigger {
        tasks: a(),
        flow: FlowOption::All,
    }));
    assert_eq!(sim.run_until_exit(10), Some(ExitReason::Completed));
    assert_eq!(sim.submitted().len(), 3);

    let manual: Vec<(String, String)> = sim
        .store()
        .load_events()?
        .into_iter()
        .filter(|e| ["hold", "release", "kill", "trigger"].contains(&e.event.as_str()))
        .map(|e| (e.event, e.new_status))
        .collect();
    let expected = [
        ("kill", "waiting"),
        ("release", "waiting"),
        ("trigger", "preparing"),
        ("hold", "running"),
        ("kill", "running"),
        ("trigger", "preparing"),
    ];
    assert_eq!(
        manual,
        expected.map(|(e, s)| (e.to_string(), s.to_string())).to_vec()
    );
    Ok(())
}
