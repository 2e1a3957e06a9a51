// tests/property_runahead.rs

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;

use std::sync::Arc;

use cyclerun::engine::{ExitReason, JobEventKind, JobSpec, RuntimeEvent};
use cyclerun_test_utils::builders::WorkflowBuilder;
use cyclerun_test_utils::fake_submitter::{JobOutcome, always_succeed};
use cyclerun_test_utils::simulation::Simulation;

/// A cycling graph of `task_N` tasks. Task N may depend on tasks 0..N-1 at
/// the same point and on its own previous instance, which keeps it acyclic.
fn graph_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<(Vec<usize>, bool)>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            (proptest::collection::vec(any::<usize>(), 0..num_tasks), any::<bool>()),
            num_tasks,
        )
    })
}

fn build(graph: &[(Vec<usize>, bool)], final_point: u32, runahead: usize) -> WorkflowBuilder {
    let mut builder = WorkflowBuilder::integer("1")
        .final_point(&final_point.to_string())
        .runahead(&runahead.to_string());
    for (i, (raw_deps, after_self)) in graph.iter().enumerate() {
        let name = format!("task_{i}");
        let mut deps: BTreeSet<String> = BTreeSet::new();
        if i > 0 {
            deps.extend(raw_deps.iter().map(|d| format!("task_{}", d % i)));
        }
        if *after_self {
            deps.insert(format!("{name}[-P1]"));
        }
        let trigger = deps.into_iter().collect::<Vec<_>>().join(" & ");
        builder = builder.graph("P1", &name, &trigger);
    }
    builder
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn active_points_never_exceed_the_runahead_limit(
        graph in graph_strategy(5),
        final_point in 2u32..7,
        runahead in 1usize..4,
    ) {
        let cfg = build(&graph, final_point, runahead).build();
        let mut sim = Simulation::fresh(cfg, always_succeed());
        let mut exit = sim.start();

        for _ in 0..1000 {
            if exit.is_some() {
                break;
            }
            let pool = sim.core().pool();
            let active: BTreeSet<String> = pool
                .iter()
                .filter(|(_, p)| p.is_active() || p.is_queued)
                .map(|(_, p)| p.point().to_string())
                .collect();
            prop_assert!(active.len() <= runahead, "active points {:?} > limit {}", active, runahead);
            if let Some(limit) = pool.runahead_limit_point() {
                for (_, p) in pool.iter().filter(|(_, p)| p.is_active()) {
                    prop_assert!(p.point() <= limit, "{} released beyond {}", p.id, limit);
                }
            }
            exit = sim.run_until_exit(1);
        }
        prop_assert_eq!(exit, Some(ExitReason::Completed));

        // Every task ran exactly once at every point.
        let ids = sim.submitted_ids();
        let unique: HashSet<&String> = ids.iter().collect();
        prop_assert_eq!(unique.len(), ids.len());
        prop_assert_eq!(ids.len(), graph.len() * final_point as usize);
    }
}

#[test]
fn lowering_the_limit_mid_run_holds_back_queued_points() {
    let base = || {
        WorkflowBuilder::integer("1")
            .final_point("4")
            .graph("P1", "a", "")
            .queue("pair", 2, &["a"])
    };
    let mut sim = Simulation::fresh(base().runahead("4").build(), Arc::new(|_: &JobSpec| JobOutcome::Hang));
    sim.start();
    sim.run_until_exit(2);
    assert_eq!(sim.submitted_ids(), vec!["1/a", "2/a"]);

    sim.send(RuntimeEvent::ConfigLoaded(Box::new(base().runahead("1").build())));
    assert_eq!(sim.run_until_exit(2), None);
    assert_eq!(sim.core().pool().runahead_limit_point().map(ToString::to_string).as_deref(), Some("1"));

    assert_eq!(sim.finish_hung(JobEventKind::Succeeded), 2);
    assert_eq!(sim.run_until_exit(2), None);
    let hung: Vec<String> = sim.hung().iter().map(|h| h.id.to_string()).collect();
    assert_eq!(hung, vec!["3/a"]);

    assert_eq!(sim.finish_hung(JobEventKind::Succeeded), 1);
    sim.run_until_exit(2);
    assert_eq!(sim.finish_hung(JobEventKind::Succeeded), 1);
    assert_eq!(sim.run_until_exit(10), Some(ExitReason::Completed));
    assert_eq!(sim.submitted_ids(), vec!["1/a", "2/a", "3/a", "4/a"]);
}
