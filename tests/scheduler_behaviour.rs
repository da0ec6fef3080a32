mod common;
use crate::common::{drain_events, init_tracing};

use std::error::Error;

use unitdag::dag::{Scheduler, UnitStatus};
use unitdag::engine::UnitOutcome;
use unitdag::errors::UnitExecutionError;
use unitdag::events::{EventBus, EventKind};
use unitdag_test_utils::builders::unit;

type TestResult = Result<(), Box<dyn Error>>;

fn diamond() -> Result<Scheduler, Box<dyn Error>> {
    Ok(Scheduler::from_units(vec![
        unit("A", &[]),
        unit("B", &["A"]),
        unit("C", &["A"]),
        unit("D", &["B", "C"]),
    ])?)
}

fn failed(id: &str) -> UnitOutcome {
    UnitOutcome::Failed(UnitExecutionError::new(id, "boom"))
}

fn dispatched_ids(scheduler: &mut Scheduler) -> Vec<String> {
    scheduler.take_ready().into_iter().map(|u| u.id).collect()
}

#[test]
fn start_seeds_only_roots() -> TestResult {
    init_tracing();
    let mut s = diamond()?;

    assert_eq!(s.start(), vec!["A".to_string()]);
    assert_eq!(s.status_of("A"), Some(UnitStatus::Ready));
    assert_eq!(s.status_of("B"), Some(UnitStatus::Pending));

    // Starting twice is a no-op.
    assert!(s.start().is_empty());
    assert_eq!(s.ready_len(), 1);
    Ok(())
}

#[test]
fn dependents_wait_for_every_dependency() -> TestResult {
    init_tracing();
    let mut s = diamond()?;
    s.start();

    assert_eq!(dispatched_ids(&mut s), vec!["A"]);
    assert_eq!(s.status_of("A"), Some(UnitStatus::Running));

    let ready = s.handle_completion("A", UnitOutcome::Complete);
    assert_eq!(ready, vec!["B".to_string(), "C".to_string()]);
    assert_eq!(dispatched_ids(&mut s), vec!["B", "C"]);

    // D must not be ready while C is only running.
    assert!(s.handle_completion("B", UnitOutcome::Complete).is_empty());
    assert_eq!(s.status_of("D"), Some(UnitStatus::Pending));
    assert_eq!(s.deps_satisfied("D"), Some(false));

    assert_eq!(s.handle_completion("C", UnitOutcome::Complete), vec!["D".to_string()]);
    assert_eq!(s.deps_satisfied("D"), Some(true));
    Ok(())
}

#[test]
fn failure_skips_downstream_and_siblings_continue() -> TestResult {
    init_tracing();
    let mut s = diamond()?;
    s.start();
    dispatched_ids(&mut s);
    s.handle_completion("A", UnitOutcome::Complete);
    dispatched_ids(&mut s);

    let step = s.step_completion("B", failed("B"));
    assert!(step.newly_ready.is_empty());
    assert_eq!(step.newly_skipped, vec!["D".to_string()]);
    assert!(!step.run_finished);

    // Sibling keeps going.
    let step = s.step_completion("C", UnitOutcome::Complete);
    assert!(step.newly_ready.is_empty(), "D must never become ready");
    assert!(step.run_finished);

    assert_eq!(s.status_of("B"), Some(UnitStatus::Failed));
    assert_eq!(s.status_of("C"), Some(UnitStatus::Complete));
    assert_eq!(s.status_of("D"), Some(UnitStatus::Skipped));

    let summary = s.summary();
    assert_eq!((summary.completed, summary.failed, summary.skipped), (2, 1, 1));
    assert_eq!(summary.total(), 4);
    assert!(!summary.is_success());
    assert_eq!(summary.first_error.map(|e| e.unit), Some("B".to_string()));
    Ok(())
}

#[test]
fn skip_propagates_transitively() -> TestResult {
    init_tracing();
    let mut s = Scheduler::from_units(vec![
        unit("A", &[]),
        unit("B", &["A"]),
        unit("C", &["B"]),
        unit("D", &["C"]),
        unit("E", &[]),
    ])?;
    s.start();
    assert_eq!(dispatched_ids(&mut s), vec!["A", "E"]);

    let step = s.step_completion("A", failed("A"));
    assert_eq!(
        step.newly_skipped,
        vec!["B".to_string(), "C".to_string(), "D".to_string()]
    );
    assert!(!step.run_finished);

    let step = s.step_completion("E", UnitOutcome::Complete);
    assert!(step.run_finished);
    assert!(s.is_finished());
    Ok(())
}

#[test]
fn completion_for_non_running_unit_is_ignored() -> TestResult {
    init_tracing();
    let mut s = diamond()?;
    s.start();

    // A is ready but not dispatched yet.
    let step = s.step_completion("A", UnitOutcome::Complete);
    assert_eq!(step, Default::default());
    assert_eq!(s.status_of("A"), Some(UnitStatus::Ready));

    // Unknown ids are ignored too.
    assert!(s.handle_completion("ghost", UnitOutcome::Complete).is_empty());
    Ok(())
}

#[test]
fn ready_queue_orders_by_level_then_id() -> TestResult {
    init_tracing();
    let mut s = Scheduler::from_units(vec![
        unit("b", &[]),
        unit("a", &[]),
        unit("c", &["a"]),
        unit("z", &[]),
    ])?;
    s.start();

    assert_eq!(s.next_ready().map(|u| u.id), Some("a".to_string()));
    s.handle_completion("a", UnitOutcome::Complete);

    // c is level 1, b and z are level 0.
    assert_eq!(dispatched_ids(&mut s), vec!["b", "z", "c"]);
    Ok(())
}

#[test]
fn abandon_unstarted_skips_everything_not_running() -> TestResult {
    init_tracing();
    let mut s = diamond()?;
    s.start();
    dispatched_ids(&mut s);

    let step = s.abandon_unstarted();
    assert_eq!(
        step.newly_skipped,
        vec!["B".to_string(), "C".to_string(), "D".to_string()]
    );
    assert!(!step.run_finished, "A is still running");

    s.handle_completion("A", UnitOutcome::Complete);
    assert!(s.is_finished());
    assert_eq!(s.status_of("B"), Some(UnitStatus::Skipped));
    Ok(())
}

#[test]
fn scheduler_publishes_ready_and_skipped_events() -> TestResult {
    init_tracing();
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let mut s = diamond()?.with_events(bus);

    s.start();
    dispatched_ids(&mut s);
    s.handle_completion("A", UnitOutcome::Complete);
    dispatched_ids(&mut s);
    s.handle_completion("B", failed("B"));

    let events = drain_events(&mut rx);
    let summary: Vec<(String, EventKind)> =
        events.into_iter().map(|e| (e.unit, e.kind)).collect();

    assert_eq!(
        summary,
        vec![
            ("A".to_string(), EventKind::UnitReady),
            ("B".to_string(), EventKind::UnitReady),
            ("C".to_string(), EventKind::UnitReady),
            (
                "D".to_string(),
                EventKind::UnitSkipped {
                    cause: "B".to_string()
                }
            ),
        ]
    );
    Ok(())
}

#[test]
fn units_not_in_graph_are_rejected() -> TestResult {
    use std::sync::Arc;
    use unitdag::dag::DagGraph;

    let graph = Arc::new(DagGraph::build(&[unit("A", &[])])?);
    assert!(Scheduler::new(Arc::clone(&graph), vec![unit("B", &[])]).is_err());
    assert!(Scheduler::new(graph, vec![]).is_err());
    Ok(())
}

#[test]
fn take_ready_up_to_leaves_the_rest_ready() -> TestResult {
    init_tracing();
    let mut s = Scheduler::from_units((0..5).map(|i| unit(&format!("u{i}"), &[])).collect())?;
    s.start();

    let released: Vec<String> = s.take_ready_up_to(2).into_iter().map(|u| u.id).collect();
    assert_eq!(released, vec!["u0", "u1"]);
    assert_eq!(s.running_count(), 2);
    assert_eq!(s.ready_len(), 3);
    assert_eq!(s.status_of("u2"), Some(UnitStatus::Ready));

    assert!(s.take_ready_up_to(0).is_empty());
    assert_eq!(s.running_count(), 2);
    Ok(())
}

#[test]
fn unit_refused_before_starting_is_skipped_with_its_subtree() -> TestResult {
    init_tracing();
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let mut s = diamond()?.with_events(bus);
    s.start();
    assert_eq!(dispatched_ids(&mut s), vec!["A"]);

    let step = s.step_not_started("A", "shutdown");
    assert_eq!(step.newly_skipped, vec!["A", "B", "C", "D"]);
    assert!(step.run_finished);

    let summary = s.summary();
    assert_eq!((summary.failed, summary.skipped), (0, 4));
    assert!(summary.first_error.is_none());

    let skipped: Vec<(String, EventKind)> = drain_events(&mut rx)
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::UnitSkipped { .. }))
        .map(|e| (e.unit, e.kind))
        .take(1)
        .collect();
    assert_eq!(
        skipped,
        vec![(
            "A".to_string(),
            EventKind::UnitSkipped {
                cause: "shutdown".to_string()
            }
        )]
    );

    // Only running units can be refused.
    assert!(s.step_not_started("A", "shutdown").newly_skipped.is_empty());
    Ok(())
}

#[test]
fn execution_error_names_the_failing_task() {
    assert_eq!(
        UnitExecutionError::in_task("api", 2, "tests failed").to_string(),
        "unit 'api' failed in task 2: tests failed"
    );
    assert_eq!(
        UnitExecutionError::new("api", "worker aborted").to_string(),
        "unit 'api' failed: worker aborted"
    );
}
