mod common;
use crate::common::{drain_events, init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use unitdag::dag::{ScheduledUnit, Task};
use unitdag::engine::UnitOutcome;
use unitdag::events::EventKind;
use unitdag::exec::{BackpressureRunner, ShellBackpressure, Worker};
use unitdag_test_utils::fake_provider::{FakeBackpressure, ScriptedProvider, worker_deps};

type TestResult = Result<(), Box<dyn Error>>;

fn unit_with(tasks: Vec<Task>) -> ScheduledUnit {
    ScheduledUnit {
        id: "U".to_string(),
        level: 0,
        tasks,
    }
}

fn failure(outcome: UnitOutcome) -> unitdag::errors::UnitExecutionError {
    match outcome {
        UnitOutcome::Failed(e) => e,
        UnitOutcome::Complete => panic!("expected the unit to fail"),
    }
}

#[tokio::test]
async fn tasks_run_in_number_order_respecting_dependencies() -> TestResult {
    init_tracing();

    let provider = Arc::new(ScriptedProvider::new());
    let deps = worker_deps(provider.clone(), Arc::new(FakeBackpressure::passing()), true);

    // 1 waits for 3; 2 and 3 are free.
    let unit = unit_with(vec![
        Task::new(2, "second"),
        Task::new(1, "first").depends_on([3]),
        Task::new(3, "third"),
    ]);

    let outcome = with_timeout(Worker::new(unit, deps, CancellationToken::new()).run()).await;

    assert_eq!(outcome, UnitOutcome::Complete);
    assert_eq!(provider.tasks_run_for("U"), vec![2, 3, 1]);
    Ok(())
}

#[tokio::test]
async fn failing_backpressure_fails_the_task() -> TestResult {
    init_tracing();

    let provider = Arc::new(ScriptedProvider::new());
    let backpressure = Arc::new(FakeBackpressure::passing().failing_on("make lint"));
    let deps = worker_deps(provider.clone(), backpressure.clone(), true);

    let unit = unit_with(vec![
        Task::new(1, "build").backpressure("make build"),
        Task::new(2, "lint").backpressure("make lint"),
        Task::new(3, "ship"),
    ]);

    let outcome = with_timeout(Worker::new(unit, deps, CancellationToken::new()).run()).await;
    let err = failure(outcome);

    assert_eq!(err.task, Some(2));
    assert!(err.reason.contains("make lint"), "reason: {}", err.reason);
    assert!(err.reason.contains("exit code 1"), "reason: {}", err.reason);
    assert_eq!(backpressure.checks(), vec!["make build", "make lint"]);
    // fail-fast: task 3 never ran.
    assert_eq!(provider.tasks_run_for("U"), vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn empty_backpressure_is_not_checked() -> TestResult {
    init_tracing();

    let backpressure = Arc::new(FakeBackpressure::passing());
    let deps = worker_deps(
        Arc::new(ScriptedProvider::new()),
        backpressure.clone(),
        true,
    );

    let unit = unit_with(vec![Task::new(1, "x").backpressure("   ")]);
    let outcome = with_timeout(Worker::new(unit, deps, CancellationToken::new()).run()).await;

    assert!(outcome.is_success());
    assert!(backpressure.checks().is_empty());
    Ok(())
}

#[tokio::test]
async fn continue_mode_runs_independent_tasks_and_skips_dependents() -> TestResult {
    init_tracing();

    let provider = Arc::new(ScriptedProvider::new().fail_task("U", 1));
    let deps = worker_deps(provider.clone(), Arc::new(FakeBackpressure::passing()), false);
    let mut events = deps.events.subscribe();

    let unit = unit_with(vec![
        Task::new(1, "breaks"),
        Task::new(2, "needs 1").depends_on([1]),
        Task::new(3, "independent"),
        Task::new(4, "needs 2").depends_on([2]),
    ]);

    let outcome = with_timeout(Worker::new(unit, deps, CancellationToken::new()).run()).await;
    let err = failure(outcome);

    assert_eq!(err.task, Some(1));
    assert_eq!(provider.tasks_run_for("U"), vec![1, 3]);

    let skipped: Vec<u32> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::TaskSkipped { task } => Some(task),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![2, 4]);
    Ok(())
}

#[tokio::test]
async fn task_events_follow_execution() -> TestResult {
    init_tracing();

    let provider = Arc::new(ScriptedProvider::new().fail_task("U", 2));
    let deps = worker_deps(provider, Arc::new(FakeBackpressure::passing()), true);
    let mut events = deps.events.subscribe();

    let unit = unit_with(vec![
        Task::new(1, "a"),
        Task::new(2, "b"),
        Task::new(3, "c"),
    ]);
    let _ = with_timeout(Worker::new(unit, deps, CancellationToken::new()).run()).await;

    let kinds: Vec<EventKind> = drain_events(&mut events).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds.len(), 5);
    assert_eq!(kinds[0], EventKind::TaskStarted { task: 1 });
    assert_eq!(kinds[1], EventKind::TaskCompleted { task: 1 });
    assert_eq!(kinds[2], EventKind::TaskStarted { task: 2 });
    assert!(matches!(kinds[3], EventKind::TaskFailed { task: 2, .. }));
    assert_eq!(kinds[4], EventKind::TaskSkipped { task: 3 });
    Ok(())
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() -> TestResult {
    init_tracing();

    let provider = Arc::new(ScriptedProvider::new());
    let deps = worker_deps(provider.clone(), Arc::new(FakeBackpressure::passing()), true);

    let token = CancellationToken::new();
    token.cancel();

    let unit = unit_with(vec![Task::new(1, "a"), Task::new(2, "b")]);
    let err = failure(with_timeout(Worker::new(unit, deps, token).run()).await);

    assert_eq!(err.reason, "cancelled");
    assert_eq!(err.task, None);
    assert!(provider.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn cancellation_mid_task_stops_the_unit() -> TestResult {
    init_tracing();

    let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_secs(30)));
    let deps = worker_deps(provider.clone(), Arc::new(FakeBackpressure::passing()), false);

    let token = CancellationToken::new();
    let unit = unit_with(vec![Task::new(1, "a"), Task::new(2, "b")]);
    let handle = tokio::spawn(Worker::new(unit, deps, token.clone()).run());

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let err = failure(with_timeout(handle).await?);
    assert_eq!(err.reason, "cancelled");
    assert_eq!(err.task, Some(1));
    // Even with fail_fast off, nothing runs after cancellation.
    assert_eq!(provider.tasks_run_for("U"), vec![1]);
    Ok(())
}

#[tokio::test]
async fn unsatisfiable_task_dependency_fails_the_unit() -> TestResult {
    init_tracing();

    let deps = worker_deps(
        Arc::new(ScriptedProvider::new()),
        Arc::new(FakeBackpressure::passing()),
        true,
    );
    let unit = unit_with(vec![Task::new(1, "a"), Task::new(2, "b").depends_on([9])]);

    let err = failure(with_timeout(Worker::new(unit, deps, CancellationToken::new()).run()).await);
    assert!(err.reason.contains("unsatisfiable"), "reason: {}", err.reason);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn shell_backpressure_reports_exit_status() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let shell = ShellBackpressure::new();

    let ok = shell
        .check("echo fine", dir.path(), CancellationToken::new())
        .await?;
    assert!(ok.success);
    assert_eq!(ok.exit_code, Some(0));
    assert!(ok.output.contains("fine"));

    let bad = shell
        .check("echo broken >&2; exit 3", dir.path(), CancellationToken::new())
        .await?;
    assert!(!bad.success);
    assert_eq!(bad.exit_code, Some(3));
    assert!(bad.output.contains("broken"));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn shell_backpressure_is_killed_on_cancel() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let token = CancellationToken::new();
    let shell = ShellBackpressure::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let result = with_timeout(shell.check("sleep 30", dir.path(), token)).await?;
    canceller.await?;

    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    Ok(())
}
