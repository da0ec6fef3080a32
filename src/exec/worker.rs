// src/exec/worker.rs

//! Executes one unit's tasks in dependency order.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{ScheduledUnit, Task, TaskStatus, UnitId};
use crate::engine::UnitOutcome;
use crate::errors::UnitExecutionError;
use crate::events::{EventBus, EventKind};
use crate::exec::backpressure::BackpressureRunner;
use crate::exec::provider::{ExecutionProvider, TaskRequest};

/// Lines of collaborator output kept in a failure reason.
const OUTPUT_TAIL_LINES: usize = 5;

/// Static worker settings shared by every unit of a run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory handed to the provider and the backpressure command.
    pub workdir: PathBuf,
    /// When true (default), the first failing task fails the unit and the
    /// remaining tasks are skipped. When false, tasks that do not depend on a
    /// failed task keep running; the unit still fails at the end.
    pub fail_fast: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            fail_fast: true,
        }
    }
}

/// Immutable configuration and collaborator handles injected into every worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub config: WorkerConfig,
    pub events: EventBus,
    pub provider: Arc<dyn ExecutionProvider>,
    pub backpressure: Arc<dyn BackpressureRunner>,
}

impl WorkerDeps {
    pub fn new(
        config: WorkerConfig,
        events: EventBus,
        provider: Arc<dyn ExecutionProvider>,
        backpressure: Arc<dyn BackpressureRunner>,
    ) -> Self {
        Self {
            config,
            events,
            provider,
            backpressure,
        }
    }
}

/// Runs a single unit and produces exactly one [`UnitOutcome`].
///
/// The worker never touches scheduler or graph state; it only reports.
/// Cancellation is checked between tasks and after every collaborator call,
/// and the token is threaded into each call.
pub struct Worker {
    unit: UnitId,
    tasks: Vec<Task>,
    deps: Arc<WorkerDeps>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(unit: ScheduledUnit, deps: Arc<WorkerDeps>, cancel: CancellationToken) -> Self {
        let mut tasks = unit.tasks;
        tasks.sort_by_key(|t| t.number);
        for task in tasks.iter_mut() {
            task.status = TaskStatus::Pending;
        }

        Self {
            unit: unit.id,
            tasks,
            deps,
            cancel,
        }
    }

    pub async fn run(mut self) -> UnitOutcome {
        info!(unit = %self.unit, tasks = self.tasks.len(), "worker started");

        let mut first_failure: Option<UnitExecutionError> = None;

        loop {
            if self.cancel.is_cancelled() {
                info!(unit = %self.unit, "cancelled between tasks");
                self.skip_remaining();
                return UnitOutcome::Failed(UnitExecutionError::cancelled(&self.unit, None));
            }

            let Some(idx) = self.next_runnable() else {
                break;
            };

            let number = self.tasks[idx].number;
            self.tasks[idx].status = TaskStatus::Running;

            match self.run_task(&self.tasks[idx]).await {
                Ok(()) => {
                    self.tasks[idx].status = TaskStatus::Complete;
                    self.emit(EventKind::TaskCompleted { task: number });
                }
                Err(err) => {
                    self.tasks[idx].status = TaskStatus::Failed;
                    warn!(unit = %self.unit, task = number, reason = %err.reason, "task failed");
                    self.emit(EventKind::TaskFailed {
                        task: number,
                        reason: err.reason.clone(),
                    });

                    if self.cancel.is_cancelled() || self.deps.config.fail_fast {
                        self.skip_remaining();
                        return UnitOutcome::Failed(err);
                    }
                    first_failure.get_or_insert(err);
                }
            }
        }

        let stranded: Vec<u32> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.number)
            .collect();
        self.skip_remaining();

        if let Some(err) = first_failure {
            return UnitOutcome::Failed(err);
        }

        if !stranded.is_empty() {
            return UnitOutcome::Failed(UnitExecutionError::new(
                &self.unit,
                format!("tasks {stranded:?} have unsatisfiable dependencies"),
            ));
        }

        info!(unit = %self.unit, "all tasks complete");
        UnitOutcome::Complete
    }

    /// Lowest-numbered pending task whose dependencies all completed.
    fn next_runnable(&self) -> Option<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Pending)
            .filter(|(_, t)| {
                t.depends_on
                    .iter()
                    .all(|dep| self.task_status(*dep) == Some(TaskStatus::Complete))
            })
            .min_by_key(|(_, t)| t.number)
            .map(|(idx, _)| idx)
    }

    fn task_status(&self, number: u32) -> Option<TaskStatus> {
        self.tasks
            .iter()
            .find(|t| t.number == number)
            .map(|t| t.status)
    }

    /// Provider call, then the backpressure gate.
    async fn run_task(&self, task: &Task) -> Result<(), UnitExecutionError> {
        let number = task.number;
        let workdir = self.deps.config.workdir.clone();

        debug!(unit = %self.unit, task = number, "starting task");
        self.emit(EventKind::TaskStarted { task: number });

        let request = TaskRequest {
            unit: self.unit.clone(),
            task: number,
            description: task.description.clone(),
            workdir: workdir.clone(),
        };

        let result = self
            .deps
            .provider
            .execute(request, self.cancel.clone())
            .await;

        if self.cancel.is_cancelled() {
            return Err(UnitExecutionError::cancelled(&self.unit, Some(number)));
        }

        match result {
            Ok(out) if out.success => {}
            Ok(out) => {
                return Err(UnitExecutionError::in_task(
                    &self.unit,
                    number,
                    format!(
                        "{} provider reported failure: {}",
                        self.deps.provider.name(),
                        output_tail(&out.output)
                    ),
                ));
            }
            Err(e) => {
                return Err(UnitExecutionError::in_task(
                    &self.unit,
                    number,
                    format!("{} provider error: {e}", self.deps.provider.name()),
                ));
            }
        }

        let command = task.backpressure.trim();
        if command.is_empty() {
            return Ok(());
        }

        let check = self
            .deps
            .backpressure
            .check(command, &workdir, self.cancel.clone())
            .await;

        if self.cancel.is_cancelled() {
            return Err(UnitExecutionError::cancelled(&self.unit, Some(number)));
        }

        match check {
            Ok(res) if res.success => {
                debug!(unit = %self.unit, task = number, "backpressure passed");
                Ok(())
            }
            Ok(res) => Err(UnitExecutionError::in_task(
                &self.unit,
                number,
                format!(
                    "backpressure `{command}` failed (exit code {}): {}",
                    res.exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                    output_tail(&res.output)
                ),
            )),
            Err(e) => Err(UnitExecutionError::in_task(
                &self.unit,
                number,
                format!("backpressure `{command}` could not run: {e}"),
            )),
        }
    }

    fn skip_remaining(&mut self) {
        let mut skipped = Vec::new();
        for task in self.tasks.iter_mut() {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Skipped;
                skipped.push(task.number);
            }
        }
        for number in skipped {
            self.emit(EventKind::TaskSkipped { task: number });
        }
    }

    fn emit(&self, kind: EventKind) {
        self.deps.events.emit(&self.unit, kind);
    }
}

fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}
