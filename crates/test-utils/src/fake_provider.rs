use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use unitdag::errors::Result;
use unitdag::events::EventBus;
use unitdag::exec::{
    BackpressureResult, BackpressureRunner, BoxFuture, ExecutionProvider, ProviderOutput,
    TaskRequest, WorkerConfig, WorkerDeps,
};

/// A fake provider that:
/// - records every `(unit, task)` it was asked to run
/// - sleeps for a scripted delay (interruptible unless `ignore_cancel`)
/// - reports failure for scripted units / tasks, success otherwise
/// - tracks how many calls are in progress at once
#[derive(Default)]
pub struct ScriptedProvider {
    default_delay: Duration,
    unit_delays: HashMap<String, Duration>,
    failing_units: HashSet<String>,
    failing_tasks: HashSet<(String, u32)>,
    ignore_cancel: bool,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every call without a unit-specific delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn delay_unit(mut self, unit: &str, delay: Duration) -> Self {
        self.unit_delays.insert(unit.to_string(), delay);
        self
    }

    /// Every task of `unit` fails.
    pub fn fail_unit(mut self, unit: &str) -> Self {
        self.failing_units.insert(unit.to_string());
        self
    }

    pub fn fail_task(mut self, unit: &str, task: u32) -> Self {
        self.failing_tasks.insert((unit.to_string(), task));
        self
    }

    /// Keep sleeping through cancellation, like a collaborator that never
    /// checks its token.
    pub fn ignore_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    /// Task numbers run for `unit`, in call order.
    pub fn tasks_run_for(&self, unit: &str) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter(|(u, _)| u == unit)
            .map(|(_, t)| t)
            .collect()
    }

    /// Units in the order their first task was called.
    pub fn unit_order(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (unit, _) in self.calls() {
            if !seen.contains(&unit) {
                seen.push(unit);
            }
        }
        seen
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn delay_for(&self, unit: &str) -> Duration {
        self.unit_delays
            .get(unit)
            .copied()
            .unwrap_or(self.default_delay)
    }

    fn should_fail(&self, unit: &str, task: u32) -> bool {
        self.failing_units.contains(unit) || self.failing_tasks.contains(&(unit.to_string(), task))
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn execute(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ProviderOutput>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((request.unit.clone(), request.task));

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            let _guard = RunningGuard(&self.running);

            let delay = self.delay_for(&request.unit);
            if self.ignore_cancel {
                tokio::time::sleep(delay).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Ok(ProviderOutput::failure("cancelled"));
                    }
                }
            }

            if self.should_fail(&request.unit, request.task) {
                Ok(ProviderOutput::failure(format!(
                    "scripted failure for {} task {}",
                    request.unit, request.task
                )))
            } else {
                Ok(ProviderOutput::success("ok"))
            }
        })
    }
}

/// A fake backpressure runner: commands listed as failing exit 1, everything
/// else exits 0. Records every command it was asked to check.
#[derive(Default)]
pub struct FakeBackpressure {
    failing: HashSet<String>,
    checks: Mutex<Vec<String>>,
}

impl FakeBackpressure {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, command: &str) -> Self {
        self.failing.insert(command.to_string());
        self
    }

    pub fn checks(&self) -> Vec<String> {
        self.checks.lock().unwrap().clone()
    }
}

impl BackpressureRunner for FakeBackpressure {
    fn check<'a>(
        &'a self,
        command: &'a str,
        _workdir: &'a Path,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<BackpressureResult>> {
        Box::pin(async move {
            self.checks.lock().unwrap().push(command.to_string());
            let success = !self.failing.contains(command);
            Ok(BackpressureResult {
                success,
                exit_code: Some(if success { 0 } else { 1 }),
                output: if success {
                    String::new()
                } else {
                    format!("{command}: check failed")
                },
            })
        })
    }
}

/// Worker dependencies wired to fakes, with a fresh event bus.
pub fn worker_deps(
    provider: Arc<dyn ExecutionProvider>,
    backpressure: Arc<dyn BackpressureRunner>,
    fail_fast: bool,
) -> Arc<WorkerDeps> {
    Arc::new(WorkerDeps::new(
        WorkerConfig {
            workdir: std::env::temp_dir(),
            fail_fast,
        },
        EventBus::new(1024),
        provider,
        backpressure,
    ))
}
