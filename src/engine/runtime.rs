// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{RunSummary, ScheduledUnit};
use crate::errors::{OrchestratorError, Result, UnitExecutionError};

use super::core::CoreRuntime;
use super::pool::WorkerPool;
use super::{CoreCommand, CoreStep, RuntimeEvent, RuntimeOptions, UnitOutcome};

/// Skip cause for units the pool refused because it was shutting down.
const SHUTDOWN_CAUSE: &str = "shutdown";

/// Drives the unit scheduler in response to `RuntimeEvent`s and delegates
/// unit execution to the `WorkerPool`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. This struct handles async IO: reading pool reports
/// from the channel, submitting units and running the shutdown handshake.
pub struct Runtime {
    core: CoreRuntime,
    pool: WorkerPool,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    options: RuntimeOptions,
    /// Events produced by the shell itself (e.g. rejected submissions); these
    /// are fed to the core before anything else is read from the channel.
    backlog: VecDeque<RuntimeEvent>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("pool", &self.pool)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// `event_rx` must be the receiving half of the channel `pool` reports to.
    pub fn new(
        core: CoreRuntime,
        pool: WorkerPool,
        event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            core,
            pool,
            event_rx,
            options,
            backlog: VecDeque::new(),
        }
    }

    pub fn core(&self) -> &CoreRuntime {
        &self.core
    }

    /// Main event loop.
    ///
    /// - Seeds the scheduler and submits the first ready units.
    /// - Feeds pool reports and shutdown requests into the core.
    /// - Executes the commands the core returns until every unit is terminal.
    ///
    /// Returns the run summary. Unit failures are part of the summary, not
    /// an error; only a shutdown that overruns its timeout is.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(max_parallel = self.pool.max_parallel(), "unitdag runtime started");

        let step = self.core.start();
        let mut keep_running = self.apply(step).await?;

        while keep_running {
            let event = match self.backlog.pop_front() {
                Some(e) => e,
                None => match self.event_rx.recv().await {
                    Some(e) => e,
                    None => {
                        warn!("runtime event channel closed before the run finished");
                        break;
                    }
                },
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            keep_running = self.apply(step).await?;
        }

        if let Err(err) = self.pool.wait().await {
            debug!(error = %err, "pool reported a unit failure");
        }

        let summary = self.core.summary();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            unfinished = summary.unfinished,
            "runtime exiting"
        );
        Ok(summary)
    }

    /// Execute the commands of one core step, returning whether to continue.
    async fn apply(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command).await?;
        }

        // A rejected submission leaves a unit `Running` in the scheduler until
        // its backlog event is processed.
        Ok(step.keep_running || !self.backlog.is_empty())
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchUnits(units) => {
                self.dispatch(units).await;
                Ok(())
            }
            CoreCommand::Shutdown => {
                match self.pool.shutdown(self.options.shutdown_timeout).await {
                    Ok(()) => Ok(()),
                    Err(err @ OrchestratorError::ShutdownTimeout { .. }) => Err(err),
                    Err(err) => {
                        warn!(error = %err, "pool shutdown reported an error");
                        Ok(())
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, units: Vec<ScheduledUnit>) {
        let ids: Vec<_> = units.iter().map(|u| u.id.as_str()).collect();
        debug!(?ids, "submitting ready units");

        for unit in units {
            let id = unit.id.clone();
            if let Err(err) = self.pool.submit(unit).await {
                if self.pool.cancellation_token().is_cancelled() {
                    debug!(unit = %id, "pool shutting down; unit never started");
                    self.backlog.push_back(RuntimeEvent::UnitRejected {
                        unit: id,
                        cause: SHUTDOWN_CAUSE.to_string(),
                    });
                    continue;
                }

                warn!(unit = %id, error = %err, "unit could not be submitted");
                let reason = match err {
                    OrchestratorError::UnitExecution(e) => e,
                    other => UnitExecutionError::new(&id, other.to_string()),
                };
                self.backlog.push_back(RuntimeEvent::UnitFinished {
                    unit: id,
                    outcome: UnitOutcome::Failed(reason),
                });
            }
        }
    }
}
