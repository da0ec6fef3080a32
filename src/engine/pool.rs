// src/engine/pool.rs

//! Bounded worker pool.
//!
//! At most `max_parallel` units execute at once; the cap is a
//! `tokio::sync::Semaphore` whose permit moves into each unit's task and is
//! released when the unit reaches a terminal state. Every finished unit is
//! reported to the runtime as a [`RuntimeEvent::UnitFinished`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{ScheduledUnit, UnitId};
use crate::engine::{RuntimeEvent, UnitOutcome};
use crate::errors::{OrchestratorError, Result, UnitExecutionError};
use crate::events::EventKind;
use crate::exec::{Worker, WorkerDeps};

/// Per-unit state as tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Completed,
    Failed,
}

/// Point-in-time snapshot of the pool, computed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    /// Sum of task counts over every unit the pool has started.
    pub total_tasks: usize,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.active + self.completed + self.failed
    }
}

#[derive(Debug)]
struct WorkerEntry {
    state: WorkerState,
    task_count: usize,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct WorkerTable {
    entries: HashMap<UnitId, WorkerEntry>,
    /// Ids accepted by `submit` that are still waiting for a slot.
    waiting: HashSet<UnitId>,
    first_error: Option<UnitExecutionError>,
}

impl WorkerTable {
    fn is_tracked(&self, id: &str) -> bool {
        self.entries.contains_key(id) || self.waiting.contains(id)
    }
}

struct PoolInner {
    max_parallel: usize,
    slots: Arc<Semaphore>,
    workers: Mutex<WorkerTable>,
    /// Units accepted but not yet terminal (waiting for a slot or running).
    in_flight: watch::Sender<usize>,
    shutdown: CancellationToken,
    deps: Arc<WorkerDeps>,
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
}

/// Bounded-concurrency executor for scheduled units.
///
/// Cheap to clone; clones share the same slots and worker map, so `submit`,
/// `wait`, `stats` and `shutdown` can be called from different tasks.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_parallel", &self.inner.max_parallel)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create a pool running at most `max_parallel` units at once (minimum 1).
    ///
    /// Terminal outcomes are sent to `runtime_tx`; a dropped receiver is
    /// tolerated.
    pub fn new(
        max_parallel: usize,
        deps: Arc<WorkerDeps>,
        runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        let max_parallel = max_parallel.max(1);
        let (in_flight, _) = watch::channel(0usize);

        Self {
            inner: Arc::new(PoolInner {
                max_parallel,
                slots: Arc::new(Semaphore::new(max_parallel)),
                workers: Mutex::new(WorkerTable::default()),
                in_flight,
                shutdown: CancellationToken::new(),
                deps,
                runtime_tx,
            }),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.inner.max_parallel
    }

    /// Root cancellation token; every unit runs under a child of it.
    ///
    /// Cancelling it has the same effect on running units as `shutdown`,
    /// without waiting.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Accept a unit and start it as soon as a slot is free.
    ///
    /// - Rejects ids the pool already tracks with `DuplicateUnit`.
    /// - Waits for a free slot; this is the only place callers block.
    /// - Fails with a cancelled `UnitExecution` error if the pool shuts down
    ///   while waiting.
    pub async fn submit(&self, unit: ScheduledUnit) -> Result<()> {
        let id = unit.id.clone();

        {
            let mut table = self.inner.workers.lock();
            if table.is_tracked(&id) {
                warn!(unit = %id, "duplicate submission rejected");
                return Err(OrchestratorError::DuplicateUnit(id));
            }
            table.waiting.insert(id.clone());
        }
        self.inner.in_flight.send_modify(|n| *n += 1);

        let permit = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => None,
            permit = Arc::clone(&self.inner.slots).acquire_owned() => permit.ok(),
        };
        // A slot freed by a cancelled unit must not start new work.
        let permit = permit.filter(|_| !self.inner.shutdown.is_cancelled());

        let Some(permit) = permit else {
            self.inner.workers.lock().waiting.remove(&id);
            self.inner.in_flight.send_modify(|n| *n -= 1);
            debug!(unit = %id, "pool shut down before a slot became free");
            return Err(UnitExecutionError::cancelled(&id, None).into());
        };

        let cancel = self.inner.shutdown.child_token();
        {
            let mut table = self.inner.workers.lock();
            table.waiting.remove(&id);
            table.entries.insert(
                id.clone(),
                WorkerEntry {
                    state: WorkerState::Running,
                    task_count: unit.tasks.len(),
                    cancel: cancel.clone(),
                },
            );
        }

        info!(unit = %id, level = unit.level, tasks = unit.tasks.len(), "unit started");
        self.inner.deps.events.emit(&id, EventKind::UnitStarted);

        let inner = Arc::clone(&self.inner);
        let worker = Worker::new(unit, Arc::clone(&inner.deps), cancel);

        tokio::spawn(async move {
            // Run the worker in its own task so a panic becomes a failed
            // outcome instead of a slot that is never released.
            let outcome = match tokio::spawn(worker.run()).await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    error!(unit = %id, error = %join_err, "worker task aborted");
                    UnitOutcome::Failed(UnitExecutionError::new(
                        &id,
                        format!("worker aborted: {join_err}"),
                    ))
                }
            };

            inner.finish(&id, &outcome);
            drop(permit);

            let _ = inner.runtime_tx.send(RuntimeEvent::UnitFinished {
                unit: id,
                outcome,
            });
            inner.in_flight.send_modify(|n| *n -= 1);
        });

        Ok(())
    }

    /// Block until every accepted unit is terminal.
    ///
    /// Returns the first unit failure, if any. Units are always allowed to
    /// finish before this returns, so results are complete even on failure.
    pub async fn wait(&self) -> Result<()> {
        self.wait_idle().await;

        match self.inner.workers.lock().first_error.clone() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Snapshot of unit states and task totals, taken under the map lock.
    pub fn stats(&self) -> PoolStats {
        let table = self.inner.workers.lock();
        let mut stats = PoolStats::default();
        for entry in table.entries.values() {
            match entry.state {
                WorkerState::Running => stats.active += 1,
                WorkerState::Completed => stats.completed += 1,
                WorkerState::Failed => stats.failed += 1,
            }
            stats.total_tasks += entry.task_count;
        }
        stats
    }

    pub fn state_of(&self, id: &str) -> Option<WorkerState> {
        self.inner.workers.lock().entries.get(id).map(|e| e.state)
    }

    /// Ids of units currently running.
    pub fn running_units(&self) -> Vec<UnitId> {
        let table = self.inner.workers.lock();
        let mut ids: Vec<UnitId> = table
            .entries
            .iter()
            .filter(|(_, e)| e.state == WorkerState::Running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Request cooperative cancellation of every running unit and wait up to
    /// `timeout` for them to unwind.
    ///
    /// Units that never got a slot are rejected. Returns `ShutdownTimeout`
    /// naming the units still running when the timeout elapses.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let running = self.running_units();
        info!(?running, ?timeout, "pool shutting down");

        {
            let table = self.inner.workers.lock();
            for entry in table.entries.values() {
                if entry.state == WorkerState::Running {
                    entry.cancel.cancel();
                }
            }
        }
        self.inner.shutdown.cancel();

        if tokio::time::timeout(timeout, self.wait_idle()).await.is_ok() {
            info!("pool shut down cleanly");
            return Ok(());
        }

        let outstanding = self.running_units();
        error!(?outstanding, ?timeout, "units did not unwind before the shutdown timeout");
        Err(OrchestratorError::ShutdownTimeout {
            timeout,
            outstanding,
        })
    }

    async fn wait_idle(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot close.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl PoolInner {
    fn finish(&self, id: &str, outcome: &UnitOutcome) {
        let mut table = self.workers.lock();

        let state = match outcome {
            UnitOutcome::Complete => WorkerState::Completed,
            UnitOutcome::Failed(err) => {
                if table.first_error.is_none() {
                    table.first_error = Some(err.clone());
                }
                WorkerState::Failed
            }
        };

        if let Some(entry) = table.entries.get_mut(id) {
            entry.state = state;
        }
        drop(table);

        match outcome {
            UnitOutcome::Complete => {
                info!(unit = %id, "unit completed");
                self.deps.events.emit(id, EventKind::UnitCompleted);
            }
            UnitOutcome::Failed(err) => {
                warn!(unit = %id, error = %err, "unit failed");
                self.deps.events.emit(
                    id,
                    EventKind::UnitFailed {
                        reason: err.reason.clone(),
                    },
                );
            }
        }
    }
}
