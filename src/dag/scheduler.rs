use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::{RunSummary, SchedulerStep};
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::unit::{ScheduledUnit, Unit, UnitId, UnitStatus};
use crate::engine::UnitOutcome;
use crate::errors::{OrchestratorError, Result, UnitExecutionError};
use crate::events::{EventBus, EventKind};

/// Scheduler holds the immutable DAG plus the mutable per-unit lifecycle state.
///
/// It is responsible for:
/// - seeding the ready queue from the graph's level 0
/// - releasing ready units for dispatch in level, then id, order
/// - applying completion / failure reports
/// - promoting dependents whose dependencies all completed
/// - skipping the whole downstream subtree of a failed unit
///
/// The scheduler does no IO. It is owned by a single orchestration loop and
/// only learns about worker outcomes through [`Scheduler::handle_completion`].
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<DagGraph>,
    units: BTreeMap<UnitId, Unit>,
    /// Ready queue ordered by (level, id).
    ready: BTreeSet<(usize, UnitId)>,
    started: bool,
    first_error: Option<UnitExecutionError>,
    events: Option<EventBus>,
}

impl Scheduler {
    /// Build the graph for `units` and a scheduler over it.
    pub fn from_units(units: Vec<Unit>) -> Result<Self> {
        let graph = DagGraph::build(&units)?;
        Self::new(Arc::new(graph), units)
    }

    /// Construct a scheduler over an already-built graph.
    ///
    /// `units` must contain exactly the graph's nodes. Every unit starts out
    /// `Pending` regardless of the status it carries in.
    pub fn new(graph: Arc<DagGraph>, units: Vec<Unit>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for mut unit in units {
            if !graph.contains(&unit.id) {
                return Err(OrchestratorError::Config(format!(
                    "unit '{}' is not part of the dependency graph",
                    unit.id
                )));
            }
            unit.status = UnitStatus::Pending;
            if map.insert(unit.id.clone(), unit).is_some() {
                return Err(OrchestratorError::Config(
                    "duplicate unit handed to scheduler".to_string(),
                ));
            }
        }

        if map.len() != graph.len() {
            return Err(OrchestratorError::Config(format!(
                "scheduler received {} units for a graph of {}",
                map.len(),
                graph.len()
            )));
        }

        Ok(Self {
            graph,
            units: map,
            ready: BTreeSet::new(),
            started: false,
            first_error: None,
            events: None,
        })
    }

    /// Publish ready / skipped transitions to `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn graph(&self) -> &Arc<DagGraph> {
        &self.graph
    }

    pub fn status_of(&self, id: &str) -> Option<UnitStatus> {
        self.units.get(id).map(|u| u.status)
    }

    /// Whether every dependency of `id` is `Complete`. `None` for unknown ids.
    pub fn deps_satisfied(&self, id: &str) -> Option<bool> {
        let unit = self.units.get(id)?;
        Some(ReadOnlyStateManager::new(&self.units).deps_satisfied_for(unit))
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Units released for dispatch that have not reported back yet.
    pub fn running_count(&self) -> usize {
        self.units
            .values()
            .filter(|u| u.status == UnitStatus::Running)
            .count()
    }

    /// Every unit is `Complete`, `Failed` or `Skipped`.
    pub fn is_finished(&self) -> bool {
        self.units.values().all(|u| u.status.is_terminal())
    }

    /// Seed the ready queue with the graph's level 0 (production API).
    pub fn start(&mut self) -> Vec<UnitId> {
        self.step_start().newly_ready
    }

    /// Apply a worker's outcome for `id` (production API).
    ///
    /// Returns the units that became ready as a result.
    pub fn handle_completion(&mut self, id: &str, outcome: UnitOutcome) -> Vec<UnitId> {
        self.step_completion(id, outcome).newly_ready
    }

    /// Manual-step variant of [`Scheduler::start`].
    pub fn step_start(&mut self) -> SchedulerStep {
        if self.started {
            debug!("scheduler already started; ignoring");
            return SchedulerStep {
                run_finished: self.is_finished(),
                ..SchedulerStep::default()
            };
        }
        self.started = true;

        let mut manager = StateManager::new(&self.graph, &mut self.units);
        let seeded = manager.seed_roots();
        self.enqueue(&seeded);

        info!(roots = ?seeded, units = self.units.len(), "scheduler started");

        SchedulerStep {
            newly_ready: seeded,
            newly_skipped: Vec::new(),
            run_finished: self.is_finished(),
        }
    }

    /// Manual-step variant of [`Scheduler::handle_completion`].
    pub fn step_completion(&mut self, id: &str, outcome: UnitOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(unit) = self.units.get_mut(id) else {
            warn!(unit = %id, "completion for unknown unit; ignoring");
            step.run_finished = self.is_finished();
            return step;
        };

        if unit.status != UnitStatus::Running {
            warn!(
                unit = %id,
                status = %unit.status,
                "completion for a unit that is not running; ignoring"
            );
            step.run_finished = self.is_finished();
            return step;
        }

        match outcome {
            UnitOutcome::Complete => {
                unit.status = UnitStatus::Complete;
                debug!(unit = %id, "unit complete");

                let mut manager = StateManager::new(&self.graph, &mut self.units);
                step.newly_ready = manager.promote_dependents(id);
                self.enqueue(&step.newly_ready);
            }
            UnitOutcome::Failed(err) => {
                unit.status = UnitStatus::Failed;
                warn!(unit = %id, error = %err, "unit failed; skipping its dependents");
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }

                let mut manager = StateManager::new(&self.graph, &mut self.units);
                step.newly_skipped = manager.mark_dependents_skipped(id);
                self.publish_skipped(&step.newly_skipped, id);
            }
        }

        step.run_finished = self.is_finished();
        if step.run_finished {
            info!("scheduler: all units terminal");
        }
        step
    }

    /// Pop the next ready unit (lowest level, then lowest id) and mark it
    /// `Running`.
    pub fn next_ready(&mut self) -> Option<ScheduledUnit> {
        let (level, id) = self.ready.pop_first()?;
        let unit = self.units.get_mut(&id)?;
        unit.status = UnitStatus::Running;
        debug!(unit = %id, level, "dispatching unit");
        Some(ScheduledUnit::from_unit(unit, level))
    }

    /// Drain the ready queue in dispatch order, marking every unit `Running`.
    pub fn take_ready(&mut self) -> Vec<ScheduledUnit> {
        self.take_ready_up_to(usize::MAX)
    }

    /// Release at most `limit` ready units in dispatch order. The rest stay
    /// `Ready` and queued.
    pub fn take_ready_up_to(&mut self, limit: usize) -> Vec<ScheduledUnit> {
        let mut out = Vec::with_capacity(limit.min(self.ready.len()));
        while out.len() < limit {
            let Some(unit) = self.next_ready() else {
                break;
            };
            out.push(unit);
        }
        out
    }

    /// A released unit that the pool refused to start. It never ran, so it
    /// is skipped with `cause` and its downstream subtree with it.
    pub fn step_not_started(&mut self, id: &str, cause: &str) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        match self.units.get_mut(id) {
            Some(unit) if unit.status == UnitStatus::Running => {
                unit.status = UnitStatus::Skipped;
                info!(unit = %id, cause, "unit was never started; skipping");
                self.publish_skipped(&[id.to_string()], cause);

                let mut manager = StateManager::new(&self.graph, &mut self.units);
                let downstream = manager.mark_dependents_skipped(id);
                self.publish_skipped(&downstream, id);

                step.newly_skipped.push(id.to_string());
                step.newly_skipped.extend(downstream);
            }
            Some(unit) => {
                warn!(unit = %id, status = %unit.status, "unit to skip is not running; ignoring");
            }
            None => {
                warn!(unit = %id, "skip for unknown unit; ignoring");
            }
        }

        step.run_finished = self.is_finished();
        step
    }

    /// Skip every unit that has not been dispatched yet. Used when the run is
    /// shutting down; running units are left to report on their own.
    pub fn abandon_unstarted(&mut self) -> SchedulerStep {
        self.ready.clear();
        let mut manager = StateManager::new(&self.graph, &mut self.units);
        let skipped = manager.skip_unstarted();
        if !skipped.is_empty() {
            info!(count = skipped.len(), "skipping units that never started");
        }
        self.publish_skipped(&skipped, "shutdown");

        SchedulerStep {
            newly_ready: Vec::new(),
            newly_skipped: skipped,
            run_finished: self.is_finished(),
        }
    }

    /// Count units by outcome.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            first_error: self.first_error.clone(),
            ..RunSummary::default()
        };
        for unit in self.units.values() {
            match unit.status {
                UnitStatus::Complete => summary.completed += 1,
                UnitStatus::Failed => summary.failed += 1,
                UnitStatus::Skipped => summary.skipped += 1,
                UnitStatus::Pending | UnitStatus::Ready | UnitStatus::Running => {
                    summary.unfinished += 1
                }
            }
        }
        summary
    }

    fn enqueue(&mut self, ids: &[UnitId]) {
        for id in ids {
            let level = self.graph.level_of(id).unwrap_or(0);
            self.ready.insert((level, id.clone()));
            if let Some(bus) = &self.events {
                bus.emit(id, EventKind::UnitReady);
            }
        }
    }

    fn publish_skipped(&self, ids: &[UnitId], cause: &str) {
        if let Some(bus) = &self.events {
            for id in ids {
                bus.emit(
                    id,
                    EventKind::UnitSkipped {
                        cause: cause.to_string(),
                    },
                );
            }
        }
    }
}
