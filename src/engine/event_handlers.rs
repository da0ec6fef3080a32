// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info};

use crate::dag::{ScheduledUnit, Scheduler, UnitId};
use crate::engine::UnitOutcome;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Submit these units to the pool, in this order.
    DispatchUnits(Vec<ScheduledUnit>),
    /// Cancel running units and wait for them to unwind.
    Shutdown,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Seed the run: release level-0 units, up to `max_parallel` of them.
pub fn handle_start(scheduler: &mut Scheduler, max_parallel: usize) -> CoreStep {
    scheduler.start();
    let mut commands = Vec::new();
    push_dispatch(scheduler, max_parallel, &mut commands);

    CoreStep {
        commands,
        keep_running: !scheduler.is_finished(),
    }
}

/// Handle a unit reaching a terminal state.
///
/// - Success releases any dependents that became ready.
/// - Failure skips the unit's downstream subtree; nothing new is released.
/// - While shutting down nothing new is dispatched.
pub fn handle_unit_finished(
    scheduler: &mut Scheduler,
    max_parallel: usize,
    shutting_down: bool,
    unit: UnitId,
    outcome: UnitOutcome,
) -> CoreStep {
    let mut commands = Vec::new();

    let step = scheduler.step_completion(&unit, outcome);
    debug!(
        unit = %unit,
        newly_ready = ?step.newly_ready,
        newly_skipped = ?step.newly_skipped,
        "applied unit outcome"
    );

    release_or_abandon(scheduler, max_parallel, shutting_down, &mut commands);

    CoreStep {
        commands,
        keep_running: !scheduler.is_finished(),
    }
}

/// Handle a released unit the pool refused to start.
///
/// The unit never ran, so it is skipped rather than failed, together with
/// its downstream subtree. Its slot was never taken, so more ready units may
/// be released.
pub fn handle_unit_rejected(
    scheduler: &mut Scheduler,
    max_parallel: usize,
    shutting_down: bool,
    unit: UnitId,
    cause: String,
) -> CoreStep {
    let mut commands = Vec::new();

    let step = scheduler.step_not_started(&unit, &cause);
    debug!(unit = %unit, newly_skipped = ?step.newly_skipped, "applied rejected submission");

    release_or_abandon(scheduler, max_parallel, shutting_down, &mut commands);

    CoreStep {
        commands,
        keep_running: !scheduler.is_finished(),
    }
}

/// Handle a shutdown request: stop releasing units and ask the shell to
/// cancel whatever is running.
pub fn handle_shutdown(scheduler: &mut Scheduler, shutting_down: &mut bool) -> CoreStep {
    if *shutting_down {
        debug!("shutdown already in progress");
        return CoreStep {
            commands: Vec::new(),
            keep_running: !scheduler.is_finished(),
        };
    }

    *shutting_down = true;
    info!("shutdown requested; no further units will be dispatched");
    scheduler.abandon_unstarted();

    CoreStep {
        commands: vec![CoreCommand::Shutdown],
        keep_running: !scheduler.is_finished(),
    }
}

fn release_or_abandon(
    scheduler: &mut Scheduler,
    max_parallel: usize,
    shutting_down: bool,
    commands: &mut Vec<CoreCommand>,
) {
    if shutting_down {
        // Anything released by this event must not start any more.
        scheduler.abandon_unstarted();
    } else {
        push_dispatch(scheduler, max_parallel, commands);
    }
}

/// Release only as many units as the pool has free slots, so every unit the
/// scheduler marks `Running` is actually executing.
fn push_dispatch(scheduler: &mut Scheduler, max_parallel: usize, commands: &mut Vec<CoreCommand>) {
    let free = max_parallel.saturating_sub(scheduler.running_count());
    let ready = scheduler.take_ready_up_to(free);
    if !ready.is_empty() {
        commands.push(CoreCommand::DispatchUnits(ready));
    }
}
