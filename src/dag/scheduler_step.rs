// src/dag/scheduler_step.rs

//! Step-by-step result types for the scheduler.

use crate::dag::unit::UnitId;
use crate::errors::UnitExecutionError;

/// Structured result of a single scheduler "step".
///
/// Production code mostly needs `newly_ready`; tests use the full record to
/// assert on what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Units that moved to `Ready` (and into the ready queue) in this step.
    pub newly_ready: Vec<UnitId>,
    /// Units that moved to `Skipped` in this step.
    pub newly_skipped: Vec<UnitId>,
    /// Whether this step left every unit in a terminal state.
    pub run_finished: bool,
}

/// Final (or in-progress) tally of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Units not yet terminal (pending, ready or running).
    pub unfinished: usize,
    /// First unit failure reported to the scheduler.
    pub first_error: Option<UnitExecutionError>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.skipped + self.unfinished
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.unfinished == 0
    }
}
