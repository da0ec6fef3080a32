// src/dag/unit.rs

//! Unit and task records plus their lifecycle states.

use std::fmt;

use serde::Serialize;

/// Canonical unit identifier type used throughout the crate.
pub type UnitId = String;

/// Lifecycle state of a unit (and, mirrored, of a task).
///
/// `Complete`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Waiting on at least one dependency.
    Pending,
    /// Every dependency completed; queued for dispatch.
    Ready,
    /// Handed to the worker pool.
    Running,
    Complete,
    /// The unit's own work broke.
    Failed,
    /// Never attempted because an upstream unit failed or was skipped.
    Skipped,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitStatus::Complete | UnitStatus::Failed | UnitStatus::Skipped
        )
    }

    /// Whether a dependency in this state prevents its dependents from ever running.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, UnitStatus::Failed | UnitStatus::Skipped)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Ready => "ready",
            UnitStatus::Running => "running",
            UnitStatus::Complete => "complete",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Tasks share the unit state set.
pub type TaskStatus = UnitStatus;

/// Smallest item of work inside a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// 1-indexed position within the owning unit.
    pub number: u32,
    /// Instructions handed to the execution provider.
    pub description: String,
    /// Task numbers (same unit) that must succeed before this one starts.
    pub depends_on: Vec<u32>,
    /// Validation command that must exit successfully for the task to count
    /// as complete. Empty means "no check".
    pub backpressure: String,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(number: u32, description: impl Into<String>) -> Self {
        Self {
            number,
            description: description.into(),
            depends_on: Vec::new(),
            backpressure: String::new(),
            status: TaskStatus::Pending,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = u32>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    pub fn backpressure(mut self, cmd: impl Into<String>) -> Self {
        self.backpressure = cmd.into();
        self
    }
}

/// A node of the dependency graph: a cohesive body of work made of tasks.
///
/// `status` is owned by the [`Scheduler`](crate::dag::Scheduler); workers
/// never touch it and only report outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: UnitId,
    /// Direct dependencies, in declaration order.
    pub deps: Vec<UnitId>,
    pub status: UnitStatus,
    pub tasks: Vec<Task>,
}

impl Unit {
    pub fn new(id: impl Into<UnitId>) -> Self {
        Self {
            id: id.into(),
            deps: Vec::new(),
            status: UnitStatus::Pending,
            tasks: Vec::new(),
        }
    }

    pub fn after(mut self, dep: impl Into<UnitId>) -> Self {
        self.deps.push(dep.into());
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }
}

/// A unit the scheduler has released for execution.
#[derive(Debug, Clone)]
pub struct ScheduledUnit {
    pub id: UnitId,
    /// Dependency depth of the unit in the graph.
    pub level: usize,
    pub tasks: Vec<Task>,
}

impl ScheduledUnit {
    pub fn from_unit(unit: &Unit, level: usize) -> Self {
        Self {
            id: unit.id.clone(),
            level,
            tasks: unit.tasks.clone(),
        }
    }
}
