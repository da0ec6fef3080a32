// src/dag/mod.rs

//! Unit dependency DAG and scheduling.
//!
//! - [`graph`] builds and validates the immutable dependency DAG (Kahn
//!   ordering, cycle reporting, levels).
//! - [`scheduler`] owns per-unit lifecycle state and decides which units are
//!   ready to run, and which must be skipped after a failure.
//! - [`unit`] provides the unit and task records.
//! - [`scheduler_step`] defines the result types for scheduler steps.
//! - [`state_manager`] applies state transitions over the unit map.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod unit;

pub use graph::DagGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::{RunSummary, SchedulerStep};
pub use unit::{ScheduledUnit, Task, TaskStatus, Unit, UnitId, UnitStatus};
