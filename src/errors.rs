// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::time::Duration;

use thiserror::Error;

use crate::dag::UnitId;

/// Why a single unit did not complete.
///
/// This is `Clone` so the pool can keep the first failure around and hand it
/// to every caller of `WorkerPool::wait`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unit '{unit}' failed{}: {reason}", in_task_suffix(*task))]
pub struct UnitExecutionError {
    pub unit: UnitId,
    /// Task number (1-indexed) that broke, if the failure is task-scoped.
    pub task: Option<u32>,
    pub reason: String,
}

impl UnitExecutionError {
    pub fn new(unit: impl Into<UnitId>, reason: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            task: None,
            reason: reason.into(),
        }
    }

    pub fn in_task(unit: impl Into<UnitId>, task: u32, reason: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            task: Some(task),
            reason: reason.into(),
        }
    }

    /// Failure recorded for a unit that was cancelled before it finished.
    pub fn cancelled(unit: impl Into<UnitId>, task: Option<u32>) -> Self {
        Self {
            unit: unit.into(),
            task,
            reason: "cancelled".to_string(),
        }
    }
}

fn in_task_suffix(task: Option<u32>) -> String {
    task.map(|t| format!(" in task {t}")).unwrap_or_default()
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Cycle detected in unit DAG: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<UnitId> },

    #[error("Unit '{unit}' depends on unknown unit '{dependency}'")]
    MissingDependency { unit: UnitId, dependency: UnitId },

    #[error("Unit already submitted: {0}")]
    DuplicateUnit(UnitId),

    #[error(transparent)]
    UnitExecution(#[from] UnitExecutionError),

    #[error("Shutdown did not finish within {timeout:?}; still running: {outstanding:?}")]
    ShutdownTimeout {
        timeout: Duration,
        outstanding: Vec<UnitId>,
    },

    #[error("No container runtime available (tried {})", tried.join(", "))]
    NoContainerRuntime { tried: Vec<String> },

    #[error("Container error: {0}")]
    Container(String),

    #[error("Container {0} is still running; stop it before removing")]
    ContainerRunning(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, OrchestratorError>;
