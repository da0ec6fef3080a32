// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the unit scheduler (readiness, skip propagation)
//! - the bounded worker pool
//! - the main runtime loop that reacts to:
//!   - unit completion / failure reports from the pool
//!   - shutdown requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; [`pool`] bounds concurrent unit execution.

use std::time::Duration;

use crate::dag::UnitId;
use crate::errors::UnitExecutionError;

/// Terminal result a worker reports for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Complete,
    Failed(UnitExecutionError),
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Complete)
    }
}

/// Runtime options used by the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// How long a shutdown waits for running units to unwind.
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Events flowing into the runtime from the pool and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A unit reached a terminal state inside the pool.
    UnitFinished { unit: UnitId, outcome: UnitOutcome },
    /// The pool refused a released unit before it started (e.g. it was
    /// shutting down). `cause` ends up on the `UnitSkipped` event.
    UnitRejected { unit: UnitId, cause: String },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod pool;
pub mod runtime;

pub use self::core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use pool::{PoolStats, WorkerPool, WorkerState};
pub use runtime::Runtime;
