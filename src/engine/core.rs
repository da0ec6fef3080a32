// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated scheduler state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from the pool's report channel
//! - submitting units to the worker pool
//! - performing the shutdown handshake
//!
//! The core is unit-testable without Tokio, channels, or processes.

use crate::dag::{RunSummary, Scheduler};
use crate::engine::RuntimeEvent;
use crate::engine::event_handlers::{
    CoreStep, handle_shutdown, handle_start, handle_unit_finished, handle_unit_rejected,
};

/// Pure core runtime state.
///
/// Owns the scheduler; has **no** channels, no Tokio types, and does no IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    /// Pool capacity; at most this many units are `Running` at once.
    max_parallel: usize,
    shutting_down: bool,
}

impl CoreRuntime {
    /// `max_parallel` must match the capacity of the pool the shell submits to.
    pub fn new(scheduler: Scheduler, max_parallel: usize) -> Self {
        Self {
            scheduler,
            max_parallel: max_parallel.max(1),
            shutting_down: false,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    pub fn summary(&self) -> RunSummary {
        self.scheduler.summary()
    }

    /// Seed the run and return the first dispatch.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler, self.max_parallel)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::UnitFinished { unit, outcome } => handle_unit_finished(
                &mut self.scheduler,
                self.max_parallel,
                self.shutting_down,
                unit,
                outcome,
            ),
            RuntimeEvent::UnitRejected { unit, cause } => handle_unit_rejected(
                &mut self.scheduler,
                self.max_parallel,
                self.shutting_down,
                unit,
                cause,
            ),
            RuntimeEvent::ShutdownRequested => {
                handle_shutdown(&mut self.scheduler, &mut self.shutting_down)
            }
        }
    }
}
