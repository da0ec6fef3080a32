// src/exec/mod.rs

//! Unit execution layer.
//!
//! This module is responsible for actually running a unit's tasks against
//! the external collaborators and reporting one terminal outcome back to the
//! pool.
//!
//! - [`worker`] owns the per-unit task loop (ordering, backpressure gate,
//!   cancellation checks).
//! - [`provider`] provides the `ExecutionProvider` trait and the concrete
//!   local / containerised agent providers.
//! - [`backpressure`] runs a task's validation command.

use std::future::Future;
use std::pin::Pin;

pub mod backpressure;
pub mod provider;
pub mod worker;

pub use backpressure::{BackpressureResult, BackpressureRunner, ShellBackpressure};
pub use provider::{
    ContainerAgentProvider, ExecutionProvider, LocalAgentProvider, ProviderOutput, TaskRequest,
    provider_from_config,
};
pub use worker::{Worker, WorkerConfig, WorkerDeps};

/// Boxed, `Send` future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
