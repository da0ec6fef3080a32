// src/events.rs

//! Lifecycle events and the bus they are published on.
//!
//! The orchestrator only produces events. Delivery is best-effort: the bus is
//! a bounded `tokio::sync::broadcast` channel, so publishing never blocks and
//! a slow subscriber lags (dropping the oldest events) instead of stalling
//! scheduling.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::dag::UnitId;

/// What happened to a unit or one of its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    UnitReady,
    UnitStarted,
    UnitCompleted,
    UnitFailed { reason: String },
    /// `cause` is the upstream unit that broke, or `"shutdown"`.
    UnitSkipped { cause: String },
    TaskStarted { task: u32 },
    TaskCompleted { task: u32 },
    TaskFailed { task: u32, reason: String },
    TaskSkipped { task: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorEvent {
    pub unit: UnitId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl OrchestratorEvent {
    pub fn new(unit: impl Into<UnitId>, kind: EventKind) -> Self {
        Self {
            unit: unit.into(),
            at: Utc::now(),
            kind,
        }
    }
}

/// Fan-out event sink. Cheap to clone; all clones publish to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, event: OrchestratorEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn emit(&self, unit: &str, kind: EventKind) {
        self.publish(OrchestratorEvent::new(unit, kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::UnitReady => write!(f, "ready"),
            EventKind::UnitStarted => write!(f, "started"),
            EventKind::UnitCompleted => write!(f, "completed"),
            EventKind::UnitFailed { reason } => write!(f, "failed: {reason}"),
            EventKind::UnitSkipped { cause } => write!(f, "skipped (cause: {cause})"),
            EventKind::TaskStarted { task } => write!(f, "task {task} started"),
            EventKind::TaskCompleted { task } => write!(f, "task {task} completed"),
            EventKind::TaskFailed { task, reason } => write!(f, "task {task} failed: {reason}"),
            EventKind::TaskSkipped { task } => write!(f, "task {task} skipped"),
        }
    }
}

impl std::fmt::Display for OrchestratorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.at.format("%H:%M:%S%.3f"),
            self.unit,
            self.kind
        )
    }
}
