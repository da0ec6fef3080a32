#![allow(dead_code)]

use tokio::sync::broadcast;

use unitdag::events::{EventKind, OrchestratorEvent};

pub use unitdag_test_utils::{init_tracing, with_timeout};

/// Everything currently buffered on `rx`, without waiting.
pub fn drain_events(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// `(unit, kind)` pairs, for compact assertions.
pub fn kinds(events: &[OrchestratorEvent]) -> Vec<(String, EventKind)> {
    events
        .iter()
        .map(|e| (e.unit.clone(), e.kind.clone()))
        .collect()
}
