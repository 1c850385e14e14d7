//! Passive observation of interpreter execution events.
//!
//! Grounded on the teacher's `event_bus::sink::EventSink` (a narrow trait
//! implemented by `StdOutSink`/`MemorySink`, invoked by the bus for every
//! event) generalized from a queue-backed multi-sink bus to a single
//! synchronous observer callback, since monitors here are passive and must
//! never affect execution outcome (§4.7) — there is no backpressure or
//! async dispatch concern left to carry over from the teacher's
//! `flume`-based bus.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::errors::WorkflowError;
use crate::ids::{EdgeId, NodeId, WorkflowId};

/// The events an interpreter step loop emits at defined points (§4.7).
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    WorkflowStarted { workflow_id: WorkflowId },
    WorkflowResumed { workflow_id: WorkflowId },
    NodeStarted { node_id: NodeId },
    NodeCompleted { node_id: NodeId, duration: Duration },
    NodeError { node_id: NodeId, error: WorkflowError },
    NodeTransition {
        edge_id: Option<EdgeId>,
        from: NodeId,
        to: NodeId,
    },
    WorkflowSuspended { workflow_id: WorkflowId, reason: String },
    WorkflowCompleted { workflow_id: WorkflowId },
    WorkflowError { workflow_id: WorkflowId, error: WorkflowError },
    Warning { message: String },
}

/// An observer of interpreter execution events.
///
/// Monitors are passive: any panic raised from `on_event` is caught, logged,
/// and swallowed by [`notify`] so a misbehaving observer can never affect
/// execution outcome.
pub trait Monitor: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent);
}

/// The default, no-op monitor used when a caller configures none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl Monitor for NoopMonitor {
    fn on_event(&self, _event: &WorkflowEvent) {}
}

/// An in-memory monitor useful for tests and for inspecting a run after the
/// fact, in the spirit of the teacher's `MemorySink`.
#[derive(Clone, Default)]
pub struct MemoryMonitor {
    events: Arc<Mutex<Vec<WorkflowEvent>>>,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Monitor for MemoryMonitor {
    fn on_event(&self, event: &WorkflowEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Dispatches `event` to `monitor`, catching and logging any panic so the
/// interpreter's own control flow is never affected (§4.7).
pub fn notify(monitor: &dyn Monitor, event: WorkflowEvent) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| monitor.on_event(&event)));
    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "monitor panicked".to_string());
        tracing::warn!(monitor.panic = %message, "observer raised an exception; swallowed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanicsOnEverything;
    impl Monitor for PanicsOnEverything {
        fn on_event(&self, _event: &WorkflowEvent) {
            panic!("boom");
        }
    }

    #[test]
    fn panicking_monitor_is_swallowed() {
        notify(&PanicsOnEverything, WorkflowEvent::Warning { message: "x".into() });
    }

    #[test]
    fn memory_monitor_records_events() {
        let monitor = MemoryMonitor::new();
        notify(&monitor, WorkflowEvent::Warning { message: "hello".into() });
        assert_eq!(monitor.snapshot().len(), 1);
    }
}
