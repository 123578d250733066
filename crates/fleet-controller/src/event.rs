//! Event queue between a kind's watcher and its controller.
//!
//! Bounded: when the controller falls behind, the watcher's `send` waits.

use tokio::sync::mpsc;

use fleet_state::WorkloadInstance;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadEvent {
    Added(WorkloadInstance),
    Modified(WorkloadInstance),
    /// Carries the last version seen before the instance vanished.
    Deleted(WorkloadInstance),
    /// Observed health of the instance's children changed; carries the table key.
    Observed(String),
}

impl WorkloadEvent {
    pub fn label(&self) -> &'static str {
        match self {
            WorkloadEvent::Added(_) => "added",
            WorkloadEvent::Modified(_) => "modified",
            WorkloadEvent::Deleted(_) => "deleted",
            WorkloadEvent::Observed(_) => "observed",
        }
    }
}

pub type EventSender = mpsc::Sender<WorkloadEvent>;
pub type EventReceiver = mpsc::Receiver<WorkloadEvent>;

pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}
