//! Ordered, queryable history of command events.

use crate::lock;
use crate::monitor::{
    CommandEventHandler, CommandFailedEvent, CommandFinishedEvent, CommandStartedEvent,
    CommandSucceededEvent,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Records every command event it observes, one append-only history per
/// event kind. Recorded events are never modified or removed.
///
/// Create one per scenario and hand a clone of the `Arc` to the client
/// options; the histories can be inspected at any time afterwards.
#[derive(Debug, Default)]
pub struct EventRecorder {
    started: Mutex<Vec<CommandStartedEvent>>,
    succeeded: Mutex<Vec<CommandSucceededEvent>>,
    failed: Mutex<Vec<CommandFailedEvent>>,
    finished: Mutex<Vec<CommandFinishedEvent>>,
}

/// A point-in-time copy of all four histories.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventHistory {
    pub started: Vec<CommandStartedEvent>,
    pub succeeded: Vec<CommandSucceededEvent>,
    pub failed: Vec<CommandFailedEvent>,
    pub finished: Vec<CommandFinishedEvent>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> Vec<CommandStartedEvent> {
        lock(&self.started).clone()
    }

    pub fn succeeded(&self) -> Vec<CommandSucceededEvent> {
        lock(&self.succeeded).clone()
    }

    pub fn failed(&self) -> Vec<CommandFailedEvent> {
        lock(&self.failed).clone()
    }

    pub fn finished(&self) -> Vec<CommandFinishedEvent> {
        lock(&self.finished).clone()
    }

    /// Started events for one command name, in order.
    pub fn started_named(&self, command_name: &str) -> Vec<CommandStartedEvent> {
        lock(&self.started)
            .iter()
            .filter(|e| e.command_name == command_name)
            .cloned()
            .collect()
    }

    /// Every event recorded for one invocation.
    pub fn history_for(&self, request_id: i32) -> EventHistory {
        EventHistory {
            started: keep(&self.started, |e| e.request_id == request_id),
            succeeded: keep(&self.succeeded, |e| e.finished.request_id == request_id),
            failed: keep(&self.failed, |e| e.finished.request_id == request_id),
            finished: keep(&self.finished, |e| e.request_id == request_id),
        }
    }

    pub fn snapshot(&self) -> EventHistory {
        EventHistory {
            started: self.started(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            finished: self.finished(),
        }
    }
}

fn keep<T: Clone>(history: &Mutex<Vec<T>>, pred: impl Fn(&T) -> bool) -> Vec<T> {
    lock(history).iter().filter(|e| pred(e)).cloned().collect()
}

impl CommandEventHandler for EventRecorder {
    fn handle_started(&self, event: &CommandStartedEvent) {
        debug!(request_id = event.request_id, command = %event.command_name, "started");
        lock(&self.started).push(event.clone());
    }

    fn handle_succeeded(&self, event: &CommandSucceededEvent) {
        debug!(request_id = event.finished.request_id, "succeeded");
        lock(&self.succeeded).push(event.clone());
    }

    fn handle_failed(&self, event: &CommandFailedEvent) {
        debug!(request_id = event.finished.request_id, failure = %event.failure, "failed");
        lock(&self.failed).push(event.clone());
    }

    fn handle_finished(&self, event: &CommandFinishedEvent) {
        lock(&self.finished).push(event.clone());
    }
}
