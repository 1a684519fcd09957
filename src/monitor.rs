//! Command and connection-pool monitoring.
//!
//! The client path reports every command through [`CommandEventHandler`]:
//! one started event, then exactly one of succeeded or failed, then one
//! finished event carrying the fields the two terminal events share.

use bson::Document;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A command is about to be sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandStartedEvent {
    /// Correlates the events of one command invocation
    pub request_id: i32,
    pub command_name: String,
    pub database_name: String,
    /// The command as sent, including `$db`
    pub command: Document,
    pub recorded_at: DateTime<Utc>,
}

/// How a command invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Succeeded,
    Failed,
}

/// Fields shared by succeeded and failed events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFinishedEvent {
    pub request_id: i32,
    pub command_name: String,
    pub database_name: String,
    pub duration: Duration,
    pub outcome: CommandOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// The deployment answered and the reply reported `ok: 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSucceededEvent {
    #[serde(flatten)]
    pub finished: CommandFinishedEvent,
    pub reply: Document,
}

/// The deployment failed, or the reply reported `ok: 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFailedEvent {
    #[serde(flatten)]
    pub finished: CommandFinishedEvent,
    pub failure: String,
}

/// Observer of command lifecycles. All methods default to no-ops.
pub trait CommandEventHandler: Send + Sync {
    fn handle_started(&self, _event: &CommandStartedEvent) {}

    fn handle_succeeded(&self, _event: &CommandSucceededEvent) {}

    fn handle_failed(&self, _event: &CommandFailedEvent) {}

    /// Called once per invocation, right after the terminal event.
    fn handle_finished(&self, _event: &CommandFinishedEvent) {}
}

/// Connection pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    ConnectionCheckedOut { connection_id: u32 },
    ConnectionCheckedIn { connection_id: u32 },
}

/// Observer of connection pool activity.
pub trait PoolMonitor: Send + Sync {
    fn handle_pool_event(&self, event: &PoolEvent);
}

/// Counts connections currently checked out.
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    checked_out: AtomicI64,
}

impl ConnectionCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn checked_out(&self) -> i64 {
        self.checked_out.load(Ordering::SeqCst)
    }
}

impl PoolMonitor for ConnectionCounter {
    fn handle_pool_event(&self, event: &PoolEvent) {
        match event {
            PoolEvent::ConnectionCheckedOut { .. } => {
                self.checked_out.fetch_add(1, Ordering::SeqCst);
            }
            PoolEvent::ConnectionCheckedIn { .. } => {
                self.checked_out.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
