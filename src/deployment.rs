//! The deployment seam and its queue-backed mock.

use crate::config::MockDeploymentConfig;
use crate::error::DeploymentError;
use crate::lock;
use crate::queue::ResponseQueue;
use crate::response::QueuedResponse;
use async_trait::async_trait;
use bson::Document;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// An outgoing command, as handed to a deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// Command name (the first key of the body)
    pub name: String,
    /// Target database
    pub database: String,
    /// Command body
    pub body: Document,
}

impl Command {
    pub fn new(database: impl Into<String>, body: Document) -> Self {
        let name = body.keys().next().cloned().unwrap_or_default();
        Self {
            name,
            database: database.into(),
            body,
        }
    }

    /// Collection the command targets, if it names one.
    pub fn collection(&self) -> Option<&str> {
        if self.name == "getMore" {
            return self.body.get_str("collection").ok();
        }
        self.body.get_str(&self.name).ok()
    }

    /// `<database>.<collection>`, or just the database for database-level
    /// commands.
    pub fn namespace(&self) -> String {
        match self.collection() {
            Some(coll) => format!("{}.{}", self.database, coll),
            None => self.database.clone(),
        }
    }

    /// The body with `$db` appended, as it would go over the wire.
    pub fn to_wire_document(&self) -> Document {
        let mut wire = self.body.clone();
        wire.insert("$db", self.database.clone());
        wire
    }
}

/// Anything that can answer a command.
#[async_trait]
pub trait Deployment: Send + Sync {
    /// Send one command and wait for its reply.
    async fn send_command(&self, command: &Command) -> Result<Document, DeploymentError>;
}

/// A deployment that answers every command with the next queued reply.
///
/// There is no I/O and no command inspection: the Nth command receives the
/// Nth queued response, whatever it is. Follow-up `getMore` batches must be
/// queued like any other reply.
#[derive(Debug, Default)]
pub struct MockDeployment {
    queue: Mutex<ResponseQueue>,
    /// Every command received, in arrival order
    received: Mutex<Vec<Command>>,
    commands_received: AtomicU64,
    responses_served: AtomicU64,
    log_commands: bool,
}

impl MockDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a deployment with the configured replies already queued.
    pub fn from_config(config: &MockDeploymentConfig) -> anyhow::Result<Self> {
        let responses = config
            .responses
            .iter()
            .enumerate()
            .map(|(i, def)| {
                def.to_queued()
                    .map_err(|e| anyhow::anyhow!("Response {}: {}", i, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        info!(
            responses = responses.len(),
            log_commands = config.settings.log_commands,
            "Mock deployment initialized"
        );

        let deployment = Self {
            log_commands: config.settings.log_commands,
            ..Self::default()
        };
        deployment.add_responses(responses);
        Ok(deployment)
    }

    /// Queue one reply at the tail.
    pub fn add_response(&self, response: QueuedResponse) {
        lock(&self.queue).push(response);
    }

    /// Queue several replies at the tail, preserving their order.
    pub fn add_responses<I>(&self, responses: I)
    where
        I: IntoIterator<Item = QueuedResponse>,
    {
        lock(&self.queue).extend(responses);
    }

    /// Number of commands received so far.
    pub fn commands_received(&self) -> u64 {
        self.commands_received.load(Ordering::Relaxed)
    }

    /// Number of commands that were answered from the queue.
    pub fn responses_served(&self) -> u64 {
        self.responses_served.load(Ordering::Relaxed)
    }

    pub fn responses_remaining(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_exhausted(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Copies of every command received, in arrival order.
    pub fn received_commands(&self) -> Vec<Command> {
        lock(&self.received).clone()
    }
}

#[async_trait]
impl Deployment for MockDeployment {
    async fn send_command(&self, command: &Command) -> Result<Document, DeploymentError> {
        let received = self.commands_received.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.received).push(command.clone());

        if self.log_commands {
            info!(
                command = %command.name,
                namespace = %command.namespace(),
                received,
                "Command received"
            );
        }

        let Some(response) = lock(&self.queue).pop() else {
            warn!(
                command = %command.name,
                received,
                "No queued response left for command"
            );
            return Err(DeploymentError::ExhaustedResponses {
                command_name: command.name.clone(),
                received,
            });
        };

        self.responses_served.fetch_add(1, Ordering::Relaxed);
        debug!(
            command = %command.name,
            response = response.kind(),
            "Serving queued response"
        );
        Ok(response.to_document())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{cursor, success, success_with, write_error, BatchKind};
    use bson::doc;
    use tokio_test::{assert_err, assert_ok};

    fn insert(n: i32) -> Command {
        Command::new("test", doc! { "insert": "coll", "documents": [{ "_id": n }] })
    }

    #[test]
    fn test_command_naming() {
        let cmd = insert(1);
        assert_eq!(cmd.name, "insert");
        assert_eq!(cmd.collection(), Some("coll"));
        assert_eq!(cmd.namespace(), "test.coll");
        assert_eq!(cmd.to_wire_document().get_str("$db").unwrap(), "test");

        let get_more = Command::new(
            "test",
            doc! { "getMore": 7_i64, "collection": "coll" },
        );
        assert_eq!(get_more.namespace(), "test.coll");

        let ping = Command::new("admin", doc! { "ping": 1 });
        assert_eq!(ping.namespace(), "admin");
    }

    #[tokio::test]
    async fn test_kth_command_gets_kth_response() {
        let deployment = MockDeployment::new();
        for n in 1..=5 {
            deployment.add_response(success_with(doc! { "n": n }));
        }

        for n in 1..=5 {
            let reply = assert_ok!(deployment.send_command(&insert(n)).await);
            assert_eq!(reply.get_i32("n").unwrap(), n);
        }
        assert!(deployment.is_exhausted());
    }

    #[tokio::test]
    async fn test_exhaustion_leaves_prior_sends_intact() {
        let deployment = MockDeployment::new();
        deployment.add_responses(vec![success(), write_error("dup", 11000)]);

        assert_ok!(deployment.send_command(&insert(1)).await);
        let second = assert_ok!(deployment.send_command(&insert(2)).await);
        assert!(second.get_array("writeErrors").is_ok());

        let err = assert_err!(deployment.send_command(&insert(3)).await);
        assert_eq!(
            err,
            DeploymentError::ExhaustedResponses {
                command_name: "insert".to_string(),
                received: 3,
            }
        );

        assert_eq!(deployment.commands_received(), 3);
        assert_eq!(deployment.responses_served(), 2);
        assert_eq!(deployment.received_commands().len(), 3);
    }

    #[tokio::test]
    async fn test_cursor_batches_are_not_generated() {
        let deployment = MockDeployment::new();
        deployment.add_response(cursor(
            9,
            "test.coll",
            BatchKind::FirstBatch,
            vec![doc! { "_id": 1 }],
        ));

        let reply = assert_ok!(
            deployment
                .send_command(&Command::new("test", doc! { "aggregate": "coll", "pipeline": [] }))
                .await
        );
        assert_eq!(reply.get_document("cursor").unwrap().get_i64("id").unwrap(), 9);

        // No follow-up batch queued, so the getMore fails.
        let get_more = Command::new("test", doc! { "getMore": 9_i64, "collection": "coll" });
        let err = assert_err!(deployment.send_command(&get_more).await);
        assert!(matches!(err, DeploymentError::ExhaustedResponses { .. }));
    }

    #[tokio::test]
    async fn test_responses_can_be_added_between_sends() {
        let deployment = MockDeployment::new();
        deployment.add_response(success());
        assert_ok!(deployment.send_command(&insert(1)).await);
        assert!(deployment.is_exhausted());

        deployment.add_response(success_with(doc! { "n": 2 }));
        assert_eq!(deployment.responses_remaining(), 1);
        let reply = assert_ok!(deployment.send_command(&insert(2)).await);
        assert_eq!(reply.get_i32("n").unwrap(), 2);
    }
}
