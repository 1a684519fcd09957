//! Narrow client command path.
//!
//! Just enough of a driver to push commands through a [`Deployment`] the
//! way a real client would: wrap each send in monitoring events, account for
//! a pooled connection, and decode operation-level errors from the reply.

use crate::cursor::{ChangeStream, Cursor};
use crate::deployment::{Command, Deployment};
use crate::error::{CommandError, Error, Result, WriteError, WriteFailure};
use crate::monitor::{
    CommandEventHandler, CommandFailedEvent, CommandFinishedEvent, CommandOutcome,
    CommandStartedEvent, CommandSucceededEvent, ConnectionCounter, PoolEvent, PoolMonitor,
};
use crate::response::BatchKind;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use chrono::Utc;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Options for building a [`Client`].
#[derive(Clone)]
pub struct ClientOptions {
    pub deployment: Arc<dyn Deployment>,
    pub command_handler: Option<Arc<dyn CommandEventHandler>>,
    /// When unset the client installs its own [`ConnectionCounter`].
    pub pool_monitor: Option<Arc<dyn PoolMonitor>>,
}

impl ClientOptions {
    pub fn new(deployment: Arc<dyn Deployment>) -> Self {
        Self {
            deployment,
            command_handler: None,
            pool_monitor: None,
        }
    }

    pub fn with_command_handler(mut self, handler: Arc<dyn CommandEventHandler>) -> Self {
        self.command_handler = Some(handler);
        self
    }

    pub fn with_pool_monitor(mut self, monitor: Arc<dyn PoolMonitor>) -> Self {
        self.pool_monitor = Some(monitor);
        self
    }
}

struct ClientInner {
    deployment: Arc<dyn Deployment>,
    command_handler: Option<Arc<dyn CommandEventHandler>>,
    pool_monitor: Arc<dyn PoolMonitor>,
    connection_counter: Option<Arc<ConnectionCounter>>,
    next_request_id: AtomicI32,
    next_connection_id: AtomicU32,
}

/// Cheap to clone; clones share the deployment and monitors.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        let (pool_monitor, connection_counter) = match options.pool_monitor {
            Some(monitor) => (monitor, None),
            None => {
                let counter = ConnectionCounter::new();
                (counter.clone() as Arc<dyn PoolMonitor>, Some(counter))
            }
        };

        Self {
            inner: Arc::new(ClientInner {
                deployment: options.deployment,
                command_handler: options.command_handler,
                pool_monitor,
                connection_counter,
                next_request_id: AtomicI32::new(1),
                next_connection_id: AtomicU32::new(1),
            }),
        }
    }

    pub fn database(&self, name: &str) -> Database {
        Database {
            client: self.clone(),
            name: name.to_string(),
        }
    }

    /// Connections currently checked out, if the client installed its own
    /// counter.
    pub fn connections_checked_out(&self) -> Option<i64> {
        self.inner
            .connection_counter
            .as_ref()
            .map(|counter| counter.checked_out())
    }

    /// Send one command and return its reply.
    ///
    /// A reply with `ok: 0` is reported as a failed command and returned as
    /// [`Error::Command`]. Write errors are left in the reply; the
    /// operation that issued the command decides what to make of them.
    pub async fn run_command(&self, database: &str, body: Document) -> Result<Document> {
        let command = Command::new(database, body);
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        let connection_id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst);

        self.pool_event(PoolEvent::ConnectionCheckedOut { connection_id });
        let checkout = Checkout {
            client: self,
            connection_id,
        };

        let started = CommandStartedEvent {
            request_id,
            command_name: command.name.clone(),
            database_name: command.database.clone(),
            command: command.to_wire_document(),
            recorded_at: Utc::now(),
        };
        self.notify("started", |h| h.handle_started(&started));

        let start = Instant::now();
        let result = self
            .inner
            .deployment
            .send_command(&command)
            .await
            .map_err(Error::from)
            .and_then(|reply| match command_error(&reply) {
                Some(err) => Err(Error::Command(err)),
                None => Ok(reply),
            });

        let finished = |outcome: CommandOutcome| CommandFinishedEvent {
            request_id,
            command_name: command.name.clone(),
            database_name: command.database.clone(),
            duration: start.elapsed(),
            outcome,
            recorded_at: Utc::now(),
        };

        match &result {
            Ok(reply) => {
                let event = CommandSucceededEvent {
                    finished: finished(CommandOutcome::Succeeded),
                    reply: reply.clone(),
                };
                self.notify("succeeded", |h| h.handle_succeeded(&event));
                self.notify("finished", |h| h.handle_finished(&event.finished));
            }
            Err(err) => {
                let event = CommandFailedEvent {
                    finished: finished(CommandOutcome::Failed),
                    failure: err.to_string(),
                };
                self.notify("failed", |h| h.handle_failed(&event));
                self.notify("finished", |h| h.handle_finished(&event.finished));
            }
        }

        drop(checkout);

        debug!(
            request_id,
            command = %command.name,
            ok = result.is_ok(),
            "Command completed"
        );
        result
    }

    /// Run an observer callback, dropping it with a warning if it panics.
    fn notify<F>(&self, stage: &'static str, f: F)
    where
        F: FnOnce(&dyn CommandEventHandler),
    {
        let Some(handler) = &self.inner.command_handler else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| f(handler.as_ref()))).is_err() {
            warn!(stage, "Command event handler panicked; event dropped");
        }
    }

    fn pool_event(&self, event: PoolEvent) {
        let monitor = &self.inner.pool_monitor;
        if panic::catch_unwind(AssertUnwindSafe(|| monitor.handle_pool_event(&event))).is_err() {
            warn!(event = ?event, "Pool monitor panicked; event dropped");
        }
    }
}

/// A checked-out connection. Dropping it checks the connection back in, so
/// a command future dropped mid-send still balances the pool events.
struct Checkout<'a> {
    client: &'a Client,
    connection_id: u32,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        self.client.pool_event(PoolEvent::ConnectionCheckedIn {
            connection_id: self.connection_id,
        });
    }
}

/// A handle to one database.
#[derive(Clone)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            client: self.client.clone(),
            database: self.name.clone(),
            name: name.to_string(),
        }
    }

    pub async fn run_command(&self, body: Document) -> Result<Document> {
        self.client.run_command(&self.name, body).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: Bson,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    /// Keyed by position in the input
    pub inserted_ids: HashMap<usize, Bson>,
}

/// A handle to one collection.
#[derive(Clone)]
pub struct Collection {
    client: Client,
    database: String,
    name: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    pub async fn insert_one(&self, document: Document) -> Result<InsertOneResult> {
        let mut result = self.insert_many(vec![document]).await?;
        let inserted_id = result
            .inserted_ids
            .remove(&0)
            .ok_or_else(|| Error::MalformedReply("insert produced no id".to_string()))?;
        Ok(InsertOneResult { inserted_id })
    }

    /// Insert documents in one ordered `insert` command. Documents without
    /// an `_id` get a fresh ObjectId.
    pub async fn insert_many<I>(&self, documents: I) -> Result<InsertManyResult>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut inserted_ids = HashMap::new();
        let mut batch = Vec::new();
        for (i, document) in documents.into_iter().enumerate() {
            let document = with_id(document);
            if let Some(id) = document.get("_id") {
                inserted_ids.insert(i, id.clone());
            }
            batch.push(Bson::Document(document));
        }
        if batch.is_empty() {
            return Err(Error::InvalidArgument(
                "insert requires at least one document".to_string(),
            ));
        }

        let body = doc! {
            "insert": self.name.clone(),
            "documents": batch,
            "ordered": true,
        };
        let reply = self.client.run_command(&self.database, body).await?;

        if let Some(failure) = write_failure(&reply)? {
            return Err(Error::Write(failure));
        }
        Ok(InsertManyResult { inserted_ids })
    }

    /// Run an aggregation and return a cursor over its results.
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Cursor> {
        let stages: Vec<Bson> = pipeline.into_iter().map(Bson::Document).collect();
        let body = doc! {
            "aggregate": self.name.clone(),
            "pipeline": stages,
            "cursor": {},
        };
        let reply = self.client.run_command(&self.database, body).await?;
        Cursor::from_reply(
            self.client.clone(),
            &self.database,
            &self.name,
            &reply,
            BatchKind::FirstBatch,
        )
    }

    /// Open a change stream: an aggregation led by a `$changeStream` stage.
    pub async fn watch(&self, pipeline: Vec<Document>) -> Result<ChangeStream> {
        let mut stages = vec![doc! { "$changeStream": {} }];
        stages.extend(pipeline);
        let cursor = self.aggregate(stages).await?;
        Ok(ChangeStream::new(cursor))
    }
}

fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    let mut with_id = doc! { "_id": ObjectId::new() };
    for (key, value) in document {
        with_id.insert(key, value);
    }
    with_id
}

/// Read an integral field regardless of its numeric BSON type.
pub(crate) fn get_int(document: &Document, key: &str) -> Option<i64> {
    match document.get(key)? {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        Bson::Boolean(v) => Some(i64::from(*v)),
        _ => None,
    }
}

/// Read an `i32` field such as an error code. Missing fields read as 0;
/// values outside the `i32` range saturate rather than wrap.
fn get_code(document: &Document, key: &str) -> i32 {
    get_int(document, key)
        .map(|v| v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
        .unwrap_or(0)
}

fn command_error(reply: &Document) -> Option<CommandError> {
    if get_int(reply, "ok") == Some(1) {
        return None;
    }
    let labels = reply
        .get_array("errorLabels")
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| l.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    Some(CommandError {
        code: get_code(reply, "code"),
        code_name: reply.get_str("codeName").ok().map(String::from),
        message: reply
            .get_str("errmsg")
            .unwrap_or("command failed")
            .to_string(),
        labels,
    })
}

fn write_failure(reply: &Document) -> Result<Option<WriteFailure>> {
    let Ok(entries) = reply.get_array("writeErrors") else {
        return Ok(None);
    };
    let mut errors = Vec::with_capacity(entries.len());
    for entry in entries {
        let entry = entry.as_document().ok_or_else(|| {
            Error::MalformedReply("writeErrors entry is not a document".to_string())
        })?;
        errors.push(WriteError {
            index: get_code(entry, "index"),
            code: get_code(entry, "code"),
            message: entry.get_str("errmsg").unwrap_or_default().to_string(),
        });
    }
    if errors.is_empty() {
        return Ok(None);
    }
    Ok(Some(WriteFailure { errors }))
}
