//! Mock Deployment
//!
//! A stand-in for a document-database deployment that answers every command
//! from a FIFO queue of pre-programmed replies, plus a recorder that captures
//! each command's started/succeeded/failed/finished events.
//!
//! # Features
//!
//! - **Queued Replies**: The Nth command receives the Nth queued reply
//! - **Reply Builders**: Success, write-error, command-error and cursor batches
//! - **Cursors**: `getMore` batches are served from the same queue
//! - **Event Capture**: Ordered, per-kind histories of command events
//! - **Scenarios**: Drive a YAML-described run and report the outcome
//!
//! # Example
//!
//! ```no_run
//! use mock_deployment::{response, Client, ClientOptions, EventRecorder, MockDeployment};
//! use bson::doc;
//! use std::sync::Arc;
//!
//! # async fn demo() -> mock_deployment::Result<()> {
//! let deployment = Arc::new(MockDeployment::new());
//! let recorder = EventRecorder::new();
//! let client = Client::new(
//!     ClientOptions::new(deployment.clone()).with_command_handler(recorder.clone()),
//! );
//!
//! deployment.add_responses(vec![
//!     response::success(),
//!     response::write_error("Not transaction numbers", 20),
//! ]);
//!
//! let coll = client.database("test").collection("test_col");
//! coll.insert_one(doc! { "_id": 1 }).await?;
//! assert!(coll.insert_one(doc! { "_id": 2 }).await.is_err());
//! assert_eq!(recorder.succeeded().len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod cursor;
pub mod deployment;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod recorder;
pub mod response;
pub mod scenario;

pub use client::{Client, ClientOptions, Collection, Database};
pub use config::MockDeploymentConfig;
pub use cursor::{ChangeStream, Cursor};
pub use deployment::{Command, Deployment, MockDeployment};
pub use error::{DeploymentError, Error, Result};
pub use monitor::CommandEventHandler;
pub use queue::ResponseQueue;
pub use recorder::EventRecorder;
pub use response::QueuedResponse;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a holder panicked. Every guarded
/// value here is append-only or a plain queue, so it stays consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
