//! Runs a configured scenario against a fresh mock deployment.

use crate::client::{Client, ClientOptions};
use crate::config::{json_to_document, MockDeploymentConfig, StepDefinition};
use crate::deployment::MockDeployment;
use crate::error::{Error, Result};
use crate::recorder::{EventHistory, EventRecorder};
use bson::{Bson, Document};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to one step.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok { detail: Value },
    Error { message: String, codes: Vec<i32> },
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub step: &'static str,
    pub outcome: StepOutcome,
}

/// Result of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub steps: Vec<StepReport>,
    pub commands_received: u64,
    pub responses_remaining: usize,
    /// Documents carried by every `insert` command that was started
    pub documents_inserted: usize,
    pub connections_checked_out: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<EventHistory>,
}

/// Queue the configured replies, run every step in order, and report.
///
/// A failing step does not stop the run; its error is recorded and the
/// next step proceeds.
pub async fn run_scenario(config: &MockDeploymentConfig) -> anyhow::Result<ScenarioReport> {
    let deployment = Arc::new(MockDeployment::from_config(config)?);
    let recorder = EventRecorder::new();
    let client = Client::new(
        ClientOptions::new(deployment.clone()).with_command_handler(recorder.clone()),
    );

    let mut steps = Vec::with_capacity(config.steps.len());
    for (index, step) in config.steps.iter().enumerate() {
        let outcome = match run_step(&client, step).await {
            Ok(detail) => StepOutcome::Ok { detail },
            Err(err) => {
                warn!(index, step = step.kind(), error = %err, "Step failed");
                StepOutcome::Error {
                    codes: err.codes(),
                    message: err.to_string(),
                }
            }
        };
        steps.push(StepReport {
            index,
            step: step.kind(),
            outcome,
        });
    }

    let report = ScenarioReport {
        steps,
        commands_received: deployment.commands_received(),
        responses_remaining: deployment.responses_remaining(),
        documents_inserted: documents_inserted(&recorder),
        connections_checked_out: client.connections_checked_out(),
        events: config.settings.report_events.then(|| recorder.snapshot()),
    };

    info!(
        steps = report.steps.len(),
        failed = report.steps.iter().filter(|s| !s.outcome.is_ok()).count(),
        commands = report.commands_received,
        "Scenario complete"
    );
    Ok(report)
}

/// Total documents across all started `insert` commands.
pub fn documents_inserted(recorder: &EventRecorder) -> usize {
    recorder
        .started_named("insert")
        .iter()
        .filter_map(|e| e.command.get_array("documents").ok())
        .map(|docs| docs.len())
        .sum()
}

async fn run_step(client: &Client, step: &StepDefinition) -> Result<Value> {
    match step {
        StepDefinition::InsertOne {
            database,
            collection,
            document,
        } => {
            let result = client
                .database(database)
                .collection(collection)
                .insert_one(to_document(document)?)
                .await?;
            Ok(json!({ "inserted_id": result.inserted_id.into_relaxed_extjson() }))
        }
        StepDefinition::InsertMany {
            database,
            collection,
            documents,
        } => {
            let documents = documents
                .iter()
                .map(to_document)
                .collect::<Result<Vec<_>>>()?;
            let result = client
                .database(database)
                .collection(collection)
                .insert_many(documents)
                .await?;
            Ok(json!({ "inserted": result.inserted_ids.len() }))
        }
        StepDefinition::Aggregate {
            database,
            collection,
            pipeline,
            reads,
        } => {
            let pipeline = pipeline
                .iter()
                .map(to_document)
                .collect::<Result<Vec<_>>>()?;
            let mut cursor = client
                .database(database)
                .collection(collection)
                .aggregate(pipeline)
                .await?;
            let mut documents = Vec::new();
            while documents.len() < *reads {
                match cursor.next().await? {
                    Some(document) => documents.push(document),
                    None => break,
                }
            }
            Ok(json!({ "documents": to_json(documents) }))
        }
        StepDefinition::Watch {
            database,
            collection,
            pipeline,
            reads,
        } => {
            let pipeline = pipeline
                .iter()
                .map(to_document)
                .collect::<Result<Vec<_>>>()?;
            let mut stream = client
                .database(database)
                .collection(collection)
                .watch(pipeline)
                .await?;
            let mut changes = Vec::new();
            while changes.len() < *reads {
                match stream.next().await? {
                    Some(change) => changes.push(change),
                    None => break,
                }
            }
            let resume_token = stream
                .resume_token()
                .map(|t| Bson::Document(t.clone()).into_relaxed_extjson());
            Ok(json!({ "changes": to_json(changes), "resume_token": resume_token }))
        }
        StepDefinition::RunCommand { database, command } => {
            let reply = client.run_command(database, to_document(command)?).await?;
            Ok(Bson::Document(reply).into_relaxed_extjson())
        }
    }
}

fn to_document(value: &Value) -> Result<Document> {
    json_to_document(value).map_err(|e| Error::InvalidArgument(e.to_string()))
}

fn to_json(documents: Vec<Document>) -> Value {
    Value::Array(
        documents
            .into_iter()
            .map(|d| Bson::Document(d).into_relaxed_extjson())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(yaml: &str) -> ScenarioReport {
        let config = MockDeploymentConfig::from_yaml(yaml).unwrap();
        tokio_test::block_on(run_scenario(&config)).unwrap()
    }

    #[test]
    fn test_insert_many_scenario() {
        let report = run(r#"
responses:
  - type: success
  - type: success
steps:
  - type: insert_many
    database: test
    collection: test_col
    documents: [{ _id: "1" }, { _id: "2" }]
  - type: insert_many
    database: test
    collection: test_col
    documents: [{ _id: "3" }, { _id: "4" }]
"#);
        assert!(report.steps.iter().all(|s| s.outcome.is_ok()));
        assert_eq!(report.documents_inserted, 4);
        assert_eq!(report.commands_received, 2);
        assert_eq!(report.responses_remaining, 0);
        assert_eq!(report.connections_checked_out, Some(0));
    }

    #[test]
    fn test_write_error_scenario() {
        let report = run(r#"
responses:
  - type: success
  - type: write_error
    errors:
      - message: "Not transaction numbers"
        code: 20
steps:
  - type: insert_one
    database: test
    collection: test_col
    document: { _id: 1 }
  - type: insert_one
    database: test
    collection: test_col
    document: { _id: 2 }
"#);
        assert!(report.steps[0].outcome.is_ok());
        match &report.steps[1].outcome {
            StepOutcome::Error { codes, message } => {
                assert_eq!(codes, &vec![20]);
                assert!(message.contains("Not transaction numbers"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        let events = report.events.expect("events reported");
        assert_eq!(events.succeeded.len(), 2);
        assert!(events.failed.is_empty());
    }

    #[test]
    fn test_watch_scenario() {
        let report = run(r#"
responses:
  - type: cursor
    id: 1
    ns: test.test_col
    documents:
      - _id: { first: "resume token" }
steps:
  - type: watch
    database: test
    collection: test_col
settings:
  report_events: false
"#);
        match &report.steps[0].outcome {
            StepOutcome::Ok { detail } => {
                assert_eq!(detail["changes"][0]["_id"]["first"], "resume token");
                assert_eq!(detail["resume_token"]["first"], "resume token");
            }
            other => panic!("expected ok, got {:?}", other),
        }
        assert!(report.events.is_none());
    }

    #[test]
    fn test_exhaustion_recorded_per_step() {
        let report = run(r#"
responses:
  - type: success
steps:
  - type: run_command
    database: admin
    command: { ping: 1 }
  - type: run_command
    database: admin
    command: { ping: 1 }
"#);
        assert!(report.steps[0].outcome.is_ok());
        match &report.steps[1].outcome {
            StepOutcome::Error { message, codes } => {
                assert!(message.contains("exhausted"));
                assert!(codes.is_empty());
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(report.commands_received, 2);
    }
}
