//! Configuration for mock deployment scenarios.
//!
//! A scenario file lists the replies to queue, the operations to drive
//! through the client, and a few logging switches.

use crate::response::{BatchKind, QueuedResponse, WriteErrorReply};
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Main configuration for a scenario run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockDeploymentConfig {
    /// Replies to queue, served in order
    #[serde(default)]
    pub responses: Vec<ResponseDefinition>,

    /// Operations to run against the deployment
    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

impl MockDeploymentConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, response) in self.responses.iter().enumerate() {
            response
                .validate()
                .map_err(|e| anyhow::anyhow!("Response {}: {}", i, e))?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|e| anyhow::anyhow!("Step {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// A reply to queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseDefinition {
    /// `{ok: 1}` plus extra fields
    Success {
        #[serde(default)]
        fields: Option<Value>,
    },
    /// Transport success carrying write errors
    WriteError { errors: Vec<WriteErrorDefinition> },
    /// `{ok: 0}` with an error code
    CommandError {
        code: i32,
        message: String,
        #[serde(default)]
        code_name: Option<String>,
        #[serde(default)]
        labels: Vec<String>,
    },
    /// Cursor reply
    Cursor {
        #[serde(default)]
        id: i64,
        ns: String,
        #[serde(default)]
        batch: BatchDefinition,
        #[serde(default)]
        documents: Vec<Value>,
        #[serde(default)]
        post_batch_resume_token: Option<Value>,
    },
    /// Verbatim reply document
    Raw { document: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteErrorDefinition {
    pub message: String,
    pub code: i32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchDefinition {
    #[default]
    First,
    Next,
}

impl From<BatchDefinition> for BatchKind {
    fn from(batch: BatchDefinition) -> Self {
        match batch {
            BatchDefinition::First => BatchKind::FirstBatch,
            BatchDefinition::Next => BatchKind::NextBatch,
        }
    }
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            ResponseDefinition::Success { fields } => {
                if let Some(fields) = fields {
                    json_to_document(fields)?;
                }
            }
            ResponseDefinition::WriteError { errors } => {
                if errors.is_empty() {
                    anyhow::bail!("write_error needs at least one error");
                }
            }
            ResponseDefinition::CommandError { message, .. } => {
                if message.is_empty() {
                    anyhow::bail!("command_error message cannot be empty");
                }
            }
            ResponseDefinition::Cursor {
                ns,
                documents,
                post_batch_resume_token,
                ..
            } => {
                validate_namespace(ns)?;
                for doc in documents {
                    json_to_document(doc)?;
                }
                if let Some(token) = post_batch_resume_token {
                    json_to_document(token)?;
                }
            }
            ResponseDefinition::Raw { document } => {
                json_to_document(document)?;
            }
        }
        Ok(())
    }

    /// Build the queued reply this definition describes.
    pub fn to_queued(&self) -> anyhow::Result<QueuedResponse> {
        let response = match self {
            ResponseDefinition::Success { fields } => QueuedResponse::Success(match fields {
                Some(fields) => json_to_document(fields)?,
                None => Document::new(),
            }),
            ResponseDefinition::WriteError { errors } => QueuedResponse::WriteErrors(
                errors
                    .iter()
                    .map(|e| WriteErrorReply::new(e.message.clone(), e.code))
                    .collect(),
            ),
            ResponseDefinition::CommandError {
                code,
                message,
                code_name,
                labels,
            } => QueuedResponse::CommandError {
                code: *code,
                message: message.clone(),
                code_name: code_name.clone(),
                labels: labels.clone(),
            },
            ResponseDefinition::Cursor {
                id,
                ns,
                batch,
                documents,
                post_batch_resume_token,
            } => QueuedResponse::CursorBatch {
                id: *id,
                ns: ns.clone(),
                kind: (*batch).into(),
                documents: documents
                    .iter()
                    .map(json_to_document)
                    .collect::<anyhow::Result<_>>()?,
                post_batch_resume_token: post_batch_resume_token
                    .as_ref()
                    .map(json_to_document)
                    .transpose()?,
            },
            ResponseDefinition::Raw { document } => {
                QueuedResponse::Raw(json_to_document(document)?)
            }
        };
        Ok(response)
    }
}

/// An operation to run through the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDefinition {
    InsertOne {
        database: String,
        collection: String,
        document: Value,
    },
    InsertMany {
        database: String,
        collection: String,
        documents: Vec<Value>,
    },
    Aggregate {
        database: String,
        collection: String,
        #[serde(default)]
        pipeline: Vec<Value>,
        /// How many documents to read from the cursor
        #[serde(default = "default_reads")]
        reads: usize,
    },
    Watch {
        database: String,
        collection: String,
        #[serde(default)]
        pipeline: Vec<Value>,
        /// How many changes to read from the stream
        #[serde(default = "default_reads")]
        reads: usize,
    },
    RunCommand { database: String, command: Value },
}

fn default_reads() -> usize {
    1
}

impl StepDefinition {
    /// Short label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            StepDefinition::InsertOne { .. } => "insert_one",
            StepDefinition::InsertMany { .. } => "insert_many",
            StepDefinition::Aggregate { .. } => "aggregate",
            StepDefinition::Watch { .. } => "watch",
            StepDefinition::RunCommand { .. } => "run_command",
        }
    }

    /// Validate the step definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            StepDefinition::InsertOne {
                database,
                collection,
                document,
            } => {
                validate_target(database, Some(collection))?;
                json_to_document(document)?;
            }
            StepDefinition::InsertMany {
                database,
                collection,
                documents,
            } => {
                validate_target(database, Some(collection))?;
                if documents.is_empty() {
                    anyhow::bail!("insert_many needs at least one document");
                }
                for doc in documents {
                    json_to_document(doc)?;
                }
            }
            StepDefinition::Aggregate {
                database,
                collection,
                pipeline,
                ..
            }
            | StepDefinition::Watch {
                database,
                collection,
                pipeline,
                ..
            } => {
                validate_target(database, Some(collection))?;
                for stage in pipeline {
                    json_to_document(stage)?;
                }
            }
            StepDefinition::RunCommand { database, command } => {
                validate_target(database, None)?;
                if json_to_document(command)?.is_empty() {
                    anyhow::bail!("run_command needs a non-empty command");
                }
            }
        }
        Ok(())
    }
}

fn validate_target(database: &str, collection: Option<&str>) -> anyhow::Result<()> {
    if database.is_empty() {
        anyhow::bail!("database cannot be empty");
    }
    if collection.is_some_and(str::is_empty) {
        anyhow::bail!("collection cannot be empty");
    }
    Ok(())
}

fn validate_namespace(ns: &str) -> anyhow::Result<()> {
    match ns.split_once('.') {
        Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(()),
        _ => anyhow::bail!("Invalid namespace '{}': expected <database>.<collection>", ns),
    }
}

/// Convert a JSON object to a BSON document. Extended JSON (`$oid`,
/// `$numberLong`, `$date`, ...) is honoured; plain integers become Int32 when
/// they fit, Int64 otherwise.
pub fn json_to_document(value: &Value) -> anyhow::Result<Document> {
    match Bson::try_from(value.clone())? {
        Bson::Document(doc) => Ok(doc),
        _ => anyhow::bail!("Expected a document, got {}", value),
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Log every command the deployment receives
    #[serde(default = "default_true")]
    pub log_commands: bool,

    /// Include recorded events in the scenario report
    #[serde(default = "default_true")]
    pub report_events: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_commands: true,
            report_events: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_queued_responses() {
        let yaml = r#"
responses:
  - type: success
  - type: write_error
    errors:
      - message: "Not transaction numbers"
        code: 20
  - type: cursor
    id: 1
    ns: test.test_col
    documents:
      - _id:
          first: "resume token"
"#;
        let config = MockDeploymentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.responses.len(), 3);

        let queued: Vec<QueuedResponse> = config
            .responses
            .iter()
            .map(|r| r.to_queued().unwrap())
            .collect();
        assert_eq!(queued[0], crate::response::success());
        assert_eq!(
            queued[1],
            crate::response::write_error("Not transaction numbers", 20)
        );
        match &queued[2] {
            QueuedResponse::CursorBatch {
                id, kind, documents, ..
            } => {
                assert_eq!(*id, 1);
                assert_eq!(*kind, BatchKind::FirstBatch);
                let token = documents[0].get_document("_id").unwrap();
                assert_eq!(token.get_str("first").unwrap(), "resume token");
            }
            other => panic!("Expected cursor, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_steps() {
        let yaml = r#"
steps:
  - type: insert_many
    database: test
    collection: test_col
    documents:
      - _id: "1"
      - _id: "2"
  - type: watch
    database: test
    collection: test_col
  - type: run_command
    database: admin
    command:
      ping: 1
"#;
        let config = MockDeploymentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[1].kind(), "watch");
        match &config.steps[1] {
            StepDefinition::Watch { reads, pipeline, .. } => {
                assert_eq!(*reads, 1);
                assert!(pipeline.is_empty());
            }
            _ => panic!("Expected watch step"),
        }
        assert!(config.settings.log_commands);
    }

    #[test]
    fn test_rejects_bad_namespace() {
        let yaml = r#"
responses:
  - type: cursor
    ns: nodot
"#;
        let err = MockDeploymentConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Response 0"));
    }

    #[test]
    fn test_rejects_empty_write_errors() {
        let yaml = r#"
responses:
  - type: write_error
    errors: []
"#;
        assert!(MockDeploymentConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let yaml = r#"
responses: []
stubs: []
"#;
        assert!(MockDeploymentConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_json_numbers_prefer_int32() {
        let doc = json_to_document(&serde_json::json!({
            "small": 5,
            "big": 5_000_000_000_i64,
            "float": 1.5,
        }))
        .unwrap();
        assert_eq!(doc.get_i32("small").unwrap(), 5);
        assert_eq!(doc.get_i64("big").unwrap(), 5_000_000_000);
        assert_eq!(doc.get_f64("float").unwrap(), 1.5);

        assert!(json_to_document(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_extended_json_values() {
        let doc = json_to_document(&serde_json::json!({
            "_id": { "$oid": "507f1f77bcf86cd799439011" },
            "n": { "$numberLong": "5" },
        }))
        .unwrap();
        assert_eq!(
            doc.get_object_id("_id").unwrap().to_hex(),
            "507f1f77bcf86cd799439011"
        );
        assert_eq!(doc.get_i64("n").unwrap(), 5);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "responses:\n  - type: command_error\n    code: 13\n    message: unauthorized"
        )
        .unwrap();

        let config = MockDeploymentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.responses.len(), 1);
        assert_eq!(config.responses[0].to_queued().unwrap().kind(), "command_error");
    }

    #[test]
    fn test_bundled_default_scenario_is_valid() {
        let config =
            MockDeploymentConfig::from_yaml(include_str!("../demos/default-scenario.yaml"))
                .unwrap();
        assert!(!config.responses.is_empty());
        assert!(!config.steps.is_empty());
    }
}
