//! Pre-programmed replies and the builders that shape them.
//!
//! Every variant renders to the document a real server would send for the
//! equivalent outcome. The deployment never inspects these documents; it
//! only hands them back in queue order.

use bson::{doc, Bson, Document};

/// Which batch field a cursor reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Reply to the command that opens the cursor
    FirstBatch,
    /// Reply to a `getMore`
    NextBatch,
}

impl BatchKind {
    pub fn field_name(self) -> &'static str {
        match self {
            BatchKind::FirstBatch => "firstBatch",
            BatchKind::NextBatch => "nextBatch",
        }
    }
}

/// One write error entry to embed in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteErrorReply {
    pub message: String,
    pub code: i32,
}

impl WriteErrorReply {
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

/// A reply waiting in the response queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedResponse {
    /// `{ok: 1}` plus any acknowledgement fields.
    Success(Document),
    /// `{ok: 1, writeErrors: [...]}`: a transport-level success carrying
    /// per-document failures.
    WriteErrors(Vec<WriteErrorReply>),
    /// `{ok: 0, code, errmsg}`: the server rejected the command.
    CommandError {
        code: i32,
        message: String,
        code_name: Option<String>,
        labels: Vec<String>,
    },
    /// A cursor reply with a first or next batch.
    CursorBatch {
        id: i64,
        ns: String,
        kind: BatchKind,
        documents: Vec<Document>,
        post_batch_resume_token: Option<Document>,
    },
    /// Returned exactly as given.
    Raw(Document),
}

impl QueuedResponse {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            QueuedResponse::Success(_) => "success",
            QueuedResponse::WriteErrors(_) => "write_error",
            QueuedResponse::CommandError { .. } => "command_error",
            QueuedResponse::CursorBatch { .. } => "cursor",
            QueuedResponse::Raw(_) => "raw",
        }
    }

    /// Render the reply document.
    pub fn to_document(&self) -> Document {
        match self {
            QueuedResponse::Success(extra) => {
                let mut reply = doc! { "ok": 1 };
                for (key, value) in extra {
                    reply.insert(key.clone(), value.clone());
                }
                reply
            }
            QueuedResponse::WriteErrors(errors) => {
                let entries: Vec<Bson> = errors
                    .iter()
                    .enumerate()
                    .map(|(index, err)| {
                        let index = index as i32;
                        Bson::Document(doc! {
                            "index": index,
                            "code": err.code,
                            "errmsg": err.message.clone(),
                        })
                    })
                    .collect();
                doc! { "ok": 1, "n": 0, "writeErrors": entries }
            }
            QueuedResponse::CommandError {
                code,
                message,
                code_name,
                labels,
            } => {
                let code = *code;
                let mut reply = doc! { "ok": 0, "code": code, "errmsg": message.clone() };
                if let Some(name) = code_name {
                    reply.insert("codeName", name.clone());
                }
                if !labels.is_empty() {
                    reply.insert("errorLabels", labels.clone());
                }
                reply
            }
            QueuedResponse::CursorBatch {
                id,
                ns,
                kind,
                documents,
                post_batch_resume_token,
            } => {
                let batch: Vec<Bson> = documents.iter().cloned().map(Bson::Document).collect();
                let id = *id;
                let mut cursor = doc! { "id": id, "ns": ns.clone() };
                cursor.insert(kind.field_name(), batch);
                if let Some(token) = post_batch_resume_token {
                    cursor.insert("postBatchResumeToken", token.clone());
                }
                doc! { "ok": 1, "cursor": cursor }
            }
            QueuedResponse::Raw(reply) => reply.clone(),
        }
    }
}

/// A plain acknowledgement.
pub fn success() -> QueuedResponse {
    QueuedResponse::Success(Document::new())
}

/// An acknowledgement carrying extra fields such as `n`.
pub fn success_with(fields: Document) -> QueuedResponse {
    QueuedResponse::Success(fields)
}

/// A reply with a single write error.
pub fn write_error(message: impl Into<String>, code: i32) -> QueuedResponse {
    QueuedResponse::WriteErrors(vec![WriteErrorReply::new(message, code)])
}

/// A reply with one write error per entry.
pub fn write_errors<I>(errors: I) -> QueuedResponse
where
    I: IntoIterator<Item = WriteErrorReply>,
{
    QueuedResponse::WriteErrors(errors.into_iter().collect())
}

/// A command-level failure.
pub fn command_error(code: i32, message: impl Into<String>) -> QueuedResponse {
    QueuedResponse::CommandError {
        code,
        message: message.into(),
        code_name: None,
        labels: Vec::new(),
    }
}

/// A cursor reply. An `id` of 0 marks the cursor as exhausted.
pub fn cursor(
    id: i64,
    ns: impl Into<String>,
    kind: BatchKind,
    documents: Vec<Document>,
) -> QueuedResponse {
    QueuedResponse::CursorBatch {
        id,
        ns: ns.into(),
        kind,
        documents,
        post_batch_resume_token: None,
    }
}
