//! Cursors over batched results.

use crate::client::{get_int, Client};
use crate::error::{Error, Result};
use crate::response::BatchKind;
use bson::{doc, Document};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

/// A server-side result set, read one batch at a time.
///
/// Documents are served from the current batch; once it is empty and the
/// cursor id is non-zero, a `getMore` fetches the next batch. Each
/// `getMore` consumes one queued reply on a mock deployment.
pub struct Cursor {
    client: Client,
    database: String,
    collection: String,
    id: i64,
    buffer: VecDeque<Document>,
    post_batch_resume_token: Option<Document>,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("id", &self.id)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl Cursor {
    pub(crate) fn from_reply(
        client: Client,
        database: &str,
        collection: &str,
        reply: &Document,
        kind: BatchKind,
    ) -> Result<Self> {
        let mut cursor = Self {
            client,
            database: database.to_string(),
            collection: collection.to_string(),
            id: 0,
            buffer: VecDeque::new(),
            post_batch_resume_token: None,
        };
        cursor.absorb(reply, kind)?;
        Ok(cursor)
    }

    /// Zero once the server has no more batches.
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Documents left in the current batch.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.id == 0 && self.buffer.is_empty()
    }

    pub fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    /// The next document, fetching one more batch if needed.
    ///
    /// Returns `Ok(None)` when the cursor is exhausted or the fetched batch
    /// came back empty, as a tailable cursor's would.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        if let Some(document) = self.buffer.pop_front() {
            return Ok(Some(document));
        }
        if self.id == 0 {
            return Ok(None);
        }
        self.get_more().await?;
        Ok(self.buffer.pop_front())
    }

    /// Read until `next` yields nothing.
    pub async fn drain(&mut self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(document) = self.next().await? {
            documents.push(document);
        }
        Ok(documents)
    }

    async fn get_more(&mut self) -> Result<()> {
        let body = doc! {
            "getMore": self.id,
            "collection": self.collection.clone(),
        };
        let reply = self.client.run_command(&self.database, body).await?;
        self.absorb(&reply, BatchKind::NextBatch)
    }

    fn absorb(&mut self, reply: &Document, kind: BatchKind) -> Result<()> {
        let cursor = reply
            .get_document("cursor")
            .map_err(|_| Error::MalformedReply("reply has no cursor document".to_string()))?;
        let id = get_int(cursor, "id")
            .ok_or_else(|| Error::MalformedReply("cursor has no id".to_string()))?;
        let batch = cursor.get_array(kind.field_name()).map_err(|_| {
            Error::MalformedReply(format!("cursor has no {}", kind.field_name()))
        })?;

        if let Some((_, coll)) = cursor.get_str("ns").ok().and_then(|ns| ns.split_once('.')) {
            self.collection = coll.to_string();
        }

        let mut documents = VecDeque::with_capacity(batch.len());
        for entry in batch {
            let document = entry.as_document().ok_or_else(|| {
                Error::MalformedReply("batch entry is not a document".to_string())
            })?;
            documents.push_back(document.clone());
        }

        debug!(
            cursor_id = id,
            batch = kind.field_name(),
            documents = documents.len(),
            "Cursor batch received"
        );

        self.id = id;
        self.buffer = documents;
        self.post_batch_resume_token = cursor.get_document("postBatchResumeToken").ok().cloned();
        Ok(())
    }
}

/// A change stream: a cursor that remembers where to resume from.
#[derive(Debug)]
pub struct ChangeStream {
    cursor: Cursor,
    resume_token: Option<Document>,
}

impl ChangeStream {
    pub(crate) fn new(cursor: Cursor) -> Self {
        let resume_token = cursor.post_batch_resume_token().cloned();
        Self {
            cursor,
            resume_token,
        }
    }

    /// The next change, if one is available.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        let change = self.cursor.next().await?;
        if let Some(token) = change.as_ref().and_then(|c| c.get_document("_id").ok()) {
            self.resume_token = Some(token.clone());
        }
        if self.cursor.buffered() == 0 {
            if let Some(token) = self.cursor.post_batch_resume_token() {
                self.resume_token = Some(token.clone());
            }
        }
        Ok(change)
    }

    /// Token identifying the last change observed.
    pub fn resume_token(&self) -> Option<&Document> {
        self.resume_token.as_ref()
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{Client, ClientOptions};
    use crate::deployment::MockDeployment;
    use crate::recorder::EventRecorder;
    use crate::response::{cursor, success, BatchKind, QueuedResponse};
    use bson::doc;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn harness() -> (Arc<MockDeployment>, Arc<EventRecorder>, Client) {
        let deployment = Arc::new(MockDeployment::new());
        let recorder = EventRecorder::new();
        let client = Client::new(
            ClientOptions::new(deployment.clone()).with_command_handler(recorder.clone()),
        );
        (deployment, recorder, client)
    }

    #[tokio::test]
    async fn test_get_more_consumes_next_queued_batch() {
        let (deployment, recorder, client) = harness();
        deployment.add_responses(vec![
            cursor(
                5,
                "test.items",
                BatchKind::FirstBatch,
                vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
            ),
            cursor(0, "test.items", BatchKind::NextBatch, vec![doc! { "_id": 3 }]),
        ]);

        let coll = client.database("test").collection("items");
        let mut results = assert_ok!(coll.aggregate(vec![doc! { "$match": {} }]).await);
        assert_eq!(results.id(), 5);
        let debug = format!("{:?}", results);
        assert!(debug.contains("\"items\"") && debug.contains("buffered: 2"));

        let documents = assert_ok!(results.drain().await);
        let ids: Vec<i32> = documents
            .iter()
            .map(|d| d.get_i32("_id").unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(results.is_exhausted());

        let names: Vec<String> = recorder
            .started()
            .into_iter()
            .map(|e| e.command_name)
            .collect();
        assert_eq!(names, vec!["aggregate", "getMore"]);
        assert_eq!(recorder.succeeded().len(), 2);
        assert_eq!(recorder.finished().len(), 2);

        let get_more = &recorder.started_named("getMore")[0].command;
        assert_eq!(get_more.get_i64("getMore").unwrap(), 5);
        assert_eq!(get_more.get_str("collection").unwrap(), "items");
    }

    #[tokio::test]
    async fn test_get_more_without_queued_batch_fails() {
        let (deployment, recorder, client) = harness();
        deployment.add_response(cursor(
            7,
            "test.items",
            BatchKind::FirstBatch,
            vec![doc! { "_id": 1 }],
        ));

        let coll = client.database("test").collection("items");
        let mut results = assert_ok!(coll.aggregate(Vec::new()).await);
        assert!(assert_ok!(results.next().await).is_some());

        let err = assert_err!(results.next().await);
        assert!(err.is_exhausted());
        assert_eq!(recorder.failed().len(), 1);
    }

    #[tokio::test]
    async fn test_non_cursor_reply_is_malformed() {
        let (deployment, _recorder, client) = harness();
        deployment.add_response(success());

        let coll = client.database("test").collection("items");
        let err = assert_err!(coll.aggregate(Vec::new()).await);
        assert!(matches!(err, crate::error::Error::MalformedReply(_)));
        assert!(format!("{:?}", err).contains("cursor"));
    }

    #[tokio::test]
    async fn test_change_stream_tracks_post_batch_token() {
        let (deployment, _recorder, client) = harness();
        deployment.add_responses(vec![
            cursor(
                11,
                "test.events",
                BatchKind::FirstBatch,
                vec![doc! { "_id": { "seq": 1 } }],
            ),
            QueuedResponse::CursorBatch {
                id: 11,
                ns: "test.events".to_string(),
                kind: BatchKind::NextBatch,
                documents: Vec::new(),
                post_batch_resume_token: Some(doc! { "seq": 2 }),
            },
        ]);

        let coll = client.database("test").collection("events");
        let mut stream = assert_ok!(coll.watch(Vec::new()).await);

        assert!(assert_ok!(stream.next().await).is_some());
        assert_eq!(stream.resume_token(), Some(&doc! { "seq": 1 }));

        // Empty tailable batch: nothing yet, but the token advances.
        assert!(assert_ok!(stream.next().await).is_none());
        assert_eq!(stream.resume_token(), Some(&doc! { "seq": 2 }));
        assert_eq!(stream.cursor().id(), 11);
    }
}
