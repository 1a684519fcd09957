//! FIFO buffer of queued replies.

use crate::response::QueuedResponse;
use std::collections::VecDeque;

/// Ordered replies waiting to be served. Appended at the tail by the test
/// author, consumed from the head by the deployment.
#[derive(Debug, Default, Clone)]
pub struct ResponseQueue {
    responses: VecDeque<QueuedResponse>,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one reply.
    pub fn push(&mut self, response: QueuedResponse) {
        self.responses.push_back(response);
    }

    /// Append replies in iteration order.
    pub fn extend<I>(&mut self, responses: I)
    where
        I: IntoIterator<Item = QueuedResponse>,
    {
        self.responses.extend(responses);
    }

    /// Remove and return the oldest reply.
    pub fn pop(&mut self) -> Option<QueuedResponse> {
        self.responses.pop_front()
    }

    /// The reply the next pop would return.
    pub fn peek(&self) -> Option<&QueuedResponse> {
        self.responses.front()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }
}

impl FromIterator<QueuedResponse> for ResponseQueue {
    fn from_iter<I: IntoIterator<Item = QueuedResponse>>(iter: I) -> Self {
        Self {
            responses: iter.into_iter().collect(),
        }
    }
}
