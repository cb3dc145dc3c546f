//! Cross-instance message streams.
//!
//! A [`MessageStream`] lets service instances sharing a backend post short
//! notifications to each other and read them back in batches. kumo only
//! defines the contract; ordering, acknowledgement and consumer-group
//! behaviour belong to the backend.
//!
//! Two backends ship with the crate:
//! - [`MemoryStream`]: in-process queue, for tests and single-instance setups
//! - [`redis::RedisStream`]: a Redis stream read through a consumer group

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};

pub mod redis;

/// Most messages a single [`MessageStream::read_message_stream`] call may
/// return. Backends must honor it whatever their backlog.
pub const MAX_BATCH: usize = 500;

/// One message read from a stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub payload: String,
    /// Backend-assigned identifier, e.g. a Redis stream entry id.
    pub message_id: String,
}

/// A backend carrying messages between service instances.
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Posts `payload` on behalf of `service_id`.
    ///
    /// Failures are [`Error::StreamWrite`]; nothing is retried.
    async fn post_message(&self, service_id: &str, payload: &str) -> Result<()>;

    /// Reads the next batch, at most [`MAX_BATCH`] messages, in backend order.
    ///
    /// Failures are [`Error::StreamRead`]; nothing is retried.
    async fn read_message_stream(&self) -> Result<Vec<Message>>;
}

/// An in-process [`MessageStream`].
///
/// Every message is delivered to exactly one reader, in posting order.
/// Ids count up from `1-0`, shaped like Redis entry ids.
#[derive(Debug, Default)]
pub struct MemoryStream {
    queue: Mutex<VecDeque<Message>>,
    next_id: AtomicU64,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages posted but not yet read.
    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn post_message(&self, _service_id: &str, payload: &str) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| Error::StreamWrite("memory stream lock poisoned".into()))?;
        queue.push_back(Message { payload: payload.to_owned(), message_id: format!("{id}-0") });
        Ok(())
    }

    async fn read_message_stream(&self) -> Result<Vec<Message>> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| Error::StreamRead("memory stream lock poisoned".into()))?;
        let n = queue.len().min(MAX_BATCH);
        Ok(queue.drain(..n).collect())
    }
}
