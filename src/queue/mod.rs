//! Job queue
//!
//! At-least-once message queue with long-poll receive and explicit
//! acknowledgment by deleting a received message:
//! - `redis_queue` - reliable-list queue on a Redis server
//! - `memory` - in-process queue for local runs and tests
//! - `workers` - the background loop that drains the queue

pub mod memory;
pub mod redis_queue;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;

pub use memory::InMemoryQueue;
pub use redis_queue::RedisQueue;
pub use workers::{MessageOutcome, Worker, WorkerSettings};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed queue envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("unknown or expired receipt handle: {0}")]
    UnknownReceipt(String),

    #[error("unsupported queue url: {0}")]
    UnsupportedUrl(String),

    #[error("queue backend error: {0}")]
    Backend(String),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    /// Identifies this delivery; a redelivery gets a new handle.
    pub receipt_handle: String,
}

/// Stored form of a message inside a queue backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct Envelope {
    pub message_id: String,
    pub body: String,
}

impl Envelope {
    pub fn new(body: &str) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            body: body.to_string(),
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue an opaque body and return the message id.
    async fn send(&self, body: &str) -> QueueResult<String>;

    /// Wait up to `wait` for one message. The message stays invisible to
    /// other receivers until deleted or until its visibility timeout lapses.
    async fn receive(&self, wait: Duration) -> QueueResult<Option<ReceivedMessage>>;

    /// Acknowledge a delivery.
    async fn delete(&self, receipt_handle: &str) -> QueueResult<()>;

    fn backend(&self) -> &'static str;
}

/// Build the queue client selected by the URL scheme.
pub async fn connect(config: &QueueConfig) -> QueueResult<Arc<dyn JobQueue>> {
    let url = config.url.as_str();
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        let queue =
            RedisQueue::connect(url, &config.name, config.visibility_timeout()).await?;
        Ok(Arc::new(queue))
    } else if url.starts_with("memory://") {
        Ok(Arc::new(InMemoryQueue::new(config.visibility_timeout())))
    } else {
        Err(QueueError::UnsupportedUrl(url.to_string()))
    }
}
