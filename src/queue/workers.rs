//! Background worker that drains the job queue.
//!
//! One message at a time: receive, decode, transform, store the result,
//! then delete the message. A message is only deleted after its result is
//! stored, so anything that fails before that point is redelivered by the
//! queue once its visibility timeout lapses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{JobQueue, QueueError, ReceivedMessage};
use crate::config::WorkerConfig;
use crate::models::{self, JobResult};
use crate::storage::{ObjectStore, StorageError};

const RESULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Long-poll wait per receive.
    pub wait_time: Duration,
    /// Sleep after a failed receive.
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(20),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            wait_time: config.wait_time(),
            error_backoff: config.error_backoff(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to unmarshal message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to marshal result: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to put object: {0}")]
    Store(#[from] StorageError),
}

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Result stored and message deleted.
    Acknowledged,
    /// Result stored but the delete failed; the message will come back.
    AckFailed,
    /// Body was not a job message; left for redelivery.
    Rejected,
    /// Result could not be stored; left for redelivery.
    StoreFailed,
}

/// The only processing step: uppercase the text.
pub fn transform_text(text: &str) -> String {
    text.to_uppercase()
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ObjectStore>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ObjectStore>, settings: WorkerSettings) -> Self {
        Self {
            queue,
            store,
            settings,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between messages and during the error backoff;
    /// a receive already in progress is allowed to finish so a message the
    /// queue has handed out is never dropped on the floor.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            backend = self.queue.backend(),
            wait_secs = self.settings.wait_time.as_secs(),
            "Worker started"
        );

        while !shutdown.is_cancelled() {
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "failed to receive message");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.error_backoff) => {}
                }
            }
        }

        info!("Worker stopped");
    }

    /// Receive at most one message and handle it.
    ///
    /// Returns `Ok(None)` when the long poll came back empty.
    pub async fn poll_once(&self) -> Result<Option<MessageOutcome>, QueueError> {
        match self.queue.receive(self.settings.wait_time).await? {
            Some(message) => Ok(Some(self.handle_message(message).await)),
            None => Ok(None),
        }
    }

    pub async fn handle_message(&self, message: ReceivedMessage) -> MessageOutcome {
        let result = match self.process_message(&message.body).await {
            Ok(result) => result,
            Err(e @ WorkerError::Decode(_)) => {
                warn!(message_id = %message.message_id, error = %e, "failed to process message");
                return MessageOutcome::Rejected;
            }
            Err(e) => {
                error!(message_id = %message.message_id, error = %e, "failed to process message");
                return MessageOutcome::StoreFailed;
            }
        };

        match self.queue.delete(&message.receipt_handle).await {
            Ok(()) => {
                info!(job_id = %result.id, "Job processed");
                MessageOutcome::Acknowledged
            }
            Err(e) => {
                error!(job_id = %result.id, error = %e, "failed to delete message");
                MessageOutcome::AckFailed
            }
        }
    }

    /// Decode a queued body, transform it and store the result.
    pub async fn process_message(&self, body: &str) -> Result<JobResult, WorkerError> {
        let message = models::decode_message(body).map_err(WorkerError::Decode)?;
        debug!(job_id = %message.id, "Processing job");

        let output = transform_text(&message.text);
        let result = JobResult::new(message, output, Utc::now());
        let payload = models::encode_result(&result).map_err(WorkerError::Encode)?;

        self.store
            .put(&models::result_key(&result.id), payload, RESULT_CONTENT_TYPE)
            .await?;

        Ok(result)
    }
}
