// In-process queue with the same delivery contract as the Redis backend:
// FIFO, one receiver per message, redelivery after the visibility timeout.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{Envelope, JobQueue, QueueError, QueueResult, ReceivedMessage};

struct InFlight {
    envelope: Envelope,
    visible_at: Instant,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<Envelope>,
    inflight: HashMap<String, InFlight>,
}

impl Inner {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(entry) = self.inflight.remove(&receipt) {
                debug!(message_id = %entry.envelope.message_id, "Visibility timeout expired, requeueing");
                self.pending.push_front(entry.envelope);
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.inflight.values().map(|entry| entry.visible_at).min()
    }
}

pub struct InMemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    /// Messages waiting to be received.
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Messages received but not yet deleted.
    pub async fn inflight_len(&self) -> usize {
        self.inner.lock().await.inflight.len()
    }

    async fn try_receive(&self) -> (Option<ReceivedMessage>, Option<Instant>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.requeue_expired(now);

        let Some(envelope) = inner.pending.pop_front() else {
            return (None, inner.next_expiry());
        };

        let receipt_handle = Uuid::new_v4().to_string();
        let message = ReceivedMessage {
            message_id: envelope.message_id.clone(),
            body: envelope.body.clone(),
            receipt_handle: receipt_handle.clone(),
        };
        inner.inflight.insert(
            receipt_handle,
            InFlight {
                envelope,
                visible_at: now + self.visibility_timeout,
            },
        );
        (Some(message), None)
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn send(&self, body: &str) -> QueueResult<String> {
        let envelope = Envelope::new(body);
        let message_id = envelope.message_id.clone();
        self.inner.lock().await.pending.push_back(envelope);
        self.notify.notify_waiters();
        Ok(message_id)
    }

    async fn receive(&self, wait: Duration) -> QueueResult<Option<ReceivedMessage>> {
        let deadline = Instant::now() + wait;

        loop {
            // Register before looking so a concurrent send cannot slip between.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (message, next_expiry) = self.try_receive().await;
            if message.is_some() {
                return Ok(message);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake_at = next_expiry.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> QueueResult<()> {
        self.inner
            .lock()
            .await
            .inflight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(receipt_handle.to_string()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
