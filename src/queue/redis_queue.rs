//! Redis-backed job queue
//!
//! Reliable-list layout for a queue named `jobs`:
//!
//! ```text
//! jobs:pending     LIST   envelopes waiting for a receiver (LPUSH in, BLMOVE out)
//! jobs:processing  LIST   envelopes handed to a receiver and not yet deleted
//! jobs:deliveries  HASH   receipt handle -> envelope, one entry per live delivery
//! jobs:inflight    ZSET   receipt handles scored by visibility deadline (ms)
//! ```
//!
//! Every receive mints a fresh receipt handle, so a receiver whose visibility
//! lapsed cannot acknowledge the copy someone else received afterwards.
//! Delete and requeue run as Lua scripts so the check and the move are atomic.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, Script};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Envelope, JobQueue, QueueError, QueueResult, ReceivedMessage};

// KEYS: deliveries, inflight, processing. ARGV: receipt handle.
const DELETE_SCRIPT: &str = r#"
local envelope = redis.call('HGET', KEYS[1], ARGV[1])
if not envelope then
    return 0
end
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('LREM', KEYS[3], 1, envelope)
return 1
"#;

// KEYS: deliveries, inflight, processing, pending. ARGV: now in ms.
const REQUEUE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, receipt in ipairs(expired) do
    local envelope = redis.call('HGET', KEYS[1], receipt)
    redis.call('ZREM', KEYS[2], receipt)
    redis.call('HDEL', KEYS[1], receipt)
    if envelope then
        redis.call('LREM', KEYS[3], 1, envelope)
        redis.call('RPUSH', KEYS[4], envelope)
    end
end
return #expired
"#;

pub struct RedisQueue {
    client: Client,
    /// Shared connection for non-blocking commands.
    conn: ConnectionManager,
    /// Dedicated connection for BLMOVE so enqueues never wait behind a long poll.
    blocking: Mutex<Option<MultiplexedConnection>>,
    keys: QueueKeys,
    visibility_timeout: Duration,
    delete_script: Script,
    requeue_script: Script,
}

#[derive(Debug, Clone, PartialEq)]
struct QueueKeys {
    pending: String,
    processing: String,
    deliveries: String,
    inflight: String,
}

impl QueueKeys {
    fn new(name: &str) -> Self {
        Self {
            pending: format!("{}:pending", name),
            processing: format!("{}:processing", name),
            deliveries: format!("{}:deliveries", name),
            inflight: format!("{}:inflight", name),
        }
    }
}

impl RedisQueue {
    pub async fn connect(url: &str, name: &str, visibility_timeout: Duration) -> QueueResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(queue = %name, "Connected to Redis queue");

        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(None),
            keys: QueueKeys::new(name),
            visibility_timeout,
            delete_script: Script::new(DELETE_SCRIPT),
            requeue_script: Script::new(REQUEUE_SCRIPT),
        })
    }

    /// Move deliveries whose visibility deadline has passed back to `pending`.
    async fn requeue_expired(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let requeued: i64 = self
            .requeue_script
            .key(&self.keys.deliveries)
            .key(&self.keys.inflight)
            .key(&self.keys.processing)
            .key(&self.keys.pending)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if requeued > 0 {
            debug!(queue = %self.keys.pending, requeued, "Visibility timeout expired, requeued messages");
        }
        Ok(())
    }

    async fn blocking_connection(&self) -> QueueResult<MultiplexedConnection> {
        let mut slot = self.blocking.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_blocking_connection(&self) {
        self.blocking.lock().await.take();
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn send(&self, body: &str) -> QueueResult<String> {
        let envelope = Envelope::new(body);
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();

        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.keys.pending)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        Ok(envelope.message_id)
    }

    async fn receive(&self, wait: Duration) -> QueueResult<Option<ReceivedMessage>> {
        self.requeue_expired().await?;

        let mut conn = self.blocking_connection().await?;
        // BLMOVE treats 0 as "block forever".
        let timeout = wait.as_secs_f64().max(0.01);
        let moved: Option<String> = match redis::cmd("BLMOVE")
            .arg(&self.keys.pending)
            .arg(&self.keys.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout)
            .query_async(&mut conn)
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                self.reset_blocking_connection().await;
                return Err(e.into());
            }
        };

        let Some(raw) = moved else {
            return Ok(None);
        };

        let receipt_handle = Uuid::new_v4().to_string();
        let deadline = Utc::now().timestamp_millis() + self.visibility_timeout.as_millis() as i64;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&self.keys.deliveries)
            .arg(&receipt_handle)
            .arg(&raw)
            .ignore()
            .cmd("ZADD")
            .arg(&self.keys.inflight)
            .arg(deadline)
            .arg(&receipt_handle)
            .ignore()
            .query_async(&mut conn)
            .await?;

        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Ok(Some(ReceivedMessage {
                message_id: envelope.message_id,
                body: envelope.body,
                receipt_handle,
            })),
            Err(e) => {
                // Written by something other than `send`; hand the raw payload
                // to the receiver so it can reject it like any bad body.
                warn!(error = %e, "Queue entry is not an envelope");
                Ok(Some(ReceivedMessage {
                    message_id: String::new(),
                    body: raw,
                    receipt_handle,
                }))
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .delete_script
            .key(&self.keys.deliveries)
            .key(&self.keys.inflight)
            .key(&self.keys.processing)
            .arg(receipt_handle)
            .invoke_async(&mut conn)
            .await?;

        if removed == 0 {
            return Err(QueueError::UnknownReceipt(receipt_handle.to_string()));
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
