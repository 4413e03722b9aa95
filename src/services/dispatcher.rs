use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const QUEUE_KEY: &str = "medcoder:documents";
const PROCESSING_KEY: &str = "medcoder:processing";
const RETRY_KEY: &str = "medcoder:retries";

/// Due retries promoted back onto the main queue per dequeue call.
const RETRY_PROMOTE_BATCH: isize = 16;

// ── Work items ──────────────────────────────────────────────────────────────

/// Delivery payload serialized into Redis. `attempt` is 0 on first delivery
/// and counts scheduled retries; it lives only in the queue, never on the
/// document record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub document_id: Uuid,
    #[serde(default)]
    pub attempt: u32,
}

impl WorkItem {
    pub fn first(document_id: Uuid) -> Self {
        Self {
            document_id,
            attempt: 0,
        }
    }

    /// The item a retry of this delivery will carry.
    pub fn next_attempt(&self) -> Self {
        Self {
            document_id: self.document_id,
            attempt: self.attempt + 1,
        }
    }
}

// ── Dispatch contract ───────────────────────────────────────────────────────

/// The slice of the dispatcher the HTTP layer and the orchestrator depend on.
/// Claiming and acknowledging deliveries stays on the concrete worker-side
/// implementation.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// First delivery of a freshly created document.
    async fn enqueue(&self, document_id: Uuid) -> Result<(), DispatchError>;

    /// Redeliver `item` as its next attempt once `delay` has elapsed.
    async fn schedule_retry(&self, item: &WorkItem, delay: Duration) -> Result<(), DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ── Redis implementation ────────────────────────────────────────────────────

/// Redis-backed dispatcher: a LIST for ready work, a LIST of in-flight claims,
/// and a ZSET of delayed retries scored by ready-at time (epoch millis).
pub struct RedisDispatcher {
    client: redis::Client,
}

impl RedisDispatcher {
    pub fn new(redis_url: &str) -> Result<Self, DispatchError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, DispatchError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Claim the next ready item, moving it onto the processing list so a
    /// crashed worker leaves a visible trace instead of losing the delivery.
    /// Promotes due retries first.
    pub async fn dequeue(&self) -> Result<Option<WorkItem>, DispatchError> {
        let mut conn = self.conn().await?;
        promote_due_retries(&mut conn).await?;

        let payload: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;
        match payload {
            Some(payload) => {
                let item: WorkItem = serde_json::from_str(&payload)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Acknowledge a claimed item (remove it from the processing list).
    pub async fn complete(&self, item: &WorkItem) -> Result<(), DispatchError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(item)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        Ok(())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), DispatchError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Number of items ready for delivery (scheduled retries not included
    /// until they come due).
    pub async fn queue_depth(&self) -> Result<u64, DispatchError> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }
}

/// Moves retry payloads whose ready-at score has passed onto the main queue.
/// ZREM is the claim: with several workers polling, only the one that removes
/// the member pushes it.
async fn promote_due_retries(conn: &mut MultiplexedConnection) -> Result<(), DispatchError> {
    let now = chrono::Utc::now().timestamp_millis();
    let due: Vec<String> = conn
        .zrangebyscore_limit(RETRY_KEY, 0, now, 0, RETRY_PROMOTE_BATCH)
        .await?;

    for payload in due {
        let removed: i32 = conn.zrem(RETRY_KEY, &payload).await?;
        if removed == 1 {
            conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Dispatcher for RedisDispatcher {
    async fn enqueue(&self, document_id: Uuid) -> Result<(), DispatchError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(&WorkItem::first(document_id))?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    async fn schedule_retry(&self, item: &WorkItem, delay: Duration) -> Result<(), DispatchError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(&item.next_attempt())?;
        let ready_at = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(RETRY_KEY, &payload, ready_at).await?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
