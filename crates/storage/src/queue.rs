//! Durable, at-least-once message queue stored in SQLite.
//!
//! Receiving a message hides it for a visibility timeout and hands out a pop
//! receipt. Only the holder of the latest receipt can acknowledge (delete) the
//! message; if the timeout lapses first the message becomes visible again and
//! is redelivered with an incremented dequeue count.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::{stream, Stream};
use serde_json::Error as JsonError;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use contoso_expenses_core::ports::{BoxError, NotificationPublisher};
use contoso_expenses_core::types::Expense;

use crate::{to_rfc3339, Clock};

/// How message bodies are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEncoding {
    Base64,
    Plain,
}

impl MessageEncoding {
    pub fn encode(self, body: &str) -> String {
        match self {
            Self::Base64 => STANDARD.encode(body.as_bytes()),
            Self::Plain => body.to_string(),
        }
    }

    pub fn decode(self, stored: &str) -> Result<String, QueueError> {
        match self {
            Self::Base64 => {
                let bytes = STANDARD
                    .decode(stored.trim())
                    .map_err(|err| QueueError::Decode(err.to_string()))?;
                String::from_utf8(bytes).map_err(|err| QueueError::Decode(err.to_string()))
            }
            Self::Plain => Ok(stored.to_string()),
        }
    }
}

/// Receipt returned after a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: String,
    pub enqueued_at: DateTime<Utc>,
}

/// A message claimed by a consumer.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub pop_receipt: String,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
    pub dequeue_count: u32,
}

/// Low-level access to the `queues` and `queue_messages` tables.
#[derive(Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

impl QueueRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Registers the queue. Calling it for an existing queue is a no-op.
    pub async fn create_if_not_exists(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO queues (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(queue)
            .bind(to_rfc3339(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Appends a message that is visible immediately.
    pub async fn publish(
        &self,
        queue: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<PublishReceipt, QueueError> {
        let message_id = Uuid::new_v4().to_string();
        let timestamp = to_rfc3339(now);
        sqlx::query(
            "INSERT INTO queue_messages (id, queue_name, body, enqueued_at, visible_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message_id)
        .bind(queue)
        .bind(body)
        .bind(&timestamp)
        .bind(&timestamp)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                QueueError::UnknownQueue(queue.to_string())
            }
            other => QueueError::Database(other),
        })?;

        Ok(PublishReceipt {
            message_id,
            enqueued_at: now,
        })
    }

    /// Claims the oldest visible message, hiding it until `now + visibility_timeout`.
    pub async fn receive(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let timeout = ChronoDuration::from_std(visibility_timeout)
            .map_err(|_| QueueError::InvalidVisibilityTimeout(visibility_timeout))?;
        let pop_receipt = Uuid::new_v4().to_string();

        let row = sqlx::query(
            "UPDATE queue_messages \
                SET visible_at = ?, dequeue_count = dequeue_count + 1, pop_receipt = ? \
              WHERE seq = ( \
                    SELECT seq FROM queue_messages \
                     WHERE queue_name = ? AND status = 'ready' AND visible_at <= ? \
                     ORDER BY seq LIMIT 1) \
             RETURNING id, body, enqueued_at, dequeue_count",
        )
        .bind(to_rfc3339(now + timeout))
        .bind(&pop_receipt)
        .bind(queue)
        .bind(to_rfc3339(now))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let dequeue_count: i64 = row.try_get("dequeue_count")?;
        Ok(Some(ReceivedMessage {
            message_id: row.try_get("id")?,
            pop_receipt,
            body: row.try_get("body")?,
            enqueued_at: row.try_get("enqueued_at")?,
            dequeue_count: u32::try_from(dequeue_count).unwrap_or(u32::MAX),
        }))
    }

    /// Deletes a message claimed with `pop_receipt`.
    ///
    /// Fails with [`QueueError::StaleReceipt`] when the message was already
    /// acknowledged or has since been claimed again.
    pub async fn ack(&self, message_id: &str, pop_receipt: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "DELETE FROM queue_messages WHERE id = ? AND pop_receipt = ? AND status = 'ready'",
        )
        .bind(message_id)
        .bind(pop_receipt)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::StaleReceipt(message_id.to_string()));
        }
        Ok(())
    }

    /// Parks a claimed message so it is never delivered again.
    pub async fn mark_poison(&self, message_id: &str, pop_receipt: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE queue_messages SET status = 'poison', pop_receipt = NULL \
              WHERE id = ? AND pop_receipt = ? AND status = 'ready'",
        )
        .bind(message_id)
        .bind(pop_receipt)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::StaleReceipt(message_id.to_string()));
        }
        Ok(())
    }

    /// Counts messages still eligible for delivery, visible or not.
    pub async fn pending_count(&self, queue: &str) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_messages WHERE queue_name = ? AND status = 'ready'",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    /// Counts messages parked as poison.
    pub async fn poison_count(&self, queue: &str) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_messages WHERE queue_name = ? AND status = 'poison'",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}

/// Queue identity shared by producers and consumers.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub name: String,
    pub encoding: MessageEncoding,
}

/// Publishes serialized expenses onto the notification queue.
#[derive(Clone)]
pub struct QueuePublisher {
    repo: QueueRepository,
    settings: QueueSettings,
    clock: Clock,
}

impl QueuePublisher {
    pub fn new(repo: QueueRepository, settings: QueueSettings) -> Self {
        Self {
            repo,
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    /// Serializes `expense` as JSON and appends it to the queue, creating the
    /// queue first when needed.
    pub async fn publish_expense(&self, expense: &Expense) -> Result<PublishReceipt, QueueError> {
        let now = (self.clock)();
        let json = serde_json::to_string(expense)?;
        let body = self.settings.encoding.encode(&json);
        self.repo
            .create_if_not_exists(&self.settings.name, now)
            .await?;
        self.repo.publish(&self.settings.name, &body, now).await
    }
}

#[async_trait]
impl NotificationPublisher for QueuePublisher {
    async fn publish(&self, expense: &Expense) -> Result<String, BoxError> {
        self.publish_expense(expense)
            .await
            .map(|receipt| receipt.message_id)
            .map_err(BoxError::from)
    }
}

/// Tuning for [`QueueConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub queue: QueueSettings,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    /// Deliveries allowed before a message is parked as poison.
    pub max_dequeue_count: u32,
}

/// A delivered message awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub pop_receipt: String,
    pub dequeue_count: u32,
    pub enqueued_at: DateTime<Utc>,
    body: String,
    encoding: MessageEncoding,
}

impl Delivery {
    /// Returns the decoded message text.
    pub fn text(&self) -> Result<String, QueueError> {
        self.encoding.decode(&self.body)
    }

    /// Decodes the message text as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_str(&self.text()?)?)
    }
}

/// Pull-based consumer for one queue.
#[derive(Clone)]
pub struct QueueConsumer {
    repo: QueueRepository,
    settings: ConsumerSettings,
    clock: Clock,
}

impl QueueConsumer {
    pub fn new(repo: QueueRepository, settings: ConsumerSettings) -> Self {
        Self {
            repo,
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.settings.queue.name
    }

    /// Claims the next deliverable message, if any.
    ///
    /// Messages that have exceeded `max_dequeue_count` are parked as poison
    /// instead of being returned.
    pub async fn next_delivery(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let received = self
                .repo
                .receive(
                    &self.settings.queue.name,
                    (self.clock)(),
                    self.settings.visibility_timeout,
                )
                .await?;
            let Some(message) = received else {
                return Ok(None);
            };

            if message.dequeue_count > self.settings.max_dequeue_count {
                warn!(
                    stage = "queue",
                    queue = %self.settings.queue.name,
                    message_id = %message.message_id,
                    dequeue_count = message.dequeue_count,
                    "message exceeded max dequeue count; moving to poison"
                );
                self.repo
                    .mark_poison(&message.message_id, &message.pop_receipt)
                    .await?;
                continue;
            }

            return Ok(Some(Delivery {
                message_id: message.message_id,
                pop_receipt: message.pop_receipt,
                dequeue_count: message.dequeue_count,
                enqueued_at: message.enqueued_at,
                body: message.body,
                encoding: self.settings.queue.encoding,
            }));
        }
    }

    /// Acknowledges a processed delivery, removing it from the queue.
    pub async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.repo
            .ack(&delivery.message_id, &delivery.pop_receipt)
            .await
    }

    /// Returns an endless stream of deliveries.
    ///
    /// Nothing is claimed until the stream is polled. The stream waits
    /// `poll_interval` whenever the queue is empty or an error occurs, and
    /// never ends on its own. Each call starts an independent stream.
    pub fn stream(&self) -> impl Stream<Item = Result<Delivery, QueueError>> + Send + 'static {
        stream::unfold(self.clone(), |consumer| async move {
            loop {
                match consumer.next_delivery().await {
                    Ok(Some(delivery)) => return Some((Ok(delivery), consumer)),
                    Ok(None) => tokio::time::sleep(consumer.settings.poll_interval).await,
                    Err(err) => {
                        tokio::time::sleep(consumer.settings.poll_interval).await;
                        return Some((Err(err), consumer));
                    }
                }
            }
        })
    }
}

/// Errors produced by the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0} does not exist")]
    UnknownQueue(String),
    #[error("pop receipt for message {0} is no longer valid")]
    StaleReceipt(String),
    #[error("visibility timeout {0:?} is out of range")]
    InvalidVisibilityTimeout(Duration),
    #[error("failed to decode message body: {0}")]
    Decode(String),
    #[error("failed to (de)serialize message json: {0}")]
    Json(#[from] JsonError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
