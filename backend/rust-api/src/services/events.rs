use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::record_progress_event;
use crate::models::ProgressEvent;

/// Outbound side of the event queue. Emitting never blocks and never fails
/// the caller; a closed queue is logged and counted.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

pub type EventReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn event_queue() -> (EventQueue, EventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventQueue { sender }, receiver)
}

impl EventQueue {
    pub fn emit(&self, event: ProgressEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(()) => {
                record_progress_event(name, "queued");
                tracing::debug!(event = name, "Progress event queued");
            }
            Err(_) => {
                record_progress_event(name, "dropped");
                tracing::warn!(event = name, "Event queue closed, progress event dropped");
            }
        }
    }
}

/// Downstream consumer of progress events (gamification, rewards).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &ProgressEvent) -> Result<()>;
}

/// Appends events to a Redis stream read by the rewards service.
pub struct RedisStreamSink {
    redis: ConnectionManager,
    stream_name: String,
}

impl RedisStreamSink {
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        Self {
            redis,
            stream_name: stream_name.into(),
        }
    }
}

#[async_trait]
impl EventSink for RedisStreamSink {
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload =
            serde_json::to_string(event).context("Failed to serialize progress event")?;

        redis::cmd("XADD")
            .arg(&self.stream_name)
            .arg("*")
            .arg("event_id")
            .arg(Uuid::new_v4().to_string())
            .arg("event")
            .arg(event.name())
            .arg("user_id")
            .arg(event.user_id())
            .arg("course_id")
            .arg(event.course_id())
            .arg("payload")
            .arg(payload)
            .arg("timestamp")
            .arg(Utc::now().timestamp_millis().to_string())
            .query_async::<String>(&mut conn)
            .await
            .context("Failed to publish progress event")?;

        Ok(())
    }
}

/// Drains the queue into `sink` until every `EventQueue` handle is dropped.
/// Each event is published once; failures are logged, not retried.
pub async fn run_event_forwarder<S>(mut receiver: EventReceiver, sink: S)
where
    S: EventSink,
{
    tracing::info!("Progress event forwarder started");

    while let Some(event) = receiver.recv().await {
        match sink.publish(&event).await {
            Ok(()) => {
                record_progress_event(event.name(), "published");
                tracing::info!(
                    event = event.name(),
                    user_id = event.user_id(),
                    course_id = event.course_id(),
                    "Progress event published"
                );
            }
            Err(err) => {
                record_progress_event(event.name(), "failed");
                tracing::warn!(
                    event = event.name(),
                    error = %err,
                    "Failed to publish progress event"
                );
            }
        }
    }

    tracing::info!("Progress event forwarder stopped");
}
