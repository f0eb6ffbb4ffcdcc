//! Push notifications for render progress, delivered over redis pub/sub.
//!
//! The SSE gateway (outside this service) subscribes to `interview:{id}`
//! and relays events to connected clients; a `close` control event tears
//! down every connection for the interview. Delivery is best-effort: a
//! failed publish is logged and never fails the pipeline.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publishes a named event with a small JSON payload on the
    /// interview's channel.
    async fn publish(&self, interview_id: Uuid, event: &str, payload: serde_json::Value);

    /// Asks the gateway to close all connections for the interview.
    async fn close(&self, interview_id: Uuid);
}

pub struct RedisNotifier {
    client: redis::Client,
}

impl RedisNotifier {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn send(&self, channel: &str, body: String) {
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                if let Err(e) = conn.publish::<_, _, ()>(channel, body).await {
                    warn!("failed to publish on {channel}: {e}");
                }
            }
            Err(e) => warn!("redis connection for {channel} failed: {e}"),
        }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, interview_id: Uuid, event: &str, payload: serde_json::Value) {
        let channel = format!("interview:{interview_id}");
        let body = json!({ "event": event, "data": payload }).to_string();
        self.send(&channel, body).await;
    }

    async fn close(&self, interview_id: Uuid) {
        let channel = format!("interview:{interview_id}");
        let body = json!({ "event": "close", "data": {} }).to_string();
        self.send(&channel, body).await;
    }
}
