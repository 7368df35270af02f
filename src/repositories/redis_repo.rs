//! Redis pub/sub carrying delivery events between gateway instances.

use crate::error::AppError;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use futures::StreamExt;

/// Redis-backed repository: publish and subscribe on named channels.
#[derive(Clone)]
pub struct RedisRepository {
    client: Arc<redis::Client>,
}

impl RedisRepository {
    /// Create repository from Redis URL. Does not connect yet.
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Get a multiplexed connection for commands.
    pub async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Publish a message (Redis PUBLISH). Returns how many subscribers got it.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64, AppError> {
        let mut conn = self.connection().await?;
        let count: u64 = conn.publish(channel, message).await?;
        debug!(channel = %channel, count, "published");
        Ok(count)
    }

    /// Subscribe to a channel; the receiver gets every payload published to it.
    /// The forwarding task ends when the Redis connection drops.
    pub async fn subscribe_to_channel(
        &self,
        channel: &str,
    ) -> Result<broadcast::Receiver<String>, AppError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        info!(channel = %channel, "subscribed to redis channel");

        let (tx, rx) = broadcast::channel(64);
        let mut stream = pubsub.into_on_message();
        let channel = channel.to_string();

        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        let _ = tx.send(payload);
                    }
                    Err(e) => warn!(channel = %channel, error = %e, "non-text payload dropped"),
                }
            }
            warn!(channel = %channel, "redis subscription ended");
        });

        Ok(rx)
    }
}
