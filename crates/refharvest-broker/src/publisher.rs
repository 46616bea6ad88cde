use std::sync::Arc;

use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use tracing::{debug, error};

use refharvest_types::OutboundMessage;

use crate::health::ConnectionHealth;

/// Publishes [`OutboundMessage`]s to the result topic exchange. Grounded in
/// `AMQPMessagePublisher`: publish failures are logged and swallowed, never
/// retried or propagated - broker durability, not this component, is the
/// delivery contract (§4.8).
pub struct ResultPublisher {
    channel: lapin::Channel,
    exchange: String,
    health: Arc<ConnectionHealth>,
}

impl ResultPublisher {
    /// Build a publisher bound to `exchange` on `channel`.
    pub fn new(channel: lapin::Channel, exchange: impl Into<String>, health: Arc<ConnectionHealth>) -> Self {
        Self { channel, exchange: exchange.into(), health }
    }

    /// Serialise `message` to persistent-delivery JSON and publish it under
    /// the routing key its own type/subtype derive.
    pub async fn publish(&self, message: &OutboundMessage) {
        let routing_key = message.routing_key();
        let payload = match serde_json::to_vec(message) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(?err, %routing_key, "failed to serialise outbound message, dropping");
                return;
            }
        };

        let result = self
            .channel
            .basic_publish(
                &self.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await;

        match result {
            Ok(confirm) => match confirm.await {
                Ok(_) => debug!(%routing_key, "message published"),
                Err(err) => {
                    error!(?err, %routing_key, "publisher confirm failed");
                    self.health.mark_disconnected();
                }
            },
            Err(err) => {
                error!(?err, %routing_key, "failed to publish message");
                self.health.mark_disconnected();
            }
        }
    }
}
