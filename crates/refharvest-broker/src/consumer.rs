use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use refharvest_harvester_core::MAX_EXPECTED_RESULTS;
use refharvest_orchestrator::Orchestrator;
use refharvest_types::{
    Entity, IdentifierTypeRegistry, InboundMessage, OutboundMessage, OutboundRetrieval, PersonName, RetrievalOptions,
};

use crate::error::BrokerError;
use crate::health::ConnectionHealth;
use crate::publisher::ResultPublisher;
use crate::BrokerConfig;

/// Consumes the inbound retrieval queue and drives one [`Orchestrator`] run
/// per message, grounded in `AMQPInterface`/`AMQPMessageProcessor`: a
/// durable topic exchange, QoS set before binding, and a worker pool reading
/// off a bounded internal channel for backpressure (§4.7).
pub struct ConsumerPool {
    config: BrokerConfig,
    connection: Connection,
    channel: Channel,
    health: Arc<ConnectionHealth>,
    orchestrator: Arc<Orchestrator>,
    identifiers: Arc<IdentifierTypeRegistry>,
    publisher: Arc<ResultPublisher>,
}

impl ConsumerPool {
    /// Connect to the broker, declare the durable topic exchange and queue,
    /// set QoS, and bind the inbound routing key.
    pub async fn connect(
        config: BrokerConfig,
        orchestrator: Arc<Orchestrator>,
        identifiers: IdentifierTypeRegistry,
    ) -> Result<Self, BrokerError> {
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &config.exchange_name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        channel.basic_qos(config.prefetch_count, BasicQosOptions::default()).await?;

        let mut queue_args = FieldTable::default();
        queue_args.insert("x-consumer-timeout".into(), AMQPValue::LongUInt(config.consumer_ack_timeout_ms as u32));
        channel
            .queue_declare(&config.queue_name, QueueDeclareOptions { durable: true, ..Default::default() }, queue_args)
            .await?;
        channel
            .queue_bind(&config.queue_name, &config.exchange_name, &config.routing_key, QueueBindOptions::default(), FieldTable::default())
            .await?;

        let health = ConnectionHealth::new();
        let publisher = Arc::new(ResultPublisher::new(channel.clone(), config.exchange_name.clone(), health.clone()));

        Ok(Self { config, connection, channel, health, orchestrator, identifiers: Arc::new(identifiers), publisher })
    }

    /// The connection-health flag this pool updates, shared with
    /// `refharvest-health`.
    pub fn health(&self) -> Arc<ConnectionHealth> {
        self.health.clone()
    }

    /// Consume the inbound queue until `shutdown` is cancelled, then drain
    /// the internal task channel for up to `wait_before_shutdown` before
    /// returning.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                &self.config.queue_name,
                "refharvest-broker",
                BasicConsumeOptions { no_ack: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        let (tx, rx) = mpsc::channel(self.config.inner_task_queue_length);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.inner_task_parallelism_limit);
        for worker_id in 0..self.config.inner_task_parallelism_limit {
            let rx = rx.clone();
            let orchestrator = self.orchestrator.clone();
            let identifiers = self.identifiers.clone();
            let publisher = self.publisher.clone();
            let result_timeout = self.config.result_timeout;
            workers.push(tokio::spawn(async move {
                loop {
                    let payload = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(payload) = payload else { break };
                    process_message(worker_id, &payload, orchestrator.clone(), &identifiers, &publisher, result_timeout).await;
                }
            }));
        }

        let mut consumer = consumer;
        let health = self.health.clone();
        loop {
            if health.is_disconnected() {
                // Mirrors the upstream reconnect-flag poll: pause pulling
                // while the connection is known bad instead of piling up
                // deliveries against a broker that can't ack them.
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => continue,
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = consumer.next() => {
                    let Some(delivery) = delivery else { break };
                    match delivery {
                        Ok(delivery) => {
                            if tx.send(delivery.data).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            error!(?err, "amqp delivery error");
                            health.mark_disconnected();
                        }
                    }
                }
            }
        }
        drop(tx);

        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(self.config.wait_before_shutdown, drain).await.is_err() {
            warn!("workers still draining after wait_before_shutdown, proceeding with shutdown");
        }

        Ok(())
    }

    /// Close the channel and connection. Called after [`ConsumerPool::run`]
    /// returns.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.channel.close(200, "shutdown").await?;
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }
}

#[instrument(skip(payload, orchestrator, identifiers, publisher))]
async fn process_message(
    worker_id: usize,
    payload: &[u8],
    orchestrator: Arc<Orchestrator>,
    identifiers: &IdentifierTypeRegistry,
    publisher: &ResultPublisher,
    result_timeout: std::time::Duration,
) {
    let raw: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(err) => {
            warn!(?err, worker_id, "undecodable message, dropping");
            return;
        }
    };

    let message: InboundMessage = match serde_json::from_value(raw.clone()) {
        Ok(message) => message,
        Err(err) => {
            let description = format!("Entity validation error, retrieval aborted: {err}");
            publisher.publish(&OutboundMessage::Retrieval(OutboundRetrieval::failed(description, raw))).await;
            return;
        }
    };

    if !message.is_person() {
        let description = format!("Unsupported message type {:?}", message.kind);
        publisher.publish(&OutboundMessage::Retrieval(OutboundRetrieval::failed(description, raw))).await;
        return;
    }

    let entity = match build_entity(&message, identifiers) {
        Ok(entity) => entity,
        Err(description) => {
            publisher.publish(&OutboundMessage::Retrieval(OutboundRetrieval::failed(description, raw))).await;
            return;
        }
    };

    let options = RetrievalOptions {
        identifiers_safe_mode: message.identifiers_safe_mode,
        nullify: message.nullify,
        harvesters: message.harvesters,
        events: message.events,
    };

    let retrieval = match orchestrator.register(entity, options).await {
        Ok(retrieval) => retrieval,
        Err(err) => {
            let description = format!("Retrieval registration failed: {err}");
            publisher.publish(&OutboundMessage::Retrieval(OutboundRetrieval::failed(description, raw))).await;
            return;
        }
    };
    let retrieval_id = retrieval.id.expect("register persists the retrieval");

    if !message.reply {
        if let Err(err) = orchestrator.run(&retrieval, None).await {
            error!(?err, %retrieval_id, "retrieval run failed");
        }
        return;
    }

    publisher.publish(&OutboundMessage::Retrieval(OutboundRetrieval::registered(retrieval_id))).await;

    let (results_tx, results_rx) = mpsc::channel(MAX_EXPECTED_RESULTS);
    let run_orchestrator = orchestrator.clone();
    let run_retrieval = retrieval.clone();
    let run_handle = tokio::spawn(async move { run_orchestrator.run(&run_retrieval, Some(results_tx)).await });

    let listen_publisher = publisher.clone();
    let mut listen_handle = tokio::spawn(listen_for_results(results_rx, retrieval_id, result_timeout, listen_publisher));

    tokio::select! {
        result = run_handle => {
            if let Ok(Err(err)) = result {
                error!(?err, %retrieval_id, "retrieval run failed");
            }
            listen_handle.abort();
        }
        _ = &mut listen_handle => {}
    }
}

async fn listen_for_results(
    mut results_rx: mpsc::Receiver<OutboundMessage>,
    retrieval_id: Uuid,
    timeout: std::time::Duration,
    publisher: Arc<ResultPublisher>,
) {
    loop {
        match tokio::time::timeout(timeout, results_rx.recv()).await {
            Ok(Some(message)) => publisher.publish(&message).await,
            Ok(None) => break,
            Err(_) => {
                let description = format!("Retrieval {retrieval_id} results timeout");
                warn!(%retrieval_id, "results listener timed out");
                publisher
                    .publish(&OutboundMessage::Retrieval(OutboundRetrieval::failed(description, serde_json::Value::Null)))
                    .await;
                break;
            }
        }
    }
}

fn build_entity(message: &InboundMessage, identifiers: &IdentifierTypeRegistry) -> Result<Entity, String> {
    let mut resolved = Vec::with_capacity(message.fields.identifiers.len());
    for raw in &message.fields.identifiers {
        if !identifiers.contains(&raw.kind) {
            return Err(format!("unknown identifier type {:?}", raw.kind));
        }
        resolved.push(raw.clone());
    }
    let name = PersonName { first_name: message.fields.first_name.clone(), last_name: message.fields.last_name.clone() };
    Entity::new_person(name, resolved).map_err(|err| format!("Entity validation error, retrieval aborted: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use refharvest_types::Identifier;

    #[test]
    fn build_entity_rejects_unknown_identifier_type() {
        let message = InboundMessage {
            kind: "person".into(),
            fields: refharvest_types::InboundPersonFields {
                first_name: None,
                last_name: None,
                identifiers: vec![Identifier::trusted("wikidata", "Q42")],
            },
            reply: false,
            nullify: vec![],
            identifiers_safe_mode: false,
            harvesters: vec![],
            events: vec![],
        };
        let registry = IdentifierTypeRegistry::defaults();
        assert!(build_entity(&message, &registry).is_err());
    }

    #[test]
    fn build_entity_accepts_identifier_only_payload() {
        let message = InboundMessage {
            kind: "person".into(),
            fields: refharvest_types::InboundPersonFields {
                first_name: None,
                last_name: None,
                identifiers: vec![Identifier::trusted("idref", "123")],
            },
            reply: false,
            nullify: vec![],
            identifiers_safe_mode: false,
            harvesters: vec![],
            events: vec![],
        };
        let registry = IdentifierTypeRegistry::defaults();
        assert!(build_entity(&message, &registry).is_ok());
    }
}
