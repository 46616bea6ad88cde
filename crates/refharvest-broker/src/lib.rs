#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-broker** – AMQP intake and result publishing for the
//! reference harvesting orchestrator.
//!
//! Grounded in `AMQPInterface`/`AMQPMessageProcessor`/`AMQPMessagePublisher`:
//! a durable topic exchange carries both the inbound retrieval queue and the
//! outbound result fanout. [`ConsumerPool`] owns the consumer side -
//! declaring topology, running a bounded worker pool, and driving one
//! `Orchestrator::register`/`run` pair per inbound message. [`ResultPublisher`]
//! owns the publish side, deriving each outbound message's routing key from
//! its own shape.

mod config;
mod consumer;
mod error;
mod health;
mod publisher;

pub use config::BrokerConfig;
pub use consumer::ConsumerPool;
pub use error::BrokerError;
pub use health::ConnectionHealth;
pub use publisher::ResultPublisher;
