//! The `broker` module is the seam between the publisher/subscriber logic and
//! an actual message broker.
//!
//! - [`Connector`] opens a [`Session`] (one connection plus one channel).
//! - [`Session`] exposes the handful of AMQP operations the bus needs:
//!   topic exchange declaration, exclusive queue declaration, binding,
//!   consuming with manual acknowledgment, publishing, ack and reject.
//! - `amqp` implements the seam on top of `lapin` for RabbitMQ.
//! - `memory` is an in-process topic exchange with the same semantics, used
//!   by tests and local runs.
//!
//! A session is owned by exactly one task. Methods take `&mut self` so the
//! borrow checker enforces the broker client's single-writer assumption.

pub mod amqp;
pub mod memory;
pub mod message;
pub mod topic;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::BrokerConfig;
use crate::utils::error::TransportError;

pub use amqp::AmqpConnector;
pub use memory::MemoryBroker;
pub use message::{DeliveryTag, InboundEnvelope};
pub use topic::TopicPattern;

/// Stream of deliveries produced by [`Session::consume`].
///
/// The stream ends when the broker cancels the consumer or the connection
/// goes away.
pub type Deliveries = BoxStream<'static, Result<InboundEnvelope, TransportError>>;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection and a channel on it.
    async fn connect(&self, config: &BrokerConfig) -> Result<Box<dyn Session>, TransportError>;
}

#[async_trait]
pub trait Session: Send {
    /// Declares a durable topic exchange. Redeclaring with the same
    /// parameters is a no-op.
    async fn declare_exchange(&mut self, exchange: &str) -> Result<(), TransportError>;

    /// Declares an exclusive, auto-deleted queue with a broker-generated name
    /// and returns that name.
    async fn declare_queue(&mut self) -> Result<String, TransportError>;

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    /// Starts consuming `queue` with manual acknowledgment.
    async fn consume(&mut self, queue: &str) -> Result<Deliveries, TransportError>;

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), TransportError>;

    /// Acknowledges exactly one delivery (`multiple = false`).
    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError>;

    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError>;

    /// Closes the channel and the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests;
