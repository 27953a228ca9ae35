//! RabbitMQ transport built on `lapin`.
//!
//! Each session owns one AMQP connection and one channel opened on it. Lapin
//! errors are translated into [`TransportError`] so the retry classifiers can
//! tell a refused or dropped connection apart from a protocol violation.

use std::io;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use uuid::Uuid;

use super::message::{DeliveryTag, InboundEnvelope};
use super::{Connector, Deliveries, Session};
use crate::config::BrokerConfig;
use crate::utils::error::TransportError;

const REPLY_SUCCESS: u16 = 200;

/// Opens `lapin` connections to the broker described by a [`BrokerConfig`].
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn amqp_uri(config: &BrokerConfig) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: config.credentials().user().to_string(),
                password: config.credentials().password().to_string(),
            },
            host: config.host().to_string(),
            port: config.port(),
        },
        vhost: config.virtual_host().to_string(),
        ..Default::default()
    }
}

/// Maps a lapin error, using `address` to describe connection failures.
pub(crate) fn transport_error(address: &str, err: lapin::Error) -> TransportError {
    match err {
        lapin::Error::IOError(io_err) => match io_err.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(address.to_string()),
            io::ErrorKind::TimedOut
            | io::ErrorKind::NotFound
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable => TransportError::Unreachable(address.to_string()),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost(io_err.to_string()),
            kind => TransportError::Socket(io::Error::new(kind, io_err.to_string())),
        },
        lapin::Error::InvalidConnectionState(state) => {
            TransportError::ConnectionLost(format!("connection is {state:?}"))
        }
        lapin::Error::InvalidChannelState(state) => {
            TransportError::ConnectionLost(format!("channel is {state:?}"))
        }
        other => TransportError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, config: &BrokerConfig) -> Result<Box<dyn Session>, TransportError> {
        let address = config.address();
        let connection = Connection::connect_uri(amqp_uri(config), ConnectionProperties::default())
            .await
            .map_err(|e| transport_error(&address, e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| transport_error(&address, e))?;

        Ok(Box::new(AmqpSession {
            address,
            connection,
            channel,
        }))
    }
}

pub struct AmqpSession {
    address: String,
    connection: Connection,
    channel: Channel,
}

impl AmqpSession {
    fn map(&self, err: lapin::Error) -> TransportError {
        transport_error(&self.address, err)
    }
}

#[async_trait]
impl Session for AmqpSession {
    async fn declare_exchange(&mut self, exchange: &str) -> Result<(), TransportError> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| self.map(e))
    }

    async fn declare_queue(&mut self) -> Result<String, TransportError> {
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| self.map(e))?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| self.map(e))
    }

    async fn consume(&mut self, queue: &str) -> Result<Deliveries, TransportError> {
        let consumer_tag = format!("tracking-bus-{}", Uuid::new_v4().simple());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| self.map(e))?;

        let address = self.address.clone();
        let deliveries = consumer.map(move |delivery| {
            delivery
                .map(|d| {
                    InboundEnvelope::new(
                        d.data,
                        d.routing_key.as_str(),
                        DeliveryTag(d.delivery_tag),
                    )
                })
                .map_err(|e| transport_error(&address, e))
        });
        Ok(deliveries.boxed())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), TransportError> {
        let properties =
            BasicProperties::default().with_content_type(ShortString::from(content_type.to_string()));
        // no publisher confirms: the returned confirmation resolves immediately
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| self.map(e))?
            .await
            .map_err(|e| self.map(e))?;
        Ok(())
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError> {
        self.channel
            .basic_ack(tag.0, BasicAckOptions { multiple: false })
            .await
            .map_err(|e| self.map(e))
    }

    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        self.channel
            .basic_reject(tag.0, BasicRejectOptions { requeue })
            .await
            .map_err(|e| self.map(e))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let channel = if self.channel.status().connected() {
            self.channel.close(REPLY_SUCCESS, "closing").await
        } else {
            Ok(())
        };
        let connection = if self.connection.status().connected() {
            self.connection.close(REPLY_SUCCESS, "closing").await
        } else {
            Ok(())
        };
        channel.and(connection).map_err(|e| self.map(e))
    }
}
