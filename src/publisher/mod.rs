//! Message publisher
//!
//! `MessagePublisher` sends typed payloads to the configured topic exchange:
//! - the payload is encoded before any broker I/O, so an unrepresentable
//!   payload fails fast with a codec error
//! - one session is opened lazily and reused; the exchange is declared
//!   (durable, topic) every time a session is opened
//! - a transport failure discards the session so the next call reconnects
//!
//! Publishing is fire-and-forget: publisher confirms are not requested.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::broker::{Connector, Session};
use crate::codec::{Codec, JsonCodec};
use crate::config::BrokerConfig;
use crate::retry::{self, RetryPolicy, connection_verdict};
use crate::utils::error::{Error, Result, TransportError};
use crate::utils::logging::{Log, TracingLog};

pub struct MessagePublisher<C = JsonCodec> {
    config: BrokerConfig,
    connector: Arc<dyn Connector>,
    codec: C,
    log: Arc<dyn Log>,
    session: Mutex<Option<Box<dyn Session>>>,
}

impl MessagePublisher<JsonCodec> {
    pub fn new(config: BrokerConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_codec(config, connector, JsonCodec)
    }
}

impl<C: Codec> MessagePublisher<C> {
    pub fn with_codec(config: BrokerConfig, connector: Arc<dyn Connector>, codec: C) -> Self {
        Self {
            config,
            connector,
            codec,
            log: TracingLog::shared("publisher"),
            session: Mutex::new(None),
        }
    }

    pub fn with_logger(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Publishes `payload` to the configured exchange with `routing_key`.
    pub async fn publish<T: Serialize>(&self, routing_key: &str, payload: &T) -> Result<()> {
        let body = self.codec.encode(payload)?;
        self.send(routing_key, &body).await
    }

    /// Publishes to the first configured routing key.
    pub async fn publish_default<T: Serialize>(&self, payload: &T) -> Result<()> {
        // BrokerConfig guarantees at least one routing key
        let routing_key = self.config.routing_keys()[0].clone();
        self.publish(&routing_key, payload).await
    }

    /// Like [`publish`](Self::publish), reconnecting on transient broker
    /// failures according to `policy`. Encoding happens once, up front.
    pub async fn publish_with_retry<T: Serialize>(
        &self,
        routing_key: &str,
        payload: &T,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let body = self.codec.encode(payload)?;
        let body = body.as_slice();
        retry::run(|| self.send(routing_key, body), connection_verdict, policy).await
    }

    /// Closes the cached session, if any.
    pub async fn close(&self) -> Result<()> {
        if let Some(mut session) = self.session.lock().await.take() {
            session.close().await?;
        }
        Ok(())
    }

    async fn send(&self, routing_key: &str, body: &[u8]) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            let session = self.open().await?;
            *guard = Some(session);
        }
        let Some(session) = guard.as_mut() else {
            return Err(TransportError::ConnectionLost("no publisher session".into()).into());
        };

        let published = session
            .publish(
                self.config.exchange(),
                routing_key,
                body,
                self.codec.content_type(),
            )
            .await;

        match published {
            Ok(()) => {
                self.log.info(&format!(
                    "published {} bytes to exchange {} with route {routing_key}",
                    body.len(),
                    self.config.exchange()
                ));
                Ok(())
            }
            Err(err) => {
                self.log.warn(&format!("publish to {routing_key} failed: {err}"));
                if let Some(mut broken) = guard.take() {
                    let _ = broken.close().await;
                }
                Err(Error::Transport(err))
            }
        }
    }

    async fn open(&self) -> Result<Box<dyn Session>> {
        let mut session = self.connector.connect(&self.config).await?;
        if let Err(err) = session.declare_exchange(self.config.exchange()).await {
            let _ = session.close().await;
            return Err(err.into());
        }
        self.log.info(&format!(
            "publisher connected to {} (exchange {})",
            self.config.address(),
            self.config.exchange()
        ));
        Ok(session)
    }
}
