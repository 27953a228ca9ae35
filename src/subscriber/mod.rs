//! Message subscriber
//!
//! `MessageSubscriber<T>` is a long-lived worker that keeps a queue bound to
//! the configured topic exchange and feeds every delivery to a
//! [`MessageHandler`]. Lifecycle:
//!
//! ```text
//! Disconnected -> Connected -> Bound -> Consuming -> (error) Disconnected
//!                                                  -> (stop)  Stopped
//! ```
//!
//! - Connecting and declaring (exchange, exclusive queue, one binding per
//!   routing key) run inside one `retry::run` call classified by
//!   `connection_verdict`. Running out of attempts ends the worker.
//! - Deliveries are handled one at a time with manual acknowledgment. A
//!   handler that returns `Ok` gets exactly one ack for its delivery tag.
//! - Malformed frames (empty or non-UTF-8 bodies, or a handler reporting
//!   `Malformed`) are skipped without ack; see [`MalformedPolicy`].
//! - Any other handler error, or a broken consumer stream, closes the session
//!   and starts a fresh connection cycle. A new auto-named queue is declared,
//!   so frames published while disconnected are not seen.
//! - The stop signal is observed while connecting, backing off and waiting
//!   for the next delivery. Unacked deliveries are left to the broker.

mod handle;
mod incoming;

use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::broker::{Connector, DeliveryTag, InboundEnvelope, Session};
use crate::codec::{Codec, JsonCodec};
use crate::config::BrokerConfig;
use crate::retry::{self, RetryPolicy, Verdict, connection_verdict, message_verdict};
use crate::utils::error::{Error, Result, TransportError};
use crate::utils::logging::{Log, TracingLog};

pub use handle::SubscriberHandle;
pub use incoming::{Decoder, Incoming, MessageHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connected,
    Bound,
    Consuming,
    /// Terminal: the worker returned, after a stop request or a fatal error.
    Stopped,
}

/// What happens to a delivery that was skipped as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Leave it unacknowledged; the broker decides about redelivery once the
    /// channel closes.
    #[default]
    LeaveUnacked,
    /// Reject it without requeue, which dead-letters it when the queue has a
    /// dead-letter exchange and drops it otherwise.
    Reject,
}

/// A session whose queue is declared and bound, ready to consume.
struct Bound {
    session: Box<dyn Session>,
    queue: String,
}

pub struct MessageSubscriber<T, H, C = JsonCodec> {
    config: BrokerConfig,
    connector: Arc<dyn Connector>,
    handler: H,
    codec: C,
    policy: RetryPolicy,
    malformed: MalformedPolicy,
    log: Arc<dyn Log>,
    state: watch::Sender<SubscriberState>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H> MessageSubscriber<T, H, JsonCodec>
where
    T: DeserializeOwned + 'static,
    H: MessageHandler<T>,
{
    pub fn new(config: BrokerConfig, connector: Arc<dyn Connector>, handler: H) -> Self {
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            config,
            connector,
            handler,
            codec: JsonCodec,
            policy: RetryPolicy::default(),
            malformed: MalformedPolicy::default(),
            log: TracingLog::shared("subscriber"),
            state,
            _payload: PhantomData,
        }
    }
}

impl<T, H, C> MessageSubscriber<T, H, C>
where
    T: DeserializeOwned + 'static,
    H: MessageHandler<T>,
    C: Codec,
{
    pub fn with_codec<C2: Codec>(self, codec: C2) -> MessageSubscriber<T, H, C2> {
        MessageSubscriber {
            config: self.config,
            connector: self.connector,
            handler: self.handler,
            codec,
            policy: self.policy,
            malformed: self.malformed,
            log: self.log,
            state: self.state,
            _payload: PhantomData,
        }
    }

    /// Retry policy for the connection layer.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_malformed_policy(mut self, malformed: MalformedPolicy) -> Self {
        self.malformed = malformed;
        self
    }

    pub fn with_logger(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Watch the worker's state transitions.
    pub fn state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    /// Runs the worker until `shutdown` turns `true` (or its sender is
    /// dropped), or a fatal error occurs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let result = self.supervise(&mut shutdown).await;
        if let Err(err) = &result {
            self.log.error(&format!("subscriber terminated: {err}"));
        } else {
            self.log.info("subscriber stopped");
        }
        self.set_state(SubscriberState::Stopped);
        result
    }

    /// Runs the worker on its own task.
    pub fn spawn(self) -> SubscriberHandle
    where
        H: 'static,
    {
        let (stop, shutdown) = watch::channel(false);
        let state = self.state();
        let task = tokio::spawn(self.run(shutdown));
        SubscriberHandle::new(stop, state, task)
    }

    fn set_state(&self, state: SubscriberState) {
        self.state.send_replace(state);
    }

    fn decoder(&self) -> Decoder<T> {
        let codec = self.codec.clone();
        Arc::new(move |bytes: &[u8]| codec.decode::<T>(bytes))
    }

    async fn supervise(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        loop {
            let bound = tokio::select! {
                biased;
                _ = stopped(shutdown) => return Ok(()),
                bound = retry::run(|| self.bind(), connection_verdict, &self.policy) => bound?,
            };

            let err = match self.consume(bound, shutdown).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if connection_verdict(&err) == Verdict::Fatal {
                return Err(err);
            }

            let delay = self.policy.backoff().delay(1);
            self.log.warn(&format!(
                "lost consumer on {}: {err}; reconnecting in {}ms",
                self.config.address(),
                delay.as_millis()
            ));
            tokio::select! {
                biased;
                _ = stopped(shutdown) => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// `Disconnected -> Connected -> Bound`. The session is closed again when
    /// any declaration fails.
    async fn bind(&self) -> Result<Bound> {
        self.set_state(SubscriberState::Disconnected);
        let mut session = self.connector.connect(&self.config).await?;
        self.set_state(SubscriberState::Connected);

        match self.declare(session.as_mut()).await {
            Ok(queue) => {
                self.set_state(SubscriberState::Bound);
                Ok(Bound { session, queue })
            }
            Err(err) => {
                let _ = session.close().await;
                self.set_state(SubscriberState::Disconnected);
                Err(err.into())
            }
        }
    }

    async fn declare(&self, session: &mut dyn Session) -> Result<String, TransportError> {
        let exchange = self.config.exchange();
        session.declare_exchange(exchange).await?;
        let queue = session.declare_queue().await?;
        for routing_key in self.config.routing_keys() {
            session.bind_queue(&queue, exchange, routing_key).await?;
        }
        Ok(queue)
    }

    /// Consumes until stopped or broken, then closes the session either way.
    async fn consume(&self, bound: Bound, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let Bound { mut session, queue } = bound;
        let outcome = self.pump(session.as_mut(), &queue, shutdown).await;

        if let Err(err) = session.close().await {
            self.log.warn(&format!("closing session failed: {err}"));
        }
        if outcome.is_err() {
            self.set_state(SubscriberState::Disconnected);
        }
        outcome
    }

    async fn pump(
        &self,
        session: &mut dyn Session,
        queue: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut deliveries = session.consume(queue).await?;
        let decoder = self.decoder();
        self.set_state(SubscriberState::Consuming);
        self.log.info(&format!(
            "[*] waiting for messages on exchange {} ({})",
            self.config.exchange(),
            self.config.routing_keys().join(", ")
        ));

        loop {
            let next = tokio::select! {
                biased;
                _ = stopped(shutdown) => return Ok(()),
                next = deliveries.next() => next,
            };
            let envelope = match next {
                Some(Ok(envelope)) => envelope,
                Some(Err(err)) => return Err(err.into()),
                None => {
                    return Err(TransportError::ConnectionLost("consumer stream ended".into()).into());
                }
            };
            self.dispatch(session, envelope, &decoder).await?;
        }
    }

    /// Hands one delivery to the handler and settles it.
    async fn dispatch(
        &self,
        session: &mut dyn Session,
        envelope: InboundEnvelope,
        decoder: &Decoder<T>,
    ) -> Result<()> {
        let tag = envelope.delivery_tag;
        let routing_key = envelope.routing_key.clone();

        let outcome = match Incoming::frame(envelope, Arc::clone(decoder)) {
            Ok(incoming) => self.handler.handle(incoming).await,
            Err(malformed) => Err(malformed),
        };

        match outcome {
            Ok(()) => {
                session.ack(tag).await?;
                self.log.info(&format!(
                    "[x] received message from exchange {}, route {routing_key}",
                    self.config.exchange()
                ));
                Ok(())
            }
            Err(err) if message_verdict(&err) == Verdict::Retryable => {
                self.log.warn(&format!(
                    "skipping delivery {tag} on route {routing_key}: {err}"
                ));
                self.settle_malformed(session, tag).await
            }
            Err(err) => {
                self.log.error(&format!(
                    "handler failed on delivery {tag} (route {routing_key}): {err}"
                ));
                Err(Error::Handler(err))
            }
        }
    }

    async fn settle_malformed(&self, session: &mut dyn Session, tag: DeliveryTag) -> Result<()> {
        match self.malformed {
            MalformedPolicy::LeaveUnacked => Ok(()),
            MalformedPolicy::Reject => Ok(session.reject(tag, false).await?),
        }
    }
}

/// Resolves once a stop is requested. A dropped sender counts as a request.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
