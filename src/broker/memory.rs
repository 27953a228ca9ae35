//! In-memory topic broker
//!
//! `MemoryBroker` behaves like a single RabbitMQ node reduced to what the bus
//! uses:
//! - durable topic exchanges with wildcard bindings
//! - exclusive, auto-named queues that disappear with their connection
//! - per-channel delivery tags and manual ack/reject bookkeeping
//! - fault injection (refused connections, severed connections)
//!
//! Concurrency notes:
//! - All state lives behind one `std::sync::Mutex`; the lock is never held
//!   across an `.await`.
//! - Each queue has at most one consumer. Frames published before the
//!   consumer attaches are kept in the queue backlog and flushed on consume.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedSender};
use uuid::Uuid;

use super::message::{DeliveryTag, InboundEnvelope};
use super::topic::TopicPattern;
use super::{Connector, Deliveries, Session};
use crate::config::BrokerConfig;
use crate::utils::error::TransportError;

type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    routing_key: String,
    body: Vec<u8>,
}

/// An acknowledged or rejected delivery, as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub queue: String,
    pub delivery_tag: DeliveryTag,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Counters exposed for assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub connection_attempts: u32,
    pub connections_opened: u32,
    pub exchange_declarations: u32,
    pub queue_declarations: u32,
    pub bindings: u32,
    pub published: u32,
}

#[derive(Debug)]
struct Exchange {
    bindings: Vec<Binding>,
}

#[derive(Debug)]
struct Binding {
    queue: String,
    pattern: TopicPattern,
}

#[derive(Debug)]
struct Queue {
    owner: ConnectionId,
    backlog: VecDeque<Frame>,
    consumer: Option<UnboundedSender<Frame>>,
}

impl Queue {
    fn deliver(&mut self, frame: Frame) {
        let frame = match &self.consumer {
            Some(sender) => match sender.unbounded_send(frame) {
                Ok(()) => return,
                // consumer went away; keep the frame for the next one
                Err(e) => e.into_inner(),
            },
            None => frame,
        };
        self.consumer = None;
        self.backlog.push_back(frame);
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    connections: HashSet<ConnectionId>,
    next_connection: ConnectionId,
    refusals: u32,
    stats: BrokerStats,
    acks: Vec<Settlement>,
    rejections: Vec<Settlement>,
}

impl BrokerState {
    fn ensure_open(&self, connection: ConnectionId) -> Result<(), TransportError> {
        if self.connections.contains(&connection) {
            Ok(())
        } else {
            Err(TransportError::ConnectionLost(format!(
                "connection {connection} is closed"
            )))
        }
    }

    fn route(&mut self, exchange: &str, frame: Frame) -> Result<(), TransportError> {
        let targets: Vec<String> = {
            let exchange = self.exchanges.get(exchange).ok_or_else(|| {
                TransportError::Protocol(format!("NOT_FOUND - no exchange '{exchange}'"))
            })?;
            let mut seen = HashSet::new();
            exchange
                .bindings
                .iter()
                .filter(|b| b.pattern.matches(&frame.routing_key))
                .filter(|b| seen.insert(b.queue.clone()))
                .map(|b| b.queue.clone())
                .collect()
        };

        self.stats.published += 1;
        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.deliver(frame.clone());
            }
        }
        Ok(())
    }

    /// Drops a connection together with its exclusive queues and bindings.
    fn drop_connection(&mut self, connection: ConnectionId) {
        if !self.connections.remove(&connection) {
            return;
        }
        let owned: HashSet<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == connection)
            .map(|(name, _)| name.clone())
            .collect();
        self.queues.retain(|name, _| !owned.contains(name));
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|b| !owned.contains(&b.queue));
        }
    }
}

/// Shared handle to an in-process broker. Clones refer to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // a panicking test thread must not wedge every other user
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next `count` connection attempts fail with `ConnectionRefused`.
    pub fn refuse_connections(&self, count: u32) {
        self.lock().refusals = count;
    }

    /// Simulates a broker restart: every open connection is dropped, consumer
    /// streams end and exclusive queues are deleted. Exchanges survive.
    pub fn sever_connections(&self) {
        let mut state = self.lock();
        let open: Vec<ConnectionId> = state.connections.iter().copied().collect();
        for connection in open {
            state.drop_connection(connection);
        }
    }

    /// Publishes without a session, as another producer on the broker would.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.lock().route(
            exchange,
            Frame {
                routing_key: routing_key.to_string(),
                body: body.into(),
            },
        )
    }

    pub fn stats(&self) -> BrokerStats {
        self.lock().stats.clone()
    }

    pub fn acks(&self) -> Vec<Settlement> {
        self.lock().acks.clone()
    }

    pub fn rejections(&self) -> Vec<Settlement> {
        self.lock().rejections.clone()
    }

    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.lock().exchanges.contains_key(exchange)
    }

    /// Binding keys currently attached to `exchange`.
    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        self.lock()
            .exchanges
            .get(exchange)
            .map(|e| e.bindings.iter().map(|b| b.pattern.as_str().to_string()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, config: &BrokerConfig) -> Result<Box<dyn Session>, TransportError> {
        let mut state = self.lock();
        state.stats.connection_attempts += 1;
        if state.refusals > 0 {
            state.refusals -= 1;
            return Err(TransportError::ConnectionRefused(config.address()));
        }

        state.next_connection += 1;
        let connection = state.next_connection;
        state.connections.insert(connection);
        state.stats.connections_opened += 1;
        drop(state);

        Ok(Box::new(MemorySession {
            broker: self.clone(),
            connection,
            channel: Arc::new(Mutex::new(ChannelState::default())),
        }))
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    next_tag: u64,
    unacked: HashMap<DeliveryTag, (String, Frame)>,
}

/// One connection with one channel on a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemorySession {
    broker: MemoryBroker,
    connection: ConnectionId,
    channel: Arc<Mutex<ChannelState>>,
}

impl MemorySession {
    fn settle(&self, tag: DeliveryTag) -> Result<(String, Frame), TransportError> {
        self.broker.lock().ensure_open(self.connection)?;
        let mut channel = self.channel.lock().unwrap_or_else(|p| p.into_inner());
        channel.unacked.remove(&tag).ok_or_else(|| {
            TransportError::Protocol(format!("PRECONDITION_FAILED - unknown delivery tag {tag}"))
        })
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn declare_exchange(&mut self, exchange: &str) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        state.stats.exchange_declarations += 1;
        state
            .exchanges
            .entry(exchange.to_string())
            .or_insert_with(|| Exchange {
                bindings: Vec::new(),
            });
        Ok(())
    }

    async fn declare_queue(&mut self) -> Result<String, TransportError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());
        state.queues.insert(
            name.clone(),
            Queue {
                owner: self.connection,
                backlog: VecDeque::new(),
                consumer: None,
            },
        );
        state.stats.queue_declarations += 1;
        Ok(name)
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        if !state.queues.contains_key(queue) {
            return Err(TransportError::Protocol(format!(
                "NOT_FOUND - no queue '{queue}'"
            )));
        }
        let exchange = state.exchanges.get_mut(exchange).ok_or_else(|| {
            TransportError::Protocol(format!("NOT_FOUND - no exchange '{exchange}'"))
        })?;

        let already_bound = exchange
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern.as_str() == routing_key);
        if !already_bound {
            exchange.bindings.push(Binding {
                queue: queue.to_string(),
                pattern: TopicPattern::new(routing_key),
            });
        }
        state.stats.bindings += 1;
        Ok(())
    }

    async fn consume(&mut self, queue: &str) -> Result<Deliveries, TransportError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        let target = state.queues.get_mut(queue).ok_or_else(|| {
            TransportError::Protocol(format!("NOT_FOUND - no queue '{queue}'"))
        })?;
        if target.consumer.as_ref().is_some_and(|c| !c.is_closed()) {
            return Err(TransportError::Protocol(format!(
                "ACCESS_REFUSED - queue '{queue}' already has a consumer"
            )));
        }

        let (sender, receiver) = mpsc::unbounded();
        target.consumer = Some(sender);
        let backlog: Vec<Frame> = target.backlog.drain(..).collect();
        for frame in backlog {
            target.deliver(frame);
        }
        drop(state);

        let channel = Arc::clone(&self.channel);
        let queue = queue.to_string();
        let deliveries = receiver.map(move |frame: Frame| {
            let mut channel = channel.lock().unwrap_or_else(|p| p.into_inner());
            channel.next_tag += 1;
            let tag = DeliveryTag(channel.next_tag);
            let envelope = InboundEnvelope::new(frame.body.clone(), frame.routing_key.clone(), tag);
            channel.unacked.insert(tag, (queue.clone(), frame));
            Ok(envelope)
        });
        Ok(deliveries.boxed())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        _content_type: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.connection)?;
        state.route(
            exchange,
            Frame {
                routing_key: routing_key.to_string(),
                body: body.to_vec(),
            },
        )
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError> {
        let (queue, frame) = self.settle(tag)?;
        self.broker.lock().acks.push(Settlement {
            queue,
            delivery_tag: tag,
            routing_key: frame.routing_key,
            body: frame.body,
        });
        Ok(())
    }

    async fn reject(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        let (queue, frame) = self.settle(tag)?;
        let mut state = self.broker.lock();
        if requeue {
            if let Some(target) = state.queues.get_mut(&queue) {
                target.deliver(frame.clone());
            }
        }
        state.rejections.push(Settlement {
            queue,
            delivery_tag: tag,
            routing_key: frame.routing_key,
            body: frame.body,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.broker.lock().drop_connection(self.connection);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.broker.lock().drop_connection(self.connection);
    }
}
