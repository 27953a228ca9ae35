use std::io;
use std::sync::Arc;

use futures::StreamExt;

use super::amqp::{amqp_uri, transport_error};
use super::{Connector, DeliveryTag, MemoryBroker, TopicPattern};
use crate::config::{BrokerConfig, Credentials};
use crate::utils::error::TransportError;

fn config() -> BrokerConfig {
    BrokerConfig::new(
        "localhost",
        Credentials::new("guest", "guest"),
        "tracking",
        ["vehicle.*"],
    )
    .unwrap()
}

#[test]
fn test_topic_pattern_truth_table() {
    let cases = [
        ("vehicle.*", "vehicle.ping", true),
        ("vehicle.*", "vehicle", false),
        ("vehicle.*", "vehicle.ping.extra", false),
        ("vehicle.#", "vehicle", true),
        ("vehicle.#", "vehicle.ping.extra", true),
        ("#", "anything.at.all", true),
        ("*.ping", "vehicle.ping", true),
        ("*.ping", "ping", false),
        ("vehicle.ping", "vehicle.ping", true),
        ("vehicle.ping", "vehicle.pong", false),
        ("a.#.z", "a.z", true),
        ("a.#.z", "a.b.c.z", true),
        ("a.#.z", "a.b.c", false),
    ];

    for (pattern, key, expected) in cases {
        assert_eq!(
            TopicPattern::new(pattern).matches(key),
            expected,
            "{pattern} vs {key}"
        );
    }
}

#[tokio::test]
async fn test_memory_broker_routes_by_binding_and_assigns_tags() {
    let broker = MemoryBroker::new();
    let mut session = broker.connect(&config()).await.unwrap();

    session.declare_exchange("tracking").await.unwrap();
    let queue = session.declare_queue().await.unwrap();
    assert!(queue.starts_with("amq.gen-"));
    session.bind_queue(&queue, "tracking", "vehicle.*").await.unwrap();

    broker.publish("tracking", "vehicle.ping", "first").unwrap();
    broker.publish("tracking", "driver.login", "ignored").unwrap();

    let mut deliveries = session.consume(&queue).await.unwrap();
    broker.publish("tracking", "vehicle.stop", "second").unwrap();

    let first = deliveries.next().await.unwrap().unwrap();
    let second = deliveries.next().await.unwrap().unwrap();
    assert_eq!(first.body, b"first");
    assert_eq!(first.routing_key, "vehicle.ping");
    assert_eq!(first.delivery_tag, DeliveryTag(1));
    assert_eq!(second.body, b"second");
    assert_eq!(second.delivery_tag, DeliveryTag(2));

    session.ack(second.delivery_tag).await.unwrap();
    let acks = broker.acks();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].delivery_tag, DeliveryTag(2));
    assert_eq!(acks[0].routing_key, "vehicle.stop");
}

#[tokio::test]
async fn test_overlapping_bindings_deliver_once_per_queue() {
    let broker = MemoryBroker::new();
    let mut session = broker.connect(&config()).await.unwrap();
    session.declare_exchange("tracking").await.unwrap();
    let queue = session.declare_queue().await.unwrap();
    session.bind_queue(&queue, "tracking", "vehicle.*").await.unwrap();
    session.bind_queue(&queue, "tracking", "#").await.unwrap();
    let mut deliveries = session.consume(&queue).await.unwrap();

    broker.publish("tracking", "vehicle.ping", "once").unwrap();
    broker.publish("tracking", "marker", "end").unwrap();

    assert_eq!(deliveries.next().await.unwrap().unwrap().body, b"once");
    assert_eq!(deliveries.next().await.unwrap().unwrap().body, b"end");
}

#[tokio::test]
async fn test_exchange_declaration_is_idempotent() {
    let broker = MemoryBroker::new();
    let mut session = broker.connect(&config()).await.unwrap();
    session.declare_exchange("tracking").await.unwrap();
    session.declare_exchange("tracking").await.unwrap();

    assert!(broker.has_exchange("tracking"));
    assert_eq!(broker.stats().exchange_declarations, 2);
}

#[tokio::test]
async fn test_publishing_to_unknown_exchange_is_a_protocol_error() {
    let broker = MemoryBroker::new();
    let mut session = broker.connect(&config()).await.unwrap();
    let err = session
        .publish("nowhere", "vehicle.ping", b"{}", "application/json")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Protocol(_)));
}

#[tokio::test]
async fn test_acking_an_unknown_tag_fails() {
    let broker = MemoryBroker::new();
    let mut session = broker.connect(&config()).await.unwrap();
    let err = session.ack(DeliveryTag(99)).await.unwrap_err();
    assert!(matches!(err, TransportError::Protocol(_)));
    assert!(broker.acks().is_empty());
}

#[tokio::test]
async fn test_refused_connections_are_counted() {
    let broker = MemoryBroker::new();
    broker.refuse_connections(2);

    for _ in 0..2 {
        let err = broker.connect(&config()).await.err().unwrap();
        assert!(matches!(err, TransportError::ConnectionRefused(ref addr) if addr == "localhost:5672"));
    }
    assert!(broker.connect(&config()).await.is_ok());

    let stats = broker.stats();
    assert_eq!(stats.connection_attempts, 3);
    assert_eq!(stats.connections_opened, 1);
}

#[tokio::test]
async fn test_closing_a_session_removes_its_exclusive_queue() {
    let broker = MemoryBroker::new();
    let mut session = broker.connect(&config()).await.unwrap();
    session.declare_exchange("tracking").await.unwrap();
    let queue = session.declare_queue().await.unwrap();
    session.bind_queue(&queue, "tracking", "vehicle.*").await.unwrap();
    assert_eq!(broker.bindings("tracking"), vec!["vehicle.*"]);

    session.close().await.unwrap();
    session.close().await.unwrap();

    assert_eq!(broker.open_connections(), 0);
    assert!(broker.bindings("tracking").is_empty());
    assert!(broker.has_exchange("tracking"));
}

#[tokio::test]
async fn test_severing_ends_consumer_streams() {
    let broker = MemoryBroker::new();
    let mut session = broker.connect(&config()).await.unwrap();
    session.declare_exchange("tracking").await.unwrap();
    let queue = session.declare_queue().await.unwrap();
    let mut deliveries = session.consume(&queue).await.unwrap();

    broker.sever_connections();

    assert!(deliveries.next().await.is_none());
    let err = session.declare_queue().await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectionLost(_)));
}

#[tokio::test]
async fn test_rejected_with_requeue_is_redelivered() {
    let broker = MemoryBroker::new();
    let mut session = broker.connect(&config()).await.unwrap();
    session.declare_exchange("tracking").await.unwrap();
    let queue = session.declare_queue().await.unwrap();
    session.bind_queue(&queue, "tracking", "#").await.unwrap();
    let mut deliveries = session.consume(&queue).await.unwrap();

    broker.publish("tracking", "vehicle.ping", "again").unwrap();
    let first = deliveries.next().await.unwrap().unwrap();
    session.reject(first.delivery_tag, true).await.unwrap();

    let second = deliveries.next().await.unwrap().unwrap();
    assert_eq!(second.body, b"again");
    assert_ne!(second.delivery_tag, first.delivery_tag);
    assert_eq!(broker.rejections().len(), 1);
}

#[test]
fn test_amqp_uri_carries_credentials_and_vhost() {
    let config = config().with_port(5673).with_virtual_host("fleet");
    let uri = amqp_uri(&config);

    assert_eq!(uri.authority.host, "localhost");
    assert_eq!(uri.authority.port, 5673);
    assert_eq!(uri.authority.userinfo.username, "guest");
    assert_eq!(uri.vhost, "fleet");
}

#[test]
fn test_lapin_io_errors_are_classified() {
    let refused = lapin::Error::IOError(Arc::new(io::Error::from(io::ErrorKind::ConnectionRefused)));
    assert!(matches!(
        transport_error("mq:5672", refused),
        TransportError::ConnectionRefused(_)
    ));

    let reset = lapin::Error::IOError(Arc::new(io::Error::from(io::ErrorKind::ConnectionReset)));
    assert!(matches!(
        transport_error("mq:5672", reset),
        TransportError::ConnectionLost(_)
    ));

    let other = lapin::Error::IOError(Arc::new(io::Error::other("tls handshake")));
    assert!(matches!(
        transport_error("mq:5672", other),
        TransportError::Socket(_)
    ));
}
