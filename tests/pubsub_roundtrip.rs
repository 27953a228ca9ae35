use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;
use tracking_bus::broker::MemoryBroker;
use tracking_bus::config::{BrokerConfig, Credentials, Settings};
use tracking_bus::model::{ResponseHint, TrackedMessage, VehiclePing};
use tracking_bus::retry::{Backoff, RetryPolicy};
use tracking_bus::utils::error::HandlerError;
use tracking_bus::{Incoming, MessagePublisher, MessageSubscriber, SubscriberState};

fn config(routing_key: &str) -> BrokerConfig {
    BrokerConfig::new(
        "localhost",
        Credentials::new("guest", "guest"),
        "tracking",
        [routing_key],
    )
    .unwrap()
}

#[tokio::test]
async fn test_published_pings_reach_the_subscriber_in_order() {
    let broker = MemoryBroker::new();
    let received: Arc<Mutex<Vec<TrackedMessage<VehiclePing>>>> = Arc::default();
    let sink = received.clone();

    let handler = move |message: Incoming<TrackedMessage<VehiclePing>>| -> Result<(), HandlerError> {
        sink.lock().unwrap().push(message.decode()?);
        Ok(())
    };
    let subscriber = MessageSubscriber::new(config("vehicle.*"), Arc::new(broker.clone()), handler)
        .with_retry_policy(RetryPolicy::attempts(3).with_backoff(Backoff::none()));
    let mut state = subscriber.state();
    let handle = subscriber.spawn();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == SubscriberState::Consuming),
    )
    .await
    .unwrap()
    .unwrap();

    let publisher = MessagePublisher::new(config("vehicle.ping"), Arc::new(broker.clone()));
    let first = TrackedMessage::new("gateway", "vehicle.ping", VehiclePing { id: 1, ts: 10 });
    let second = TrackedMessage::new("gateway", "vehicle.ping", VehiclePing { id: 2, ts: 20 })
        .with_hint(ResponseHint::RETRY);
    publisher.publish_default(&first).await.unwrap();
    publisher.publish("vehicle.ping", &second).await.unwrap();
    publisher.publish("driver.login", &first).await.unwrap();

    timeout(Duration::from_secs(5), async {
        while broker.acks().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    handle.shutdown().await.unwrap();
    publisher.close().await.unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.as_slice(), &[first, second]);
    assert_eq!(received[1].footer.hint, ResponseHint::RETRY);
    assert_eq!(broker.acks().len(), 2);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_settings_drive_an_in_process_run() {
    let mut settings = Settings::default();
    settings.broker.host = Some("localhost".to_string());
    settings.broker.username = Some("guest".to_string());
    settings.broker.password = Some("guest".to_string());
    settings.broker.exchange = Some("tracking".to_string());

    let broker = MemoryBroker::new();
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let sink = seen.clone();
    let handler = move |message: Incoming<TrackedMessage<VehiclePing>>| -> Result<(), HandlerError> {
        sink.lock().unwrap().push(message.decode()?.body.id);
        Ok(())
    };
    let handle = MessageSubscriber::new(
        settings.broker_config().unwrap(),
        Arc::new(broker.clone()),
        handler,
    )
    .with_retry_policy(RetryPolicy::attempts(3).with_backoff(Backoff::none()))
    .spawn();
    let mut state = handle.state();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == SubscriberState::Consuming),
    )
    .await
    .unwrap()
    .unwrap();

    let publisher = MessagePublisher::new(settings.publisher_config().unwrap(), Arc::new(broker.clone()));
    for id in 1..=3 {
        let ping = TrackedMessage::new("local-feed", "vehicle.ping", VehiclePing { id, ts: 0 });
        publisher.publish_default(&ping).await.unwrap();
    }

    timeout(Duration::from_secs(5), async {
        while broker.acks().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    handle.shutdown().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    assert!(broker.acks().iter().all(|a| a.routing_key == "vehicle.ping"));
}
