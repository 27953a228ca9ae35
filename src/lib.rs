//! # tracking-bus
//!
//! `tracking_bus` is the messaging layer of a vehicle-tracking backend. It
//! publishes typed payloads to a RabbitMQ topic exchange and runs long-lived
//! subscribers that survive broker outages, hand each delivery to a caller
//! supplied handler, and acknowledge it only once the handler succeeds.
//!
//! ## Core Modules
//!
//! - `broker`: the transport seam (`Connector`/`Session`), the `lapin` backend
//!   and an in-memory topic broker used by tests and local runs.
//! - `codec`: payload serialization, JSON by default.
//! - `config`: settings loading and the validated `BrokerConfig`.
//! - `model`: the tracking messages carried over the bus.
//! - `publisher`: `MessagePublisher`.
//! - `retry`: the retry executor and its error classifiers.
//! - `subscriber`: `MessageSubscriber<T>` and its handler interface.
//! - `utils`: error types and logging.

pub mod broker;
pub mod codec;
pub mod config;
pub mod model;
pub mod publisher;
pub mod retry;
pub mod subscriber;
pub mod utils;

pub use publisher::MessagePublisher;
pub use subscriber::{
    Incoming, MalformedPolicy, MessageHandler, MessageSubscriber, SubscriberHandle,
    SubscriberState,
};
pub use utils::error::{Error, Result};
