//! The `error` module defines the error types used within `tracking-bus`.
//!
//! Errors are split by the layer that produces them so the retry classifiers
//! can decide between reconnecting and giving up:
//!
//! - `ConfigError`: invalid or missing connection parameters. Never retried.
//! - `TransportError`: anything the broker connection reports.
//! - `CodecError`: payload serialization and deserialization failures.
//! - `HandlerError`: what a message handler reports back to the subscriber.
//! - `Error`: the umbrella type returned by the publisher and subscriber.

use thiserror::Error;

/// Boxed error used for handler failures that come from arbitrary user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid broker configuration, detected at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("broker setting `{0}` is missing or empty")]
    EmptyField(&'static str),

    #[error("at least one routing key is required")]
    NoRoutingKeys,

    #[error("routing key at position {0} is empty")]
    EmptyRoutingKey(usize),

    #[error("failed to load settings: {0}")]
    Source(#[from] config::ConfigError),
}

/// Failures reported by the broker connection or channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker {0} is unreachable")]
    Unreachable(String),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("broker protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the failure is a transient broker condition worth reconnecting for.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Protocol(_))
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload: {0}")]
    Encode(#[source] BoxError),

    #[error("failed to decode payload: {0}")]
    Decode(#[source] BoxError),
}

/// Outcome a message handler reports when it cannot complete.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload cannot be interpreted. The subscriber skips the message and
    /// keeps consuming.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Any other failure. The subscriber drops the channel and reconnects.
    #[error("handler failed: {0}")]
    Failed(#[source] BoxError),
}

impl HandlerError {
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        HandlerError::Failed(err.into())
    }
}

impl From<CodecError> for HandlerError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Decode(source) => HandlerError::Malformed(source.to_string()),
            other => HandlerError::Failed(Box::new(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("message handler escalated: {0}")]
    Handler(#[from] HandlerError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
