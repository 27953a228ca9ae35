//! What a message handler receives.
//!
//! `Incoming<T>` carries the raw frame plus a decode thunk. Decoding is
//! deferred until the handler calls [`Incoming::decode`], so a handler can
//! look at the routing key or the raw text first, and a decode failure is an
//! ordinary `Result` in the handler's hands rather than something the
//! transport interprets.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::{DeliveryTag, InboundEnvelope};
use crate::utils::error::{CodecError, HandlerError};

/// Decode function captured by every [`Incoming`].
pub type Decoder<T> = Arc<dyn Fn(&[u8]) -> Result<T, CodecError> + Send + Sync>;

pub struct Incoming<T> {
    envelope: InboundEnvelope,
    decoder: Decoder<T>,
}

impl<T> Incoming<T> {
    /// Accepts a frame whose body is non-empty UTF-8 text.
    ///
    /// Anything else is reported as [`HandlerError::Malformed`] and never
    /// reaches a handler.
    pub fn frame(envelope: InboundEnvelope, decoder: Decoder<T>) -> Result<Self, HandlerError> {
        if envelope.body.is_empty() {
            return Err(HandlerError::Malformed("empty message body".into()));
        }
        if let Err(e) = std::str::from_utf8(&envelope.body) {
            return Err(HandlerError::Malformed(format!("body is not UTF-8 text: {e}")));
        }
        Ok(Self { envelope, decoder })
    }

    /// Materializes the payload.
    pub fn decode(&self) -> Result<T, CodecError> {
        (self.decoder)(&self.envelope.body)
    }

    pub fn routing_key(&self) -> &str {
        &self.envelope.routing_key
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        self.envelope.delivery_tag
    }

    pub fn body(&self) -> &[u8] {
        &self.envelope.body
    }

    /// The body as text; validated when the frame was accepted.
    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.envelope.body).unwrap_or_default()
    }

    pub fn into_envelope(self) -> InboundEnvelope {
        self.envelope
    }
}

impl<T> fmt::Debug for Incoming<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("routing_key", &self.envelope.routing_key)
            .field("delivery_tag", &self.envelope.delivery_tag)
            .field("len", &self.envelope.body.len())
            .finish()
    }
}

/// Callback invoked once per well-formed delivery.
///
/// `Ok` acknowledges the delivery. `Err(HandlerError::Malformed)` skips it and
/// keeps consuming; `Err(HandlerError::Failed)` makes the subscriber drop the
/// channel and reconnect. Plain closures
/// `Fn(Incoming<T>) -> Result<(), HandlerError>` implement this trait.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, message: Incoming<T>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T, F> MessageHandler<T> for F
where
    F: Fn(Incoming<T>) -> Result<(), HandlerError> + Send + Sync,
    T: 'static,
{
    async fn handle(&self, message: Incoming<T>) -> Result<(), HandlerError> {
        self(message)
    }
}
