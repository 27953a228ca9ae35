//! Inbound frame representation.
//!
//! An `InboundEnvelope` is created for every frame the broker delivers and is
//! owned by the handler invocation that processes it. Fields:
//! - `body`: raw payload bytes, not yet decoded
//! - `routing_key`: key the publisher used
//! - `delivery_tag`: per-channel handle used to ack or reject the frame

use std::fmt;

/// Opaque per-channel delivery handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub body: Vec<u8>,
    pub routing_key: String,
    pub delivery_tag: DeliveryTag,
}

impl InboundEnvelope {
    pub fn new(body: Vec<u8>, routing_key: impl Into<String>, delivery_tag: DeliveryTag) -> Self {
        Self {
            body,
            routing_key: routing_key.into(),
            delivery_tag,
        }
    }
}
