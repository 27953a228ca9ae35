//! Payload serialization used on both sides of the bus.
//!
//! The publisher encodes with a [`Codec`] before touching the broker, and the
//! subscriber hands the same codec to the decode thunk it gives each handler.
//! JSON is the default wire format.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::utils::error::CodecError;

pub trait Codec: Clone + Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Content type advertised on published messages.
    fn content_type(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(Box::new(e)))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

#[cfg(test)]
mod tests;
