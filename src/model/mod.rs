//! Messages carried over the tracking bus.
//!
//! Vehicles report pings; services wrap domain payloads into a
//! [`TrackedMessage`] made of a header (identity and timing), the body and a
//! footer (route and response hint). The event-sourcing listener consumes
//! `TrackedMessage<VehiclePing>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A single liveness report from a vehicle.
///
/// `ts` is the device-side timestamp in seconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehiclePing {
    pub id: u64,
    pub ts: i64,
}

bitflags::bitflags! {
    /// How the receiver should interpret the message it got.
    ///
    /// Hints combine, e.g. `RETRY | IN_PROGRESS`. On the wire the set is the
    /// raw bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResponseHint: u16 {
        const OK = 1 << 0;
        const RETRY = 1 << 1;
        const IN_PROGRESS = 1 << 2;
        const CORRECT_INPUT = 1 << 3;
        const IN_MAINTENANCE = 1 << 4;
        const SYSTEM_ERROR = 1 << 5;
        const DEPRECATED = 1 << 6;
        const OBSOLETED = 1 << 7;
        const CUSTOM = 1 << 8;
        const UNAUTHORIZED = 1 << 9;
    }
}

impl Default for ResponseHint {
    fn default() -> Self {
        Self::OK
    }
}

impl Serialize for ResponseHint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.bits())
    }
}

impl<'de> Deserialize<'de> for ResponseHint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // bits unknown to this build are kept, not rejected
        u16::deserialize(deserializer).map(Self::from_bits_retain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_id: Uuid,
    /// Shared by every message produced while handling one request.
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Name of the producing service.
    pub source: String,
}

impl MessageHeader {
    pub fn new(source: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            message_id: id,
            correlation_id: id,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// A fresh header that keeps the correlation id of `self`.
    pub fn follow_up(&self, source: impl Into<String>) -> Self {
        Self {
            correlation_id: self.correlation_id,
            ..Self::new(source)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFooter {
    pub route: String,
    #[serde(default)]
    pub hint: ResponseHint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedMessage<T> {
    pub header: MessageHeader,
    pub body: T,
    pub footer: MessageFooter,
}

impl<T> TrackedMessage<T> {
    pub fn new(source: impl Into<String>, route: impl Into<String>, body: T) -> Self {
        Self {
            header: MessageHeader::new(source),
            body,
            footer: MessageFooter {
                route: route.into(),
                hint: ResponseHint::OK,
            },
        }
    }

    pub fn with_hint(mut self, hint: ResponseHint) -> Self {
        self.footer.hint = hint;
        self
    }
}
